// 📅 Month Keys - the obligation period a payment settles
// Stored as "YYYY-MM" text; month granularity only, no day.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Spanish full month names, index 0 = January
pub const MONTH_NAMES: [&str; 12] = [
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

/// Spanish month name for a month number (1-12)
pub fn month_name(month: u32) -> Option<&'static str> {
    if (1..=12).contains(&month) {
        Some(MONTH_NAMES[(month - 1) as usize])
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonthKeyError {
    #[error("malformed month key '{0}' (expected YYYY-MM)")]
    Malformed(String),

    #[error("month out of range in '{0}'")]
    OutOfRange(String),
}

// ============================================================================
// MONTH KEY
// ============================================================================

/// Year + month identifier. Orders by year first, then month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(MonthKey { year, month })
        } else {
            None
        }
    }

    /// Parse a "YYYY-MM" key. Returns None for anything else.
    pub fn parse(text: &str) -> Option<Self> {
        text.parse().ok()
    }

    pub fn from_date(date: NaiveDate) -> Self {
        MonthKey {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Month key of today's UTC date
    pub fn current() -> Self {
        Self::from_date(Utc::now().date_naive())
    }

    /// All 12 keys of a calendar year, January first
    pub fn year_months(year: i32) -> impl Iterator<Item = MonthKey> {
        (1..=12).map(move |month| MonthKey { year, month })
    }

    /// The calendar month right after this one (December rolls into next year)
    pub fn next(&self) -> Self {
        if self.month == 12 {
            MonthKey {
                year: self.year + 1,
                month: 1,
            }
        } else {
            MonthKey {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn is_followed_by(&self, other: &MonthKey) -> bool {
        self.next() == *other
    }

    pub fn name(&self) -> &'static str {
        month_name(self.month).unwrap_or("?")
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = MonthKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (year_part, month_part) = trimmed
            .split_once('-')
            .ok_or_else(|| MonthKeyError::Malformed(s.to_string()))?;

        if year_part.len() != 4 || month_part.is_empty() || month_part.len() > 2 {
            return Err(MonthKeyError::Malformed(s.to_string()));
        }
        if !year_part.chars().all(|c| c.is_ascii_digit())
            || !month_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(MonthKeyError::Malformed(s.to_string()));
        }

        let year: i32 = year_part
            .parse()
            .map_err(|_| MonthKeyError::Malformed(s.to_string()))?;
        let month: u32 = month_part
            .parse()
            .map_err(|_| MonthKeyError::Malformed(s.to_string()))?;

        MonthKey::new(year, month).ok_or_else(|| MonthKeyError::OutOfRange(s.to_string()))
    }
}
