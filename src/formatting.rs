// 🔤 Display formatting - Spanish month ranges, es-CO currency, long dates

use crate::db::PaymentRecord;
use crate::month::MonthKey;
use chrono::{Datelike, NaiveDate};
use num_format::{CustomFormat, Grouping, ToFormattedString};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// CONSECUTIVE-MONTH FORMATTER
// ============================================================================

/// Describe which months were paid, collapsing consecutive runs.
///
/// - one month:     "Enero 2025"
/// - two months:    "Enero, Febrero 2025"
/// - three or more: "Enero - Marzo 2025"
///
/// Several participants are rendered as "P001: ... | P002: ...", in code order.
/// Rows with a malformed month key are left out.
pub fn format_consecutive_months(payments: &[PaymentRecord]) -> String {
    let mut by_participant: BTreeMap<&str, BTreeSet<MonthKey>> = BTreeMap::new();

    for payment in payments {
        if let Some(key) = payment.month_key() {
            by_participant
                .entry(payment.participant_code())
                .or_default()
                .insert(key);
        }
    }

    let show_code = by_participant.len() > 1;

    by_participant
        .iter()
        .map(|(code, months)| {
            let runs = render_runs(months);
            if show_code {
                format!("{}: {}", code, runs)
            } else {
                runs
            }
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Maximal runs of consecutive calendar months as (start, end, length)
fn consecutive_runs(months: &BTreeSet<MonthKey>) -> Vec<(MonthKey, MonthKey, usize)> {
    let mut runs = Vec::new();
    let mut iter = months.iter();

    let Some(first) = iter.next() else {
        return runs;
    };

    let (mut start, mut end, mut len) = (*first, *first, 1);
    for key in iter {
        if end.is_followed_by(key) {
            end = *key;
            len += 1;
        } else {
            runs.push((start, end, len));
            start = *key;
            end = *key;
            len = 1;
        }
    }
    runs.push((start, end, len));

    runs
}

fn render_runs(months: &BTreeSet<MonthKey>) -> String {
    consecutive_runs(months)
        .into_iter()
        .map(|(start, end, len)| render_run(start, end, len))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_run(start: MonthKey, end: MonthKey, len: usize) -> String {
    let same_year = start.year == end.year;
    match (len, same_year) {
        (1, _) => format!("{} {}", start.name(), start.year),
        (2, true) => format!("{}, {} {}", start.name(), end.name(), end.year),
        (2, false) => format!(
            "{} {}, {} {}",
            start.name(),
            start.year,
            end.name(),
            end.year
        ),
        (_, true) => format!("{} - {} {}", start.name(), end.name(), end.year),
        (_, false) => format!(
            "{} {} - {} {}",
            start.name(),
            start.year,
            end.name(),
            end.year
        ),
    }
}

// ============================================================================
// CURRENCY & DATES
// ============================================================================

/// es-CO peso display without decimals: 3000 → "$ 3.000"
pub fn format_currency(amount: f64) -> String {
    let rounded = amount.round() as i64;
    let digits = match CustomFormat::builder()
        .grouping(Grouping::Standard)
        .separator(".")
        .build()
    {
        Ok(format) => rounded.unsigned_abs().to_formatted_string(&format),
        Err(_) => rounded.unsigned_abs().to_string(),
    };

    if rounded < 0 {
        format!("-$ {}", digits)
    } else {
        format!("$ {}", digits)
    }
}

/// Plain amount for CSV cells: integers without ".0"
pub fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{}", amount as i64)
    } else {
        format!("{}", amount)
    }
}

/// "mayo de 2025"
pub fn format_month_long(key: MonthKey) -> String {
    format!("{} de {}", key.name().to_lowercase(), key.year)
}

/// Month key text rendered long, falling back to the raw text when malformed
pub fn format_month_text(month: &str) -> String {
    match MonthKey::parse(month) {
        Some(key) => format_month_long(key),
        None => month.to_string(),
    }
}

/// "5 de mayo de 2025"
pub fn format_date(date: NaiveDate) -> String {
    let key = MonthKey::from_date(date);
    format!("{} de {}", date.day(), format_month_long(key))
}

/// "05/05/2025"
pub fn format_date_short(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

// ============================================================================
// TESTS
// ============================================================================
