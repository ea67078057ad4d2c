// 🗄️ Payment Repository - the one data-access seam the fee logic depends on
//
// Views fetch through this trait, then hand the rows to the pure
// reconciliation / grouping / formatting functions.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::{self, Participant, PaymentRecord};

// ============================================================================
// FILTERS
// ============================================================================

/// Payment query. Every populated field narrows the result (logical AND).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentFilter {
    pub participant_id: Option<String>,

    /// Any of these participants; an empty list matches nothing
    pub participant_ids: Option<Vec<String>>,

    /// Exact month key, "YYYY-MM"
    pub month: Option<String>,

    /// Month keys of one year, e.g. "2025"
    pub year_prefix: Option<String>,

    /// Inclusive payment-date range
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl PaymentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_participant(participant_id: &str) -> Self {
        PaymentFilter {
            participant_id: Some(participant_id.to_string()),
            ..Default::default()
        }
    }

    pub fn for_month(month: &str) -> Self {
        PaymentFilter {
            month: Some(month.to_string()),
            ..Default::default()
        }
    }

    pub fn for_participants_in_year(participant_ids: &[String], year: i32) -> Self {
        PaymentFilter {
            participant_ids: Some(participant_ids.to_vec()),
            year_prefix: Some(year.to_string()),
            ..Default::default()
        }
    }

    /// In-memory evaluation, same semantics as the SQL query
    pub fn matches(&self, payment: &PaymentRecord) -> bool {
        if let Some(id) = &self.participant_id {
            if &payment.participant_id != id {
                return false;
            }
        }

        if let Some(ids) = &self.participant_ids {
            if !ids.iter().any(|id| id == &payment.participant_id) {
                return false;
            }
        }

        if let Some(month) = &self.month {
            if &payment.month != month {
                return false;
            }
        }

        if let Some(prefix) = &self.year_prefix {
            let prefix = format!("{}-", prefix.trim_end_matches('-'));
            if !payment.month.starts_with(&prefix) {
                return false;
            }
        }

        if let Some((from, to)) = &self.date_range {
            if payment.payment_date < *from || payment.payment_date > *to {
                return false;
            }
        }

        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantFilter {
    pub active: Option<bool>,
}

impl ParticipantFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn active() -> Self {
        ParticipantFilter { active: Some(true) }
    }

    pub fn matches(&self, participant: &Participant) -> bool {
        self.active.map_or(true, |active| participant.is_active == active)
    }
}

// ============================================================================
// REPOSITORY TRAIT
// ============================================================================

pub trait PaymentRepository {
    /// Payments matching `filter`, newest first, with participants attached
    fn fetch_payments(&self, filter: &PaymentFilter) -> Result<Vec<PaymentRecord>>;

    /// Participants matching `filter`, ordered by code
    fn fetch_participants(&self, filter: &ParticipantFilter) -> Result<Vec<Participant>>;
}

/// SQLite-backed repository over a borrowed connection
pub struct SqliteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteRepository { conn }
    }
}

impl PaymentRepository for SqliteRepository<'_> {
    fn fetch_payments(&self, filter: &PaymentFilter) -> Result<Vec<PaymentRecord>> {
        db::query_payments(self.conn, filter)
    }

    fn fetch_participants(&self, filter: &ParticipantFilter) -> Result<Vec<Participant>> {
        db::query_participants(self.conn, filter)
    }
}

/// Vec-backed repository for tests and offline use
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    participants: Vec<Participant>,
    payments: Vec<PaymentRecord>,
}

impl InMemoryRepository {
    pub fn new(participants: Vec<Participant>, payments: Vec<PaymentRecord>) -> Self {
        InMemoryRepository {
            participants,
            payments,
        }
    }

    pub fn add_participant(&mut self, participant: Participant) {
        self.participants.push(participant);
    }

    pub fn add_payment(&mut self, payment: PaymentRecord) {
        self.payments.push(payment);
    }
}

impl PaymentRepository for InMemoryRepository {
    fn fetch_payments(&self, filter: &PaymentFilter) -> Result<Vec<PaymentRecord>> {
        let by_id: HashMap<&str, &Participant> = self
            .participants
            .iter()
            .map(|p| (p.id.as_str(), p))
            .collect();

        let mut payments: Vec<PaymentRecord> = self
            .payments
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .map(|mut p| {
                p.participant = by_id.get(p.participant_id.as_str()).map(|pt| (*pt).clone());
                p
            })
            .collect();

        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(payments)
    }

    fn fetch_participants(&self, filter: &ParticipantFilter) -> Result<Vec<Participant>> {
        let mut participants: Vec<Participant> = self
            .participants
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();

        participants.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(participants)
    }
}
