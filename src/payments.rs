// 💵 Payment Registration - one receipt, many participants, many months
//
// A registration covering N participants × M months writes N×M rows that
// share the receipt number; the entered amount is split evenly across them.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::db::{self, PaymentRecord};
use crate::month::MonthKey;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PaymentError {
    #[error("Debe seleccionar al menos un mes")]
    NoMonths,

    #[error("Debe seleccionar al menos un participante")]
    NoParticipants,

    #[error("Mes inválido: {0}")]
    InvalidMonth(u32),

    #[error("Monto inválido: {0}")]
    InvalidAmount(f64),

    #[error("Pago no encontrado: {0}")]
    NotFound(String),
}

/// Suggested total for a registration: fee × participants × months
pub fn suggested_amount(monthly_fee: f64, participants: usize, months: usize) -> f64 {
    monthly_fee * participants as f64 * months as f64
}

// ============================================================================
// PAYMENT DRAFT (new registration)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDraft {
    /// Year the selected months belong to
    pub year: i32,
    pub participant_ids: Vec<String>,

    /// Month numbers 1-12
    pub months: Vec<u32>,

    /// Total received for the whole receipt
    pub amount: f64,

    pub payment_date: NaiveDate,
    pub receipt_number: String,

    #[serde(default)]
    pub observations: Option<String>,
}

impl PaymentDraft {
    pub fn new(year: i32, payment_date: NaiveDate, receipt_number: &str) -> Self {
        PaymentDraft {
            year,
            participant_ids: Vec::new(),
            months: Vec::new(),
            amount: 0.0,
            payment_date,
            receipt_number: receipt_number.trim().to_string(),
            observations: None,
        }
    }

    pub fn with_participants(mut self, ids: &[&str]) -> Self {
        self.participant_ids = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn with_months(mut self, months: &[u32]) -> Self {
        self.months = months.to_vec();
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_observations(mut self, observations: &str) -> Self {
        self.observations = Some(observations.to_string());
        self
    }

    /// Toggle a participant on/off, as the selection list does
    pub fn toggle_participant(&mut self, id: &str) {
        if let Some(pos) = self.participant_ids.iter().position(|p| p == id) {
            self.participant_ids.remove(pos);
        } else {
            self.participant_ids.push(id.to_string());
        }
    }

    /// Toggle a month on/off, keeping months sorted
    pub fn toggle_month(&mut self, month: u32) {
        if let Some(pos) = self.months.iter().position(|m| *m == month) {
            self.months.remove(pos);
        } else {
            self.months.push(month);
            self.months.sort_unstable();
        }
    }

    /// Reset the amount to fee × selections
    pub fn apply_suggested_amount(&mut self, monthly_fee: f64) {
        self.amount = suggested_amount(monthly_fee, self.participant_count(), self.month_count());
    }

    fn unique_participants(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.participant_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && seen.insert(*id))
            .collect()
    }

    fn unique_months(&self) -> Vec<u32> {
        self.months
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn participant_count(&self) -> usize {
        self.unique_participants().len()
    }

    pub fn month_count(&self) -> usize {
        self.unique_months().len()
    }

    pub fn validate(&self) -> Result<(), PaymentError> {
        let months = self.unique_months();
        if months.is_empty() {
            return Err(PaymentError::NoMonths);
        }
        if self.unique_participants().is_empty() {
            return Err(PaymentError::NoParticipants);
        }
        if let Some(bad) = months.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(PaymentError::InvalidMonth(*bad));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(PaymentError::InvalidAmount(self.amount));
        }
        Ok(())
    }

    /// One row per (participant × month), each with an equal share of the amount
    pub fn build_rows(&self, created_by: &str) -> Result<Vec<PaymentRecord>, PaymentError> {
        self.validate()?;

        let participants = self.unique_participants();
        let months = self.unique_months();
        let share = self.amount / (participants.len() * months.len()) as f64;

        let mut rows = Vec::with_capacity(participants.len() * months.len());
        for participant_id in &participants {
            for month in &months {
                let key = MonthKey::new(self.year, *month).ok_or(PaymentError::InvalidMonth(*month))?;
                rows.push(
                    PaymentRecord::new(
                        participant_id,
                        key,
                        share,
                        self.payment_date,
                        &self.receipt_number,
                        created_by,
                    )
                    .with_observations(self.observations.clone()),
                );
            }
        }

        Ok(rows)
    }
}

/// Validate, split and store a registration
pub fn register_payment(
    conn: &Connection,
    draft: &PaymentDraft,
    created_by: &str,
) -> Result<Vec<PaymentRecord>> {
    let rows = draft.build_rows(created_by)?;
    db::insert_payments(conn, &rows)?;

    tracing::info!(
        receipt = %draft.receipt_number,
        rows = rows.len(),
        amount = draft.amount,
        "payment registered"
    );

    Ok(rows)
}

// ============================================================================
// PAYMENT EDIT (single existing row)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEdit {
    pub participant_id: String,
    pub year: i32,
    pub month: u32,
    pub amount: f64,
    pub payment_date: NaiveDate,
    pub receipt_number: String,
}

impl PaymentEdit {
    /// Pre-fill from an existing row
    pub fn from_record(record: &PaymentRecord) -> Option<Self> {
        let key = record.month_key()?;
        Some(PaymentEdit {
            participant_id: record.participant_id.clone(),
            year: key.year,
            month: key.month,
            amount: record.amount,
            payment_date: record.payment_date,
            receipt_number: record.receipt_number.clone(),
        })
    }

    pub fn apply_to(&self, record: &mut PaymentRecord, edited_by: &str) -> Result<(), PaymentError> {
        if self.participant_id.trim().is_empty() {
            return Err(PaymentError::NoParticipants);
        }
        let key = MonthKey::new(self.year, self.month).ok_or(PaymentError::InvalidMonth(self.month))?;
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(PaymentError::InvalidAmount(self.amount));
        }

        record.participant_id = self.participant_id.trim().to_string();
        record.month = key.to_string();
        record.amount = self.amount;
        record.payment_date = self.payment_date;
        record.receipt_number = self.receipt_number.trim().to_string();
        record.created_by = edited_by.to_string();
        Ok(())
    }
}

/// Apply an edit to a stored payment
pub fn edit_payment(
    conn: &Connection,
    payment_id: &str,
    edit: &PaymentEdit,
    edited_by: &str,
) -> Result<PaymentRecord> {
    let mut record = db::get_payment(conn, payment_id)?
        .ok_or_else(|| PaymentError::NotFound(payment_id.to_string()))?;

    edit.apply_to(&mut record, edited_by)?;
    db::update_payment(conn, &record)?;

    Ok(record)
}

// ============================================================================
// PAID-MONTH LOOKUP
// ============================================================================

/// Months of `year` already paid by any of `participant_ids`
pub fn paid_months_for(
    participant_ids: &[String],
    year: i32,
    payments: &[PaymentRecord],
) -> BTreeSet<u32> {
    payments
        .iter()
        .filter(|p| participant_ids.iter().any(|id| id == &p.participant_id))
        .filter_map(|p| p.month_key())
        .filter(|key| key.year == year)
        .map(|key| key.month)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{setup_database, Participant, DEFAULT_MONTHLY_FEE};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    #[test]
    fn test_split_across_participants_and_months() {
        let draft = PaymentDraft::new(2025, date(), "R-100")
            .with_participants(&["p1", "p2"])
            .with_months(&[3, 1])
            .with_amount(12000.0)
            .with_observations("pago conjunto");

        let rows = draft.build_rows("Admin").unwrap();

        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.amount == 3000.0));
        assert!(rows.iter().all(|r| r.receipt_number == "R-100"));
        assert!(rows.iter().all(|r| r.observations_text() == "pago conjunto"));
        let months: Vec<&str> = rows.iter().map(|r| r.month.as_str()).collect();
        assert_eq!(months, vec!["2025-01", "2025-03", "2025-01", "2025-03"]);
        let total: f64 = rows.iter().map(|r| r.amount).sum();
        assert_eq!(total, 12000.0);
    }

    #[test]
    fn test_validation_messages() {
        let base = PaymentDraft::new(2025, date(), "R-1").with_amount(3000.0);

        let no_months = base.clone().with_participants(&["p1"]);
        assert_eq!(no_months.validate(), Err(PaymentError::NoMonths));
        assert_eq!(
            PaymentError::NoMonths.to_string(),
            "Debe seleccionar al menos un mes"
        );

        let no_participants = base.clone().with_months(&[1]);
        assert_eq!(no_participants.validate(), Err(PaymentError::NoParticipants));

        let bad_month = base.clone().with_participants(&["p1"]).with_months(&[13]);
        assert_eq!(bad_month.validate(), Err(PaymentError::InvalidMonth(13)));

        let zero = PaymentDraft::new(2025, date(), "R-1")
            .with_participants(&["p1"])
            .with_months(&[1]);
        assert_eq!(zero.validate(), Err(PaymentError::InvalidAmount(0.0)));
    }

    #[test]
    fn test_toggles_and_suggested_amount() {
        let mut draft = PaymentDraft::new(2025, date(), "R-1");
        draft.toggle_participant("p1");
        draft.toggle_participant("p2");
        draft.toggle_month(5);
        draft.toggle_month(2);
        draft.toggle_month(7);
        draft.toggle_month(5);
        draft.apply_suggested_amount(DEFAULT_MONTHLY_FEE);

        assert_eq!(draft.months, vec![2, 7]);
        assert_eq!(draft.amount, 12000.0);

        draft.toggle_participant("p1");
        assert_eq!(draft.participant_ids, vec!["p2".to_string()]);
        assert_eq!(suggested_amount(3000.0, 0, 3), 0.0);
    }

    #[test]
    fn test_register_and_edit_payment() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let juan = Participant::new("P001", "Juan");
        db::insert_participant(&conn, &juan).unwrap();

        let draft = PaymentDraft::new(2025, date(), "R-1")
            .with_participants(&[juan.id.as_str()])
            .with_months(&[1, 2])
            .with_amount(6000.0);
        let rows = register_payment(&conn, &draft, "Admin").unwrap();
        assert_eq!(db::count_payments(&conn).unwrap(), 2);

        let mut edit = PaymentEdit::from_record(&rows[0]).unwrap();
        edit.month = 6;
        edit.amount = 2500.0;
        let updated = edit_payment(&conn, &rows[0].id, &edit, "Pastora").unwrap();
        assert_eq!(updated.month, "2025-06");
        assert_eq!(updated.created_by, "Pastora");

        let missing = edit_payment(&conn, "nope", &edit, "Admin");
        assert!(missing.is_err());
    }

    #[test]
    fn test_paid_months_for_selection() {
        let rows = PaymentDraft::new(2025, date(), "R-1")
            .with_participants(&["p1", "p2"])
            .with_months(&[1, 4])
            .with_amount(12000.0)
            .build_rows("Admin")
            .unwrap();
        let mut other_year = rows[0].clone();
        other_year.month = "2024-09".to_string();

        let mut all = rows.clone();
        all.push(other_year);

        let paid = paid_months_for(&["p2".to_string()], 2025, &all);
        assert_eq!(paid.into_iter().collect::<Vec<_>>(), vec![1, 4]);
        assert!(paid_months_for(&["p9".to_string()], 2025, &all).is_empty());
    }
}
