// ⚖️ Month-Status Reconciler - which months of a year has a participant paid?
//
// Paid/unpaid is boolean per month key: one payment row is enough, extra rows
// for the same month only add to the paid total.
//
//   unpaid_count = 12 - paid_count
//   total_owed   = unpaid_count × monthly_fee

use crate::db::{PaymentRecord, DEFAULT_MONTHLY_FEE};
use crate::month::MonthKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// MONTH STATUS REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthStatusReport {
    pub year: i32,

    /// Exactly 12 entries, months 1..=12 in order
    pub month_map: BTreeMap<u32, bool>,

    pub paid_count: u32,
    pub unpaid_count: u32,

    /// Sum of amounts of rows falling in `year`
    pub total_paid: f64,

    /// unpaid_count × monthly fee
    pub total_owed: f64,

    /// Rows whose month key could not be parsed
    pub skipped: usize,

    /// Rows with a valid key in another year
    pub out_of_range: usize,
}

impl MonthStatusReport {
    pub fn is_paid(&self, month: u32) -> bool {
        self.month_map.get(&month).copied().unwrap_or(false)
    }

    pub fn is_fully_paid(&self) -> bool {
        self.unpaid_count == 0
    }

    /// (month key, paid) pairs in calendar order
    pub fn months(&self) -> impl Iterator<Item = (MonthKey, bool)> + '_ {
        let year = self.year;
        self.month_map
            .iter()
            .map(move |(month, paid)| (MonthKey { year, month: *month }, *paid))
    }

    pub fn unpaid_months(&self) -> Vec<u32> {
        self.month_map
            .iter()
            .filter(|(_, paid)| !**paid)
            .map(|(month, _)| *month)
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} paid, {} pending, paid {:.0}, owed {:.0}",
            self.year, self.paid_count, self.unpaid_count, self.total_paid, self.total_owed
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    /// Nominal fee owed per unpaid month (default: 3000)
    pub monthly_fee: f64,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            monthly_fee: DEFAULT_MONTHLY_FEE,
        }
    }

    pub fn with_fee(monthly_fee: f64) -> Self {
        ReconciliationEngine { monthly_fee }
    }

    /// Reconcile one participant's payments against the 12 months of `year`.
    ///
    /// Rows from other years never mark a slot; malformed month keys are
    /// counted in `skipped` so the caller can report them.
    pub fn reconcile(&self, year: i32, payments: &[PaymentRecord]) -> MonthStatusReport {
        let mut month_map: BTreeMap<u32, bool> = (1..=12).map(|m| (m, false)).collect();
        let mut total_paid = 0.0;
        let mut skipped = 0;
        let mut out_of_range = 0;

        for payment in payments {
            match payment.month_key() {
                Some(key) if key.year == year => {
                    month_map.insert(key.month, true);
                    total_paid += payment.amount;
                }
                Some(_) => out_of_range += 1,
                None => skipped += 1,
            }
        }

        let paid_count = month_map.values().filter(|paid| **paid).count() as u32;
        let unpaid_count = 12 - paid_count;

        MonthStatusReport {
            year,
            month_map,
            paid_count,
            unpaid_count,
            total_paid,
            total_owed: unpaid_count as f64 * self.monthly_fee,
            skipped,
            out_of_range,
        }
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconcile with the system-wide monthly fee
pub fn reconcile_months(year: i32, payments: &[PaymentRecord]) -> MonthStatusReport {
    ReconciliationEngine::new().reconcile(year, payments)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn create_test_payment(month: &str, amount: f64) -> PaymentRecord {
        let mut payment = PaymentRecord::new(
            "participant-1",
            MonthKey::new(2025, 1).unwrap(),
            amount,
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            "R-100",
            "Admin",
        );
        // raw text so malformed keys can be exercised
        payment.month = month.to_string();
        payment
    }

    #[test]
    fn test_empty_payments_all_unpaid() {
        let report = reconcile_months(2025, &[]);

        assert_eq!(report.month_map.len(), 12);
        assert!(report.month_map.values().all(|paid| !paid));
        assert_eq!(report.paid_count, 0);
        assert_eq!(report.unpaid_count, 12);
        assert_eq!(report.total_paid, 0.0);
        assert_eq!(report.total_owed, 12.0 * DEFAULT_MONTHLY_FEE);
    }

    #[test]
    fn test_full_year_paid() {
        let payments: Vec<PaymentRecord> = (1..=12)
            .map(|m| create_test_payment(&format!("2025-{:02}", m), 3000.0))
            .collect();

        let report = reconcile_months(2025, &payments);

        assert_eq!(report.paid_count, 12);
        assert_eq!(report.unpaid_count, 0);
        assert_eq!(report.total_owed, 0.0);
        assert_eq!(report.total_paid, 36000.0);
        assert!(report.is_fully_paid());
    }

    #[test]
    fn test_duplicate_month_sums_but_counts_once() {
        let payments = vec![
            create_test_payment("2025-03", 1500.0),
            create_test_payment("2025-03", 1500.0),
        ];

        let report = reconcile_months(2025, &payments);

        assert!(report.is_paid(3));
        assert_eq!(report.paid_count, 1);
        assert_eq!(report.total_paid, 3000.0);
        assert_eq!(report.total_owed, 11.0 * 3000.0);
    }

    #[test]
    fn test_other_year_does_not_mark_slots() {
        let payments = vec![
            create_test_payment("2024-05", 3000.0),
            create_test_payment("2025-05", 3000.0),
        ];

        let report = reconcile_months(2025, &payments);

        assert_eq!(report.paid_count, 1);
        assert_eq!(report.out_of_range, 1);
        assert_eq!(report.total_paid, 3000.0);
    }

    #[test]
    fn test_malformed_month_key_skipped() {
        let payments = vec![
            create_test_payment("mayo", 3000.0),
            create_test_payment("2025-13", 3000.0),
            create_test_payment("2025-06", 3000.0),
        ];

        let report = reconcile_months(2025, &payments);

        assert_eq!(report.skipped, 2);
        assert_eq!(report.paid_count, 1);
        assert!(report.is_paid(6));
    }

    #[test]
    fn test_custom_fee_and_unpaid_months() {
        let engine = ReconciliationEngine::with_fee(5000.0);
        let payments = vec![create_test_payment("2025-01", 5000.0)];

        let report = engine.reconcile(2025, &payments);

        assert_eq!(report.total_owed, 11.0 * 5000.0);
        assert_eq!(report.unpaid_months(), (2..=12).collect::<Vec<u32>>());

        let keys: Vec<String> = report.months().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys.first().map(String::as_str), Some("2025-01"));
        assert_eq!(keys.last().map(String::as_str), Some("2025-12"));
    }

    proptest! {
        /// For any set of in-year months, paid + unpaid is always 12.
        #[test]
        fn paid_plus_unpaid_is_twelve(months in prop::collection::vec(1u32..=12, 0..40)) {
            let payments: Vec<PaymentRecord> = months
                .iter()
                .map(|m| create_test_payment(&format!("2025-{:02}", m), 3000.0))
                .collect();

            let report = reconcile_months(2025, &payments);

            prop_assert_eq!(report.month_map.len(), 12);
            prop_assert_eq!(report.paid_count + report.unpaid_count, 12);
            prop_assert_eq!(report.total_paid, 3000.0 * months.len() as f64);
        }
    }
}
