// 📒 Consolidado - one participant's yearly statement

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::db::{Participant, PaymentRecord};
use crate::formatting::format_consecutive_months;
use crate::reconciliation::{MonthStatusReport, ReconciliationEngine};
use crate::repository::{PaymentFilter, PaymentRepository};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consolidado {
    pub participant: Participant,

    /// Every payment of the participant, ordered by month key
    pub payments: Vec<PaymentRecord>,

    pub report: MonthStatusReport,
}

impl Consolidado {
    pub fn load(
        repo: &dyn PaymentRepository,
        participant: &Participant,
        year: i32,
        monthly_fee: f64,
    ) -> Result<Self> {
        let mut payments = repo.fetch_payments(&PaymentFilter::for_participant(&participant.id))?;
        payments.sort_by(|a, b| a.month.cmp(&b.month).then_with(|| a.created_at.cmp(&b.created_at)));

        let report = ReconciliationEngine::with_fee(monthly_fee).reconcile(year, &payments);
        if report.skipped > 0 {
            tracing::warn!(
                participant = %participant.code,
                skipped = report.skipped,
                "payments with malformed month keys ignored"
            );
        }

        Ok(Consolidado {
            participant: participant.clone(),
            payments,
            report,
        })
    }

    /// Paid months of the reconciled year, e.g. "Enero - Marzo 2025"
    pub fn paid_summary(&self) -> String {
        let in_year: Vec<PaymentRecord> = self
            .payments
            .iter()
            .filter(|p| p.month_key().map_or(false, |k| k.year == self.report.year))
            .cloned()
            .collect();
        format_consecutive_months(&in_year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::month::MonthKey;
    use crate::repository::InMemoryRepository;
    use chrono::NaiveDate;

    fn create_test_payment(participant: &Participant, year: i32, month: u32) -> PaymentRecord {
        PaymentRecord::new(
            &participant.id,
            MonthKey::new(year, month).unwrap(),
            3000.0,
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            "R-1",
            "Admin",
        )
    }

    #[test]
    fn test_consolidado_for_year() {
        let ana = Participant::new("P001", "Ana");
        let beto = Participant::new("P002", "Beto");
        let mut malformed = create_test_payment(&ana, 2025, 9);
        malformed.month = "septiembre".to_string();

        let repo = InMemoryRepository::new(
            vec![ana.clone(), beto.clone()],
            vec![
                create_test_payment(&ana, 2025, 3),
                create_test_payment(&ana, 2025, 1),
                create_test_payment(&ana, 2025, 2),
                create_test_payment(&ana, 2024, 12),
                create_test_payment(&beto, 2025, 1),
                malformed,
            ],
        );

        let consolidado = Consolidado::load(&repo, &ana, 2025, 3000.0).unwrap();

        let months: Vec<&str> = consolidado.payments.iter().map(|p| p.month.as_str()).collect();
        assert_eq!(months, vec!["2024-12", "2025-01", "2025-02", "2025-03", "septiembre"]);
        assert_eq!(consolidado.report.paid_count, 3);
        assert_eq!(consolidado.report.unpaid_count, 9);
        assert_eq!(consolidado.report.total_paid, 9000.0);
        assert_eq!(consolidado.report.total_owed, 27000.0);
        assert_eq!(consolidado.report.skipped, 1);
        assert_eq!(consolidado.report.out_of_range, 1);
        assert_eq!(consolidado.paid_summary(), "Enero - Marzo 2025");
    }

    #[test]
    fn test_consolidado_without_payments() {
        let ana = Participant::new("P001", "Ana");
        let repo = InMemoryRepository::new(vec![ana.clone()], vec![]);

        let consolidado = Consolidado::load(&repo, &ana, 2025, 3000.0).unwrap();

        assert!(consolidado.payments.is_empty());
        assert_eq!(consolidado.report.total_owed, 36000.0);
        assert_eq!(consolidado.paid_summary(), "");
    }
}
