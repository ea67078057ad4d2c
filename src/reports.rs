// 📑 Reports - filtered payment listings, receipt view and CSV export

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::db::{Participant, PaymentRecord};
use crate::formatting::{
    format_amount, format_consecutive_months, format_currency, format_date, format_date_short,
    format_month_text,
};
use crate::grouping::group_by_receipt;
use crate::repository::{ParticipantFilter, PaymentFilter, PaymentRepository};

// ============================================================================
// FILTER & SUMMARY
// ============================================================================

/// Report filter. Unset fields do not narrow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub participant_id: Option<String>,

    /// Substring of the month key: "2025-05" or just "2025"
    pub month: Option<String>,
}

impl ReportFilter {
    pub fn matches(&self, payment: &PaymentRecord) -> bool {
        if let Some(start) = self.start_date {
            if payment.payment_date < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if payment.payment_date > end {
                return false;
            }
        }
        if let Some(id) = self.participant_id.as_deref().filter(|id| !id.is_empty()) {
            if payment.participant_id != id {
                return false;
            }
        }
        if let Some(month) = self.month.as_deref().filter(|m| !m.is_empty()) {
            if !payment.month.contains(month) {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, payments: &[PaymentRecord]) -> Vec<PaymentRecord> {
        payments.iter().filter(|p| self.matches(p)).cloned().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_amount: f64,
    pub unique_participants: usize,
    pub payment_count: usize,
}

impl ReportSummary {
    pub fn from_payments(payments: &[PaymentRecord]) -> Self {
        ReportSummary {
            total_amount: payments.iter().map(|p| p.amount).sum(),
            unique_participants: payments
                .iter()
                .map(|p| p.participant_id.as_str())
                .collect::<HashSet<_>>()
                .len(),
            payment_count: payments.len(),
        }
    }
}

/// Fetch every payment and apply `filter`
pub fn load_report(repo: &dyn PaymentRepository, filter: &ReportFilter) -> Result<Vec<PaymentRecord>> {
    let payments = repo.fetch_payments(&PaymentFilter::all())?;
    Ok(filter.apply(&payments))
}

// ============================================================================
// RECEIPT ROWS
// ============================================================================

/// One rendered line of the receipt table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRow {
    pub receipt_number: String,

    /// "P001 - Juan Pérez" per distinct participant, in row order
    pub participants: Vec<String>,

    pub months: String,
    pub total: String,
    pub date: String,

    /// "-" when the group has none
    pub observations: String,
}

pub fn receipt_rows(payments: &[PaymentRecord]) -> Vec<ReceiptRow> {
    group_by_receipt(payments)
        .into_iter()
        .map(|group| {
            let mut seen = HashSet::new();
            let participants = group
                .payments
                .iter()
                .filter(|p| seen.insert(p.participant_id.clone()))
                .map(|p| format!("{} - {}", p.participant_code(), p.participant_name()))
                .collect();

            ReceiptRow {
                receipt_number: group.key.clone(),
                participants,
                months: format_consecutive_months(&group.payments),
                total: format_currency(group.total_amount),
                date: format_date(group.payment_date),
                observations: if group.observations.is_empty() {
                    "-".to_string()
                } else {
                    group.observations.clone()
                },
            }
        })
        .collect()
}

// ============================================================================
// CSV EXPORT
// ============================================================================

pub const REPORT_HEADERS: [&str; 6] = ["Fecha", "Participante", "Código", "Mes", "Monto", "Recibo"];
pub const PARTICIPANT_HEADERS: [&str; 5] =
    ["Código", "Nombre", "Cuota Mensual", "Estado", "Fecha Creación"];
pub const PAYMENT_HEADERS: [&str; 6] =
    ["Fecha", "Código Participante", "Nombre", "Mes", "Monto", "Recibo"];

fn csv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(writer)
}

/// Filtered payment report, months spelled out ("mayo de 2025")
pub fn write_payments_report<W: Write>(writer: W, payments: &[PaymentRecord]) -> Result<()> {
    let mut wtr = csv_writer(writer);
    wtr.write_record(REPORT_HEADERS)?;

    for payment in payments {
        wtr.write_record([
            payment.payment_date.to_string(),
            payment.participant_name().to_string(),
            payment
                .participant
                .as_ref()
                .map(|p| p.code.clone())
                .unwrap_or_default(),
            format_month_text(&payment.month),
            format_amount(payment.amount),
            payment.receipt_number.clone(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_participants_export<W: Write>(writer: W, participants: &[Participant]) -> Result<()> {
    let mut wtr = csv_writer(writer);
    wtr.write_record(PARTICIPANT_HEADERS)?;

    for participant in participants {
        wtr.write_record([
            participant.code.clone(),
            participant.full_name.clone(),
            format_amount(participant.monthly_fee),
            participant.status_label().to_string(),
            format_date_short(participant.created_at.date_naive()),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Raw payment dump, month keys as stored
pub fn write_payments_export<W: Write>(writer: W, payments: &[PaymentRecord]) -> Result<()> {
    let mut wtr = csv_writer(writer);
    wtr.write_record(PAYMENT_HEADERS)?;

    for payment in payments {
        wtr.write_record([
            payment.payment_date.to_string(),
            payment
                .participant
                .as_ref()
                .map(|p| p.code.clone())
                .unwrap_or_default(),
            payment.participant_name().to_string(),
            payment.month.clone(),
            format_amount(payment.amount),
            payment.receipt_number.clone(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn report_filename(date: NaiveDate) -> String {
    format!("reporte_pagos_{}.csv", date)
}

pub fn participants_filename(date: NaiveDate) -> String {
    format!("participantes_{}.csv", date)
}

pub fn payments_filename(date: NaiveDate) -> String {
    format!("pagos_{}.csv", date)
}

/// Write the report for `payments` to `path`
pub fn export_report(path: &Path, payments: &[PaymentRecord]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_payments_report(file, payments)?;
    tracing::info!(path = %path.display(), rows = payments.len(), "report exported");
    Ok(())
}

/// Full data export into `dir`. The payments file is skipped when there are none.
pub fn export_all(repo: &dyn PaymentRepository, dir: &Path, date: NaiveDate) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    let participants = repo.fetch_participants(&ParticipantFilter::all())?;
    let payments = repo.fetch_payments(&PaymentFilter::all())?;
    let mut written = Vec::new();

    let path = dir.join(participants_filename(date));
    let file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_participants_export(file, &participants)?;
    written.push(path);

    if !payments.is_empty() {
        let path = dir.join(payments_filename(date));
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        write_payments_export(file, &payments)?;
        written.push(path);
    }

    tracing::info!(
        dir = %dir.display(),
        participants = participants.len(),
        payments = payments.len(),
        "data exported"
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::month::MonthKey;
    use crate::repository::InMemoryRepository;

    fn day(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap()
    }

    fn create_test_payment(
        participant: &Participant,
        month: &str,
        paid_on: &str,
        receipt: &str,
    ) -> PaymentRecord {
        let mut payment = PaymentRecord::new(
            &participant.id,
            MonthKey::parse(month).unwrap(),
            3000.0,
            day(paid_on),
            receipt,
            "Admin",
        );
        payment.participant = Some(participant.clone());
        payment
    }

    fn sample() -> (Participant, Participant, Vec<PaymentRecord>) {
        let ana = Participant::new("P001", "Ana Pérez");
        let beto = Participant::new("P002", "Beto Ruiz");
        let payments = vec![
            create_test_payment(&ana, "2025-01", "2025-01-05", "R-1"),
            create_test_payment(&ana, "2025-02", "2025-01-05", "R-1"),
            create_test_payment(&beto, "2025-02", "2025-02-10", "R-2"),
            create_test_payment(&beto, "2024-12", "2024-12-20", "R-3"),
        ];
        (ana, beto, payments)
    }

    #[test]
    fn test_report_filter() {
        let (ana, _, payments) = sample();

        let by_dates = ReportFilter {
            start_date: Some(day("2025-01-05")),
            end_date: Some(day("2025-02-10")),
            ..Default::default()
        };
        assert_eq!(by_dates.apply(&payments).len(), 3);

        let by_participant = ReportFilter {
            participant_id: Some(ana.id.clone()),
            ..Default::default()
        };
        assert_eq!(by_participant.apply(&payments).len(), 2);

        let by_month = ReportFilter {
            month: Some("2025-02".to_string()),
            ..Default::default()
        };
        assert_eq!(by_month.apply(&payments).len(), 2);

        let by_year = ReportFilter {
            month: Some("2024".to_string()),
            ..Default::default()
        };
        assert_eq!(by_year.apply(&payments).len(), 1);

        let blank = ReportFilter {
            participant_id: Some(String::new()),
            month: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(blank.apply(&payments).len(), 4);
    }

    #[test]
    fn test_report_summary() {
        let (_, _, payments) = sample();
        let summary = ReportSummary::from_payments(&payments);

        assert_eq!(summary.total_amount, 12000.0);
        assert_eq!(summary.unique_participants, 2);
        assert_eq!(summary.payment_count, 4);
        assert_eq!(ReportSummary::from_payments(&[]), ReportSummary::default());
    }

    #[test]
    fn test_receipt_rows() {
        let (_, _, mut payments) = sample();
        payments[1].observations = Some("efectivo".to_string());

        let rows = receipt_rows(&payments);
        let r1 = rows.iter().find(|r| r.receipt_number == "R-1").unwrap();

        assert_eq!(r1.participants, vec!["P001 - Ana Pérez"]);
        assert_eq!(r1.months, "Enero, Febrero 2025");
        assert_eq!(r1.total, "$ 6.000");
        assert_eq!(r1.date, "5 de enero de 2025");
        assert_eq!(r1.observations, "efectivo");

        let r3 = rows.iter().find(|r| r.receipt_number == "R-3").unwrap();
        assert_eq!(r3.observations, "-");
    }

    #[test]
    fn test_payments_report_csv() {
        let (_, _, payments) = sample();
        let mut out = Vec::new();
        write_payments_report(&mut out, &payments[..1]).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "\"Fecha\",\"Participante\",\"Código\",\"Mes\",\"Monto\",\"Recibo\""
        );
        assert_eq!(
            lines[1],
            "\"2025-01-05\",\"Ana Pérez\",\"P001\",\"enero de 2025\",\"3000\",\"R-1\""
        );
    }

    #[test]
    fn test_participants_csv() {
        let mut beto = Participant::new("P002", "Beto, hijo");
        beto.is_active = false;
        let mut out = Vec::new();
        write_participants_export(&mut out, &[beto.clone()]).unwrap();

        let text = String::from_utf8(out).unwrap();
        let expected = format!(
            "\"P002\",\"Beto, hijo\",\"3000\",\"Inactivo\",\"{}\"",
            format_date_short(beto.created_at.date_naive())
        );
        assert_eq!(text.lines().nth(1), Some(expected.as_str()));
    }

    #[test]
    fn test_export_all_writes_files() {
        let (ana, beto, payments) = sample();
        let repo = InMemoryRepository::new(vec![ana.clone(), beto], payments);
        let dir = std::env::temp_dir().join(format!("fees-export-{}", uuid::Uuid::new_v4()));
        let date = day("2025-06-01");

        let written = export_all(&repo, &dir, date).unwrap();

        assert_eq!(written.len(), 2);
        assert!(dir.join("participantes_2025-06-01.csv").exists());
        let payments_csv = std::fs::read_to_string(dir.join("pagos_2025-06-01.csv")).unwrap();
        assert_eq!(payments_csv.lines().count(), 5);
        assert!(payments_csv.contains("\"2024-12\""));

        let empty_dir = dir.join("empty");
        let empty = InMemoryRepository::new(vec![ana], vec![]);
        assert_eq!(export_all(&empty, &empty_dir, date).unwrap().len(), 1);

        std::fs::remove_dir_all(&dir).ok();
        assert_eq!(report_filename(date), "reporte_pagos_2025-06-01.csv");
    }
}
