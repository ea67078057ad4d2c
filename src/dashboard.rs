// 📊 Dashboard - current-month collection status and management totals

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::db::{Participant, PaymentRecord};
use crate::month::MonthKey;
use crate::repository::{ParticipantFilter, PaymentFilter, PaymentRepository};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub month: String,

    /// Active participants
    pub total_participants: usize,

    /// Distinct active participants with a row for `month`
    pub paid_this_month: usize,

    pub pending_this_month: usize,

    /// Sum of every payment ever recorded
    pub total_collected: f64,

    /// pending_this_month × monthly fee
    pub total_pending: f64,

    /// Rounded percentage, 0 when there are no participants
    pub payment_rate: u32,
}

impl DashboardStats {
    pub fn compute(
        month: MonthKey,
        active: &[Participant],
        all_payments: &[PaymentRecord],
        monthly_fee: f64,
    ) -> Self {
        let month_text = month.to_string();
        let active_ids: HashSet<&str> = active.iter().map(|p| p.id.as_str()).collect();

        let paid_this_month = all_payments
            .iter()
            .filter(|p| p.month == month_text && active_ids.contains(p.participant_id.as_str()))
            .map(|p| p.participant_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let total_participants = active.len();
        let pending_this_month = total_participants.saturating_sub(paid_this_month);
        let total_collected = all_payments.iter().map(|p| p.amount).sum();

        let payment_rate = if total_participants > 0 {
            ((paid_this_month as f64 / total_participants as f64) * 100.0).round() as u32
        } else {
            0
        };

        DashboardStats {
            month: month_text,
            total_participants,
            paid_this_month,
            pending_this_month,
            total_collected,
            total_pending: pending_this_month as f64 * monthly_fee,
            payment_rate,
        }
    }

    pub fn pending_rate(&self) -> u32 {
        100 - self.payment_rate.min(100)
    }
}

pub fn load_dashboard(
    repo: &dyn PaymentRepository,
    month: MonthKey,
    monthly_fee: f64,
) -> Result<DashboardStats> {
    let active = repo.fetch_participants(&ParticipantFilter::active())?;
    let payments = repo.fetch_payments(&PaymentFilter::all())?;

    let stats = DashboardStats::compute(month, &active, &payments, monthly_fee);
    tracing::debug!(month = %stats.month, paid = stats.paid_this_month, "dashboard computed");
    Ok(stats)
}

// ============================================================================
// MANAGEMENT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagementStats {
    pub total_participants: usize,
    pub active: usize,
    pub inactive: usize,
    pub total_payments: usize,
    pub total_amount: f64,
}

impl ManagementStats {
    pub fn compute(participants: &[Participant], payments: &[PaymentRecord]) -> Self {
        let active = participants.iter().filter(|p| p.is_active).count();
        ManagementStats {
            total_participants: participants.len(),
            active,
            inactive: participants.len() - active,
            total_payments: payments.len(),
            total_amount: payments.iter().map(|p| p.amount).sum(),
        }
    }
}

pub fn load_management(repo: &dyn PaymentRepository) -> Result<ManagementStats> {
    let participants = repo.fetch_participants(&ParticipantFilter::all())?;
    let payments = repo.fetch_payments(&PaymentFilter::all())?;
    Ok(ManagementStats::compute(&participants, &payments))
}
