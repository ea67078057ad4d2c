// 🧾 Receipt Grouper - collapse payment rows into logical transactions
//
// One registration writes one row per (participant × month). Views show them
// back as one group per receipt number, or one group per participant.

use crate::db::PaymentRecord;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ============================================================================
// GROUP KEY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupKey {
    /// One group per participant identity
    Participant,

    /// One group per receipt number
    ReceiptNumber,
}

impl GroupKey {
    pub fn key_for(&self, payment: &PaymentRecord) -> String {
        match self {
            GroupKey::Participant => payment.participant_id.clone(),
            GroupKey::ReceiptNumber => payment.receipt_number.clone(),
        }
    }
}

// ============================================================================
// GROUPED PAYMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedPayment {
    pub key: String,

    /// Member rows in input order
    pub payments: Vec<PaymentRecord>,

    pub total_amount: f64,

    /// Payment date of the most recently created member
    pub payment_date: NaiveDate,

    /// First non-empty observations among members, else ""
    pub observations: String,

    /// Creation time of the most recently created member
    pub latest_created_at: DateTime<Utc>,
}

impl GroupedPayment {
    fn start(key: String, first: &PaymentRecord) -> Self {
        GroupedPayment {
            key,
            payments: Vec::new(),
            total_amount: 0.0,
            payment_date: first.payment_date,
            observations: String::new(),
            latest_created_at: first.created_at,
        }
    }

    fn push(&mut self, payment: &PaymentRecord) {
        self.total_amount += payment.amount;

        // >= keeps the later row on equal timestamps
        if payment.created_at >= self.latest_created_at {
            self.latest_created_at = payment.created_at;
            self.payment_date = payment.payment_date;
        }

        if self.observations.is_empty() {
            let text = payment.observations_text().trim();
            if !text.is_empty() {
                self.observations = text.to_string();
            }
        }

        self.payments.push(payment.clone());
    }

    pub fn len(&self) -> usize {
        self.payments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payments.is_empty()
    }

    /// Distinct participant ids, sorted
    pub fn participant_ids(&self) -> Vec<String> {
        self.payments
            .iter()
            .map(|p| p.participant_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct receipt numbers, sorted
    pub fn receipt_numbers(&self) -> Vec<String> {
        self.payments
            .iter()
            .map(|p| p.receipt_number.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

// ============================================================================
// GROUPING
// ============================================================================

/// Partition `payments` by `key_fn`.
///
/// Every row lands in exactly one group. Groups come back newest first
/// (by their most recently created member), ties ordered by key.
pub fn group_by_key<F>(payments: &[PaymentRecord], key_fn: F) -> Vec<GroupedPayment>
where
    F: Fn(&PaymentRecord) -> String,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<GroupedPayment> = Vec::new();

    for payment in payments {
        let key = key_fn(payment);
        let slot = match index.get(&key) {
            Some(slot) => *slot,
            None => {
                groups.push(GroupedPayment::start(key.clone(), payment));
                index.insert(key, groups.len() - 1);
                groups.len() - 1
            }
        };
        groups[slot].push(payment);
    }

    groups.sort_by(|a, b| {
        b.latest_created_at
            .cmp(&a.latest_created_at)
            .then_with(|| a.key.cmp(&b.key))
    });

    groups
}

pub fn group_payments(payments: &[PaymentRecord], key: GroupKey) -> Vec<GroupedPayment> {
    group_by_key(payments, |p| key.key_for(p))
}

pub fn group_by_receipt(payments: &[PaymentRecord]) -> Vec<GroupedPayment> {
    group_payments(payments, GroupKey::ReceiptNumber)
}

pub fn group_by_participant(payments: &[PaymentRecord]) -> Vec<GroupedPayment> {
    group_payments(payments, GroupKey::Participant)
}

// ============================================================================
// TESTS
// ============================================================================
