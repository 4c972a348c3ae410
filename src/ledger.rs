//! Append-only payment ledger for a single work item
//!
//! The full ledger for one work is persisted as one CBOR document keyed by
//! the work id. Keeping it single-key is what lets the service run the
//! "read total, check remaining, append" sequence as one compare-and-swap,
//! so two concurrent payments can never jointly overpay.
use super::balance;
use super::error::BillingError;
use super::utils;
use super::work::TimeStamp;
use chrono::Utc;

/// One collected payment. Strictly positive amount in paise; never mutated
/// or individually deleted once appended.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PaymentEntry {
    #[n(0)]
    pub id: String, // uuid7, bech32 "pay_" prefix
    #[n(1)]
    pub work_id: String,
    #[n(2)]
    pub amount: u64,
    #[n(3)]
    pub payment_date: TimeStamp<Utc>,
    #[n(4)]
    pub created_at: TimeStamp<Utc>,
}

impl PaymentEntry {
    pub fn new(work_id: &str, amount: u64, payment_date: TimeStamp<Utc>) -> anyhow::Result<Self> {
        Ok(Self {
            id: utils::new_uuid_to_bech32("pay_")?,
            work_id: work_id.to_string(),
            amount,
            payment_date,
            created_at: TimeStamp::new(),
        })
    }
}

/// The ordered, append-only set of payments against one work.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PaymentLedger {
    #[n(0)]
    pub work_id: String,
    #[n(1)]
    entries: Vec<PaymentEntry>,
}

impl PaymentLedger {
    pub fn new(work_id: &str) -> Self {
        Self {
            work_id: work_id.to_string(),
            entries: vec![],
        }
    }

    /// Sum of all collected amounts. Zero for an empty ledger. Callers must
    /// not depend on entry order for totals.
    pub fn total_paid(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.amount))
    }

    /// Entries in insertion order (oldest first).
    pub fn entries(&self) -> &[PaymentEntry] {
        &self.entries
    }

    /// Display ordering: most recent payment first.
    pub fn newest_first(&self) -> Vec<PaymentEntry> {
        self.entries.iter().rev().cloned().collect()
    }

    /// Validate and append one payment against the given fees. On any
    /// rejection the ledger is left untouched.
    pub fn try_append(&mut self, entry: PaymentEntry, fees: u64) -> Result<(), BillingError> {
        if entry.amount == 0 {
            return Err(BillingError::InvalidAmount);
        }

        // Fresh recomputation, never a cached flag.
        let remaining = balance::remaining(fees, self.total_paid());
        if entry.amount > remaining {
            return Err(BillingError::OverpaymentRejected {
                attempted: entry.amount,
                remaining,
            });
        }

        self.entries.push(entry);
        Ok(())
    }
}
