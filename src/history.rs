//! History snapshot writer
//!
//! When a work reaches FinalCompleted a denormalized copy of its final state
//! is written to the `history` tree. The tree is keyed by the original work
//! id, so the storage layer itself enforces at-most-one snapshot per work;
//! insertion goes through `compare_and_swap` against an absent key and a
//! lost race surfaces as [`BillingError::DuplicateSnapshot`]. Snapshots have
//! no cascade relationship to works or clients and survive deletion of both.
use super::client::Client;
use super::error::BillingError;
use super::ledger::PaymentLedger;
use super::utils;
use super::work::{TimeStamp, WorkItem};
use chrono::Utc;

/// Amount/date pair copied out of the ledger at snapshot time.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PaymentDetail {
    #[n(0)]
    pub amount: u64,
    #[n(1)]
    pub payment_date: TimeStamp<Utc>,
}

/// Immutable record of a fully paid, finally completed work. Every field is
/// an independent copy; nothing here follows the live client or work.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct HistorySnapshot {
    #[n(0)]
    pub id: String, // uuid7, bech32 "hist_" prefix
    #[n(1)]
    pub original_work_id: String,
    #[n(2)]
    pub original_client_id: String, // informational only, no FK semantics
    #[n(3)]
    pub client_name: String,
    #[n(4)]
    pub client_pan: String,
    #[n(5)]
    pub work_purpose: String,
    #[n(6)]
    pub fees: u64,
    #[n(7)]
    pub total_paid: u64,
    #[n(8)]
    pub payment_details: Vec<PaymentDetail>,
    #[n(9)]
    pub completion_date: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub payment_received_date: TimeStamp<Utc>, // moment of finalisation
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
}

impl HistorySnapshot {
    /// Copy the work's final state. `payment_received_date` is stamped now,
    /// the moment of finalisation.
    pub fn capture(work: &WorkItem, client: &Client, ledger: &PaymentLedger) -> anyhow::Result<Self> {
        let payment_details = ledger
            .entries()
            .iter()
            .map(|e| PaymentDetail {
                amount: e.amount,
                payment_date: e.payment_date.clone(),
            })
            .collect();

        Ok(Self {
            id: utils::new_uuid_to_bech32("hist_")?,
            original_work_id: work.id.clone(),
            original_client_id: client.id.clone(),
            client_name: client.name.clone(),
            client_pan: client.pan.clone(),
            work_purpose: work.purpose.clone(),
            fees: work.fees,
            total_paid: ledger.total_paid(),
            payment_details,
            completion_date: work.completion_date.clone(),
            payment_received_date: TimeStamp::new(),
            created_at: TimeStamp::new(),
        })
    }
}

/// Insert a snapshot, failing with `DuplicateSnapshot` if one already exists
/// for the same work. The compare-and-swap against an absent key is the
/// actual uniqueness guarantee; callers racing each other land here, not in
/// a silent overwrite.
pub fn insert_snapshot(tree: &sled::Tree, snapshot: &HistorySnapshot) -> anyhow::Result<()> {
    let encoded = minicbor::to_vec(snapshot)?;
    tree.compare_and_swap(
        snapshot.original_work_id.as_bytes(),
        None as Option<&[u8]>,
        Some(encoded),
    )?
    .map_err(|_| BillingError::DuplicateSnapshot)?;
    Ok(())
}

/// Record the completion of a finalised work. Idempotent: if a snapshot for
/// the work already exists (a legitimate repeat call, or a concurrent
/// finalise that won the race) this is a no-op success. The existence probe
/// is only a fast path; `insert_snapshot` carries the real guarantee.
pub fn record_completion(
    tree: &sled::Tree,
    work: &WorkItem,
    client: &Client,
    ledger: &PaymentLedger,
) -> anyhow::Result<()> {
    if tree.contains_key(work.id.as_bytes())? {
        return Ok(());
    }

    let snapshot = HistorySnapshot::capture(work, client, ledger)?;
    match insert_snapshot(tree, &snapshot) {
        Ok(()) => Ok(()),
        Err(err) => match err.downcast_ref::<BillingError>() {
            // another finalise got there first; their snapshot stands
            Some(BillingError::DuplicateSnapshot) => Ok(()),
            _ => Err(err),
        },
    }
}

/// Fetch the snapshot for a work, if one was ever recorded.
pub fn snapshot_for_work(tree: &sled::Tree, work_id: &str) -> anyhow::Result<Option<HistorySnapshot>> {
    match tree.get(work_id.as_bytes())? {
        Some(raw) => Ok(Some(minicbor::decode(&raw)?)),
        None => Ok(None),
    }
}

pub fn exists_snapshot_for_work(tree: &sled::Tree, work_id: &str) -> anyhow::Result<bool> {
    Ok(tree.contains_key(work_id.as_bytes())?)
}

/// Administrative removal by snapshot id. Touches nothing but the history
/// tree; live or deleted works and clients are unaffected.
pub fn delete_snapshot(tree: &sled::Tree, snapshot_id: &str) -> anyhow::Result<()> {
    for item in tree.iter() {
        let (key, raw) = item?;
        let snapshot: HistorySnapshot = minicbor::decode(&raw)?;
        if snapshot.id == snapshot_id {
            tree.remove(key)?;
            return Ok(());
        }
    }

    Err(BillingError::NotFound(snapshot_id.to_string()).into())
}
