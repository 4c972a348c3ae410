//! Service layer API for billing workflow operations
//!
//! One named tree per entity family. Mutations that must be atomic with
//! respect to concurrent callers (payment appends, status transitions) run
//! as compare-and-swap loops: read the current record, validate against it,
//! and swap only if it is still the record we validated. A lost swap means
//! another caller committed first, so we re-read and re-validate.
use super::balance;
use super::client::Client;
use super::error::BillingError;
use super::history::{self, HistorySnapshot};
use super::ledger::{PaymentEntry, PaymentLedger};
use super::work::{TimeStamp, WorkItem, WorkStatus};
use chrono::Utc;
use sled::Batch;
use std::sync::Arc;

pub struct BillingService {
    instance: Arc<sled::Db>,
    clients: sled::Tree,
    works: sled::Tree,
    payments: sled::Tree,
    history: sled::Tree,
}

impl BillingService {
    /// Open the service over a sled instance. This is the one explicit
    /// bootstrap step: all trees are opened up front and the schema marker
    /// is stamped once, so no request path ever does lazy initialisation.
    pub fn open(instance: Arc<sled::Db>) -> anyhow::Result<Self> {
        let clients = instance.open_tree("clients")?;
        let works = instance.open_tree("works")?;
        let payments = instance.open_tree("payments")?;
        let history = instance.open_tree("history")?;

        // idempotent: the swap only writes on first boot
        let _ = instance.compare_and_swap(
            b"schema_version",
            None as Option<&[u8]>,
            Some(&b"1"[..]),
        )?;

        Ok(Self {
            instance,
            clients,
            works,
            payments,
            history,
        })
    }

    // CLIENTS

    pub fn add_client(&self, name: &str, pan: &str) -> anyhow::Result<Client> {
        let client = Client::new(name, pan)?;
        self.clients
            .insert(client.id.as_bytes(), minicbor::to_vec(&client)?)?;
        Ok(client)
    }

    pub fn get_client(&self, client_id: &str) -> anyhow::Result<Client> {
        let raw = self
            .clients
            .get(client_id.as_bytes())?
            .ok_or_else(|| BillingError::NotFound(client_id.to_string()))?;
        Ok(minicbor::decode(&raw)?)
    }

    pub fn list_clients(&self) -> anyhow::Result<Vec<Client>> {
        let mut out = vec![];
        for item in self.clients.iter() {
            let (_, raw) = item?;
            out.push(minicbor::decode(&raw)?);
        }
        Ok(out)
    }

    // WORK ITEMS

    /// Create a new work item in Pending for an existing client.
    pub fn add_work(&self, client_id: &str, purpose: &str, fees: u64) -> anyhow::Result<WorkItem> {
        // reject dangling ownership up front
        self.get_client(client_id)?;

        let work = WorkItem::new(client_id, purpose, fees)?;
        self.works
            .insert(work.id.as_bytes(), minicbor::to_vec(&work)?)?;
        Ok(work)
    }

    pub fn get_work(&self, work_id: &str) -> anyhow::Result<WorkItem> {
        let raw = self
            .works
            .get(work_id.as_bytes())?
            .ok_or_else(|| BillingError::NotFound(work_id.to_string()))?;
        Ok(minicbor::decode(&raw)?)
    }

    pub fn list_works(&self, client_id: &str) -> anyhow::Result<Vec<WorkItem>> {
        let mut out = vec![];
        for item in self.works.iter() {
            let (_, raw) = item?;
            let work: WorkItem = minicbor::decode(&raw)?;
            if work.client_id == client_id {
                out.push(work);
            }
        }
        Ok(out)
    }

    // PAYMENT LEDGER

    /// Validate and append one payment. The whole "read total, check
    /// remaining, append" sequence is committed with a single swap of the
    /// ledger document, so concurrent payments on the same work serialise
    /// and can never jointly exceed the fees.
    pub fn add_payment(
        &self,
        work_id: &str,
        amount: u64,
        payment_date: TimeStamp<Utc>,
    ) -> anyhow::Result<PaymentEntry> {
        if amount == 0 {
            return Err(BillingError::InvalidAmount.into());
        }

        // minted once so retries of the swap re-commit the same entry
        let entry = PaymentEntry::new(work_id, amount, payment_date)?;

        loop {
            let work = self.get_work(work_id)?;
            let current = self.payments.get(work_id.as_bytes())?;
            let mut ledger = match &current {
                Some(raw) => minicbor::decode(raw.as_ref())?,
                None => PaymentLedger::new(work_id),
            };

            ledger.try_append(entry.clone(), work.fees)?;
            let encoded = minicbor::to_vec(&ledger)?;

            match self
                .payments
                .compare_and_swap(work_id.as_bytes(), current.as_ref(), Some(encoded))?
            {
                Ok(()) => {
                    // a cascade delete may have raced the creation of a
                    // fresh ledger document; do not leave an orphan behind
                    if current.is_none() && !self.works.contains_key(work_id.as_bytes())? {
                        self.payments.remove(work_id.as_bytes())?;
                        return Err(BillingError::NotFound(work_id.to_string()).into());
                    }
                    return Ok(entry);
                }
                Err(_) => continue,
            }
        }
    }

    /// Sum of all payments collected against the work. Zero when none exist.
    pub fn total_paid(&self, work_id: &str) -> anyhow::Result<u64> {
        self.get_work(work_id)?;
        Ok(self.load_ledger(work_id)?.total_paid())
    }

    /// Payments for display, most recent first.
    pub fn list_payments(&self, work_id: &str) -> anyhow::Result<Vec<PaymentEntry>> {
        self.get_work(work_id)?;
        Ok(self.load_ledger(work_id)?.newest_first())
    }

    /// Outstanding balance, recomputed from the ledger.
    pub fn remaining_amount(&self, work_id: &str) -> anyhow::Result<u64> {
        let work = self.get_work(work_id)?;
        let paid = self.load_ledger(work_id)?.total_paid();
        Ok(balance::remaining(work.fees, paid))
    }

    // LIFECYCLE

    /// Pending -> Completed. Does not touch the ledger or history.
    pub fn mark_completed(&self, work_id: &str) -> anyhow::Result<WorkItem> {
        loop {
            let raw = self
                .works
                .get(work_id.as_bytes())?
                .ok_or_else(|| BillingError::NotFound(work_id.to_string()))?;
            let mut work: WorkItem = minicbor::decode(raw.as_ref())?;
            work.advance_to(WorkStatus::Completed)?;

            let encoded = minicbor::to_vec(&work)?;
            match self
                .works
                .compare_and_swap(work_id.as_bytes(), Some(&raw), Some(encoded))?
            {
                Ok(()) => return Ok(work),
                Err(_) => continue,
            }
        }
    }

    /// Completed -> FinalCompleted, permitted only with a zero balance.
    ///
    /// The balance is recomputed inside the loop, against the ledger as it
    /// stands at commit time; a payment landing after an earlier
    /// `can_finalize` probe is honoured either way. The status swap is the
    /// optimistic guard: of N concurrent calls exactly one commits the
    /// transition, the rest re-read and fail with `AlreadyFinal`. The
    /// snapshot write that follows is idempotent, so the winner racing a
    /// stale retry can never produce a second snapshot.
    pub fn finalize(&self, work_id: &str) -> anyhow::Result<WorkItem> {
        loop {
            let raw = self
                .works
                .get(work_id.as_bytes())?
                .ok_or_else(|| BillingError::NotFound(work_id.to_string()))?;
            let mut work: WorkItem = minicbor::decode(raw.as_ref())?;

            match work.status {
                WorkStatus::FinalCompleted => return Err(BillingError::AlreadyFinal.into()),
                WorkStatus::Pending => {
                    return Err(BillingError::InvalidTransition {
                        from: WorkStatus::Pending,
                        to: WorkStatus::FinalCompleted,
                    }
                    .into());
                }
                WorkStatus::Completed => {}
            }

            // commit-time balance check, never a cached flag
            let ledger = self.load_ledger(work_id)?;
            let paid = ledger.total_paid();
            if !balance::is_settled(work.fees, paid) {
                return Err(BillingError::PaymentPending {
                    remaining: balance::remaining(work.fees, paid),
                    fees: work.fees,
                    paid,
                }
                .into());
            }

            let client = self.get_client(&work.client_id)?;
            work.advance_to(WorkStatus::FinalCompleted)?;

            let encoded = minicbor::to_vec(&work)?;
            match self
                .works
                .compare_and_swap(work_id.as_bytes(), Some(&raw), Some(encoded))?
            {
                Ok(()) => {
                    history::record_completion(&self.history, &work, &client, &ledger)?;
                    return Ok(work);
                }
                Err(_) => continue,
            }
        }
    }

    /// Whether a finalise call would currently succeed. Same recomputation
    /// as `finalize`; only a hint, the real check happens again at commit.
    pub fn can_finalize(&self, work_id: &str) -> anyhow::Result<bool> {
        let work = self.get_work(work_id)?;
        if work.status != WorkStatus::Completed {
            return Ok(false);
        }
        let paid = self.load_ledger(work_id)?.total_paid();
        Ok(balance::is_settled(work.fees, paid))
    }

    // DELETION GUARD

    /// Remove a finally completed work and its ledger. History snapshots
    /// referencing the work are left untouched.
    pub fn delete_work(&self, work_id: &str) -> anyhow::Result<()> {
        let work = self.get_work(work_id)?;
        if work.status != WorkStatus::FinalCompleted {
            return Err(BillingError::WorkNotDeletable {
                status: work.status,
            }
            .into());
        }

        self.works.remove(work_id.as_bytes())?;
        self.payments.remove(work_id.as_bytes())?;
        Ok(())
    }

    /// Remove a client and cascade to all of its works and their ledgers,
    /// regardless of status. This is the only path that removes a work
    /// before final completion. History snapshots are never touched.
    pub fn delete_client(&self, client_id: &str) -> anyhow::Result<()> {
        self.get_client(client_id)?;

        let mut works_batch = Batch::default();
        let mut payments_batch = Batch::default();
        for item in self.works.iter() {
            let (key, raw) = item?;
            let work: WorkItem = minicbor::decode(raw.as_ref())?;
            if work.client_id == client_id {
                works_batch.remove(key.clone());
                payments_batch.remove(key);
            }
        }
        self.works.apply_batch(works_batch)?;
        self.payments.apply_batch(payments_batch)?;
        self.clients.remove(client_id.as_bytes())?;
        Ok(())
    }

    // HISTORY

    pub fn snapshot_for_work(&self, work_id: &str) -> anyhow::Result<Option<HistorySnapshot>> {
        history::snapshot_for_work(&self.history, work_id)
    }

    pub fn exists_snapshot_for_work(&self, work_id: &str) -> anyhow::Result<bool> {
        history::exists_snapshot_for_work(&self.history, work_id)
    }

    pub fn list_history(&self) -> anyhow::Result<Vec<HistorySnapshot>> {
        let mut out = vec![];
        for item in self.history.iter() {
            let (_, raw) = item?;
            out.push(minicbor::decode(&raw)?);
        }
        Ok(out)
    }

    /// Administrative removal of one snapshot. No effect on any work or
    /// client, live or deleted.
    pub fn delete_history_snapshot(&self, snapshot_id: &str) -> anyhow::Result<()> {
        history::delete_snapshot(&self.history, snapshot_id)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> anyhow::Result<()> {
        self.instance.flush()?;
        Ok(())
    }

    fn load_ledger(&self, work_id: &str) -> anyhow::Result<PaymentLedger> {
        match self.payments.get(work_id.as_bytes())? {
            Some(raw) => Ok(minicbor::decode(raw.as_ref())?),
            None => Ok(PaymentLedger::new(work_id)),
        }
    }
}
