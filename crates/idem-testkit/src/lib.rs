//! idem-testkit
//!
//! In-memory [`OrderStore`] for exercising the idempotency engine without a
//! database. Commits are all-or-nothing: the four steps are staged and only
//! applied once every step has passed, so an injected abort at any step
//! leaves the tables untouched.
//!
//! Injection knobs:
//! - [`MemStore::abort_next_commit_at`] fails the next unit at a given step.
//! - [`MemStore::hide_next_lookups`] makes `find_by_key` miss, which lets a
//!   test walk into the insert race deterministically.
//! - [`MemStore::fail_next_lookups`] makes `find_by_key` error.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use idem_core::{
    CommitUnit, CommitUnitError, CommittedOrder, IdempotencyRecord, LedgerEntry, Order,
    OrderStore, StoredResult,
};
use uuid::Uuid;

/// The four steps of a commit unit, plus the final commit itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStep {
    InsertRecord,
    InsertOrder,
    InsertLedger,
    AttachResult,
    Commit,
}

#[derive(Debug, Default)]
struct Tables {
    records: BTreeMap<String, IdempotencyRecord>,
    /// order_id -> (idempotency_key, order)
    orders: BTreeMap<Uuid, (String, Order)>,
    ledger: Vec<LedgerEntry>,
    next_ledger_id: i64,
}

#[derive(Debug, Default)]
struct Faults {
    abort_at: Option<CommitStep>,
    hidden_lookups: usize,
    failing_lookups: usize,
}

#[derive(Debug, Default)]
pub struct MemStore {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    lookups: AtomicUsize,
    commit_attempts: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next commit unit when it reaches `step`.
    pub fn abort_next_commit_at(&self, step: CommitStep) {
        lock(&self.faults).abort_at = Some(step);
    }

    /// The next `n` calls to `find_by_key` report the key as unseen.
    pub fn hide_next_lookups(&self, n: usize) {
        lock(&self.faults).hidden_lookups = n;
    }

    /// The next `n` calls to `find_by_key` return an error.
    pub fn fail_next_lookups(&self, n: usize) {
        lock(&self.faults).failing_lookups = n;
    }

    pub fn order_count(&self) -> usize {
        lock(&self.tables).orders.len()
    }

    pub fn ledger_count(&self) -> usize {
        lock(&self.tables).ledger.len()
    }

    pub fn record_count(&self) -> usize {
        lock(&self.tables).records.len()
    }

    pub fn ledger_entries_for(&self, order_id: Uuid) -> Vec<LedgerEntry> {
        lock(&self.tables)
            .ledger
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect()
    }

    pub fn record(&self, key: &str) -> Option<IdempotencyRecord> {
        lock(&self.tables).records.get(key).cloned()
    }

    /// Number of `find_by_key` calls so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Number of `commit_unit` calls so far, successful or not.
    pub fn commit_attempts(&self) -> usize {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    fn take_abort(&self) -> Option<CommitStep> {
        lock(&self.faults).abort_at.take()
    }

    /// Returns (hide, fail) for this lookup, consuming one of each budget.
    fn take_lookup_faults(&self) -> (bool, bool) {
        let mut f = lock(&self.faults);
        let fail = consume(&mut f.failing_lookups);
        let hide = !fail && consume(&mut f.hidden_lookups);
        (hide, fail)
    }
}

#[async_trait]
impl OrderStore for MemStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<StoredResult>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let (hide, fail) = self.take_lookup_faults();
        if fail {
            return Err(anyhow!("injected lookup failure for key '{key}'"));
        }
        if hide {
            return Ok(None);
        }

        let t = lock(&self.tables);
        let Some(record) = t.records.get(key) else {
            return Ok(None);
        };
        let order = record
            .result_reference
            .and_then(|id| t.orders.get(&id))
            .map(|(_, order)| order.clone());

        Ok(Some(StoredResult {
            record: record.clone(),
            order,
        }))
    }

    async fn commit_unit(&self, unit: &CommitUnit) -> Result<CommittedOrder, CommitUnitError> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);

        let abort_at = self.take_abort();
        let check = |step: CommitStep| -> Result<(), CommitUnitError> {
            if abort_at == Some(step) {
                return Err(CommitUnitError::Aborted(anyhow!(
                    "injected abort at {step:?} for key '{}'",
                    unit.idempotency_key
                )));
            }
            Ok(())
        };

        // Held for the whole unit: this is the transaction boundary.
        let mut t = lock(&self.tables);

        // 1. Idempotency record.
        check(CommitStep::InsertRecord)?;
        if t.records.contains_key(&unit.idempotency_key) {
            return Err(CommitUnitError::KeyTaken {
                key: unit.idempotency_key.clone(),
            });
        }
        let mut record = IdempotencyRecord {
            key: unit.idempotency_key.clone(),
            payload_fingerprint: unit.fingerprint.clone(),
            result_reference: None,
            response_status: unit.response_status,
        };

        // 2. Order.
        check(CommitStep::InsertOrder)?;
        if t.orders.contains_key(&unit.order.order_id)
            || t.orders.values().any(|(k, _)| *k == unit.idempotency_key)
        {
            return Err(CommitUnitError::Aborted(anyhow!(
                "order row for key '{}' violates uniqueness",
                unit.idempotency_key
            )));
        }

        // 3. Ledger entry.
        check(CommitStep::InsertLedger)?;
        let ledger = LedgerEntry {
            ledger_id: t.next_ledger_id + 1,
            order_id: unit.order.order_id,
            customer_id: unit.order.customer_id.clone(),
            quantity: unit.order.quantity,
        };

        // 4. Attach result.
        check(CommitStep::AttachResult)?;
        record.result_reference = Some(unit.order.order_id);

        check(CommitStep::Commit)?;
        t.next_ledger_id = ledger.ledger_id;
        t.records.insert(unit.idempotency_key.clone(), record);
        t.orders.insert(
            unit.order.order_id,
            (unit.idempotency_key.clone(), unit.order.clone()),
        );
        t.ledger.push(ledger.clone());

        Ok(CommittedOrder {
            order: unit.order.clone(),
            ledger_id: ledger.ledger_id,
        })
    }

    async fn fetch_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(lock(&self.tables)
            .orders
            .get(&order_id)
            .map(|(_, order)| order.clone()))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn consume(budget: &mut usize) -> bool {
    if *budget == 0 {
        return false;
    }
    *budget -= 1;
    true
}
