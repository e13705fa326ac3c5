//! Storage contract used by the resolver and committer.
//!
//! # Contract
//!
//! - `find_by_key` is a single read against the unique idempotency-key
//!   column, joined with the referenced order.
//! - `commit_unit` performs, inside exactly one transaction:
//!   1. insert the idempotency record (no `result_reference` yet),
//!   2. insert the order,
//!   3. insert the ledger entry referencing the order,
//!   4. set `result_reference` on the record.
//!
//!   Either all four become visible together or none do. Inserting the
//!   record is the serialization point between concurrent writers of the
//!   same key: the loser must get [`CommitUnitError::KeyTaken`], never a
//!   generic failure.
//! - Implementations hold no connection or lock beyond the scope of a call.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{CommitUnit, CommittedOrder, Order, StoredResult};

#[derive(Debug, Error)]
pub enum CommitUnitError {
    /// Another writer already inserted a record for this key.
    #[error("idempotency key already recorded: {key}")]
    KeyTaken { key: String },

    /// Any other failure. Nothing from the unit persisted.
    #[error("commit unit aborted: {0:#}")]
    Aborted(anyhow::Error),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_key(&self, key: &str) -> anyhow::Result<Option<StoredResult>>;

    async fn commit_unit(&self, unit: &CommitUnit) -> Result<CommittedOrder, CommitUnitError>;

    async fn fetch_order(&self, order_id: Uuid) -> anyhow::Result<Option<Order>>;
}
