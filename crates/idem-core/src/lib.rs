//! idem-core
//!
//! Idempotency and commit-atomicity engine for order creation.
//!
//! - [`resolver`] classifies a request against previously committed ones:
//!   replay, conflict, or proceed.
//! - [`committer`] writes the idempotency record, order and ledger entry as
//!   one unit through an [`OrderStore`], then applies the post-commit fault
//!   directive.
//! - [`engine`] wires the two together, including the fallback from a lost
//!   insert race to re-resolution.
//!
//! This crate performs no I/O itself. Storage is reached only through the
//! [`OrderStore`] trait; `idem-db` provides the Postgres implementation and
//! `idem-testkit` an in-memory one.

pub mod committer;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod resolver;
pub mod store;
pub mod types;

pub use committer::{commit, CommitError, PostCommitFault};
pub use engine::{create_order, get_order, CreatedOrder};
pub use error::OrderError;
pub use fingerprint::Fingerprint;
pub use resolver::{resolve, Outcome, Replay};
pub use store::{CommitUnitError, OrderStore};
pub use types::{
    CommitUnit, CommittedOrder, IdempotencyRecord, LedgerEntry, NormalizedOrder, Order,
    OrderRequest, OrderStatus, StoredResult, CREATED_RESPONSE_STATUS,
};
