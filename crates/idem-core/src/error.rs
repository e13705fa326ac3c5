use thiserror::Error;
use uuid::Uuid;

/// Errors that cross the core boundary.
///
/// A lost insert race never appears here: it is absorbed by re-resolving the
/// key (see [`crate::engine::create_order`]).
#[derive(Debug, Error)]
pub enum OrderError {
    /// The payload failed normalization. Nothing was read or written.
    #[error("invalid order payload: {0}")]
    InvalidPayload(String),

    /// Same idempotency key, different payload fingerprint. No state change.
    #[error("idempotency key reused with a different payload: {key}")]
    KeyConflict { key: String },

    /// The commit unit failed before completion; no rows persisted and the
    /// key is still unseen. Safe to retry with the same key.
    #[error("order commit aborted: {0:#}")]
    TransactionAbort(anyhow::Error),

    /// A read against the store failed. No state change.
    #[error("order store unavailable: {0:#}")]
    Storage(anyhow::Error),

    /// The unit committed, then the injected post-commit fault fired. The
    /// order stands; a retry with the same key replays it.
    #[error("simulated failure after commit of order {order_id}")]
    SimulatedPostCommitFault { order_id: Uuid },

    #[error("order not found: {order_id}")]
    NotFound { order_id: Uuid },
}
