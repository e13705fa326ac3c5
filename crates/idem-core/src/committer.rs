//! Atomic order committer.
//!
//! Writes the idempotency record, order and ledger entry as one unit through
//! [`OrderStore::commit_unit`], exactly once per call. The post-commit fault
//! directive is applied only after the store has reported the unit durable,
//! so a fault can never undo or hide a commit: the next resolution of the key
//! finds it.

use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{
    fingerprint::Fingerprint,
    store::{CommitUnitError, OrderStore},
    types::{CommitUnit, NormalizedOrder, Order},
};

/// Fault to inject after a successful commit.
///
/// `FailAfterCommit` models a crash or partition between the store
/// acknowledging the write and the caller receiving the response. A real
/// fault in that window is indistinguishable to the caller and is handled
/// the same way: by a retry that replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostCommitFault {
    #[default]
    None,
    FailAfterCommit,
}

impl PostCommitFault {
    pub fn from_flag(fail_after_commit: bool) -> Self {
        if fail_after_commit {
            PostCommitFault::FailAfterCommit
        } else {
            PostCommitFault::None
        }
    }
}

#[derive(Debug, Error)]
pub enum CommitError {
    /// Another writer committed this key first. Recoverable by re-resolving.
    #[error("concurrent insert for idempotency key '{key}' won the race")]
    ConcurrentInsertLost { key: String },

    /// The unit did not commit; nothing persisted.
    #[error("commit aborted: {0:#}")]
    Aborted(anyhow::Error),

    /// The unit committed and the injected fault fired afterwards.
    #[error("injected fault after commit of order {order_id}")]
    FaultAfterCommit { order_id: Uuid },
}

pub async fn commit(
    store: &dyn OrderStore,
    idempotency_key: &str,
    fingerprint: &Fingerprint,
    attrs: &NormalizedOrder,
    fault: PostCommitFault,
) -> Result<Order, CommitError> {
    let unit = CommitUnit::new(idempotency_key, fingerprint.clone(), attrs);

    let committed = store.commit_unit(&unit).await.map_err(|e| match e {
        CommitUnitError::KeyTaken { key } => CommitError::ConcurrentInsertLost { key },
        CommitUnitError::Aborted(err) => CommitError::Aborted(err),
    })?;

    debug!(
        idempotency_key,
        order_id = %committed.order.order_id,
        ledger_id = committed.ledger_id,
        "commit unit durable"
    );

    if fault == PostCommitFault::FailAfterCommit {
        error!(
            idempotency_key,
            order_id = %committed.order.order_id,
            "post-commit fault injected; order remains committed"
        );
        return Err(CommitError::FaultAfterCommit {
            order_id: committed.order.order_id,
        });
    }

    Ok(committed.order)
}
