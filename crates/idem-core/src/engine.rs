//! Create and lookup entry points.
//!
//! `create_order` runs the per-key state machine:
//!
//! ```text
//! Unseen --(Proceed, commit ok)--> Committed   (terminal)
//! Unseen --(commit aborted)------> Unseen
//! ```
//!
//! When the commit loses the insert race on the idempotency key, the key has
//! just become `Committed` by another writer. The request is re-resolved and
//! answered as if the record had been found up front.

use anyhow::anyhow;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    committer::{commit, CommitError, PostCommitFault},
    error::OrderError,
    fingerprint::Fingerprint,
    resolver::{resolve, Outcome, Replay},
    store::OrderStore,
    types::{Order, OrderRequest, CREATED_RESPONSE_STATUS},
};

/// A successful answer to a create request: either the fresh order or the
/// replay of the one committed earlier for the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    pub order: Order,
    pub response_status: u16,
    pub replayed: bool,
}

impl From<Replay> for CreatedOrder {
    fn from(r: Replay) -> Self {
        Self {
            order: r.order,
            response_status: r.response_status,
            replayed: true,
        }
    }
}

pub async fn create_order(
    store: &dyn OrderStore,
    idempotency_key: &str,
    request: &OrderRequest,
    fault: PostCommitFault,
) -> Result<CreatedOrder, OrderError> {
    if idempotency_key.trim().is_empty() {
        return Err(OrderError::InvalidPayload(
            "idempotency key must not be empty".to_string(),
        ));
    }

    let attrs = request.normalize()?;
    let fingerprint = Fingerprint::of(&attrs);

    match resolve(store, idempotency_key, &fingerprint)
        .await
        .map_err(OrderError::Storage)?
    {
        Outcome::Replay(replay) => {
            info!(
                idempotency_key,
                order_id = %replay.order.order_id,
                outcome = "replay",
                "returning committed result"
            );
            return Ok(replay.into());
        }
        Outcome::Conflict => return Err(conflict(idempotency_key)),
        Outcome::Proceed => {}
    }

    match commit(store, idempotency_key, &fingerprint, &attrs, fault).await {
        Ok(order) => {
            info!(
                idempotency_key,
                order_id = %order.order_id,
                outcome = "created",
                "order committed"
            );
            Ok(CreatedOrder {
                order,
                response_status: CREATED_RESPONSE_STATUS,
                replayed: false,
            })
        }
        Err(CommitError::ConcurrentInsertLost { .. }) => {
            info!(
                idempotency_key,
                "lost insert race on idempotency key; re-resolving"
            );
            reresolve_after_lost_race(store, idempotency_key, &fingerprint).await
        }
        Err(CommitError::Aborted(err)) => {
            let detail = format!("{err:#}");
            error!(
                idempotency_key,
                error = %detail,
                outcome = "aborted",
                "order commit aborted"
            );
            Err(OrderError::TransactionAbort(err))
        }
        Err(CommitError::FaultAfterCommit { order_id }) => {
            Err(OrderError::SimulatedPostCommitFault { order_id })
        }
    }
}

async fn reresolve_after_lost_race(
    store: &dyn OrderStore,
    idempotency_key: &str,
    fingerprint: &Fingerprint,
) -> Result<CreatedOrder, OrderError> {
    match resolve(store, idempotency_key, fingerprint)
        .await
        .map_err(OrderError::Storage)?
    {
        Outcome::Replay(replay) => {
            info!(
                idempotency_key,
                order_id = %replay.order.order_id,
                outcome = "replay",
                "returning result committed by concurrent writer"
            );
            Ok(replay.into())
        }
        Outcome::Conflict => Err(conflict(idempotency_key)),
        // The winner's record must be visible once our insert was rejected.
        Outcome::Proceed => Err(OrderError::TransactionAbort(anyhow!(
            "idempotency key '{idempotency_key}' rejected as taken but no record is visible"
        ))),
    }
}

fn conflict(idempotency_key: &str) -> OrderError {
    warn!(
        idempotency_key,
        outcome = "conflict",
        "idempotency key reused with a different payload"
    );
    OrderError::KeyConflict {
        key: idempotency_key.to_string(),
    }
}

/// Read-only lookup outside the idempotency path.
pub async fn get_order(store: &dyn OrderStore, order_id: Uuid) -> Result<Order, OrderError> {
    store
        .fetch_order(order_id)
        .await
        .map_err(OrderError::Storage)?
        .ok_or(OrderError::NotFound { order_id })
}
