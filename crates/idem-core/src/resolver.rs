//! Idempotency ledger resolver.
//!
//! Classifies `(key, fingerprint)` against the committed state:
//!
//! | stored record            | outcome    |
//! |--------------------------|------------|
//! | none                     | `Proceed`  |
//! | fingerprint equal        | `Replay`   |
//! | fingerprint different    | `Conflict` |
//!
//! The resolver only reads. Because the key column is unique at the store,
//! at most one record can match and no tie-break is needed.

use anyhow::{anyhow, Result};

use crate::{fingerprint::Fingerprint, store::OrderStore, types::Order};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Key unseen; the caller must invoke the committer.
    Proceed,
    /// Key committed with an identical payload; return this verbatim.
    Replay(Replay),
    /// Key committed with a different payload; reject without writing.
    Conflict,
}

/// The originally committed result for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replay {
    pub order: Order,
    pub response_status: u16,
}

pub async fn resolve(store: &dyn OrderStore, key: &str, fingerprint: &Fingerprint) -> Result<Outcome> {
    let Some(found) = store.find_by_key(key).await? else {
        return Ok(Outcome::Proceed);
    };

    if found.record.payload_fingerprint != *fingerprint {
        return Ok(Outcome::Conflict);
    }

    // A record is only ever visible together with its order; anything else
    // means the store broke the unit's atomicity.
    let order = found
        .order
        .ok_or_else(|| anyhow!("idempotency record '{key}' has no committed order"))?;

    Ok(Outcome::Replay(Replay {
        order,
        response_status: found.record.response_status,
    }))
}
