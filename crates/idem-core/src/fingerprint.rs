//! Payload fingerprinting.
//!
//! A fingerprint is the lowercase hex SHA-256 of the canonical JSON encoding
//! of a [`NormalizedOrder`]: sorted keys, no insignificant whitespace.
//! Equality of fingerprints is the only criterion used to decide whether two
//! requests under the same idempotency key are the same request.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::types::NormalizedOrder;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(order: &NormalizedOrder) -> Self {
        Self(sha256_hex(canonical_json(order).as_bytes()))
    }

    /// Wrap a fingerprint previously computed and persisted by [`Fingerprint::of`].
    pub fn from_stored(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_json(order: &NormalizedOrder) -> String {
    // Keys listed in sorted order; serde_json's default map is ordered as well.
    json!({
        "customer_id": order.customer_id,
        "item_id": order.item_id,
        "quantity": order.quantity,
    })
    .to_string()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
