//! Data model for orders, ledger entries and idempotency records.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::OrderError, fingerprint::Fingerprint};

/// Status returned for the original creation of an order. Replays return the
/// status stored on the idempotency record, which is always this value today.
pub const CREATED_RESPONSE_STATUS: u16 = 201;

// ---------------------------------------------------------------------------
// Request payload
// ---------------------------------------------------------------------------

/// Order-creation payload as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub customer_id: String,
    pub item_id: String,
    pub quantity: i64,
}

impl OrderRequest {
    /// Reduce the payload to the form used for fingerprinting and storage.
    ///
    /// Identifiers are trimmed and must be non-empty; quantity must be a
    /// positive integer that fits the store's column.
    pub fn normalize(&self) -> Result<NormalizedOrder, OrderError> {
        let customer_id = self.customer_id.trim();
        if customer_id.is_empty() {
            return Err(OrderError::InvalidPayload(
                "customer_id must not be empty".to_string(),
            ));
        }

        let item_id = self.item_id.trim();
        if item_id.is_empty() {
            return Err(OrderError::InvalidPayload(
                "item_id must not be empty".to_string(),
            ));
        }

        if self.quantity < 1 {
            return Err(OrderError::InvalidPayload(format!(
                "quantity must be >= 1, got {}",
                self.quantity
            )));
        }
        let quantity = i32::try_from(self.quantity).map_err(|_| {
            OrderError::InvalidPayload(format!("quantity out of range: {}", self.quantity))
        })?;

        Ok(NormalizedOrder {
            customer_id: customer_id.to_string(),
            item_id: item_id.to_string(),
            quantity,
        })
    }
}

/// Validated, canonical order attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedOrder {
    pub customer_id: String,
    pub item_id: String,
    pub quantity: i32,
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// Lifecycle state of an order. Every order that exists is `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(OrderStatus::Created),
            other => Err(anyhow!("invalid order status: {}", other)),
        }
    }
}

/// An order as stored and as returned to callers (creation, replay, lookup).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub customer_id: String,
    pub item_id: String,
    pub quantity: i32,
    pub status: OrderStatus,
}

/// Accounting side-effect of an order. Exactly one exists per order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub ledger_id: i64,
    pub order_id: Uuid,
    pub customer_id: String,
    pub quantity: i32,
}

// ---------------------------------------------------------------------------
// Idempotency record
// ---------------------------------------------------------------------------

/// One row per idempotency key ever accepted. Never updated once
/// `result_reference` is set and never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub payload_fingerprint: Fingerprint,
    pub result_reference: Option<Uuid>,
    pub response_status: u16,
}

/// Result of a single keyed read: the record plus the order it references.
///
/// `order` is `None` only if the record carries no `result_reference`, which
/// a committed unit never produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResult {
    pub record: IdempotencyRecord,
    pub order: Option<Order>,
}

// ---------------------------------------------------------------------------
// Commit unit
// ---------------------------------------------------------------------------

/// Everything a store needs to write the four-step unit in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitUnit {
    pub idempotency_key: String,
    pub fingerprint: Fingerprint,
    pub order: Order,
    pub response_status: u16,
}

impl CommitUnit {
    /// Build a unit for a first-seen key, generating a fresh `order_id`.
    pub fn new(idempotency_key: &str, fingerprint: Fingerprint, attrs: &NormalizedOrder) -> Self {
        Self {
            idempotency_key: idempotency_key.to_string(),
            fingerprint,
            order: Order {
                order_id: Uuid::new_v4(),
                customer_id: attrs.customer_id.clone(),
                item_id: attrs.item_id.clone(),
                quantity: attrs.quantity,
                status: OrderStatus::Created,
            },
            response_status: CREATED_RESPONSE_STATUS,
        }
    }
}

/// What a store hands back once the unit is durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedOrder {
    pub order: Order,
    pub ledger_id: i64,
}
