use anyhow::Result;
use idem_core::Order;
use uuid::Uuid;

pub fn order_json(order: &Order) -> Result<String> {
    Ok(serde_json::to_string_pretty(order)?)
}

pub fn opt_uuid(id: &Option<Uuid>) -> String {
    id.map(|u| u.to_string()).unwrap_or_else(|| "NULL".to_string())
}
