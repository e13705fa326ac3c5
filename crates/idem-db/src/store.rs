use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use idem_core::{
    CommitUnit, CommitUnitError, CommittedOrder, Fingerprint, IdempotencyRecord, Order,
    OrderStatus, OrderStore, StoredResult,
};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::{is_unique_constraint_violation, IDEMPOTENCY_KEY_CONSTRAINT};

/// [`OrderStore`] backed by a Postgres pool.
///
/// Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<StoredResult>> {
        let row = sqlx::query(
            r#"
            select
              r.payload_fingerprint,
              r.result_reference,
              r.response_status,
              o.order_id,
              o.customer_id,
              o.item_id,
              o.quantity,
              o.status
            from idempotency_records r
            left join orders o on o.order_id = r.result_reference
            where r.idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("find_by_key failed")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let response_status: i32 = row.try_get("response_status")?;
        let record = IdempotencyRecord {
            key: key.to_string(),
            payload_fingerprint: Fingerprint::from_stored(
                row.try_get::<String, _>("payload_fingerprint")?,
            ),
            result_reference: row.try_get("result_reference")?,
            response_status: u16::try_from(response_status)
                .with_context(|| format!("stored response_status out of range: {response_status}"))?,
        };

        let order = match row.try_get::<Option<Uuid>, _>("order_id")? {
            Some(_) => Some(order_from_row(&row)?),
            None => None,
        };

        Ok(Some(StoredResult { record, order }))
    }

    async fn commit_unit(&self, unit: &CommitUnit) -> Result<CommittedOrder, CommitUnitError> {
        // Dropping `tx` on any early return rolls the unit back and returns
        // the connection to the pool.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| aborted(e, "begin commit unit failed"))?;

        // 1. Idempotency record. A concurrent writer of the same key blocks
        //    here until the first one finishes, then gets a unique violation.
        let inserted = sqlx::query(
            r#"
            insert into idempotency_records (
              idempotency_key, payload_fingerprint, response_status
            ) values (
              $1, $2, $3
            )
            "#,
        )
        .bind(&unit.idempotency_key)
        .bind(unit.fingerprint.as_str())
        .bind(i32::from(unit.response_status))
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_unique_constraint_violation(&e, IDEMPOTENCY_KEY_CONSTRAINT) {
                debug!(idempotency_key = %unit.idempotency_key, "idempotency record insert lost race");
                return Err(CommitUnitError::KeyTaken {
                    key: unit.idempotency_key.clone(),
                });
            }
            return Err(aborted(e, "insert idempotency record failed"));
        }

        // 2. Order.
        sqlx::query(
            r#"
            insert into orders (
              order_id, idempotency_key, customer_id, item_id, quantity, status
            ) values (
              $1, $2, $3, $4, $5, $6
            )
            "#,
        )
        .bind(unit.order.order_id)
        .bind(&unit.idempotency_key)
        .bind(&unit.order.customer_id)
        .bind(&unit.order.item_id)
        .bind(unit.order.quantity)
        .bind(unit.order.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| aborted(e, "insert order failed"))?;

        // 3. Ledger entry.
        let (ledger_id,): (i64,) = sqlx::query_as(
            r#"
            insert into ledger_entries (order_id, customer_id, quantity)
            values ($1, $2, $3)
            returning ledger_id
            "#,
        )
        .bind(unit.order.order_id)
        .bind(&unit.order.customer_id)
        .bind(unit.order.quantity)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| aborted(e, "insert ledger entry failed"))?;

        // 4. Attach the result. Set once, never changed.
        let attached = sqlx::query(
            r#"
            update idempotency_records
            set result_reference = $2
            where idempotency_key = $1
              and result_reference is null
            "#,
        )
        .bind(&unit.idempotency_key)
        .bind(unit.order.order_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| aborted(e, "attach result_reference failed"))?;

        if attached.rows_affected() != 1 {
            return Err(CommitUnitError::Aborted(anyhow!(
                "attach result_reference updated {} rows for key '{}'",
                attached.rows_affected(),
                unit.idempotency_key
            )));
        }

        tx.commit()
            .await
            .map_err(|e| aborted(e, "commit unit failed"))?;

        Ok(CommittedOrder {
            order: unit.order.clone(),
            ledger_id,
        })
    }

    async fn fetch_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            select order_id, customer_id, item_id, quantity, status
            from orders
            where order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch_order failed")?;

        row.as_ref().map(order_from_row).transpose()
    }
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    Ok(Order {
        order_id: row.try_get("order_id")?,
        customer_id: row.try_get("customer_id")?,
        item_id: row.try_get("item_id")?,
        quantity: row.try_get("quantity")?,
        status: OrderStatus::parse(&row.try_get::<String, _>("status")?)?,
    })
}

fn aborted(err: sqlx::Error, context: &'static str) -> CommitUnitError {
    CommitUnitError::Aborted(anyhow::Error::new(err).context(context))
}
