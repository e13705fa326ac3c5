//! idem-db
//!
//! Postgres persistence for orders, ledger entries and idempotency records.
//! [`PgStore`] implements the `idem-core` storage contract; the free
//! functions here cover pool setup, migrations and operator reads.

mod store;

pub use store::PgStore;

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use idem_core::Fingerprint;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "IDEM_DATABASE_URL";

/// Constraint whose violation means another writer already owns the key.
pub const IDEMPOTENCY_KEY_CONSTRAINT: &str = "pk_idempotency_records";

/// Pool sizing. Every handle is acquired per call and released on every exit
/// path, including aborted transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_millis(5_000),
        }
    }
}

/// Connect to Postgres using IDEM_DATABASE_URL.
pub async fn connect_from_env(settings: PoolSettings) -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, settings).await
}

pub async fn connect(url: &str, settings: PoolSettings) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_orders_table: exists,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableCounts {
    pub orders: i64,
    pub ledger_entries: i64,
    pub idempotency_records: i64,
}

pub async fn table_counts(pool: &PgPool) -> Result<TableCounts> {
    let (orders, ledger_entries, idempotency_records): (i64, i64, i64) = sqlx::query_as(
        r#"
        select
          (select count(*) from orders)::bigint,
          (select count(*) from ledger_entries)::bigint,
          (select count(*) from idempotency_records)::bigint
        "#,
    )
    .fetch_one(pool)
    .await
    .context("table_counts failed")?;

    Ok(TableCounts {
        orders,
        ledger_entries,
        idempotency_records,
    })
}

pub async fn count_orders_for_key(pool: &PgPool, idempotency_key: &str) -> Result<i64> {
    let (n,): (i64,) =
        sqlx::query_as("select count(*)::bigint from orders where idempotency_key = $1")
            .bind(idempotency_key)
            .fetch_one(pool)
            .await
            .context("count_orders_for_key failed")?;
    Ok(n)
}

pub async fn count_ledger_entries_for_order(pool: &PgPool, order_id: Uuid) -> Result<i64> {
    let (n,): (i64,) =
        sqlx::query_as("select count(*)::bigint from ledger_entries where order_id = $1")
            .bind(order_id)
            .fetch_one(pool)
            .await
            .context("count_ledger_entries_for_order failed")?;
    Ok(n)
}

/// Idempotency record as persisted, including its insertion time.
#[derive(Debug, Clone)]
pub struct IdempotencyRow {
    pub idempotency_key: String,
    pub payload_fingerprint: Fingerprint,
    pub result_reference: Option<Uuid>,
    pub response_status: i32,
    pub created_at_utc: DateTime<Utc>,
}

pub async fn fetch_idempotency_row(
    pool: &PgPool,
    idempotency_key: &str,
) -> Result<Option<IdempotencyRow>> {
    let row = sqlx::query(
        r#"
        select idempotency_key, payload_fingerprint, result_reference,
               response_status, created_at_utc
        from idempotency_records
        where idempotency_key = $1
        "#,
    )
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await
    .context("fetch_idempotency_row failed")?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(IdempotencyRow {
        idempotency_key: row.try_get("idempotency_key")?,
        payload_fingerprint: Fingerprint::from_stored(
            row.try_get::<String, _>("payload_fingerprint")?,
        ),
        result_reference: row.try_get("result_reference")?,
        response_status: row.try_get("response_status")?,
        created_at_utc: row.try_get("created_at_utc")?,
    }))
}

/// Detect a Postgres unique constraint violation by name.
pub(crate) fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            // Postgres unique_violation is 23505.
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}
