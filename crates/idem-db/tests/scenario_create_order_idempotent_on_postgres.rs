//! Scenario: end-to-end create/replay/conflict/fault/race against Postgres.
//!
//! Drives `idem_core::create_order` with a real `PgStore`, so the unique
//! constraint on `idempotency_records` is the only serialization between
//! concurrent writers.
//!
//! DB-backed; skipped when IDEM_DATABASE_URL is not set.

use std::sync::Arc;

use idem_core::{create_order, get_order, OrderError, OrderRequest, OrderStore, PostCommitFault};
use idem_db::PgStore;
use sqlx::PgPool;
use uuid::Uuid;

async fn setup() -> anyhow::Result<Option<PgPool>> {
    let url = match std::env::var(idem_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: IDEM_DATABASE_URL not set");
            return Ok(None);
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await?;
    idem_db::migrate(&pool).await?;
    Ok(Some(pool))
}

fn req(customer_id: &str, item_id: &str, quantity: i64) -> OrderRequest {
    OrderRequest {
        customer_id: customer_id.to_string(),
        item_id: item_id.to_string(),
        quantity,
    }
}

#[tokio::test]
async fn replay_conflict_and_fault_follow_the_committed_state() -> anyhow::Result<()> {
    let Some(pool) = setup().await? else {
        return Ok(());
    };
    let store = PgStore::new(pool.clone());

    // Keys are suffixed so reruns against the same DB do not collide.
    let run = Uuid::new_v4();
    let key = format!("test-123-{run}");

    let first = create_order(&store, &key, &req("cust1", "item1", 1), PostCommitFault::None).await?;
    assert_eq!(first.response_status, 201);
    assert!(!first.replayed);

    let again = create_order(&store, &key, &req("cust1", "item1", 1), PostCommitFault::None).await?;
    assert_eq!(again.order, first.order, "replay must return the identical order");
    assert_eq!(again.response_status, 201);
    assert!(again.replayed);

    let err = create_order(&store, &key, &req("cust1", "item1", 5), PostCommitFault::None)
        .await
        .expect_err("different payload must conflict");
    assert!(matches!(err, OrderError::KeyConflict { .. }), "got: {err:?}");
    assert_eq!(idem_db::count_orders_for_key(&pool, &key).await?, 1);
    assert_eq!(
        idem_db::count_ledger_entries_for_order(&pool, first.order.order_id).await?,
        1
    );

    let fail_key = format!("test-fail-1-{run}");
    let err = create_order(
        &store,
        &fail_key,
        &req("cust2", "item2", 1),
        PostCommitFault::FailAfterCommit,
    )
    .await
    .expect_err("fault directive must surface as failure");
    let order_id = match err {
        OrderError::SimulatedPostCommitFault { order_id } => order_id,
        other => panic!("expected SimulatedPostCommitFault, got: {other:?}"),
    };
    assert_eq!(idem_db::count_orders_for_key(&pool, &fail_key).await?, 1);
    assert_eq!(idem_db::count_ledger_entries_for_order(&pool, order_id).await?, 1);

    let retried = create_order(&store, &fail_key, &req("cust2", "item2", 1), PostCommitFault::None).await?;
    assert_eq!(retried.order.order_id, order_id);
    assert_eq!(retried.response_status, 201);
    assert!(retried.replayed);
    assert_eq!(idem_db::count_orders_for_key(&pool, &fail_key).await?, 1);

    let looked_up = get_order(&store, order_id).await?;
    assert_eq!(looked_up, retried.order);

    Ok(())
}

#[tokio::test]
async fn concurrent_creates_for_one_key_commit_once() -> anyhow::Result<()> {
    let Some(pool) = setup().await? else {
        return Ok(());
    };
    let store: Arc<dyn OrderStore> = Arc::new(PgStore::new(pool.clone()));

    let key = format!("race-{}", Uuid::new_v4());
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        let key = key.clone();
        tasks.spawn(async move {
            create_order(store.as_ref(), &key, &req("cust9", "item9", 2), PostCommitFault::None).await
        });
    }

    let mut order_ids = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let created = joined??;
        assert_eq!(created.response_status, 201);
        order_ids.push(created.order.order_id);
    }

    assert_eq!(order_ids.len(), 8);
    assert!(
        order_ids.iter().all(|id| *id == order_ids[0]),
        "all callers must observe the same order_id: {order_ids:?}"
    );
    assert_eq!(idem_db::count_orders_for_key(&pool, &key).await?, 1);
    assert_eq!(
        idem_db::count_ledger_entries_for_order(&pool, order_ids[0]).await?,
        1
    );

    Ok(())
}

#[tokio::test]
async fn lookup_of_unknown_order_is_not_found() -> anyhow::Result<()> {
    let Some(pool) = setup().await? else {
        return Ok(());
    };
    let store = PgStore::new(pool);

    let missing = Uuid::new_v4();
    let err = get_order(&store, missing).await.expect_err("must be absent");
    assert!(matches!(err, OrderError::NotFound { order_id } if order_id == missing));

    Ok(())
}
