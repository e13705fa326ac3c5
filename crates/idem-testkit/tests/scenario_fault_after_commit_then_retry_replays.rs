//! Scenario: a fault injected after commit never undoes the commit.
//!
//! Walks the literal sequence:
//!
//! 1. create("test-123", cust1/item1/1)            -> 201, O1
//! 2. create("test-123", cust1/item1/1)            -> 201, O1 (replay)
//! 3. create("test-123", cust1/item1/5)            -> conflict, counts unchanged
//! 4. create("test-fail-1", cust2/item2/1, fault)  -> failure, O2 committed
//! 5. create("test-fail-1", cust2/item2/1)         -> 201, O2 (replay)

use idem_core::{commit, create_order, CommitError, Fingerprint, OrderError, OrderRequest, PostCommitFault};
use idem_testkit::MemStore;

fn req(customer_id: &str, item_id: &str, quantity: i64) -> OrderRequest {
    OrderRequest {
        customer_id: customer_id.to_string(),
        item_id: item_id.to_string(),
        quantity,
    }
}

#[tokio::test]
async fn literal_sequence_create_replay_conflict_fault_retry() -> anyhow::Result<()> {
    let store = MemStore::new();

    let o1 = create_order(&store, "test-123", &req("cust1", "item1", 1), PostCommitFault::None).await?;
    assert_eq!(o1.response_status, 201);

    let o1_again = create_order(&store, "test-123", &req("cust1", "item1", 1), PostCommitFault::None).await?;
    assert_eq!(o1_again.response_status, 201);
    assert_eq!(o1_again.order, o1.order);

    let err = create_order(&store, "test-123", &req("cust1", "item1", 5), PostCommitFault::None)
        .await
        .expect_err("must conflict");
    assert!(matches!(err, OrderError::KeyConflict { .. }));
    assert_eq!(store.order_count(), 1);
    assert_eq!(store.ledger_count(), 1);

    let err = create_order(
        &store,
        "test-fail-1",
        &req("cust2", "item2", 1),
        PostCommitFault::FailAfterCommit,
    )
    .await
    .expect_err("fault must surface");
    let o2 = match err {
        OrderError::SimulatedPostCommitFault { order_id } => order_id,
        other => panic!("expected SimulatedPostCommitFault, got: {other:?}"),
    };
    assert_ne!(o2, o1.order.order_id);
    assert_eq!(store.order_count(), 2, "faulted order must be committed");
    assert_eq!(store.ledger_entries_for(o2).len(), 1);

    let retried = create_order(&store, "test-fail-1", &req("cust2", "item2", 1), PostCommitFault::None).await?;
    assert_eq!(retried.response_status, 201);
    assert_eq!(retried.order.order_id, o2);
    assert!(retried.replayed);

    assert_eq!(store.order_count(), 2);
    assert_eq!(store.ledger_count(), 2);
    assert_eq!(store.ledger_entries_for(o2).len(), 1);

    Ok(())
}

#[tokio::test]
async fn committer_signals_fault_only_after_unit_is_durable() -> anyhow::Result<()> {
    let store = MemStore::new();
    let attrs = req("cust3", "item3", 4).normalize()?;
    let fp = Fingerprint::of(&attrs);

    let err = commit(&store, "k-direct", &fp, &attrs, PostCommitFault::FailAfterCommit)
        .await
        .expect_err("fault must surface");
    let order_id = match err {
        CommitError::FaultAfterCommit { order_id } => order_id,
        other => panic!("expected FaultAfterCommit, got: {other:?}"),
    };

    let rec = store.record("k-direct").expect("record must be durable");
    assert_eq!(rec.result_reference, Some(order_id));
    assert_eq!(rec.payload_fingerprint, fp);

    Ok(())
}

#[tokio::test]
async fn retry_after_fault_with_fault_again_still_replays() -> anyhow::Result<()> {
    let store = MemStore::new();

    let _ = create_order(&store, "k-ff", &req("cust1", "item1", 1), PostCommitFault::FailAfterCommit).await;

    // The directive only applies to a commit; a replay has nothing to fault.
    let replay = create_order(&store, "k-ff", &req("cust1", "item1", 1), PostCommitFault::FailAfterCommit).await?;
    assert!(replay.replayed);
    assert_eq!(store.order_count(), 1);

    Ok(())
}
