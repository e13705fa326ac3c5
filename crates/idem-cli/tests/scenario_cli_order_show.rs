use predicates::prelude::*;

/// A malformed id is rejected before any database work.
#[allow(deprecated)]
#[test]
fn cli_order_show_rejects_malformed_id() {
    let mut cmd = assert_cmd::Command::cargo_bin("idem").unwrap();
    cmd.env_remove(idem_db::ENV_DB_URL)
        .args(["order", "show", "--order-id", "not-a-uuid"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid order_id uuid"));
}

#[allow(deprecated)]
#[test]
fn cli_db_status_requires_database_url() {
    let mut cmd = assert_cmd::Command::cargo_bin("idem").unwrap();
    cmd.current_dir(std::env::temp_dir())
        .env_remove(idem_db::ENV_DB_URL)
        .args(["db", "status"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains(idem_db::ENV_DB_URL));
}

/// `idem order show` prints the committed order, and fails for an unknown id.
///
/// DB-backed test, skipped if IDEM_DATABASE_URL is not set.
#[allow(deprecated)]
#[tokio::test]
async fn cli_order_show_prints_committed_order() -> anyhow::Result<()> {
    let url = match std::env::var(idem_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: IDEM_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
    {
        Ok(p) => p,
        Err(e) => {
            eprintln!("SKIP: cannot connect to DB: {e}");
            return Ok(());
        }
    };
    idem_db::migrate(&pool).await?;

    let store = idem_db::PgStore::new(pool.clone());
    let key = format!("cli-show-{}", uuid::Uuid::new_v4());
    let created = idem_core::create_order(
        &store,
        &key,
        &idem_core::OrderRequest {
            customer_id: "cust-cli".to_string(),
            item_id: "item-cli".to_string(),
            quantity: 2,
        },
        idem_core::PostCommitFault::None,
    )
    .await?;
    let order_id = created.order.order_id.to_string();

    let mut cmd = assert_cmd::Command::cargo_bin("idem")?;
    cmd.env(idem_db::ENV_DB_URL, &url)
        .args(["order", "show", "--order-id", &order_id]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(&order_id))
        .stdout(predicate::str::contains("cust-cli"));

    let mut cmd = assert_cmd::Command::cargo_bin("idem")?;
    cmd.env(idem_db::ENV_DB_URL, &url)
        .args(["key", "show", "--key", &key]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(format!("result_reference={order_id}")))
        .stdout(predicate::str::contains("response_status=201"));

    let missing = uuid::Uuid::new_v4().to_string();
    let mut cmd = assert_cmd::Command::cargo_bin("idem")?;
    cmd.env(idem_db::ENV_DB_URL, &url)
        .args(["order", "show", "--order-id", &missing]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("order not found"));

    Ok(())
}
