use anyhow::{Context, Result};
use chrono::SecondsFormat;
use clap::{Parser, Subcommand};
use idem_core::OrderError;
use idem_db::{PgStore, PoolSettings};
use tracing::debug;
use uuid::Uuid;

mod output;

#[derive(Parser)]
#[command(name = "idem")]
#[command(about = "Idempotent order service operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Order lookups
    Order {
        #[command(subcommand)]
        cmd: OrderCmd,
    },

    /// Idempotency record lookups
    Key {
        #[command(subcommand)]
        cmd: KeyCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> local...)
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    /// Connectivity, schema presence and row counts.
    Status,

    /// Apply SQL migrations. Safe to re-run.
    Migrate,
}

#[derive(Subcommand)]
enum OrderCmd {
    /// Print an order as JSON. Exits non-zero when it does not exist.
    Show {
        #[arg(long)]
        order_id: String,
    },
}

#[derive(Subcommand)]
enum KeyCmd {
    /// Print the idempotency record stored under a key.
    Show {
        #[arg(long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience).
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = idem_db::connect_from_env(PoolSettings::default()).await?;
            match cmd {
                DbCmd::Status => {
                    let s = idem_db::status(&pool).await?;
                    println!("db_ok={} has_orders_table={}", s.ok, s.has_orders_table);
                    if s.has_orders_table {
                        let c = idem_db::table_counts(&pool).await?;
                        println!(
                            "orders={} ledger_entries={} idempotency_records={}",
                            c.orders, c.ledger_entries, c.idempotency_records
                        );
                    }
                }
                DbCmd::Migrate => {
                    idem_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Order { cmd } => match cmd {
            OrderCmd::Show { order_id } => {
                let order_uuid = Uuid::parse_str(&order_id).context("invalid order_id uuid")?;
                let pool = idem_db::connect_from_env(PoolSettings::default()).await?;
                let store = PgStore::new(pool);

                match idem_core::get_order(&store, order_uuid).await {
                    Ok(order) => println!("{}", output::order_json(&order)?),
                    Err(OrderError::NotFound { order_id }) => {
                        anyhow::bail!("order not found: {order_id}")
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        },

        Commands::Key { cmd } => match cmd {
            KeyCmd::Show { key } => {
                let pool = idem_db::connect_from_env(PoolSettings::default()).await?;
                let row = idem_db::fetch_idempotency_row(&pool, &key)
                    .await?
                    .with_context(|| format!("no idempotency record for key '{key}'"))?;

                println!("idempotency_key={}", row.idempotency_key);
                println!("payload_fingerprint={}", row.payload_fingerprint);
                println!(
                    "result_reference={}",
                    output::opt_uuid(&row.result_reference)
                );
                println!("response_status={}", row.response_status);
                println!(
                    "created_at_utc={}",
                    row.created_at_utc.to_rfc3339_opts(SecondsFormat::Millis, true)
                );
            }
        },

        Commands::ConfigHash { paths } => {
            debug!(layers = paths.len(), "hashing layered config");
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = idem_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }
    }

    Ok(())
}

/// Diagnostics go to stderr so stdout stays parseable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}
