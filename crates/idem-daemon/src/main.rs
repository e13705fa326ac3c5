//! idem-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config,
//! connects and migrates the database, builds the shared state, and starts
//! the HTTP server. All route handlers live in `routes.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use idem_config::UnusedKeyPolicy;
use idem_core::OrderStore;
use idem_daemon::{routes, state};
use idem_db::{PgStore, PoolSettings};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = idem_config::config_paths_from_env();
    let (loaded, cfg) = idem_config::load_service_config(&paths)?;
    let cfg = cfg.with_env_overrides()?;

    let unused = idem_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !unused.is_clean() {
        warn!(keys = ?unused.unused_leaf_pointers, "config contains keys this service does not read");
    }
    info!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");

    let pool = idem_db::connect_from_env(PoolSettings {
        max_connections: cfg.db_max_connections,
        acquire_timeout: Duration::from_millis(cfg.db_acquire_timeout_ms),
    })
    .await?;
    idem_db::migrate(&pool).await?;

    if cfg.fault_injection {
        warn!("post-commit fault injection is ENABLED; X-Debug-Fail-After-Commit will be honored");
    }

    let store: Arc<dyn OrderStore> = Arc::new(PgStore::new(pool.clone()));
    let shared = Arc::new(state::AppState::new(store).with_fault_injection(cfg.fault_injection));

    let app = routes::build_router(shared).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let addr: SocketAddr = cfg.bind_addr;
    info!("idem-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    pool.close().await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
