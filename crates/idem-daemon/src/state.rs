//! Shared runtime state for idem-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The store is the only
//! path to persistence; with Postgres it wraps a pool, so each request
//! acquires and releases its own connection.

use std::sync::Arc;

use idem_core::OrderStore;

/// Static build metadata included in health responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    pub store: Arc<dyn OrderStore>,
    /// When false the post-commit fault header is ignored.
    pub fault_injection: bool,
}

impl AppState {
    /// Fault injection starts disabled.
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self {
            build: BuildInfo {
                service: "idem-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            store,
            fault_injection: false,
        }
    }

    pub fn with_fault_injection(mut self, enabled: bool) -> Self {
        self.fault_injection = enabled;
        self
    }
}
