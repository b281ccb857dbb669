use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use axum::{
    middleware,
    routing::{any, get},
    Router,
};

pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;

use domain::CapabilityTable;

/// Construct/release accounting for the per-request server and transport
/// instances. Lets tests prove that every request tears both down exactly
/// once, with no leak and no double release.
#[derive(Debug, Default)]
pub struct LifecycleStats {
    servers_built: AtomicU64,
    servers_released: AtomicU64,
    transports_built: AtomicU64,
    transports_released: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSnapshot {
    pub servers_built: u64,
    pub servers_released: u64,
    pub transports_built: u64,
    pub transports_released: u64,
}

impl LifecycleStats {
    pub fn record_server_built(&self) {
        self.servers_built.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_server_released(&self) {
        self.servers_released.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_transport_built(&self) {
        self.transports_built.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_transport_released(&self) {
        self.transports_released.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            servers_built: self.servers_built.load(Ordering::SeqCst),
            servers_released: self.servers_released.load(Ordering::SeqCst),
            transports_built: self.transports_built.load(Ordering::SeqCst),
            transports_released: self.transports_released.load(Ordering::SeqCst),
        }
    }
}

/// Immutable process-wide state: the read-only capability table shared by
/// every per-request protocol server, plus lifecycle accounting.
#[derive(Clone)]
pub struct AppState {
    pub capabilities: Arc<CapabilityTable>,
    pub lifecycle: Arc<LifecycleStats>,
}

impl AppState {
    pub fn new(capabilities: Arc<CapabilityTable>) -> Self {
        Self {
            capabilities,
            lifecycle: Arc::new(LifecycleStats::default()),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .route("/mcp", any(http::handlers::mcp_endpoint))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
