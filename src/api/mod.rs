//! API module
//!
//! HTTP binding of the account commands and queries.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::AccountService;
use crate::projection::ReadModel;

pub use routes::create_router;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Command side and authoritative reads
    pub service: Arc<AccountService>,
    /// Eventually consistent query side
    pub read_model: Arc<dyn ReadModel>,
}

impl AppState {
    pub fn new(service: Arc<AccountService>, read_model: Arc<dyn ReadModel>) -> Self {
        Self {
            service,
            read_model,
        }
    }
}

/// Build the application router with middleware.
/// Layers run outermost-first in reverse order of `.layer` calls:
/// request id -> trace -> logging -> handler
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(create_router())
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
