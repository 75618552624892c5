//! Per-client admission control for HTTP services: a concurrency ceiling
//! with cooldown blocks plus a token-bucket rate limiter, applied as axum
//! middleware before any handler runs.

pub mod admission;
pub mod audit;
pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod state;
pub mod sweeper;
pub mod token_bucket;

use axum::{Router, middleware, routing::get};

use crate::admission::admission_middleware;
use crate::handlers::{admission_stats_handler, health_handler, metrics_handler};
use crate::state::AppState;

/// Service routes with the admission layer wrapped around all of them.
pub fn router(state: AppState) -> Router {
    let admission = state.admission.clone();
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/admin/admission", get(admission_stats_handler))
        .with_state(state)
        .layer(middleware::from_fn_with_state(admission, admission_middleware))
}
