//! Route configuration.

use crate::api::handlers;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

/// Creates the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Statistics
        .route("/api/v1/stats", get(handlers::get_catalog_stats))
        // Instruments
        .route("/api/v1/instruments", get(handlers::list_instruments))
        .route("/api/v1/instruments/{ticker}", get(handlers::get_instrument))
        .route(
            "/api/v1/instruments/{ticker}/derivatives",
            get(handlers::list_derivatives),
        )
        // Tickers
        .route("/api/v1/tickers/{ticker}", get(handlers::parse_ticker))
        // Runs
        .route("/api/v1/runs", post(handlers::start_run))
        .route("/api/v1/runs/cancel", post(handlers::cancel_run))
        .with_state(state)
}
