use axum::Router;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;

use super::handlers::{explain_handler, health_handler, ingest_handler, status_handler};
use super::server::AppState;

pub(crate) fn build_router(state: AppState, max_body_size: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ingest", post(ingest_handler))
        .route("/status", get(status_handler))
        .route("/explain", post(explain_handler))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .with_state(state)
}
