//! Router configuration for the quota server.

use axum::routing::get;
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the router. Every GET path, the root included, lands on the
/// synthetic endpoint.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::synthetic))
        .route("/*path", get(handlers::synthetic))
        .layer(middleware::from_fn(handlers::standard_headers))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
