//! API route definitions

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::middleware::IdentityLayer;
use crate::AppState;

/// Create the application router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks/identity", post(handlers::identity_webhook))
        .route("/v1/generations", post(handlers::create_generation))
        .route("/v1/generations", get(handlers::list_generations))
        .route("/v1/generations/:id", get(handlers::get_generation))
        .route("/v1/images/:id", get(handlers::get_image))
        .route("/v1/me", get(handlers::me))
        .route("/v1/me/usage", get(handlers::me_usage))
        .layer(IdentityLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
