//! HTTP router construction.
//!
//! Assembles all Axum routes, middleware, and OpenAPI docs into a single `Router`.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api;
use crate::state::AppState;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origin);

    Router::new()
        .route("/health", get(api::health))
        .route("/api/v1/sensors", get(api::list_sensors))
        .route("/api/v1/sensors/heartbeat", put(api::heartbeat))
        .route("/api/v1/sensors/status", put(api::status_report))
        .route("/api/v1/sensors/{id}", get(api::get_sensor))
        .route("/api/v1/sensors/{id}/check_now", get(api::check_now))
        .route("/api/v1/sensors/{id}/rule_stats", get(api::sensor_rule_stats))
        .route("/api/v1/rules/convert", post(api::convert_event))
        .route("/api/v1/rules/sets", get(api::list_rule_sets))
        .route("/api/v1/rules/sets/{version}/items", get(api::list_rule_items))
        .route("/api/v1/rules/{version}/build", post(api::build_rule_set))
        .route("/api/v1/rules/{version}/deploy", post(api::deploy_rule_set))
        .route("/api/v1/rules/{version}/file", get(api::download_rule_set))
        .layer(cors)
        .with_state(state)
        .merge(Scalar::with_url("/docs", api::doc::ApiDoc::openapi()))
}

/// `*` is permissive; anything else is a single allowed origin.
fn cors_layer(origin: &str) -> CorsLayer {
    if origin.trim() == "*" {
        return CorsLayer::permissive();
    }
    match HeaderValue::from_str(origin.trim()) {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!(origin, error = %e, "invalid CORS origin, falling back to permissive");
            CorsLayer::permissive()
        }
    }
}
