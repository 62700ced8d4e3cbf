//! HTTP endpoint modules.
//!
//! Each sub-module owns one area; shared response types and the error
//! mapping live here.

pub mod doc;
pub(crate) mod health;
pub(crate) mod rules;
pub(crate) mod sensors;

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use fleet_core::FleetError;

use crate::auth::{header_str, ADMIN_KEY_HEADER};
use crate::state::AppState;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map the console error taxonomy onto HTTP.
pub(crate) fn api_error(err: FleetError) -> ApiError {
    let status = match &err {
        FleetError::Unauthorized => StatusCode::UNAUTHORIZED,
        FleetError::NotFound { .. } => StatusCode::NOT_FOUND,
        FleetError::PreconditionFailed(_) => StatusCode::BAD_REQUEST,
        FleetError::Storage(_) => {
            error!(error = %err, "request failed in storage");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

pub(crate) fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    state
        .keys
        .verify_admin(header_str(headers, ADMIN_KEY_HEADER))
        .map_err(api_error)
}

// ── Re-exports ───────────────────────────────────────────────────

pub use health::health;
pub use rules::{
    build_rule_set, convert_event, deploy_rule_set, download_rule_set, list_rule_items,
    list_rule_sets,
};
pub use sensors::{
    check_now, get_sensor, heartbeat, list_sensors, sensor_rule_stats, status_report,
};
