//! Sensor-facing endpoints and console views of the fleet.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use fleet_rules::SensorRuleStats;

use crate::auth::{header_str, API_KEY_HEADER};
use crate::registry::{
    CheckNowOutcome, HeartbeatAck, HeartbeatRequest, SensorView, StatusOutcome, StatusReport,
};
use crate::state::AppState;

use super::{api_error, ApiError, ErrorResponse};

fn require_sensor(state: &AppState, headers: &HeaderMap, sensor_id: &str) -> Result<(), ApiError> {
    state
        .keys
        .verify_sensor(sensor_id, header_str(headers, API_KEY_HEADER))
        .map_err(api_error)
}

#[utoipa::path(
    put,
    path = "/api/v1/sensors/heartbeat",
    tag = "Sensors",
    request_body(content = Object, description = "Sensor identity, capabilities and metrics"),
    params(("X-API-Key" = String, Header, description = "Per-sensor key")),
    responses(
        (status = 200, description = "Heartbeat recorded", body = HeartbeatAck),
        (status = 401, description = "Bad sensor credentials", body = ErrorResponse)
    )
)]
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatAck>, ApiError> {
    require_sensor(&state, &headers, &req.sensor_id)?;
    state.registry.heartbeat(req).map(Json).map_err(api_error)
}

#[utoipa::path(
    put,
    path = "/api/v1/sensors/status",
    tag = "Sensors",
    request_body = StatusReport,
    params(("X-API-Key" = String, Header, description = "Per-sensor key")),
    responses(
        (status = 200, description = "Status recorded, missing versions returned", body = StatusOutcome),
        (status = 400, description = "Unknown status value", body = ErrorResponse),
        (status = 401, description = "Bad sensor credentials", body = ErrorResponse)
    )
)]
pub async fn status_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<StatusReport>,
) -> Result<Json<StatusOutcome>, ApiError> {
    require_sensor(&state, &headers, &req.sensor_id)?;
    state.registry.status_report(req).map(Json).map_err(api_error)
}

#[utoipa::path(
    get,
    path = "/api/v1/sensors",
    tag = "Sensors",
    responses(
        (status = 200, description = "All sensors with their computed status", body = Vec<Object>)
    )
)]
pub async fn list_sensors(State(state): State<Arc<AppState>>) -> Json<Vec<SensorView>> {
    Json(state.registry.list())
}

#[utoipa::path(
    get,
    path = "/api/v1/sensors/{id}",
    tag = "Sensors",
    params(("id" = String, Path, description = "Sensor id")),
    responses(
        (status = 200, description = "Sensor document", body = Object),
        (status = 404, description = "Unknown sensor", body = ErrorResponse)
    )
)]
pub async fn get_sensor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SensorView>, ApiError> {
    state.registry.get(&id).map(Json).map_err(api_error)
}

#[utoipa::path(
    get,
    path = "/api/v1/sensors/{id}/check_now",
    tag = "Sensors",
    params(("id" = String, Path, description = "Sensor id")),
    responses(
        (status = 200, description = "Status recomputed and timers re-armed", body = CheckNowOutcome),
        (status = 404, description = "Unknown sensor", body = ErrorResponse)
    )
)]
pub async fn check_now(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CheckNowOutcome>, ApiError> {
    state.registry.check_now(&id).map(Json).map_err(api_error)
}

#[utoipa::path(
    get,
    path = "/api/v1/sensors/{id}/rule_stats",
    tag = "Sensors",
    params(("id" = String, Path, description = "Sensor id")),
    responses(
        (status = 200, description = "Installed versions with item counts", body = Object),
        (status = 404, description = "Unknown sensor", body = ErrorResponse)
    )
)]
pub async fn sensor_rule_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SensorRuleStats>, ApiError> {
    state.rules.sensor_rule_stats(&id).map(Json).map_err(api_error)
}
