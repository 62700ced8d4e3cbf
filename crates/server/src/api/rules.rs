//! Rule catalogue endpoints: conversion, build, deploy and artifact download.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fleet_core::{FleetError, RuleSet, RuleSetVersion};
use fleet_rules::{
    BuildOutcome, ConversionOutcome, DeployOutcome, DeployTarget, EventRef, Indicator,
    RuleItemView,
};

use crate::auth::{header_str, API_KEY_HEADER, SENSOR_ID_HEADER};
use crate::state::AppState;

use super::{api_error, require_admin, ApiError, ErrorResponse};

pub const RULE_VERSION_HEADER: &str = "x-rule-version";
pub const RULE_SHA256_HEADER: &str = "x-rule-sha256";

/// One intelligence event and its indicators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertRequest {
    #[serde(flatten)]
    pub event: EventRef,
    #[serde(default)]
    pub indicators: Vec<Indicator>,
}

#[utoipa::path(
    post,
    path = "/api/v1/rules/convert",
    tag = "Rules",
    request_body(content = Object, description = "Event id, uuid and its indicators"),
    params(("X-Admin-Key" = String, Header, description = "Console admin key")),
    responses(
        (status = 200, description = "Draft rule set created, or noop", body = Object),
        (status = 401, description = "Bad admin key", body = ErrorResponse)
    )
)]
pub async fn convert_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ConvertRequest>,
) -> Result<Json<ConversionOutcome>, ApiError> {
    require_admin(&state, &headers)?;
    state
        .rules
        .convert_event(&req.event, &req.indicators)
        .map(Json)
        .map_err(api_error)
}

#[utoipa::path(
    get,
    path = "/api/v1/rules/sets",
    tag = "Rules",
    responses(
        (status = 200, description = "Rule sets, newest first", body = Vec<Object>)
    )
)]
pub async fn list_rule_sets(State(state): State<Arc<AppState>>) -> Json<Vec<RuleSet>> {
    Json(state.rules.list_rule_sets())
}

#[utoipa::path(
    get,
    path = "/api/v1/rules/sets/{version}/items",
    tag = "Rules",
    params(("version" = String, Path, description = "Rule set version")),
    responses(
        (status = 200, description = "Items of the set in sid order", body = Vec<Object>),
        (status = 400, description = "Malformed version", body = ErrorResponse),
        (status = 404, description = "Unknown version", body = ErrorResponse)
    )
)]
pub async fn list_rule_items(
    State(state): State<Arc<AppState>>,
    Path(version): Path<String>,
) -> Result<Json<Vec<RuleItemView>>, ApiError> {
    state.rules.items_for_version(&version).map(Json).map_err(api_error)
}

#[utoipa::path(
    post,
    path = "/api/v1/rules/{version}/build",
    tag = "Rules",
    params(
        ("version" = String, Path, description = "Rule set version"),
        ("X-Admin-Key" = String, Header, description = "Console admin key"),
    ),
    responses(
        (status = 200, description = "Archive written and recorded", body = Object),
        (status = 401, description = "Bad admin key", body = ErrorResponse),
        (status = 404, description = "Unknown version", body = ErrorResponse)
    )
)]
pub async fn build_rule_set(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(version): Path<String>,
) -> Result<Json<BuildOutcome>, ApiError> {
    require_admin(&state, &headers)?;
    let worker = Arc::clone(&state);
    tokio::task::spawn_blocking(move || worker.rules.build(&version))
        .await
        .map_err(|e| api_error(FleetError::Storage(format!("build task failed: {}", e))))?
        .map(Json)
        .map_err(api_error)
}

#[utoipa::path(
    post,
    path = "/api/v1/rules/{version}/deploy",
    tag = "Rules",
    request_body(content = Object, description = r#"{"target": "all"} or {"target": "list", "sensors": [...]}"#),
    params(
        ("version" = String, Path, description = "Rule set version"),
        ("X-Admin-Key" = String, Header, description = "Console admin key"),
    ),
    responses(
        (status = 200, description = "Version added to the cohort's desired set", body = Object),
        (status = 400, description = "Set is not built", body = ErrorResponse),
        (status = 401, description = "Bad admin key", body = ErrorResponse),
        (status = 404, description = "Unknown version", body = ErrorResponse)
    )
)]
pub async fn deploy_rule_set(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(version): Path<String>,
    Json(target): Json<DeployTarget>,
) -> Result<Json<DeployOutcome>, ApiError> {
    require_admin(&state, &headers)?;
    state.rules.deploy(&version, &target).map(Json).map_err(api_error)
}

#[utoipa::path(
    get,
    path = "/api/v1/rules/{version}/file",
    tag = "Rules",
    params(
        ("version" = String, Path, description = "Rule set version"),
        ("X-Sensor-Id" = String, Header, description = "Requesting sensor"),
        ("X-API-Key" = String, Header, description = "Per-sensor key"),
    ),
    responses(
        (status = 200, description = "Zip archive holding console.rules", content_type = "application/zip"),
        (status = 400, description = "Set is not built", body = ErrorResponse),
        (status = 401, description = "Bad sensor credentials", body = ErrorResponse),
        (status = 404, description = "Unknown version", body = ErrorResponse)
    )
)]
pub async fn download_rule_set(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(version): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sensor_id = header_str(&headers, SENSOR_ID_HEADER).unwrap_or_default();
    state
        .keys
        .verify_sensor(sensor_id, header_str(&headers, API_KEY_HEADER))
        .map_err(api_error)?;

    let version = RuleSetVersion::parse(&version).map_err(api_error)?;
    let set = state
        .store
        .get_rule_set(version.as_str())
        .ok_or_else(|| api_error(FleetError::rule_set_not_found(version.as_str())))?;
    let artifact = set.archive().ok_or_else(|| {
        api_error(FleetError::PreconditionFailed(format!(
            "rule set {} has not been built",
            version
        )))
    })?;

    let bytes = tokio::fs::read(&artifact.path).await.map_err(|e| {
        warn!(version = %version, path = %artifact.path, error = %e, "archive unreadable");
        api_error(FleetError::NotFound {
            kind: "archive",
            id: version.to_string(),
        })
    })?;

    info!(sensor_id, version = %version, bytes = bytes.len(), "rule archive served");
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", set.archive_filename()),
        )
        .header(RULE_VERSION_HEADER, version.as_str())
        .header(RULE_SHA256_HEADER, artifact.sha256.as_str())
        .body(Body::from(bytes))
        .map_err(|e| api_error(FleetError::Storage(e.to_string())))
}
