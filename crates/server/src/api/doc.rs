//! OpenAPI documentation aggregator.
//!
//! Collects the `#[utoipa::path]`-annotated handlers and `ToSchema` types
//! into one OpenAPI document, served via Scalar UI at `/docs`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "fleet console API",
        version = "0.1.0",
        description = "Sensor registry, liveness tracking and IDS rule-set distribution.",
    ),
    tags(
        (name = "Health", description = "Console readiness"),
        (name = "Sensors", description = "Heartbeats, status reports, liveness checks and sensor views"),
        (name = "Rules", description = "Indicator conversion, rule-set build, deploy and artifact download"),
    ),
    paths(
        // Health
        crate::api::health::health,
        // Sensors
        crate::api::sensors::heartbeat,
        crate::api::sensors::status_report,
        crate::api::sensors::list_sensors,
        crate::api::sensors::get_sensor,
        crate::api::sensors::check_now,
        crate::api::sensors::sensor_rule_stats,
        // Rules
        crate::api::rules::convert_event,
        crate::api::rules::list_rule_sets,
        crate::api::rules::list_rule_items,
        crate::api::rules::build_rule_set,
        crate::api::rules::deploy_rule_set,
        crate::api::rules::download_rule_set,
    ),
    components(schemas(
        crate::api::ErrorResponse,
        crate::api::health::HealthResponse,
        crate::registry::HeartbeatAck,
        crate::registry::StatusReport,
        crate::registry::StatusOutcome,
        crate::registry::CheckNowOutcome,
    ))
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/v1/sensors/heartbeat",
            "/api/v1/sensors/status",
            "/api/v1/sensors/{id}/check_now",
            "/api/v1/rules/{version}/file",
            "/api/v1/rules/{version}/deploy",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
