//! Router-level tests: auth, errors, the missing-version list and artifact
//! download headers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use fleet_core::{Clock, Config, SystemClock};
use fleet_server::{build_router, AppState};
use fleet_storage::FleetStore;

const ADMIN: &str = "admin-secret";

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    _dir: tempfile::TempDir,
}

fn app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::for_profile("");
    config.storage.data_dir = dir.path().join("data");
    config.rules.base_dir = dir.path().join("rules");
    config.rules.engine = "snort3".to_string();
    config.server.cors_origin = "*".to_string();
    config.auth.sensor_keys = BTreeMap::from([
        ("sensor-1".to_string(), "key1".to_string()),
        ("sensor-2".to_string(), "key2".to_string()),
    ]);
    config.auth.admin_key = Some(ADMIN.to_string());

    let store = Arc::new(FleetStore::open(config.storage.data_dir.clone()).unwrap());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = Arc::new(AppState::new(config, store, clock));
    TestApp {
        router: build_router(Arc::clone(&state)),
        state,
        _dir: dir,
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let res = router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let body = res.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, headers, body)
}

fn json_req(method: &str, uri: &str, headers: &[(&str, &str)], body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    builder.body(Body::empty()).unwrap()
}

fn parse(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

/// Convert one domain indicator and return the new version.
async fn converted_version(app: &TestApp) -> String {
    let (status, _, body) = send(
        &app.router,
        json_req(
            "POST",
            "/api/v1/rules/convert",
            &[("x-admin-key", ADMIN)],
            json!({
                "event_id": 42,
                "uuid": "5f1c-event",
                "indicators": [
                    { "type": "domain", "value": "evil.example", "to_ids": true },
                    { "type": "comment", "value": "ignored", "to_ids": false }
                ]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = parse(&body);
    assert_eq!(body["status"], "ok");
    body["version"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app();
    let (status, _, body) = send(&app.router, get("/health", &[])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["status"], "ok");
}

#[tokio::test]
async fn wrong_sensor_key_is_unauthorized() {
    let app = app();
    let (status, _, body) = send(
        &app.router,
        json_req(
            "PUT",
            "/api/v1/sensors/heartbeat",
            &[("x-api-key", "key2")],
            json!({ "sensor_id": "sensor-1", "hostname": "probe-01" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(parse(&body)["error"], "unauthorized");
    assert!(app.state.store.get_sensor("sensor-1").is_none());
}

#[tokio::test]
async fn check_now_unknown_sensor_is_404() {
    let app = app();
    let (status, _, body) = send(&app.router, get("/api/v1/sensors/ghost/check_now", &[])).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(parse(&body)["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn unknown_status_value_is_400() {
    let app = app();
    let (status, _, _) = send(
        &app.router,
        json_req(
            "PUT",
            "/api/v1/sensors/status",
            &[("x-api-key", "key1")],
            json!({ "sensor_id": "sensor-1", "status": "asleep" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_need_admin_key() {
    let app = app();
    let (status, _, _) = send(
        &app.router,
        json_req(
            "POST",
            "/api/v1/rules/convert",
            &[("x-admin-key", "wrong")],
            json!({ "event_id": 1, "indicators": [] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn deploy_then_status_lists_missing_version() {
    let app = app();
    let version = converted_version(&app).await;

    // A draft set cannot be deployed.
    let (status, _, _) = send(
        &app.router,
        json_req(
            "POST",
            &format!("/api/v1/rules/{}/deploy", version),
            &[("x-admin-key", ADMIN)],
            json!({ "target": "all" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = send(
        &app.router,
        json_req(
            "POST",
            &format!("/api/v1/rules/{}/build", version),
            &[("x-admin-key", ADMIN)],
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["item_count"], 1);

    for (id, key) in [("sensor-1", "key1"), ("sensor-2", "key2")] {
        let (status, _, _) = send(
            &app.router,
            json_req(
                "PUT",
                "/api/v1/sensors/heartbeat",
                &[("x-api-key", key)],
                json!({ "sensor_id": id, "hostname": format!("{}.lab", id) }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _, body) = send(
        &app.router,
        json_req(
            "POST",
            &format!("/api/v1/rules/{}/deploy", version),
            &[("x-admin-key", ADMIN)],
            json!({ "target": "list", "sensors": ["sensor-1"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = parse(&body);
    assert_eq!(body["matched_sensors"], 1);
    assert_eq!(body["modified_sensors"], 1);

    let (status, _, body) = send(
        &app.router,
        json_req(
            "PUT",
            "/api/v1/sensors/status",
            &[("x-api-key", "key1")],
            json!({ "sensor_id": "sensor-1", "status": "active", "rule_versions": [] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = parse(&body);
    assert_eq!(body["status"], "active");
    assert_eq!(body["missing_rule_versions"], json!([version]));

    let (_, _, body) = send(
        &app.router,
        json_req(
            "PUT",
            "/api/v1/sensors/status",
            &[("x-api-key", "key2")],
            json!({ "sensor_id": "sensor-2", "status": "active" }),
        ),
    )
    .await;
    assert_eq!(parse(&body)["missing_rule_versions"], json!([]));

    app.state.scheduler().shutdown();
}

#[tokio::test]
async fn download_serves_archive_with_headers() {
    let app = app();
    let version = converted_version(&app).await;
    let file_uri = format!("/api/v1/rules/{}/file", version);
    let creds = [("x-sensor-id", "sensor-1"), ("x-api-key", "key1")];

    // Not built yet.
    let (status, _, _) = send(&app.router, get(&file_uri, &creds)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let built = app.state.rules.build(&version).unwrap();

    let (status, _, _) = send(
        &app.router,
        get(&file_uri, &[("x-sensor-id", "sensor-1"), ("x-api-key", "key2")]),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, headers, body) = send(&app.router, get(&file_uri, &creds)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-rule-version"], version.as_str());
    assert_eq!(headers["x-rule-sha256"], built.sha256.as_str());
    let disposition = headers["content-disposition"].to_str().unwrap();
    assert!(disposition.contains(&format!("snort3_{}.zip", version)));
    assert_eq!(body.len() as u64, built.size_bytes);
}

#[tokio::test]
async fn download_unknown_version_is_404() {
    let app = app();
    let (status, _, _) = send(
        &app.router,
        get(
            "/api/v1/rules/2030.01.01-000000-e9/file",
            &[("x-sensor-id", "sensor-1"), ("x-api-key", "key1")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sensor_views_include_computed_status() {
    let app = app();
    send(
        &app.router,
        json_req(
            "PUT",
            "/api/v1/sensors/heartbeat",
            &[("x-api-key", "key1")],
            json!({ "sensor_id": "sensor-1", "hostname": "probe-01", "cpu_pct": 12.5 }),
        ),
    )
    .await;

    let (status, _, body) = send(&app.router, get("/api/v1/sensors/sensor-1", &[])).await;
    assert_eq!(status, StatusCode::OK);
    let body = parse(&body);
    assert_eq!(body["hostname"], "probe-01");
    assert_eq!(body["status"], "inactive");
    assert_eq!(body["status_reason"], "never_seen");
    assert_eq!(body["computed_status"], "inactive");

    let (_, _, body) = send(&app.router, get("/api/v1/sensors", &[])).await;
    assert_eq!(parse(&body).as_array().unwrap().len(), 1);
}
