//! End-to-end integration tests over the HTTP surface: ingest a record,
//! watch a contract violation turn into an alert, and drive the alert
//! through its acknowledge/resolve lifecycle — all via `tower::ServiceExt::oneshot`
//! against the real `axum::Router`, no network bind required (mirrors the
//! teacher's `tests/backtest_run_integration.rs` placement under `tests/`).

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use tower::ServiceExt;

use guardrail_backend::alerts::AlertManager;
use guardrail_backend::anomaly::AnomalyDetector;
use guardrail_backend::api::{self, AppState};
use guardrail_backend::config::GuardrailConfig;
use guardrail_backend::drift::DriftDetector;
use guardrail_backend::kalman::ConversionKalmanFilter;
use guardrail_backend::validator::ContractValidator;
use guardrail_backend::violations::ViolationLogger;

/// `metrics::install_recorder` sets a process-global recorder; only the
/// first call in this test binary actually installs one; later calls reuse
/// the cached handle rather than erroring on a second install.
fn prometheus_handle() -> PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE
        .get_or_init(|| guardrail_backend::metrics::install_recorder().expect("install prometheus recorder"))
        .clone()
}

fn build_app(violations_path: &std::path::Path) -> axum::Router {
    let mut config = GuardrailConfig::default();
    config.baseline_window = 10;
    let config = Arc::new(config);

    let state = AppState {
        config: config.clone(),
        validator: Arc::new(ContractValidator::new(&config)),
        drift_detector: Arc::new(DriftDetector::new(&config)),
        kalman_filter: Arc::new(ConversionKalmanFilter::new(config.kalman.clone())),
        anomaly_detector: Arc::new(AnomalyDetector::new(config.anomaly.clone())),
        alert_manager: Arc::new(AlertManager::new(config.alert_ttl_seconds)),
        violation_logger: Arc::new(ViolationLogger::new(violations_path)),
        prometheus_handle: Arc::new(prometheus_handle()),
        processed_count: Arc::new(AtomicU64::new(0)),
    };

    api::router(state)
}

fn telemetry(sku: &str, price: f64) -> Value {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "sku": sku,
        "price": price,
        "stock": 50,
        "views": 100,
        "add_to_cart": 10,
        "purchases": 2,
        "referrer": "search",
    })
}

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn post_empty(app: &axum::Router, uri: &str) -> StatusCode {
    app.clone()
        .oneshot(Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
        .status()
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn price_jump_creates_an_alert_that_can_be_acknowledged_and_resolved() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(&tmp.path().join("violations.csv"));

    let (status, body) = post_json(&app, "/api/v1/ingest", telemetry("SKU-1", 19.99)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["violations"].as_array().unwrap().is_empty());

    // Stay under the 1000 cents-normalization cutoff so the jump isn't
    // collapsed back toward baseline by the price normalizer.
    let (status, body) = post_json(&app, "/api/v1/ingest", telemetry("SKU-1", 500.0)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["alerts_created"].as_u64().unwrap() >= 1);

    let (status, body) = get_json(&app, "/api/v1/alerts?severity=critical").await;
    assert_eq!(status, StatusCode::OK);
    let alerts = body["alerts"].as_array().unwrap();
    assert!(!alerts.is_empty(), "expected at least one critical alert, got {body}");
    let alert_id = alerts[0]["alert_id"].as_str().unwrap().to_string();
    assert!(alert_id.starts_with("ALERT-"));
    assert_eq!(alerts[0]["alert_type"], "contract_violation");
    assert!(alerts[0]["last_good_state"].is_object());

    assert_eq!(
        post_empty(&app, &format!("/api/v1/alerts/{alert_id}/acknowledge")).await,
        StatusCode::OK
    );
    assert_eq!(
        post_empty(&app, &format!("/api/v1/alerts/{alert_id}/resolve")).await,
        StatusCode::OK
    );
    assert_eq!(post_empty(&app, "/api/v1/alerts/ALERT-NOPE-000000/acknowledge").await, StatusCode::NOT_FOUND);

    let (_, resolved_listing) = get_json(&app, "/api/v1/alerts?resolved=true").await;
    assert!(resolved_listing["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["alert_id"] == alert_id));

    let (_, unresolved_listing) = get_json(&app, "/api/v1/alerts?resolved=false").await;
    assert!(!unresolved_listing["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["alert_id"] == alert_id));
}

#[tokio::test]
async fn negative_stock_is_rejected_with_high_severity() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(&tmp.path().join("violations.csv"));

    let mut record = telemetry("SKU-2", 50.0);
    record["stock"] = json!(-10);
    record["add_to_cart"] = json!(3);
    record["purchases"] = json!(0);

    let (status, body) = post_json(&app, "/api/v1/ingest", record).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);

    let (_, listing) = get_json(&app, "/api/v1/alerts?severity=high").await;
    assert!(listing["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["message"].as_str().unwrap_or("").contains("negative")));
}

#[tokio::test]
async fn health_and_metrics_surfaces_respond() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(&tmp.path().join("violations.csv"));

    let (status, body) = get_json(&app, "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["baseline_ready"], false);
    assert_eq!(body["anomaly_detector_trained"], false);

    let _ = post_json(&app, "/api/v1/ingest", telemetry("SKU-3", 25.0)).await;

    let response = app
        .clone()
        .oneshot(Request::builder().method("GET").uri("/api/v1/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("guardrail_ingest_requests_total"));
}
