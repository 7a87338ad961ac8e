//! HTTP surface: ingest, alert lifecycle, Prometheus exposition, health.

pub mod routes;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::alerts::AlertManager;
use crate::anomaly::AnomalyDetector;
use crate::config::GuardrailConfig;
use crate::drift::DriftDetector;
use crate::kalman::ConversionKalmanFilter;
use crate::validator::ContractValidator;
use crate::violations::ViolationLogger;

/// Shared application state, handed to every axum handler as `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GuardrailConfig>,
    pub validator: Arc<ContractValidator>,
    pub drift_detector: Arc<DriftDetector>,
    pub kalman_filter: Arc<ConversionKalmanFilter>,
    pub anomaly_detector: Arc<AnomalyDetector>,
    pub alert_manager: Arc<AlertManager>,
    pub violation_logger: Arc<ViolationLogger>,
    pub prometheus_handle: Arc<PrometheusHandle>,
    pub processed_count: Arc<AtomicU64>,
}

pub fn router(state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/", get(routes::index))
        .route("/api/v1/ingest", post(routes::ingest_telemetry))
        .route("/api/v1/alerts", get(routes::get_alerts))
        .route("/api/v1/alerts/:id/acknowledge", post(routes::acknowledge_alert))
        .route("/api/v1/alerts/:id/resolve", post(routes::resolve_alert))
        .route("/api/v1/metrics", get(routes::get_metrics))
        .route("/api/v1/health", get(routes::health_check))
        .with_state(state)
}
