//! Route handlers. Orchestration order in [`ingest_telemetry`] mirrors the
//! source's `routes.py::ingest_telemetry`: validate, archive + alert
//! violations, feed the drift windows, run all three drift tests, score
//! for multivariate anomaly, then check conversion deviation — each stage
//! only runs if the previous stage left the record in a state it applies to.

use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::alerts::{Alert, AlertFilter, AlertType, DetectorFinding};
use crate::metrics;
use crate::models::{Severity, TelemetryRecord};

#[derive(Debug, Deserialize)]
pub struct TelemetryRecordRequest {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub sku: String,
    pub price: f64,
    pub stock: i64,
    pub views: u64,
    pub add_to_cart: u64,
    pub purchases: u64,
    #[serde(default)]
    pub referrer: Option<String>,
}

impl From<TelemetryRecordRequest> for TelemetryRecord {
    fn from(req: TelemetryRecordRequest) -> Self {
        TelemetryRecord {
            timestamp: req.timestamp,
            sku: req.sku,
            price: req.price,
            stock: req.stock,
            views: req.views,
            add_to_cart: req.add_to_cart,
            purchases: req.purchases,
            referrer: req.referrer,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    pub message: String,
    pub violations: Vec<crate::models::Violation>,
    pub alerts_created: usize,
}

#[derive(Debug, Serialize)]
pub struct AlertResponse {
    #[serde(flatten)]
    pub alert: Alert,
    pub age_seconds: i64,
}

impl From<Alert> for AlertResponse {
    fn from(alert: Alert) -> Self {
        let age_seconds = alert.age_seconds();
        AlertResponse { alert, age_seconds }
    }
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<AlertResponse>,
    pub total: usize,
    pub stats: crate::alerts::AlertStats,
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub severity: Option<String>,
    pub alert_type: Option<String>,
    pub sku: Option<String>,
    pub resolved: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

fn parse_alert_type(raw: &str) -> Option<AlertType> {
    match raw.to_ascii_lowercase().as_str() {
        "contract_violation" => Some(AlertType::ContractViolation),
        "drift" => Some(AlertType::Drift),
        "anomaly" => Some(AlertType::Anomaly),
        "conversion_deviation" => Some(AlertType::ConversionDeviation),
        _ => None,
    }
}

pub async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "guardrail",
        "endpoints": {
            "ingest": "/api/v1/ingest",
            "alerts": "/api/v1/alerts",
            "metrics": "/api/v1/metrics",
            "health": "/api/v1/health",
        }
    }))
}

pub async fn ingest_telemetry(
    State(state): State<AppState>,
    Json(req): Json<TelemetryRecordRequest>,
) -> Result<Json<IngestResponse>, StatusCode> {
    let started = Instant::now();
    let raw: TelemetryRecord = req.into();
    let mut alerts_created = 0usize;

    let validation = state.validator.validate(&raw);

    if !validation.violations.is_empty() {
        if let Err(err) = state.violation_logger.log_violations(&validation.violations) {
            tracing::warn!(error = %err, "failed to archive violations");
            metrics::record_processing_error("violation_archive_write");
        }
        for violation in &validation.violations {
            let alert = state
                .alert_manager
                .record_finding(DetectorFinding::ContractViolation(violation.clone()));
            metrics::record_alert(alert.severity.as_str(), alert.alert_type.as_str(), started.elapsed());
            alerts_created += 1;
            metrics::record_validation(0.0, Some(violation.violation_type.as_str()));
        }
    }

    let record = match validation.normalized_record {
        Some(record) => record,
        None => {
            metrics::record_ingest("rejected", started.elapsed());
            return Ok(Json(IngestResponse {
                success: false,
                message: "record rejected before normalization".to_string(),
                violations: validation.violations,
                alerts_created,
            }));
        }
    };

    state.drift_detector.add_price_sample(record.price);
    state.drift_detector.add_stock_sample(record.stock as f64);
    if let Some(rate) = record.conversion_rate() {
        state.drift_detector.add_conversion_sample(&record.sku, rate);
    }

    let (price_drift, stock_drift, conversion_drift) = state.drift_detector.detect_all_drift(&record.sku);

    if let Some(result) = price_drift {
        metrics::record_drift_score("price", result.psi);
        if result.drift_detected {
            let alert = state.alert_manager.record_finding(DetectorFinding::PriceDrift {
                sku: Some(record.sku.clone()),
                result,
            });
            metrics::record_drift_detection("price", alert.severity.as_str());
            metrics::record_alert(alert.severity.as_str(), alert.alert_type.as_str(), started.elapsed());
            alerts_created += 1;
        }
    }
    if let Some(result) = stock_drift {
        metrics::record_drift_score("stock", result.psi);
        if result.drift_detected {
            let alert = state.alert_manager.record_finding(DetectorFinding::StockDrift {
                sku: Some(record.sku.clone()),
                result,
            });
            metrics::record_drift_detection("stock", alert.severity.as_str());
            metrics::record_alert(alert.severity.as_str(), alert.alert_type.as_str(), started.elapsed());
            alerts_created += 1;
        }
    }
    if let Some(result) = conversion_drift {
        if result.drift_detected {
            let alert = state.alert_manager.record_finding(DetectorFinding::ConversionDrift {
                sku: record.sku.clone(),
                result,
            });
            metrics::record_alert(alert.severity.as_str(), alert.alert_type.as_str(), started.elapsed());
            alerts_created += 1;
        }
    }

    if state.anomaly_detector.is_trained() {
        let last_known = state.anomaly_detector.last_known(&record.sku);
        if let Some(result) = state.anomaly_detector.predict(&record) {
            metrics::record_anomaly_score(result.score);
            if result.is_anomaly {
                let explanation = result
                    .explanation
                    .clone()
                    .unwrap_or_else(|| "Multiple subtle anomalies detected".to_string());
                let alert = state.alert_manager.record_finding(DetectorFinding::Anomaly {
                    sku: record.sku.clone(),
                    result,
                    explanation,
                    last_known,
                });
                metrics::record_anomaly_detection(alert.severity.as_str());
                metrics::record_alert(alert.severity.as_str(), alert.alert_type.as_str(), started.elapsed());
                alerts_created += 1;
            }
        }
    }

    if record.views > 0 {
        let deviation = state.kalman_filter.detect_deviation(&record.sku, record.views, record.purchases);
        if deviation.is_deviation {
            let alert = state.alert_manager.record_finding(DetectorFinding::ConversionDeviation {
                sku: record.sku.clone(),
                result: deviation,
            });
            metrics::record_alert(alert.severity.as_str(), alert.alert_type.as_str(), started.elapsed());
            alerts_created += 1;
        }
    }

    state.processed_count.fetch_add(1, Ordering::Relaxed);
    metrics::record_processed();
    let pass_rate = if validation.violations.is_empty() { 1.0 } else { 0.0 };
    metrics::record_validation(pass_rate, None);
    metrics::record_ingest("success", started.elapsed());

    Ok(Json(IngestResponse {
        success: validation.violations.is_empty(),
        message: "ingested".to_string(),
        violations: validation.violations,
        alerts_created,
    }))
}

pub async fn get_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<AlertsResponse>, StatusCode> {
    let severity = match query.severity.as_deref() {
        None => None,
        Some(raw) => Some(parse_severity(raw).ok_or(StatusCode::BAD_REQUEST)?),
    };
    let alert_type = match query.alert_type.as_deref() {
        None => None,
        Some(raw) => Some(parse_alert_type(raw).ok_or(StatusCode::BAD_REQUEST)?),
    };

    let filter = AlertFilter {
        severity,
        alert_type,
        sku: query.sku.clone(),
        resolved: query.resolved,
        limit: query.limit,
    };
    let alerts = state.alert_manager.get_alerts(&filter);
    let stats = state.alert_manager.get_alert_stats();

    let mut active_by_severity_type: std::collections::HashMap<(&'static str, &'static str), u64> =
        std::collections::HashMap::new();
    for alert in &alerts {
        if !alert.resolved {
            *active_by_severity_type
                .entry((alert.severity.as_str(), alert.alert_type.as_str()))
                .or_insert(0) += 1;
        }
    }
    for s in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
        for t in [AlertType::ContractViolation, AlertType::Drift, AlertType::Anomaly, AlertType::ConversionDeviation] {
            let count = active_by_severity_type.get(&(s.as_str(), t.as_str())).copied().unwrap_or(0);
            metrics::set_active_alerts(s.as_str(), t.as_str(), count as f64);
        }
    }

    let total = alerts.len();
    Ok(Json(AlertsResponse {
        alerts: alerts.into_iter().map(AlertResponse::from).collect(),
        total,
        stats,
    }))
}

fn parse_severity(raw: &str) -> Option<Severity> {
    match raw.to_ascii_lowercase().as_str() {
        "low" => Some(Severity::Low),
        "medium" => Some(Severity::Medium),
        "high" => Some(Severity::High),
        "critical" => Some(Severity::Critical),
        _ => None,
    }
}

pub async fn acknowledge_alert(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.alert_manager.acknowledge_alert(&id) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn resolve_alert(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.alert_manager.resolve_alert(&id) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn get_metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub baseline_ready: bool,
    pub anomaly_detector_trained: bool,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        baseline_ready: state.drift_detector.baseline_ready(),
        anomaly_detector_trained: state.anomaly_detector.is_trained(),
    })
}
