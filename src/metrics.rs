//! Prometheus metric recording, matching the series spec §6 names exactly
//! (prefixed `guardrail_`, adapted from the source's `pricecanary_` prefix).
//!
//! Uses the `metrics` facade + `metrics-exporter-prometheus` recorder —
//! the same pairing the teacher uses for its own route-quality gauges —
//! rather than hand-rolling a text-exposition format.

use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("guardrail_ingest_latency_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0],
        )?
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("guardrail_anomaly_score".to_string()),
            &[-1.0, -0.5, -0.3, -0.1, 0.0, 0.1, 0.3, 0.5, 1.0],
        )?
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("guardrail_alert_latency_seconds".to_string()),
            &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0],
        )?
        .install_recorder()?;
    Ok(handle)
}

pub fn record_ingest(status: &'static str, latency: Duration) {
    metrics::counter!("guardrail_ingest_requests_total", "status" => status).increment(1);
    metrics::histogram!("guardrail_ingest_latency_seconds").record(latency.as_secs_f64());
}

pub fn record_validation(pass_rate: f64, failed_violation_type: Option<&'static str>) {
    metrics::gauge!("guardrail_validation_pass_rate").set(pass_rate);
    if let Some(violation_type) = failed_violation_type {
        metrics::counter!("guardrail_validation_failures_total", "violation_type" => violation_type).increment(1);
    }
}

pub fn record_drift_score(metric_type: &'static str, score: f64) {
    match metric_type {
        "price" => metrics::gauge!("guardrail_drift_score_price").set(score),
        "stock" => metrics::gauge!("guardrail_drift_score_stock").set(score),
        _ => {}
    }
}

pub fn record_drift_detection(metric_type: &'static str, severity: &'static str) {
    metrics::counter!("guardrail_drift_detections_total", "metric_type" => metric_type, "severity" => severity)
        .increment(1);
}

pub fn record_anomaly_score(score: f64) {
    metrics::histogram!("guardrail_anomaly_score").record(score);
}

pub fn record_anomaly_detection(severity: &'static str) {
    metrics::counter!("guardrail_anomaly_detections_total", "severity" => severity).increment(1);
}

pub fn record_alert(severity: &'static str, alert_type: &'static str, latency: Duration) {
    metrics::counter!("guardrail_alerts_total", "severity" => severity, "alert_type" => alert_type).increment(1);
    metrics::histogram!("guardrail_alert_latency_seconds").record(latency.as_secs_f64());
}

pub fn set_active_alerts(severity: &'static str, alert_type: &'static str, count: f64) {
    metrics::gauge!("guardrail_active_alerts", "severity" => severity, "alert_type" => alert_type).set(count);
}

pub fn record_processed() {
    metrics::counter!("guardrail_records_processed_total").increment(1);
}

pub fn set_records_per_second(rate: f64) {
    metrics::gauge!("guardrail_records_per_second").set(rate);
}

pub fn record_processing_error(error_type: &'static str) {
    metrics::counter!("guardrail_processing_errors_total", "error_type" => error_type).increment(1);
}
