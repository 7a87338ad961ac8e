//! Alert Manager — turns a detector finding into a stored [`Alert`], with
//! acknowledge/resolve lifecycle and TTL-based expiry (spec §4.5).
//!
//! One `parking_lot::RwLock<BTreeMap<String, Alert>>` guards all alert
//! state (teacher pattern, see `route_quality::mitigation::MitigationController`),
//! ordered by alert id so listings come back newest-last without a sort at
//! read time once reversed. A single `AtomicU64` counter backs alert-id
//! generation and is never reset, matching the source's `_generate_alert_id`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::anomaly::AnomalyResult;
use crate::drift::{ConversionDriftResult, DriftResult};
use crate::kalman::DeviationResult;
use crate::models::{Severity, Violation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ContractViolation,
    Drift,
    Anomaly,
    ConversionDeviation,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ContractViolation => "contract_violation",
            AlertType::Drift => "drift",
            AlertType::Anomaly => "anomaly",
            AlertType::ConversionDeviation => "conversion_deviation",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub sku: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub last_good_state: serde_json::Value,
    pub suggested_fix: String,
    pub metadata: serde_json::Value,
    pub acknowledged: bool,
    pub resolved: bool,
}

/// Filters accepted by [`AlertManager::get_alerts`] (spec §4.5 `get`).
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub severity: Option<Severity>,
    pub alert_type: Option<AlertType>,
    pub sku: Option<String>,
    pub resolved: Option<bool>,
    pub limit: usize,
}

impl Alert {
    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.timestamp).num_seconds()
    }
}

/// The tagged union of engine outputs the alert manager knows how to turn
/// into an alert. Keeping every engine's result behind one enum lets
/// `record_finding` be the single dispatch point instead of scattering
/// alert-creation calls across callers (REDESIGN FLAGS §9).
pub enum DetectorFinding {
    ContractViolation(Violation),
    // PriceDrift/StockDrift/ConversionDrift all collapse to a single `drift`
    // alert type, distinguished only by `metadata.metric_type` (spec §3,
    // `original_source/src/api/alerts.py::create_drift_alert`).
    PriceDrift { sku: Option<String>, result: DriftResult },
    StockDrift { sku: Option<String>, result: DriftResult },
    ConversionDrift { sku: String, result: ConversionDriftResult },
    Anomaly {
        sku: String,
        result: AnomalyResult,
        explanation: String,
        last_known: Option<(f64, i64)>,
    },
    ConversionDeviation { sku: String, result: DeviationResult },
}

pub struct AlertManager {
    alert_ttl_seconds: i64,
    alerts: RwLock<BTreeMap<String, Alert>>,
    counter: AtomicU64,
}

impl AlertManager {
    pub fn new(alert_ttl_seconds: u64) -> Self {
        Self {
            alert_ttl_seconds: alert_ttl_seconds as i64,
            alerts: RwLock::new(BTreeMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    fn next_alert_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("ALERT-{}-{:06}", Utc::now().format("%Y%m%d"), n)
    }

    fn store(&self, alert: Alert) -> Alert {
        let mut alerts = self.alerts.write();
        alerts.insert(alert.alert_id.clone(), alert.clone());
        alert
    }

    /// Single dispatch point: route a finding to its severity/message rules
    /// and store the resulting alert.
    pub fn record_finding(&self, finding: DetectorFinding) -> Alert {
        match finding {
            DetectorFinding::ContractViolation(violation) => self.contract_violation_alert(violation),
            DetectorFinding::PriceDrift { sku, result } => self.drift_alert(sku, "price", result),
            DetectorFinding::StockDrift { sku, result } => self.drift_alert(sku, "stock", result),
            DetectorFinding::ConversionDrift { sku, result } => self.conversion_drift_alert(sku, result),
            DetectorFinding::Anomaly { sku, result, explanation, last_known } => {
                self.anomaly_alert(sku, result, explanation, last_known)
            }
            DetectorFinding::ConversionDeviation { sku, result } => self.conversion_deviation_alert(sku, result),
        }
    }

    fn contract_violation_alert(&self, violation: Violation) -> Alert {
        let alert = Alert {
            alert_id: self.next_alert_id(),
            alert_type: AlertType::ContractViolation,
            severity: violation.severity,
            message: violation.reason.clone(),
            sku: violation.sku.clone(),
            timestamp: Utc::now(),
            last_good_state: serde_json::json!({}),
            suggested_fix: violation.violation_type.suggested_fix().to_string(),
            metadata: serde_json::json!({ "violation_type": violation.violation_type.as_str() }),
            acknowledged: false,
            resolved: false,
        };
        self.store(alert)
    }

    fn drift_alert(&self, sku: Option<String>, metric: &str, result: DriftResult) -> Alert {
        let severity = if result.psi > 0.5 || result.ks_pvalue < 0.01 {
            Severity::Critical
        } else if result.psi > 0.3 || result.ks_pvalue < 0.05 {
            Severity::High
        } else {
            Severity::Medium
        };
        let alert = Alert {
            alert_id: self.next_alert_id(),
            alert_type: AlertType::Drift,
            severity,
            message: format!(
                "{} distribution drift detected (psi={:.3}, ks_pvalue={:.4})",
                metric, result.psi, result.ks_pvalue
            ),
            sku,
            timestamp: Utc::now(),
            last_good_state: serde_json::json!({ "baseline_mean": result.baseline_mean }),
            suggested_fix: format!("Review {metric} trends and upstream data source or catalog updates."),
            metadata: serde_json::json!({
                "metric_type": metric,
                "psi": result.psi,
                "ks_statistic": result.ks_statistic,
                "ks_pvalue": result.ks_pvalue,
                "recent_mean": result.recent_mean,
            }),
            acknowledged: false,
            resolved: false,
        };
        self.store(alert)
    }

    fn conversion_drift_alert(&self, sku: String, result: ConversionDriftResult) -> Alert {
        let severity = if result.p_value < 0.01 {
            Severity::Critical
        } else if result.p_value < 0.05 {
            Severity::High
        } else {
            Severity::Medium
        };
        let alert = Alert {
            alert_id: self.next_alert_id(),
            alert_type: AlertType::Drift,
            severity,
            message: format!(
                "Conversion rate drifted from {:.4} to {:.4} (delta={:.4}, p={:.4})",
                result.baseline_rate, result.recent_rate, result.delta, result.p_value
            ),
            sku: Some(sku),
            timestamp: Utc::now(),
            last_good_state: serde_json::json!({ "expected_conversion_rate": result.baseline_rate }),
            suggested_fix: "Review conversion funnel for pricing, promotion, or checkout regressions.".to_string(),
            metadata: serde_json::json!({
                "metric_type": "conversion",
                "baseline_rate": result.baseline_rate,
                "recent_rate": result.recent_rate,
                "delta": result.delta,
                "t_statistic": result.t_statistic,
                "p_value": result.p_value,
            }),
            acknowledged: false,
            resolved: false,
        };
        self.store(alert)
    }

    fn anomaly_alert(
        &self,
        sku: String,
        result: AnomalyResult,
        explanation: String,
        last_known: Option<(f64, i64)>,
    ) -> Alert {
        let last_good_state = match last_known {
            Some((price, stock)) => serde_json::json!({ "last_price": price, "last_stock": stock }),
            None => serde_json::json!({}),
        };
        let alert = Alert {
            alert_id: self.next_alert_id(),
            alert_type: AlertType::Anomaly,
            severity: result.severity(),
            message: explanation,
            sku: Some(sku),
            timestamp: Utc::now(),
            last_good_state,
            suggested_fix: "Investigate data quality and system behavior around this observation.".to_string(),
            metadata: serde_json::json!({ "score": result.score }),
            acknowledged: false,
            resolved: false,
        };
        self.store(alert)
    }

    fn conversion_deviation_alert(&self, sku: String, result: DeviationResult) -> Alert {
        let alert = Alert {
            alert_id: self.next_alert_id(),
            alert_type: AlertType::ConversionDeviation,
            severity: result.severity(),
            message: format!(
                "Conversion rate {:.4} deviates {:.2} sigma from tracked estimate {:.4}",
                result.observed_rate, result.z_score, result.predicted_rate
            ),
            sku: Some(sku),
            timestamp: Utc::now(),
            last_good_state: serde_json::json!({ "expected_conversion_rate": result.predicted_rate }),
            suggested_fix: "Review conversion funnel for tracking or instrumentation gaps.".to_string(),
            metadata: serde_json::json!({
                "observed_rate": result.observed_rate,
                "predicted_rate": result.predicted_rate,
                "z_score": result.z_score,
            }),
            acknowledged: false,
            resolved: false,
        };
        self.store(alert)
    }

    /// List alerts, newest first, filtered per [`AlertFilter`], capped at `limit`.
    pub fn get_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.purge_expired();
        let alerts = self.alerts.read();
        let mut matched: Vec<Alert> = alerts
            .values()
            .filter(|a| filter.severity.map_or(true, |s| a.severity == s))
            .filter(|a| filter.alert_type.map_or(true, |t| a.alert_type == t))
            .filter(|a| filter.sku.as_deref().map_or(true, |sku| a.sku.as_deref() == Some(sku)))
            .filter(|a| filter.resolved.map_or(true, |r| a.resolved == r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(filter.limit);
        matched
    }

    pub fn acknowledge_alert(&self, alert_id: &str) -> bool {
        let mut alerts = self.alerts.write();
        if let Some(alert) = alerts.get_mut(alert_id) {
            alert.acknowledged = true;
            true
        } else {
            false
        }
    }

    pub fn resolve_alert(&self, alert_id: &str) -> bool {
        let mut alerts = self.alerts.write();
        if let Some(alert) = alerts.get_mut(alert_id) {
            alert.resolved = true;
            true
        } else {
            false
        }
    }

    fn purge_expired(&self) {
        let mut alerts = self.alerts.write();
        alerts.retain(|_, alert| alert.age_seconds() < self.alert_ttl_seconds);
    }

    pub fn get_alert_stats(&self) -> AlertStats {
        self.purge_expired();
        let alerts = self.alerts.read();
        let mut by_severity: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
        let mut unresolved = 0u64;
        let mut unacknowledged = 0u64;
        for alert in alerts.values() {
            *by_severity.entry(alert.severity.as_str().to_string()).or_insert(0) += 1;
            *by_type.entry(alert.alert_type.as_str().to_string()).or_insert(0) += 1;
            if !alert.resolved {
                unresolved += 1;
            }
            if !alert.acknowledged {
                unacknowledged += 1;
            }
        }
        AlertStats {
            total: alerts.len() as u64,
            unresolved,
            unacknowledged,
            by_severity,
            by_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertStats {
    pub total: u64,
    pub unresolved: u64,
    pub unacknowledged: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ViolationType;

    fn violation(severity: Severity) -> Violation {
        Violation {
            timestamp: Utc::now(),
            sku: Some("SKU-1".to_string()),
            violation_type: ViolationType::NegativeStock,
            reason: "stock went negative".to_string(),
            severity,
        }
    }

    #[test]
    fn alert_ids_increment_and_never_reset() {
        let manager = AlertManager::new(3600);
        let a = manager.record_finding(DetectorFinding::ContractViolation(violation(Severity::High)));
        let b = manager.record_finding(DetectorFinding::ContractViolation(violation(Severity::High)));
        assert_ne!(a.alert_id, b.alert_id);
        assert!(b.alert_id > a.alert_id);
    }

    #[test]
    fn drift_severity_escalates_with_psi() {
        let manager = AlertManager::new(3600);
        let result = DriftResult {
            drift_detected: true,
            psi: 0.6,
            ks_statistic: 0.4,
            ks_pvalue: 0.2,
            baseline_mean: 50.0,
            recent_mean: 220.0,
        };
        let alert = manager.record_finding(DetectorFinding::PriceDrift {
            sku: Some("SKU-1".to_string()),
            result,
        });
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[test]
    fn acknowledge_and_resolve_round_trip() {
        let manager = AlertManager::new(3600);
        let alert = manager.record_finding(DetectorFinding::ContractViolation(violation(Severity::Medium)));
        assert!(manager.acknowledge_alert(&alert.alert_id));
        assert!(manager.resolve_alert(&alert.alert_id));
        assert!(!manager.acknowledge_alert("ALERT-NOPE-000000"));
    }

    #[test]
    fn stats_count_by_severity_and_type() {
        let manager = AlertManager::new(3600);
        manager.record_finding(DetectorFinding::ContractViolation(violation(Severity::High)));
        manager.record_finding(DetectorFinding::ContractViolation(violation(Severity::Low)));
        let stats = manager.get_alert_stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.unresolved, 2);
    }
}
