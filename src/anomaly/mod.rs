//! Anomaly Detector — multivariate outlier detection over a 7-dimensional
//! per-record feature vector (spec §4.4), backed by the isolation forest in
//! [`isolation_forest`].
//!
//! The trained model is read-mostly once training completes: many requests
//! score against it, and it's replaced wholesale exactly once after
//! `train()`. That's the textbook case for `arc_swap::ArcSwapOption` rather
//! than a `RwLock` (grounded in the teacher's `arc-swap = "1.7"` dependency,
//! used there for comparable hot-swap-once/read-many model state).

pub mod isolation_forest;

use std::collections::HashMap;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::AnomalyConfig;
use crate::models::{Severity, TelemetryRecord};
use isolation_forest::IsolationForest;

const HISTORY_CAP: usize = 100;

#[derive(Default)]
struct SkuHistory {
    price_history: Vec<f64>,
    stock_history: Vec<f64>,
    conversion_history: Vec<f64>,
    last_price: Option<f64>,
    last_stock: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AnomalyResult {
    pub score: f64,
    pub is_anomaly: bool,
    /// Per-feature threshold explanation, computed from the same
    /// pre-history-update feature vector used to score the record; `None`
    /// when the record wasn't flagged anomalous.
    pub explanation: Option<String>,
}

impl AnomalyResult {
    pub fn severity(&self) -> Severity {
        if self.score < -0.5 {
            Severity::Critical
        } else if self.score < -0.3 {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

pub struct AnomalyDetector {
    config: AnomalyConfig,
    histories: RwLock<HashMap<String, SkuHistory>>,
    referrer_counts: RwLock<HashMap<String, u64>>,
    model: ArcSwapOption<IsolationForest>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            histories: RwLock::new(HashMap::new()),
            referrer_counts: RwLock::new(HashMap::new()),
            model: ArcSwapOption::empty(),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.model.load().is_some()
    }

    /// The SKU's last observed `(price, stock)` before the current record,
    /// for alert enrichment (spec §4.5 `last_good_state`).
    pub fn last_known(&self, sku: &str) -> Option<(f64, i64)> {
        let histories = self.histories.read();
        let history = histories.get(sku)?;
        Some((history.last_price?, history.last_stock?))
    }

    /// The 7 features spec §4.4 names, in order:
    /// price_delta_pct, stock_change (÷100), referrer_irregularity,
    /// conversion_deviation, cart_irregularity, price_magnitude, stock_magnitude.
    fn extract_features(&self, record: &TelemetryRecord) -> Vec<f64> {
        let histories = self.histories.read();
        let history = histories.get(&record.sku);

        let price_delta_pct = match history.and_then(|h| h.last_price) {
            Some(last) if last > 0.0 => ((record.price - last) / last).abs(),
            _ => 0.0,
        };

        let stock_change = match history.and_then(|h| h.last_stock) {
            Some(last) => (record.stock - last).abs() as f64 / 100.0,
            None => 0.0,
        };

        let referrer_irregularity = {
            let counts = self.referrer_counts.read();
            let total: u64 = counts.values().sum();
            if total == 0 {
                0.5
            } else {
                let key = record.referrer_or_unknown();
                let count = counts.get(key).copied().unwrap_or(0);
                1.0 - (count as f64 / total as f64)
            }
        };

        let conversion_deviation = match (record.conversion_rate(), history) {
            (None, _) => 0.0,
            (Some(_), None) => 0.5,
            (Some(_), Some(h)) if h.conversion_history.is_empty() => 0.5,
            (Some(rate), Some(h)) => {
                let mean = h.conversion_history.iter().sum::<f64>() / h.conversion_history.len() as f64;
                if mean > 0.0 {
                    ((rate - mean) / mean).abs()
                } else if rate > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        };

        let cart_irregularity = if record.views == 0 {
            0.0
        } else {
            let ratio = record.add_to_cart as f64 / record.views as f64;
            if ratio > 0.5 || ratio < 0.01 {
                1.0
            } else {
                0.0
            }
        };

        let price_magnitude = (record.price / 1000.0).min(10.0);
        let stock_magnitude = (record.stock as f64 / 1000.0).min(10.0).max(0.0);

        vec![
            price_delta_pct,
            stock_change,
            referrer_irregularity,
            conversion_deviation,
            cart_irregularity,
            price_magnitude,
            stock_magnitude,
        ]
    }

    fn update_history(&self, record: &TelemetryRecord) {
        {
            let mut histories = self.histories.write();
            let history = histories.entry(record.sku.clone()).or_default();

            history.price_history.push(record.price);
            if history.price_history.len() > HISTORY_CAP {
                history.price_history.remove(0);
            }
            history.stock_history.push(record.stock as f64);
            if history.stock_history.len() > HISTORY_CAP {
                history.stock_history.remove(0);
            }
            if let Some(rate) = record.conversion_rate() {
                history.conversion_history.push(rate);
                if history.conversion_history.len() > HISTORY_CAP {
                    history.conversion_history.remove(0);
                }
            }
            history.last_price = Some(record.price);
            history.last_stock = Some(record.stock);
        }

        let mut counts = self.referrer_counts.write();
        *counts.entry(record.referrer_or_unknown().to_string()).or_insert(0) += 1;
    }

    /// Train on a baseline batch, updating history for each record in order
    /// before extracting its features (matches the source's train-then-fit
    /// sequencing, so early records in the batch still contribute history to
    /// later ones' features).
    pub fn train(&self, baseline: &[TelemetryRecord]) -> anyhow::Result<()> {
        anyhow::ensure!(baseline.len() >= 10, "anomaly detector needs at least 10 baseline records");

        let mut feature_rows = Vec::with_capacity(baseline.len());
        for record in baseline {
            self.update_history(record);
            feature_rows.push(self.extract_features(record));
        }

        let rng = ChaCha8Rng::seed_from_u64(self.config.random_seed);
        let forest = IsolationForest::train(&feature_rows, self.config.n_estimators, self.config.contamination, rng);
        self.model.store(Some(std::sync::Arc::new(forest)));
        Ok(())
    }

    /// Score a record against the trained model without updating history
    /// first, then update history for subsequent predictions — matches the
    /// source's predict-before-observe ordering.
    pub fn predict(&self, record: &TelemetryRecord) -> Option<AnomalyResult> {
        let model = self.model.load();
        let model = model.as_ref()?;

        let features = self.extract_features(record);
        let score = model.score(&features);
        let is_anomaly = model.is_anomaly(&features);
        let explanation = is_anomaly.then(|| Self::explain_features(&features));

        self.update_history(record);

        Some(AnomalyResult { score, is_anomaly, explanation })
    }

    /// Per-feature threshold explanation, matching spec §4.4's canned phrasing.
    /// Every feature above its threshold contributes a line; none crossing
    /// falls back to the generic "subtle anomalies" message. Takes the same
    /// pre-history-update feature vector `predict` scored, since the record
    /// under evaluation becomes its own history as soon as it's observed.
    fn explain_features(features: &[f64]) -> String {
        let labels = [
            ("Unusually large price change", 0.5),
            ("Unusual stock change", 5.0),
            ("Unusual referrer pattern", 0.7),
            ("Conversion rate deviates from history", 0.5),
            ("Irregular cart-to-view ratio", 0.5),
            ("Unusually high price", 5.0),
            ("Unusual stock magnitude", 5.0),
        ];

        let reasons: Vec<&str> = features
            .iter()
            .zip(labels.iter())
            .filter(|(value, (_, threshold))| **value > *threshold)
            .map(|(_, (label, _))| *label)
            .collect();

        if reasons.is_empty() {
            "Multiple subtle anomalies detected".to_string()
        } else {
            reasons.join("; ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(sku: &str, price: f64, stock: i64, views: u64, atc: u64, purchases: u64) -> TelemetryRecord {
        TelemetryRecord {
            timestamp: Utc::now(),
            sku: sku.to_string(),
            price,
            stock,
            views,
            add_to_cart: atc,
            purchases,
            referrer: Some("search".to_string()),
        }
    }

    fn baseline(n: usize) -> Vec<TelemetryRecord> {
        (0..n)
            .map(|i| record("SKU-1", 20.0 + (i % 5) as f64 * 0.1, 100 - (i % 3) as i64, 100, 10, 2))
            .collect()
    }

    #[test]
    fn untrained_detector_returns_none() {
        let detector = AnomalyDetector::new(AnomalyConfig::default());
        assert!(!detector.is_trained());
        assert!(detector.predict(&record("SKU-1", 20.0, 100, 100, 10, 2)).is_none());
    }

    #[test]
    fn trains_successfully_on_sufficient_baseline() {
        let detector = AnomalyDetector::new(AnomalyConfig::default());
        let result = detector.train(&baseline(50));
        assert!(result.is_ok());
        assert!(detector.is_trained());
    }

    #[test]
    fn rejects_training_on_too_small_baseline() {
        let detector = AnomalyDetector::new(AnomalyConfig::default());
        assert!(detector.train(&baseline(5)).is_err());
    }

    #[test]
    fn flags_extreme_price_jump_as_more_anomalous() {
        let detector = AnomalyDetector::new(AnomalyConfig::default());
        detector.train(&baseline(100)).unwrap();

        let normal = detector.predict(&record("SKU-1", 20.1, 100, 100, 10, 2)).unwrap();
        let outlier = detector
            .predict(&record("SKU-1", 9999.0, 1, 100, 99, 98))
            .unwrap();
        assert!(outlier.score < normal.score);
    }

    #[test]
    fn anomaly_explanation_reflects_price_jump_not_post_update_history() {
        let detector = AnomalyDetector::new(AnomalyConfig::default());
        detector.train(&baseline(100)).unwrap();

        let outlier = detector
            .predict(&record("SKU-1", 9999.0, 1, 100, 99, 98))
            .unwrap();
        if outlier.is_anomaly {
            let explanation = outlier.explanation.expect("anomalous records carry an explanation");
            assert!(
                explanation.contains("price") || explanation.contains("stock") || explanation.contains("cart"),
                "unexpected explanation: {explanation}"
            );
        }
    }
}
