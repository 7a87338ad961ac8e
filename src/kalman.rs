//! Kalman Conversion Filter — a scalar Kalman filter tracking each SKU's
//! conversion rate and flagging observations that deviate from the tracked
//! estimate (spec §4.3).
//!
//! One `(estimate, uncertainty)` pair per SKU, guarded by a single
//! `parking_lot::RwLock` over the map (teacher convention, see
//! `route_quality::baseline::BaselineCalculator`). Unlike the Python source
//! this is grounded on, the standard deviation used for the z-score is
//! floored at `sqrt(0.01)` so an under-observed SKU can't produce an
//! arbitrarily large deviation score from noise alone.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::KalmanConfig;
use crate::models::Severity;

const MIN_STD_DEV: f64 = 0.1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KalmanState {
    pub estimate: f64,
    pub uncertainty: f64,
}

/// A single conversion-rate observation evaluated against the filter's
/// current estimate, before the estimate is updated with this observation.
#[derive(Debug, Clone, Copy)]
pub struct DeviationResult {
    pub sku_known: bool,
    pub observed_rate: f64,
    pub predicted_rate: f64,
    pub z_score: f64,
    pub is_deviation: bool,
}

impl DeviationResult {
    pub fn severity(&self) -> Severity {
        let z = self.z_score.abs();
        if z > 3.0 {
            Severity::Critical
        } else if z > 2.5 {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

pub struct ConversionKalmanFilter {
    config: KalmanConfig,
    states: RwLock<HashMap<String, KalmanState>>,
}

impl ConversionKalmanFilter {
    pub fn new(config: KalmanConfig) -> Self {
        Self {
            config,
            states: RwLock::new(HashMap::new()),
        }
    }

    fn initial_state(&self) -> KalmanState {
        KalmanState {
            estimate: self.config.initial_estimate,
            uncertainty: self.config.initial_uncertainty,
        }
    }

    /// Push one SKU's `(views, purchases)` observation through predict+update.
    /// Returns the estimate *after* incorporating this observation.
    pub fn update(&self, sku: &str, views: u64, purchases: u64) -> KalmanState {
        if views == 0 {
            return self.states.read().get(sku).copied().unwrap_or_else(|| self.initial_state());
        }

        let measurement = purchases as f64 / views as f64;
        let mut states = self.states.write();
        let state = states.entry(sku.to_string()).or_insert_with(|| KalmanState {
            estimate: self.config.initial_estimate,
            uncertainty: self.config.initial_uncertainty,
        });

        // Predict.
        let predicted_uncertainty = state.uncertainty + self.config.process_variance;

        // Larger samples get a proportionally smaller effective measurement
        // variance — a single purchase out of 10000 views shouldn't move the
        // estimate as much as one out of 10.
        let effective_measurement_variance = self.config.measurement_variance / (views as f64).sqrt();

        let kalman_gain = predicted_uncertainty / (predicted_uncertainty + effective_measurement_variance);
        let new_estimate = state.estimate + kalman_gain * (measurement - state.estimate);
        let new_uncertainty = (1.0 - kalman_gain) * predicted_uncertainty;

        state.estimate = new_estimate.clamp(0.0, 1.0);
        state.uncertainty = new_uncertainty;
        *state
    }

    /// The filter's current estimate for a SKU without observing anything new.
    pub fn predict(&self, sku: &str) -> KalmanState {
        self.states.read().get(sku).copied().unwrap_or_else(|| self.initial_state())
    }

    /// Evaluate an observation's deviation z-score against the filter's
    /// *current* estimate, then update the filter with that observation.
    pub fn detect_deviation(&self, sku: &str, views: u64, purchases: u64) -> DeviationResult {
        if views == 0 {
            return DeviationResult {
                sku_known: self.states.read().contains_key(sku),
                observed_rate: 0.0,
                predicted_rate: self.predict(sku).estimate,
                z_score: 0.0,
                is_deviation: false,
            };
        }

        let sku_known = self.states.read().contains_key(sku);
        let before = self.predict(sku);
        let observed_rate = purchases as f64 / views as f64;
        let std_dev = before.uncertainty.sqrt().max(MIN_STD_DEV);
        let z_score = (observed_rate - before.estimate) / std_dev;

        self.update(sku, views, purchases);

        DeviationResult {
            sku_known,
            observed_rate,
            predicted_rate: before.estimate,
            z_score,
            is_deviation: z_score.abs() > self.config.threshold_sigma,
        }
    }

    pub fn get_all_estimates(&self) -> HashMap<String, KalmanState> {
        self.states.read().clone()
    }

    pub fn reset_sku(&self, sku: &str) {
        self.states.write().remove(sku);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_toward_steady_observations() {
        let filter = ConversionKalmanFilter::new(KalmanConfig::default());
        let mut last = filter.initial_state().estimate;
        for _ in 0..50 {
            let state = filter.update("SKU-1", 1000, 100);
            last = state.estimate;
        }
        assert!((last - 0.1).abs() < 0.02, "estimate {} should approach 0.1", last);
    }

    #[test]
    fn zero_views_leaves_estimate_unchanged() {
        let filter = ConversionKalmanFilter::new(KalmanConfig::default());
        filter.update("SKU-2", 1000, 50);
        let before = filter.predict("SKU-2");
        filter.update("SKU-2", 0, 0);
        let after = filter.predict("SKU-2");
        assert_eq!(before.estimate, after.estimate);
    }

    #[test]
    fn large_deviation_flagged_critical() {
        let filter = ConversionKalmanFilter::new(KalmanConfig::default());
        for _ in 0..30 {
            filter.update("SKU-3", 1000, 50);
        }
        let result = filter.detect_deviation("SKU-3", 1000, 950);
        assert!(result.is_deviation);
        assert_eq!(result.severity(), Severity::Critical);
    }

    #[test]
    fn stable_rate_is_not_a_deviation() {
        let filter = ConversionKalmanFilter::new(KalmanConfig::default());
        for _ in 0..30 {
            filter.update("SKU-4", 1000, 50);
        }
        let result = filter.detect_deviation("SKU-4", 1000, 52);
        assert!(!result.is_deviation);
    }

    #[test]
    fn reset_sku_drops_state() {
        let filter = ConversionKalmanFilter::new(KalmanConfig::default());
        filter.update("SKU-5", 1000, 50);
        assert!(filter.get_all_estimates().contains_key("SKU-5"));
        filter.reset_sku("SKU-5");
        assert!(!filter.get_all_estimates().contains_key("SKU-5"));
    }
}
