//! Tunable configuration for the four engines and the alert manager.
//!
//! Loaded once at startup from an optional TOML file (`--config`, default
//! `config/default.toml` if present) with environment-variable overrides,
//! then shared read-only as `Arc<GuardrailConfig>` — mirrors the teacher's
//! `RouteQualityConfig` (serde-derived, `Default` impl carrying every
//! production default from the spec).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    pub alert_ttl_seconds: u64,
    pub price_jump_threshold: f64,
    pub max_price: f64,
    pub psi_threshold: f64,
    pub ks_threshold: f64,
    pub baseline_window: usize,
    pub kalman: KalmanConfig,
    pub anomaly: AnomalyConfig,
    pub violations_file: String,
    pub bind_addr: String,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            alert_ttl_seconds: 3600,
            price_jump_threshold: 10.0,
            max_price: 100_000.0,
            psi_threshold: 0.2,
            ks_threshold: 0.05,
            baseline_window: 1000,
            kalman: KalmanConfig::default(),
            anomaly: AnomalyConfig::default(),
            violations_file: "violations.csv".to_string(),
            bind_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    pub process_variance: f64,
    pub measurement_variance: f64,
    pub initial_estimate: f64,
    pub initial_uncertainty: f64,
    pub threshold_sigma: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            process_variance: 0.01,
            measurement_variance: 0.05,
            initial_estimate: 0.05,
            initial_uncertainty: 1.0,
            threshold_sigma: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub contamination: f64,
    pub n_estimators: usize,
    pub random_seed: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            n_estimators: 100,
            random_seed: 42,
        }
    }
}

impl GuardrailConfig {
    /// Load defaults, then overlay a TOML file if present, then environment
    /// variables prefixed `GUARDRAIL_` (e.g. `GUARDRAIL_BIND_ADDR`).
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            _ => GuardrailConfig::default(),
        };

        if let Ok(bind_addr) = std::env::var("GUARDRAIL_BIND_ADDR") {
            config.bind_addr = bind_addr;
        }
        if let Ok(violations_file) = std::env::var("GUARDRAIL_VIOLATIONS_FILE") {
            config.violations_file = violations_file;
        }
        if let Ok(v) = std::env::var("GUARDRAIL_ALERT_TTL_SECONDS") {
            config.alert_ttl_seconds = v.parse().context("GUARDRAIL_ALERT_TTL_SECONDS")?;
        }

        Ok(config)
    }
}
