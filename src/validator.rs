//! Contract Validator — schema, semantic, and stateful per-SKU checks.
//!
//! Pipeline order matches spec §4.1: funnel invariants, range checks, the
//! stateful price-jump check against retained history, then timestamp
//! freshness. A record can accumulate multiple violations; nothing here
//! ever returns `Err` for a data-quality reason (spec §7) — malformed input
//! is itself represented as a `schema_error` violation.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::config::GuardrailConfig;
use crate::models::{Severity, TelemetryRecord, Violation, ViolationType};

const PRICE_HISTORY_CAP: usize = 100;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub violations: Vec<Violation>,
    pub normalized_record: Option<TelemetryRecord>,
}

impl ValidationResult {
    fn valid(record: TelemetryRecord) -> Self {
        Self {
            is_valid: true,
            violations: Vec::new(),
            normalized_record: Some(record),
        }
    }

    fn push(&mut self, sku: Option<String>, kind: ViolationType, reason: String, severity: Severity) {
        self.violations.push(Violation {
            timestamp: Utc::now(),
            sku,
            violation_type: kind,
            reason,
            severity,
        });
        self.is_valid = false;
    }
}

/// Validates telemetry records against the data contract, tracking a bounded
/// per-SKU price history to support the stateful price-jump check.
pub struct ContractValidator {
    price_jump_threshold: f64,
    max_price: f64,
    price_history: RwLock<HashMap<String, VecDeque<f64>>>,
}

impl ContractValidator {
    pub fn new(config: &GuardrailConfig) -> Self {
        Self {
            price_jump_threshold: config.price_jump_threshold,
            max_price: config.max_price,
            price_history: RwLock::new(HashMap::new()),
        }
    }

    /// Validate one record, normalizing price and checking it against the
    /// SKU's retained history. Mutates the SKU's price deque as a side effect
    /// (the history update happens regardless of whether the record is
    /// otherwise valid, matching the source's "always append" behavior).
    pub fn validate(&self, raw: &TelemetryRecord) -> ValidationResult {
        self.validate_at(raw, Utc::now())
    }

    /// Same as [`Self::validate`] with an explicit "now", for deterministic tests.
    pub fn validate_at(&self, raw: &TelemetryRecord, now: DateTime<Utc>) -> ValidationResult {
        let sku = raw.sku.clone();

        if sku.trim().is_empty() {
            let mut result = ValidationResult {
                is_valid: true,
                violations: Vec::new(),
                normalized_record: None,
            };
            result.push(
                None,
                ViolationType::SchemaError,
                "sku must be non-empty".to_string(),
                Severity::High,
            );
            return result;
        }

        let record = raw.clone().normalize();
        let mut result = ValidationResult::valid(record.clone());

        // Funnel invariants.
        if record.add_to_cart > record.views {
            result.push(
                Some(sku.clone()),
                ViolationType::SchemaError,
                format!(
                    "add_to_cart ({}) exceeds views ({})",
                    record.add_to_cart, record.views
                ),
                Severity::High,
            );
        }
        if record.purchases > record.add_to_cart {
            result.push(
                Some(sku.clone()),
                ViolationType::SchemaError,
                format!(
                    "purchases ({}) exceeds add_to_cart ({})",
                    record.purchases, record.add_to_cart
                ),
                Severity::High,
            );
        }

        // Range checks.
        if record.stock < 0 {
            result.push(
                Some(sku.clone()),
                ViolationType::NegativeStock,
                format!("Stock value is negative: {}", record.stock),
                Severity::High,
            );
        }
        if record.price <= 0.0 {
            result.push(
                Some(sku.clone()),
                ViolationType::UnitError,
                format!("Price {} is not positive", record.price),
                Severity::Critical,
            );
        } else if record.price > self.max_price {
            result.push(
                Some(sku.clone()),
                ViolationType::UnitError,
                format!(
                    "Price {} exceeds maximum threshold {} - possible unit error",
                    record.price, self.max_price
                ),
                Severity::Critical,
            );
        }

        // Stateful price-jump check, then history update.
        {
            let mut history = self.price_history.write();
            let deque = history.entry(sku.clone()).or_default();
            if let Some(&last_price) = deque.back() {
                if last_price > 0.0 {
                    let ratio = record.price / last_price;
                    if ratio > self.price_jump_threshold {
                        result.push(
                            Some(sku.clone()),
                            ViolationType::PriceJump,
                            format!(
                                "Price jumped from {} to {} ({:.2}x) - exceeds threshold {}x",
                                last_price, record.price, ratio, self.price_jump_threshold
                            ),
                            Severity::Critical,
                        );
                    } else if ratio < 1.0 / self.price_jump_threshold {
                        result.push(
                            Some(sku.clone()),
                            ViolationType::PriceJump,
                            format!(
                                "Price dropped from {} to {} ({:.2}x decrease) - exceeds threshold",
                                last_price,
                                record.price,
                                1.0 / ratio
                            ),
                            Severity::High,
                        );
                    }
                }
            }
            deque.push_back(record.price);
            while deque.len() > PRICE_HISTORY_CAP {
                deque.pop_front();
            }
        }

        // Timestamp freshness.
        let delta = now - record.timestamp;
        if delta > chrono::Duration::hours(24) {
            result.push(
                Some(sku.clone()),
                ViolationType::InvalidTimestamp,
                format!(
                    "Timestamp is {:.1} hours old - possible stale feed",
                    delta.num_seconds() as f64 / 3600.0
                ),
                Severity::Medium,
            );
        } else if delta < chrono::Duration::hours(-1) {
            result.push(
                Some(sku.clone()),
                ViolationType::InvalidTimestamp,
                format!(
                    "Timestamp is {:.1} hours in future - possible timezone error",
                    (-delta).num_seconds() as f64 / 3600.0
                ),
                Severity::Medium,
            );
        }

        if !result.is_valid {
            result.normalized_record = Some(record);
        }
        result
    }

    /// Current retained price history length for a SKU (test/introspection hook).
    pub fn history_len(&self, sku: &str) -> usize {
        self.price_history.read().get(sku).map(VecDeque::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sku: &str, price: f64, stock: i64, views: u64, atc: u64, purchases: u64) -> TelemetryRecord {
        TelemetryRecord {
            timestamp: Utc::now(),
            sku: sku.to_string(),
            price,
            stock,
            views,
            add_to_cart: atc,
            purchases,
            referrer: None,
        }
    }

    #[test]
    fn price_jump_flagged_as_critical() {
        let config = GuardrailConfig::default();
        let validator = ContractValidator::new(&config);

        let first = validator.validate(&record("SKU-1", 19.99, 100, 30, 3, 1));
        assert!(first.is_valid);

        // Stay under the 1000 cents-normalization cutoff: a raw price above it
        // would be divided by 100 before the jump check runs, collapsing this
        // back toward baseline instead of tripping the threshold.
        let second = validator.validate(&record("SKU-1", 500.0, 100, 30, 3, 1));
        assert!(!second.is_valid);
        assert_eq!(second.violations.len(), 1);
        assert_eq!(second.violations[0].violation_type, ViolationType::PriceJump);
        assert_eq!(second.violations[0].severity, Severity::Critical);
    }

    #[test]
    fn negative_stock_is_high_severity() {
        let config = GuardrailConfig::default();
        let validator = ContractValidator::new(&config);

        let result = validator.validate(&record("SKU-2", 50.0, -10, 30, 3, 0));
        assert!(!result.is_valid);
        assert!(result
            .violations
            .iter()
            .any(|v| v.violation_type == ViolationType::NegativeStock && v.severity == Severity::High));
    }

    #[test]
    fn unit_error_above_max_price() {
        let mut config = GuardrailConfig::default();
        config.max_price = 1000.0;
        let validator = ContractValidator::new(&config);

        let result = validator.validate(&record("SKU-3", 50_000.0, 10, 30, 3, 0));
        assert!(!result.is_valid);
        assert!(result
            .violations
            .iter()
            .any(|v| v.violation_type == ViolationType::UnitError && v.severity == Severity::Critical));
    }

    #[test]
    fn history_capped_at_100() {
        let config = GuardrailConfig::default();
        let validator = ContractValidator::new(&config);
        for i in 0..150 {
            validator.validate(&record("SKU-4", 10.0 + i as f64 * 0.01, 10, 30, 3, 0));
        }
        assert_eq!(validator.history_len("SKU-4"), 100);
    }

    #[test]
    fn stale_timestamp_flagged_medium() {
        let config = GuardrailConfig::default();
        let validator = ContractValidator::new(&config);
        let mut rec = record("SKU-5", 10.0, 10, 30, 3, 0);
        rec.timestamp = Utc::now() - chrono::Duration::hours(48);
        let result = validator.validate(&rec);
        assert!(result
            .violations
            .iter()
            .any(|v| v.violation_type == ViolationType::InvalidTimestamp && v.severity == Severity::Medium));
    }

    #[test]
    fn repeated_validation_without_shared_history_is_deterministic() {
        let config = GuardrailConfig::default();
        let validator_a = ContractValidator::new(&config);
        let validator_b = ContractValidator::new(&config);
        let rec = record("SKU-6", 42.0, 10, 30, 3, 0);
        let a = validator_a.validate(&rec);
        let b = validator_b.validate(&rec);
        assert_eq!(a.is_valid, b.is_valid);
        assert_eq!(a.violations.len(), b.violations.len());
    }
}
