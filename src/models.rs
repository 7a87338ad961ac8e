//! Shared data model: the telemetry record ingested by every engine and the
//! contract violations the validator produces from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity assigned to a violation or alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single e-commerce telemetry observation: one product, one moment.
///
/// `price` is always the normalized dollar value after ingest (see
/// [`TelemetryRecord::normalize`]) — callers on the wire send the raw value,
/// the HTTP boundary normalizes before any engine sees the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    pub sku: String,
    pub price: f64,
    pub stock: i64,
    pub views: u64,
    pub add_to_cart: u64,
    pub purchases: u64,
    #[serde(default)]
    pub referrer: Option<String>,
}

impl TelemetryRecord {
    /// Cents-to-dollars heuristic: a raw price above 1000 is assumed to be
    /// cents and divided by 100. Ambiguous by design (spec §9) — it also
    /// fires for genuine high-priced items, which is why `unit_error`
    /// re-checks the *normalized* value against `max_price` downstream.
    pub fn normalize(mut self) -> Self {
        if self.price > 1000.0 {
            self.price /= 100.0;
        }
        self
    }

    /// `purchases / views`, or `None` when there were no views to convert.
    pub fn conversion_rate(&self) -> Option<f64> {
        if self.views == 0 {
            None
        } else {
            Some(self.purchases as f64 / self.views as f64)
        }
    }

    pub fn referrer_or_unknown(&self) -> &str {
        self.referrer.as_deref().unwrap_or("unknown")
    }
}

/// The kind of contract violation a [`crate::validator::ContractValidator`] can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    SchemaError,
    NegativeStock,
    PriceJump,
    UnitError,
    InvalidTimestamp,
    MissingRequired,
    OutOfBounds,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::SchemaError => "schema_error",
            ViolationType::NegativeStock => "negative_stock",
            ViolationType::PriceJump => "price_jump",
            ViolationType::UnitError => "unit_error",
            ViolationType::InvalidTimestamp => "invalid_timestamp",
            ViolationType::MissingRequired => "missing_required",
            ViolationType::OutOfBounds => "out_of_bounds",
        }
    }

    /// Canned remediation text keyed by violation type (spec §4.5).
    pub fn suggested_fix(&self) -> &'static str {
        match self {
            ViolationType::NegativeStock => {
                "Fix data pipeline to ensure stock values are non-negative. Check for integer overflow or data corruption."
            }
            ViolationType::PriceJump => {
                "Verify price updates are correct. Check for unit conversion errors or data entry mistakes."
            }
            ViolationType::UnitError => {
                "Normalize price units (ensure consistent dollars/cents). Review data source configuration."
            }
            ViolationType::InvalidTimestamp => {
                "Check data feed freshness and timezone settings. Verify system clock synchronization."
            }
            ViolationType::SchemaError | ViolationType::MissingRequired => {
                "Validate data schema matches expected format. Check for missing or malformed fields."
            }
            ViolationType::OutOfBounds => "Review data quality and system configuration.",
        }
    }
}

/// One contract violation found for a record, appended to the violation archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub timestamp: DateTime<Utc>,
    pub sku: Option<String>,
    pub violation_type: ViolationType,
    pub reason: String,
    pub severity: Severity,
}
