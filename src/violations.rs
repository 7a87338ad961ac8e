//! Violation archive — an append-only CSV log of contract violations,
//! written once with a header and appended to thereafter (spec §6).
//!
//! No crate in the teacher's stack covers CSV; `csv` is a deliberate,
//! documented addition (see DESIGN.md) rather than a hand-rolled quoting
//! scheme, per the "never reinvent what a crate already does well" rule
//! this exercise follows for every other ambient concern.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use serde::Serialize;

use crate::models::Violation;

#[derive(Serialize)]
struct ViolationRow<'a> {
    timestamp: String,
    sku: &'a str,
    violation_type: &'a str,
    reason: &'a str,
    severity: &'a str,
}

pub struct ViolationLogger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ViolationLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn ensure_file_exists(&self) -> anyhow::Result<()> {
        if !self.path.exists() {
            let mut writer = csv::Writer::from_path(&self.path)
                .with_context(|| format!("creating violation archive {}", self.path.display()))?;
            writer.write_record(["timestamp", "sku", "violation_type", "reason", "severity"])?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn log_violation(&self, violation: &Violation) -> anyhow::Result<()> {
        self.log_violations(std::slice::from_ref(violation))
    }

    pub fn log_violations(&self, violations: &[Violation]) -> anyhow::Result<()> {
        if violations.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.lock().unwrap();
        self.ensure_file_exists()?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening violation archive {}", self.path.display()))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        for violation in violations {
            writer.serialize(ViolationRow {
                timestamp: violation.timestamp.to_rfc3339(),
                sku: violation.sku.as_deref().unwrap_or(""),
                violation_type: violation.violation_type.as_str(),
                reason: &violation.reason,
                severity: violation.severity.as_str(),
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, ViolationType};
    use chrono::Utc;

    fn violation(sku: &str) -> Violation {
        Violation {
            timestamp: Utc::now(),
            sku: Some(sku.to_string()),
            violation_type: ViolationType::PriceJump,
            reason: "price jumped 12x".to_string(),
            severity: Severity::Critical,
        }
    }

    #[test]
    fn creates_file_with_header_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("violations.csv");
        let logger = ViolationLogger::new(&path);

        logger.log_violation(&violation("SKU-1")).unwrap();
        logger.log_violation(&violation("SKU-2")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "timestamp,sku,violation_type,reason,severity");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("SKU-1"));
        assert!(lines[2].contains("SKU-2"));
    }

    #[test]
    fn bulk_log_writes_all_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("violations.csv");
        let logger = ViolationLogger::new(&path);

        logger
            .log_violations(&[violation("SKU-1"), violation("SKU-2"), violation("SKU-3")])
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 4);
    }
}
