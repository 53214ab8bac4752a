//! Destinations for flat metric mappings emitted during a cycle.
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;

use crate::error::{LifecycleError, Result};

pub trait MetricsSink: Send + Sync {
    /// Record `metrics` under `scope` (e.g. "selection", "promotion").
    fn log_metrics(&self, scope: &str, metrics: &BTreeMap<String, f64>) -> Result<()>;
}

/// Appends one JSON object per call to a file (JSON lines).
#[derive(Debug)]
pub struct JsonFileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonFileSink {
    fn log_metrics(&self, scope: &str, metrics: &BTreeMap<String, f64>) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| LifecycleError::Io(std::io::Error::other("metrics sink lock poisoned")))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let record = json!({
            "scope": scope,
            "timestamp": Utc::now().to_rfc3339(),
            "metrics": metrics,
        });
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", record)?;
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(String, BTreeMap<String, f64>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, BTreeMap<String, f64>)> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// The most recent record for `scope`.
    pub fn last(&self, scope: &str) -> Option<BTreeMap<String, f64>> {
        self.records()
            .into_iter()
            .rev()
            .find(|(s, _)| s == scope)
            .map(|(_, m)| m)
    }
}

impl MetricsSink for MemorySink {
    fn log_metrics(&self, scope: &str, metrics: &BTreeMap<String, f64>) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| LifecycleError::Io(std::io::Error::other("metrics sink lock poisoned")))?
            .push((scope.to_string(), metrics.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("out").join("metrics.jsonl"));
        let mut metrics = BTreeMap::new();
        metrics.insert("roc_auc".to_string(), 0.9);
        sink.log_metrics("selection", &metrics).unwrap();
        sink.log_metrics("promotion", &metrics).unwrap();

        let content = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["scope"], "promotion");
        assert_eq!(lines[0]["metrics"]["roc_auc"], 0.9);
    }

    #[test]
    fn memory_sink_returns_latest_record_per_scope() {
        let sink = MemorySink::new();
        let mut metrics = BTreeMap::new();
        metrics.insert("a".to_string(), 1.0);
        sink.log_metrics("x", &metrics).unwrap();
        metrics.insert("a".to_string(), 2.0);
        sink.log_metrics("x", &metrics).unwrap();
        assert_eq!(sink.last("x").unwrap()["a"], 2.0);
        assert!(sink.last("y").is_none());
    }
}
