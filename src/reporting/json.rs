//! # JSON Reporting Module / JSON 报告模块
//!
//! Serializes the aggregation tree snapshot for machine consumption.
//!
//! 将聚合树快照序列化以供机器读取。

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::log::{LogEntry, SuiteSummary};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    pub generated_at: DateTime<Utc>,
    pub summary: SuiteSummary,
    pub entries: Vec<LogEntry>,
}

impl JsonReport {
    pub fn new(entries: Vec<LogEntry>) -> Self {
        Self {
            generated_at: Utc::now(),
            summary: SuiteSummary::of(&entries),
            entries,
        }
    }
}

pub fn generate_json_report(entries: &[LogEntry], output_path: &Path) -> Result<()> {
    let report = JsonReport::new(entries.to_vec());
    let content = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    fs::write(output_path, content)
        .with_context(|| format!("Failed to write JSON report: {}", output_path.display()))
}
