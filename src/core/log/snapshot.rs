//! Owned, serializable views of the aggregation tree.
//!
//! 聚合树的自有、可序列化视图。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::node::{CaseState, SuiteState, TestStatus, TestStepGroup};

/// Capabilities shared by suites and cases.
/// 套件和用例共享的能力。
pub trait LogNode {
    fn name(&self) -> &str;
    fn status(&self) -> TestStatus;
    fn starting_time(&self) -> Option<DateTime<Utc>>;
    fn finishing_time(&self) -> Option<DateTime<Utc>>;

    fn is_failed(&self) -> bool {
        self.status().is_failure()
    }

    fn duration(&self) -> Option<Duration> {
        let (start, end) = (self.starting_time()?, self.finishing_time()?);
        (end - start).to_std().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSnapshot {
    pub name: String,
    pub test_class: Option<String>,
    pub ignored: bool,
    pub state: CaseState,
    pub status: TestStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub step_groups: Vec<TestStepGroup>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteSnapshot {
    pub name: String,
    pub state: SuiteState,
    pub status: TestStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub children: Vec<LogEntry>,
}

/// A node of the snapshot tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Suite(SuiteSnapshot),
    Case(CaseSnapshot),
}

impl LogNode for CaseSnapshot {
    fn name(&self) -> &str {
        &self.name
    }
    fn status(&self) -> TestStatus {
        self.status
    }
    fn starting_time(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
    fn finishing_time(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }
}

impl LogNode for SuiteSnapshot {
    fn name(&self) -> &str {
        &self.name
    }
    fn status(&self) -> TestStatus {
        self.status
    }
    fn starting_time(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
    fn finishing_time(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }
}

impl LogNode for LogEntry {
    fn name(&self) -> &str {
        match self {
            LogEntry::Suite(suite) => suite.name(),
            LogEntry::Case(case) => case.name(),
        }
    }
    fn status(&self) -> TestStatus {
        match self {
            LogEntry::Suite(suite) => suite.status(),
            LogEntry::Case(case) => case.status(),
        }
    }
    fn starting_time(&self) -> Option<DateTime<Utc>> {
        match self {
            LogEntry::Suite(suite) => suite.starting_time(),
            LogEntry::Case(case) => case.starting_time(),
        }
    }
    fn finishing_time(&self) -> Option<DateTime<Utc>> {
        match self {
            LogEntry::Suite(suite) => suite.finishing_time(),
            LogEntry::Case(case) => case.finishing_time(),
        }
    }
}

/// Pass/fail/ignored counts over every case below a node.
/// 节点下所有用例的通过/失败/忽略计数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub ignored: usize,
    pub not_run: usize,
}

impl SuiteSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errors + self.ignored + self.not_run
    }

    pub fn success(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }

    fn record(&mut self, status: TestStatus) {
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Error => self.errors += 1,
            TestStatus::Ignored => self.ignored += 1,
            TestStatus::Running | TestStatus::NotRun => self.not_run += 1,
        }
    }

    /// Summarizes a forest of entries.
    pub fn of(entries: &[LogEntry]) -> Self {
        let mut summary = SuiteSummary::default();
        for entry in entries {
            summary.add(entry);
        }
        summary
    }

    fn add(&mut self, entry: &LogEntry) {
        match entry {
            LogEntry::Case(case) => self.record(case.status),
            LogEntry::Suite(suite) => suite.children.iter().for_each(|child| self.add(child)),
        }
    }
}

impl SuiteSnapshot {
    pub fn summary(&self) -> SuiteSummary {
        SuiteSummary::of(&self.children)
    }
}

impl LogEntry {
    /// Depth-first list of every case below (and including) this entry.
    pub fn cases(&self) -> Vec<&CaseSnapshot> {
        let mut out = Vec::new();
        self.collect_cases(&mut out);
        out
    }

    fn collect_cases<'a>(&'a self, out: &mut Vec<&'a CaseSnapshot>) {
        match self {
            LogEntry::Case(case) => out.push(case),
            LogEntry::Suite(suite) => suite.children.iter().for_each(|c| c.collect_cases(out)),
        }
    }
}
