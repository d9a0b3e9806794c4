//! State machines of the aggregation tree: suites, cases, step groups and
//! steps, plus the ordered status enumeration used to aggregate them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::{Result, SchedulerError};

/// Handle of a suite in a [`LogRegistry`](super::LogRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SuiteId(pub(crate) usize);

/// Handle of a case in a [`LogRegistry`](super::LogRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseId(pub(crate) usize);

/// Handle of a step group inside a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepGroupId {
    pub(crate) case: CaseId,
    pub(crate) index: usize,
}

impl StepGroupId {
    pub fn case(&self) -> CaseId {
        self.case
    }
}

/// Aggregated status, declared from worst to best.
/// The derived ordering is what "worst child wins" aggregation relies on.
///
/// 聚合状态，按从最差到最好的顺序声明。派生的排序用于“最差子节点决定”的聚合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// The invoker raised an unexpected error or panicked.
    Error,
    /// An assertion inside the invoker failed.
    Failed,
    /// Still executing.
    Running,
    /// Never started.
    NotRun,
    /// Marked as ignored and failed.
    Ignored,
    Passed,
}

impl TestStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, TestStatus::Error | TestStatus::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            TestStatus::Error => "Error",
            TestStatus::Failed => "Failed",
            TestStatus::Running => "Running",
            TestStatus::NotRun => "Not Run",
            TestStatus::Ignored => "Ignored",
            TestStatus::Passed => "Passed",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a step (and therefore a case) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Failed,
    Error,
}

impl From<FailureKind> for TestStatus {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Failed => TestStatus::Failed,
            FailureKind::Error => TestStatus::Error,
        }
    }
}

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed(FailureKind),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStepLog {
    pub name: String,
    pub status: StepStatus,
    pub message: Option<String>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStepGroup {
    pub name: String,
    pub steps: Vec<TestStepLog>,
}

impl TestStepGroup {
    /// The first failing step of this group, if any.
    pub fn first_failure(&self) -> Option<FailureKind> {
        self.steps.iter().find_map(|step| match step.status {
            StepStatus::Failed(kind) => Some(kind),
            StepStatus::Passed => None,
        })
    }
}

/// Lifecycle of a case: `New -> Running -> Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    New,
    Running,
    Finished,
}

/// Lifecycle of a suite: `New -> UnderConstruction -> Running -> Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteState {
    New,
    UnderConstruction,
    Running,
    Finished,
}

/// A child slot of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogChild {
    Suite(SuiteId),
    Case(CaseId),
}

/// A test case record.
/// 测试用例记录。
#[derive(Debug, Clone)]
pub struct TestCaseLog {
    pub(crate) name: String,
    pub(crate) suite: SuiteId,
    pub(crate) test_class: Option<String>,
    pub(crate) ignored: bool,
    pub(crate) state: CaseState,
    /// Runner leaves mapped onto this record.
    pub(crate) owners: usize,
    pub(crate) finished_owners: usize,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) step_groups: Vec<TestStepGroup>,
    pub(crate) errors: Vec<String>,
}

impl TestCaseLog {
    pub(crate) fn new(name: String, suite: SuiteId) -> Self {
        Self {
            name,
            suite,
            test_class: None,
            ignored: false,
            state: CaseState::New,
            owners: 0,
            finished_owners: 0,
            started_at: None,
            finished_at: None,
            step_groups: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// `New -> Running`. Any other source state is a programming error.
    pub fn start(&mut self) -> Result<()> {
        if self.state != CaseState::New {
            return Err(SchedulerError::transition(
                &self.name,
                self.state,
                CaseState::Running,
            ));
        }
        self.state = CaseState::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// `Running -> Finished`. Any other source state is a programming error.
    pub fn finish(&mut self) -> Result<()> {
        if self.state != CaseState::Running {
            return Err(SchedulerError::transition(
                &self.name,
                self.state,
                CaseState::Finished,
            ));
        }
        self.state = CaseState::Finished;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CaseState {
        self.state
    }

    pub fn status(&self) -> TestStatus {
        match self.state {
            CaseState::New => TestStatus::NotRun,
            CaseState::Running => TestStatus::Running,
            CaseState::Finished => {
                let failure = self.step_groups.iter().find_map(TestStepGroup::first_failure);
                match (failure, self.ignored) {
                    (Some(_), true) => TestStatus::Ignored,
                    (Some(kind), false) => kind.into(),
                    (None, _) => TestStatus::Passed,
                }
            }
        }
    }
}

/// A test suite record.
/// 测试套件记录。
#[derive(Debug, Clone)]
pub struct TestSuiteLog {
    pub(crate) name: String,
    pub(crate) parent: Option<SuiteId>,
    pub(crate) children: Vec<LogChild>,
    pub(crate) pending: usize,
    pub(crate) state: SuiteState,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl TestSuiteLog {
    pub(crate) fn new(name: String, parent: Option<SuiteId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            pending: 0,
            state: SuiteState::New,
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn add_child(&mut self, child: LogChild) -> Result<()> {
        match self.state {
            SuiteState::Finished => {
                return Err(SchedulerError::transition(
                    &self.name,
                    self.state,
                    SuiteState::UnderConstruction,
                ));
            }
            SuiteState::New => self.state = SuiteState::UnderConstruction,
            SuiteState::UnderConstruction | SuiteState::Running => {}
        }
        self.children.push(child);
        self.pending += 1;
        Ok(())
    }

    /// `New | UnderConstruction -> Running`.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            SuiteState::New | SuiteState::UnderConstruction => {
                self.state = SuiteState::Running;
                self.started_at = Some(Utc::now());
                Ok(())
            }
            other => Err(SchedulerError::transition(
                &self.name,
                other,
                SuiteState::Running,
            )),
        }
    }

    /// Records one finished child; returns `true` once none are pending.
    pub(crate) fn child_finished(&mut self) -> Result<bool> {
        if self.pending == 0 {
            return Err(SchedulerError::transition(
                &self.name,
                self.state,
                SuiteState::Finished,
            ));
        }
        self.pending -= 1;
        Ok(self.pending == 0)
    }

    /// `Running -> Finished`, allowed only with no pending children.
    pub fn finish(&mut self) -> Result<()> {
        if self.state != SuiteState::Running || self.pending != 0 {
            return Err(SchedulerError::transition(
                &self.name,
                self.state,
                SuiteState::Finished,
            ));
        }
        self.state = SuiteState::Finished;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SuiteState {
        self.state
    }

    pub fn pending(&self) -> usize {
        self.pending
    }
}
