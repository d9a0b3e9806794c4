//! # Aggregation Tree Module / 聚合树模块
//!
//! A process-scoped registry of suites and cases that mirrors the runner tree
//! and tracks timing plus pass/fail status. One registry is created per run
//! and handed to the tree builder by reference.
//!
//! Records are memoized by name: registering an existing name returns the
//! existing record, so several runner nodes may report into the same suite or
//! case. A case owned by several runner leaves starts with the first of them
//! and finishes with the last.
//!
//! 按运行构建的进程级套件和用例注册表，镜像运行树并跟踪时间和通过/失败状态。
//! 记录按名称记忆化：同名注册返回已有记录。

mod node;
mod snapshot;

pub use node::{
    CaseId, CaseState, FailureKind, StepGroupId, StepStatus, SuiteId, SuiteState, TestCaseLog,
    TestStatus, TestStepGroup, TestStepLog, TestSuiteLog,
};
pub use snapshot::{CaseSnapshot, LogEntry, LogNode, SuiteSnapshot, SuiteSummary};

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use crate::core::error::{Result, SchedulerError};
use node::LogChild;

/// Step group under which invoker failures are recorded.
pub const INVOCATION_STEP_GROUP: &str = "invocation";

#[derive(Debug, Default)]
struct LogArena {
    suites: Vec<TestSuiteLog>,
    cases: Vec<TestCaseLog>,
    suite_names: HashMap<String, SuiteId>,
    case_names: HashMap<String, CaseId>,
}

/// Registry of every suite and case of one run.
/// 一次运行中所有套件和用例的注册表。
#[derive(Debug, Default)]
pub struct LogRegistry {
    arena: Mutex<LogArena>,
}

impl LogArena {
    fn suite(&self, id: SuiteId) -> Result<&TestSuiteLog> {
        self.suites.get(id.0).ok_or(SchedulerError::UnknownNode(id.0))
    }

    fn suite_mut(&mut self, id: SuiteId) -> Result<&mut TestSuiteLog> {
        self.suites
            .get_mut(id.0)
            .ok_or(SchedulerError::UnknownNode(id.0))
    }

    fn case(&self, id: CaseId) -> Result<&TestCaseLog> {
        self.cases.get(id.0).ok_or(SchedulerError::UnknownNode(id.0))
    }

    fn case_mut(&mut self, id: CaseId) -> Result<&mut TestCaseLog> {
        self.cases
            .get_mut(id.0)
            .ok_or(SchedulerError::UnknownNode(id.0))
    }

    /// Starts `id` and every not-yet-running ancestor suite, outermost first.
    fn ensure_running(&mut self, id: SuiteId) -> Result<()> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let suite = self.suite(current)?;
            if !matches!(suite.state, SuiteState::New | SuiteState::UnderConstruction) {
                break;
            }
            chain.push(current);
            cursor = suite.parent;
        }
        for suite in chain.into_iter().rev() {
            self.suite_mut(suite)?.start()?;
        }
        Ok(())
    }

    /// Propagates one finished child into `parent`, finishing suites upward
    /// while their pending counters reach zero.
    fn propagate_finish(&mut self, mut parent: Option<SuiteId>, finished: &mut Vec<SuiteId>) -> Result<()> {
        while let Some(id) = parent {
            let suite = self.suite_mut(id)?;
            if !suite.child_finished()? {
                break;
            }
            suite.finish()?;
            debug!(suite = %suite.name, "suite finished");
            finished.push(id);
            parent = suite.parent;
        }
        Ok(())
    }

    fn status_of(&self, child: LogChild) -> TestStatus {
        match child {
            LogChild::Case(id) => self.cases[id.0].status(),
            LogChild::Suite(id) => self.suite_status(id),
        }
    }

    fn suite_status(&self, id: SuiteId) -> TestStatus {
        let suite = &self.suites[id.0];
        let worst = suite
            .children
            .iter()
            .map(|child| self.status_of(*child))
            .min();
        match (worst, suite.state) {
            (Some(status), _) => status,
            (None, SuiteState::Finished) => TestStatus::Passed,
            (None, SuiteState::Running) => TestStatus::Running,
            (None, _) => TestStatus::NotRun,
        }
    }

    fn snapshot_child(&self, child: LogChild) -> LogEntry {
        match child {
            LogChild::Case(id) => {
                let case = &self.cases[id.0];
                LogEntry::Case(CaseSnapshot {
                    name: case.name.clone(),
                    test_class: case.test_class.clone(),
                    ignored: case.ignored,
                    state: case.state,
                    status: case.status(),
                    started_at: case.started_at,
                    finished_at: case.finished_at,
                    step_groups: case.step_groups.clone(),
                    errors: case.errors.clone(),
                })
            }
            LogChild::Suite(id) => LogEntry::Suite(self.snapshot_suite(id)),
        }
    }

    fn snapshot_suite(&self, id: SuiteId) -> SuiteSnapshot {
        let suite = &self.suites[id.0];
        SuiteSnapshot {
            name: suite.name.clone(),
            state: suite.state,
            status: self.suite_status(id),
            started_at: suite.started_at,
            finished_at: suite.finished_at,
            children: suite
                .children
                .iter()
                .map(|c| self.snapshot_child(*c))
                .collect(),
        }
    }
}

impl LogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the suite registered under `name`, creating it below `parent`
    /// on first use. An existing suite keeps its original parent.
    pub fn suite(&self, name: &str, parent: Option<SuiteId>) -> Result<SuiteId> {
        let mut arena = self.arena.lock();
        if let Some(id) = arena.suite_names.get(name).copied() {
            return Ok(id);
        }
        let id = SuiteId(arena.suites.len());
        if let Some(parent) = parent {
            arena.suite_mut(parent)?.add_child(LogChild::Suite(id))?;
        }
        arena.suites.push(TestSuiteLog::new(name.to_string(), parent));
        arena.suite_names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Links a parentless suite below `parent`. Suites that already have a
    /// parent keep it.
    pub fn adopt(&self, child: SuiteId, parent: SuiteId) -> Result<()> {
        let mut arena = self.arena.lock();
        if arena.suite(child)?.parent.is_some() || child == parent {
            return Ok(());
        }
        arena.suite_mut(parent)?.add_child(LogChild::Suite(child))?;
        arena.suite_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Returns the case registered under `name`, creating it inside `suite`
    /// on first use. Every call adds one owner to the case.
    pub fn case(&self, name: &str, suite: SuiteId) -> Result<CaseId> {
        let mut arena = self.arena.lock();
        let existing = arena.case_names.get(name).copied();
        let id = match existing {
            Some(id) => id,
            None => {
                let id = CaseId(arena.cases.len());
                arena.suite_mut(suite)?.add_child(LogChild::Case(id))?;
                arena.cases.push(TestCaseLog::new(name.to_string(), suite));
                arena.case_names.insert(name.to_string(), id);
                id
            }
        };
        arena.case_mut(id)?.owners += 1;
        Ok(id)
    }

    pub fn set_ignored(&self, case: CaseId, ignored: bool) -> Result<()> {
        self.arena.lock().case_mut(case)?.ignored = ignored;
        Ok(())
    }

    pub fn set_test_class(&self, case: CaseId, class: &str) -> Result<()> {
        self.arena.lock().case_mut(case)?.test_class = Some(class.to_string());
        Ok(())
    }

    /// Starts a suite and its ancestors if they are not running yet.
    pub fn ensure_suite_running(&self, id: SuiteId) -> Result<()> {
        self.arena.lock().ensure_running(id)
    }

    /// Starts the case for one of its owners; the first owner flips it to
    /// `Running`.
    pub fn start_case(&self, id: CaseId) -> Result<()> {
        let mut arena = self.arena.lock();
        let suite = arena.case(id)?.suite;
        arena.ensure_running(suite)?;
        let case = arena.case_mut(id)?;
        if case.state == CaseState::New {
            case.start()?;
        } else if case.state == CaseState::Finished {
            return Err(SchedulerError::transition(
                &case.name,
                case.state,
                CaseState::Running,
            ));
        }
        Ok(())
    }

    /// Finishes the case for one of its owners, recording `failure` if the
    /// invocation failed. Returns the suites that finished as a consequence,
    /// innermost first.
    pub fn finish_case(&self, id: CaseId, failure: Option<(FailureKind, String)>) -> Result<Vec<SuiteId>> {
        let mut arena = self.arena.lock();
        let case = arena.case_mut(id)?;
        if let Some((kind, message)) = failure {
            let step_name = case.name.clone();
            case.errors.push(message.clone());
            case.step_groups.push(TestStepGroup {
                name: INVOCATION_STEP_GROUP.to_string(),
                steps: vec![TestStepLog {
                    name: step_name,
                    status: StepStatus::Failed(kind),
                    message: Some(message),
                    time: Utc::now(),
                }],
            });
        }
        case.finished_owners += 1;
        let mut finished = Vec::new();
        if case.finished_owners < case.owners {
            return Ok(finished);
        }
        case.finish()?;
        let parent = Some(case.suite);
        arena.propagate_finish(parent, &mut finished)?;
        Ok(finished)
    }

    /// Finishes a running suite that has no pending children. A no-op for
    /// suites that are not in that condition.
    pub fn finish_empty_suite(&self, id: SuiteId) -> Result<Vec<SuiteId>> {
        let mut arena = self.arena.lock();
        let suite = arena.suite_mut(id)?;
        let mut finished = Vec::new();
        if suite.state != SuiteState::Running || suite.pending != 0 {
            return Ok(finished);
        }
        suite.finish()?;
        finished.push(id);
        let parent = suite.parent;
        arena.propagate_finish(parent, &mut finished)?;
        Ok(finished)
    }

    pub fn add_step_group(&self, case: CaseId, name: &str) -> Result<StepGroupId> {
        let mut arena = self.arena.lock();
        let record = arena.case_mut(case)?;
        record.step_groups.push(TestStepGroup {
            name: name.to_string(),
            steps: Vec::new(),
        });
        Ok(StepGroupId {
            case,
            index: record.step_groups.len() - 1,
        })
    }

    pub fn add_step(
        &self,
        group: StepGroupId,
        name: &str,
        status: StepStatus,
        message: Option<String>,
    ) -> Result<()> {
        let mut arena = self.arena.lock();
        let record = arena.case_mut(group.case)?;
        let steps = record
            .step_groups
            .get_mut(group.index)
            .ok_or(SchedulerError::UnknownNode(group.index))?;
        steps.steps.push(TestStepLog {
            name: name.to_string(),
            status,
            message,
            time: Utc::now(),
        });
        Ok(())
    }

    pub fn case_status(&self, id: CaseId) -> Result<TestStatus> {
        Ok(self.arena.lock().case(id)?.status())
    }

    pub fn case_state(&self, id: CaseId) -> Result<CaseState> {
        Ok(self.arena.lock().case(id)?.state)
    }

    pub fn case_name(&self, id: CaseId) -> Result<String> {
        Ok(self.arena.lock().case(id)?.name.clone())
    }

    /// Worst status among the suite's children, recursively.
    pub fn suite_status(&self, id: SuiteId) -> Result<TestStatus> {
        let arena = self.arena.lock();
        arena.suite(id)?;
        Ok(arena.suite_status(id))
    }

    pub fn suite_state(&self, id: SuiteId) -> Result<SuiteState> {
        Ok(self.arena.lock().suite(id)?.state)
    }

    pub fn suite_pending(&self, id: SuiteId) -> Result<usize> {
        Ok(self.arena.lock().suite(id)?.pending)
    }

    pub fn find_suite(&self, name: &str) -> Option<SuiteId> {
        self.arena.lock().suite_names.get(name).copied()
    }

    pub fn find_case(&self, name: &str) -> Option<CaseId> {
        self.arena.lock().case_names.get(name).copied()
    }

    pub fn suite_count(&self) -> usize {
        self.arena.lock().suites.len()
    }

    pub fn case_count(&self) -> usize {
        self.arena.lock().cases.len()
    }

    /// Snapshot of one suite and everything below it.
    pub fn snapshot_suite(&self, id: SuiteId) -> Result<SuiteSnapshot> {
        let arena = self.arena.lock();
        arena.suite(id)?;
        Ok(arena.snapshot_suite(id))
    }

    /// Snapshot of every parentless suite, in registration order.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        let arena = self.arena.lock();
        arena
            .suites
            .iter()
            .enumerate()
            .filter(|(_, suite)| suite.parent.is_none())
            .map(|(index, _)| LogEntry::Suite(arena.snapshot_suite(SuiteId(index))))
            .collect()
    }
}
