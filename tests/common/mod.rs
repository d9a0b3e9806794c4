// Shared test helpers for integration tests
#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use suite_scheduler::core::listener::{RunEvent, TestListener};
use suite_scheduler::core::log::TestStatus;
use suite_scheduler::core::tree::NodeId;
use suite_scheduler::core::{
    AssertionFailure, ExecutionPlan, FnInvoker, LogRegistry, RunnerTree, TestInvoker,
};
use suite_scheduler::scheduler::{FixedPoolSize, Scheduler, SchedulerConfig, Strategy};

pub fn new_tree() -> RunnerTree {
    RunnerTree::new(Arc::new(LogRegistry::new()))
}

pub fn passing() -> Arc<dyn TestInvoker> {
    Arc::new(FnInvoker::new("tests::passing", |_| Ok(())))
}

pub fn sleeping(millis: u64) -> Arc<dyn TestInvoker> {
    Arc::new(FnInvoker::new("tests::sleeping", move |_| {
        thread::sleep(Duration::from_millis(millis));
        Ok(())
    }))
}

pub fn failing(message: &'static str) -> Arc<dyn TestInvoker> {
    Arc::new(FnInvoker::new("tests::failing", move |_| {
        Err(AssertionFailure(message.to_string()).into())
    }))
}

pub fn erroring(message: &'static str) -> Arc<dyn TestInvoker> {
    Arc::new(FnInvoker::new("tests::erroring", move |_| {
        Err(anyhow::anyhow!(message))
    }))
}

pub fn panicking(message: &'static str) -> Arc<dyn TestInvoker> {
    Arc::new(FnInvoker::new("tests::panicking", move |_| panic!("{}", message)))
}

/// Records every event as a short label such as `start:A` or `leave:G`.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().iter().filter_map(label).collect()
    }

    /// Position of the first event with this label.
    pub fn position(&self, wanted: &str) -> usize {
        self.labels()
            .iter()
            .position(|l| l == wanted)
            .unwrap_or_else(|| panic!("no event '{}' in {:?}", wanted, self.labels()))
    }

    pub fn count(&self, wanted: &str) -> usize {
        self.labels().iter().filter(|l| *l == wanted).count()
    }
}

impl TestListener for RecordingListener {
    fn on_event(&self, event: &RunEvent) {
        self.events.lock().push(event.clone());
    }
}

pub fn label(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::StartingTestProcess { .. } => Some("process-start".to_string()),
        RunEvent::FinishedTestProcess { .. } => Some("process-finish".to_string()),
        RunEvent::StartingGroup { name, .. } => Some(format!("enter:{name}")),
        RunEvent::FinishedGroup { name, .. } => Some(format!("leave:{name}")),
        RunEvent::StartingLeaf { name, .. } => Some(format!("start:{name}")),
        RunEvent::FinishedLeaf { name, .. } => Some(format!("finish:{name}")),
        RunEvent::NewTestStepGroup { .. } | RunEvent::NewTestStep { .. } => None,
    }
}

/// Counts concurrently running invocations and remembers the peak.
#[derive(Default)]
pub struct ConcurrencyGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn invoker(self: &Arc<Self>, millis: u64) -> Arc<dyn TestInvoker> {
        let gauge = self.clone();
        Arc::new(FnInvoker::new("tests::gauge", move |_| {
            let now = gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
            gauge.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(millis));
            gauge.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }))
    }
}

pub fn scheduler(strategy: Strategy, parallelism: usize) -> (Scheduler, Arc<RecordingListener>) {
    let config = SchedulerConfig::from_provider(&FixedPoolSize(parallelism))
        .with_strategy(strategy)
        .with_poll_interval(Duration::from_millis(50))
        .with_shutdown_grace(Duration::from_secs(2));
    let scheduler = Scheduler::new(config);
    let recorder = RecordingListener::new();
    scheduler.register(recorder.clone());
    (scheduler, recorder)
}

/// Leaf names with the names of their plan dependencies.
pub fn dependency_names(tree: &Arc<RunnerTree>) -> Vec<(String, Vec<String>)> {
    let plan = ExecutionPlan::build(tree.clone()).expect("plan builds");
    let name = |id: NodeId| tree.node(id).name().to_string();
    plan.entries()
        .iter()
        .map(|entry| {
            (
                name(entry.leaf()),
                entry.dependencies().iter().map(|dep| name(*dep)).collect(),
            )
        })
        .collect()
}

/// Asserts that every leaf started only after all of its dependencies
/// finished.
pub fn assert_dependencies_respected(deps: &[(String, Vec<String>)], recorder: &RecordingListener) {
    for (leaf, leaf_deps) in deps {
        let start = recorder.position(&format!("start:{leaf}"));
        for dep in leaf_deps {
            let finish = recorder.position(&format!("finish:{dep}"));
            assert!(finish < start, "{leaf} started before {dep} finished");
        }
    }
}

/// Status reported by the `FinishedLeaf` event of `name`.
pub fn finished_status(recorder: &RecordingListener, name: &str) -> TestStatus {
    recorder
        .events()
        .iter()
        .find_map(|event| match event {
            RunEvent::FinishedLeaf {
                name: leaf, status, ..
            } if leaf == name => Some(*status),
            _ => None,
        })
        .unwrap_or_else(|| panic!("leaf '{}' never finished", name))
}
