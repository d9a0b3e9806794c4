//! # Plan-Driven Pool Integration Tests / 基于计划的线程池集成测试
//!
//! Runs small runner trees through the scheduler with the plan strategy and
//! checks ordering, nesting of group events, failure handling and the
//! parallelism bound.
//!
//! 使用计划策略运行小型运行树，检查顺序、组事件的嵌套、失败处理和并行度上限。

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    ConcurrencyGauge, RecordingListener, assert_dependencies_respected, dependency_names,
    erroring, failing, finished_status, new_tree, panicking, passing, scheduler, sleeping,
};
use suite_scheduler::core::listener::RunEvent;
use suite_scheduler::core::log::{StepStatus, TestStatus};
use suite_scheduler::core::tree::Attributes;
use suite_scheduler::core::{EffectiveMode, ExecutionMode, FnInvoker, SchedulerError};
use suite_scheduler::scheduler::{FixedPoolSize, Scheduler, SchedulerConfig, Strategy};
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_group_brackets_its_leaves() {
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Parallel, None).unwrap();
    for name in ["A", "B", "C"] {
        tree.add_leaf(sleeping(20), name, Some(root)).unwrap();
    }
    let (scheduler, recorder) = scheduler(Strategy::Plan, 3);

    let outcome = scheduler
        .run(Arc::new(tree), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.completed, 3);
    assert_eq!(outcome.abandoned, 0);
    assert!(!outcome.cancelled);
    assert_eq!(recorder.count("enter:root"), 1);
    assert_eq!(recorder.count("leave:root"), 1);
    for name in ["A", "B", "C"] {
        assert!(recorder.position("enter:root") < recorder.position(&format!("start:{name}")));
        assert!(recorder.position(&format!("finish:{name}")) < recorder.position("leave:root"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sequential_group_runs_in_order() {
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Sequential, None).unwrap();
    for name in ["A", "B", "C"] {
        tree.add_leaf(sleeping(10), name, Some(root)).unwrap();
    }
    let (scheduler, recorder) = scheduler(Strategy::Plan, 4);

    scheduler
        .run(Arc::new(tree), CancellationToken::new())
        .await
        .unwrap();

    assert!(recorder.position("finish:A") < recorder.position("start:B"));
    assert!(recorder.position("finish:B") < recorder.position("start:C"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nested_parallel_group_finishes_before_next_sibling() {
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Sequential, None).unwrap();
    let group = tree.create_group("groupX", ExecutionMode::Parallel, Some(root)).unwrap();
    tree.add_leaf(sleeping(30), "A", Some(group)).unwrap();
    tree.add_leaf(sleeping(10), "B", Some(group)).unwrap();
    tree.add_leaf(passing(), "C", Some(root)).unwrap();
    let tree = Arc::new(tree);
    let deps = dependency_names(&tree);
    let (scheduler, recorder) = scheduler(Strategy::Plan, 4);

    scheduler.run(tree, CancellationToken::new()).await.unwrap();

    assert_dependencies_respected(&deps, &recorder);
    assert!(recorder.position("enter:groupX") < recorder.position("start:A"));
    assert!(recorder.position("leave:groupX") < recorder.position("start:C"));
    assert!(recorder.position("finish:C") < recorder.position("leave:root"));
    assert_eq!(recorder.count("leave:groupX"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_named_group_orders_leaves_across_parallel_groups() {
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Parallel, None).unwrap();
    let left = tree.create_group("left", ExecutionMode::Parallel, Some(root)).unwrap();
    let right = tree.create_group("right", ExecutionMode::Parallel, Some(root)).unwrap();
    let second = tree.add_leaf(passing(), "second", Some(left)).unwrap();
    let first = tree.add_leaf(sleeping(30), "first", Some(right)).unwrap();
    tree.add_leaf(passing(), "free", Some(right)).unwrap();
    tree.set_attributes(second, Attributes::sequential("db", 2)).unwrap();
    tree.set_attributes(first, Attributes::sequential("db", 1)).unwrap();
    let (scheduler, recorder) = scheduler(Strategy::Plan, 4);

    let outcome = scheduler
        .run(Arc::new(tree), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.completed, 3);
    assert!(recorder.position("finish:first") < recorder.position("start:second"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failures_do_not_stop_the_run() {
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Sequential, None).unwrap();
    tree.add_leaf(failing("expected 2"), "failed", Some(root)).unwrap();
    tree.add_leaf(erroring("connection reset"), "errored", Some(root)).unwrap();
    tree.add_leaf(panicking("index out of bounds"), "panicked", Some(root)).unwrap();
    tree.add_leaf(passing(), "passed", Some(root)).unwrap();
    let tree = Arc::new(tree);
    let (scheduler, recorder) = scheduler(Strategy::Plan, 2);

    let outcome = scheduler.run(tree.clone(), CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.completed, 4);
    assert_eq!(finished_status(&recorder, "failed"), TestStatus::Failed);
    assert_eq!(finished_status(&recorder, "errored"), TestStatus::Error);
    assert_eq!(finished_status(&recorder, "panicked"), TestStatus::Error);
    assert_eq!(finished_status(&recorder, "passed"), TestStatus::Passed);

    let log = tree.log();
    let suite = log.find_suite("root").unwrap();
    assert_eq!(log.suite_status(suite).unwrap(), TestStatus::Error);
    let panicked = log.find_case("panicked").unwrap();
    let snapshot = log.snapshot();
    let case = snapshot[0]
        .cases()
        .into_iter()
        .find(|case| case.name == "panicked")
        .unwrap();
    assert_eq!(log.case_status(panicked).unwrap(), TestStatus::Error);
    assert!(case.errors[0].contains("index out of bounds"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_never_exceeds_parallelism() {
    let gauge = ConcurrencyGauge::new();
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Parallel, None).unwrap();
    for i in 0..8 {
        tree.add_leaf(gauge.invoker(25), &format!("leaf-{i}"), Some(root))
            .unwrap();
    }
    let (scheduler, _) = scheduler(Strategy::Plan, 2);

    let outcome = scheduler
        .run(Arc::new(tree), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.completed, 8);
    assert!(gauge.peak() <= 2, "peak was {}", gauge.peak());
    assert!(gauge.peak() >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_group_is_reported_once() {
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Sequential, None).unwrap();
    tree.add_leaf(passing(), "A", Some(root)).unwrap();
    tree.create_group("empty", ExecutionMode::Parallel, Some(root)).unwrap();
    tree.add_leaf(passing(), "B", Some(root)).unwrap();
    let (scheduler, recorder) = scheduler(Strategy::Plan, 2);

    scheduler
        .run(Arc::new(tree), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(recorder.count("enter:empty"), 1);
    assert_eq!(recorder.count("leave:empty"), 1);
    assert!(recorder.position("enter:empty") < recorder.position("leave:empty"));
    assert!(recorder.position("leave:empty") < recorder.position("leave:root"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_root_completes_immediately() {
    let mut tree = new_tree();
    tree.create_group("root", ExecutionMode::Parallel, None).unwrap();
    let (scheduler, recorder) = scheduler(Strategy::Plan, 2);

    let outcome = scheduler
        .run(Arc::new(tree), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.completed, 0);
    assert_eq!(outcome.abandoned, 0);
    assert_eq!(
        recorder.labels(),
        vec!["process-start", "enter:root", "leave:root", "process-finish"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_run_abandons_remaining_leaves() {
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Sequential, None).unwrap();
    for name in ["A", "B", "C"] {
        tree.add_leaf(passing(), name, Some(root)).unwrap();
    }
    let cancel = CancellationToken::new();
    cancel.cancel();
    let (scheduler, recorder) = scheduler(Strategy::Plan, 2);

    let outcome = scheduler.run(Arc::new(tree), cancel).await.unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.completed, 0);
    assert_eq!(outcome.abandoned, 3);
    assert_eq!(recorder.count("start:A"), 0);
    assert_eq!(recorder.labels().last().map(String::as_str), Some("process-finish"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ignored_failure_is_reported_as_ignored() {
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Parallel, None).unwrap();
    let flaky = tree.add_leaf(failing("timing"), "flaky", Some(root)).unwrap();
    tree.add_leaf(passing(), "stable", Some(root)).unwrap();
    tree.set_attributes(flaky, Attributes::ignored()).unwrap();
    let (scheduler, recorder) = scheduler(Strategy::Plan, 2);

    let outcome = scheduler
        .run(Arc::new(tree), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.completed, 2);
    assert_eq!(finished_status(&recorder, "flaky"), TestStatus::Ignored);
    assert_eq!(finished_status(&recorder, "stable"), TestStatus::Passed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invocations_record_steps() {
    let checkout = FnInvoker::new("shop::checkout", |ctx| {
        let group = ctx.step_group("checkout")?;
        ctx.step(&group, "open cart", StepStatus::Passed, None)?;
        ctx.step(&group, "pay", StepStatus::Passed, None)?;
        Ok(())
    });
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Parallel, None).unwrap();
    tree.add_leaf(Arc::new(checkout), "checkout", Some(root)).unwrap();
    let tree = Arc::new(tree);
    let (scheduler, recorder) = scheduler(Strategy::Plan, 1);

    scheduler.run(tree.clone(), CancellationToken::new()).await.unwrap();

    let steps: Vec<String> = recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            RunEvent::NewTestStepGroup { name, .. } => Some(format!("group:{name}")),
            RunEvent::NewTestStep { group, name, .. } => Some(format!("{group}/{name}")),
            _ => None,
        })
        .collect();
    assert_eq!(
        steps,
        vec!["group:checkout", "checkout/open cart", "checkout/pay"]
    );
    let case = tree.log().find_case("checkout").unwrap();
    assert_eq!(tree.log().case_status(case).unwrap(), TestStatus::Passed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_process_events_bracket_the_run() {
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Sequential, None).unwrap();
    let checks = tree.create_group("checks", ExecutionMode::Parallel, Some(root)).unwrap();
    tree.add_leaf(sleeping(5), "lint", Some(checks)).unwrap();
    tree.add_leaf(sleeping(5), "unit", Some(checks)).unwrap();
    tree.add_leaf(passing(), "deploy", Some(root)).unwrap();
    let (scheduler, recorder) = scheduler(Strategy::Plan, 2);

    scheduler
        .run(Arc::new(tree), CancellationToken::new())
        .await
        .unwrap();

    let labels = recorder.labels();
    assert_eq!(labels.first().map(String::as_str), Some("process-start"));
    assert_eq!(labels.last().map(String::as_str), Some("process-finish"));
    assert_eq!(recorder.count("process-start"), 1);
    assert_eq!(recorder.count("process-finish"), 1);
    assert_eq!(recorder.position("enter:root"), 1);
    assert!(recorder.position("leave:root") < recorder.position("process-finish"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cycle_is_reported_before_anything_runs() {
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Sequential, None).unwrap();
    let a = tree.add_leaf(passing(), "A", Some(root)).unwrap();
    let b = tree.add_leaf(passing(), "B", Some(root)).unwrap();
    tree.set_attributes(b, Attributes::sequential("loop", 0)).unwrap();
    tree.set_attributes(a, Attributes::sequential("loop", 1)).unwrap();
    let (scheduler, recorder) = scheduler(Strategy::Plan, 2);

    let err = scheduler
        .run(Arc::new(tree), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::CyclicDependency { .. }));
    assert!(recorder.labels().is_empty());
}

/// A configured default mode reaches leaves whose ancestors are all
/// inherited.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_configured_default_mode_serializes_inherited_root() {
    let gauge = ConcurrencyGauge::new();
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Inherited, None).unwrap();
    for i in 0..4 {
        tree.add_leaf(gauge.invoker(50), &format!("leaf-{i}"), Some(root))
            .unwrap();
    }
    let config = SchedulerConfig::from_provider(&FixedPoolSize(4))
        .with_default_mode(EffectiveMode::Sequential)
        .with_poll_interval(Duration::from_millis(50));
    let scheduler = Scheduler::new(config);
    let recorder = RecordingListener::new();
    scheduler.register(recorder.clone());
    let tree = Arc::new(tree);

    let outcome = scheduler
        .run(tree.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.completed, 4);
    assert_eq!(gauge.peak(), 1);
    assert_eq!(tree.default_mode(), EffectiveMode::Sequential);
    assert!(recorder.position("finish:leaf-0") < recorder.position("start:leaf-1"));

    // The tree is frozen now; a run asking for another default is refused.
    let parallel = Scheduler::new(
        SchedulerConfig::from_provider(&FixedPoolSize(4)).with_default_mode(EffectiveMode::Parallel),
    );
    let err = parallel
        .run(tree, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::TreeFrozen(_)), "unexpected error: {err:?}");
}

/// Leaves sharing a case each report their own outcome; only the last one
/// sees the aggregate.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shared_case_reports_each_leaf_outcome() {
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Sequential, None).unwrap();
    tree.add_leaf(passing(), "login", Some(root)).unwrap();
    tree.add_leaf(failing("wrong password"), "login", Some(root)).unwrap();
    let tree = Arc::new(tree);
    let (scheduler, recorder) = scheduler(Strategy::Plan, 2);

    scheduler.run(tree.clone(), CancellationToken::new()).await.unwrap();

    let statuses: Vec<TestStatus> = recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            RunEvent::FinishedLeaf { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![TestStatus::Passed, TestStatus::Failed]);
    let case = tree.log().find_case("login").unwrap();
    assert_eq!(tree.log().case_status(case).unwrap(), TestStatus::Failed);
}

/// Every leaf ends up either completed or abandoned, including leaves that
/// finished while the pool was shutting down.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_pool_accounts_for_every_leaf() {
    let mut tree = new_tree();
    let root = tree.create_group("root", ExecutionMode::Parallel, None).unwrap();
    for i in 0..8 {
        tree.add_leaf(sleeping(30), &format!("leaf-{i}"), Some(root))
            .unwrap();
    }
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(45)).await;
        trigger.cancel();
    });
    let (scheduler, recorder) = scheduler(Strategy::Plan, 4);

    let outcome = scheduler.run(Arc::new(tree), cancel).await.unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.completed + outcome.abandoned, 8);
    let finished = recorder
        .labels()
        .iter()
        .filter(|label| label.starts_with("finish:"))
        .count();
    assert_eq!(outcome.completed, finished);
}
