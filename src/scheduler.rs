//! # Scheduler Module / 调度器模块
//!
//! Drives a runner tree to completion with one of two strategies:
//!
//! - [`Strategy::Plan`]: a bounded pool fed by an [`ExecutionPlan`],
//! - [`Strategy::Walk`]: a recursive walk of the tree itself.
//!
//! Both run every invocation on a blocking thread and report every state
//! change through the same [`Lifecycle`].
//!
//! 使用两种策略之一驱动运行树直至完成：基于执行计划的有界线程池，或者对树的递归遍历。

pub mod config;
pub mod pool;
pub mod walk;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::error::{Result, SchedulerError};
use crate::core::invoker::Failure;
use crate::core::lifecycle::Lifecycle;
use crate::core::listener::{ListenerRegistry, TestListener};
use crate::core::plan::ExecutionPlan;
use crate::core::tree::{NodeId, RunnerTree};

pub use config::{EnvPoolSize, FixedPoolSize, PoolSizeProvider, SchedulerConfig, Strategy};

/// What a finished (or interrupted) run amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Leaves that ran to completion, whatever their test status.
    pub completed: usize,
    /// Leaves that never finished because the run was interrupted.
    pub abandoned: usize,
    pub cancelled: bool,
    pub duration: Duration,
}

/// Entry point of a run.
/// 运行的入口。
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    listeners: Arc<ListenerRegistry>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_listeners(config, Arc::new(ListenerRegistry::new()))
    }

    pub fn with_listeners(config: SchedulerConfig, listeners: Arc<ListenerRegistry>) -> Self {
        Self { config, listeners }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn register(&self, listener: Arc<dyn TestListener>) {
        self.listeners.register(listener);
    }

    /// Runs every leaf of `tree`. The configured default mode, if any, is
    /// applied to the tree, which is then frozen.
    ///
    /// Cancelling `cancel` abandons the remaining work and still returns an
    /// outcome; structural faults are returned as errors.
    pub async fn run(&self, tree: Arc<RunnerTree>, cancel: CancellationToken) -> Result<RunOutcome> {
        info!(
            strategy = %self.config.strategy,
            parallelism = self.config.parallelism,
            "starting test run"
        );
        if let Some(mode) = self.config.default_mode {
            tree.set_default_mode(mode)?;
        }
        let lifecycle = Arc::new(Lifecycle::new(tree.clone(), self.listeners.clone()));
        let outcome = match self.config.strategy {
            Strategy::Plan => {
                let plan = Arc::new(ExecutionPlan::build(tree)?);
                pool::drive(plan, lifecycle, &self.config, cancel).await?
            }
            Strategy::Walk => walk::drive(lifecycle, &self.config, cancel).await?,
        };

        if outcome.cancelled {
            warn!(
                completed = outcome.completed,
                abandoned = outcome.abandoned,
                "test run cancelled"
            );
        } else {
            info!(
                completed = outcome.completed,
                elapsed = ?outcome.duration,
                "test run finished"
            );
        }
        Ok(outcome)
    }
}

/// Starts a leaf, runs its invoker on a blocking thread and finishes it.
/// Invoker errors and panics become the leaf's failure; only lifecycle
/// faults are returned.
pub(crate) async fn execute_leaf(lifecycle: Arc<Lifecycle>, leaf: NodeId) -> Result<()> {
    lifecycle.leaf_started(leaf)?;
    let ctx = lifecycle.invocation_context(leaf)?;
    let node = lifecycle.tree().node(leaf);
    let invoker = node
        .invoker()
        .cloned()
        .ok_or(SchedulerError::UnknownNode(leaf.index()))?;

    let failure = match tokio::task::spawn_blocking(move || invoker.invoke(&ctx)).await {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(Failure::from_error(&error)),
        Err(join) if join.is_panic() => Some(Failure::from_panic(join.into_panic())),
        Err(_) => return Err(SchedulerError::TaskPanicked(node.name().to_string())),
    };
    if let Some(failure) = &failure {
        warn!(leaf = %node.name(), kind = ?failure.kind, message = %failure.message, "leaf failed");
    }
    lifecycle.leaf_finished(leaf, failure)
}
