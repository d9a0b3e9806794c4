//! # Plan-Driven Pool / 基于计划的线程池
//!
//! The dispatch loop claims ready leaves from the [`ExecutionPlan`] while a
//! pool slot is free. Each submitted task executes its leaf, removes it from
//! the plan and wakes the loop. When nothing is ready the loop waits for a
//! completion, with the poll interval as a fallback.
//!
//! 调度循环在有空闲槽位时从执行计划中认领就绪的叶子。每个任务执行叶子、
//! 将其从计划中移除并唤醒循环。

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::core::error::{Result, SchedulerError};
use crate::core::lifecycle::Lifecycle;
use crate::core::plan::ExecutionPlan;
use crate::core::tree::NodeId;
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::{RunOutcome, execute_leaf};

pub(crate) async fn drive(
    plan: Arc<ExecutionPlan>,
    lifecycle: Arc<Lifecycle>,
    config: &SchedulerConfig,
    cancel: CancellationToken,
) -> Result<RunOutcome> {
    let started = Instant::now();
    lifecycle.process_started()?;

    let slots = Arc::new(Semaphore::new(config.parallelism));
    let wake = Arc::new(Notify::new());
    let abort = cancel.child_token();
    let mut tasks: JoinSet<(NodeId, Result<()>)> = JoinSet::new();
    let mut completed = 0usize;
    let mut fault: Option<SchedulerError> = None;

    loop {
        while let Some(joined) = tasks.try_join_next() {
            reap(joined, &mut completed, &mut fault);
        }
        if fault.is_some() || plan.is_empty() {
            break;
        }

        let permit = tokio::select! {
            biased;
            _ = abort.cancelled() => break,
            permit = slots.clone().acquire_owned() => permit,
        };
        let Ok(permit) = permit else { break };

        match plan.next_executable_leaf() {
            Some(leaf) => {
                debug!(leaf = %lifecycle.tree().path(leaf), "dispatching leaf");
                let plan = plan.clone();
                let lifecycle = lifecycle.clone();
                let wake = wake.clone();
                tasks.spawn(async move {
                    let result = execute_leaf(lifecycle, leaf).await;
                    if result.is_ok() {
                        plan.remove_finished_leaf(leaf);
                    }
                    drop(permit);
                    wake.notify_one();
                    (leaf, result)
                });
            }
            None => {
                drop(permit);
                if tasks.is_empty() {
                    fault = Some(SchedulerError::Stalled {
                        remaining: plan.len(),
                    });
                    break;
                }
                tokio::select! {
                    biased;
                    _ = abort.cancelled() => break,
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(config.poll_interval) => {
                        debug!(remaining = plan.len(), "no completion within poll interval");
                    }
                }
            }
        }
    }

    if fault.is_some() || abort.is_cancelled() {
        abort.cancel();
        tasks.abort_all();
        // Tasks that finished before the abort still count as completed.
        let drained = tokio::time::timeout(config.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                reap(joined, &mut completed, &mut fault);
            }
        })
        .await;
        if drained.is_err() {
            warn!(grace = ?config.shutdown_grace, "tasks still running after shutdown grace period");
        }
    } else {
        while let Some(joined) = tasks.join_next().await {
            reap(joined, &mut completed, &mut fault);
        }
    }

    lifecycle.process_finished();
    if let Some(fault) = fault {
        error!(%fault, "test run aborted");
        return Err(fault);
    }
    Ok(RunOutcome {
        completed,
        abandoned: plan.len(),
        cancelled: cancel.is_cancelled(),
        duration: started.elapsed(),
    })
}

fn reap(
    joined: std::result::Result<(NodeId, Result<()>), tokio::task::JoinError>,
    completed: &mut usize,
    fault: &mut Option<SchedulerError>,
) {
    match joined {
        Ok((_, Ok(()))) => *completed += 1,
        Ok((leaf, Err(err))) => {
            error!(leaf = %leaf, %err, "leaf lifecycle fault");
            fault.get_or_insert(err);
        }
        Err(join) if join.is_panic() => {
            fault.get_or_insert(SchedulerError::TaskPanicked(join.to_string()));
        }
        Err(_) => {}
    }
}
