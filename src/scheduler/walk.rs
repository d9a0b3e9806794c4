//! # Tree Walk / 树遍历
//!
//! Executes the tree without a plan. A parallel group spawns all of its
//! children at once; a sequential group runs its children one after the
//! other inside a task of its own, so a waiting chain holds no leaf slot.
//! Leaves share a bounded number of slots.
//!
//! Every group owns the tasks of its children. A fault in one child aborts
//! its siblings. On cancellation running leaves are abandoned and the walk
//! unwinds; whatever is still running after the shutdown grace period is
//! aborted.
//!
//! 不使用执行计划直接执行运行树。并行组同时派生所有子节点；顺序组在自己的任务中逐个运行子节点。
//! 每个组持有其子节点的任务；取消时放弃正在运行的叶子，宽限期后中止剩余任务。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::error::{Result, SchedulerError};
use crate::core::lifecycle::Lifecycle;
use crate::core::mode::EffectiveMode;
use crate::core::tree::{NodeId, RunStatus};
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::{RunOutcome, execute_leaf};

struct Walker {
    lifecycle: Arc<Lifecycle>,
    slots: Arc<Semaphore>,
    cancel: CancellationToken,
    completed: AtomicUsize,
}

pub(crate) async fn drive(
    lifecycle: Arc<Lifecycle>,
    config: &SchedulerConfig,
    cancel: CancellationToken,
) -> Result<RunOutcome> {
    let started = Instant::now();
    let tree = lifecycle.tree().clone();
    if let Some(node) = tree
        .preorder()
        .into_iter()
        .find(|id| tree.node(*id).attributes().sequential_group.is_some())
    {
        return Err(SchedulerError::SequentialGroupsNeedPlan(tree.path(node)));
    }
    tree.freeze();
    lifecycle.process_started()?;

    let walker = Arc::new(Walker {
        lifecycle: lifecycle.clone(),
        slots: Arc::new(Semaphore::new(config.parallelism)),
        cancel: cancel.clone(),
        completed: AtomicUsize::new(0),
    });
    let result = match tree.root() {
        Some(root) if tree.has_leaves(root) => {
            walk_root(walker.clone(), root, config.shutdown_grace).await
        }
        _ => Ok(()),
    };

    lifecycle.process_finished();
    result?;

    let abandoned = tree
        .leaves()
        .into_iter()
        .filter(|leaf| tree.node(*leaf).status() != RunStatus::Finished)
        .count();
    Ok(RunOutcome {
        completed: walker.completed.load(Ordering::Acquire),
        abandoned,
        cancelled: cancel.is_cancelled(),
        duration: started.elapsed(),
    })
}

/// Walks from the root in a task of its own and waits for it, at most
/// `grace` past cancellation.
async fn walk_root(walker: Arc<Walker>, root: NodeId, grace: Duration) -> Result<()> {
    let cancel = walker.cancel.clone();
    let mut walk = JoinSet::new();
    walk.spawn(walker.visit(root));

    let finished = tokio::select! {
        biased;
        joined = walk.join_next() => joined,
        _ = cancel.cancelled() => None,
    };
    let joined = match finished {
        Some(joined) => joined,
        None => match tokio::time::timeout(grace, walk.join_next()).await {
            Ok(Some(joined)) => joined,
            Ok(None) => return Ok(()),
            Err(_) => {
                warn!(grace = ?grace, "walk still running after shutdown grace period");
                walk.abort_all();
                while walk.join_next().await.is_some() {}
                return Ok(());
            }
        },
    };
    match joined {
        Ok(result) => result,
        Err(join) if join.is_cancelled() => Ok(()),
        Err(join) => Err(SchedulerError::TaskPanicked(join.to_string())),
    }
}

/// Joins every child task. The first fault aborts the siblings still
/// running and is returned once they are gone.
async fn join_children(mut children: JoinSet<Result<()>>) -> Result<()> {
    while let Some(joined) = children.join_next().await {
        let fault = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(join) if join.is_cancelled() => continue,
            Err(join) => SchedulerError::TaskPanicked(join.to_string()),
        };
        children.abort_all();
        while children.join_next().await.is_some() {}
        return Err(fault);
    }
    Ok(())
}

impl Walker {
    fn visit(self: Arc<Self>, node: NodeId) -> BoxFuture<'static, Result<()>> {
        async move {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let tree = self.lifecycle.tree().clone();
            let current = tree.node(node);
            if current.is_leaf() {
                return self.run_leaf(node).await;
            }
            if !tree.has_leaves(node) {
                return self.lifecycle.empty_group(node);
            }

            let mut children = JoinSet::new();
            match tree.effective_mode(node) {
                EffectiveMode::Parallel => {
                    self.lifecycle.group_entered(node)?;
                    for child in current.children() {
                        children.spawn(self.clone().visit(*child));
                    }
                }
                EffectiveMode::Sequential => {
                    let walker = self.clone();
                    let chain = current.children().to_vec();
                    children.spawn(async move {
                        for child in chain {
                            walker.clone().visit(child).await?;
                        }
                        Ok::<_, SchedulerError>(())
                    });
                }
            }
            join_children(children).await
        }
        .boxed()
    }

    /// Runs one leaf in a free slot. Cancellation abandons the leaf where it
    /// stands: it never finishes and counts as abandoned.
    async fn run_leaf(&self, leaf: NodeId) -> Result<()> {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(()),
            permit = self.slots.clone().acquire_owned() => permit,
        };
        let Ok(_permit) = permit else { return Ok(()) };
        debug!(leaf = %self.lifecycle.tree().path(leaf), "walking into leaf");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(leaf = %self.lifecycle.tree().path(leaf), "leaf abandoned");
            }
            result = execute_leaf(self.lifecycle.clone(), leaf) => {
                result?;
                self.completed.fetch_add(1, Ordering::AcqRel);
            }
        }
        Ok(())
    }
}
