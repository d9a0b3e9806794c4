//! # Lifecycle Module / 生命周期模块
//!
//! Propagates leaf start and finish upward through the runner tree so that
//! listeners see correctly nested group notifications even though leaves run
//! out of tree order. Every status transition and every event is issued
//! under one ordering lock.
//!
//! 将叶子的开始和结束沿运行树向上传播，使监听器即使在叶子乱序运行时
//! 也能看到正确嵌套的组通知。所有状态转换和事件都在同一个排序锁下发出。

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::core::error::{Result, SchedulerError};
use crate::core::invoker::{Failure, InvocationContext};
use crate::core::listener::{ListenerRegistry, RunEvent};
use crate::core::log::{CaseState, TestStatus};
use crate::core::tree::{NodeId, RunStatus, RunnerNode, RunnerTree};

/// Pending-child counters, keyed by group.
#[derive(Debug, Default)]
struct Counters {
    pending: HashMap<NodeId, usize>,
}

/// Drives run-status transitions, aggregation-tree updates and listener
/// events for one run.
pub struct Lifecycle {
    tree: Arc<RunnerTree>,
    listeners: Arc<ListenerRegistry>,
    counters: Mutex<Counters>,
}

impl Lifecycle {
    pub fn new(tree: Arc<RunnerTree>, listeners: Arc<ListenerRegistry>) -> Self {
        Self {
            tree,
            listeners,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn tree(&self) -> &Arc<RunnerTree> {
        &self.tree
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    /// Fires the process start. An empty root is started and finished
    /// synthetically right away.
    pub fn process_started(&self) -> Result<()> {
        let mut counters = self.counters.lock();
        self.listeners.fire(&RunEvent::StartingTestProcess { time: Utc::now() });
        if let Some(root) = self.tree.root() {
            if !self.tree.has_leaves(root) && self.tree.node(root).status() == RunStatus::Waiting {
                self.synthesize_empty(root, &mut counters)?;
            }
        }
        Ok(())
    }

    pub fn process_finished(&self) {
        let _guard = self.counters.lock();
        self.listeners.fire(&RunEvent::FinishedTestProcess { time: Utc::now() });
    }

    /// Context handed to the leaf's invoker.
    pub fn invocation_context(&self, leaf: NodeId) -> Result<InvocationContext> {
        let node = self.leaf(leaf)?;
        let case = node.case().ok_or_else(|| SchedulerError::UnknownNode(leaf.index()))?;
        Ok(InvocationContext::new(
            leaf,
            node.name().to_string(),
            case,
            self.tree.log().clone(),
            self.listeners.clone(),
        ))
    }

    /// Marks a group as entered: it and its waiting ancestors start.
    pub fn group_entered(&self, group: NodeId) -> Result<()> {
        let mut counters = self.counters.lock();
        if self.tree.node(group).status() != RunStatus::Waiting {
            return Ok(());
        }
        self.start_chain(group, true, &mut counters)
    }

    /// `Waiting -> Running` for a leaf, starting every waiting ancestor first.
    pub fn leaf_started(&self, leaf: NodeId) -> Result<()> {
        let mut counters = self.counters.lock();
        let node = self.leaf(leaf)?;
        if node.status() != RunStatus::Waiting {
            return Err(SchedulerError::transition(
                node.name(),
                node.status(),
                RunStatus::Running,
            ));
        }
        self.start_chain(leaf, false, &mut counters)?;

        if let Some(case) = node.case() {
            self.tree.log().start_case(case)?;
        }
        node.set_status(RunStatus::Running);
        self.listeners.fire(&RunEvent::StartingLeaf {
            node: leaf,
            name: node.name().to_string(),
            time: Utc::now(),
        });
        Ok(())
    }

    /// `Running -> Finished` for a leaf; finishes every ancestor whose
    /// children have now all finished, innermost first.
    pub fn leaf_finished(&self, leaf: NodeId, failure: Option<Failure>) -> Result<()> {
        let mut counters = self.counters.lock();
        let node = self.leaf(leaf)?;
        if node.status() != RunStatus::Running {
            return Err(SchedulerError::transition(
                node.name(),
                node.status(),
                RunStatus::Finished,
            ));
        }
        // The leaf's own outcome; a case shared with other leaves may still
        // be running.
        let mut status = match &failure {
            None => TestStatus::Passed,
            Some(_) if node.attributes().ignore => TestStatus::Ignored,
            Some(failure) => failure.kind.into(),
        };
        if let Some(case) = node.case() {
            let log = self.tree.log();
            log.finish_case(case, failure.map(Failure::into_parts))?;
            if log.case_state(case)? == CaseState::Finished {
                status = log.case_status(case)?;
            }
        }
        node.set_status(RunStatus::Finished);
        self.listeners.fire(&RunEvent::FinishedLeaf {
            node: leaf,
            name: node.name().to_string(),
            status,
            time: Utc::now(),
        });
        self.complete_upward(leaf, &mut counters)
    }

    /// Starts and finishes an empty group synthetically. A no-op when the
    /// group has already been handled.
    pub fn empty_group(&self, group: NodeId) -> Result<()> {
        let mut counters = self.counters.lock();
        if self.tree.node(group).status() != RunStatus::Waiting {
            return Ok(());
        }
        if let Some(parent) = self.tree.node(group).parent() {
            if self.tree.node(parent).status() == RunStatus::Waiting {
                // Starting the parent synthesizes its empty children, this one included.
                self.start_chain(parent, true, &mut counters)?;
            }
        }
        if self.tree.node(group).status() != RunStatus::Waiting {
            return Ok(());
        }
        self.synthesize_empty(group, &mut counters)?;
        self.complete_upward(group, &mut counters)
    }

    fn leaf(&self, id: NodeId) -> Result<&RunnerNode> {
        let node = self
            .tree
            .get(id)
            .ok_or(SchedulerError::UnknownNode(id.index()))?;
        if !node.is_leaf() {
            return Err(SchedulerError::UnknownNode(id.index()));
        }
        Ok(node)
    }

    /// Starts the waiting ancestors of `node` (and `node` itself when
    /// `include_self`), outermost first.
    fn start_chain(&self, node: NodeId, include_self: bool, counters: &mut Counters) -> Result<()> {
        let mut chain = Vec::new();
        let first = if include_self {
            Some(node)
        } else {
            self.tree.node(node).parent()
        };
        let mut cursor = first;
        while let Some(id) = cursor {
            let group = self.tree.node(id);
            if group.status() != RunStatus::Waiting {
                break;
            }
            chain.push(id);
            cursor = group.parent();
        }

        for id in chain.into_iter().rev() {
            self.start_group(id)?;
            // Empty children never receive a leaf of their own.
            let empty: Vec<NodeId> = self
                .tree
                .node(id)
                .children()
                .iter()
                .copied()
                .filter(|child| {
                    let c = self.tree.node(*child);
                    c.is_group() && c.status() == RunStatus::Waiting && !self.tree.has_leaves(*child)
                })
                .collect();
            for child in empty {
                self.synthesize_empty(child, counters)?;
                self.complete_upward(child, counters)?;
            }
        }
        Ok(())
    }

    fn start_group(&self, id: NodeId) -> Result<()> {
        let group = self.tree.node(id);
        group.set_status(RunStatus::Running);
        if let Some(suite) = group.suite() {
            self.tree.log().ensure_suite_running(suite)?;
        }
        debug!(group = %group.name(), "group started");
        self.listeners.fire(&RunEvent::StartingGroup {
            node: id,
            name: group.name().to_string(),
            time: Utc::now(),
        });
        Ok(())
    }

    fn finish_group(&self, id: NodeId) {
        let group = self.tree.node(id);
        group.set_status(RunStatus::Finished);
        debug!(group = %group.name(), "group finished");
        self.listeners.fire(&RunEvent::FinishedGroup {
            node: id,
            name: group.name().to_string(),
            time: Utc::now(),
        });
    }

    /// Start + finish of an empty group and its (empty) subgroups.
    fn synthesize_empty(&self, id: NodeId, counters: &mut Counters) -> Result<()> {
        self.start_group(id)?;
        for child in self.tree.node(id).children() {
            if self.tree.node(*child).status() == RunStatus::Waiting {
                self.synthesize_empty(*child, counters)?;
            }
        }
        if let Some(suite) = self.tree.node(id).suite() {
            self.tree.log().finish_empty_suite(suite)?;
        }
        counters.pending.insert(id, 0);
        self.finish_group(id);
        Ok(())
    }

    /// Counts `node` as finished in its parent and finishes every ancestor
    /// whose pending counter drops to zero.
    fn complete_upward(&self, node: NodeId, counters: &mut Counters) -> Result<()> {
        let mut current = node;
        while let Some(parent) = self.tree.node(current).parent() {
            let children = self.tree.node(parent).children().len();
            let pending = counters.pending.entry(parent).or_insert(children);
            if *pending == 0 {
                let name = self.tree.node(parent).name();
                error!(group = %name, "group finished more than once");
                return Err(SchedulerError::transition(
                    name,
                    RunStatus::Finished,
                    RunStatus::Finished,
                ));
            }
            *pending -= 1;
            if *pending > 0 {
                break;
            }
            self.finish_group(parent);
            current = parent;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("tree", &self.tree)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}
