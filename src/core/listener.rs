//! # Listener Module / 监听器模块
//!
//! Run events and the registry that fans them out. Events are fired from
//! worker threads while the lifecycle ordering lock is held, so listeners
//! must be cheap and must never call back into the scheduler.
//!
//! 运行事件以及分发它们的注册表。事件在持有生命周期锁时从工作线程触发，
//! 因此监听器必须足够轻量。

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::core::log::{CaseId, StepStatus, TestStatus};
use crate::core::tree::NodeId;

/// Everything a listener can observe during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    StartingTestProcess {
        time: DateTime<Utc>,
    },
    StartingGroup {
        node: NodeId,
        name: String,
        time: DateTime<Utc>,
    },
    StartingLeaf {
        node: NodeId,
        name: String,
        time: DateTime<Utc>,
    },
    FinishedLeaf {
        node: NodeId,
        name: String,
        status: TestStatus,
        time: DateTime<Utc>,
    },
    FinishedGroup {
        node: NodeId,
        name: String,
        time: DateTime<Utc>,
    },
    FinishedTestProcess {
        time: DateTime<Utc>,
    },
    NewTestStepGroup {
        case: CaseId,
        name: String,
    },
    NewTestStep {
        case: CaseId,
        group: String,
        name: String,
        status: StepStatus,
    },
}

impl RunEvent {
    /// The runner node an event refers to, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            RunEvent::StartingGroup { node, .. }
            | RunEvent::StartingLeaf { node, .. }
            | RunEvent::FinishedLeaf { node, .. }
            | RunEvent::FinishedGroup { node, .. } => Some(*node),
            _ => None,
        }
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self {
            RunEvent::StartingTestProcess { time }
            | RunEvent::FinishedTestProcess { time }
            | RunEvent::StartingGroup { time, .. }
            | RunEvent::StartingLeaf { time, .. }
            | RunEvent::FinishedLeaf { time, .. }
            | RunEvent::FinishedGroup { time, .. } => Some(*time),
            RunEvent::NewTestStepGroup { .. } | RunEvent::NewTestStep { .. } => None,
        }
    }
}

/// Receives run events.
/// 接收运行事件。
pub trait TestListener: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

impl<F> TestListener for F
where
    F: Fn(&RunEvent) + Send + Sync,
{
    fn on_event(&self, event: &RunEvent) {
        self(event)
    }
}

/// Forwards every event to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl TestListener for TracingListener {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::StartingGroup { name, .. } => debug!(group = %name, "starting group"),
            RunEvent::FinishedGroup { name, .. } => debug!(group = %name, "finished group"),
            RunEvent::StartingLeaf { name, .. } => debug!(leaf = %name, "starting leaf"),
            RunEvent::FinishedLeaf { name, status, .. } => {
                debug!(leaf = %name, %status, "finished leaf")
            }
            other => trace!(?other, "run event"),
        }
    }
}

/// The set of listeners of one run.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn TestListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn TestListener>) {
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fire(&self, event: &RunEvent) {
        for listener in self.listeners.read().iter() {
            listener.on_event(event);
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
