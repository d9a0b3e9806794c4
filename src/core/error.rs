//! # Error Module / 错误模块
//!
//! Structural faults raised by the runner tree, the execution plan, the
//! aggregation tree and the schedulers. All of them are programming or
//! configuration errors: they are reported immediately and never corrected.
//!
//! 运行树、执行计划、聚合树和调度器产生的结构性错误。
//! 它们都属于编程或配置错误：会被立即报告，从不被静默修正。

use thiserror::Error;

/// Result type alias using [`SchedulerError`].
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Structural and configuration faults.
/// 结构性和配置错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("the tree root is already set to group '{existing}'")]
    RootAlreadySet { existing: String },

    #[error("leaf '{0}' must be added to a parent group")]
    MissingParent(String),

    #[error("node '{node}' is already attached to '{parent}'")]
    AlreadyAttached { node: String, parent: String },

    #[error("node '{node}' cannot be attached below its own descendant '{parent}'")]
    AttachCycle { node: String, parent: String },

    #[error("the tree root '{0}' cannot be attached to another group")]
    RootCannotBeAttached(String),

    #[error("the runner tree is frozen; cannot modify '{0}'")]
    TreeFrozen(String),

    #[error("unknown node id {0}")]
    UnknownNode(usize),

    #[error("node '{0}' is not a group")]
    NotAGroup(String),

    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("invalid state transition for '{node}': {from} -> {to}")]
    InvalidTransition {
        node: String,
        from: String,
        to: String,
    },

    #[error("named sequential groups require the plan strategy (found '{0}')")]
    SequentialGroupsNeedPlan(String),

    #[error("{remaining} leaves can never become ready; the plan is stalled")]
    Stalled { remaining: usize },

    #[error("task for '{0}' panicked or was cancelled outside of the scheduler")]
    TaskPanicked(String),
}

impl SchedulerError {
    pub(crate) fn transition(
        node: impl Into<String>,
        from: impl std::fmt::Debug,
        to: impl std::fmt::Debug,
    ) -> Self {
        SchedulerError::InvalidTransition {
            node: node.into(),
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }
}
