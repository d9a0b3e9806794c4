//! # Core Module / 核心模块
//!
//! The scheduling model: the runner tree, execution modes, the execution
//! plan, lifecycle propagation, the aggregation log tree, listeners and the
//! invoker contract.
//!
//! 调度模型：运行树、执行模式、执行计划、生命周期传播、聚合日志树、监听器和调用器约定。

pub mod error;
pub mod invoker;
pub mod lifecycle;
pub mod listener;
pub mod log;
pub mod mode;
pub mod plan;
pub mod tree;

// Re-exports
pub use error::{Result, SchedulerError};
pub use invoker::{AssertionFailure, Failure, FnInvoker, InvocationContext, StepGroupHandle, TestInvoker};
pub use lifecycle::Lifecycle;
pub use listener::{ListenerRegistry, RunEvent, TestListener, TracingListener};
pub use log::{LogRegistry, TestStatus};
pub use mode::{EffectiveMode, ExecutionMode};
pub use plan::{ExecutionPlan, ExecutionPlanEntry, PlanLine};
pub use tree::{Attributes, NodeId, NodeKind, NodeOrdering, RunStatus, RunnerNode, RunnerTree};
