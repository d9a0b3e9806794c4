//! # Suite Scheduler Library / Suite Scheduler 库
//!
//! A hierarchical, dependency-aware test scheduler. Test groups form a tree
//! whose nodes are marked parallel or sequential; named sequential groups
//! add ordering constraints across the tree. Leaves run concurrently on a
//! bounded pool while group start and finish notifications stay correctly
//! nested.
//!
//! 分层、依赖感知的测试调度器。测试组构成一棵树，节点标记为并行或顺序；
//! 具名顺序组跨树添加顺序约束。叶子在有界线程池上并发运行，同时组的开始和结束通知保持正确嵌套。
//!
//! ## Modules / 模块
//!
//! - `core` - Runner tree, execution plan, lifecycle and aggregation log
//! - `scheduler` - The plan-driven pool and the recursive tree walk
//! - `infra` - Shell-command invoker and run file loader
//! - `reporting` - Console, HTML and JSON reports
//! - `cli` - Command-line interface and commands
//!
//! - `core` - 运行树、执行计划、生命周期和聚合日志
//! - `scheduler` - 基于计划的线程池和递归树遍历
//! - `infra` - shell 命令调用器和运行文件加载器
//! - `reporting` - 控制台、HTML 和 JSON 报告
//! - `cli` - 命令行接口和命令

pub mod cli;
pub mod core;
pub mod infra;
pub mod reporting;
pub mod scheduler;

// Re-export commonly used items
pub use crate::core::{
    AssertionFailure, ExecutionMode, ExecutionPlan, FnInvoker, InvocationContext, LogRegistry,
    RunnerTree, SchedulerError, TestInvoker, TestListener,
};
pub use crate::scheduler::{RunOutcome, Scheduler, SchedulerConfig, Strategy};
