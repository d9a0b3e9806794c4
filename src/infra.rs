//! # Infrastructure Module / 基础设施模块
//!
//! Services around the scheduler: the shell-command invoker and the run
//! file loader that builds runner trees from TOML.
//!
//! 调度器周边的服务：shell 命令调用器，以及从 TOML 构建运行树的运行文件加载器。

pub mod command;
pub mod config;

pub use command::CommandInvoker;
pub use config::{RunFile, load_run_file, parse_run_file};
