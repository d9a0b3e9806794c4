//! # Plan Command Module / 计划命令模块
//!
//! Implements `suite-scheduler plan`: prints the execution plan of a run
//! file in serving order without executing anything.
//!
//! 实现 `suite-scheduler plan`：按服务顺序打印运行文件的执行计划，不执行任何测试。

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::cli::PlanArgs;
use crate::core::plan::ExecutionPlan;
use crate::infra::config::load_run_file;
use crate::reporting::print_plan;

pub fn execute(args: PlanArgs) -> Result<()> {
    let run_file = load_run_file(&args.config)?;
    let tree = run_file
        .build_tree(run_file.default_mode.unwrap_or_default())
        .context("Failed to build the runner tree")?;
    let plan = ExecutionPlan::build(Arc::new(tree)).context("Failed to build the execution plan")?;
    let lines = plan.describe();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
    } else {
        print_plan(&lines);
    }
    Ok(())
}
