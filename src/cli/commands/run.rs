//! # Run Command Module / 运行命令模块
//!
//! Implements `suite-scheduler run`: loads the run file, schedules every
//! leaf and reports the aggregation tree.
//!
//! 实现 `suite-scheduler run`：加载运行文件，调度所有叶子并报告聚合树。

use anyhow::{Context, Result, bail};
use colored::*;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::cli::RunArgs;
use crate::core::listener::TracingListener;
use crate::core::log::SuiteSummary;
use crate::infra::config::{RunFile, load_run_file};
use crate::reporting::{
    ProgressListener, generate_html_report, generate_json_report, print_failure_details,
    print_summary,
};
use crate::scheduler::{Scheduler, SchedulerConfig};

pub async fn execute(args: RunArgs) -> Result<()> {
    let run_file = load_run_file(&args.config)?;
    let config = scheduler_config(&run_file, &args);
    let tree = Arc::new(
        run_file
            .build_tree(config.default_mode.unwrap_or_default())
            .context("Failed to build the runner tree")?,
    );

    println!(
        "{}",
        format!(
            "Loaded {} tests from {}",
            tree.leaves().len(),
            args.config.display()
        )
        .cyan()
    );
    println!(
        "{}",
        format!(
            "Running with strategy '{}' and {} parallel slots",
            config.strategy, config.parallelism
        )
        .bold()
    );

    let scheduler = Scheduler::new(config);
    scheduler.register(Arc::new(TracingListener));
    scheduler.register(Arc::new(ProgressListener));

    let stop_token = setup_signal_handler();
    let outcome = scheduler
        .run(tree.clone(), stop_token)
        .await
        .context("The test run aborted")?;

    let entries = tree.log().snapshot();
    print_summary(&entries);

    if let Some(report_path) = &args.html {
        println!("\nGenerating HTML report at: {}", report_path.display());
        if let Err(e) = generate_html_report(&entries, report_path) {
            eprintln!("{} {:#}", "Failed to generate HTML report:".red(), e);
        }
    }
    if let Some(report_path) = &args.json {
        println!("Generating JSON report at: {}", report_path.display());
        if let Err(e) = generate_json_report(&entries, report_path) {
            eprintln!("{} {:#}", "Failed to generate JSON report:".red(), e);
        }
    }

    if outcome.cancelled {
        bail!(
            "The test run was interrupted; {} tests were abandoned.",
            outcome.abandoned
        );
    }

    let summary = SuiteSummary::of(&entries);
    if summary.success() {
        println!("\n{}", "All tests passed!".green().bold());
        Ok(())
    } else {
        print_failure_details(&entries);
        bail!(
            "{} tests failed and {} raised errors.",
            summary.failed,
            summary.errors
        );
    }
}

/// File values override the defaults; flags override the file.
pub fn scheduler_config(run_file: &RunFile, args: &RunArgs) -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    if let Some(parallelism) = args.jobs.or(run_file.parallelism) {
        config = config.with_parallelism(parallelism);
    }
    if let Some(strategy) = args.strategy.or(run_file.strategy) {
        config = config.with_strategy(strategy);
    }
    if let Some(mode) = run_file.default_mode {
        config = config.with_default_mode(mode);
    }
    config
}

fn setup_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            println!(
                "\n{}",
                "Shutdown signal received, abandoning remaining tests...".yellow()
            );
            token_clone.cancel();
        }
    });

    token
}
