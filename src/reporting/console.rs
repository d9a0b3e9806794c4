//! # Console Reporting Module / 控制台报告模块
//!
//! Colored summaries of the aggregation tree, failure details, the plan
//! listing and a live progress listener.
//!
//! 聚合树的彩色摘要、失败详情、执行计划列表和实时进度监听器。

use colored::*;
use std::time::Duration;

use crate::core::listener::{RunEvent, TestListener};
use crate::core::log::{CaseSnapshot, LogEntry, LogNode, SuiteSummary, TestStatus};
use crate::core::plan::PlanLine;

fn colorize(status: TestStatus) -> ColoredString {
    let label = status.label();
    match status {
        TestStatus::Passed => label.green(),
        TestStatus::Failed | TestStatus::Error => label.red(),
        TestStatus::Ignored => label.yellow(),
        TestStatus::Running | TestStatus::NotRun => label.dimmed(),
    }
}

fn format_duration(duration: Option<Duration>) -> String {
    duration
        .map(|d| format!("{:.2?}", d))
        .unwrap_or_else(|| "N/A".to_string())
}

/// Prints the aggregation tree as an indented table, suites first, followed
/// by the overall counts.
///
/// ```text
/// --- Test Summary ---
///   - Passed             | all                                      |      1.52s
///   - Passed             |   login                                  |    803.1ms
///   - Failed             |   checkout                               |    712.9ms
/// ```
pub fn print_summary(entries: &[LogEntry]) {
    println!("\n{}", "--- Test Summary ---".bold());
    for entry in entries {
        print_entry(entry, 0);
    }

    let summary = SuiteSummary::of(entries);
    println!(
        "\n  {} total, {} passed, {} failed, {} errors, {} ignored, {} not run",
        summary.total(),
        summary.passed.to_string().green(),
        summary.failed.to_string().red(),
        summary.errors.to_string().red(),
        summary.ignored.to_string().yellow(),
        summary.not_run.to_string().dimmed(),
    );
}

fn print_entry(entry: &LogEntry, depth: usize) {
    let name = format!("{}{}", "  ".repeat(depth), entry.name());
    let name = match entry {
        LogEntry::Suite(_) => name.bold(),
        LogEntry::Case(_) => name.normal(),
    };
    println!(
        "  - {:<18} | {:<40} | {:>10}",
        colorize(entry.status()),
        name,
        format_duration(entry.duration())
    );
    if let LogEntry::Suite(suite) = entry {
        for child in &suite.children {
            print_entry(child, depth + 1);
        }
    }
}

/// Failed and errored cases, ignored ones excluded.
pub fn failed_cases(entries: &[LogEntry]) -> Vec<&CaseSnapshot> {
    entries
        .iter()
        .flat_map(LogEntry::cases)
        .filter(|case| case.is_failed())
        .collect()
}

/// Prints the recorded errors and failing steps of every failed case.
pub fn print_failure_details(entries: &[LogEntry]) {
    let failures = failed_cases(entries);
    if failures.is_empty() {
        return;
    }

    println!("\n{}", "--- Failures ---".red().bold());
    println!("{}", "-".repeat(80));
    for (i, case) in failures.iter().enumerate() {
        println!(
            "[{}/{}] {} '{}'",
            i + 1,
            failures.len(),
            colorize(case.status),
            case.name.cyan()
        );
        if let Some(class) = &case.test_class {
            println!("  class: {}", class.dimmed());
        }
        for error in &case.errors {
            println!("\n{}", error);
        }
        for group in &case.step_groups {
            for step in &group.steps {
                if let Some(message) = &step.message {
                    println!("\n--- {} / {} ---\n{}", group.name.yellow(), step.name, message);
                }
            }
        }
        println!("\n{}", "-".repeat(80));
    }
}

/// Prints the entries of an execution plan in serving order.
pub fn print_plan(lines: &[PlanLine]) {
    println!("\n{}", "--- Execution Plan ---".bold());
    println!("  - {:>5} | {:<40} | {}", "score", "leaf", "depends on");
    for line in lines {
        let deps = if line.depends_on.is_empty() {
            "-".dimmed().to_string()
        } else {
            line.depends_on.join(", ")
        };
        println!("  - {:>5} | {:<40} | {}", line.score, line.leaf.cyan(), deps);
    }
}

/// Prints one line per finished leaf while the run is in progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressListener;

impl TestListener for ProgressListener {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::StartingLeaf { name, .. } => {
                println!("{} {}", "Running".blue(), name);
            }
            RunEvent::FinishedLeaf { name, status, .. } => {
                println!("{:>9} {}", colorize(*status), name);
            }
            _ => {}
        }
    }
}
