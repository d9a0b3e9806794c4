//! # HTML Reporting Module / HTML 报告模块
//!
//! Renders the aggregation tree as a standalone HTML page with summary
//! counts, a nested results table and collapsible failure output.
//!
//! 将聚合树渲染为独立的 HTML 页面，包含摘要计数、嵌套结果表和可折叠的失败输出。

use anyhow::{Context, Result};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use std::fs;
use std::path::Path;

use crate::core::log::{LogEntry, LogNode, SuiteSummary, TestStatus};

const HTML_STYLE: &str = r#"
body { font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; margin: 2em; color: #24292e; }
h1 { font-size: 1.6em; }
.summary-container { display: flex; gap: 1.5em; margin-bottom: 1.5em; }
.summary-item { display: flex; flex-direction: column; align-items: center; }
.count { font-size: 1.8em; font-weight: bold; }
.label { color: #586069; }
table { border-collapse: collapse; width: 100%; }
th, td { text-align: left; padding: 6px 10px; border-bottom: 1px solid #e1e4e8; }
tr.suite td { font-weight: bold; background: #f6f8fa; }
.status-cell { display: inline-block; padding: 2px 8px; border-radius: 4px; }
.passed { background: #dcffe4; color: #22863a; }
.failed, .error { background: #ffdce0; color: #cb2431; }
.ignored { background: #fff5b1; color: #735c0f; }
.running, .not_run { background: #eaecef; color: #586069; }
details pre { white-space: pre-wrap; background: #f6f8fa; padding: 8px; }
"#;

fn status_class(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Error => "error",
        TestStatus::Failed => "failed",
        TestStatus::Running => "running",
        TestStatus::NotRun => "not_run",
        TestStatus::Ignored => "ignored",
        TestStatus::Passed => "passed",
    }
}

fn duration_cell(entry: &LogEntry) -> String {
    entry
        .duration()
        .map(|d| format!("{:.2}s", d.as_secs_f64()))
        .unwrap_or_else(|| "N/A".to_string())
}

/// Renders the report page.
pub fn render_html_report(entries: &[LogEntry]) -> String {
    let summary = SuiteSummary::of(entries);
    let page = html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { "Test Report" }
                style { (PreEscaped(HTML_STYLE)) }
            }
            body {
                h1 { "Test Report" }
                (summary_block(&summary))
                table {
                    thead { tr { th { "Name" } th { "Status" } th { "Duration" } } }
                    tbody {
                        @for entry in entries { (entry_rows(entry, 0)) }
                    }
                }
            }
        }
    };
    page.into_string()
}

fn summary_block(summary: &SuiteSummary) -> Markup {
    let items = [
        ("Total", summary.total(), ""),
        ("Passed", summary.passed, "passed"),
        ("Failed", summary.failed, "failed"),
        ("Errors", summary.errors, "error"),
        ("Ignored", summary.ignored, "ignored"),
        ("Not Run", summary.not_run, "not_run"),
    ];
    html! {
        div class="summary-container" {
            @for (label, count, class) in items {
                div class="summary-item" {
                    span class={ "count " (class) } { (count) }
                    span class="label" { (label) }
                }
            }
        }
    }
}

fn entry_rows(entry: &LogEntry, depth: usize) -> Markup {
    let indent = format!("padding-left: {}em", depth * 2 + 1);
    let status = entry.status();
    html! {
        @match entry {
            LogEntry::Suite(suite) => {
                tr class="suite" {
                    td style=(indent) { (suite.name) }
                    td { div class={ "status-cell " (status_class(status)) } { (status.label()) } }
                    td { (duration_cell(entry)) }
                }
                @for child in &suite.children { (entry_rows(child, depth + 1)) }
            }
            LogEntry::Case(case) => {
                tr {
                    td style=(indent) {
                        (case.name)
                        @if let Some(class) = &case.test_class { " " small { "(" (class) ")" } }
                    }
                    td {
                        div class={ "status-cell " (status_class(status)) } { (status.label()) }
                        @if !case.errors.is_empty() {
                            details {
                                summary { "output" }
                                @for error in &case.errors { pre { (error) } }
                            }
                        }
                    }
                    td { (duration_cell(entry)) }
                }
            }
        }
    }
}

/// Writes the report page to `output_path`.
pub fn generate_html_report(entries: &[LogEntry], output_path: &Path) -> Result<()> {
    fs::write(output_path, render_html_report(entries))
        .with_context(|| format!("Failed to write HTML report: {}", output_path.display()))
}
