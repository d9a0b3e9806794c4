//! # Reporting Module / 报告模块
//!
//! Presents the aggregation tree: colored console output, an HTML page and
//! a JSON document, all rendered from the same snapshot.
//!
//! 展示聚合树：彩色控制台输出、HTML 页面和 JSON 文档，均由同一快照渲染。

pub mod console;
pub mod html;
pub mod json;

pub use console::{ProgressListener, print_failure_details, print_plan, print_summary};
pub use html::generate_html_report;
pub use json::generate_json_report;
