//! Output formatting module
//!
//! Renders run reports and execution plans in the supported formats.

mod formatter;

pub use formatter::{format_results_csv, write_report_to_file, OutputFormat, ReportFormatter};
