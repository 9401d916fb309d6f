//! Output formatters for run reports
//!
//! Provides Table, JSON, CSV, and summary output formats.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

use crate::models::{GateStatus, OverallStatus, TestResult, TestStatus};
use crate::orchestrator::ComprehensiveReport;
use crate::scheduler::ExecutionPlan;

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

const RULE: &str = "══════════════════════════════════════════════════════════════════";
const THIN_RULE: &str = "──────────────────────────────────────────────────────────────────";

/// Report formatter
pub struct ReportFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ReportFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Render a full run report
    pub fn format_report(&self, report: &ComprehensiveReport) -> Result<String> {
        match self.format {
            OutputFormat::Table => self.format_report_table(report),
            OutputFormat::Json => serde_json::to_string(report).context("Failed to serialize report"),
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(report).context("Failed to serialize report")
            }
            OutputFormat::Csv => format_results_csv(&report.results),
            OutputFormat::Summary => Ok(self.format_report_summary(report)),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if self.colorize {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn overall(&self, status: OverallStatus) -> String {
        match status {
            OverallStatus::Passed => self.paint("✓ PASSED", "32"),
            OverallStatus::Failed => self.paint("✗ FAILED", "31"),
            OverallStatus::Error => self.paint("! ERROR", "31"),
        }
    }

    fn gate_status(&self, status: GateStatus) -> String {
        let label = format!("{:5}", status.to_string());
        match status {
            GateStatus::Passed => self.paint(&label, "32"),
            GateStatus::Failed | GateStatus::Error => self.paint(&label, "31"),
            GateStatus::Skipped => self.paint(&label, "33"),
        }
    }

    fn test_status(&self, status: TestStatus) -> String {
        let label = format!("{} {:5}", status.symbol(), status.to_string());
        match status {
            TestStatus::Passed => self.paint(&label, "32"),
            TestStatus::Failed | TestStatus::Error => self.paint(&label, "31"),
            TestStatus::Skipped => self.paint(&label, "33"),
        }
    }

    fn format_report_table(&self, report: &ComprehensiveReport) -> Result<String> {
        let summary = &report.summary;
        let mut out = String::new();

        writeln!(out, "\n{RULE}")?;
        writeln!(out, " {} · run {}", report.suite_name, report.run_id)?;
        writeln!(out, "{RULE}")?;
        writeln!(
            out,
            " Tests: {} | Pass: {} | Fail: {} | Error: {} | Skip: {}",
            summary.total_tests,
            summary.passed_tests,
            summary.failed_tests,
            summary.error_tests,
            summary.skipped_tests
        )?;
        write!(
            out,
            " Pass Rate: {:5.1}% | Strategy: {} | Retries: {}",
            summary.pass_rate, summary.strategy, summary.retries
        )?;
        if let Some(confidence) = summary.confidence {
            write!(out, " | Confidence: {:.0}%", confidence * 100.0)?;
        }
        writeln!(out)?;
        if summary.cancelled {
            writeln!(out, " {}", self.paint("Run was cancelled before all batches started", "33"))?;
        }

        let failures: Vec<&TestResult> = report
            .results
            .iter()
            .filter(|r| matches!(r.status, TestStatus::Failed | TestStatus::Error))
            .collect();
        if !failures.is_empty() {
            writeln!(out, "\n Failing Tests:")?;
            writeln!(out, " {THIN_RULE}")?;
            for result in failures {
                write!(
                    out,
                    " {} {:28} [{:>6}ms]",
                    self.test_status(result.status),
                    result.test_name,
                    result.execution_ms
                )?;
                if let Some(message) = &result.message {
                    write!(out, " {message}")?;
                }
                writeln!(out)?;
            }
        }

        writeln!(out, "\n Quality Gates:")?;
        writeln!(out, " {THIN_RULE}")?;
        for gate in &report.verdict.gate_results {
            write!(
                out,
                " {} {:14} {:5.1} / {:5.1}",
                self.gate_status(gate.status),
                gate.gate_name,
                gate.score,
                gate.threshold
            )?;
            if gate.critical {
                write!(out, "  critical")?;
            }
            writeln!(out)?;
            for detail in &gate.details {
                writeln!(out, "        {detail}")?;
            }
        }
        writeln!(out, " {THIN_RULE}")?;
        writeln!(
            out,
            " Score: {:5.1} (minimum {:.1})  {}",
            summary.score,
            summary.minimum_score,
            self.overall(summary.status)
        )?;
        if let Some(failure) = report.failure_summary() {
            writeln!(out, " {failure}")?;
        }

        let remediation = report.remediation();
        if !remediation.is_empty() {
            writeln!(out, "\n Remediation:")?;
            for line in remediation {
                writeln!(out, "   - {line}")?;
            }
        }

        let recommendations = report.recommendations();
        if !recommendations.is_empty() {
            writeln!(out, "\n Recommendations:")?;
            for rec in recommendations.iter().take(10) {
                writeln!(out, "   [{}] {}: {}", rec.kind, rec.gate_id, rec.description)?;
            }
        }

        if let Some(trend) = report.trends.describe() {
            writeln!(out, "\n Trend: {trend}")?;
        }
        if !report.trends.recovered_on_retry.is_empty() {
            writeln!(
                out,
                " Recovered on retry: {}",
                report.trends.recovered_on_retry.join(", ")
            )?;
        }

        if !report.phases.is_empty() {
            let phases: Vec<String> = report
                .phases
                .iter()
                .map(|(phase, ms)| format!("{phase} {ms}ms"))
                .collect();
            writeln!(out, "\n Phases: {}", phases.join(" | "))?;
        }
        writeln!(out, "{RULE}")?;

        Ok(out)
    }

    fn format_report_summary(&self, report: &ComprehensiveReport) -> String {
        let summary = &report.summary;
        let gates = &report.verdict;
        format!(
            "{} {}: {}/{} tests passed ({:.1}%), gates {}/{} passed, score {:.1}/{:.1} in {}ms",
            self.overall(summary.status),
            report.suite_name,
            summary.passed_tests,
            summary.total_tests,
            summary.pass_rate,
            gates.passed_gates,
            gates.gate_results.len(),
            summary.score,
            summary.minimum_score,
            summary.duration_ms
        )
    }

    /// Render an execution plan for a dry run
    pub fn format_plan(&self, plan: &ExecutionPlan) -> Result<String> {
        match self.format {
            OutputFormat::Table => Ok(format!("{plan}\n")),
            OutputFormat::Json => serde_json::to_string(plan).context("Failed to serialize plan"),
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(plan).context("Failed to serialize plan")
            }
            OutputFormat::Csv => format_plan_csv(plan),
            OutputFormat::Summary => Ok(format!(
                "{} tests in {} batches across {} layers, ~{}ms batched vs ~{}ms sequential",
                plan.test_count(),
                plan.batches.len(),
                plan.layer_count(),
                plan.estimated_parallel_ms(),
                plan.estimated_sequential_ms()
            )),
        }
    }
}

impl Default for ReportFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

#[derive(Serialize)]
struct ResultRow<'a> {
    test_id: &'a str,
    test_name: &'a str,
    status: String,
    attempt: u32,
    execution_ms: u64,
    error_kind: String,
    message: &'a str,
}

/// Per-test results as CSV
pub fn format_results_csv(results: &[TestResult]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for result in results {
        writer
            .serialize(ResultRow {
                test_id: &result.test_id,
                test_name: &result.test_name,
                status: result.status.to_string(),
                attempt: result.attempt,
                execution_ms: result.execution_ms,
                error_kind: result
                    .error_kind()
                    .map(|k| k.to_string())
                    .unwrap_or_default(),
                message: result.message.as_deref().unwrap_or(""),
            })
            .context("Failed to write CSV row")?;
    }
    let bytes = writer.into_inner().context("Failed to flush CSV")?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}

#[derive(Serialize)]
struct PlanRow<'a> {
    batch: usize,
    layer: usize,
    complexity: String,
    test_id: &'a str,
    expected_ms: u64,
}

fn format_plan_csv(plan: &ExecutionPlan) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for batch in &plan.batches {
        for test in &batch.tests {
            writer
                .serialize(PlanRow {
                    batch: batch.id,
                    layer: batch.layer,
                    complexity: batch.complexity.to_string(),
                    test_id: &test.id,
                    expected_ms: test.expected_execution_ms,
                })
                .context("Failed to write CSV row")?;
        }
    }
    let bytes = writer.into_inner().context("Failed to flush CSV")?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}

/// Write a report to a file, uncoloured
pub fn write_report_to_file(
    path: impl AsRef<Path>,
    report: &ComprehensiveReport,
    format: OutputFormat,
) -> Result<()> {
    let path = path.as_ref();
    let content = ReportFormatter::new(format).no_color().format_report(report)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;

    Ok(())
}
