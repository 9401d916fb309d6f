//! Comprehensive run report
//!
//! Serializable summary of one pipeline run: test outcomes, every gate's
//! detail, prioritized recommendations, trends and phase timings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::analysis::{Trend, TrendDirection};
use crate::executor::{BatchReport, ExecutionResult, StrategyKind};
use crate::models::{AggregatedQualityGateResult, OverallStatus, Recommendation, TestResult};
use crate::results::{ExecutionHistory, ExecutionMetrics};

/// Headline figures
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub status: OverallStatus,
    pub passed: bool,
    pub score: f64,
    pub minimum_score: f64,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub error_tests: usize,
    pub skipped_tests: usize,
    pub pass_rate: f64,
    pub strategy: StrategyKind,
    pub confidence: Option<f64>,
    pub retries: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportTrends {
    pub pass_rate: Option<Trend>,
    /// Pass rates of recent runs, oldest first, this run included
    pub recent_pass_rates: Vec<f64>,
    /// Overall scores of recent runs, oldest first
    pub recent_scores: Vec<f64>,
    /// Tests that failed and then passed within this run
    pub recovered_on_retry: Vec<String>,
}

impl ReportTrends {
    pub fn from_history(
        history: &ExecutionHistory,
        trend: Option<Trend>,
        execution: &ExecutionResult,
    ) -> Self {
        Self {
            pass_rate: trend,
            recent_pass_rates: history.pass_rate_series(),
            recent_scores: history.runs().iter().filter_map(|r| r.score).collect(),
            recovered_on_retry: execution
                .recovered_on_retry()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn describe(&self) -> Option<String> {
        let trend = self.pass_rate?;
        let direction = match trend.direction {
            TrendDirection::Improving => "improving",
            TrendDirection::Stable => "stable",
            TrendDirection::Declining => "declining",
        };
        Some(format!(
            "pass rate {direction} ({:+.2} points/run, confidence {:.0}%)",
            trend.slope,
            trend.confidence * 100.0
        ))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveReport {
    pub run_id: String,
    pub suite_name: String,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub verdict: AggregatedQualityGateResult,
    pub metrics: ExecutionMetrics,
    pub results: Vec<TestResult>,
    pub batches: Vec<BatchReport>,
    pub trends: ReportTrends,
    /// Milliseconds per pipeline phase
    pub phases: BTreeMap<String, u64>,
}

impl ComprehensiveReport {
    pub fn new(
        run_id: impl Into<String>,
        suite_name: impl Into<String>,
        execution: ExecutionResult,
        metrics: ExecutionMetrics,
        verdict: AggregatedQualityGateResult,
        trends: ReportTrends,
        phases: BTreeMap<String, u64>,
    ) -> Self {
        let summary = ReportSummary {
            status: verdict.status,
            passed: verdict.passed,
            score: verdict.score,
            minimum_score: verdict.minimum_score,
            total_tests: metrics.total,
            passed_tests: metrics.passed,
            failed_tests: metrics.failed,
            error_tests: metrics.errors,
            skipped_tests: metrics.skipped,
            pass_rate: metrics.pass_rate,
            strategy: execution.strategy,
            confidence: execution.confidence,
            retries: execution.retry_count(),
            cancelled: execution.cancelled,
            duration_ms: phases.values().sum(),
        };

        Self {
            run_id: run_id.into(),
            suite_name: suite_name.into(),
            generated_at: Utc::now(),
            summary,
            verdict,
            metrics,
            results: execution.results,
            batches: execution.batches,
            trends,
            phases,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict.passed
    }

    pub fn recommendations(&self) -> &[Recommendation] {
        &self.verdict.recommendations
    }

    /// One line per gate that did not pass, failing/lowest first
    pub fn remediation(&self) -> Vec<String> {
        self.verdict
            .gate_results
            .iter()
            .filter_map(|g| g.remediation())
            .collect()
    }

    /// Distinguishes a critical block from a score that merely fell short
    pub fn failure_summary(&self) -> Option<String> {
        use crate::models::FailureKind;
        match self.verdict.failure.as_ref()? {
            FailureKind::BlockedByCriticalGate { gates } => {
                Some(format!("Blocked by critical gate: {}", gates.join(", ")))
            }
            FailureKind::BelowMinimumScore { score, minimum } => Some(format!(
                "Below minimum score: {score:.1} < {minimum:.1} (non-critical, can be overridden)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureKind, GateStatus, QualityGateResult, Test};

    fn verdict(failure: Option<FailureKind>) -> AggregatedQualityGateResult {
        let failing = QualityGateResult::evaluated("pass-rate", "Pass Rate", 92.7, 95.0).critical(true);
        let passing = QualityGateResult::evaluated("coverage", "Coverage", 84.6, 80.0);
        AggregatedQualityGateResult {
            status: OverallStatus::Failed,
            passed: false,
            score: 88.65,
            minimum_score: 87.5,
            passed_gates: 1,
            failed_gates: 1,
            error_gates: 0,
            skipped_gates: 0,
            critical_failures: vec!["pass-rate".into()],
            failure,
            gate_results: vec![failing, passing],
            recommendations: Vec::new(),
        }
    }

    fn execution() -> ExecutionResult {
        let mut execution = ExecutionResult::new(StrategyKind::Parallel);
        let flaky = Test::new("flaky", "Flaky");
        execution.attempts = vec![
            TestResult::failed(&flaky, 3, "x"),
            TestResult::passed(&flaky, 2).with_attempt(2),
        ];
        execution.results = vec![TestResult::passed(&flaky, 2).with_attempt(2)];
        execution
    }

    #[test]
    fn test_summary_and_remediation() {
        let mut phases = BTreeMap::new();
        phases.insert("running".to_string(), 40);
        phases.insert("evaluating".to_string(), 2);

        let exec = execution();
        let trends = ReportTrends::from_history(&ExecutionHistory::default(), None, &exec);
        let metrics = crate::results::aggregate(&exec.results);
        let report = ComprehensiveReport::new(
            "run-1",
            "suite",
            exec,
            metrics,
            verdict(Some(FailureKind::BlockedByCriticalGate {
                gates: vec!["pass-rate".into()],
            })),
            trends,
            phases,
        );

        assert!(!report.passed());
        assert_eq!(report.summary.retries, 1);
        assert_eq!(report.summary.duration_ms, 42);
        assert_eq!(report.trends.recovered_on_retry, vec!["flaky"]);
        assert_eq!(report.remediation().len(), 1);
        assert!(report.remediation()[0].starts_with("Pass Rate"));
        assert_eq!(report.verdict.gate_results[0].status, GateStatus::Failed);
        assert!(report
            .failure_summary()
            .unwrap()
            .starts_with("Blocked by critical gate"));
    }

    #[test]
    fn test_below_minimum_summary() {
        let exec = execution();
        let metrics = crate::results::aggregate(&exec.results);
        let report = ComprehensiveReport::new(
            "run-2",
            "suite",
            exec,
            metrics,
            verdict(Some(FailureKind::BelowMinimumScore {
                score: 70.0,
                minimum: 80.0,
            })),
            ReportTrends::default(),
            BTreeMap::new(),
        );
        assert!(report.failure_summary().unwrap().contains("can be overridden"));
    }

    #[test]
    fn test_trend_description() {
        let trends = ReportTrends {
            pass_rate: Some(Trend {
                direction: TrendDirection::Declining,
                confidence: 0.8,
                slope: -1.5,
            }),
            ..Default::default()
        };
        assert_eq!(
            trends.describe().unwrap(),
            "pass rate declining (-1.50 points/run, confidence 80%)"
        );
        assert!(ReportTrends::default().describe().is_none());
    }

    #[test]
    fn test_report_serializes() {
        let exec = execution();
        let metrics = crate::results::aggregate(&exec.results);
        let report = ComprehensiveReport::new(
            "run-3",
            "suite",
            exec,
            metrics,
            verdict(None),
            ReportTrends::default(),
            BTreeMap::new(),
        );
        let json = serde_json::to_string(&report).unwrap();
        let back: ComprehensiveReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, "run-3");
        assert_eq!(back.verdict.gate_results.len(), 2);
    }
}
