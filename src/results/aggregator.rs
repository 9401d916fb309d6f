//! Suite-level metrics from per-test results
//!
//! Aggregation is pure and order-independent. When several attempts of the
//! same test are present only the latest attempt counts, so feeding either
//! the authoritative results or every attempt gives the same metrics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{CoverageMetrics, TestResult, TestStatus};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub peak_memory_mb: Option<f64>,
    pub avg_memory_mb: Option<f64>,
    pub peak_cpu_percent: Option<f64>,
    pub avg_cpu_percent: Option<f64>,
    /// Results that reported any resource measurement
    pub samples: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Sum of per-test execution times
    pub execution_ms: u64,
    /// Percent of executable (non-skipped) tests that passed
    pub pass_rate: f64,
    pub resources: ResourceSummary,
    /// Coverage accumulated from per-test deltas, when any were reported
    pub coverage: Option<CoverageMetrics>,
}

impl ExecutionMetrics {
    pub fn executable(&self) -> usize {
        self.total - self.skipped
    }

    pub fn failures(&self) -> usize {
        self.failed + self.errors
    }

    pub fn mean_execution_ms(&self) -> Option<f64> {
        match self.executable() {
            0 => None,
            n => Some(self.execution_ms as f64 / n as f64),
        }
    }
}

/// Keep the latest attempt of each test
fn latest_attempts(results: &[TestResult]) -> BTreeMap<&str, &TestResult> {
    let mut latest: BTreeMap<&str, &TestResult> = BTreeMap::new();
    for result in results {
        latest
            .entry(result.test_id.as_str())
            .and_modify(|current| {
                if (result.attempt, result.finished_at) > (current.attempt, current.finished_at) {
                    *current = result;
                }
            })
            .or_insert(result);
    }
    latest
}

pub fn aggregate(results: &[TestResult]) -> ExecutionMetrics {
    let latest = latest_attempts(results);
    let mut metrics = ExecutionMetrics {
        total: latest.len(),
        ..Default::default()
    };

    let mut memory = Vec::new();
    let mut cpu = Vec::new();
    let mut coverage: Option<CoverageMetrics> = None;

    for result in latest.values() {
        match result.status {
            TestStatus::Passed => metrics.passed += 1,
            TestStatus::Failed => metrics.failed += 1,
            TestStatus::Skipped => metrics.skipped += 1,
            TestStatus::Error => metrics.errors += 1,
        }
        metrics.execution_ms += result.execution_ms;

        if let Some(m) = &result.metrics {
            if m.memory_mb.is_some() || m.cpu_percent.is_some() {
                metrics.resources.samples += 1;
            }
            memory.extend(m.memory_mb);
            cpu.extend(m.cpu_percent);
            if let Some(delta) = &m.coverage_delta {
                coverage = Some(coverage.unwrap_or_default().accumulate(delta));
            }
        }
    }

    metrics.pass_rate = match metrics.executable() {
        0 => 100.0,
        n => metrics.passed as f64 / n as f64 * 100.0,
    };
    metrics.resources.peak_memory_mb = memory.iter().copied().reduce(f64::max);
    metrics.resources.avg_memory_mb = mean(&memory);
    metrics.resources.peak_cpu_percent = cpu.iter().copied().reduce(f64::max);
    metrics.resources.avg_cpu_percent = mean(&cpu);
    metrics.coverage = coverage;
    metrics
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
