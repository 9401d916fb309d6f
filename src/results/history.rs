//! Rolling execution history
//!
//! Per-test windows of recent outcomes feed adaptive ordering and flakiness
//! detection; run records feed trend analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use super::stats::SampleStats;
use crate::models::{TestResult, TestStatus};

pub const DEFAULT_TEST_WINDOW: usize = 20;
pub const DEFAULT_RUN_WINDOW: usize = 30;

/// One observed execution of a test (its authoritative attempt)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestSample {
    pub status: TestStatus,
    pub execution_ms: u64,
    /// Attempts it took to reach this status
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl TestSample {
    pub fn from_result(result: &TestResult) -> Self {
        Self {
            status: result.status,
            execution_ms: result.execution_ms,
            attempts: result.attempt,
            recorded_at: result.finished_at,
        }
    }

    fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestHistory {
    samples: VecDeque<TestSample>,
}

impl TestHistory {
    pub fn push(&mut self, sample: TestSample, window: usize) {
        self.samples.push_back(sample);
        while self.samples.len() > window.max(1) {
            self.samples.pop_front();
        }
    }

    pub fn samples(&self) -> &VecDeque<TestSample> {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn timing(&self) -> SampleStats {
        let durations: Vec<f64> = self.samples.iter().map(|s| s.execution_ms as f64).collect();
        SampleStats::from_samples(&durations)
    }

    pub fn mean_ms(&self) -> f64 {
        self.timing().mean
    }

    /// Fraction of samples that passed, 0..1
    pub fn pass_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().filter(|s| s.passed()).count() as f64 / self.samples.len() as f64
    }

    /// Pass/fail transitions between consecutive samples over possible transitions
    pub fn flakiness_rate(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let flips = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .filter(|(a, b)| a.passed() != b.passed())
            .count();
        flips as f64 / (self.samples.len() - 1) as f64
    }

    /// Samples that passed only after a retry
    pub fn retry_recoveries(&self) -> usize {
        self.samples
            .iter()
            .filter(|s| s.passed() && s.attempts > 1)
            .count()
    }

    pub fn last(&self) -> Option<&TestSample> {
        self.samples.back()
    }
}

/// Suite-level outcome of one run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    /// Percent, 0..100
    pub pass_rate: f64,
    pub execution_ms: u64,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub verdict: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionHistory {
    pub test_window: usize,
    pub run_window: usize,
    tests: BTreeMap<String, TestHistory>,
    runs: VecDeque<RunRecord>,
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_TEST_WINDOW)
    }
}

impl ExecutionHistory {
    pub fn new(test_window: usize) -> Self {
        Self {
            test_window: test_window.max(1),
            run_window: DEFAULT_RUN_WINDOW,
            tests: BTreeMap::new(),
            runs: VecDeque::new(),
        }
    }

    pub fn with_run_window(mut self, run_window: usize) -> Self {
        self.run_window = run_window.max(1);
        self
    }

    /// Record authoritative results; skipped tests carry no signal
    pub fn record_results(&mut self, results: &[TestResult]) {
        for result in results.iter().filter(|r| r.status != TestStatus::Skipped) {
            self.tests
                .entry(result.test_id.clone())
                .or_default()
                .push(TestSample::from_result(result), self.test_window);
        }
    }

    pub fn record_run(&mut self, record: RunRecord) {
        self.runs.push_back(record);
        while self.runs.len() > self.run_window {
            self.runs.pop_front();
        }
    }

    pub fn get(&self, test_id: &str) -> Option<&TestHistory> {
        self.tests.get(test_id).filter(|h| !h.is_empty())
    }

    pub fn tests(&self) -> impl Iterator<Item = (&str, &TestHistory)> {
        self.tests.iter().map(|(id, h)| (id.as_str(), h))
    }

    pub fn runs(&self) -> &VecDeque<RunRecord> {
        &self.runs
    }

    /// Run pass rates, oldest first
    pub fn pass_rate_series(&self) -> Vec<f64> {
        self.runs.iter().map(|r| r.pass_rate).collect()
    }

    /// No per-test samples at all
    pub fn is_empty(&self) -> bool {
        self.tests.values().all(TestHistory::is_empty)
    }

    pub fn test_count(&self) -> usize {
        self.tests.len()
    }
}
