//! Test execution engine
//!
//! Strategies drive an [`ExecutionPlan`] batch by batch through an
//! [`AttemptRunner`]. Batch N+1 never starts before batch N has drained.

mod adaptive;
mod command;
mod context;
mod environment;
mod monitor;
mod parallel;
mod runner;
mod sequential;

pub use adaptive::{AdaptiveConfig, AdaptiveStrategy, SharedHistory};
pub use command::CommandExecutor;
pub use context::{CancellationToken, ExecutionContext};
pub use environment::{
    EnvironmentHandle, EnvironmentProvisioner, EnvironmentScope, LocalProvisioner,
};
pub use monitor::{
    FixedResourceMonitor, LoadBalancingConfig, ResourceMonitor, ResourceSnapshot,
    SystemResourceMonitor,
};
pub use parallel::ParallelStrategy;
pub use runner::{AttemptRunner, BackoffPolicy, RetryPolicy, TestExecutor, MAX_RETRIES};
pub use sequential::SequentialStrategy;

#[cfg(test)]
pub(crate) use runner::testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Test, TestResult, TestStatus};
use crate::scheduler::{ExecutionPlan, TestBatch};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Sequential,
    #[default]
    Parallel,
    Adaptive,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Sequential => "sequential",
            StrategyKind::Parallel => "parallel",
            StrategyKind::Adaptive => "adaptive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sequential" | "seq" => Some(StrategyKind::Sequential),
            "parallel" | "par" => Some(StrategyKind::Parallel),
            "adaptive" => Some(StrategyKind::Adaptive),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn execute(&self, plan: &ExecutionPlan, ctx: &ExecutionContext) -> ExecutionResult;
}

/// What happened to one batch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: usize,
    pub layer: usize,
    pub tests: usize,
    /// Worker slots actually granted to the batch
    pub concurrency: usize,
    /// An infrastructure failure cut the batch short
    pub aborted: bool,
    /// Skipped because the suite was cancelled before it started
    pub cancelled: bool,
    pub resources: Option<monitor::ResourceSnapshot>,
    pub duration_ms: u64,
}

impl BatchReport {
    fn new(batch: &TestBatch, concurrency: usize) -> Self {
        Self {
            batch_id: batch.id,
            layer: batch.layer,
            tests: batch.len(),
            concurrency,
            aborted: false,
            cancelled: false,
            resources: None,
            duration_ms: 0,
        }
    }
}

/// Raw output of a strategy run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub strategy: StrategyKind,
    /// Authoritative (last) attempt per test, in execution order
    pub results: Vec<TestResult>,
    /// Every attempt, including the authoritative ones
    pub attempts: Vec<TestResult>,
    pub batches: Vec<BatchReport>,
    pub cancelled: bool,
    /// Adaptive strategy only: how much the history backs the ordering
    pub confidence: Option<f64>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            results: Vec::new(),
            attempts: Vec::new(),
            batches: Vec::new(),
            cancelled: false,
            confidence: None,
            duration_ms: 0,
        }
    }

    /// Record one batch; `per_test` holds the attempts of each test in order
    pub(crate) fn record_batch(&mut self, report: BatchReport, per_test: Vec<Vec<TestResult>>) {
        for attempts in per_test {
            if let Some(last) = attempts.last() {
                self.results.push(last.clone());
            }
            self.attempts.extend(attempts);
        }
        self.batches.push(report);
    }

    /// Mark the batches that were never started
    pub(crate) fn record_cancelled(&mut self, batches: &[TestBatch]) {
        self.cancelled = true;
        for batch in batches {
            let mut report = BatchReport::new(batch, 0);
            report.cancelled = true;
            let skipped = batch
                .tests
                .iter()
                .map(|t| vec![TestResult::skipped(t, crate::models::CANCELLED)])
                .collect();
            self.record_batch(report, skipped);
        }
    }

    pub fn result_for(&self, test_id: &str) -> Option<&TestResult> {
        self.results.iter().find(|r| r.test_id == test_id)
    }

    pub fn attempts_for(&self, test_id: &str) -> Vec<&TestResult> {
        self.attempts.iter().filter(|r| r.test_id == test_id).collect()
    }

    pub fn retry_count(&self) -> usize {
        self.attempts.len().saturating_sub(self.results.len())
    }

    /// Tests that failed at least once and then passed
    pub fn recovered_on_retry(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.status == TestStatus::Passed && r.attempt > 1)
            .map(|r| r.test_id.as_str())
            .collect()
    }
}

/// Tests of a batch that never started because a sibling hit infrastructure trouble
pub(crate) fn aborted(test: &Test) -> Vec<TestResult> {
    vec![TestResult::skipped(test, crate::models::ABORTED_BY_BATCH_FAILURE)]
}
