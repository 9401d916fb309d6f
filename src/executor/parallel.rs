//! Parallel execution
//!
//! All tests of a batch run concurrently on a semaphore-bounded pool; the
//! batch drains before the next one starts. Resource usage is polled before
//! each batch and an overloaded host halves the pool for that batch.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::monitor::{LoadBalancingConfig, ResourceMonitor, ResourceSnapshot};
use super::{
    aborted, BatchReport, CancellationToken, ExecutionContext, ExecutionResult,
    ExecutionStrategy, StrategyKind,
};
use crate::models::{ErrorKind, TestResult};
use crate::scheduler::{ExecutionPlan, TestBatch};

pub struct ParallelStrategy {
    max_concurrency: usize,
    monitor: Option<Arc<dyn ResourceMonitor>>,
    load_balancing: LoadBalancingConfig,
}

impl ParallelStrategy {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            monitor: None,
            load_balancing: LoadBalancingConfig::default(),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_load_balancing(mut self, config: LoadBalancingConfig) -> Self {
        self.load_balancing = config;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn poll_resources(&self) -> Option<ResourceSnapshot> {
        let monitor = self.monitor.as_ref()?;
        match monitor.snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Resource monitor unavailable, using full concurrency: {}", e);
                None
            }
        }
    }

    async fn run_batch(
        &self,
        batch: &TestBatch,
        ctx: &ExecutionContext,
    ) -> (BatchReport, Vec<Vec<TestResult>>) {
        let start = Instant::now();
        let snapshot = self.poll_resources();
        let concurrency = self
            .load_balancing
            .effective_concurrency(self.max_concurrency, snapshot.as_ref());
        if concurrency < self.max_concurrency {
            info!(
                "Batch {}: host under load, running with {} of {} workers",
                batch.id, concurrency, self.max_concurrency
            );
        }

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let abort = CancellationToken::new();
        let mut handles = Vec::with_capacity(batch.len());

        for test in batch.tests.iter().cloned() {
            let semaphore = semaphore.clone();
            let abort = abort.clone();
            let runner = ctx.runner.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return vec![TestResult::error(
                            &test,
                            ErrorKind::Infrastructure,
                            "worker pool closed",
                        )]
                    }
                };
                if abort.is_cancelled() {
                    return aborted(&test);
                }

                debug!("Starting {}", test.id);
                let attempts = runner.run_with_retries(&test).await;
                if attempts.last().is_some_and(TestResult::is_infrastructure_failure) {
                    warn!("Infrastructure failure in {}, aborting batch", test.id);
                    abort.cancel();
                }
                attempts
            }));
        }

        let joined = join_all(handles).await;
        let per_test = batch
            .tests
            .iter()
            .zip(joined)
            .map(|(test, joined)| match joined {
                Ok(attempts) => attempts,
                Err(e) => vec![TestResult::error(
                    test,
                    ErrorKind::Exception,
                    format!("worker task failed: {e}"),
                )],
            })
            .collect();

        let mut report = BatchReport::new(batch, concurrency);
        report.aborted = abort.is_cancelled();
        report.resources = snapshot;
        report.duration_ms = start.elapsed().as_millis() as u64;
        (report, per_test)
    }
}

#[async_trait]
impl ExecutionStrategy for ParallelStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Parallel
    }

    async fn execute(&self, plan: &ExecutionPlan, ctx: &ExecutionContext) -> ExecutionResult {
        let start = Instant::now();
        let mut result = ExecutionResult::new(self.kind());
        info!(
            "Running {} tests in {} batches (max {} concurrent)",
            plan.test_count(),
            plan.batches.len(),
            self.max_concurrency
        );

        for (i, batch) in plan.batches.iter().enumerate() {
            if ctx.is_cancelled() {
                info!("Cancelled, skipping {} remaining batches", plan.batches.len() - i);
                result.record_cancelled(&plan.batches[i..]);
                break;
            }
            let (report, per_test) = self.run_batch(batch, ctx).await;
            result.record_batch(report, per_test);
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }
}
