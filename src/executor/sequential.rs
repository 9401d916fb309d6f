//! Sequential execution: one batch at a time, one test at a time

use async_trait::async_trait;
use std::time::Instant;
use tracing::{info, warn};

use super::{aborted, BatchReport, ExecutionContext, ExecutionResult, ExecutionStrategy, StrategyKind};
use crate::models::TestResult;
use crate::scheduler::{ExecutionPlan, TestBatch};

#[derive(Clone, Debug, Default)]
pub struct SequentialStrategy;

impl SequentialStrategy {
    pub fn new() -> Self {
        Self
    }

    /// Run a batch test by test; an infrastructure failure skips the rest
    pub(crate) async fn run_batch(
        batch: &TestBatch,
        ctx: &ExecutionContext,
    ) -> (BatchReport, Vec<Vec<TestResult>>) {
        let start = Instant::now();
        let mut report = BatchReport::new(batch, 1);
        let mut per_test = Vec::with_capacity(batch.len());

        for test in &batch.tests {
            if report.aborted {
                per_test.push(aborted(test));
                continue;
            }
            let attempts = ctx.runner.run_with_retries(test).await;
            if attempts.last().is_some_and(TestResult::is_infrastructure_failure) {
                warn!(
                    "Batch {} aborted by infrastructure failure in {}",
                    batch.id, test.id
                );
                report.aborted = true;
            }
            per_test.push(attempts);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        (report, per_test)
    }
}

#[async_trait]
impl ExecutionStrategy for SequentialStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sequential
    }

    async fn execute(&self, plan: &ExecutionPlan, ctx: &ExecutionContext) -> ExecutionResult {
        let start = Instant::now();
        let mut result = ExecutionResult::new(self.kind());

        for (i, batch) in plan.batches.iter().enumerate() {
            if ctx.is_cancelled() {
                info!("Cancelled, skipping {} remaining batches", plan.batches.len() - i);
                result.record_cancelled(&plan.batches[i..]);
                break;
            }
            let (report, per_test) = Self::run_batch(batch, ctx).await;
            result.record_batch(report, per_test);
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{statuses, ScriptedExecutor, Step};
    use crate::executor::AttemptRunner;
    use crate::models::{Test, TestStatus, ABORTED_BY_BATCH_FAILURE, CANCELLED};
    use crate::scheduler::BatchScheduler;
    use std::sync::Arc;

    fn plan(tests: &[Test]) -> ExecutionPlan {
        BatchScheduler::new(4).schedule(tests).unwrap()
    }

    #[tokio::test]
    async fn test_runs_in_plan_order() {
        let tests = vec![
            Test::new("a", "A"),
            Test::new("b", "B").depends_on("a"),
            Test::new("c", "C").depends_on("b"),
        ];
        let executor = Arc::new(ScriptedExecutor::new());
        let ctx = ExecutionContext::new(AttemptRunner::new(executor.clone()));

        let result = SequentialStrategy::new().execute(&plan(&tests), &ctx).await;
        assert_eq!(executor.calls(), vec!["a", "b", "c"]);
        assert_eq!(executor.peak(), 1);
        assert!(result.results.iter().all(|r| r.status == TestStatus::Passed));
    }

    #[tokio::test]
    async fn test_throwing_test_does_not_affect_siblings() {
        let tests = vec![Test::new("a", "A"), Test::new("b", "B"), Test::new("c", "C")];
        let executor = Arc::new(ScriptedExecutor::new().script("b", vec![Step::Throw("boom")]));
        let ctx = ExecutionContext::new(AttemptRunner::new(executor));

        let result = SequentialStrategy::new().execute(&plan(&tests), &ctx).await;
        assert_eq!(
            statuses(&result.results),
            vec![
                ("a".to_string(), TestStatus::Passed),
                ("b".to_string(), TestStatus::Error),
                ("c".to_string(), TestStatus::Passed),
            ]
        );
    }

    #[tokio::test]
    async fn test_infrastructure_failure_aborts_rest_of_batch_only() {
        let tests = vec![
            Test::new("a", "A"),
            Test::new("b", "B"),
            Test::new("c", "C"),
            Test::new("d", "D").depends_on("a"),
        ];
        let executor = Arc::new(ScriptedExecutor::new().script("a", vec![Step::Infra("db gone")]));
        let ctx = ExecutionContext::new(AttemptRunner::new(executor));

        let result = SequentialStrategy::new().execute(&plan(&tests), &ctx).await;
        assert!(result.batches[0].aborted);
        for id in ["b", "c"] {
            let r = result.result_for(id).unwrap();
            assert_eq!(r.status, TestStatus::Skipped);
            assert_eq!(r.message.as_deref(), Some(ABORTED_BY_BATCH_FAILURE));
        }
        assert_eq!(result.result_for("d").unwrap().status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() {
        let tests = vec![Test::new("a", "A"), Test::new("b", "B").depends_on("a")];
        let executor = Arc::new(ScriptedExecutor::new());
        let ctx = ExecutionContext::new(AttemptRunner::new(executor.clone()));
        ctx.cancellation.cancel();

        let result = SequentialStrategy::new().execute(&plan(&tests), &ctx).await;
        assert!(result.cancelled);
        assert!(executor.calls().is_empty());
        assert_eq!(result.results.len(), 2);
        assert!(result
            .results
            .iter()
            .all(|r| r.message.as_deref() == Some(CANCELLED)));
    }
}
