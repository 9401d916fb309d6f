//! Single-test attempt runner
//!
//! Wraps the execution capability with a per-attempt timeout and retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::models::{ErrorKind, Test, TestOutcome, TestResult};
use crate::utils::timer::Timer;

/// Capability that runs one test and reports what happened
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Run a single test. `timeout` is advisory; the runner enforces it.
    async fn run_one(&self, test: &Test, timeout: Duration)
        -> Result<TestOutcome, ExecutionError>;

    fn name(&self) -> &str {
        "executor"
    }
}

/// Exponential backoff between retries
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 100,
            multiplier: 2.0,
            max_ms: 5_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let ms = (self.initial_ms as f64 * factor).min(self.max_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }
}

/// Upper bound accepted for `max_retries`
pub const MAX_RETRIES: u32 = 100;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Option<BackoffPolicy>,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Runs attempts of a test against an executor
#[derive(Clone)]
pub struct AttemptRunner {
    executor: Arc<dyn TestExecutor>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl AttemptRunner {
    pub fn new(executor: Arc<dyn TestExecutor>) -> Self {
        Self {
            executor,
            timeout: Duration::from_secs(300),
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run one attempt
    ///
    /// The attempt runs on its own task. When the timeout elapses first the
    /// task is detached and keeps running; only the record is marked timed out.
    pub async fn run_attempt(&self, test: &Test, attempt: u32) -> TestResult {
        let timer = Timer::start(format!("{} attempt {}", test.id, attempt));
        let executor = self.executor.clone();
        let owned = test.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(async move { executor.run_one(&owned, timeout).await });

        let result = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Ok(outcome))) => TestResult::from_outcome(test, outcome),
            Ok(Ok(Err(ExecutionError::Test(msg)))) => {
                TestResult::error(test, ErrorKind::Exception, msg)
                    .with_execution_ms(timer.elapsed_ms())
            }
            Ok(Ok(Err(ExecutionError::Infrastructure(msg)))) => {
                TestResult::error(test, ErrorKind::Infrastructure, msg)
                    .with_execution_ms(timer.elapsed_ms())
            }
            Ok(Ok(Err(ExecutionError::Timeout(_)))) => {
                TestResult::error(test, ErrorKind::Timeout, "timeout")
                    .with_execution_ms(timer.elapsed_ms())
            }
            Ok(Err(join_err)) => {
                TestResult::error(test, ErrorKind::Exception, format!("test panicked: {join_err}"))
                    .with_execution_ms(timer.elapsed_ms())
            }
            Err(_) => {
                warn!(
                    "{} timed out after {}ms, leaving it running",
                    test.id,
                    timeout.as_millis()
                );
                TestResult::error(test, ErrorKind::Timeout, "timeout")
                    .with_execution_ms(timeout.as_millis() as u64)
            }
        };

        timer.stop();
        result.with_attempt(attempt)
    }

    /// Run until success, a non-retryable result, or the retry budget is spent
    ///
    /// Returns every attempt in order; the last one is authoritative.
    /// Infrastructure failures are never retried.
    pub async fn run_with_retries(&self, test: &Test) -> Vec<TestResult> {
        let mut attempts = Vec::new();

        for attempt in 1..=self.retry.max_attempts() {
            let result = self.run_attempt(test, attempt).await;
            let retry = attempt <= self.retry.max_retries
                && result.status.is_retryable()
                && !result.is_infrastructure_failure();

            debug!("{}", result);
            attempts.push(result);

            if !retry {
                break;
            }
            if let Some(backoff) = &self.retry.backoff {
                tokio::time::sleep(backoff.delay(attempt)).await;
            }
        }

        attempts
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted executor shared by the strategy tests

    use super::*;
    use crate::models::TestStatus;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Debug)]
    pub enum Step {
        Pass,
        Fail(&'static str),
        Throw(&'static str),
        Infra(&'static str),
        Sleep(u64),
        Panic,
    }

    /// Replays a per-test script; unscripted tests pass
    #[derive(Default)]
    pub struct ScriptedExecutor {
        scripts: Mutex<HashMap<String, Vec<Step>>>,
        pub calls: Mutex<Vec<String>>,
        running: AtomicUsize,
        pub peak: AtomicUsize,
        pub delay_ms: u64,
    }

    impl ScriptedExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_delay(mut self, delay_ms: u64) -> Self {
            self.delay_ms = delay_ms;
            self
        }

        pub fn script(self, id: &str, steps: Vec<Step>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(id.to_string(), steps);
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TestExecutor for ScriptedExecutor {
        async fn run_one(
            &self,
            test: &Test,
            _timeout: Duration,
        ) -> Result<TestOutcome, ExecutionError> {
            self.calls.lock().unwrap().push(test.id.clone());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let step = {
                let mut scripts = self.scripts.lock().unwrap();
                match scripts.get_mut(&test.id) {
                    Some(steps) if !steps.is_empty() => steps.remove(0),
                    _ => Step::Pass,
                }
            };

            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }

            let outcome = match step {
                Step::Pass => Ok(TestOutcome::passed(test.expected_execution_ms)),
                Step::Fail(msg) => Ok(TestOutcome::failed(5, msg)),
                Step::Throw(msg) => Err(ExecutionError::Test(msg.to_string())),
                Step::Infra(msg) => Err(ExecutionError::Infrastructure(msg.to_string())),
                Step::Sleep(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(TestOutcome::passed(ms))
                }
                Step::Panic => {
                    self.running.fetch_sub(1, Ordering::SeqCst);
                    panic!("scripted panic in {}", test.id);
                }
            };

            self.running.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    pub fn statuses(results: &[TestResult]) -> Vec<(String, TestStatus)> {
        results
            .iter()
            .map(|r| (r.test_id.clone(), r.status))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedExecutor, Step};
    use super::*;
    use crate::models::TestStatus;

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = BackoffPolicy {
            initial_ms: 100,
            multiplier: 2.0,
            max_ms: 300,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(300));
        assert_eq!(backoff.delay(10), Duration::from_millis(300));
    }

    #[test]
    fn test_max_attempts_saturates() {
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
        assert_eq!(RetryPolicy::retries(2).max_attempts(), 3);
        assert_eq!(RetryPolicy::retries(u32::MAX).max_attempts(), u32::MAX);
    }

    #[tokio::test]
    async fn test_retry_until_pass_keeps_every_attempt() {
        let executor = ScriptedExecutor::new().script("t", vec![Step::Fail("nope"), Step::Pass]);
        let runner = AttemptRunner::new(Arc::new(executor)).with_retry(RetryPolicy::retries(3));

        let attempts = runner.run_with_retries(&Test::new("t", "T")).await;
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].status, TestStatus::Failed);
        assert_eq!(attempts[1].status, TestStatus::Passed);
        assert_eq!(attempts[1].attempt, 2);
    }

    #[tokio::test]
    async fn test_retry_budget_is_respected() {
        let executor = ScriptedExecutor::new().script(
            "t",
            vec![Step::Fail("1"), Step::Fail("2"), Step::Fail("3"), Step::Pass],
        );
        let runner = AttemptRunner::new(Arc::new(executor)).with_retry(
            RetryPolicy::retries(2).with_backoff(BackoffPolicy {
                initial_ms: 1,
                multiplier: 2.0,
                max_ms: 5,
            }),
        );

        let attempts = runner.run_with_retries(&Test::new("t", "T")).await;
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts.last().unwrap().status, TestStatus::Failed);
    }

    #[tokio::test]
    async fn test_infrastructure_failure_is_not_retried() {
        let executor = ScriptedExecutor::new().script("t", vec![Step::Infra("node lost")]);
        let runner = AttemptRunner::new(Arc::new(executor)).with_retry(RetryPolicy::retries(3));

        let attempts = runner.run_with_retries(&Test::new("t", "T")).await;
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].is_infrastructure_failure());
    }

    #[tokio::test]
    async fn test_thrown_error_becomes_error_status() {
        let executor = ScriptedExecutor::new().script("t", vec![Step::Throw("boom")]);
        let runner = AttemptRunner::new(Arc::new(executor));

        let result = runner.run_attempt(&Test::new("t", "T"), 1).await;
        assert_eq!(result.status, TestStatus::Error);
        assert_eq!(result.error_kind(), Some(ErrorKind::Exception));
        assert_eq!(result.message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_panic_becomes_error_status() {
        let executor = ScriptedExecutor::new().script("t", vec![Step::Panic]);
        let runner = AttemptRunner::new(Arc::new(executor));

        let result = runner.run_attempt(&Test::new("t", "T"), 1).await;
        assert_eq!(result.status, TestStatus::Error);
    }

    #[tokio::test]
    async fn test_timeout_marks_attempt_without_waiting() {
        let executor = ScriptedExecutor::new().script("t", vec![Step::Sleep(2_000)]);
        let runner = AttemptRunner::new(Arc::new(executor)).with_timeout(Duration::from_millis(20));

        let timer = Timer::start("timeout");
        let result = runner.run_attempt(&Test::new("t", "T"), 1).await;
        assert!(timer.elapsed_ms() < 1_000);
        assert_eq!(result.status, TestStatus::Error);
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(result.message.as_deref(), Some("timeout"));
    }
}
