//! Test result models
//!
//! Defines per-attempt outcomes and their status types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Test;

/// Skip reason for tests left unstarted after an infrastructure failure
pub const ABORTED_BY_BATCH_FAILURE: &str = "aborted_by_batch_failure";

/// Skip reason for tests in batches never started after cancellation
pub const CANCELLED: &str = "cancelled";

/// Test execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::Skipped => "○",
            TestStatus::Error => "!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }

    /// Failed and errored attempts are eligible for retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::Error)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "PASS"),
            TestStatus::Failed => write!(f, "FAIL"),
            TestStatus::Skipped => write!(f, "SKIP"),
            TestStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Classification of a failure or error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Assertion,
    Exception,
    Timeout,
    Infrastructure,
    Environment,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Assertion => "assertion",
            ErrorKind::Exception => "exception",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Infrastructure => "infrastructure",
            ErrorKind::Environment => "environment",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestError {
    pub message: String,
    pub kind: ErrorKind,
}

impl TestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

/// Coverage percentages by category
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageMetrics {
    pub line: f64,
    pub branch: f64,
    pub function: f64,
    pub statement: f64,
}

impl CoverageMetrics {
    pub fn new(line: f64, branch: f64, function: f64, statement: f64) -> Self {
        Self {
            line,
            branch,
            function,
            statement,
        }
    }

    /// Component-wise sum, saturating at 100%
    pub fn accumulate(&self, delta: &CoverageMetrics) -> CoverageMetrics {
        CoverageMetrics {
            line: (self.line + delta.line).min(100.0),
            branch: (self.branch + delta.branch).min(100.0),
            function: (self.function + delta.function).min(100.0),
            statement: (self.statement + delta.statement).min(100.0),
        }
    }
}

/// Optional per-attempt resource and coverage measurements
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    #[serde(default)]
    pub memory_mb: Option<f64>,

    #[serde(default)]
    pub cpu_percent: Option<f64>,

    /// Coverage gained by this test
    #[serde(default)]
    pub coverage_delta: Option<CoverageMetrics>,
}

/// What the execution capability reports for one attempt
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub status: TestStatus,
    pub execution_ms: u64,
    pub error: Option<TestError>,
    pub metrics: Option<TestMetrics>,
    pub message: Option<String>,
}

impl TestOutcome {
    pub fn passed(execution_ms: u64) -> Self {
        Self {
            status: TestStatus::Passed,
            execution_ms,
            error: None,
            metrics: None,
            message: None,
        }
    }

    pub fn failed(execution_ms: u64, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: TestStatus::Failed,
            execution_ms,
            error: Some(TestError::new(ErrorKind::Assertion, message.clone())),
            metrics: None,
            message: Some(message),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: TestStatus::Skipped,
            execution_ms: 0,
            error: None,
            metrics: None,
            message: Some(reason.into()),
        }
    }

    pub fn with_metrics(mut self, metrics: TestMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Result of one attempt of one test
///
/// Records are never mutated after creation; a retry produces a new record
/// with a higher `attempt`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub test_name: String,
    pub status: TestStatus,
    pub execution_ms: u64,
    /// 1-based attempt number
    pub attempt: u32,
    pub message: Option<String>,
    pub error: Option<TestError>,
    pub metrics: Option<TestMetrics>,
    pub finished_at: DateTime<Utc>,
}

impl TestResult {
    fn base(test: &Test, status: TestStatus, execution_ms: u64) -> Self {
        Self {
            test_id: test.id.clone(),
            test_name: test.name.clone(),
            status,
            execution_ms,
            attempt: 1,
            message: None,
            error: None,
            metrics: None,
            finished_at: Utc::now(),
        }
    }

    pub fn passed(test: &Test, execution_ms: u64) -> Self {
        Self::base(test, TestStatus::Passed, execution_ms)
    }

    pub fn failed(test: &Test, execution_ms: u64, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut result = Self::base(test, TestStatus::Failed, execution_ms);
        result.error = Some(TestError::new(ErrorKind::Assertion, message.clone()));
        result.message = Some(message);
        result
    }

    pub fn skipped(test: &Test, reason: impl Into<String>) -> Self {
        let mut result = Self::base(test, TestStatus::Skipped, 0);
        result.message = Some(reason.into());
        result
    }

    pub fn error(test: &Test, kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut result = Self::base(test, TestStatus::Error, 0);
        result.error = Some(TestError::new(kind, message.clone()));
        result.message = Some(message);
        result
    }

    /// Build a record from what the execution capability reported
    pub fn from_outcome(test: &Test, outcome: TestOutcome) -> Self {
        let mut result = Self::base(test, outcome.status, outcome.execution_ms);
        result.message = outcome
            .message
            .or_else(|| outcome.error.as_ref().map(|e| e.message.clone()));
        result.error = outcome.error;
        result.metrics = outcome.metrics;
        result
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_execution_ms(mut self, execution_ms: u64) -> Self {
        self.execution_ms = execution_ms;
        self
    }

    pub fn with_metrics(mut self, metrics: TestMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn is_infrastructure_failure(&self) -> bool {
        self.error_kind() == Some(ErrorKind::Infrastructure)
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.test_name,
            self.execution_ms
        )?;
        if self.attempt > 1 {
            write!(f, " (attempt {})", self.attempt)?;
        }
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}
