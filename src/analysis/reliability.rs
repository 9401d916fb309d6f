//! Flakiness and trend analysis

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::CollaboratorError;
use crate::models::{TestResult, TestStatus};
use crate::results::{linear_fit, ExecutionHistory};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlakinessReport {
    /// Tests whose outcome changes without code changes
    pub flaky: Vec<String>,
    /// Tests failing often enough to distrust, but not flipping
    pub unstable: Vec<String>,
    pub analyzed: usize,
}

impl FlakinessReport {
    pub fn flaky_count(&self) -> usize {
        self.flaky.len()
    }

    pub fn unstable_count(&self) -> usize {
        self.unstable.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendDirection::Improving => "improving",
            TrendDirection::Stable => "stable",
            TrendDirection::Declining => "declining",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    /// 0..1
    pub confidence: f64,
    /// Pass-rate change per run, percentage points
    pub slope: f64,
}

impl Trend {
    pub fn stable() -> Self {
        Self {
            direction: TrendDirection::Stable,
            confidence: 0.0,
            slope: 0.0,
        }
    }
}

#[async_trait]
pub trait ReliabilityAnalyzer: Send + Sync {
    /// `attempts` holds every attempt of the current run
    async fn detect_flaky(
        &self,
        attempts: &[TestResult],
        history: &ExecutionHistory,
    ) -> Result<FlakinessReport, CollaboratorError>;

    async fn analyze_trend(&self, history: &ExecutionHistory) -> Result<Trend, CollaboratorError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Samples needed before history alone can mark a test
    pub min_samples: usize,
    /// Flip rate at or above which a test is flaky
    pub flaky_flip_rate: f64,
    /// Historic pass rate (0..1) below which a test is unstable
    pub unstable_pass_rate: f64,
    /// Runs needed before a trend is reported
    pub min_runs: usize,
    /// Slope (points per run) separating stable from moving
    pub trend_slope: f64,
    /// Runs at which trend confidence saturates
    pub trend_saturation_runs: usize,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            min_samples: 3,
            flaky_flip_rate: 0.3,
            unstable_pass_rate: 0.9,
            min_runs: 3,
            trend_slope: 0.5,
            trend_saturation_runs: 10,
        }
    }
}

/// Bundled analyzer working from the run's attempts and the rolling history
#[derive(Clone, Debug, Default)]
pub struct HistoryReliabilityAnalyzer {
    config: ReliabilityConfig,
}

impl HistoryReliabilityAnalyzer {
    pub fn new(config: ReliabilityConfig) -> Self {
        Self { config }
    }

    fn classify(&self, attempts: &[TestResult], history: &ExecutionHistory) -> FlakinessReport {
        let mut per_test: BTreeMap<&str, Vec<&TestResult>> = BTreeMap::new();
        for attempt in attempts {
            per_test.entry(attempt.test_id.as_str()).or_default().push(attempt);
        }

        let mut flaky = BTreeSet::new();
        let mut unstable = BTreeSet::new();

        for (id, runs) in &per_test {
            let passed = runs.iter().any(|r| r.status == TestStatus::Passed);
            let failed = runs.iter().any(|r| r.status.is_retryable());
            if passed && failed {
                flaky.insert(id.to_string());
            }
        }

        for (id, h) in history.tests() {
            if h.len() < self.config.min_samples || flaky.contains(id) {
                continue;
            }
            if h.flakiness_rate() >= self.config.flaky_flip_rate || h.retry_recoveries() > 0 {
                flaky.insert(id.to_string());
            } else if h.pass_rate() < self.config.unstable_pass_rate {
                unstable.insert(id.to_string());
            }
        }

        let analyzed = per_test
            .keys()
            .map(|k| k.to_string())
            .chain(history.tests().map(|(id, _)| id.to_string()))
            .collect::<BTreeSet<_>>()
            .len();

        FlakinessReport {
            flaky: flaky.into_iter().collect(),
            unstable: unstable.into_iter().collect(),
            analyzed,
        }
    }
}

#[async_trait]
impl ReliabilityAnalyzer for HistoryReliabilityAnalyzer {
    async fn detect_flaky(
        &self,
        attempts: &[TestResult],
        history: &ExecutionHistory,
    ) -> Result<FlakinessReport, CollaboratorError> {
        Ok(self.classify(attempts, history))
    }

    async fn analyze_trend(&self, history: &ExecutionHistory) -> Result<Trend, CollaboratorError> {
        let series = history.pass_rate_series();
        if series.len() < self.config.min_runs {
            return Ok(Trend::stable());
        }
        let Some(fit) = linear_fit(&series) else {
            return Ok(Trend::stable());
        };

        let direction = if fit.slope > self.config.trend_slope {
            TrendDirection::Improving
        } else if fit.slope < -self.config.trend_slope {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        };
        let saturation = self.config.trend_saturation_runs.max(1) as f64;
        let confidence = (fit.r_squared * (series.len() as f64 / saturation).min(1.0)).clamp(0.0, 1.0);

        Ok(Trend {
            direction,
            confidence,
            slope: fit.slope,
        })
    }
}
