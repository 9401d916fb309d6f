//! Performance measurements and baseline comparison types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CollaboratorError;
use crate::results::ExecutionMetrics;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMetric {
    ExecutionTime,
    Memory,
    Cpu,
    ResponseTime,
    Throughput,
}

impl PerformanceMetric {
    pub fn all() -> [PerformanceMetric; 5] {
        [
            PerformanceMetric::ExecutionTime,
            PerformanceMetric::Memory,
            PerformanceMetric::Cpu,
            PerformanceMetric::ResponseTime,
            PerformanceMetric::Throughput,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            PerformanceMetric::ExecutionTime => "execution_time",
            PerformanceMetric::Memory => "memory",
            PerformanceMetric::Cpu => "cpu",
            PerformanceMetric::ResponseTime => "response_time",
            PerformanceMetric::Throughput => "throughput",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            PerformanceMetric::ExecutionTime | PerformanceMetric::ResponseTime => "ms",
            PerformanceMetric::Memory => "MB",
            PerformanceMetric::Cpu => "%",
            PerformanceMetric::Throughput => "tests/s",
        }
    }

    pub fn higher_is_better(&self) -> bool {
        matches!(self, PerformanceMetric::Throughput)
    }
}

impl fmt::Display for PerformanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One run's performance figures; `None` means not measured
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSnapshot {
    pub execution_time_ms: Option<f64>,
    pub memory_mb: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub response_time_ms: Option<f64>,
    pub throughput: Option<f64>,
}

impl PerformanceSnapshot {
    /// Derive from aggregated results and the run's wall-clock time
    ///
    /// Response time is the mean per-test time; throughput is executed tests
    /// per second of wall-clock time.
    pub fn from_execution(metrics: &ExecutionMetrics, wall_ms: u64) -> Self {
        let executed = metrics.executable();
        Self {
            execution_time_ms: (executed > 0).then_some(wall_ms as f64),
            memory_mb: metrics.resources.peak_memory_mb,
            cpu_percent: metrics.resources.avg_cpu_percent,
            response_time_ms: metrics.mean_execution_ms(),
            throughput: (executed > 0 && wall_ms > 0)
                .then(|| executed as f64 / (wall_ms as f64 / 1000.0)),
        }
    }

    pub fn get(&self, metric: PerformanceMetric) -> Option<f64> {
        let value = match metric {
            PerformanceMetric::ExecutionTime => self.execution_time_ms,
            PerformanceMetric::Memory => self.memory_mb,
            PerformanceMetric::Cpu => self.cpu_percent,
            PerformanceMetric::ResponseTime => self.response_time_ms,
            PerformanceMetric::Throughput => self.throughput,
        };
        value.filter(|v| v.is_finite() && *v >= 0.0)
    }

    /// Fill unmeasured fields from `other`
    pub fn or(self, other: &PerformanceSnapshot) -> Self {
        Self {
            execution_time_ms: self.execution_time_ms.or(other.execution_time_ms),
            memory_mb: self.memory_mb.or(other.memory_mb),
            cpu_percent: self.cpu_percent.or(other.cpu_percent),
            response_time_ms: self.response_time_ms.or(other.response_time_ms),
            throughput: self.throughput.or(other.throughput),
        }
    }

    pub fn measured(&self) -> Vec<(PerformanceMetric, f64)> {
        PerformanceMetric::all()
            .into_iter()
            .filter_map(|m| self.get(m).map(|v| (m, v)))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub metric: PerformanceMetric,
    pub baseline: f64,
    pub current: f64,
    /// Signed change relative to baseline, percent
    pub change_percent: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub metric: PerformanceMetric,
    pub value: f64,
    pub reference: f64,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineComparison {
    pub regressions: Vec<Regression>,
    pub bottlenecks: Vec<Bottleneck>,
    /// Baseline samples the comparison was made against
    pub samples: usize,
}

impl BaselineComparison {
    pub fn has_regression(&self) -> bool {
        !self.regressions.is_empty()
    }
}

#[async_trait]
pub trait PerformanceBaselineService: Send + Sync {
    async fn compare(
        &self,
        current: &PerformanceSnapshot,
    ) -> Result<BaselineComparison, CollaboratorError>;

    async fn store(&self, current: &PerformanceSnapshot) -> Result<(), CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_execution() {
        let metrics = ExecutionMetrics {
            total: 5,
            passed: 4,
            skipped: 1,
            failed: 0,
            errors: 0,
            execution_ms: 400,
            ..Default::default()
        };
        let snapshot = PerformanceSnapshot::from_execution(&metrics, 2_000);
        assert_eq!(snapshot.execution_time_ms, Some(2_000.0));
        assert_eq!(snapshot.response_time_ms, Some(100.0));
        assert_eq!(snapshot.throughput, Some(2.0));
        assert_eq!(snapshot.memory_mb, None);
        assert_eq!(snapshot.measured().len(), 3);
    }

    #[test]
    fn test_empty_run_measures_nothing() {
        let snapshot = PerformanceSnapshot::from_execution(&ExecutionMetrics::default(), 10);
        assert!(snapshot.measured().is_empty());
    }

    #[test]
    fn test_or_prefers_self() {
        let supplied = PerformanceSnapshot {
            response_time_ms: Some(250.0),
            ..Default::default()
        };
        let derived = PerformanceSnapshot {
            response_time_ms: Some(90.0),
            memory_mb: Some(512.0),
            ..Default::default()
        };
        let merged = supplied.or(&derived);
        assert_eq!(merged.response_time_ms, Some(250.0));
        assert_eq!(merged.memory_mb, Some(512.0));
    }
}
