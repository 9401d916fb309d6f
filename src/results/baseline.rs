//! File-backed performance baseline

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

use super::stats::SampleStats;
use crate::analysis::{
    BaselineComparison, Bottleneck, PerformanceBaselineService, PerformanceMetric,
    PerformanceSnapshot, Regression,
};
use crate::error::CollaboratorError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Samples kept in the rolling baseline
    pub max_samples: usize,
    /// Samples needed before the standard deviation is trusted
    pub min_samples_for_stddev: usize,
    pub stddev_factor: f64,
    /// Relative tolerance, also the floor when the baseline is tight
    pub relative_tolerance: f64,
    /// Relative excess over the baseline mean that marks a bottleneck
    pub bottleneck_ratio: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            max_samples: 20,
            min_samples_for_stddev: 3,
            stddev_factor: 2.0,
            relative_tolerance: 0.10,
            bottleneck_ratio: 0.5,
        }
    }
}

pub struct FileBaselineService {
    path: PathBuf,
    config: BaselineConfig,
    samples: Mutex<Vec<PerformanceSnapshot>>,
}

impl FileBaselineService {
    /// Open a baseline file; a missing file starts an empty baseline
    pub fn open(path: impl Into<PathBuf>, config: BaselineConfig) -> Result<Self> {
        let path = path.into();
        let samples = if path.exists() {
            let file = File::open(&path)
                .with_context(|| format!("Failed to open baseline file: {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Failed to parse baseline file: {}", path.display()))?
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            config,
            samples: Mutex::new(samples),
        })
    }

    pub async fn sample_count(&self) -> usize {
        self.samples.lock().await.len()
    }

    fn persist(&self, samples: &[PerformanceSnapshot]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.path)
            .with_context(|| format!("Failed to create baseline file: {}", self.path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), samples)
            .context("Failed to write baseline")?;
        Ok(())
    }

    fn compare_metric(
        &self,
        metric: PerformanceMetric,
        current: f64,
        stats: &SampleStats,
        comparison: &mut BaselineComparison,
    ) {
        if stats.count == 0 || stats.mean <= 0.0 {
            return;
        }

        let relative = stats.mean * self.config.relative_tolerance;
        let tolerance = if stats.count >= self.config.min_samples_for_stddev {
            (stats.std_dev * self.config.stddev_factor).max(relative)
        } else {
            relative
        };

        let worse_by = if metric.higher_is_better() {
            stats.mean - current
        } else {
            current - stats.mean
        };

        if worse_by > tolerance {
            comparison.regressions.push(Regression {
                metric,
                baseline: stats.mean,
                current,
                change_percent: (current - stats.mean) / stats.mean * 100.0,
            });
        }

        if worse_by > stats.mean * self.config.bottleneck_ratio {
            comparison.bottlenecks.push(Bottleneck {
                metric,
                value: current,
                reference: stats.mean,
                description: format!(
                    "{} at {:.1}{} vs baseline {:.1}{}",
                    metric,
                    current,
                    metric.unit(),
                    stats.mean,
                    metric.unit()
                ),
            });
        }
    }
}

fn failed(message: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::Failed {
        service: "baseline".to_string(),
        message: message.to_string(),
    }
}

#[async_trait]
impl PerformanceBaselineService for FileBaselineService {
    async fn compare(
        &self,
        current: &PerformanceSnapshot,
    ) -> Result<BaselineComparison, CollaboratorError> {
        let samples = self.samples.lock().await;
        let mut comparison = BaselineComparison {
            samples: samples.len(),
            ..Default::default()
        };

        for (metric, value) in current.measured() {
            let history: Vec<f64> = samples.iter().filter_map(|s| s.get(metric)).collect();
            let stats = SampleStats::from_samples(&history);
            self.compare_metric(metric, value, &stats, &mut comparison);
        }

        debug!(
            "Baseline comparison: {} regressions, {} bottlenecks over {} samples",
            comparison.regressions.len(),
            comparison.bottlenecks.len(),
            comparison.samples
        );
        Ok(comparison)
    }

    async fn store(&self, current: &PerformanceSnapshot) -> Result<(), CollaboratorError> {
        let mut samples = self.samples.lock().await;
        samples.push(current.clone());
        let excess = samples.len().saturating_sub(self.config.max_samples.max(1));
        samples.drain(..excess);
        self.persist(&samples).map_err(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn response(ms: f64) -> PerformanceSnapshot {
        PerformanceSnapshot {
            response_time_ms: Some(ms),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_baseline_has_no_regressions() {
        let dir = tempdir().unwrap();
        let service =
            FileBaselineService::open(dir.path().join("baseline.json"), BaselineConfig::default())
                .unwrap();
        let comparison = service.compare(&response(500.0)).await.unwrap();
        assert!(!comparison.has_regression());
        assert_eq!(comparison.samples, 0);
    }

    #[tokio::test]
    async fn test_regression_with_few_samples_uses_relative_tolerance() {
        let dir = tempdir().unwrap();
        let service =
            FileBaselineService::open(dir.path().join("baseline.json"), BaselineConfig::default())
                .unwrap();
        service.store(&response(100.0)).await.unwrap();

        assert!(!service.compare(&response(109.0)).await.unwrap().has_regression());
        let comparison = service.compare(&response(120.0)).await.unwrap();
        assert!(comparison.has_regression());
        assert!((comparison.regressions[0].change_percent - 20.0).abs() < 1e-9);
        assert!(comparison.bottlenecks.is_empty());
    }

    #[tokio::test]
    async fn test_bottleneck_and_throughput_direction() {
        let dir = tempdir().unwrap();
        let service =
            FileBaselineService::open(dir.path().join("baseline.json"), BaselineConfig::default())
                .unwrap();
        service
            .store(&PerformanceSnapshot {
                response_time_ms: Some(100.0),
                throughput: Some(10.0),
                ..Default::default()
            })
            .await
            .unwrap();

        let comparison = service
            .compare(&PerformanceSnapshot {
                response_time_ms: Some(200.0),
                throughput: Some(12.0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(comparison.regressions.len(), 1);
        assert_eq!(comparison.regressions[0].metric, PerformanceMetric::ResponseTime);
        assert_eq!(comparison.bottlenecks.len(), 1);
    }

    #[tokio::test]
    async fn test_store_persists_and_rolls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("baseline.json");
        let config = BaselineConfig {
            max_samples: 2,
            ..Default::default()
        };
        let service = FileBaselineService::open(&path, config.clone()).unwrap();
        for ms in [1.0, 2.0, 3.0] {
            service.store(&response(ms)).await.unwrap();
        }

        let reopened = FileBaselineService::open(&path, config).unwrap();
        assert_eq!(reopened.sample_count().await, 2);
    }
}
