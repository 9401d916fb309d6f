//! Performance gate
//!
//! Each measured metric is normalized against its target to 0..=100 and the
//! weights are renormalized over whatever was measured. A baseline regression
//! and any bottlenecks are then subtracted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{check_weights, GateContext, QualityGate};
use crate::analysis::{
    BaselineComparison, Bottleneck, PerformanceBaselineService, PerformanceMetric,
    PerformanceSnapshot,
};
use crate::error::{ConfigError, GateError};
use crate::models::{QualityGateResult, Recommendation, RecommendationType};

/// Value at or better than which a metric scores 100
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceTargets {
    pub execution_time_ms: f64,
    pub memory_mb: f64,
    pub cpu_percent: f64,
    pub response_time_ms: f64,
    /// Tests per second
    pub throughput: f64,
}

impl Default for PerformanceTargets {
    fn default() -> Self {
        Self {
            execution_time_ms: 300_000.0,
            memory_mb: 2048.0,
            cpu_percent: 80.0,
            response_time_ms: 1000.0,
            throughput: 1.0,
        }
    }
}

impl PerformanceTargets {
    pub fn get(&self, metric: PerformanceMetric) -> f64 {
        match metric {
            PerformanceMetric::ExecutionTime => self.execution_time_ms,
            PerformanceMetric::Memory => self.memory_mb,
            PerformanceMetric::Cpu => self.cpu_percent,
            PerformanceMetric::ResponseTime => self.response_time_ms,
            PerformanceMetric::Throughput => self.throughput,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceWeights {
    pub execution_time: f64,
    pub memory: f64,
    pub cpu: f64,
    pub response_time: f64,
    pub throughput: f64,
}

impl Default for PerformanceWeights {
    fn default() -> Self {
        Self {
            execution_time: 0.3,
            memory: 0.25,
            cpu: 0.2,
            response_time: 0.15,
            throughput: 0.1,
        }
    }
}

impl PerformanceWeights {
    pub fn get(&self, metric: PerformanceMetric) -> f64 {
        match metric {
            PerformanceMetric::ExecutionTime => self.execution_time,
            PerformanceMetric::Memory => self.memory,
            PerformanceMetric::Cpu => self.cpu,
            PerformanceMetric::ResponseTime => self.response_time,
            PerformanceMetric::Throughput => self.throughput,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_weights(
            "performance",
            &[
                ("execution_time", self.execution_time),
                ("memory", self.memory),
                ("cpu", self.cpu),
                ("response_time", self.response_time),
                ("throughput", self.throughput),
            ],
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceGateConfig {
    pub threshold: f64,
    pub critical: bool,
    pub targets: PerformanceTargets,
    pub weights: PerformanceWeights,
    pub regression_penalty: f64,
    pub bottleneck_penalty: f64,
    pub max_bottleneck_penalty: f64,
    /// Sub-score below which a metric counts as a bottleneck without a baseline
    pub bottleneck_score: f64,
}

impl Default for PerformanceGateConfig {
    fn default() -> Self {
        Self {
            threshold: 80.0,
            critical: false,
            targets: PerformanceTargets::default(),
            weights: PerformanceWeights::default(),
            regression_penalty: 15.0,
            bottleneck_penalty: 5.0,
            max_bottleneck_penalty: 20.0,
            bottleneck_score: 50.0,
        }
    }
}

pub struct PerformanceGate {
    config: PerformanceGateConfig,
    baseline: Option<Arc<dyn PerformanceBaselineService>>,
}

impl PerformanceGate {
    pub fn new(config: PerformanceGateConfig) -> Self {
        Self {
            config,
            baseline: None,
        }
    }

    pub fn with_baseline(mut self, baseline: Option<Arc<dyn PerformanceBaselineService>>) -> Self {
        self.baseline = baseline;
        self
    }

    /// Normalized 0..=100 score of one metric against its target
    pub fn sub_score(&self, metric: PerformanceMetric, value: f64) -> f64 {
        let target = self.config.targets.get(metric);
        let ratio = if metric.higher_is_better() {
            if target <= 0.0 {
                1.0
            } else {
                value / target
            }
        } else if value <= 0.0 {
            1.0
        } else {
            target / value
        };
        100.0 * ratio.clamp(0.0, 1.0)
    }

    /// Weighted score over the measured metrics, with their sub-scores
    pub fn base_score(
        &self,
        snapshot: &PerformanceSnapshot,
    ) -> Result<(f64, Vec<(PerformanceMetric, f64, f64)>), GateError> {
        let measured = snapshot.measured();
        if measured.is_empty() {
            return Err(GateError::MissingData(
                "no performance metrics measured".to_string(),
            ));
        }

        let scored: Vec<_> = measured
            .into_iter()
            .map(|(metric, value)| (metric, value, self.sub_score(metric, value)))
            .collect();
        let total_weight: f64 = scored
            .iter()
            .map(|(m, _, _)| self.config.weights.get(*m))
            .sum();
        if total_weight <= 0.0 {
            return Err(GateError::MissingData(
                "only zero-weighted performance metrics measured".to_string(),
            ));
        }

        let weighted: f64 = scored
            .iter()
            .map(|(m, _, s)| self.config.weights.get(*m) * s)
            .sum();
        Ok((weighted / total_weight, scored))
    }

    fn local_bottlenecks(&self, scored: &[(PerformanceMetric, f64, f64)]) -> Vec<Bottleneck> {
        scored
            .iter()
            .filter(|(_, _, score)| *score < self.config.bottleneck_score)
            .map(|(metric, value, _)| {
                let target = self.config.targets.get(*metric);
                Bottleneck {
                    metric: *metric,
                    value: *value,
                    reference: target,
                    description: format!(
                        "{metric} at {value:.1}{} against a target of {target:.1}{}",
                        metric.unit(),
                        metric.unit()
                    ),
                }
            })
            .collect()
    }

    async fn compare(
        &self,
        snapshot: &PerformanceSnapshot,
        scored: &[(PerformanceMetric, f64, f64)],
        details: &mut Vec<String>,
    ) -> BaselineComparison {
        let local = || BaselineComparison {
            bottlenecks: self.local_bottlenecks(scored),
            ..Default::default()
        };
        let Some(baseline) = &self.baseline else {
            return local();
        };

        match baseline.compare(snapshot).await {
            Ok(comparison) => {
                if let Err(e) = baseline.store(snapshot).await {
                    warn!("Failed to store performance baseline: {}", e);
                    details.push(format!("baseline not updated: {e}"));
                }
                comparison
            }
            Err(e) => {
                warn!("Baseline comparison failed, using targets only: {}", e);
                details.push(format!("performance baseline unavailable: {e}"));
                local()
            }
        }
    }
}

#[async_trait]
impl QualityGate for PerformanceGate {
    fn id(&self) -> &str {
        "performance"
    }

    fn name(&self) -> &str {
        "Performance"
    }

    fn threshold(&self) -> f64 {
        self.config.threshold
    }

    fn is_critical(&self) -> bool {
        self.config.critical
    }

    async fn validate(&self, ctx: &GateContext) -> Result<QualityGateResult, GateError> {
        if let Some(verdict) = ctx.too_few_tests(self) {
            return Ok(verdict.critical(self.config.critical));
        }

        let derived = PerformanceSnapshot::from_execution(&ctx.metrics, ctx.wall_ms);
        let snapshot = ctx.performance.clone().unwrap_or_default().or(&derived);
        let (base, scored) = self.base_score(&snapshot)?;
        debug!("Performance base score {:.1} over {} metrics", base, scored.len());

        let mut details = Vec::new();
        let comparison = self.compare(&snapshot, &scored, &mut details).await;
        let regression_penalty = if comparison.has_regression() {
            self.config.regression_penalty
        } else {
            0.0
        };
        let bottleneck_penalty = (self.config.bottleneck_penalty
            * comparison.bottlenecks.len() as f64)
            .min(self.config.max_bottleneck_penalty);

        let mut result = QualityGateResult::evaluated(
            self.id(),
            self.name(),
            base - regression_penalty - bottleneck_penalty,
            self.config.threshold,
        )
        .critical(self.config.critical)
        .with_metric("base_score", base)
        .with_metric("regression_penalty", regression_penalty)
        .with_metric("bottleneck_penalty", bottleneck_penalty)
        .with_metric("baseline_samples", comparison.samples as f64);

        for (metric, value, score) in &scored {
            result = result
                .with_metric(metric.name(), *value)
                .with_metric(format!("{}_score", metric.name()), *score);
        }

        for regression in &comparison.regressions {
            result = result.with_recommendation(Recommendation::new(
                RecommendationType::HighPriority,
                self.id(),
                format!(
                    "{} regressed {:+.1}% against baseline ({:.1} -> {:.1}{})",
                    regression.metric,
                    regression.change_percent,
                    regression.baseline,
                    regression.current,
                    regression.metric.unit()
                ),
                format!("Profile recent changes affecting {}", regression.metric),
            ));
        }

        for bottleneck in &comparison.bottlenecks {
            result = result.with_recommendation(Recommendation::new(
                RecommendationType::Optimization,
                self.id(),
                bottleneck.description.clone(),
                format!("Reduce {}", bottleneck.metric),
            ));
        }

        Ok(result.with_details(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Regression;
    use crate::error::CollaboratorError;
    use crate::models::{Test, TestResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn healthy() -> PerformanceSnapshot {
        PerformanceSnapshot {
            execution_time_ms: Some(60_000.0),
            memory_mb: Some(512.0),
            cpu_percent: Some(40.0),
            response_time_ms: Some(200.0),
            throughput: Some(5.0),
        }
    }

    fn context(snapshot: PerformanceSnapshot) -> GateContext {
        GateContext::from_results(vec![TestResult::passed(&Test::new("a", "A"), 1)])
            .with_performance(snapshot)
    }

    #[test]
    fn test_sub_scores() {
        let gate = PerformanceGate::new(PerformanceGateConfig::default());
        assert_eq!(gate.sub_score(PerformanceMetric::Memory, 1024.0), 100.0);
        assert_eq!(gate.sub_score(PerformanceMetric::Memory, 4096.0), 50.0);
        assert_eq!(gate.sub_score(PerformanceMetric::Throughput, 0.5), 50.0);
        assert_eq!(gate.sub_score(PerformanceMetric::Throughput, 3.0), 100.0);
        assert_eq!(gate.sub_score(PerformanceMetric::ResponseTime, 0.0), 100.0);
    }

    #[tokio::test]
    async fn test_healthy_run_scores_100() {
        let gate = PerformanceGate::new(PerformanceGateConfig::default());
        let result = gate.validate(&context(healthy())).await.unwrap();
        assert_eq!(result.score, 100.0);
        assert!(result.passed);
        assert!(result.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_slow_execution_lowers_score() {
        let gate = PerformanceGate::new(PerformanceGateConfig::default());
        let snapshot = PerformanceSnapshot {
            execution_time_ms: Some(600_000.0),
            ..healthy()
        };
        let result = gate.validate(&context(snapshot)).await.unwrap();
        assert!((result.score - 85.0).abs() < 1e-9);
        assert_eq!(result.metrics["bottleneck_penalty"], 0.0);
    }

    #[tokio::test]
    async fn test_local_bottleneck_penalty() {
        let gate = PerformanceGate::new(PerformanceGateConfig::default());
        let snapshot = PerformanceSnapshot {
            memory_mb: Some(8192.0),
            ..healthy()
        };
        let result = gate.validate(&context(snapshot)).await.unwrap();
        // 0.25 * 25 + 0.75 * 100 = 81.25, less one bottleneck
        assert!((result.score - 76.25).abs() < 1e-9);
        assert!(!result.passed);
        assert_eq!(result.recommendations.len(), 1);
    }

    #[tokio::test]
    async fn test_weights_renormalized_over_measured_metrics() {
        let gate = PerformanceGate::new(PerformanceGateConfig::default());
        let snapshot = PerformanceSnapshot {
            memory_mb: Some(4096.0),
            ..Default::default()
        };
        // Derived: execution time 0ms and response time 1ms both score 100
        let result = gate.validate(&context(snapshot)).await.unwrap();
        let expected = (0.25 * 50.0 + 0.3 * 100.0 + 0.15 * 100.0) / 0.7;
        assert!((result.score - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_nothing_measured_is_missing_data() {
        let gate = PerformanceGate::new(PerformanceGateConfig::default());
        let (base, _) = gate.base_score(&healthy()).unwrap();
        assert_eq!(base, 100.0);
        assert!(matches!(
            gate.base_score(&PerformanceSnapshot::default()),
            Err(GateError::MissingData(_))
        ));
    }

    struct RegressedBaseline {
        stored: AtomicUsize,
    }

    #[async_trait]
    impl PerformanceBaselineService for RegressedBaseline {
        async fn compare(
            &self,
            current: &PerformanceSnapshot,
        ) -> Result<BaselineComparison, CollaboratorError> {
            Ok(BaselineComparison {
                regressions: vec![Regression {
                    metric: PerformanceMetric::ResponseTime,
                    baseline: 100.0,
                    current: current.response_time_ms.unwrap_or_default(),
                    change_percent: 100.0,
                }],
                bottlenecks: Vec::new(),
                samples: 5,
            })
        }

        async fn store(&self, _current: &PerformanceSnapshot) -> Result<(), CollaboratorError> {
            self.stored.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct DownBaseline;

    #[async_trait]
    impl PerformanceBaselineService for DownBaseline {
        async fn compare(
            &self,
            _current: &PerformanceSnapshot,
        ) -> Result<BaselineComparison, CollaboratorError> {
            Err(CollaboratorError::Unavailable("baseline".into()))
        }

        async fn store(&self, _current: &PerformanceSnapshot) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::Unavailable("baseline".into()))
        }
    }

    #[tokio::test]
    async fn test_regression_penalty_and_store() {
        let baseline = Arc::new(RegressedBaseline {
            stored: AtomicUsize::new(0),
        });
        let gate = PerformanceGate::new(PerformanceGateConfig::default())
            .with_baseline(Some(baseline.clone()));

        let result = gate.validate(&context(healthy())).await.unwrap();
        assert_eq!(result.score, 85.0);
        assert_eq!(result.metrics["baseline_samples"], 5.0);
        assert_eq!(baseline.stored.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.recommendations[0].kind,
            RecommendationType::HighPriority
        );
    }

    #[tokio::test]
    async fn test_baseline_failure_degrades() {
        let gate = PerformanceGate::new(PerformanceGateConfig::default())
            .with_baseline(Some(Arc::new(DownBaseline)));
        let result = gate.validate(&context(healthy())).await.unwrap();
        assert_eq!(result.score, 100.0);
        assert!(result.details[0].contains("unavailable"));
    }
}
