//! Pass-rate gate
//!
//! `adjusted = raw - flakiness_penalty + trend_adjustment`, where
//! `flakiness_penalty = min(cap, flaky_weight * flaky/total + unstable_weight * unstable/total)`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::{GateContext, QualityGate};
use crate::analysis::{FlakinessReport, ReliabilityAnalyzer, Trend, TrendDirection};
use crate::error::GateError;
use crate::models::{QualityGateResult, Recommendation, RecommendationType, TestStatus};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassRateGateConfig {
    pub threshold: f64,
    pub critical: bool,
    pub flaky_weight: f64,
    pub unstable_weight: f64,
    pub max_flakiness_penalty: f64,
    pub improving_bonus: f64,
    pub declining_penalty: f64,
}

impl Default for PassRateGateConfig {
    fn default() -> Self {
        Self {
            threshold: 95.0,
            critical: true,
            flaky_weight: 15.0,
            unstable_weight: 8.0,
            max_flakiness_penalty: 25.0,
            improving_bonus: 2.0,
            declining_penalty: 3.0,
        }
    }
}

pub struct PassRateGate {
    config: PassRateGateConfig,
    analyzer: Option<Arc<dyn ReliabilityAnalyzer>>,
}

impl PassRateGate {
    pub fn new(config: PassRateGateConfig) -> Self {
        Self {
            config,
            analyzer: None,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Option<Arc<dyn ReliabilityAnalyzer>>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn flakiness_penalty(&self, flaky: usize, unstable: usize, total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let total = total as f64;
        (self.config.flaky_weight * flaky as f64 / total
            + self.config.unstable_weight * unstable as f64 / total)
            .min(self.config.max_flakiness_penalty)
    }

    pub fn trend_adjustment(&self, trend: &Trend) -> f64 {
        let confidence = trend.confidence.clamp(0.0, 1.0);
        match trend.direction {
            TrendDirection::Improving => self.config.improving_bonus * confidence,
            TrendDirection::Declining => -self.config.declining_penalty * confidence,
            TrendDirection::Stable => 0.0,
        }
    }

    /// Tests that failed and then passed within this run
    fn local_flakiness(ctx: &GateContext) -> FlakinessReport {
        let flaky = ctx
            .results
            .iter()
            .filter(|r| r.status == TestStatus::Passed && r.attempt > 1)
            .map(|r| r.test_id.clone())
            .collect();
        FlakinessReport {
            flaky,
            unstable: Vec::new(),
            analyzed: ctx.results.len(),
        }
    }

    async fn reliability(&self, ctx: &GateContext, details: &mut Vec<String>) -> (FlakinessReport, Trend) {
        let Some(analyzer) = &self.analyzer else {
            return (Self::local_flakiness(ctx), Trend::stable());
        };

        let flakiness = match analyzer.detect_flaky(&ctx.attempts, &ctx.history).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Flakiness detection failed, using retry recoveries: {}", e);
                details.push(format!("reliability analyzer unavailable: {e}"));
                Self::local_flakiness(ctx)
            }
        };
        let trend = match analyzer.analyze_trend(&ctx.history).await {
            Ok(trend) => trend,
            Err(e) => {
                warn!("Trend analysis failed, assuming stable: {}", e);
                details.push(format!("trend analysis unavailable: {e}"));
                Trend::stable()
            }
        };
        (flakiness, trend)
    }
}

#[async_trait]
impl QualityGate for PassRateGate {
    fn id(&self) -> &str {
        "pass-rate"
    }

    fn name(&self) -> &str {
        "Pass Rate"
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

        let metrics = &ctx.metrics;
        let raw = metrics.pass_rate;
        if !raw.is_finite() {
            return Err(GateError::MalformedMetrics(format!("pass rate {raw}")));
        }

        let mut details = Vec::new();
        let (flakiness, trend) = self.reliability(ctx, &mut details).await;
        let penalty =
            self.flakiness_penalty(flakiness.flaky_count(), flakiness.unstable_count(), metrics.total);
        let adjustment = self.trend_adjustment(&trend);

        let mut result = QualityGateResult::evaluated(
            self.id(),
            self.name(),
            raw - penalty + adjustment,
            self.config.threshold,
        )
        .critical(self.config.critical)
        .with_metric("raw_pass_rate", raw)
        .with_metric("flakiness_penalty", penalty)
        .with_metric("trend_adjustment", adjustment)
        .with_metric("trend_confidence", trend.confidence)
        .with_metric("flaky_tests", flakiness.flaky_count() as f64)
        .with_metric("unstable_tests", flakiness.unstable_count() as f64)
        .with_metric("total", metrics.total as f64)
        .with_metric("passed", metrics.passed as f64)
        .with_metric("failed", metrics.failed as f64)
        .with_metric("errors", metrics.errors as f64);

        if metrics.failures() > 0 {
            let failing: Vec<&str> = ctx
                .results
                .iter()
                .filter(|r| matches!(r.status, TestStatus::Failed | TestStatus::Error))
                .map(|r| r.test_id.as_str())
                .take(5)
                .collect();
            result = result.with_recommendation(Recommendation::new(
                RecommendationType::HighPriority,
                self.id(),
                format!("{} tests failing", metrics.failures()),
                format!("Fix failing tests: {}", failing.join(", ")),
            ));
        }

        if !flakiness.flaky.is_empty() {
            result = result.with_recommendation(Recommendation::new(
                RecommendationType::HighPriority,
                self.id(),
                format!("{} flaky tests detected", flakiness.flaky_count()),
                format!(
                    "Quarantine or stabilise: {}",
                    flakiness.flaky.iter().take(5).cloned().collect::<Vec<_>>().join(", ")
                ),
            ));
        }

        if !flakiness.unstable.is_empty() {
            result = result.with_recommendation(Recommendation::new(
                RecommendationType::Optimization,
                self.id(),
                format!("{} unstable tests", flakiness.unstable_count()),
                "Investigate tests with a low historical pass rate",
            ));
        }

        if trend.direction == TrendDirection::Declining {
            result = result.with_recommendation(Recommendation::new(
                RecommendationType::Optimization,
                self.id(),
                format!("Pass rate declining by {:.1} points per run", -trend.slope),
                "Review recent changes for regressions",
            ));
        }

        Ok(result.with_details(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::models::{Test, TestResult};
    use crate::results::ExecutionHistory;

    struct FixedAnalyzer {
        flaky: usize,
        trend: Trend,
    }

    #[async_trait]
    impl ReliabilityAnalyzer for FixedAnalyzer {
        async fn detect_flaky(
            &self,
            _attempts: &[TestResult],
            _history: &ExecutionHistory,
        ) -> Result<FlakinessReport, CollaboratorError> {
            Ok(FlakinessReport {
                flaky: (0..self.flaky).map(|i| format!("t{i}")).collect(),
                unstable: Vec::new(),
                analyzed: 100,
            })
        }

        async fn analyze_trend(
            &self,
            _history: &ExecutionHistory,
        ) -> Result<Trend, CollaboratorError> {
            Ok(self.trend)
        }
    }

    struct DownAnalyzer;

    #[async_trait]
    impl ReliabilityAnalyzer for DownAnalyzer {
        async fn detect_flaky(
            &self,
            _attempts: &[TestResult],
            _history: &ExecutionHistory,
        ) -> Result<FlakinessReport, CollaboratorError> {
            Err(CollaboratorError::Unavailable("reliability".into()))
        }

        async fn analyze_trend(
            &self,
            _history: &ExecutionHistory,
        ) -> Result<Trend, CollaboratorError> {
            Err(CollaboratorError::Unavailable("reliability".into()))
        }
    }

    fn hundred_tests(passing: usize) -> GateContext {
        let results = (0..100)
            .map(|i| {
                let test = Test::new(format!("t{i}"), format!("T{i}"));
                if i < passing {
                    TestResult::passed(&test, 1)
                } else {
                    TestResult::failed(&test, 1, "assertion")
                }
            })
            .collect();
        GateContext::from_results(results)
    }

    #[tokio::test]
    async fn test_flaky_penalty_fails_critical_gate() {
        let gate = PassRateGate::new(PassRateGateConfig::default()).with_analyzer(Some(Arc::new(
            FixedAnalyzer {
                flaky: 2,
                trend: Trend::stable(),
            },
        )));

        let result = gate.validate(&hundred_tests(93)).await.unwrap();
        assert!((result.metrics["raw_pass_rate"] - 93.0).abs() < 1e-9);
        assert!((result.metrics["flakiness_penalty"] - 0.3).abs() < 1e-9);
        assert!((result.score - 92.7).abs() < 1e-9);
        assert!(!result.passed);
        assert!(result.critical);
    }

    #[tokio::test]
    async fn test_trend_adjustment() {
        let gate = PassRateGate::new(PassRateGateConfig::default()).with_analyzer(Some(Arc::new(
            FixedAnalyzer {
                flaky: 0,
                trend: Trend {
                    direction: TrendDirection::Improving,
                    confidence: 0.5,
                    slope: 2.0,
                },
            },
        )));
        let result = gate.validate(&hundred_tests(94)).await.unwrap();
        assert!((result.score - 95.0).abs() < 1e-9);
        assert!(result.passed);

        let declining = Trend {
            direction: TrendDirection::Declining,
            confidence: 1.0,
            slope: -4.0,
        };
        assert_eq!(gate.trend_adjustment(&declining), -3.0);
    }

    #[test]
    fn test_penalty_is_capped() {
        let gate = PassRateGate::new(PassRateGateConfig::default());
        assert_eq!(gate.flakiness_penalty(10, 10, 10), 25.0);
        assert_eq!(gate.flakiness_penalty(1, 1, 0), 0.0);
    }

    #[tokio::test]
    async fn test_without_analyzer_uses_retry_recoveries() {
        let gate = PassRateGate::new(PassRateGateConfig::default());
        let flaky = Test::new("flaky", "Flaky");
        let steady = Test::new("steady", "Steady");
        let ctx = GateContext::from_results(vec![
            TestResult::passed(&flaky, 1).with_attempt(2),
            TestResult::passed(&steady, 1),
        ]);

        let result = gate.validate(&ctx).await.unwrap();
        assert_eq!(result.metrics["flaky_tests"], 1.0);
        assert!((result.score - 92.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_analyzer_failure_degrades_to_local() {
        let gate = PassRateGate::new(PassRateGateConfig::default())
            .with_analyzer(Some(Arc::new(DownAnalyzer)));
        let result = gate.validate(&hundred_tests(100)).await.unwrap();
        assert_eq!(result.score, 100.0);
        assert_eq!(result.details.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_tests_passes_at_100() {
        let gate = PassRateGate::new(PassRateGateConfig::default());
        let result = gate.validate(&GateContext::from_results(Vec::new())).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.score, 100.0);
    }
}
