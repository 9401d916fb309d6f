//! Coverage gate
//!
//! Weighted line/branch/function/statement coverage, less a risk penalty for
//! critical-path gaps. Each category's penalty is capped at that category's
//! full share of the score.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use super::{check_weights, GateContext, QualityGate};
use crate::analysis::{CoverageAnalyzer, CoverageCategory, CriticalGap};
use crate::error::{ConfigError, GateError};
use crate::models::{CoverageMetrics, QualityGateResult, Recommendation, RecommendationType};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageWeights {
    pub line: f64,
    pub branch: f64,
    pub function: f64,
    pub statement: f64,
}

impl Default for CoverageWeights {
    fn default() -> Self {
        Self {
            line: 0.3,
            branch: 0.3,
            function: 0.2,
            statement: 0.2,
        }
    }
}

impl CoverageWeights {
    pub fn get(&self, category: CoverageCategory) -> f64 {
        match category {
            CoverageCategory::Line => self.line,
            CoverageCategory::Branch => self.branch,
            CoverageCategory::Function => self.function,
            CoverageCategory::Statement => self.statement,
        }
    }

    pub fn total(&self) -> f64 {
        self.line + self.branch + self.function + self.statement
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_weights(
            "coverage",
            &[
                ("line", self.line),
                ("branch", self.branch),
                ("function", self.function),
                ("statement", self.statement),
            ],
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageGateConfig {
    pub threshold: f64,
    pub critical: bool,
    pub weights: CoverageWeights,
    /// Multiplier applied to critical-path gap percentages
    pub risk_factor: f64,
}

impl Default for CoverageGateConfig {
    fn default() -> Self {
        Self {
            threshold: 80.0,
            critical: false,
            weights: CoverageWeights::default(),
            risk_factor: 1.0,
        }
    }
}

pub struct CoverageGate {
    config: CoverageGateConfig,
    analyzer: Option<Arc<dyn CoverageAnalyzer>>,
}

impl CoverageGate {
    pub fn new(config: CoverageGateConfig) -> Self {
        Self {
            config,
            analyzer: None,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Option<Arc<dyn CoverageAnalyzer>>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Normalized weighted average of the four categories
    pub fn base_score(&self, coverage: &CoverageMetrics) -> Result<f64, GateError> {
        let total = self.config.weights.total();
        if !(total.is_finite() && total > 0.0) {
            return Err(GateError::MalformedMetrics(
                "coverage weights sum to zero".to_string(),
            ));
        }

        let mut sum = 0.0;
        for category in CoverageCategory::all() {
            let value = category.value(coverage);
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(GateError::MalformedMetrics(format!(
                    "{category} coverage {value} is outside 0..=100"
                )));
            }
            sum += self.config.weights.get(category) * value;
        }
        Ok(sum / total)
    }

    /// Penalty per category for the given gaps
    pub fn risk_penalties(&self, gaps: &[CriticalGap]) -> BTreeMap<CoverageCategory, f64> {
        let total = self.config.weights.total();
        let mut gap_sums: BTreeMap<CoverageCategory, f64> = BTreeMap::new();
        for gap in gaps {
            *gap_sums.entry(gap.category).or_default() += gap.gap_percent.max(0.0);
        }

        gap_sums
            .into_iter()
            .map(|(category, gap)| {
                let weight = self.config.weights.get(category) / total;
                let penalty = (weight * gap * self.config.risk_factor).min(weight * 100.0);
                (category, penalty)
            })
            .collect()
    }

    async fn critical_gaps(
        &self,
        coverage: &CoverageMetrics,
        reported: &[CriticalGap],
        details: &mut Vec<String>,
    ) -> Vec<CriticalGap> {
        let Some(analyzer) = &self.analyzer else {
            return reported.to_vec();
        };
        match analyzer.critical_gaps(coverage).await {
            Ok(gaps) => gaps,
            Err(e) => {
                warn!("Coverage analyzer failed, using reported gaps: {}", e);
                details.push(format!("coverage analyzer unavailable: {e}"));
                reported.to_vec()
            }
        }
    }
}

#[async_trait]
impl QualityGate for CoverageGate {
    fn id(&self) -> &str {
        "coverage"
    }

    fn name(&self) -> &str {
        "Coverage"
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

        let mut details = Vec::new();
        let (coverage, reported_gaps) = match (&ctx.coverage, &ctx.metrics.coverage) {
            (Some(report), _) => (report.metrics, report.critical_gaps.as_slice()),
            (None, Some(accumulated)) => {
                details.push("coverage accumulated from per-test deltas".to_string());
                (*accumulated, &[][..])
            }
            (None, None) => {
                warn!("No coverage source for this run, skipping coverage gate");
                return Ok(QualityGateResult::skipped(
                    self.id(),
                    self.name(),
                    self.config.threshold,
                    "no coverage report and no per-test coverage deltas",
                )
                .critical(self.config.critical));
            }
        };

        let base = self.base_score(&coverage)?;
        let gaps = self.critical_gaps(&coverage, reported_gaps, &mut details).await;
        let penalties = self.risk_penalties(&gaps);
        let risk_penalty: f64 = penalties.values().sum();

        let mut result = QualityGateResult::evaluated(
            self.id(),
            self.name(),
            base - risk_penalty,
            self.config.threshold,
        )
        .critical(self.config.critical)
        .with_metric("base_score", base)
        .with_metric("risk_penalty", risk_penalty)
        .with_metric("critical_gaps", gaps.len() as f64);

        for category in CoverageCategory::all() {
            let value = category.value(&coverage);
            result = result.with_metric(category.name(), value);
            if value < self.config.threshold {
                let kind = if result.passed {
                    RecommendationType::Optimization
                } else {
                    RecommendationType::HighPriority
                };
                result = result.with_recommendation(Recommendation::new(
                    kind,
                    self.id(),
                    format!("{category} coverage is {value:.1}%"),
                    format!(
                        "Add tests to raise {category} coverage to {:.0}%",
                        self.config.threshold
                    ),
                ));
            }
        }

        for gap in &gaps {
            result = result.with_recommendation(Recommendation::new(
                RecommendationType::HighPriority,
                self.id(),
                format!(
                    "Critical path {} missing {:.1}% {} coverage",
                    gap.path, gap.gap_percent, gap.category
                ),
                format!("Cover {} with targeted tests", gap.path),
            ));
        }

        Ok(result.with_details(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CoverageReport;
    use crate::error::CollaboratorError;
    use crate::models::{GateStatus, Test, TestMetrics, TestResult};

    fn context(coverage: CoverageReport) -> GateContext {
        GateContext::from_results(vec![TestResult::passed(&Test::new("a", "A"), 1)])
            .with_coverage(coverage)
    }

    #[tokio::test]
    async fn test_weighted_coverage_passes() {
        let gate = CoverageGate::new(CoverageGateConfig::default());
        let ctx = context(CoverageReport::new(CoverageMetrics::new(90.0, 70.0, 95.0, 88.0)));

        let result = gate.validate(&ctx).await.unwrap();
        assert!((result.score - 84.6).abs() < 1e-9);
        assert!(result.passed);
        // Branch coverage below threshold still gets a recommendation
        assert_eq!(result.recommendations.len(), 1);
        assert_eq!(result.recommendations[0].kind, RecommendationType::Optimization);
    }

    #[tokio::test]
    async fn test_risk_penalty_for_critical_gaps() {
        let gate = CoverageGate::new(CoverageGateConfig::default());
        let mut report = CoverageReport::new(CoverageMetrics::new(90.0, 70.0, 95.0, 88.0));
        report.critical_gaps.push(CriticalGap {
            category: CoverageCategory::Branch,
            path: "src/auth.rs".into(),
            gap_percent: 20.0,
        });

        let result = gate.validate(&context(report)).await.unwrap();
        // 0.3 * 20 = 6 points off 84.6
        assert!((result.score - 78.6).abs() < 1e-9);
        assert!(!result.passed);
    }

    #[test]
    fn test_penalty_capped_by_category_weight() {
        let gate = CoverageGate::new(CoverageGateConfig {
            risk_factor: 10.0,
            ..Default::default()
        });
        let penalties = gate.risk_penalties(&[CriticalGap {
            category: CoverageCategory::Function,
            path: "src/lib.rs".into(),
            gap_percent: 50.0,
        }]);
        assert!((penalties[&CoverageCategory::Function] - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_falls_back_to_per_test_deltas() {
        let gate = CoverageGate::new(CoverageGateConfig::default());
        let result = TestResult::passed(&Test::new("a", "A"), 1).with_metrics(TestMetrics {
            coverage_delta: Some(CoverageMetrics::new(85.0, 85.0, 85.0, 85.0)),
            ..Default::default()
        });
        let ctx = GateContext::from_results(vec![result]);

        let result = gate.validate(&ctx).await.unwrap();
        assert!((result.score - 85.0).abs() < 1e-9);
        assert_eq!(result.details.len(), 1);
    }

    #[tokio::test]
    async fn test_no_coverage_source_skips_gate() {
        let gate = CoverageGate::new(CoverageGateConfig::default());
        let ctx = GateContext::from_results(vec![TestResult::passed(&Test::new("a", "A"), 1)]);

        let result = gate.validate(&ctx).await.unwrap();
        assert_eq!(result.status, GateStatus::Skipped);
        assert!(!result.was_evaluated());
        assert!(result.error.is_none());
        assert!(result.details[0].contains("no coverage report"));
    }

    #[tokio::test]
    async fn test_malformed_coverage_is_an_error() {
        let gate = CoverageGate::new(CoverageGateConfig::default());
        let ctx = context(CoverageReport::new(CoverageMetrics::new(140.0, 70.0, 95.0, 88.0)));
        assert!(matches!(
            gate.validate(&ctx).await,
            Err(GateError::MalformedMetrics(_))
        ));
    }

    struct BrokenAnalyzer;

    #[async_trait]
    impl CoverageAnalyzer for BrokenAnalyzer {
        async fn critical_gaps(
            &self,
            _coverage: &CoverageMetrics,
        ) -> Result<Vec<CriticalGap>, CollaboratorError> {
            Err(CollaboratorError::Unavailable("gap analyzer".into()))
        }
    }

    #[tokio::test]
    async fn test_analyzer_failure_degrades() {
        let gate = CoverageGate::new(CoverageGateConfig::default())
            .with_analyzer(Some(Arc::new(BrokenAnalyzer)));
        let ctx = context(CoverageReport::new(CoverageMetrics::new(90.0, 90.0, 90.0, 90.0)));

        let result = gate.validate(&ctx).await.unwrap();
        assert!(result.passed);
        assert!(result.details[0].contains("unavailable"));
    }
}
