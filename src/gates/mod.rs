//! Quality gates
//!
//! Each gate turns a [`GateContext`] into a [`QualityGateResult`]. Gates never
//! panic on bad input; they return a [`GateError`] which the orchestrator
//! records as an errored gate.

mod coverage;
mod pass_rate;
mod performance;
mod security;

pub use coverage::{CoverageGate, CoverageGateConfig, CoverageWeights};
pub use pass_rate::{PassRateGate, PassRateGateConfig};
pub use performance::{PerformanceGate, PerformanceGateConfig, PerformanceTargets, PerformanceWeights};
pub use security::{SecurityGate, SecurityGateConfig, SeverityPenalties};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::analysis::{Collaborators, CoverageReport, PerformanceSnapshot};
use crate::error::{ConfigError, GateError};
use crate::models::{QualityGateResult, Recommendation, RecommendationType, TestResult};
use crate::results::{aggregate, ExecutionHistory, ExecutionMetrics};

#[async_trait]
pub trait QualityGate: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn threshold(&self) -> f64;
    /// Criticality when the orchestrator is not told otherwise
    fn is_critical(&self) -> bool;

    async fn validate(&self, ctx: &GateContext) -> Result<QualityGateResult, GateError>;
}

/// Everything gates may look at for one run
#[derive(Clone, Debug, Default)]
pub struct GateContext {
    pub run_id: String,
    pub suite_name: String,
    /// Authoritative result per test
    pub results: Vec<TestResult>,
    /// Every attempt, retries included
    pub attempts: Vec<TestResult>,
    pub metrics: ExecutionMetrics,
    pub history: ExecutionHistory,
    /// Externally measured coverage
    pub coverage: Option<CoverageReport>,
    /// Externally measured performance, merged over the derived figures
    pub performance: Option<PerformanceSnapshot>,
    /// Ids of tests that exercise security-relevant paths
    pub security_tests: BTreeSet<String>,
    pub wall_ms: u64,
    /// Fewer executable tests than this fails test-derived gates
    pub min_tests: Option<usize>,
}

impl GateContext {
    pub fn from_results(results: Vec<TestResult>) -> Self {
        Self {
            metrics: aggregate(&results),
            attempts: results.clone(),
            results,
            ..Default::default()
        }
    }

    pub fn with_attempts(mut self, attempts: Vec<TestResult>) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_history(mut self, history: ExecutionHistory) -> Self {
        self.history = history;
        self
    }

    pub fn with_coverage(mut self, coverage: CoverageReport) -> Self {
        self.coverage = Some(coverage);
        self
    }

    pub fn with_performance(mut self, performance: PerformanceSnapshot) -> Self {
        self.performance = Some(performance);
        self
    }

    pub fn with_security_tests(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.security_tests = ids.into_iter().collect();
        self
    }

    pub fn with_wall_ms(mut self, wall_ms: u64) -> Self {
        self.wall_ms = wall_ms;
        self
    }

    pub fn with_min_tests(mut self, min_tests: Option<usize>) -> Self {
        self.min_tests = min_tests;
        self
    }

    pub fn with_run(mut self, run_id: impl Into<String>, suite_name: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self.suite_name = suite_name.into();
        self
    }

    pub fn security_results(&self) -> impl Iterator<Item = &TestResult> {
        self.results
            .iter()
            .filter(|r| self.security_tests.contains(&r.test_id))
    }

    /// Verdict for gates that only look at test results when too few ran
    ///
    /// With nothing executed a gate passes at 100 unless a minimum test count
    /// is configured, in which case it fails at 0.
    pub fn too_few_tests(&self, gate: &dyn QualityGate) -> Option<QualityGateResult> {
        let executed = self.metrics.executable();
        match self.min_tests {
            Some(min) if executed < min => Some(
                QualityGateResult::evaluated(gate.id(), gate.name(), 0.0, gate.threshold())
                    .with_metric("executed_tests", executed as f64)
                    .with_metric("min_tests", min as f64)
                    .with_recommendation(Recommendation::new(
                        RecommendationType::HighPriority,
                        gate.id(),
                        format!("Only {executed} tests executed, {min} required"),
                        "Add or re-enable tests to reach the configured minimum",
                    )),
            ),
            _ if executed == 0 => Some(
                QualityGateResult::evaluated(gate.id(), gate.name(), 100.0, gate.threshold())
                    .with_metric("executed_tests", 0.0)
                    .with_details(vec!["no tests executed".to_string()]),
            ),
            _ => None,
        }
    }
}

/// Built-in gate identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateId {
    Coverage,
    PassRate,
    Performance,
    Security,
}

impl GateId {
    pub fn all() -> [GateId; 4] {
        [
            GateId::Coverage,
            GateId::PassRate,
            GateId::Performance,
            GateId::Security,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GateId::Coverage => "coverage",
            GateId::PassRate => "pass-rate",
            GateId::Performance => "performance",
            GateId::Security => "security",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "coverage" => Some(GateId::Coverage),
            "pass-rate" | "pass_rate" | "passrate" => Some(GateId::PassRate),
            "performance" | "perf" => Some(GateId::Performance),
            "security" => Some(GateId::Security),
            _ => None,
        }
    }

    /// Parse a list of gate names, rejecting unknown and repeated ids
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<GateId>, ConfigError> {
        let mut seen = BTreeSet::new();
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let id = GateId::from_str(name)
                .ok_or_else(|| ConfigError::UnknownGate(name.to_string()))?;
            if !seen.insert(id) {
                return Err(ConfigError::DuplicateGate(id.as_str().to_string()));
            }
            ids.push(id);
        }
        Ok(ids)
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings for every built-in gate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatesConfig {
    /// Gates to run when none are named on the command line
    pub enabled: Vec<String>,
    pub min_tests: Option<usize>,
    pub coverage: CoverageGateConfig,
    pub pass_rate: PassRateGateConfig,
    pub performance: PerformanceGateConfig,
    pub security: SecurityGateConfig,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            enabled: GateId::all().iter().map(|g| g.as_str().to_string()).collect(),
            min_tests: None,
            coverage: CoverageGateConfig::default(),
            pass_rate: PassRateGateConfig::default(),
            performance: PerformanceGateConfig::default(),
            security: SecurityGateConfig::default(),
        }
    }
}

impl GatesConfig {
    pub fn threshold(&self, id: GateId) -> f64 {
        match id {
            GateId::Coverage => self.coverage.threshold,
            GateId::PassRate => self.pass_rate.threshold,
            GateId::Performance => self.performance.threshold,
            GateId::Security => self.security.threshold,
        }
    }

    pub fn critical(&self, id: GateId) -> bool {
        match id {
            GateId::Coverage => self.coverage.critical,
            GateId::PassRate => self.pass_rate.critical,
            GateId::Performance => self.performance.critical,
            GateId::Security => self.security.critical,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        GateId::parse_list(&self.enabled)?;
        for id in GateId::all() {
            let threshold = self.threshold(id);
            if !(0.0..=100.0).contains(&threshold) {
                return Err(ConfigError::InvalidValue {
                    field: format!("gates.{}.threshold", id.as_str().replace('-', "_")),
                    reason: format!("{threshold} is outside 0..=100"),
                });
            }
        }
        self.coverage.weights.validate()?;
        self.performance.weights.validate()?;
        Ok(())
    }
}

/// Instantiate gates with the collaborators they use
pub fn build_gates(
    ids: &[GateId],
    config: &GatesConfig,
    collaborators: &Collaborators,
) -> Vec<Arc<dyn QualityGate>> {
    ids.iter()
        .map(|id| -> Arc<dyn QualityGate> {
            match id {
                GateId::Coverage => Arc::new(
                    CoverageGate::new(config.coverage.clone())
                        .with_analyzer(collaborators.coverage.clone()),
                ),
                GateId::PassRate => Arc::new(
                    PassRateGate::new(config.pass_rate.clone())
                        .with_analyzer(collaborators.reliability.clone()),
                ),
                GateId::Performance => Arc::new(
                    PerformanceGate::new(config.performance.clone())
                        .with_baseline(collaborators.baseline.clone()),
                ),
                GateId::Security => Arc::new(
                    SecurityGate::new(config.security.clone())
                        .with_service(collaborators.security.clone()),
                ),
            }
        })
        .collect()
}

/// Check that weights are finite, non-negative and not all zero
pub(crate) fn check_weights(
    scope: &str,
    weights: &[(&str, f64)],
) -> Result<(), ConfigError> {
    for (name, weight) in weights {
        if !weight.is_finite() || *weight < 0.0 {
            return Err(ConfigError::InvalidWeight {
                gate: format!("{scope}.{name}"),
                weight: *weight,
            });
        }
    }
    if weights.iter().map(|(_, w)| w).sum::<f64>() <= 0.0 {
        return Err(ConfigError::InvalidValue {
            field: format!("{scope} weights"),
            reason: "weights sum to zero".to_string(),
        });
    }
    Ok(())
}
