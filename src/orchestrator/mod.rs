//! Gate orchestration
//!
//! Runs a set of gates under one of four strategies and folds their results
//! into a single verdict. Gate evaluators never fail the orchestration: an
//! error or panic becomes an errored gate result.

mod report;

pub use report::{ComprehensiveReport, ReportSummary, ReportTrends};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, GateError};
use crate::gates::{GateContext, QualityGate};
use crate::models::{
    AggregatedQualityGateResult, FailureKind, GateStatus, OverallStatus, QualityGateResult,
    Recommendation, RecommendationType,
};
use crate::utils::timer::Timer;

/// Weight of a gate with no configured weight
pub const DEFAULT_GATE_WEIGHT: f64 = 1.0;

const SKIPPED_AFTER_CRITICAL: &str = "skipped after critical gate failure";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateExecutionStrategy {
    #[default]
    Parallel,
    Sequential,
    /// Critical gates first, then by descending weight
    Priority,
    /// Priority order, stopping after the first critical failure
    FailFast,
}

impl GateExecutionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            GateExecutionStrategy::Parallel => "parallel",
            GateExecutionStrategy::Sequential => "sequential",
            GateExecutionStrategy::Priority => "priority",
            GateExecutionStrategy::FailFast => "fail-fast",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "parallel" => Some(GateExecutionStrategy::Parallel),
            "sequential" => Some(GateExecutionStrategy::Sequential),
            "priority" | "priority-based" => Some(GateExecutionStrategy::Priority),
            "fail-fast" | "fail_fast" | "failfast" => Some(GateExecutionStrategy::FailFast),
            _ => None,
        }
    }
}

impl fmt::Display for GateExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub strategy: GateExecutionStrategy,
    /// Per-gate weight in the overall score; missing gates weigh 1
    pub weights: BTreeMap<String, f64>,
    /// Overrides each gate's own criticality when set
    pub critical: Option<Vec<String>>,
    /// Defaults to the mean of the gate thresholds
    pub minimum_score: Option<f64>,
}

impl OrchestrationConfig {
    pub fn weight(&self, gate_id: &str) -> f64 {
        self.weights
            .get(gate_id)
            .copied()
            .unwrap_or(DEFAULT_GATE_WEIGHT)
    }

    /// Checks that need no gate list
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (gate, weight) in &self.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    gate: gate.clone(),
                    weight: *weight,
                });
            }
        }
        if let Some(minimum) = self.minimum_score {
            if !(0.0..=100.0).contains(&minimum) {
                return Err(ConfigError::InvalidValue {
                    field: "orchestration.minimum_score".to_string(),
                    reason: format!("{minimum} is outside 0..=100"),
                });
            }
        }
        Ok(())
    }
}

pub struct GateOrchestrator {
    config: OrchestrationConfig,
}

impl GateOrchestrator {
    pub fn new(config: OrchestrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    /// Reject duplicate gates, weights or critical ids naming unknown gates,
    /// and weight sets that sum to zero
    pub fn validate(&self, gates: &[Arc<dyn QualityGate>]) -> Result<(), ConfigError> {
        self.config.validate()?;

        let mut ids = HashSet::new();
        for gate in gates {
            if !ids.insert(gate.id()) {
                return Err(ConfigError::DuplicateGate(gate.id().to_string()));
            }
        }

        for gate in self.config.weights.keys() {
            if !ids.contains(gate.as_str()) {
                return Err(ConfigError::UnknownGate(gate.clone()));
            }
        }
        for gate in self.config.critical.iter().flatten() {
            if !ids.contains(gate.as_str()) {
                return Err(ConfigError::UnknownGate(gate.clone()));
            }
        }

        if !gates.is_empty() && gates.iter().map(|g| self.config.weight(g.id())).sum::<f64>() <= 0.0
        {
            return Err(ConfigError::InvalidValue {
                field: "orchestration.weights".to_string(),
                reason: "gate weights sum to zero".to_string(),
            });
        }
        Ok(())
    }

    fn is_critical(&self, gate: &dyn QualityGate) -> bool {
        match &self.config.critical {
            Some(ids) => ids.iter().any(|id| id == gate.id()),
            None => gate.is_critical(),
        }
    }

    /// Critical first, then heavier, then by id
    fn priority_order(&self, gates: &[Arc<dyn QualityGate>]) -> Vec<Arc<dyn QualityGate>> {
        let mut ordered = gates.to_vec();
        ordered.sort_by(|a, b| {
            self.is_critical(b.as_ref())
                .cmp(&self.is_critical(a.as_ref()))
                .then(
                    self.config
                        .weight(b.id())
                        .total_cmp(&self.config.weight(a.id())),
                )
                .then(a.id().cmp(b.id()))
        });
        ordered
    }

    /// Evaluate `gates` against `ctx` and fold the results into a verdict
    pub async fn run(
        &self,
        gates: &[Arc<dyn QualityGate>],
        ctx: Arc<GateContext>,
    ) -> Result<AggregatedQualityGateResult, ConfigError> {
        self.validate(gates)?;
        info!(
            "Evaluating {} gates ({} strategy)",
            gates.len(),
            self.config.strategy
        );

        let results = match self.config.strategy {
            GateExecutionStrategy::Parallel => self.run_parallel(gates, &ctx).await,
            GateExecutionStrategy::Sequential => self.run_sequential(gates, &ctx, false).await,
            GateExecutionStrategy::Priority => {
                self.run_sequential(&self.priority_order(gates), &ctx, false)
                    .await
            }
            GateExecutionStrategy::FailFast => {
                self.run_sequential(&self.priority_order(gates), &ctx, true)
                    .await
            }
        };

        Ok(self.verdict(results))
    }

    async fn run_parallel(
        &self,
        gates: &[Arc<dyn QualityGate>],
        ctx: &Arc<GateContext>,
    ) -> Vec<QualityGateResult> {
        let handles: Vec<_> = gates
            .iter()
            .map(|gate| {
                let gate = gate.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let timer = Timer::start(format!("gate {}", gate.id()));
                    let outcome = gate.validate(&ctx).await;
                    (outcome, timer.stop())
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(gates)
            .map(|(joined, gate)| {
                let critical = self.is_critical(gate.as_ref());
                match joined {
                    Ok((outcome, ms)) => finish(gate.as_ref(), outcome, critical, ms),
                    Err(e) => finish(
                        gate.as_ref(),
                        Err(GateError::Aborted(e.to_string())),
                        critical,
                        0,
                    ),
                }
            })
            .collect()
    }

    async fn run_sequential(
        &self,
        gates: &[Arc<dyn QualityGate>],
        ctx: &GateContext,
        fail_fast: bool,
    ) -> Vec<QualityGateResult> {
        let mut results = Vec::with_capacity(gates.len());
        let mut stopped = false;

        for gate in gates {
            if stopped {
                results.push(
                    QualityGateResult::skipped(
                        gate.id(),
                        gate.name(),
                        gate.threshold(),
                        SKIPPED_AFTER_CRITICAL,
                    )
                    .critical(self.is_critical(gate.as_ref())),
                );
                continue;
            }

            let critical = self.is_critical(gate.as_ref());
            let timer = Timer::start(format!("gate {}", gate.id()));
            let outcome = gate.validate(ctx).await;
            let result = finish(gate.as_ref(), outcome, critical, timer.stop());

            if fail_fast && critical && !result.passed {
                warn!("Critical gate {} failed, skipping remaining gates", gate.id());
                stopped = true;
            }
            results.push(result);
        }
        results
    }

    fn verdict(&self, mut results: Vec<QualityGateResult>) -> AggregatedQualityGateResult {
        let evaluated: Vec<&QualityGateResult> =
            results.iter().filter(|r| r.was_evaluated()).collect();

        let total_weight: f64 = evaluated.iter().map(|r| self.config.weight(&r.gate_id)).sum();
        let score = if evaluated.is_empty() {
            100.0
        } else if total_weight > 0.0 {
            evaluated
                .iter()
                .map(|r| self.config.weight(&r.gate_id) * r.score)
                .sum::<f64>()
                / total_weight
        } else {
            evaluated.iter().map(|r| r.score).sum::<f64>() / evaluated.len() as f64
        };

        // Default minimum covers evaluated gates only
        let minimum_score = self.config.minimum_score.unwrap_or_else(|| {
            if evaluated.is_empty() {
                0.0
            } else {
                evaluated.iter().map(|r| r.threshold).sum::<f64>() / evaluated.len() as f64
            }
        });

        let critical_failures: Vec<String> = evaluated
            .iter()
            .filter(|r| r.critical && !r.passed)
            .map(|r| r.gate_id.clone())
            .collect();
        let critical_error = evaluated
            .iter()
            .any(|r| r.critical && r.status == GateStatus::Error);

        let passed = critical_failures.is_empty() && score >= minimum_score;
        let failure = if !critical_failures.is_empty() {
            Some(FailureKind::BlockedByCriticalGate {
                gates: critical_failures.clone(),
            })
        } else if score < minimum_score {
            Some(FailureKind::BelowMinimumScore {
                score,
                minimum: minimum_score,
            })
        } else {
            None
        };
        let status = if critical_error {
            OverallStatus::Error
        } else if passed {
            OverallStatus::Passed
        } else {
            OverallStatus::Failed
        };

        let count = |status: GateStatus| results.iter().filter(|r| r.status == status).count();
        let (passed_gates, failed_gates, error_gates, skipped_gates) = (
            count(GateStatus::Passed),
            count(GateStatus::Failed),
            count(GateStatus::Error),
            count(GateStatus::Skipped),
        );

        let recommendations = prioritize(&results);
        results.sort_by(|a, b| {
            status_rank(a.status)
                .cmp(&status_rank(b.status))
                .then(a.score.total_cmp(&b.score))
                .then(a.gate_id.cmp(&b.gate_id))
        });

        debug!(
            "Overall score {:.1} (minimum {:.1}), {} critical failures",
            score,
            minimum_score,
            critical_failures.len()
        );
        info!("Quality gates {}: score {:.1}", status, score);

        AggregatedQualityGateResult {
            status,
            passed,
            score,
            minimum_score,
            passed_gates,
            failed_gates,
            error_gates,
            skipped_gates,
            critical_failures,
            failure,
            gate_results: results,
            recommendations,
        }
    }
}

fn finish(
    gate: &dyn QualityGate,
    outcome: Result<QualityGateResult, GateError>,
    critical: bool,
    duration_ms: u64,
) -> QualityGateResult {
    match outcome {
        Ok(result) => result.critical(critical).with_duration_ms(duration_ms),
        Err(e) => {
            warn!("Gate {} errored: {}", gate.id(), e);
            QualityGateResult::errored(gate.id(), gate.name(), gate.threshold(), e.to_string())
                .critical(critical)
                .with_duration_ms(duration_ms)
        }
    }
}

/// Failing gates first, lowest score first within a status
fn status_rank(status: GateStatus) -> u8 {
    match status {
        GateStatus::Error => 0,
        GateStatus::Failed => 1,
        GateStatus::Passed => 2,
        GateStatus::Skipped => 3,
    }
}

/// Gate recommendations plus one per failed critical gate, ordered critical ->
/// high -> optimization and deduplicated by (type, description)
fn prioritize(results: &[QualityGateResult]) -> Vec<Recommendation> {
    let mut all = Vec::new();

    for result in results.iter().filter(|r| r.was_evaluated() && !r.passed) {
        let kind = if result.critical {
            RecommendationType::CriticalFailure
        } else {
            RecommendationType::HighPriority
        };
        let description = match result.status {
            GateStatus::Error => format!("{} gate could not be evaluated", result.gate_name),
            _ => format!(
                "{} gate failed: {:.1} < {:.1}",
                result.gate_name, result.score, result.threshold
            ),
        };
        if result.critical || result.status == GateStatus::Error {
            all.push(Recommendation::new(
                kind,
                result.gate_id.clone(),
                description,
                result.remediation().unwrap_or_default(),
            ));
        }
    }

    all.extend(results.iter().flat_map(|r| r.recommendations.iter().cloned()));
    all.sort_by_key(|r| r.kind);

    let mut seen = BTreeSet::new();
    all.retain(|r| seen.insert((r.kind, r.description.clone())));
    all
}
