//! Quality gate result models

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Clamp a score into [0, 100]; NaN collapses to 0
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// Outcome of a single gate evaluation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Passed,
    Failed,
    Error,
    /// Not evaluated because fail-fast stopped scheduling
    Skipped,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateStatus::Passed => write!(f, "PASS"),
            GateStatus::Failed => write!(f, "FAIL"),
            GateStatus::Error => write!(f, "ERROR"),
            GateStatus::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Recommendation priority; ordering is report order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    CriticalFailure,
    HighPriority,
    Optimization,
}

impl fmt::Display for RecommendationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendationType::CriticalFailure => write!(f, "critical"),
            RecommendationType::HighPriority => write!(f, "high"),
            RecommendationType::Optimization => write!(f, "optimization"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationType,
    pub gate_id: String,
    pub description: String,
    pub action: String,
}

impl Recommendation {
    pub fn new(
        kind: RecommendationType,
        gate_id: impl Into<String>,
        description: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            gate_id: gate_id.into(),
            description: description.into(),
            action: action.into(),
        }
    }
}

/// Result of one gate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub gate_id: String,
    pub gate_name: String,
    pub status: GateStatus,
    pub passed: bool,
    pub score: f64,
    pub threshold: f64,
    pub critical: bool,
    /// Gate-specific metrics
    pub metrics: BTreeMap<String, f64>,
    pub recommendations: Vec<Recommendation>,
    /// Notes such as collaborator fallbacks
    pub details: Vec<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl QualityGateResult {
    /// A gate that computed a score; passes when the clamped score meets the threshold
    pub fn evaluated(
        gate_id: impl Into<String>,
        gate_name: impl Into<String>,
        score: f64,
        threshold: f64,
    ) -> Self {
        let score = clamp_score(score);
        let passed = score >= threshold;
        Self {
            gate_id: gate_id.into(),
            gate_name: gate_name.into(),
            status: if passed {
                GateStatus::Passed
            } else {
                GateStatus::Failed
            },
            passed,
            score,
            threshold,
            critical: false,
            metrics: BTreeMap::new(),
            recommendations: Vec::new(),
            details: Vec::new(),
            error: None,
            duration_ms: 0,
        }
    }

    /// A gate whose evaluator itself failed
    pub fn errored(
        gate_id: impl Into<String>,
        gate_name: impl Into<String>,
        threshold: f64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            gate_id: gate_id.into(),
            gate_name: gate_name.into(),
            status: GateStatus::Error,
            passed: false,
            score: 0.0,
            threshold,
            critical: false,
            metrics: BTreeMap::new(),
            recommendations: Vec::new(),
            details: Vec::new(),
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    pub fn skipped(
        gate_id: impl Into<String>,
        gate_name: impl Into<String>,
        threshold: f64,
        reason: impl Into<String>,
    ) -> Self {
        let mut result = Self::errored(gate_id, gate_name, threshold, "");
        result.status = GateStatus::Skipped;
        result.error = None;
        result.details.push(reason.into());
        result
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    pub fn with_recommendation(mut self, recommendation: Recommendation) -> Self {
        self.recommendations.push(recommendation);
        self
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details.extend(details);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Was the gate actually evaluated (passed, failed or errored)
    pub fn was_evaluated(&self) -> bool {
        self.status != GateStatus::Skipped
    }

    /// One-line remediation for a gate that did not pass
    pub fn remediation(&self) -> Option<String> {
        match self.status {
            GateStatus::Passed | GateStatus::Skipped => None,
            GateStatus::Error => Some(format!(
                "{}: evaluator failed ({}); fix the input data and re-run",
                self.gate_name,
                self.error.as_deref().unwrap_or("unknown error")
            )),
            GateStatus::Failed => Some(
                self.recommendations
                    .first()
                    .map(|r| format!("{}: {}", self.gate_name, r.action))
                    .unwrap_or_else(|| {
                        format!(
                            "{}: raise score from {:.1} to at least {:.1}",
                            self.gate_name, self.score, self.threshold
                        )
                    }),
            ),
        }
    }
}

impl fmt::Display for QualityGateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} score={:.1} threshold={:.1}",
            self.status, self.gate_name, self.score, self.threshold
        )?;
        if self.critical {
            write!(f, " [critical]")?;
        }
        if let Some(err) = &self.error {
            write!(f, " - {err}")?;
        }
        Ok(())
    }
}

/// Overall verdict status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Passed,
    Failed,
    Error,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Passed => write!(f, "PASSED"),
            OverallStatus::Failed => write!(f, "FAILED"),
            OverallStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Why a run did not pass
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// At least one critical gate failed; cannot be overridden
    BlockedByCriticalGate { gates: Vec<String> },
    /// Only the weighted score fell short; an operator may override
    BelowMinimumScore { score: f64, minimum: f64 },
}

/// Combined result of all gates
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregatedQualityGateResult {
    pub status: OverallStatus,
    pub passed: bool,
    pub score: f64,
    pub minimum_score: f64,
    pub passed_gates: usize,
    pub failed_gates: usize,
    pub error_gates: usize,
    pub skipped_gates: usize,
    /// Ids of critical gates that did not pass
    pub critical_failures: Vec<String>,
    pub failure: Option<FailureKind>,
    /// Ordered failing/lowest-scoring first
    pub gate_results: Vec<QualityGateResult>,
    pub recommendations: Vec<Recommendation>,
}

impl AggregatedQualityGateResult {
    pub fn is_blocked(&self) -> bool {
        matches!(self.failure, Some(FailureKind::BlockedByCriticalGate { .. }))
    }

    /// A failed run that only missed the weighted minimum
    pub fn can_override(&self) -> bool {
        matches!(self.failure, Some(FailureKind::BelowMinimumScore { .. }))
    }

    pub fn gate(&self, gate_id: &str) -> Option<&QualityGateResult> {
        self.gate_results.iter().find(|g| g.gate_id == gate_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(120.0), 100.0);
        assert_eq!(clamp_score(-5.0), 0.0);
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(42.5), 42.5);
    }

    #[test]
    fn test_evaluated_result() {
        let result = QualityGateResult::evaluated("coverage", "Coverage", 84.6, 80.0);
        assert!(result.passed);
        assert_eq!(result.status, GateStatus::Passed);

        let result = QualityGateResult::evaluated("coverage", "Coverage", 140.0, 80.0);
        assert_eq!(result.score, 100.0);
    }

    #[test]
    fn test_errored_result_never_passes() {
        let result = QualityGateResult::errored("perf", "Performance", 80.0, "bad input");
        assert!(!result.passed);
        assert_eq!(result.status, GateStatus::Error);
        assert!(result.remediation().unwrap().contains("bad input"));
    }

    #[test]
    fn test_skipped_result() {
        let result = QualityGateResult::skipped("perf", "Performance", 80.0, "fail-fast");
        assert!(!result.was_evaluated());
        assert!(result.remediation().is_none());
    }

    #[test]
    fn test_recommendation_ordering() {
        assert!(RecommendationType::CriticalFailure < RecommendationType::HighPriority);
        assert!(RecommendationType::HighPriority < RecommendationType::Optimization);
    }
}
