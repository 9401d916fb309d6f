//! Security gate

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::{GateContext, QualityGate};
use crate::analysis::{SecurityFindings, SecurityFindingsService, Severity};
use crate::error::GateError;
use crate::models::{QualityGateResult, Recommendation, RecommendationType, TestStatus};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityPenalties {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for SeverityPenalties {
    fn default() -> Self {
        Self {
            critical: 25.0,
            high: 15.0,
            medium: 8.0,
            low: 3.0,
        }
    }
}

impl SeverityPenalties {
    pub fn get(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityGateConfig {
    pub threshold: f64,
    pub critical: bool,
    pub penalties: SeverityPenalties,
    pub max_vulnerability_penalty: f64,
    /// Security-path coverage at which the adjustment is zero
    pub coverage_target: f64,
    pub coverage_factor: f64,
    pub max_coverage_bonus: f64,
    pub max_coverage_penalty: f64,
    pub debt_factor: f64,
    pub max_debt_penalty: f64,
}

impl Default for SecurityGateConfig {
    fn default() -> Self {
        Self {
            threshold: 85.0,
            critical: true,
            penalties: SeverityPenalties::default(),
            max_vulnerability_penalty: 80.0,
            coverage_target: 80.0,
            coverage_factor: 0.25,
            max_coverage_bonus: 5.0,
            max_coverage_penalty: 10.0,
            debt_factor: 0.1,
            max_debt_penalty: 15.0,
        }
    }
}

pub struct SecurityGate {
    config: SecurityGateConfig,
    service: Option<Arc<dyn SecurityFindingsService>>,
}

impl SecurityGate {
    pub fn new(config: SecurityGateConfig) -> Self {
        Self {
            config,
            service: None,
        }
    }

    pub fn with_service(mut self, service: Option<Arc<dyn SecurityFindingsService>>) -> Self {
        self.service = service;
        self
    }

    pub fn vulnerability_penalty(&self, findings: &SecurityFindings) -> f64 {
        findings
            .vulnerabilities
            .iter()
            .map(|v| self.config.penalties.get(v.severity))
            .sum::<f64>()
            .min(self.config.max_vulnerability_penalty)
    }

    /// Bonus or penalty for how well security paths are tested
    pub fn coverage_adjustment(&self, coverage: f64) -> f64 {
        ((coverage - self.config.coverage_target) * self.config.coverage_factor).clamp(
            -self.config.max_coverage_penalty,
            self.config.max_coverage_bonus,
        )
    }

    pub fn debt_penalty(&self, debt: f64) -> f64 {
        (self.config.debt_factor * debt.max(0.0)).min(self.config.max_debt_penalty)
    }

    /// Pass percentage of the executed security tests
    fn local_coverage(ctx: &GateContext) -> Option<f64> {
        let (executed, passed) = ctx
            .security_results()
            .filter(|r| r.status != TestStatus::Skipped)
            .fold((0usize, 0usize), |(executed, passed), r| {
                (executed + 1, passed + usize::from(r.status.is_success()))
            });
        (executed > 0).then(|| passed as f64 / executed as f64 * 100.0)
    }
}

#[async_trait]
impl QualityGate for SecurityGate {
    fn id(&self) -> &str {
        "security"
    }

    fn name(&self) -> &str {
        "Security"
    }

    fn threshold(&self) -> f64 {
        self.config.threshold
    }

    fn is_critical(&self) -> bool {
        self.config.critical
    }

    async fn validate(&self, ctx: &GateContext) -> Result<QualityGateResult, GateError> {
        let mut details = Vec::new();
        let scanned = match &self.service {
            Some(service) => match service.scan(ctx).await {
                Ok(findings) => Some(findings),
                Err(e) => {
                    warn!("Security scan failed, using security test results: {}", e);
                    details.push(format!("security findings unavailable: {e}"));
                    None
                }
            },
            None => None,
        };

        // Without findings only the test results remain to judge
        if scanned.is_none() {
            if let Some(verdict) = ctx.too_few_tests(self) {
                return Ok(verdict.critical(self.config.critical).with_details(details));
            }
        }
        let findings = scanned.unwrap_or_default();

        if !findings.security_debt.is_finite() {
            return Err(GateError::MalformedMetrics(format!(
                "security debt {}",
                findings.security_debt
            )));
        }
        if let Some(coverage) = findings.test_coverage {
            if !coverage.is_finite() || !(0.0..=100.0).contains(&coverage) {
                return Err(GateError::MalformedMetrics(format!(
                    "security test coverage {coverage} is outside 0..=100"
                )));
            }
        }

        let vulnerability_penalty = self.vulnerability_penalty(&findings);
        let coverage = findings.test_coverage.or_else(|| Self::local_coverage(ctx));
        let coverage_adjustment = coverage
            .map(|c| self.coverage_adjustment(c))
            .unwrap_or(0.0);
        let debt_penalty = self.debt_penalty(findings.security_debt);

        let mut result = QualityGateResult::evaluated(
            self.id(),
            self.name(),
            100.0 - vulnerability_penalty + coverage_adjustment - debt_penalty,
            self.config.threshold,
        )
        .critical(self.config.critical)
        .with_metric("vulnerability_penalty", vulnerability_penalty)
        .with_metric("coverage_adjustment", coverage_adjustment)
        .with_metric("debt_penalty", debt_penalty)
        .with_metric("security_debt", findings.security_debt);

        for severity in Severity::all() {
            result = result.with_metric(
                format!("{severity}_vulnerabilities"),
                findings.count(severity) as f64,
            );
        }
        if let Some(coverage) = coverage {
            result = result.with_metric("security_test_coverage", coverage);
        }

        for vulnerability in findings
            .vulnerabilities
            .iter()
            .filter(|v| matches!(v.severity, Severity::Critical | Severity::High))
        {
            let location = vulnerability
                .location
                .as_deref()
                .map(|l| format!(" in {l}"))
                .unwrap_or_default();
            result = result.with_recommendation(Recommendation::new(
                RecommendationType::HighPriority,
                self.id(),
                format!(
                    "{} vulnerability {}{}",
                    vulnerability.severity, vulnerability.id, location
                ),
                format!("Remediate {} before release", vulnerability.id),
            ));
        }

        let minor = findings.count(Severity::Medium) + findings.count(Severity::Low);
        if minor > 0 {
            result = result.with_recommendation(Recommendation::new(
                RecommendationType::Optimization,
                self.id(),
                format!("{minor} medium/low vulnerabilities open"),
                "Schedule fixes for the remaining findings",
            ));
        }

        if let Some(coverage) = coverage.filter(|c| *c < self.config.coverage_target) {
            result = result.with_recommendation(Recommendation::new(
                RecommendationType::Optimization,
                self.id(),
                format!("Security paths {coverage:.1}% tested"),
                "Add tests for authentication, authorization and input handling",
            ));
        }

        if debt_penalty > 0.0 {
            result = result.with_recommendation(Recommendation::new(
                RecommendationType::Optimization,
                self.id(),
                format!("Security debt of {:.0}", findings.security_debt),
                "Pay down accumulated security debt",
            ));
        }

        Ok(result.with_details(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{StaticSecurityFindings, Vulnerability};
    use crate::error::CollaboratorError;
    use crate::models::{Test, TestResult};

    fn gate_with(findings: SecurityFindings) -> SecurityGate {
        SecurityGate::new(SecurityGateConfig::default())
            .with_service(Some(Arc::new(StaticSecurityFindings::new(findings))))
    }

    fn one_test() -> GateContext {
        GateContext::from_results(vec![TestResult::passed(&Test::new("a", "A"), 1)])
    }

    #[tokio::test]
    async fn test_critical_and_medium_findings_fail() {
        let gate = gate_with(SecurityFindings {
            vulnerabilities: vec![
                Vulnerability::new("CVE-1", Severity::Critical),
                Vulnerability::new("CVE-2", Severity::Medium),
                Vulnerability::new("CVE-3", Severity::Medium),
            ],
            ..Default::default()
        });

        let result = gate.validate(&one_test()).await.unwrap();
        assert_eq!(result.score, 59.0);
        assert!(!result.passed);
        assert!(result.critical);
        assert_eq!(result.metrics["critical_vulnerabilities"], 1.0);
        assert_eq!(
            result.recommendations[0].kind,
            RecommendationType::HighPriority
        );
    }

    #[test]
    fn test_penalty_caps() {
        let gate = SecurityGate::new(SecurityGateConfig::default());
        let findings = SecurityFindings {
            vulnerabilities: (0..5)
                .map(|i| Vulnerability::new(format!("CVE-{i}"), Severity::Critical))
                .collect(),
            ..Default::default()
        };
        assert_eq!(gate.vulnerability_penalty(&findings), 80.0);
        assert_eq!(gate.debt_penalty(300.0), 15.0);
        assert_eq!(gate.debt_penalty(40.0), 4.0);
        assert_eq!(gate.coverage_adjustment(100.0), 5.0);
        assert_eq!(gate.coverage_adjustment(40.0), -10.0);
        assert_eq!(gate.coverage_adjustment(84.0), 1.0);
    }

    #[tokio::test]
    async fn test_reported_coverage_and_debt() {
        let gate = gate_with(SecurityFindings {
            vulnerabilities: vec![Vulnerability::new("CVE-1", Severity::Low)],
            test_coverage: Some(92.0),
            security_debt: 20.0,
        });
        let result = gate.validate(&one_test()).await.unwrap();
        // 100 - 3 + 3 - 2
        assert!((result.score - 98.0).abs() < 1e-9);
        assert!(result.passed);
    }

    struct DownScanner;

    #[async_trait]
    impl SecurityFindingsService for DownScanner {
        async fn scan(&self, _context: &GateContext) -> Result<SecurityFindings, CollaboratorError> {
            Err(CollaboratorError::Failed {
                service: "scanner".into(),
                message: "timed out".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_scanner_failure_uses_security_tests() {
        let gate = SecurityGate::new(SecurityGateConfig::default())
            .with_service(Some(Arc::new(DownScanner)));
        let auth = Test::new("auth", "Auth");
        let csrf = Test::new("csrf", "CSRF");
        let ctx = GateContext::from_results(vec![
            TestResult::passed(&auth, 1),
            TestResult::failed(&csrf, 1, "token accepted"),
        ])
        .with_security_tests(["auth".to_string(), "csrf".to_string()]);

        let result = gate.validate(&ctx).await.unwrap();
        // 50% of security tests pass: (50 - 80) * 0.25 = -7.5
        assert!((result.score - 92.5).abs() < 1e-9);
        assert_eq!(result.details.len(), 1);
    }

    #[tokio::test]
    async fn test_findings_evaluated_without_tests() {
        let gate = gate_with(SecurityFindings {
            vulnerabilities: vec![Vulnerability::new("CVE-1", Severity::High)],
            ..Default::default()
        });
        let result = gate
            .validate(&GateContext::from_results(Vec::new()))
            .await
            .unwrap();
        assert_eq!(result.score, 85.0);
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_no_service_no_tests_passes() {
        let gate = SecurityGate::new(SecurityGateConfig::default());
        let result = gate
            .validate(&GateContext::from_results(Vec::new()))
            .await
            .unwrap();
        assert_eq!(result.score, 100.0);
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_malformed_coverage_is_an_error() {
        let gate = gate_with(SecurityFindings {
            test_coverage: Some(130.0),
            ..Default::default()
        });
        assert!(matches!(
            gate.validate(&one_test()).await,
            Err(GateError::MalformedMetrics(_))
        ));
    }
}
