//! Security findings

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::CollaboratorError;
use crate::gates::GateContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn all() -> [Severity; 4] {
        [Severity::Critical, Severity::High, Severity::Medium, Severity::Low]
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    pub severity: Severity,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl Vulnerability {
    pub fn new(id: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            severity,
            title: String::new(),
            location: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityFindings {
    pub vulnerabilities: Vec<Vulnerability>,
    /// Percent of security-relevant paths exercised by tests
    pub test_coverage: Option<f64>,
    /// Accumulated security debt, in the scanner's units
    pub security_debt: f64,
}

impl SecurityFindings {
    pub fn count(&self, severity: Severity) -> usize {
        self.vulnerabilities
            .iter()
            .filter(|v| v.severity == severity)
            .count()
    }
}

#[async_trait]
pub trait SecurityFindingsService: Send + Sync {
    async fn scan(&self, context: &GateContext) -> Result<SecurityFindings, CollaboratorError>;
}

/// Findings read once from a scanner's exported document
#[derive(Clone, Debug, Default)]
pub struct StaticSecurityFindings {
    findings: SecurityFindings,
}

impl StaticSecurityFindings {
    pub fn new(findings: SecurityFindings) -> Self {
        Self { findings }
    }

    /// Load from a YAML or JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read security findings: {}", path.display()))?;
        let is_yaml = path
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false);

        let findings: SecurityFindings = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse findings YAML: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse findings JSON: {}", path.display()))?
        };
        Ok(Self::new(findings))
    }
}

#[async_trait]
impl SecurityFindingsService for StaticSecurityFindings {
    async fn scan(&self, _context: &GateContext) -> Result<SecurityFindings, CollaboratorError> {
        Ok(self.findings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_json_findings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("findings.json");
        std::fs::write(
            &path,
            r#"{"vulnerabilities":[{"id":"CVE-1","severity":"critical"},{"id":"CVE-2","severity":"medium"}],"security_debt":40}"#,
        )
        .unwrap();

        let service = StaticSecurityFindings::load(&path).unwrap();
        assert_eq!(service.findings.count(Severity::Critical), 1);
        assert_eq!(service.findings.count(Severity::Medium), 1);
        assert_eq!(service.findings.test_coverage, None);
        assert_eq!(service.findings.security_debt, 40.0);
    }

    #[test]
    fn test_scan_returns_loaded_findings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("findings.yaml");
        std::fs::write(&path, "vulnerabilities:\n  - id: CVE-9\n    severity: high\n").unwrap();

        let service = StaticSecurityFindings::load(&path).unwrap();
        let context = GateContext::from_results(Vec::new());
        let findings = tokio_test::block_on(service.scan(&context)).unwrap();
        assert_eq!(findings.count(Severity::High), 1);
        assert_eq!(findings.count(Severity::Critical), 0);
    }
}
