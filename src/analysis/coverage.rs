//! Coverage report and critical-path gap analysis

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::CollaboratorError;
use crate::models::CoverageMetrics;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageCategory {
    Line,
    Branch,
    Function,
    Statement,
}

impl CoverageCategory {
    pub fn all() -> [CoverageCategory; 4] {
        [
            CoverageCategory::Line,
            CoverageCategory::Branch,
            CoverageCategory::Function,
            CoverageCategory::Statement,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            CoverageCategory::Line => "line",
            CoverageCategory::Branch => "branch",
            CoverageCategory::Function => "function",
            CoverageCategory::Statement => "statement",
        }
    }

    pub fn value(&self, coverage: &CoverageMetrics) -> f64 {
        match self {
            CoverageCategory::Line => coverage.line,
            CoverageCategory::Branch => coverage.branch,
            CoverageCategory::Function => coverage.function,
            CoverageCategory::Statement => coverage.statement,
        }
    }
}

impl fmt::Display for CoverageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Uncovered code on a critical path
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CriticalGap {
    pub category: CoverageCategory,
    pub path: String,
    /// Percentage points of the category left uncovered on this path
    pub gap_percent: f64,
}

/// Coverage measured by an external tool
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    #[serde(flatten)]
    pub metrics: CoverageMetrics,

    #[serde(default)]
    pub critical_gaps: Vec<CriticalGap>,
}

impl CoverageReport {
    pub fn new(metrics: CoverageMetrics) -> Self {
        Self {
            metrics,
            critical_gaps: Vec::new(),
        }
    }

    /// Load from a YAML or JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read coverage file: {}", path.display()))?;
        let is_yaml = path
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false);

        if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse coverage YAML: {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse coverage JSON: {}", path.display()))
        }
    }
}

#[async_trait]
pub trait CoverageAnalyzer: Send + Sync {
    async fn critical_gaps(
        &self,
        coverage: &CoverageMetrics,
    ) -> Result<Vec<CriticalGap>, CollaboratorError>;
}
