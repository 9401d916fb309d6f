//! Analysis collaborators
//!
//! Optional services injected into gates. Every gate has a local fallback
//! when its collaborator is absent or fails.

mod coverage;
mod performance;
mod reliability;
mod security;

pub use coverage::{CoverageAnalyzer, CoverageCategory, CoverageReport, CriticalGap};
pub use performance::{
    BaselineComparison, Bottleneck, PerformanceBaselineService, PerformanceMetric,
    PerformanceSnapshot, Regression,
};
pub use reliability::{
    FlakinessReport, HistoryReliabilityAnalyzer, ReliabilityAnalyzer, ReliabilityConfig, Trend,
    TrendDirection,
};
pub use security::{
    SecurityFindings, SecurityFindingsService, Severity, StaticSecurityFindings, Vulnerability,
};

use std::sync::Arc;

/// The collaborators available to the gates of one run
#[derive(Clone, Default)]
pub struct Collaborators {
    pub reliability: Option<Arc<dyn ReliabilityAnalyzer>>,
    pub baseline: Option<Arc<dyn PerformanceBaselineService>>,
    pub security: Option<Arc<dyn SecurityFindingsService>>,
    pub coverage: Option<Arc<dyn CoverageAnalyzer>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reliability(mut self, analyzer: Arc<dyn ReliabilityAnalyzer>) -> Self {
        self.reliability = Some(analyzer);
        self
    }

    pub fn with_baseline(mut self, service: Arc<dyn PerformanceBaselineService>) -> Self {
        self.baseline = Some(service);
        self
    }

    pub fn with_security(mut self, service: Arc<dyn SecurityFindingsService>) -> Self {
        self.security = Some(service);
        self
    }

    pub fn with_coverage(mut self, analyzer: Arc<dyn CoverageAnalyzer>) -> Self {
        self.coverage = Some(analyzer);
        self
    }
}
