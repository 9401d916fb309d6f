//! Data models for test orchestration
//!
//! This module contains the test model, per-attempt results and gate results.

mod gate;
mod test_result;

pub use gate::{
    clamp_score, AggregatedQualityGateResult, FailureKind, GateStatus, OverallStatus,
    QualityGateResult, Recommendation, RecommendationType,
};
pub use test::{EnvironmentRequirements, ResourceRequirements, Test, TestSuite, TestType};
pub use test_result::{
    CoverageMetrics, ErrorKind, TestError, TestMetrics, TestOutcome, TestResult, TestStatus,
    ABORTED_BY_BATCH_FAILURE, CANCELLED,
};
