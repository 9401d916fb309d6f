//! Error taxonomy
//!
//! Configuration errors are fatal and surface before anything runs. Every
//! other kind is contained at its own scope (test, batch, gate).

use thiserror::Error;

use crate::pipeline::RunState;

/// Fatal configuration and scheduling errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Cyclic dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Test '{test}' depends on unknown test '{dependency}'")]
    UnknownDependency { test: String, dependency: String },

    #[error("Duplicate test id: {0}")]
    DuplicateTest(String),

    #[error("Unknown gate id: {0}")]
    UnknownGate(String),

    #[error("Gate registered twice: {0}")]
    DuplicateGate(String),

    #[error("Invalid weight for gate '{gate}': {weight}")]
    InvalidWeight { gate: String, weight: f64 },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors reported by the test execution capability for a single attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// The test itself blew up; recorded as `status=error`
    #[error("Test raised: {0}")]
    Test(String),

    /// The environment under the batch failed; aborts the rest of the batch
    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

/// Failures of optional analysis collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("{0} is unavailable")]
    Unavailable(String),

    #[error("{service} failed: {message}")]
    Failed { service: String, message: String },
}

/// Failures of a gate evaluator itself
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Malformed metrics: {0}")]
    MalformedMetrics(String),

    #[error("Gate panicked or was cancelled: {0}")]
    Aborted(String),
}

/// Errors surfaced by the end-to-end pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Illegal state transition {from} -> {to}")]
    IllegalTransition { from: RunState, to: RunState },

    #[error("Execution failed: {0}")]
    Execution(String),
}

impl PipelineError {
    /// Configuration errors map to exit code 2, everything else to 1
    pub fn is_configuration(&self) -> bool {
        matches!(self, PipelineError::Config(_))
    }
}
