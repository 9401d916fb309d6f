//! testgate - Test Orchestration & Quality Gate Engine
//!
//! Library crate behind the `testgate` binary. A [`pipeline::QualityPipeline`]
//! schedules a [`models::TestSuite`], runs it through an
//! [`executor::ExecutionStrategy`], evaluates [`gates::QualityGate`]s through
//! the [`orchestrator::GateOrchestrator`] and returns a
//! [`orchestrator::ComprehensiveReport`].

pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod gates;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod results;
pub mod scheduler;
pub mod utils;
