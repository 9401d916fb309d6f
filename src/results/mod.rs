//! Result aggregation, history and persistence

mod aggregator;
mod baseline;
mod history;
mod stats;
mod storage;

pub use aggregator::{aggregate, ExecutionMetrics, ResourceSummary};
pub use baseline::{BaselineConfig, FileBaselineService};
pub use history::{
    ExecutionHistory, RunRecord, TestHistory, TestSample, DEFAULT_RUN_WINDOW, DEFAULT_TEST_WINDOW,
};
pub use stats::{linear_fit, percentile, LinearFit, SampleStats};
pub use storage::{generate_run_id, HistoryStorage};
