//! Adaptive execution
//!
//! Reorders each dependency layer from the rolling history so fast, stable
//! tests run first, then delegates to the parallel runner. With no history
//! at all the plan is left as scheduled and run sequentially.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    ExecutionContext, ExecutionResult, ExecutionStrategy, ParallelStrategy, SequentialStrategy,
    StrategyKind,
};
use crate::models::Test;
use crate::results::ExecutionHistory;
use crate::scheduler::{ComplexityLevel, ExecutionPlan, TestBatch};

pub type SharedHistory = Arc<RwLock<ExecutionHistory>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Samples per test at which sample confidence saturates
    pub sample_target: usize,
    pub sample_weight: f64,
    pub variance_weight: f64,
    /// Flip rate above which a test is ordered with the unstable ones
    pub unstable_flip_rate: f64,
    /// Historic pass rate (0..1) below which a test is unstable
    pub unstable_pass_rate: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            sample_target: 10,
            sample_weight: 0.6,
            variance_weight: 0.4,
            unstable_flip_rate: 0.1,
            unstable_pass_rate: 0.9,
        }
    }
}

/// Sort key: known before unknown, stable before unstable, fast before slow
#[derive(Debug, PartialEq)]
struct OrderKey {
    unknown: bool,
    unstable: bool,
    mean_ms: f64,
}

impl OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.unknown, self.unstable)
            .cmp(&(other.unknown, other.unstable))
            .then(
                self.mean_ms
                    .partial_cmp(&other.mean_ms)
                    .unwrap_or(Ordering::Equal),
            )
    }
}

pub struct AdaptiveStrategy {
    history: SharedHistory,
    parallel: ParallelStrategy,
    config: AdaptiveConfig,
}

impl AdaptiveStrategy {
    pub fn new(history: SharedHistory, parallel: ParallelStrategy) -> Self {
        Self {
            history,
            parallel,
            config: AdaptiveConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AdaptiveConfig) -> Self {
        self.config = config;
        self
    }

    fn order_key(&self, test: &Test, history: &ExecutionHistory) -> OrderKey {
        match history.get(&test.id) {
            Some(h) => OrderKey {
                unknown: false,
                unstable: h.flakiness_rate() > self.config.unstable_flip_rate
                    || h.pass_rate() < self.config.unstable_pass_rate,
                mean_ms: h.mean_ms(),
            },
            None => OrderKey {
                unknown: true,
                unstable: false,
                mean_ms: test.expected_execution_ms as f64,
            },
        }
    }

    /// How far the history backs an ordering of `plan`, in [0, 1]
    ///
    /// Coverage of the plan by history, times a blend of per-test sample
    /// sufficiency and timing consistency.
    pub fn confidence(&self, plan: &ExecutionPlan, history: &ExecutionHistory) -> f64 {
        let total = plan.test_count();
        if total == 0 {
            return 0.0;
        }

        let known: Vec<_> = plan
            .batches
            .iter()
            .flat_map(|b| b.tests.iter())
            .filter_map(|t| history.get(&t.id))
            .collect();
        if known.is_empty() {
            return 0.0;
        }

        let target = self.config.sample_target.max(1) as f64;
        let n = known.len() as f64;
        let sample_factor = known
            .iter()
            .map(|h| (h.len() as f64 / target).min(1.0))
            .sum::<f64>()
            / n;
        let variance_factor = known
            .iter()
            .map(|h| 1.0 / (1.0 + h.timing().coefficient_of_variation()))
            .sum::<f64>()
            / n;

        let weights = self.config.sample_weight + self.config.variance_weight;
        let blend = if weights > 0.0 {
            (self.config.sample_weight * sample_factor + self.config.variance_weight * variance_factor)
                / weights
        } else {
            0.0
        };

        let coverage = n / total as f64;
        (coverage * blend).clamp(0.0, 1.0)
    }

    /// Regroup each layer by history while keeping batch sizes and layer order
    pub fn reorder(&self, plan: &ExecutionPlan, history: &ExecutionHistory) -> ExecutionPlan {
        let mut batches = Vec::with_capacity(plan.batches.len());
        let mut start = 0;

        while start < plan.batches.len() {
            let layer = plan.batches[start].layer;
            let end = plan.batches[start..]
                .iter()
                .position(|b| b.layer != layer)
                .map(|offset| start + offset)
                .unwrap_or(plan.batches.len());
            let group = &plan.batches[start..end];

            let levels: HashMap<&str, ComplexityLevel> = group
                .iter()
                .flat_map(|b| b.tests.iter().map(move |t| (t.id.as_str(), b.complexity)))
                .collect();

            let mut pooled: Vec<(OrderKey, &Test)> = group
                .iter()
                .flat_map(|b| b.tests.iter())
                .map(|t| (self.order_key(t, history), t))
                .collect();
            pooled.sort_by(|a, b| a.0.cmp(&b.0));

            let mut tests = pooled.into_iter().map(|(_, t)| t.clone());
            for original in group {
                let chunk: Vec<Test> = tests.by_ref().take(original.len()).collect();
                let complexity = chunk
                    .iter()
                    .filter_map(|t| levels.get(t.id.as_str()).copied())
                    .max()
                    .unwrap_or(original.complexity);
                batches.push(TestBatch::new(0, layer, chunk, complexity));
            }

            start = end;
        }

        let mut reordered = ExecutionPlan {
            batches,
            max_concurrency: plan.max_concurrency,
        };
        reordered.renumber();
        reordered
    }
}

#[async_trait]
impl ExecutionStrategy for AdaptiveStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Adaptive
    }

    async fn execute(&self, plan: &ExecutionPlan, ctx: &ExecutionContext) -> ExecutionResult {
        let (reordered, confidence) = {
            let history = self.history.read().await;
            if history.is_empty() {
                (None, 0.0)
            } else {
                (
                    Some(self.reorder(plan, &history)),
                    self.confidence(plan, &history),
                )
            }
        };

        let mut result = match &reordered {
            None => {
                info!("No execution history yet, running sequentially");
                SequentialStrategy::new().execute(plan, ctx).await
            }
            Some(reordered) => {
                info!("Adaptive ordering with confidence {:.2}", confidence);
                debug!("{}", reordered);
                self.parallel.execute(reordered, ctx).await
            }
        };

        result.strategy = self.kind();
        result.confidence = Some(confidence);
        result
    }
}
