//! Batch scheduling
//!
//! Partitions a suite into batches that are safe to run concurrently. Batches
//! follow dependency layers; inside a layer tests are bucketed by complexity
//! and each bucket is split so no batch exceeds the concurrency budget.

mod graph;

pub use graph::DependencyGraph;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::ConfigError;
use crate::models::{Test, TestSuite};

/// Load-balancing class of a test or batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
}

impl ComplexityLevel {
    pub fn all() -> [ComplexityLevel; 3] {
        [
            ComplexityLevel::Low,
            ComplexityLevel::Medium,
            ComplexityLevel::High,
        ]
    }
}

impl fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComplexityLevel::Low => write!(f, "low"),
            ComplexityLevel::Medium => write!(f, "medium"),
            ComplexityLevel::High => write!(f, "high"),
        }
    }
}

/// Cut-offs used to score test complexity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityConfig {
    /// Expected time up to this is time-bucket 1
    pub fast_ms: u64,
    /// Expected time up to this is time-bucket 2, above is 3
    pub moderate_ms: u64,
    /// Memory above this earns +1
    pub memory_medium_mb: u64,
    /// Memory above this earns +2
    pub memory_high_mb: u64,
    /// Bonus for integration and e2e tests
    pub integration_bonus: u32,
    /// Highest score still classed low
    pub low_max: u32,
    /// Highest score still classed medium
    pub medium_max: u32,
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        Self {
            fast_ms: 1_000,
            moderate_ms: 10_000,
            memory_medium_mb: 256,
            memory_high_mb: 1_024,
            integration_bonus: 2,
            low_max: 3,
            medium_max: 6,
        }
    }
}

impl ComplexityConfig {
    /// time-bucket(1-3) + memory-bonus(0-2) + dependency count + type bonus
    pub fn score(&self, test: &Test) -> u32 {
        let time_bucket = if test.expected_execution_ms <= self.fast_ms {
            1
        } else if test.expected_execution_ms <= self.moderate_ms {
            2
        } else {
            3
        };

        let memory_bonus = match test.resources.memory_mb {
            Some(mb) if mb > self.memory_high_mb => 2,
            Some(mb) if mb > self.memory_medium_mb => 1,
            _ => 0,
        };

        let type_bonus = if test.test_type.is_integration_like() {
            self.integration_bonus
        } else {
            0
        };

        time_bucket + memory_bonus + test.dependencies.len() as u32 + type_bonus
    }

    pub fn level(&self, test: &Test) -> ComplexityLevel {
        let score = self.score(test);
        if score <= self.low_max {
            ComplexityLevel::Low
        } else if score <= self.medium_max {
            ComplexityLevel::Medium
        } else {
            ComplexityLevel::High
        }
    }
}

/// Tests judged safe to run concurrently
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestBatch {
    pub id: usize,
    /// Dependency layer this batch belongs to
    pub layer: usize,
    pub tests: Vec<Test>,
    /// Wall-clock estimate when the batch runs fully concurrently
    pub estimated_execution_ms: u64,
    pub complexity: ComplexityLevel,
}

impl TestBatch {
    pub fn new(id: usize, layer: usize, tests: Vec<Test>, complexity: ComplexityLevel) -> Self {
        let estimated_execution_ms = tests
            .iter()
            .map(|t| t.expected_execution_ms)
            .max()
            .unwrap_or(0);
        Self {
            id,
            layer,
            tests,
            estimated_execution_ms,
            complexity,
        }
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn test_ids(&self) -> Vec<&str> {
        self.tests.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn contains(&self, test_id: &str) -> bool {
        self.tests.iter().any(|t| t.id == test_id)
    }
}

/// Ordered batches for one execution
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub batches: Vec<TestBatch>,
    pub max_concurrency: usize,
}

impl ExecutionPlan {
    pub fn test_count(&self) -> usize {
        self.batches.iter().map(TestBatch::len).sum()
    }

    pub fn layer_count(&self) -> usize {
        self.batches.iter().map(|b| b.layer + 1).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Index of the batch containing a test
    pub fn batch_index_of(&self, test_id: &str) -> Option<usize> {
        self.batches.iter().position(|b| b.contains(test_id))
    }

    pub fn estimated_sequential_ms(&self) -> u64 {
        self.batches
            .iter()
            .flat_map(|b| b.tests.iter())
            .map(|t| t.expected_execution_ms)
            .sum()
    }

    pub fn estimated_parallel_ms(&self) -> u64 {
        self.batches.iter().map(|b| b.estimated_execution_ms).sum()
    }

    /// Recompute ids so they follow plan order
    pub fn renumber(&mut self) {
        for (i, batch) in self.batches.iter_mut().enumerate() {
            batch.id = i;
        }
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Execution plan: {} tests in {} batches across {} layers (max concurrency {})",
            self.test_count(),
            self.batches.len(),
            self.layer_count(),
            self.max_concurrency
        )?;
        for batch in &self.batches {
            writeln!(
                f,
                "  batch {:>3} [layer {}, {:6}, ~{}ms] {}",
                batch.id,
                batch.layer,
                batch.complexity,
                batch.estimated_execution_ms,
                batch.test_ids().join(", ")
            )?;
        }
        write!(
            f,
            "Estimated: {}ms sequential, {}ms batched",
            self.estimated_sequential_ms(),
            self.estimated_parallel_ms()
        )
    }
}

/// Dependency-aware batch scheduler
#[derive(Clone, Debug)]
pub struct BatchScheduler {
    max_concurrency: usize,
    complexity: ComplexityConfig,
}

impl BatchScheduler {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            complexity: ComplexityConfig::default(),
        }
    }

    pub fn with_complexity(mut self, complexity: ComplexityConfig) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn complexity(&self) -> &ComplexityConfig {
        &self.complexity
    }

    pub fn schedule_suite(&self, suite: &TestSuite) -> Result<ExecutionPlan, ConfigError> {
        self.schedule(&suite.tests)
    }

    /// Partition tests into dependency-ordered batches
    pub fn schedule(&self, tests: &[Test]) -> Result<ExecutionPlan, ConfigError> {
        let graph = DependencyGraph::new(tests)?;
        let layers = graph.layers()?;

        let mut batches = Vec::new();
        for (layer_idx, layer) in layers.iter().enumerate() {
            for level in ComplexityLevel::all() {
                let bucket: Vec<Test> = layer
                    .iter()
                    .map(|&i| &tests[i])
                    .filter(|t| self.complexity.level(t) == level)
                    .cloned()
                    .collect();

                for group in split_bucket(bucket, self.max_concurrency) {
                    batches.push(TestBatch::new(batches.len(), layer_idx, group, level));
                }
            }
        }

        debug!(
            "Scheduled {} tests into {} batches over {} layers",
            tests.len(),
            batches.len(),
            layers.len()
        );

        Ok(ExecutionPlan {
            batches,
            max_concurrency: self.max_concurrency,
        })
    }
}

/// Split into `ceil(n / max_concurrency)` evenly sized groups
pub fn split_bucket(bucket: Vec<Test>, max_concurrency: usize) -> Vec<Vec<Test>> {
    if bucket.is_empty() {
        return Vec::new();
    }
    let max_concurrency = max_concurrency.max(1);
    let groups = bucket.len().div_ceil(max_concurrency);
    let group_size = bucket.len().div_ceil(groups);

    bucket
        .chunks(group_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestType;

    fn ids(plan: &ExecutionPlan) -> Vec<Vec<&str>> {
        plan.batches.iter().map(|b| b.test_ids()).collect()
    }

    #[test]
    fn test_independent_and_dependent_tests() {
        let tests = vec![
            Test::new("A", "A"),
            Test::new("B", "B").depends_on("A"),
            Test::new("C", "C"),
        ];
        let plan = BatchScheduler::new(2).schedule(&tests).unwrap();
        assert_eq!(ids(&plan), vec![vec!["A", "C"], vec!["B"]]);
    }

    #[test]
    fn test_single_test_is_singleton_batch() {
        let plan = BatchScheduler::new(4)
            .schedule(&[Test::new("solo", "Solo")])
            .unwrap();
        assert_eq!(ids(&plan), vec![vec!["solo"]]);
    }

    #[test]
    fn test_empty_suite() {
        let plan = BatchScheduler::new(4).schedule(&[]).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.layer_count(), 0);
    }

    #[test]
    fn test_cycle_fails_before_execution() {
        let tests = vec![
            Test::new("x", "X").depends_on("y"),
            Test::new("y", "Y").depends_on("x"),
        ];
        let err = BatchScheduler::new(2).schedule(&tests).unwrap_err();
        assert!(matches!(err, ConfigError::CyclicDependency { .. }));
    }

    #[test]
    fn test_complexity_buckets_split_layer() {
        let tests = vec![
            Test::new("fast", "Fast"),
            Test::new("heavy", "Heavy")
                .with_expected_ms(60_000)
                .with_memory_mb(4096)
                .with_type(TestType::E2e),
            Test::new("mid", "Mid")
                .with_expected_ms(5_000)
                .with_type(TestType::Integration),
        ];
        let plan = BatchScheduler::new(4).schedule(&tests).unwrap();
        assert_eq!(ids(&plan), vec![vec!["fast"], vec!["mid"], vec!["heavy"]]);
        assert_eq!(plan.batches[2].complexity, ComplexityLevel::High);
        assert_eq!(plan.batches[1].complexity, ComplexityLevel::Medium);
    }

    #[test]
    fn test_complexity_score() {
        let config = ComplexityConfig::default();
        let test = Test::new("t", "T")
            .with_expected_ms(5_000)
            .with_memory_mb(512)
            .depends_on("a")
            .with_type(TestType::Integration);
        // 2 (time) + 1 (memory) + 1 (deps) + 2 (integration)
        assert_eq!(config.score(&test), 6);
        assert_eq!(config.level(&test), ComplexityLevel::Medium);
    }

    #[test]
    fn test_groups_respect_concurrency_budget() {
        let tests: Vec<Test> = (0..10).map(|i| Test::new(format!("t{i}"), "t")).collect();
        let plan = BatchScheduler::new(3).schedule(&tests).unwrap();
        assert!(plan.batches.iter().all(|b| b.len() <= 3));
        assert_eq!(plan.test_count(), 10);
        assert_eq!(plan.batches.len(), 4);
    }

    #[test]
    fn test_dependencies_always_in_earlier_batches() {
        let tests = vec![
            Test::new("root", "Root"),
            Test::new("a", "A").depends_on("root"),
            Test::new("b", "B").depends_on("root"),
            Test::new("c", "C").depends_on("a").depends_on("b"),
            Test::new("d", "D").with_expected_ms(20_000),
            Test::new("e", "E").depends_on("d").with_type(TestType::E2e),
        ];
        let plan = BatchScheduler::new(2).schedule(&tests).unwrap();

        for test in &tests {
            let own = plan.batch_index_of(&test.id).unwrap();
            for dep in &test.dependencies {
                let dep_batch = plan.batch_index_of(dep).unwrap();
                assert!(dep_batch < own, "{dep} must run before {}", test.id);
            }
        }
    }

    #[test]
    fn test_split_bucket_even_groups() {
        let bucket: Vec<Test> = (0..5).map(|i| Test::new(format!("t{i}"), "t")).collect();
        let groups = split_bucket(bucket, 4);
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 2]);
    }
}
