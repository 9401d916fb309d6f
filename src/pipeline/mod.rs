//! End-to-end quality pipeline
//!
//! One run goes `Pending → Scheduling → Running → Aggregating →
//! {Passed | Failed | Error} → Reported`. Configuration problems are
//! reported before anything executes; everything after that ends in a
//! report unless the execution task itself dies.

use chrono::Utc;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::analysis::{
    Collaborators, CoverageReport, HistoryReliabilityAnalyzer, PerformanceSnapshot, Trend,
};
use crate::config::EngineConfig;
use crate::error::PipelineError;
use crate::executor::{
    AdaptiveStrategy, AttemptRunner, CancellationToken, EnvironmentProvisioner, EnvironmentScope,
    ExecutionContext, ExecutionResult, ExecutionStrategy, ParallelStrategy, ResourceMonitor,
    SequentialStrategy, SharedHistory, StrategyKind, TestExecutor,
};
use crate::gates::{build_gates, GateContext, GateId};
use crate::models::{ErrorKind, OverallStatus, TestResult, TestSuite};
use crate::notify::AlertDispatcher;
use crate::orchestrator::{ComprehensiveReport, GateOrchestrator, OrchestrationConfig, ReportTrends};
use crate::results::{aggregate, generate_run_id, ExecutionHistory, HistoryStorage, RunRecord};
use crate::scheduler::{BatchScheduler, ExecutionPlan};
use crate::utils::timer::Stopwatch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Scheduling,
    Running,
    Aggregating,
    Passed,
    Failed,
    Error,
    Reported,
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Scheduling => "scheduling",
            RunState::Running => "running",
            RunState::Aggregating => "aggregating",
            RunState::Passed => "passed",
            RunState::Failed => "failed",
            RunState::Error => "error",
            RunState::Reported => "reported",
        }
    }

    /// Legal single-step moves; no state may be skipped
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Pending, Scheduling)
                | (Scheduling, Running)
                | (Running, Aggregating)
                | (Running, Error)
                | (Aggregating, Passed)
                | (Aggregating, Failed)
                | (Aggregating, Error)
                | (Passed, Reported)
                | (Failed, Reported)
                | (Error, Reported)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Reported)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<OverallStatus> for RunState {
    fn from(status: OverallStatus) -> Self {
        match status {
            OverallStatus::Passed => RunState::Passed,
            OverallStatus::Failed => RunState::Failed,
            OverallStatus::Error => RunState::Error,
        }
    }
}

/// Tracks the current state and every state visited
#[derive(Clone, Debug)]
pub struct RunStateMachine {
    visited: Vec<RunState>,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            visited: vec![RunState::Pending],
        }
    }

    pub fn state(&self) -> RunState {
        self.visited
            .last()
            .copied()
            .unwrap_or(RunState::Pending)
    }

    pub fn transition(&mut self, next: RunState) -> Result<(), PipelineError> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(PipelineError::IllegalTransition {
                from: current,
                to: next,
            });
        }
        debug!("Run state {} -> {}", current, next);
        self.visited.push(next);
        Ok(())
    }

    pub fn visited(&self) -> &[RunState] {
        &self.visited
    }
}

/// What a completed run produced
#[derive(Clone, Debug)]
pub struct PipelineOutcome {
    pub report: ComprehensiveReport,
    pub transitions: Vec<RunState>,
}

impl PipelineOutcome {
    pub fn passed(&self) -> bool {
        self.report.passed()
    }
}

pub struct QualityPipeline {
    config: EngineConfig,
    executor: Arc<dyn TestExecutor>,
    collaborators: Collaborators,
    history: SharedHistory,
    storage: Option<HistoryStorage>,
    provisioner: Option<Arc<dyn EnvironmentProvisioner>>,
    monitor: Option<Arc<dyn ResourceMonitor>>,
    alerts: Option<AlertDispatcher>,
    cancellation: CancellationToken,
    coverage: Option<CoverageReport>,
    performance: Option<PerformanceSnapshot>,
}

impl QualityPipeline {
    pub fn new(config: EngineConfig, executor: Arc<dyn TestExecutor>) -> Self {
        let history = ExecutionHistory::new(config.execution.history_window);
        Self {
            config,
            executor,
            collaborators: Collaborators::default(),
            history: Arc::new(RwLock::new(history)),
            storage: None,
            provisioner: None,
            monitor: None,
            alerts: None,
            cancellation: CancellationToken::new(),
            coverage: None,
            performance: None,
        }
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    pub fn with_history(mut self, history: SharedHistory) -> Self {
        self.history = history;
        self
    }

    /// Persist history here after every run
    pub fn with_storage(mut self, storage: HistoryStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn EnvironmentProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_alerts(mut self, alerts: AlertDispatcher) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_coverage(mut self, coverage: CoverageReport) -> Self {
        self.coverage = Some(coverage);
        self
    }

    pub fn with_performance(mut self, performance: PerformanceSnapshot) -> Self {
        self.performance = Some(performance);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn history(&self) -> SharedHistory {
        self.history.clone()
    }

    /// Schedule `suite` without running it
    pub fn plan(&self, suite: &TestSuite) -> Result<ExecutionPlan, PipelineError> {
        let execution = &self.config.execution;
        let plan = BatchScheduler::new(execution.max_concurrency)
            .with_complexity(execution.complexity.clone())
            .schedule_suite(suite)?;
        Ok(plan)
    }

    /// Run `suite` and evaluate `gate_ids` against the outcome
    pub async fn run(
        &self,
        suite: &TestSuite,
        gate_ids: &[GateId],
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut machine = RunStateMachine::new();
        let mut stopwatch = Stopwatch::new();
        let run_id = generate_run_id();
        info!("Run {} for suite '{}' ({} tests)", run_id, suite.name, suite.len());

        // Scheduling: every configuration error surfaces here
        machine.transition(RunState::Scheduling)?;
        self.config.validate()?;
        let collaborators = self.effective_collaborators();
        let gates = build_gates(gate_ids, &self.config.gates, &collaborators);
        let orchestrator = GateOrchestrator::new(self.orchestration_for(gate_ids));
        orchestrator.validate(&gates)?;
        let plan = self.plan(suite)?;
        debug!("{}", plan);
        stopwatch.lap("scheduling");

        machine.transition(RunState::Running)?;
        let execution = match self.execute(suite, plan).await {
            Ok(execution) => execution,
            Err(e) => {
                error!("Execution task failed: {}", e);
                machine.transition(RunState::Error)?;
                return Err(e);
            }
        };
        stopwatch.lap("running");

        machine.transition(RunState::Aggregating)?;
        let metrics = aggregate(&execution.results);
        info!(
            "Executed {} tests: {} passed, {} failed, {} errors, {} skipped",
            metrics.total, metrics.passed, metrics.failed, metrics.errors, metrics.skipped
        );
        stopwatch.lap("aggregating");

        let ctx = self.gate_context(&run_id, suite, &execution).await;
        let verdict = match orchestrator.run(&gates, Arc::new(ctx)).await {
            Ok(verdict) => verdict,
            Err(e) => {
                machine.transition(RunState::Error)?;
                return Err(e.into());
            }
        };
        stopwatch.lap("evaluating");

        let trend = self
            .record_history(&collaborators, &run_id, &execution, &metrics, &verdict)
            .await;
        let trends = {
            let history = self.history.read().await;
            ReportTrends::from_history(&history, trend, &execution)
        };

        machine.transition(RunState::from(verdict.status))?;
        info!(
            "Verdict {}: score {:.1} (minimum {:.1})",
            verdict.status, verdict.score, verdict.minimum_score
        );

        if let Some(alerts) = &self.alerts {
            alerts.notify(&verdict, &run_id).await;
        }

        let report = ComprehensiveReport::new(
            run_id,
            suite.name.clone(),
            execution,
            metrics,
            verdict,
            trends,
            stopwatch.phase_ms(),
        );
        machine.transition(RunState::Reported)?;

        Ok(PipelineOutcome {
            report,
            transitions: machine.visited().to_vec(),
        })
    }

    fn strategy(&self) -> Arc<dyn ExecutionStrategy> {
        let execution = &self.config.execution;
        let mut parallel = ParallelStrategy::new(execution.max_concurrency)
            .with_load_balancing(execution.load_balancing.clone());
        if let Some(monitor) = &self.monitor {
            parallel = parallel.with_monitor(monitor.clone());
        }

        match execution.strategy {
            StrategyKind::Sequential => Arc::new(SequentialStrategy::new()),
            StrategyKind::Parallel => Arc::new(parallel),
            StrategyKind::Adaptive => Arc::new(
                AdaptiveStrategy::new(self.history.clone(), parallel)
                    .with_config(execution.adaptive.clone()),
            ),
        }
    }

    /// Run the plan on its own task inside the suite's environment
    async fn execute(
        &self,
        suite: &TestSuite,
        plan: ExecutionPlan,
    ) -> Result<ExecutionResult, PipelineError> {
        let execution = &self.config.execution;
        let runner = AttemptRunner::new(self.executor.clone())
            .with_timeout(execution.timeout())
            .with_retry(execution.retry.clone());
        let ctx = ExecutionContext::new(runner).with_cancellation(self.cancellation.clone());
        let strategy = self.strategy();
        let kind = strategy.kind();
        let provisioner = self.provisioner.clone();
        let requirements = suite.environment.clone();

        let handle = tokio::spawn(async move {
            match provisioner {
                Some(provisioner) => {
                    EnvironmentScope::new(provisioner)
                        .run(&requirements, strategy.execute(&plan, &ctx))
                        .await
                }
                None => Ok(strategy.execute(&plan, &ctx).await),
            }
        });

        match handle.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(setup)) => {
                warn!("Environment setup failed: {}", setup);
                let mut result = ExecutionResult::new(kind);
                result.results = suite
                    .tests
                    .iter()
                    .map(|t| TestResult::error(t, ErrorKind::Environment, setup.to_string()))
                    .collect();
                result.attempts = result.results.clone();
                Ok(result)
            }
            Err(e) => Err(PipelineError::Execution(e.to_string())),
        }
    }

    /// The bundled reliability analyzer stands in when none was injected
    fn effective_collaborators(&self) -> Collaborators {
        let mut collaborators = self.collaborators.clone();
        if collaborators.reliability.is_none() {
            collaborators.reliability = Some(Arc::new(HistoryReliabilityAnalyzer::new(
                self.config.reliability.clone(),
            )));
        }
        collaborators
    }

    /// Orchestration settings restricted to the gates of this run
    fn orchestration_for(&self, gate_ids: &[GateId]) -> OrchestrationConfig {
        let selected: BTreeSet<&str> = gate_ids.iter().map(|g| g.as_str()).collect();
        let mut config = self.config.orchestration.clone();
        config.weights.retain(|id, _| selected.contains(id.as_str()));
        if let Some(critical) = config.critical.as_mut() {
            critical.retain(|id| selected.contains(id.as_str()));
        }
        config
    }

    async fn gate_context(
        &self,
        run_id: &str,
        suite: &TestSuite,
        execution: &ExecutionResult,
    ) -> GateContext {
        let history = self.history.read().await.clone();
        let security_tests = suite
            .tests
            .iter()
            .filter(|t| t.is_security())
            .map(|t| t.id.clone());

        let mut ctx = GateContext::from_results(execution.results.clone())
            .with_attempts(execution.attempts.clone())
            .with_history(history)
            .with_run(run_id, suite.name.clone())
            .with_wall_ms(execution.duration_ms)
            .with_min_tests(self.config.gates.min_tests)
            .with_security_tests(security_tests);
        if let Some(coverage) = &self.coverage {
            ctx = ctx.with_coverage(coverage.clone());
        }
        if let Some(performance) = &self.performance {
            ctx = ctx.with_performance(performance.clone());
        }
        ctx
    }

    /// Fold this run into the history, persist it, and read the trend back
    async fn record_history(
        &self,
        collaborators: &Collaborators,
        run_id: &str,
        execution: &ExecutionResult,
        metrics: &crate::results::ExecutionMetrics,
        verdict: &crate::models::AggregatedQualityGateResult,
    ) -> Option<Trend> {
        let mut history = self.history.write().await;
        history.record_results(&execution.results);
        history.record_run(RunRecord {
            run_id: run_id.to_string(),
            recorded_at: Utc::now(),
            total: metrics.total,
            passed: metrics.passed,
            pass_rate: metrics.pass_rate,
            execution_ms: execution.duration_ms,
            score: Some(verdict.score),
            verdict: Some(verdict.passed),
        });

        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save(&history) {
                warn!("Failed to persist history: {:#}", e);
            }
        }

        let analyzer = collaborators.reliability.as_ref()?;
        match analyzer.analyze_trend(&history).await {
            Ok(trend) => Some(trend),
            Err(e) => {
                warn!("Trend analysis unavailable: {}", e);
                None
            }
        }
    }
}
