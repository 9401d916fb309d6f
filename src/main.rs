//! testgate - Test Orchestration & Quality Gate Engine
//!
//! Schedules a test suite into dependency-ordered batches, runs it with a
//! sequential, parallel or adaptive strategy, and evaluates quality gates
//! (coverage, pass rate, performance, security) into a single verdict.
//!
//! ## Usage
//!
//! ```bash
//! # Run a suite with every enabled gate
//! testgate run --suite suite.yaml
//!
//! # Parallel run, selected gates, stop gate evaluation on a critical failure
//! testgate run-suite --suite suite.yaml --strategy parallel -j 8 \
//!     --gates pass-rate,security --fail-fast
//!
//! # Show the batch plan without running anything
//! testgate plan --suite suite.yaml
//!
//! # Write an example configuration
//! testgate config init
//! ```
//!
//! Exit codes: 0 all gates passed, 1 gate failure, 2 configuration or
//! scheduling error.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use testgate::analysis::{Collaborators, CoverageReport, StaticSecurityFindings};
use testgate::cli::{self, Args};
use testgate::config::{ConfigFile, EngineConfig, EnvConfig};
use testgate::executor::{
    CancellationToken, CommandExecutor, LocalProvisioner, StrategyKind, SystemResourceMonitor,
};
use testgate::gates::GateId;
use testgate::models::TestSuite;
use testgate::notify::{AlertDispatcher, LogSink};
use testgate::orchestrator::GateExecutionStrategy;
use testgate::output::{write_report_to_file, OutputFormat, ReportFormatter};
use testgate::pipeline::QualityPipeline;
use testgate::results::{ExecutionHistory, FileBaselineService, HistoryStorage};
use testgate::scheduler::BatchScheduler;
use testgate::utils::logger::{init_logger, LogLevel};

const EXIT_GATE_FAILURE: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(LogLevel::from_verbose(args.verbose));

    let env = EnvConfig::load();

    let outcome = match args.command {
        cli::Command::Run(run_args) => run_suite(run_args, &env).await,
        cli::Command::Plan(plan_args) => show_plan(plan_args, &env).map(|_| ExitCode::SUCCESS),
        cli::Command::Gates => list_gates(&env).map(|_| ExitCode::SUCCESS),
        cli::Command::Config(config_args) => {
            manage_config(config_args, &env).map(|_| ExitCode::SUCCESS)
        }
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

/// Defaults < config file < environment
fn load_config(path: Option<&Path>, env: &EnvConfig) -> Result<EngineConfig> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));
    let mut config = ConfigFile::resolve(path.as_deref())?.engine;
    config
        .apply_env(env)
        .context("Invalid TESTGATE_* environment override")?;
    Ok(config)
}

/// Command-line flags win over every other source
fn apply_run_args(config: &mut EngineConfig, args: &cli::RunArgs) -> Result<()> {
    if let Some(strategy) = &args.strategy {
        config.execution.strategy = StrategyKind::from_str(strategy)
            .ok_or_else(|| anyhow::anyhow!("Unknown execution strategy: {strategy}"))?;
    }
    if let Some(max) = args.max_concurrency {
        config.execution.max_concurrency = max;
    }
    if let Some(timeout) = args.timeout {
        config.execution.timeout_secs = timeout;
    }
    if let Some(retries) = args.max_retries {
        config.execution.retry.max_retries = retries;
    }
    if let Some(strategy) = &args.gate_strategy {
        config.orchestration.strategy = GateExecutionStrategy::from_str(strategy)
            .ok_or_else(|| anyhow::anyhow!("Unknown gate strategy: {strategy}"))?;
    }
    if args.fail_fast {
        config.orchestration.strategy = GateExecutionStrategy::FailFast;
    }
    if let Some(format) = &args.format {
        config.output = OutputFormat::from_str(format)
            .ok_or_else(|| anyhow::anyhow!("Unknown output format: {format}"))?;
    }
    if let Some(history) = &args.history {
        config.storage.history_path = Some(history.clone());
    }
    if let Some(baseline) = &args.baseline {
        config.storage.baseline_path = Some(baseline.clone());
    }
    config.validate()?;
    Ok(())
}

async fn run_suite(args: cli::RunArgs, env: &EnvConfig) -> Result<ExitCode> {
    let mut config = load_config(args.config.as_deref(), env)?;
    apply_run_args(&mut config, &args)?;

    let suite = TestSuite::load(&args.suite)?;
    let gate_ids = config.gate_ids(&args.gates)?;
    info!(
        "Suite '{}': {} tests, strategy {}, gates [{}]",
        suite.name,
        suite.len(),
        config.execution.strategy,
        gate_ids
            .iter()
            .map(GateId::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut collaborators = Collaborators::new();
    if let Some(path) = &args.security {
        collaborators = collaborators.with_security(Arc::new(StaticSecurityFindings::load(path)?));
    }
    if let Some(path) = &config.storage.baseline_path {
        let baseline = FileBaselineService::open(path, config.storage.baseline.clone())?;
        collaborators = collaborators.with_baseline(Arc::new(baseline));
    }

    let executor = CommandExecutor::new().with_shell(config.execution.shell.clone());
    let format = config.output;
    let mut pipeline = QualityPipeline::new(config.clone(), Arc::new(executor))
        .with_collaborators(collaborators)
        .with_monitor(Arc::new(SystemResourceMonitor::new()))
        .with_alerts(AlertDispatcher::new(config.alerts.clone()).with_sink(Arc::new(LogSink)));

    if !config.storage.ephemeral {
        let storage = HistoryStorage::new(config.storage.history_path());
        let history = storage.load().unwrap_or_else(|e| {
            warn!("Ignoring unreadable history: {:#}", e);
            ExecutionHistory::new(config.execution.history_window)
        });
        pipeline = pipeline
            .with_history(Arc::new(RwLock::new(history)))
            .with_storage(storage);
    }
    if !suite.environment.is_empty() {
        pipeline = pipeline.with_provisioner(Arc::new(LocalProvisioner));
    }
    if let Some(path) = &args.coverage {
        pipeline = pipeline.with_coverage(CoverageReport::load(path)?);
    }

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight tests");
            ctrl_c.cancel();
        }
    });
    pipeline = pipeline.with_cancellation(token);

    let outcome = pipeline.run(&suite, &gate_ids).await?;
    let report = &outcome.report;

    println!("{}", ReportFormatter::new(format).format_report(report)?);
    if let Some(path) = &args.output {
        write_report_to_file(path, report, format_for_path(path, format))?;
        info!("Report saved to {}", path.display());
    }

    if outcome.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_GATE_FAILURE))
    }
}

/// File extension wins over the console format
fn format_for_path(path: &Path, fallback: OutputFormat) -> OutputFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => OutputFormat::JsonPretty,
        Some("csv") => OutputFormat::Csv,
        _ => fallback,
    }
}

fn show_plan(args: cli::PlanArgs, env: &EnvConfig) -> Result<()> {
    let mut config = load_config(args.config.as_deref(), env)?;
    if let Some(max) = args.max_concurrency {
        config.execution.max_concurrency = max;
    }
    let format = match &args.format {
        Some(f) => {
            OutputFormat::from_str(f).ok_or_else(|| anyhow::anyhow!("Unknown output format: {f}"))?
        }
        None => config.output,
    };
    config.validate()?;

    let suite = TestSuite::load(&args.suite)?;
    let plan = BatchScheduler::new(config.execution.max_concurrency)
        .with_complexity(config.execution.complexity.clone())
        .schedule_suite(&suite)?;

    println!("{}", ReportFormatter::new(format).format_plan(&plan)?);
    Ok(())
}

fn list_gates(env: &EnvConfig) -> Result<()> {
    let config = load_config(None, env)?;
    let enabled = config.gate_ids::<&str>(&[])?;

    println!("\nQuality Gates\n");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "  {:12} {:>9} {:>7} {:>9} {:>8}",
        "GATE", "THRESHOLD", "WEIGHT", "CRITICAL", "ENABLED"
    );
    println!("──────────────────────────────────────────────────────────────");
    for id in GateId::all() {
        let critical = match &config.orchestration.critical {
            Some(ids) => ids.iter().any(|c| c == id.as_str()),
            None => config.gates.critical(id),
        };
        println!(
            "  {:12} {:>9.1} {:>7.2} {:>9} {:>8}",
            id.as_str(),
            config.gates.threshold(id),
            config.orchestration.weight(id.as_str()),
            if critical { "yes" } else { "no" },
            if enabled.contains(&id) { "✓" } else { "" }
        );
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "  Gate strategy: {}  |  Minimum score: {}\n",
        config.orchestration.strategy,
        config
            .orchestration
            .minimum_score
            .map(|m| format!("{m:.1}"))
            .unwrap_or_else(|| "mean of thresholds".to_string())
    );
    Ok(())
}

fn manage_config(args: cli::ConfigArgs, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }

            ConfigFile::example().save(&path)?;
            println!("✓ Configuration file created: {}", path.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { config } => {
            let engine = load_config(config.as_deref(), env)?;
            println!("{}", serde_yaml::to_string(&ConfigFile::new(engine))?);
            if env.has_any() {
                println!("# includes TESTGATE_* environment overrides");
            }
        }

        cli::ConfigAction::Validate { path } => match ConfigFile::load(&path) {
            Ok(_) => println!("✓ Configuration file is valid: {}", path.display()),
            Err(e) => {
                println!("✗ Configuration file is invalid: {}", path.display());
                println!("  Error: {e:#}");
                return Err(e);
            }
        },
    }

    Ok(())
}
