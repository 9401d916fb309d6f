//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Test orchestration and quality gate engine
#[derive(Parser, Debug)]
#[command(name = "testgate")]
#[command(author = "hephaex@gmail.com")]
#[command(version = "0.1.0")]
#[command(about = "Run test suites and enforce quality gates")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a test suite and evaluate quality gates
    #[command(alias = "run-suite")]
    Run(RunArgs),

    /// Print the batch plan for a suite without running it
    Plan(PlanArgs),

    /// List available quality gates
    Gates,

    /// Manage configuration files
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Test suite file (YAML or JSON)
    #[arg(short, long)]
    pub suite: PathBuf,

    /// Execution strategy (sequential, parallel, adaptive)
    #[arg(long)]
    pub strategy: Option<String>,

    /// Maximum concurrent tests
    #[arg(short = 'j', long)]
    pub max_concurrency: Option<usize>,

    /// Gates to evaluate (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub gates: Vec<String>,

    /// Gate evaluation strategy (parallel, sequential, priority, fail-fast)
    #[arg(long)]
    pub gate_strategy: Option<String>,

    /// Stop evaluating gates after the first critical failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Per-attempt timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Retries for failing tests
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Coverage report file
    #[arg(long)]
    pub coverage: Option<PathBuf>,

    /// Security findings file
    #[arg(long)]
    pub security: Option<PathBuf>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Save report to file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Execution history file
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Performance baseline file
    #[arg(long)]
    pub baseline: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Test suite file (YAML or JSON)
    #[arg(short, long)]
    pub suite: PathBuf,

    /// Maximum concurrent tests
    #[arg(short = 'j', long)]
    pub max_concurrency: Option<usize>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for config management
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Destination path
        #[arg(default_value = "testgate.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_suite_alias_and_gate_list() {
        let args = Args::parse_from([
            "testgate",
            "run-suite",
            "--suite",
            "suite.yaml",
            "--strategy",
            "adaptive",
            "-j",
            "8",
            "--gates",
            "coverage,security",
            "--fail-fast",
        ]);

        let Command::Run(run) = args.command else {
            panic!("expected run command");
        };
        assert_eq!(run.suite, PathBuf::from("suite.yaml"));
        assert_eq!(run.strategy.as_deref(), Some("adaptive"));
        assert_eq!(run.max_concurrency, Some(8));
        assert_eq!(run.gates, vec!["coverage", "security"]);
        assert!(run.fail_fast);
    }

    #[test]
    fn test_config_subcommands() {
        let args = Args::parse_from(["testgate", "-v", "config", "init", "--force"]);
        assert!(args.verbose);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { path, force },
            }) => {
                assert_eq!(path, PathBuf::from("testgate.yaml"));
                assert!(force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_suite_is_required() {
        assert!(Args::try_parse_from(["testgate", "run"]).is_err());
    }
}
