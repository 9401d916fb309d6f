//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TESTGATE";

/// Overrides read from `TESTGATE_*` variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Execution strategy from TESTGATE_STRATEGY
    pub strategy: Option<String>,
    /// Worker count from TESTGATE_MAX_CONCURRENCY
    pub max_concurrency: Option<usize>,
    /// Per-attempt timeout in seconds from TESTGATE_TIMEOUT
    pub timeout: Option<u64>,
    /// Retries from TESTGATE_MAX_RETRIES
    pub max_retries: Option<u32>,
    /// Config file from TESTGATE_CONFIG
    pub config_file: Option<String>,
    /// Comma-separated gate ids from TESTGATE_GATES
    pub gates: Option<String>,
    /// Fail-fast gate evaluation from TESTGATE_FAIL_FAST
    pub fail_fast: Option<bool>,
    /// Output format from TESTGATE_FORMAT
    pub format: Option<String>,
    /// History file from TESTGATE_HISTORY
    pub history: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            strategy: get_env("STRATEGY"),
            max_concurrency: get_env_parse("MAX_CONCURRENCY"),
            timeout: get_env_parse("TIMEOUT"),
            max_retries: get_env_parse("MAX_RETRIES"),
            config_file: get_env("CONFIG"),
            gates: get_env("GATES"),
            fail_fast: get_env_bool("FAIL_FAST"),
            format: get_env("FORMAT"),
            history: get_env("HISTORY"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.strategy.is_some()
            || self.max_concurrency.is_some()
            || self.timeout.is_some()
            || self.max_retries.is_some()
            || self.config_file.is_some()
            || self.gates.is_some()
            || self.fail_fast.is_some()
            || self.format.is_some()
            || self.history.is_some()
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Print the recognised TESTGATE variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_STRATEGY         Execution strategy (sequential, parallel, adaptive)");
    println!("  {ENV_PREFIX}_MAX_CONCURRENCY  Worker pool size");
    println!("  {ENV_PREFIX}_TIMEOUT          Per-attempt timeout in seconds");
    println!("  {ENV_PREFIX}_MAX_RETRIES      Retries per failing test");
    println!("  {ENV_PREFIX}_CONFIG           Path to configuration file");
    println!("  {ENV_PREFIX}_GATES            Comma-separated gate ids");
    println!("  {ENV_PREFIX}_FAIL_FAST        Stop gate evaluation at the first critical failure");
    println!("  {ENV_PREFIX}_FORMAT           Output format (table, json, json-pretty, csv, summary)");
    println!("  {ENV_PREFIX}_HISTORY          Path to the execution history file");
    println!("  {ENV_PREFIX}_LOG              Log filter (e.g. testgate=debug)");
}
