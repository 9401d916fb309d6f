//! Configuration module
//!
//! Every tunable of the engine lives in [`EngineConfig`]. Values resolve as
//! defaults, then the config file, then `TESTGATE_*` variables, then flags.

mod env;
mod file;

pub use env::{EnvConfig, ENV_PREFIX};
pub use file::ConfigFile;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::analysis::ReliabilityConfig;
use crate::error::ConfigError;
use crate::executor::{AdaptiveConfig, LoadBalancingConfig, RetryPolicy, StrategyKind, MAX_RETRIES};
use crate::gates::{GateId, GatesConfig};
use crate::notify::AlertConfig;
use crate::orchestrator::OrchestrationConfig;
use crate::output::OutputFormat;
use crate::results::{BaselineConfig, HistoryStorage, DEFAULT_TEST_WINDOW};
use crate::scheduler::ComplexityConfig;

/// How tests are scheduled and run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub strategy: StrategyKind,
    pub max_concurrency: usize,
    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
    pub complexity: ComplexityConfig,
    pub load_balancing: LoadBalancingConfig,
    pub adaptive: AdaptiveConfig,
    /// Samples kept per test in the rolling history
    pub history_window: usize,
    /// Shell used for test commands
    pub shell: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Parallel,
            max_concurrency: 4,
            timeout_secs: 300,
            retry: RetryPolicy::none(),
            complexity: ComplexityConfig::default(),
            load_balancing: LoadBalancingConfig::default(),
            adaptive: AdaptiveConfig::default(),
            history_window: DEFAULT_TEST_WINDOW,
            shell: "sh".to_string(),
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where history and baselines persist
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to the platform data directory
    pub history_path: Option<PathBuf>,
    /// No baseline comparison when unset
    pub baseline_path: Option<PathBuf>,
    /// Keep history in memory only
    pub ephemeral: bool,
    pub baseline: BaselineConfig,
}

impl StorageConfig {
    pub fn history_path(&self) -> PathBuf {
        self.history_path
            .clone()
            .unwrap_or_else(HistoryStorage::default_path)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub execution: ExecutionConfig,
    pub gates: GatesConfig,
    pub orchestration: OrchestrationConfig,
    pub reliability: ReliabilityConfig,
    pub storage: StorageConfig,
    pub alerts: AlertConfig,
    pub output: OutputFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            gates: GatesConfig::default(),
            orchestration: OrchestrationConfig::default(),
            reliability: ReliabilityConfig::default(),
            storage: StorageConfig::default(),
            alerts: AlertConfig::default(),
            output: OutputFormat::Table,
        }
    }
}

impl EngineConfig {
    /// Reject settings that would make a run meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        let execution = &self.execution;
        if execution.max_concurrency == 0 {
            return Err(invalid("execution.max_concurrency", "must be at least 1"));
        }
        if execution.timeout_secs == 0 {
            return Err(invalid("execution.timeout_secs", "must be at least 1"));
        }
        if execution.retry.max_retries > MAX_RETRIES {
            return Err(invalid(
                "execution.retry.max_retries",
                format!("{} exceeds {MAX_RETRIES}", execution.retry.max_retries),
            ));
        }
        if let Some(backoff) = &execution.retry.backoff {
            if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
                return Err(invalid(
                    "execution.retry.backoff.multiplier",
                    format!("{} is below 1", backoff.multiplier),
                ));
            }
        }
        for (field, ceiling) in [
            ("cpu_ceiling", execution.load_balancing.cpu_ceiling),
            ("memory_ceiling", execution.load_balancing.memory_ceiling),
        ] {
            if !(ceiling > 0.0 && ceiling <= 100.0) {
                return Err(invalid(
                    format!("execution.load_balancing.{field}"),
                    format!("{ceiling} is outside (0, 100]"),
                ));
            }
        }
        let adaptive = &execution.adaptive;
        crate::gates::check_weights(
            "execution.adaptive",
            &[
                ("sample_weight", adaptive.sample_weight),
                ("variance_weight", adaptive.variance_weight),
            ],
        )?;

        self.gates.validate()?;
        self.orchestration.validate()?;

        // Orchestration may only name built-in gates
        let named = self
            .orchestration
            .weights
            .keys()
            .chain(self.orchestration.critical.iter().flatten());
        for id in named {
            if GateId::from_str(id).map(|g| g.as_str()) != Some(id.as_str()) {
                return Err(ConfigError::UnknownGate(id.clone()));
            }
        }
        Ok(())
    }

    /// Gates to run: explicit names, else the configured set
    pub fn gate_ids<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<GateId>, ConfigError> {
        if names.is_empty() {
            GateId::parse_list(&self.gates.enabled)
        } else {
            GateId::parse_list(names)
        }
    }

    /// Apply `TESTGATE_*` overrides
    pub fn apply_env(&mut self, env: &EnvConfig) -> Result<(), ConfigError> {
        if let Some(strategy) = &env.strategy {
            self.execution.strategy = StrategyKind::from_str(strategy)
                .ok_or_else(|| invalid(format!("{ENV_PREFIX}_STRATEGY"), strategy.clone()))?;
        }
        if let Some(max) = env.max_concurrency {
            self.execution.max_concurrency = max;
        }
        if let Some(timeout) = env.timeout {
            self.execution.timeout_secs = timeout;
        }
        if let Some(retries) = env.max_retries {
            self.execution.retry.max_retries = retries;
        }
        if let Some(gates) = &env.gates {
            self.gates.enabled = gates
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect();
        }
        if env.fail_fast == Some(true) {
            self.orchestration.strategy = crate::orchestrator::GateExecutionStrategy::FailFast;
        }
        if let Some(format) = &env.format {
            self.output = OutputFormat::from_str(format)
                .ok_or_else(|| invalid(format!("{ENV_PREFIX}_FORMAT"), format.clone()))?;
        }
        if let Some(path) = &env.history {
            self.storage.history_path = Some(PathBuf::from(path));
        }
        Ok(())
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::GateExecutionStrategy;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.max_concurrency, 4);
        assert_eq!(config.execution.timeout(), Duration::from_secs(300));
        assert_eq!(config.alerts.dedup_window_minutes, 15);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = EngineConfig::default();
        config.execution.max_concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_retry_count_is_bounded() {
        let mut config = EngineConfig::default();
        config.execution.retry.max_retries = MAX_RETRIES;
        assert!(config.validate().is_ok());

        config.execution.retry.max_retries = u32::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_orchestration_must_name_known_gates() {
        let mut config = EngineConfig::default();
        config.orchestration.weights.insert("lint".into(), 1.0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownGate("lint".into()))
        );

        let mut config = EngineConfig::default();
        config.orchestration.critical = Some(vec!["pass-rate".into()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = EngineConfig::default();
        config.gates.coverage.weights.branch = -0.3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn test_gate_ids() {
        let config = EngineConfig::default();
        assert_eq!(config.gate_ids::<&str>(&[]).unwrap().len(), 4);
        assert_eq!(
            config.gate_ids(&["security"]).unwrap(),
            vec![GateId::Security]
        );
    }

    #[test]
    fn test_apply_env() {
        let mut config = EngineConfig::default();
        let env = EnvConfig {
            strategy: Some("adaptive".into()),
            max_concurrency: Some(8),
            gates: Some("coverage, security".into()),
            fail_fast: Some(true),
            format: Some("json".into()),
            ..Default::default()
        };
        config.apply_env(&env).unwrap();

        assert_eq!(config.execution.strategy, StrategyKind::Adaptive);
        assert_eq!(config.execution.max_concurrency, 8);
        assert_eq!(config.gates.enabled, vec!["coverage", "security"]);
        assert_eq!(
            config.orchestration.strategy,
            GateExecutionStrategy::FailFast
        );
        assert_eq!(config.output, OutputFormat::Json);

        let bad = EnvConfig {
            strategy: Some("random".into()),
            ..Default::default()
        };
        assert!(config.apply_env(&bad).is_err());
    }
}
