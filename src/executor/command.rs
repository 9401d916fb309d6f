//! Shell-command test executor

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::runner::TestExecutor;
use crate::error::ExecutionError;
use crate::models::{Test, TestOutcome};
use crate::utils::timer::Timer;

/// Runs each test's `command` through `sh -c`
///
/// Exit status 0 passes, anything else fails with the tail of stderr.
/// Tests without a command are skipped.
#[derive(Clone, Debug)]
pub struct CommandExecutor {
    shell: String,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
        .unwrap_or_default()
}

#[async_trait]
impl TestExecutor for CommandExecutor {
    async fn run_one(
        &self,
        test: &Test,
        _timeout: Duration,
    ) -> Result<TestOutcome, ExecutionError> {
        let Some(command) = test.command.as_deref() else {
            return Ok(TestOutcome::skipped("no command configured"));
        };

        let timer = Timer::start(&test.id);
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .envs(&self.env)
            .env("TESTGATE_TEST_ID", &test.id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!("{}: {} -c {:?}", test.id, self.shell, command);
        let output = cmd.output().await.map_err(|e| {
            ExecutionError::Infrastructure(format!("failed to spawn {}: {}", self.shell, e))
        })?;
        let ms = timer.elapsed_ms();

        if output.status.success() {
            return Ok(TestOutcome::passed(ms));
        }

        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let tail = stderr_tail(&output.stderr);
        let message = if tail.is_empty() {
            format!("exit status {code}")
        } else {
            format!("exit status {code}: {tail}")
        };
        Ok(TestOutcome::failed(ms, message))
    }

    fn name(&self) -> &str {
        "command"
    }
}
