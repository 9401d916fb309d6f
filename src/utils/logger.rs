//! Logging setup

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the computed filter
pub const LOG_ENV: &str = "TESTGATE_LOG";

/// Console verbosity picked from the command line
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl LogLevel {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            LogLevel::Verbose
        } else {
            LogLevel::Normal
        }
    }

    fn crate_level(self) -> Level {
        match self {
            LogLevel::Quiet => Level::WARN,
            LogLevel::Normal => Level::INFO,
            LogLevel::Verbose => Level::DEBUG,
        }
    }

    /// Filter directive applied when `TESTGATE_LOG` is unset.
    ///
    /// Only this crate's events are raised; dependencies stay at `warn`.
    pub fn directive(self) -> String {
        format!(
            "warn,testgate={}",
            self.crate_level().as_str().to_lowercase()
        )
    }
}

/// Install the global subscriber; `TESTGATE_LOG` wins over `level`
pub fn init_logger(level: LogLevel) {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level.directive()));

    // Reports go to stdout, so diagnostics stay on stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(level == LogLevel::Verbose)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive() {
        assert_eq!(LogLevel::Normal.directive(), "warn,testgate=info");
        assert_eq!(LogLevel::Verbose.directive(), "warn,testgate=debug");
        assert_eq!(LogLevel::Quiet.directive(), "warn,testgate=warn");
    }

    #[test]
    fn test_from_verbose() {
        assert_eq!(LogLevel::from_verbose(true), LogLevel::Verbose);
        assert_eq!(LogLevel::from_verbose(false), LogLevel::Normal);
        assert_eq!(LogLevel::default(), LogLevel::Normal);
    }
}
