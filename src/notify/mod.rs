//! Alert dispatch
//!
//! Critical gate failures are sent to every configured sink. Alerts with the
//! same key are suppressed for the dedup window; the window state belongs to
//! the dispatcher instance.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::models::{AggregatedQualityGateResult, FailureKind, GateStatus};

pub const DEFAULT_DEDUP_WINDOW_MINUTES: u64 = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Warning,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Critical => write!(f, "CRITICAL"),
            AlertSeverity::Warning => write!(f, "WARNING"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Dedup key
    pub key: String,
    pub severity: AlertSeverity,
    pub run_id: String,
    pub gate_id: Option<String>,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        key: impl Into<String>,
        severity: AlertSeverity,
        run_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            severity,
            run_id: run_id.into(),
            gate_id: None,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }

    pub fn for_gate(mut self, gate_id: impl Into<String>) -> Self {
        self.gate_id = Some(gate_id.into());
        self
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the log
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        match alert.severity {
            AlertSeverity::Critical => error!("[{}] {} ({})", alert.severity, alert.message, alert.run_id),
            AlertSeverity::Warning => warn!("[{}] {} ({})", alert.severity, alert.message, alert.run_id),
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub dedup_window_minutes: u64,
    /// Also alert when only the weighted minimum was missed
    pub on_below_minimum: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dedup_window_minutes: DEFAULT_DEDUP_WINDOW_MINUTES,
            on_below_minimum: false,
        }
    }
}

/// Last-sent time per alert key
#[derive(Debug)]
pub struct AlertCache {
    window: Duration,
    sent: HashMap<String, DateTime<Utc>>,
}

impl AlertCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            sent: HashMap::new(),
        }
    }

    /// Record `key` at `now` unless it was recorded within the window
    pub fn admit(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        self.prune(now);
        if self.sent.contains_key(key) {
            return false;
        }
        self.sent.insert(key.to_string(), now);
        true
    }

    pub fn prune(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        self.sent.retain(|_, at| now - *at < window);
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

pub struct AlertDispatcher {
    config: AlertConfig,
    cache: Mutex<AlertCache>,
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertDispatcher {
    pub fn new(config: AlertConfig) -> Self {
        let minutes = i64::try_from(config.dedup_window_minutes).unwrap_or(i64::MAX / 60_000);
        Self {
            cache: Mutex::new(AlertCache::new(Duration::minutes(minutes))),
            config,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Send one alert unless deduplicated; returns whether it went out
    pub async fn dispatch(&self, alert: Alert) -> bool {
        if !self.config.enabled {
            return false;
        }
        if !self.cache.lock().await.admit(&alert.key, alert.raised_at) {
            debug!("Alert {} suppressed within dedup window", alert.key);
            return false;
        }

        for sink in &self.sinks {
            if let Err(e) = sink.send(&alert).await {
                warn!("Alert sink {} failed: {}", sink.name(), e);
            }
        }
        true
    }

    /// Alerts warranted by a verdict
    pub fn alerts_for(&self, verdict: &AggregatedQualityGateResult, run_id: &str) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = verdict
            .gate_results
            .iter()
            .filter(|g| g.critical && g.was_evaluated() && !g.passed)
            .map(|g| {
                let message = match g.status {
                    GateStatus::Error => format!(
                        "Critical gate {} errored: {}",
                        g.gate_name,
                        g.error.as_deref().unwrap_or("unknown error")
                    ),
                    _ => format!(
                        "Critical gate {} failed: {:.1} < {:.1}",
                        g.gate_name, g.score, g.threshold
                    ),
                };
                Alert::new(
                    format!("gate:{}:{}", g.gate_id, g.status),
                    AlertSeverity::Critical,
                    run_id,
                    message,
                )
                .for_gate(g.gate_id.clone())
            })
            .collect();

        if self.config.on_below_minimum {
            if let Some(FailureKind::BelowMinimumScore { score, minimum }) = &verdict.failure {
                alerts.push(Alert::new(
                    "score:below-minimum",
                    AlertSeverity::Warning,
                    run_id,
                    format!("Quality score {score:.1} below minimum {minimum:.1}"),
                ));
            }
        }
        alerts
    }

    /// Dispatch every alert a verdict warrants; returns how many went out
    pub async fn notify(&self, verdict: &AggregatedQualityGateResult, run_id: &str) -> usize {
        let mut sent = 0;
        for alert in self.alerts_for(verdict, run_id) {
            if self.dispatch(alert).await {
                sent += 1;
            }
        }
        if sent > 0 {
            info!("Dispatched {} alerts", sent);
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OverallStatus, QualityGateResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send(&self, _alert: &Alert) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl AlertSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        async fn send(&self, _alert: &Alert) -> Result<()> {
            anyhow::bail!("webhook down")
        }
    }

    fn blocked_verdict() -> AggregatedQualityGateResult {
        AggregatedQualityGateResult {
            status: OverallStatus::Failed,
            passed: false,
            score: 70.0,
            minimum_score: 85.0,
            passed_gates: 1,
            failed_gates: 1,
            error_gates: 0,
            skipped_gates: 0,
            critical_failures: vec!["security".into()],
            failure: Some(FailureKind::BlockedByCriticalGate {
                gates: vec!["security".into()],
            }),
            gate_results: vec![
                QualityGateResult::evaluated("security", "Security", 59.0, 85.0).critical(true),
                QualityGateResult::evaluated("coverage", "Coverage", 84.6, 80.0),
            ],
            recommendations: Vec::new(),
        }
    }

    #[test]
    fn test_cache_window() {
        let mut cache = AlertCache::new(Duration::minutes(15));
        let start = Utc::now();
        assert!(cache.admit("gate:security", start));
        assert!(!cache.admit("gate:security", start + Duration::minutes(14)));
        assert!(cache.admit("gate:coverage", start + Duration::minutes(14)));
        assert!(cache.admit("gate:security", start + Duration::minutes(15)));
    }

    #[tokio::test]
    async fn test_critical_failures_alert_once_per_window() {
        let sink = Arc::new(CountingSink::default());
        let dispatcher = AlertDispatcher::new(AlertConfig::default()).with_sink(sink.clone());
        let verdict = blocked_verdict();

        assert_eq!(dispatcher.notify(&verdict, "run-1").await, 1);
        assert_eq!(dispatcher.notify(&verdict, "run-2").await, 0);
        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatchers_do_not_share_state() {
        let verdict = blocked_verdict();
        let first = AlertDispatcher::new(AlertConfig::default());
        let second = AlertDispatcher::new(AlertConfig::default());
        assert_eq!(first.notify(&verdict, "run-1").await, 1);
        assert_eq!(second.notify(&verdict, "run-1").await, 1);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_others() {
        let sink = Arc::new(CountingSink::default());
        let dispatcher = AlertDispatcher::new(AlertConfig::default())
            .with_sink(Arc::new(BrokenSink))
            .with_sink(sink.clone());

        assert_eq!(dispatcher.notify(&blocked_verdict(), "run-1").await, 1);
        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_dispatcher_sends_nothing() {
        let dispatcher = AlertDispatcher::new(AlertConfig {
            enabled: false,
            ..Default::default()
        });
        assert_eq!(dispatcher.notify(&blocked_verdict(), "run-1").await, 0);
    }

    #[test]
    fn test_below_minimum_alert_is_opt_in() {
        let mut verdict = blocked_verdict();
        verdict.failure = Some(FailureKind::BelowMinimumScore {
            score: 70.0,
            minimum: 85.0,
        });
        verdict.gate_results[0].critical = false;

        let quiet = AlertDispatcher::new(AlertConfig::default());
        assert!(quiet.alerts_for(&verdict, "run-1").is_empty());

        let loud = AlertDispatcher::new(AlertConfig {
            on_below_minimum: true,
            ..Default::default()
        });
        let alerts = loud.alerts_for(&verdict, "run-1");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }
}
