//! Environment provisioning contract
//!
//! `EnvironmentScope` guarantees teardown: on the normal path it is awaited,
//! and if the scope is dropped early (panic, task abort) teardown is spawned
//! onto the runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ExecutionError;
use crate::models::EnvironmentRequirements;

/// Opaque reference to a provisioned environment
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    pub id: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl EnvironmentHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            details: BTreeMap::new(),
        }
    }
}

#[async_trait]
pub trait EnvironmentProvisioner: Send + Sync {
    async fn setup(
        &self,
        requirements: &EnvironmentRequirements,
    ) -> Result<EnvironmentHandle, ExecutionError>;

    async fn teardown(&self, handle: EnvironmentHandle) -> Result<(), ExecutionError>;
}

/// Exports suite variables into the process and removes them on teardown
#[derive(Debug, Default)]
pub struct LocalProvisioner;

#[async_trait]
impl EnvironmentProvisioner for LocalProvisioner {
    async fn setup(
        &self,
        requirements: &EnvironmentRequirements,
    ) -> Result<EnvironmentHandle, ExecutionError> {
        let mut handle = EnvironmentHandle::new("local");
        for (key, value) in &requirements.variables {
            std::env::set_var(key, value);
            handle.details.insert(key.clone(), value.clone());
        }
        if !requirements.services.is_empty() {
            debug!(
                "Local provisioner does not start services: {}",
                requirements.services.join(", ")
            );
        }
        Ok(handle)
    }

    async fn teardown(&self, handle: EnvironmentHandle) -> Result<(), ExecutionError> {
        for key in handle.details.keys() {
            std::env::remove_var(key);
        }
        Ok(())
    }
}

/// Disarmed on the normal path; otherwise spawns teardown from `Drop`
struct TeardownGuard {
    provisioner: Arc<dyn EnvironmentProvisioner>,
    handle: Option<EnvironmentHandle>,
}

impl TeardownGuard {
    fn take(&mut self) -> Option<EnvironmentHandle> {
        self.handle.take()
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        warn!("Environment {} left early, tearing down", handle.id);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let provisioner = self.provisioner.clone();
                runtime.spawn(async move {
                    if let Err(e) = provisioner.teardown(handle).await {
                        warn!("Environment teardown failed: {}", e);
                    }
                });
            }
            Err(_) => warn!("No runtime available, environment {} leaked", handle.id),
        }
    }
}

/// Setup/teardown around a unit of work
#[derive(Clone)]
pub struct EnvironmentScope {
    provisioner: Arc<dyn EnvironmentProvisioner>,
}

impl EnvironmentScope {
    pub fn new(provisioner: Arc<dyn EnvironmentProvisioner>) -> Self {
        Self { provisioner }
    }

    /// Provision, run `work`, tear down
    ///
    /// A setup failure is returned without running `work`. Teardown failures
    /// are logged and do not change the result.
    pub async fn run<F, T>(
        &self,
        requirements: &EnvironmentRequirements,
        work: F,
    ) -> Result<T, ExecutionError>
    where
        F: Future<Output = T>,
    {
        let handle = self.provisioner.setup(requirements).await?;
        info!("Environment {} ready", handle.id);

        let mut guard = TeardownGuard {
            provisioner: self.provisioner.clone(),
            handle: Some(handle),
        };

        let output = work.await;

        if let Some(handle) = guard.take() {
            let id = handle.id.clone();
            match self.provisioner.teardown(handle).await {
                Ok(()) => debug!("Environment {} torn down", id),
                Err(e) => warn!("Environment teardown failed: {}", e),
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingProvisioner {
        fail_setup: bool,
        setups: AtomicUsize,
        teardowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EnvironmentProvisioner for CountingProvisioner {
        async fn setup(
            &self,
            _requirements: &EnvironmentRequirements,
        ) -> Result<EnvironmentHandle, ExecutionError> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            if self.fail_setup {
                return Err(ExecutionError::Infrastructure("cluster unavailable".into()));
            }
            Ok(EnvironmentHandle::new("env-1"))
        }

        async fn teardown(&self, _handle: EnvironmentHandle) -> Result<(), ExecutionError> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_teardown_after_work() {
        let provisioner = Arc::new(CountingProvisioner::default());
        let scope = EnvironmentScope::new(provisioner.clone());

        let value = scope
            .run(&EnvironmentRequirements::default(), async { 42 })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(provisioner.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_setup_failure_skips_work() {
        let provisioner = Arc::new(CountingProvisioner {
            fail_setup: true,
            ..Default::default()
        });
        let scope = EnvironmentScope::new(provisioner.clone());

        let mut ran = false;
        let result = scope
            .run(&EnvironmentRequirements::default(), async { ran = true })
            .await;
        assert!(result.is_err());
        assert!(!ran);
        assert_eq!(provisioner.teardowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_teardown_when_scope_is_aborted() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let provisioner = Arc::new(CountingProvisioner {
            teardowns: teardowns.clone(),
            ..Default::default()
        });
        let scope = EnvironmentScope::new(provisioner);

        let task = tokio::spawn(async move {
            scope
                .run(&EnvironmentRequirements::default(), async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.abort();
        let _ = task.await;

        for _ in 0..50 {
            if teardowns.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_provisioner_exports_variables() {
        let mut requirements = EnvironmentRequirements::default();
        requirements
            .variables
            .insert("TESTGATE_LOCAL_PROVISIONER_PROBE".into(), "1".into());

        let scope = EnvironmentScope::new(Arc::new(LocalProvisioner));
        let seen = scope
            .run(&requirements, async {
                std::env::var("TESTGATE_LOCAL_PROVISIONER_PROBE").ok()
            })
            .await
            .unwrap();
        assert_eq!(seen.as_deref(), Some("1"));
        assert!(std::env::var("TESTGATE_LOCAL_PROVISIONER_PROBE").is_err());
    }
}
