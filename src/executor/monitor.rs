//! Resource usage signal for load balancing
//!
//! Polled synchronously between batches; never pushed.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use sysinfo::{CpuExt, System, SystemExt};

/// Point-in-time usage, percentages in [0, 100]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

pub trait ResourceMonitor: Send + Sync {
    fn snapshot(&self) -> Result<ResourceSnapshot>;
}

/// Usage ceilings above which a batch runs at half concurrency
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancingConfig {
    pub enabled: bool,
    pub cpu_ceiling: f64,
    pub memory_ceiling: f64,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_ceiling: 85.0,
            memory_ceiling: 90.0,
        }
    }
}

impl LoadBalancingConfig {
    pub fn is_overloaded(&self, snapshot: &ResourceSnapshot) -> bool {
        snapshot.cpu_percent > self.cpu_ceiling || snapshot.memory_percent > self.memory_ceiling
    }

    /// Concurrency to use for the next batch given a usage reading
    pub fn effective_concurrency(&self, max: usize, snapshot: Option<&ResourceSnapshot>) -> usize {
        match snapshot {
            Some(s) if self.enabled && self.is_overloaded(s) => (max / 2).max(1),
            _ => max.max(1),
        }
    }
}

/// Host CPU and memory via sysinfo
pub struct SystemResourceMonitor {
    system: Mutex<System>,
}

impl SystemResourceMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor for SystemResourceMonitor {
    fn snapshot(&self) -> Result<ResourceSnapshot> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| anyhow!("resource monitor lock poisoned"))?;
        system.refresh_cpu();
        system.refresh_memory();

        let total = system.total_memory();
        let memory_percent = if total > 0 {
            system.used_memory() as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Ok(ResourceSnapshot {
            cpu_percent: system.global_cpu_info().cpu_usage() as f64,
            memory_percent,
        })
    }
}

/// Replays a fixed sequence of readings, repeating the last one
pub struct FixedResourceMonitor {
    readings: Mutex<Vec<ResourceSnapshot>>,
}

impl FixedResourceMonitor {
    pub fn new(readings: Vec<ResourceSnapshot>) -> Self {
        Self {
            readings: Mutex::new(readings),
        }
    }
}

impl ResourceMonitor for FixedResourceMonitor {
    fn snapshot(&self) -> Result<ResourceSnapshot> {
        let mut readings = self
            .readings
            .lock()
            .map_err(|_| anyhow!("resource monitor lock poisoned"))?;
        match readings.len() {
            0 => Err(anyhow!("no resource readings available")),
            1 => Ok(readings[0]),
            _ => Ok(readings.remove(0)),
        }
    }
}
