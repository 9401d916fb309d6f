//! Timing helpers
//!
//! `Timer` measures a single attempt; `Stopwatch` records pipeline phases.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Measures elapsed time for one labelled operation
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Stop and log the elapsed time at debug level
    pub fn stop(self) -> u64 {
        let ms = self.elapsed_ms();
        tracing::debug!("{} took {}ms", self.label, ms);
        ms
    }
}

/// Lap timer for named phases
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    last: Instant,
    laps: Vec<(String, Duration)>,
}

impl Stopwatch {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            laps: Vec::new(),
        }
    }

    /// Close the current phase under `label`
    pub fn lap(&mut self, label: impl Into<String>) {
        let now = Instant::now();
        self.laps.push((label.into(), now - self.last));
        self.last = now;
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn laps(&self) -> &[(String, Duration)] {
        &self.laps
    }

    /// Phase durations in milliseconds, keyed by label
    pub fn phase_ms(&self) -> BTreeMap<String, u64> {
        self.laps
            .iter()
            .map(|(label, d)| (label.clone(), d.as_millis() as u64))
            .collect()
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}
