//! Shared execution context and cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::runner::AttemptRunner;

/// Cooperative cancellation flag shared across tasks
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Everything a strategy needs besides the plan
#[derive(Clone)]
pub struct ExecutionContext {
    pub runner: AttemptRunner,
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new(runner: AttemptRunner) -> Self {
        Self {
            runner,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
