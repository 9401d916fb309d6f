//! Utility functions and helpers

pub mod logger;
pub mod timer;
