//! Configuration module for the breaker.
//!
//! Handles loading and validation of breaker settings from environment
//! variables, JSON files and command line overrides.

mod settings;

pub use settings::{BreakerSettings, ConfigError, ResetAfter, format_duration};

/// Consecutive failures that trip a command unless configured otherwise.
pub const DEFAULT_THRESHOLD: u32 = 3;

/// Minutes a tripped command stays tripped unless configured otherwise.
pub const DEFAULT_RESET_AFTER_MINUTES: u64 = 1;
