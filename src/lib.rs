//! Command Breaker Library
//!
//! A per-command circuit breaker for chat bot command dispatch.
//!
//! This crate provides:
//! - A command tree whose commands dispatch through replaceable handler slots
//! - Error surfaces that report failed commands to ordered observers
//! - A breaker that counts failures per command, swaps in a fallback once a
//!   threshold is reached and restores the original handler after a cooldown
//! - Breaker settings loaded from the environment or a JSON file

pub mod breaker;
pub mod commands;
pub mod config;

pub use breaker::{Breaker, UnsupportedInvocation};
pub use config::{BreakerSettings, ConfigError};
