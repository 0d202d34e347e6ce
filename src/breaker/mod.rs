//! Per-command circuit breaker.
//!
//! Counts consecutive failures reported through the command tree's error
//! surfaces. A command that reaches the threshold has its handler replaced
//! by a fallback running the trip callback, and gets it back after the
//! configured cooldown.

mod hook;
mod instance;
mod registry;
mod scheduler;
mod swapper;

pub use hook::{ErrorDispatchHook, FailureOutcome};
pub use instance::{Breaker, BreakerBuilder, BreakerCore};
pub use registry::{BreakerRegistry, BreakerState};
pub use scheduler::ResetScheduler;
pub use swapper::{HandlerSwapper, TripTicket, UnsupportedInvocation};
