//! Command dispatch host.
//!
//! Registers commands, runs their live handlers and reports failures to
//! the error surfaces. Each command dispatches through a replaceable
//! handler slot.

mod handler;
mod observer;
mod tree;
mod types;

pub use handler::{Callback, CommandHandler, HandlerSlot, TripCallback};
pub use observer::{ErrorChain, ErrorObserver, FailureContext, Surface, report_unhandled};
pub use tree::{Command, CommandError, CommandTree};
pub use types::{
    Argument, CallArgs, CommandKey, CommandKind, HybridContext, Interaction, Parameter, ReplyKind,
};

#[cfg(test)]
pub(crate) use observer::testing;
