//! Observer that counts command failures and trips breakers.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use super::instance::BreakerCore;
use crate::commands::{CommandError, ErrorObserver, FailureContext, report_unhandled};

/// What the hook did with one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The failure could not be tied to a command.
    Unresolved,
    /// The command is already tripped; nothing was counted.
    Suppressed,
    /// The failure was counted, the threshold is not reached yet.
    Counted(u32),
    /// The failure tripped the command under this generation.
    Tripped(u64),
}

/// Error observer installed by the breaker in place of a surface's existing
/// observers, which it calls after its own bookkeeping. With no observers
/// to call, the failure goes to the host's unhandled-error log.
pub struct ErrorDispatchHook {
    core: Arc<BreakerCore>,
    previous: Vec<Arc<dyn ErrorObserver>>,
}

impl ErrorDispatchHook {
    #[must_use]
    pub fn new(core: Arc<BreakerCore>, previous: Vec<Arc<dyn ErrorObserver>>) -> Self {
        Self { core, previous }
    }

    /// Observers this hook forwards to.
    #[must_use]
    pub fn previous(&self) -> &[Arc<dyn ErrorObserver>] {
        &self.previous
    }

    /// Counts the failure and trips the command once it reaches the
    /// threshold. Never suspends.
    pub fn record(&self, ctx: &FailureContext) -> FailureOutcome {
        let Some(command) = ctx.command.as_ref() else {
            debug!("Failure on {} surface without a command", ctx.surface);
            return FailureOutcome::Unresolved;
        };

        let key = command.key();
        let threshold = self.core.settings().threshold;
        let Some(count) = self.core.registry().record_failure(key, threshold) else {
            debug!("{} failed while tripped or tripping, not counting", key);
            return FailureOutcome::Suppressed;
        };

        debug!("{} failure {}/{}", key, count, threshold);
        if count < threshold {
            return FailureOutcome::Counted(count);
        }

        self.core
            .trip(command)
            .map_or(FailureOutcome::Suppressed, FailureOutcome::Tripped)
    }
}

impl ErrorObserver for ErrorDispatchHook {
    fn on_error<'a>(
        &'a self,
        ctx: &'a FailureContext,
        error: &'a CommandError,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.record(ctx);

            if self.previous.is_empty() {
                report_unhandled(ctx.surface, error);
                return;
            }
            for observer in &self.previous {
                observer.on_error(ctx, error).await;
            }
        })
    }
}

impl std::fmt::Debug for ErrorDispatchHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorDispatchHook")
            .field("previous", &self.previous.len())
            .finish_non_exhaustive()
    }
}
