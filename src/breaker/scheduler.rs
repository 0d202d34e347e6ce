//! Delayed reset of tripped commands.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::swapper::HandlerSwapper;
use crate::commands::Command;

/// Arms one reset timer per trip.
///
/// Timers are detached tasks and cannot be cancelled; a timer that outlives
/// its trip is discarded by the generation check in
/// [`HandlerSwapper::reset`].
#[derive(Debug, Clone, Copy)]
pub struct ResetScheduler {
    reset_after: Duration,
}

impl ResetScheduler {
    #[must_use]
    pub const fn new(reset_after: Duration) -> Self {
        Self { reset_after }
    }

    #[must_use]
    pub const fn reset_after(&self) -> Duration {
        self.reset_after
    }

    /// Spawns the reset of trip `generation` after `reset_after`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(
        &self,
        swapper: HandlerSwapper,
        command: Arc<Command>,
        generation: u64,
    ) -> JoinHandle<bool> {
        let delay = self.reset_after;
        debug!(
            "Reset of {} armed for {:?} (generation {})",
            command.key(),
            delay,
            generation
        );

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            swapper.reset(&command, generation)
        })
    }
}
