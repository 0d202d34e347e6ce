//! Swaps a tripped command's handler for the fallback and back.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::registry::BreakerRegistry;
use crate::commands::{CallArgs, Callback, Command, CommandHandler, CommandKey, TripCallback};

/// The fallback handler was called without an interaction to hand to the
/// trip callback, e.g. a hybrid command invoked through a text message.
#[derive(Debug, Clone, Error)]
#[error("Command {command} is tripped and was invoked without an interaction")]
pub struct UnsupportedInvocation {
    /// The tripped command that was invoked.
    pub command: CommandKey,
}

/// A completed trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripTicket {
    /// Identifies this trip; a reset for any other generation is stale.
    pub generation: u64,

    /// When the fallback was installed.
    pub tripped_at: DateTime<Utc>,
}

/// Installs and removes fallback handlers.
#[derive(Debug, Clone)]
pub struct HandlerSwapper {
    registry: Arc<BreakerRegistry>,
    trip_callback: Arc<ArcSwapOption<TripCallback>>,
}

impl HandlerSwapper {
    /// Creates a swapper over `registry`. The fallback reads `trip_callback`
    /// on every call, so it may be set or changed while commands are tripped.
    #[must_use]
    pub const fn new(
        registry: Arc<BreakerRegistry>,
        trip_callback: Arc<ArcSwapOption<TripCallback>>,
    ) -> Self {
        Self {
            registry,
            trip_callback,
        }
    }

    /// Trips the command: records the live handler as the original and
    /// installs the fallback.
    ///
    /// Returns `None` when the command has no failures recorded or is
    /// already tripped.
    pub fn trip(&self, command: &Command) -> Option<TripTicket> {
        let key = command.key();
        let tripped_at = Utc::now();
        let original = command.handler().load();

        let generation = self.registry.mark_tripped(key, original, tripped_at)?;
        command
            .handler()
            .store(Arc::new(self.fallback_for(key.clone())));

        warn!("Breaker tripped for {}", key);
        if self.trip_callback.load().is_none() {
            warn!(
                "No trip callback set; {} will do nothing until the breaker resets",
                key
            );
        }

        Some(TripTicket {
            generation,
            tripped_at,
        })
    }

    /// Restores the original handler if trip `generation` is still current.
    ///
    /// Returns whether the handler was restored.
    pub fn reset(&self, command: &Command, generation: u64) -> bool {
        let key = command.key();
        let Some(original) = self.registry.finish_trip(key, generation) else {
            debug!(
                "Discarding stale reset for {} (generation {})",
                key, generation
            );
            return false;
        };

        command.handler().store(original);
        info!("Breaker reset for {}", key);
        true
    }

    /// Restores the original handler regardless of generation and forgets
    /// the command's failures.
    ///
    /// Returns whether the command was tripped.
    pub fn reset_now(&self, command: &Command) -> bool {
        let key = command.key();
        match self.registry.release(key) {
            Some(original) => {
                command.handler().store(original);
                info!("Breaker manually reset for {}", key);
                true
            }
            None => false,
        }
    }

    fn fallback_for(&self, key: CommandKey) -> CommandHandler {
        let trip_callback = Arc::clone(&self.trip_callback);

        Callback::from_async(move |args: CallArgs| {
            let trip_callback = Arc::clone(&trip_callback);
            let key = key.clone();

            async move {
                let Some(interaction) = args.find_interaction().cloned() else {
                    return Err(anyhow::Error::from(UnsupportedInvocation { command: key }));
                };

                match trip_callback.load_full() {
                    Some(callback) => callback.call(interaction).await,
                    None => {
                        warn!("{} invoked while tripped, no trip callback set", key);
                        Ok(())
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::commands::{HybridContext, Interaction};

    fn swapper(callback: Option<TripCallback>) -> HandlerSwapper {
        HandlerSwapper::new(
            Arc::new(BreakerRegistry::new()),
            Arc::new(ArcSwapOption::from(callback.map(Arc::new))),
        )
    }

    fn counting_command(calls: &Arc<AtomicUsize>) -> Command {
        let calls = Arc::clone(calls);
        Command::hybrid(
            "test",
            "",
            Callback::from_async(move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
    }

    fn slash(id: u64) -> CallArgs {
        let interaction = Interaction::new(id, "alice");
        CallArgs::for_context(HybridContext::from_interaction("test", interaction))
    }

    #[tokio::test]
    async fn test_trip_requires_recorded_failure() {
        let swapper = swapper(None);
        let command = counting_command(&Arc::new(AtomicUsize::new(0)));
        assert!(swapper.trip(&command).is_none());
    }

    #[tokio::test]
    async fn test_fallback_calls_trip_callback_not_original() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_by_callback = Arc::clone(&seen);
        let callback = TripCallback::from_async(move |interaction: Interaction| {
            let seen = Arc::clone(&seen_by_callback);
            async move {
                seen.store(usize::try_from(interaction.id).unwrap_or_default(), Ordering::SeqCst);
                Ok(())
            }
        });

        let swapper = swapper(Some(callback));
        let calls = Arc::new(AtomicUsize::new(0));
        let command = counting_command(&calls);

        swapper.registry.record_failure(command.key(), 1);
        assert!(swapper.trip(&command).is_some());

        command.invoke(slash(42)).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_without_callback_is_noop() {
        let swapper = swapper(None);
        let calls = Arc::new(AtomicUsize::new(0));
        let command = counting_command(&calls);

        swapper.registry.record_failure(command.key(), 1);
        swapper.trip(&command).unwrap();

        assert!(command.invoke(slash(1)).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_rejects_text_invocation() {
        let swapper = swapper(None);
        let command = counting_command(&Arc::new(AtomicUsize::new(0)));

        swapper.registry.record_failure(command.key(), 1);
        swapper.trip(&command).unwrap();

        let text = CallArgs::for_context(HybridContext::from_text("test", "bob", "!test"));
        let error = command.invoke(text).await.unwrap_err();
        let unsupported = error
            .handler_error()
            .and_then(|e| e.downcast_ref::<UnsupportedInvocation>())
            .unwrap();
        assert_eq!(unsupported.command, CommandKey::new("test"));
    }

    #[tokio::test]
    async fn test_fallback_handles_bound_receiver() {
        let swapper = swapper(None);
        let command = counting_command(&Arc::new(AtomicUsize::new(0)));

        swapper.registry.record_failure(command.key(), 1);
        swapper.trip(&command).unwrap();

        let mut args = slash(5);
        args.receiver = Some("admin_group".to_owned());
        assert!(command.invoke(args).await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_restores_original_once() {
        let swapper = swapper(None);
        let calls = Arc::new(AtomicUsize::new(0));
        let command = counting_command(&calls);
        let original = command.handler().load();

        swapper.registry.record_failure(command.key(), 1);
        let ticket = swapper.trip(&command).unwrap();
        assert!(!command.handler().is_active(&original));

        assert!(!swapper.reset(&command, ticket.generation + 1));
        assert!(swapper.reset(&command, ticket.generation));
        assert!(command.handler().is_active(&original));
        assert!(!swapper.registry.contains("test"));
        assert!(!swapper.reset(&command, ticket.generation));

        command.invoke(slash(1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_now_ignores_generation() {
        let swapper = swapper(None);
        let command = counting_command(&Arc::new(AtomicUsize::new(0)));
        let original = command.handler().load();

        assert!(!swapper.reset_now(&command));

        swapper.registry.record_failure(command.key(), 1);
        swapper.trip(&command).unwrap();
        assert!(swapper.reset_now(&command));
        assert!(command.handler().is_active(&original));
    }
}
