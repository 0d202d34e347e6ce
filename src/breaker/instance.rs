//! The breaker façade and its shared state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use tracing::info;

use super::hook::ErrorDispatchHook;
use super::registry::{BreakerRegistry, BreakerState};
use super::scheduler::ResetScheduler;
use super::swapper::HandlerSwapper;
use crate::commands::{Command, CommandKey, CommandTree, Interaction, Surface, TripCallback};
use crate::config::{BreakerSettings, ConfigError, ResetAfter, format_duration};

/// State shared by the breaker handle and its installed hooks.
#[derive(Debug)]
pub struct BreakerCore {
    settings: BreakerSettings,
    registry: Arc<BreakerRegistry>,
    trip_callback: Arc<ArcSwapOption<TripCallback>>,
    swapper: HandlerSwapper,
    scheduler: ResetScheduler,
}

impl BreakerCore {
    /// Builds the core. `settings` and `trip_callback` are expected to be
    /// validated already.
    #[must_use]
    pub fn new(settings: BreakerSettings, trip_callback: Option<TripCallback>) -> Self {
        let registry = Arc::new(BreakerRegistry::new());
        let trip_callback = Arc::new(ArcSwapOption::from(trip_callback.map(Arc::new)));
        let swapper = HandlerSwapper::new(Arc::clone(&registry), Arc::clone(&trip_callback));
        let scheduler = ResetScheduler::new(settings.reset_after);

        Self {
            settings,
            registry,
            trip_callback,
            swapper,
            scheduler,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    #[must_use]
    pub fn registry(&self) -> &BreakerRegistry {
        &self.registry
    }

    /// Trips the command and arms its reset. Returns the trip generation.
    pub fn trip(&self, command: &Arc<Command>) -> Option<u64> {
        let ticket = self.swapper.trip(command)?;
        self.scheduler
            .arm(self.swapper.clone(), Arc::clone(command), ticket.generation);
        Some(ticket.generation)
    }
}

/// Per-command circuit breaker for a [`CommandTree`].
///
/// Counts consecutive failures of every command. When a command reaches the
/// threshold its handler is replaced by a fallback that runs the trip
/// callback, and the original handler comes back after `reset_after`.
///
/// Cloning yields another handle to the same breaker.
#[derive(Debug, Clone)]
pub struct Breaker {
    core: Arc<BreakerCore>,
    tree: Arc<CommandTree>,
}

impl Breaker {
    /// Starts configuring a breaker for `tree`.
    #[must_use]
    pub fn builder(tree: &Arc<CommandTree>) -> BreakerBuilder {
        BreakerBuilder {
            tree: Arc::clone(tree),
            settings: BreakerSettings::default(),
            trip_callback: None,
        }
    }

    /// Installs a breaker with `settings` and no trip callback.
    pub fn install(tree: &Arc<CommandTree>, settings: BreakerSettings) -> Result<Self, ConfigError> {
        Self::builder(tree).settings(settings).install()
    }

    /// Sets the trip callback and returns it unchanged.
    ///
    /// The callback runs while the failing dependency may still be down, so
    /// it should only reply to the interaction.
    pub fn set_trip_callback(&self, callback: TripCallback) -> Result<TripCallback, ConfigError> {
        if !callback.is_async() {
            return Err(ConfigError::BlockingTripCallback);
        }
        self.core
            .trip_callback
            .store(Some(Arc::new(callback.clone())));
        Ok(callback)
    }

    /// Sets an async function as the trip callback.
    pub fn on_tripped_call<F, Fut>(&self, f: F) -> TripCallback
    where
        F: Fn(Interaction) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback = TripCallback::from_async(f);
        self.core
            .trip_callback
            .store(Some(Arc::new(callback.clone())));
        callback
    }

    /// Removes the trip callback. Tripped commands then do nothing.
    pub fn clear_trip_callback(&self) {
        self.core.trip_callback.store(None);
    }

    /// Whether a trip callback is set.
    #[must_use]
    pub fn has_trip_callback(&self) -> bool {
        self.core.trip_callback.load().is_some()
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.core.settings.threshold
    }

    #[must_use]
    pub fn reset_after(&self) -> Duration {
        self.core.settings.reset_after
    }

    #[must_use]
    pub fn hybrid_support(&self) -> bool {
        self.core.settings.hybrid_support
    }

    /// When the most recent still-active trip happened.
    #[must_use]
    pub fn tripped_at(&self) -> Option<DateTime<Utc>> {
        self.core.registry.latest_trip()
    }

    /// When the command tripped, if it is tripped.
    #[must_use]
    pub fn tripped_since(&self, name: &str) -> Option<DateTime<Utc>> {
        self.core.registry.tripped_at(name)
    }

    #[must_use]
    pub fn is_tripped(&self, name: &str) -> bool {
        self.core.registry.is_tripped(name)
    }

    /// Failures recorded for the command since its last reset.
    #[must_use]
    pub fn error_count(&self, name: &str) -> u32 {
        self.core.registry.error_count(name)
    }

    /// Copy of the command's bookkeeping, if it has any.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<BreakerState> {
        self.core.registry.snapshot(name)
    }

    /// Keys of all tripped commands.
    #[must_use]
    pub fn tripped_commands(&self) -> Vec<CommandKey> {
        self.core.registry.tripped_keys()
    }

    /// Closes the command's breaker immediately and forgets its failures.
    ///
    /// The pending reset timer stays armed and is discarded when it fires.
    /// Returns whether the command was tripped.
    pub fn reset_now(&self, name: &str) -> bool {
        let Some(command) = self.tree.get(name) else {
            self.core.registry.clear(name);
            return false;
        };
        self.core.swapper.reset_now(&command)
    }
}

/// Builder for [`Breaker`].
#[derive(Debug)]
pub struct BreakerBuilder {
    tree: Arc<CommandTree>,
    settings: BreakerSettings,
    trip_callback: Option<TripCallback>,
}

impl BreakerBuilder {
    /// Failures that trip a command. Must be greater than 0.
    #[must_use]
    pub const fn threshold(mut self, threshold: u32) -> Self {
        self.settings.threshold = threshold;
        self
    }

    /// Cooldown before a tripped command is restored. Integers are minutes.
    #[must_use]
    pub fn reset_after(mut self, reset_after: impl Into<ResetAfter>) -> Self {
        self.settings.set_reset_after(reset_after);
        self
    }

    /// Whether to also watch hybrid command failures.
    #[must_use]
    pub const fn hybrid_support(mut self, enabled: bool) -> Self {
        self.settings.hybrid_support = enabled;
        self
    }

    /// Replaces all settings at once.
    #[must_use]
    pub fn settings(mut self, settings: BreakerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the trip callback, rejecting blocking callables.
    pub fn trip_callback(mut self, callback: TripCallback) -> Result<Self, ConfigError> {
        if !callback.is_async() {
            return Err(ConfigError::BlockingTripCallback);
        }
        self.trip_callback = Some(callback);
        Ok(self)
    }

    /// Validates the settings and hooks the breaker into the tree's error
    /// surfaces.
    pub fn install(self) -> Result<Breaker, ConfigError> {
        self.settings.validate()?;

        let core = Arc::new(BreakerCore::new(self.settings, self.trip_callback));

        let mut surfaces = vec![Surface::Application];
        if core.settings.hybrid_support {
            surfaces.push(Surface::Hybrid);
        }
        for surface in surfaces {
            let hook_core = Arc::clone(&core);
            self.tree
                .error_chain(surface)
                .take_over(|previous| Arc::new(ErrorDispatchHook::new(hook_core, previous)));
        }

        info!(
            "Breaker installed (threshold: {}, reset after: {}, hybrid: {})",
            core.settings.threshold,
            format_duration(core.settings.reset_after),
            core.settings.hybrid_support
        );

        Ok(Breaker {
            core,
            tree: self.tree,
        })
    }
}
