//! Per-command failure bookkeeping.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::commands::{CommandHandler, CommandKey};

/// Bookkeeping for a command with at least one recorded failure.
#[derive(Debug, Clone)]
pub struct BreakerState {
    /// Failures recorded since the last reset.
    pub error_count: u32,

    /// Set while the command is tripped.
    pub tripped_at: Option<DateTime<Utc>>,

    /// Trip this entry belongs to, meaningful only while tripped.
    pub generation: u64,

    original_handler: Option<Arc<CommandHandler>>,
}

impl BreakerState {
    const fn new() -> Self {
        Self {
            error_count: 0,
            tripped_at: None,
            generation: 0,
            original_handler: None,
        }
    }

    /// Whether the command is tripped.
    #[must_use]
    pub const fn is_tripped(&self) -> bool {
        self.tripped_at.is_some()
    }
}

#[derive(Debug, Default)]
struct Entries {
    states: HashMap<CommandKey, BreakerState>,
    last_generation: u64,
}

/// Failure counters and trip records, keyed by command.
///
/// Every operation is a single critical section; the lock is never held
/// across an `.await`.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    entries: Mutex<Entries>,
}

impl BreakerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a failure and returns the new failure count.
    ///
    /// Returns `None` without counting when the command is tripped or has
    /// already reached `threshold` and is about to trip, so the count never
    /// goes past the threshold.
    pub fn record_failure(&self, key: &CommandKey, threshold: u32) -> Option<u32> {
        let mut entries = self.lock();
        let state = entries
            .states
            .entry(key.clone())
            .or_insert_with(BreakerState::new);
        if state.is_tripped() || state.error_count >= threshold {
            return None;
        }
        state.error_count += 1;
        Some(state.error_count)
    }

    /// Whether the command is currently tripped.
    pub fn is_tripped<Q>(&self, key: &Q) -> bool
    where
        CommandKey: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().states.get(key).is_some_and(BreakerState::is_tripped)
    }

    /// Removes the command's entry. Returns whether one existed.
    pub fn clear<Q>(&self, key: &Q) -> bool
    where
        CommandKey: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().states.remove(key).is_some()
    }

    /// Marks the command tripped and stores its original handler.
    ///
    /// Returns the generation of the new trip, or `None` when the command
    /// has no entry or is already tripped.
    pub fn mark_tripped(
        &self,
        key: &CommandKey,
        original: Arc<CommandHandler>,
        now: DateTime<Utc>,
    ) -> Option<u64> {
        let mut entries = self.lock();
        let Entries {
            states,
            last_generation,
        } = &mut *entries;

        let state = states.get_mut(key).filter(|state| !state.is_tripped())?;
        *last_generation += 1;
        state.tripped_at = Some(now);
        state.generation = *last_generation;
        state.original_handler = Some(original);
        Some(*last_generation)
    }

    /// Ends the trip `generation` of the command, removing its entry and
    /// returning the original handler.
    ///
    /// Returns `None` without touching anything when the command is not
    /// tripped under that generation.
    pub fn finish_trip(&self, key: &CommandKey, generation: u64) -> Option<Arc<CommandHandler>> {
        let mut entries = self.lock();
        let current = entries
            .states
            .get(key)
            .is_some_and(|state| state.is_tripped() && state.generation == generation);
        if !current {
            return None;
        }
        entries
            .states
            .remove(key)
            .and_then(|state| state.original_handler)
    }

    /// Ends whatever trip the command is in, removing its entry.
    ///
    /// Returns the original handler if the command was tripped. An untripped
    /// entry is removed as well, which zeroes its failure count.
    pub fn release(&self, key: &CommandKey) -> Option<Arc<CommandHandler>> {
        self.lock()
            .states
            .remove(key)
            .and_then(|state| state.original_handler)
    }

    /// Failures recorded for the command, 0 when it has no entry.
    pub fn error_count<Q>(&self, key: &Q) -> u32
    where
        CommandKey: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().states.get(key).map_or(0, |state| state.error_count)
    }

    /// When the command tripped, if it is tripped.
    pub fn tripped_at<Q>(&self, key: &Q) -> Option<DateTime<Utc>>
    where
        CommandKey: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().states.get(key).and_then(|state| state.tripped_at)
    }

    /// Whether the command has an entry.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        CommandKey: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().states.contains_key(key)
    }

    /// Copy of the command's entry.
    pub fn snapshot<Q>(&self, key: &Q) -> Option<BreakerState>
    where
        CommandKey: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().states.get(key).cloned()
    }

    /// Keys of all tripped commands, sorted.
    #[must_use]
    pub fn tripped_keys(&self) -> Vec<CommandKey> {
        let mut keys: Vec<_> = self
            .lock()
            .states
            .iter()
            .filter(|(_, state)| state.is_tripped())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Most recent trip time across all tripped commands.
    #[must_use]
    pub fn latest_trip(&self) -> Option<DateTime<Utc>> {
        self.lock()
            .states
            .values()
            .filter_map(|state| state.tripped_at)
            .max()
    }

    /// Number of commands with an entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().states.len()
    }

    /// Whether no command has an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
