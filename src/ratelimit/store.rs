//! Per-identity window storage.
//!
//! The store owns every [`CounterWindow`]. It is sharded so that identities
//! hashing to different shards never contend, while all windows of a single
//! identity are mutated under one shard lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::trace;

use super::counter::{CounterWindow, TimeWindow};
use super::identity::ClientIdentity;
use crate::error::{GatekeeperError, Result};

/// The minute and day windows of one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityWindows {
    minute: Option<CounterWindow>,
    day: Option<CounterWindow>,
}

impl IdentityWindows {
    /// The window for the given granularity, if one was ever opened.
    pub fn get(&self, window: TimeWindow) -> Option<&CounterWindow> {
        match window {
            TimeWindow::Minute => self.minute.as_ref(),
            TimeWindow::Day => self.day.as_ref(),
        }
    }

    /// The window for the given granularity if it is still open at `now`.
    pub fn active(&self, window: TimeWindow, now: DateTime<Utc>) -> Option<&CounterWindow> {
        self.get(window).filter(|w| !w.is_expired(now))
    }

    fn slot_mut(&mut self, window: TimeWindow) -> &mut Option<CounterWindow> {
        match window {
            TimeWindow::Minute => &mut self.minute,
            TimeWindow::Day => &mut self.day,
        }
    }

    /// Return the open window, replacing a missing or expired one with a
    /// fresh window limited to `max`.
    pub fn refresh(&mut self, window: TimeWindow, now: DateTime<Utc>, max: u64) -> &mut CounterWindow {
        let slot = self.slot_mut(window);
        if slot.as_ref().is_some_and(|w| w.is_expired(now)) {
            trace!(window = %window, "Window elapsed, opening a new one");
            *slot = None;
        }
        slot.get_or_insert_with(|| CounterWindow::open(window, now, max))
    }

    /// Count one admitted request in every open window.
    pub fn increment_all(&mut self) {
        for window in TimeWindow::ALL {
            if let Some(counter) = self.slot_mut(window) {
                counter.increment();
            }
        }
    }

    /// True when no window is open at `now`.
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        TimeWindow::ALL
            .iter()
            .all(|window| self.active(*window, now).is_none())
    }
}

/// Sharded map from identity to its windows.
pub struct WindowStore {
    windows: DashMap<ClientIdentity, IdentityWindows>,
}

impl WindowStore {
    /// Default number of shards.
    pub const DEFAULT_SHARDS: usize = 64;

    /// Create a store with the default shard count.
    pub fn new() -> Self {
        Self {
            windows: DashMap::with_shard_amount(Self::DEFAULT_SHARDS),
        }
    }

    /// Create a store with an explicit shard count.
    ///
    /// The count must be a power of two greater than one.
    pub fn with_shards(shards: usize) -> Result<Self> {
        if shards < 2 || !shards.is_power_of_two() {
            return Err(GatekeeperError::InvalidConfiguration(format!(
                "shard count must be a power of two greater than one, got {}",
                shards
            )));
        }
        Ok(Self {
            windows: DashMap::with_shard_amount(shards),
        })
    }

    /// Run `f` against an identity's windows while holding its shard lock.
    ///
    /// The entry is created on first use. No other call for the same
    /// identity can observe or mutate the windows until `f` returns.
    pub fn with_identity<R>(
        &self,
        identity: &ClientIdentity,
        f: impl FnOnce(&mut IdentityWindows) -> R,
    ) -> R {
        if let Some(mut entry) = self.windows.get_mut(identity) {
            return f(entry.value_mut());
        }
        let mut entry = self.windows.entry(identity.clone()).or_default();
        f(entry.value_mut())
    }

    /// A copy of an identity's windows, read under the shard read lock.
    pub fn snapshot(&self, identity: &ClientIdentity) -> Option<IdentityWindows> {
        self.windows.get(identity).map(|entry| entry.value().clone())
    }

    /// Drop identities with no open window. Returns how many were removed.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        self.windows.retain(|_, windows| {
            let idle = windows.is_idle(now);
            if idle {
                evicted += 1;
            }
            !idle
        });
        evicted
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Remove all identities.
    pub fn clear(&self) {
        self.windows.clear();
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new()
    }
}
