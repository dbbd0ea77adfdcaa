//! Backend call statistics.
//!
//! Counters for every collaborator entry point, used to check round-trip
//! behavior (a no-op commit saves nothing, a bulk load is one batch).
//!
//! # Usage
//!
//! ```rust
//! use domstore_storage::{ClassId, InMemoryBackend, PersistenceBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.load_class(&ClassId::new("Order")).unwrap();
//!
//! let stats = backend.stats();
//! assert_eq!(stats.load_class_calls, 1);
//! assert_eq!(stats.save_calls, 0);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Call counters of a backend.
///
/// All counters are atomic and can be read while operations are in progress.
/// Values only increase until [`BackendStats::reset`].
#[derive(Debug, Default)]
pub struct BackendStats {
    new_key_calls: AtomicU64,
    load_one_calls: AtomicU64,
    load_many_calls: AtomicU64,
    load_related_calls: AtomicU64,
    load_class_calls: AtomicU64,
    save_calls: AtomicU64,
    refresh_calls: AtomicU64,
    /// Total records returned by any load.
    records_loaded: AtomicU64,
    /// Total record changes applied by successful saves.
    records_saved: AtomicU64,
}

impl BackendStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_new_key(&self) {
        self.new_key_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_one(&self, loaded: u64) {
        self.load_one_calls.fetch_add(1, Ordering::Relaxed);
        self.records_loaded.fetch_add(loaded, Ordering::Relaxed);
    }

    pub(crate) fn record_load_many(&self, loaded: u64) {
        self.load_many_calls.fetch_add(1, Ordering::Relaxed);
        self.records_loaded.fetch_add(loaded, Ordering::Relaxed);
    }

    pub(crate) fn record_load_related(&self, loaded: u64) {
        self.load_related_calls.fetch_add(1, Ordering::Relaxed);
        self.records_loaded.fetch_add(loaded, Ordering::Relaxed);
    }

    pub(crate) fn record_load_class(&self, loaded: u64) {
        self.load_class_calls.fetch_add(1, Ordering::Relaxed);
        self.records_loaded.fetch_add(loaded, Ordering::Relaxed);
    }

    pub(crate) fn record_save_attempt(&self) {
        self.save_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_saved(&self, changes: u64) {
        self.records_saved.fetch_add(changes, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh(&self) {
        self.refresh_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            new_key_calls: self.new_key_calls.load(Ordering::Relaxed),
            load_one_calls: self.load_one_calls.load(Ordering::Relaxed),
            load_many_calls: self.load_many_calls.load(Ordering::Relaxed),
            load_related_calls: self.load_related_calls.load(Ordering::Relaxed),
            load_class_calls: self.load_class_calls.load(Ordering::Relaxed),
            save_calls: self.save_calls.load(Ordering::Relaxed),
            refresh_calls: self.refresh_calls.load(Ordering::Relaxed),
            records_loaded: self.records_loaded.load(Ordering::Relaxed),
            records_saved: self.records_saved.load(Ordering::Relaxed),
        }
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.new_key_calls.store(0, Ordering::Relaxed);
        self.load_one_calls.store(0, Ordering::Relaxed);
        self.load_many_calls.store(0, Ordering::Relaxed);
        self.load_related_calls.store(0, Ordering::Relaxed);
        self.load_class_calls.store(0, Ordering::Relaxed);
        self.save_calls.store(0, Ordering::Relaxed);
        self.refresh_calls.store(0, Ordering::Relaxed);
        self.records_loaded.store(0, Ordering::Relaxed);
        self.records_saved.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of backend statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Calls to `new_object_key`.
    pub new_key_calls: u64,
    /// Calls to `load_one`.
    pub load_one_calls: u64,
    /// Calls to `load_many`.
    pub load_many_calls: u64,
    /// Calls to `load_related`.
    pub load_related_calls: u64,
    /// Calls to `load_class`.
    pub load_class_calls: u64,
    /// Calls to `save`, successful or not.
    pub save_calls: u64,
    /// Calls to `refresh_lock_tokens`.
    pub refresh_calls: u64,
    /// Records returned by all loads.
    pub records_loaded: u64,
    /// Record changes applied by successful saves.
    pub records_saved: u64,
}

impl StatsSnapshot {
    /// Total number of calls into the backend.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.new_key_calls
            + self.load_one_calls
            + self.load_many_calls
            + self.load_related_calls
            + self.load_class_calls
            + self.save_calls
            + self.refresh_calls
    }

    /// Total number of load round trips.
    #[must_use]
    pub fn load_calls(&self) -> u64 {
        self.load_one_calls + self.load_many_calls + self.load_related_calls + self.load_class_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = BackendStats::new();
        stats.record_load_one(1);
        stats.record_load_many(3);
        stats.record_save_attempt();
        stats.record_saved(2);

        let snap = stats.snapshot();
        assert_eq!(snap.load_calls(), 2);
        assert_eq!(snap.records_loaded, 4);
        assert_eq!(snap.total_calls(), 3);
        assert_eq!(snap.records_saved, 2);
    }

    #[test]
    fn reset_clears() {
        let stats = BackendStats::new();
        stats.record_new_key();
        stats.record_refresh();
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
