//! Store-wide counters.
//!
//! Lock-free `AtomicU64` counters owned by one [`crate::RefDataStore`] and
//! bumped from inside write transactions. Counters are advisory: a write
//! transaction that later aborts has still been counted.
//!
//! # Example
//!
//! ```
//! use refstore::metrics::StoreMetrics;
//!
//! let metrics = StoreMetrics::new();
//! metrics.record_hash_clash();
//! assert_eq!(metrics.snapshot().hash_clashes, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct StoreMetrics {
    // ========================================================================
    // Lookup tables
    // ========================================================================
    /// New UIDs assigned across all UID lookup tables
    uids_created: AtomicU64,

    /// New hash lookup entries (keys hash table and value store)
    hash_entries_created: AtomicU64,

    /// Probes that landed on an occupied slot holding different bytes
    hash_clashes: AtomicU64,

    // ========================================================================
    // Value store
    // ========================================================================
    values_created: AtomicU64,
    values_dereferenced: AtomicU64,
    values_deleted: AtomicU64,

    // ========================================================================
    // Purge
    // ========================================================================
    /// Number of completed `purge_unused` runs
    purge_runs: AtomicU64,

    /// Lookup entries removed by sweeps
    lookup_entries_purged: AtomicU64,

    /// Ref streams removed by `purge_ref_stream`
    streams_purged: AtomicU64,

    started_at: Instant,
}

/// Point-in-time copy of all counters. All values are plain types.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uids_created: u64,
    pub hash_entries_created: u64,
    pub hash_clashes: u64,
    pub values_created: u64,
    pub values_dereferenced: u64,
    pub values_deleted: u64,
    pub purge_runs: u64,
    pub lookup_entries_purged: u64,
    pub streams_purged: u64,
    /// Seconds since the store handle was opened
    pub uptime_secs: u64,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self {
            uids_created: AtomicU64::new(0),
            hash_entries_created: AtomicU64::new(0),
            hash_clashes: AtomicU64::new(0),
            values_created: AtomicU64::new(0),
            values_dereferenced: AtomicU64::new(0),
            values_deleted: AtomicU64::new(0),
            purge_runs: AtomicU64::new(0),
            lookup_entries_purged: AtomicU64::new(0),
            streams_purged: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_uid_created(&self) {
        self.uids_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hash_entry_created(&self) {
        self.hash_entries_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hash_clash(&self) {
        self.hash_clashes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_value_created(&self) {
        self.values_created.fetch_add(1, Ordering::Relaxed);
    }

    /// A reference was dropped; `deleted` if it was the last one.
    pub fn record_value_dereferenced(&self, deleted: bool) {
        self.values_dereferenced.fetch_add(1, Ordering::Relaxed);
        if deleted {
            self.values_deleted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_purge(&self, entries_removed: u64) {
        self.purge_runs.fetch_add(1, Ordering::Relaxed);
        self.lookup_entries_purged
            .fetch_add(entries_removed, Ordering::Relaxed);
    }

    pub fn record_stream_purged(&self) {
        self.streams_purged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uids_created: self.uids_created.load(Ordering::Relaxed),
            hash_entries_created: self.hash_entries_created.load(Ordering::Relaxed),
            hash_clashes: self.hash_clashes.load(Ordering::Relaxed),
            values_created: self.values_created.load(Ordering::Relaxed),
            values_dereferenced: self.values_dereferenced.load(Ordering::Relaxed),
            values_deleted: self.values_deleted.load(Ordering::Relaxed),
            purge_runs: self.purge_runs.load(Ordering::Relaxed),
            lookup_entries_purged: self.lookup_entries_purged.load(Ordering::Relaxed),
            streams_purged: self.streams_purged.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters_start_at_zero() {
        let snap = StoreMetrics::new().snapshot();
        assert_eq!(
            snap,
            MetricsSnapshot {
                uptime_secs: snap.uptime_secs,
                ..MetricsSnapshot::default()
            }
        );
    }

    #[test]
    fn test_dereference_counts_deletes_separately() {
        let metrics = StoreMetrics::new();
        metrics.record_value_dereferenced(false);
        metrics.record_value_dereferenced(true);
        let snap = metrics.snapshot();
        assert_eq!(snap.values_dereferenced, 2);
        assert_eq!(snap.values_deleted, 1);
    }

    #[test]
    fn test_purge_accumulates() {
        let metrics = StoreMetrics::new();
        metrics.record_purge(3);
        metrics.record_purge(0);
        let snap = metrics.snapshot();
        assert_eq!(snap.purge_runs, 2);
        assert_eq!(snap.lookup_entries_purged, 3);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(StoreMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.record_uid_created();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().uids_created, 4000);
    }
}
