//! Access counters shared by every operation of a [`DataAccess`].
//!
//! [`DataAccess`]: crate::DataAccess

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated lock-free from concurrent operations.
#[derive(Debug, Default)]
pub struct AccessStats {
    hits: AtomicU64,
    misses: AtomicU64,
    cache_errors: AtomicU64,
    store_calls: AtomicU64,
    /// Consumed capacity in thousandths of a unit.
    capacity_milli: AtomicU64,
    dropped_writes: AtomicU64,
}

impl AccessStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hits(&self, n: u64) {
        self.hits.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_misses(&self, n: u64) {
        self.misses.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_call(&self, capacity: f64) {
        self.store_calls.fetch_add(1, Ordering::Relaxed);
        if capacity > 0.0 {
            self.capacity_milli
                .fetch_add((capacity * 1000.0).round() as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_dropped_write(&self) {
        self.dropped_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            store_calls: self.store_calls.load(Ordering::Relaxed),
            consumed_capacity: self.capacity_milli.load(Ordering::Relaxed) as f64 / 1000.0,
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about cache and store usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Reads answered from the cache.
    pub hits: u64,
    /// Reads that fell through to the store.
    pub misses: u64,
    /// Cache faults swallowed and treated as misses.
    pub cache_errors: u64,
    /// Requests sent to the store.
    pub store_calls: u64,
    /// Capacity units the store reported.
    pub consumed_capacity: f64,
    /// Background cache writes dropped on a full queue.
    pub dropped_writes: u64,
}

impl StatsSnapshot {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = StatsSnapshot {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = StatsSnapshot::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = AccessStats::new();
        stats.record_hits(2);
        stats.record_misses(1);
        stats.record_store_call(0.5);
        stats.record_store_call(1.0);
        stats.record_cache_error();
        stats.record_dropped_write();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.store_calls, 2);
        assert!((snapshot.consumed_capacity - 1.5).abs() < f64::EPSILON);
        assert_eq!(snapshot.cache_errors, 1);
        assert_eq!(snapshot.dropped_writes, 1);
    }
}
