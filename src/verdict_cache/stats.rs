//! Cache hit/miss accounting
//!
//! Kept entirely in atomics, separate from the entry-table lock, so
//! monitoring reads never contend with lookups.

use bytesize::ByteSize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Conservative per-entry memory cost used for the footprint estimate:
/// entry struct plus key string, path string, and map overhead.
const ENTRY_COST_BYTES: u64 = 512;

/// Monotonic counters for one cache instance. Across the cache's lifetime,
/// hits + misses equals the number of `get` calls made.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStatistics {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entry_count: usize) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entry_count,
            estimated_memory_bytes: entry_count as u64 * ENTRY_COST_BYTES,
        }
    }

    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of the cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entry_count: usize,
    pub estimated_memory_bytes: u64,
}

impl CacheStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries (~{}), {} hits / {} misses ({:.1}%), {} evicted, {} expired",
            self.entry_count,
            ByteSize(self.estimated_memory_bytes),
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.evictions,
            self.expirations,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = CacheStatistics::default();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_eviction();
        stats.record_expirations(3);

        let snap = stats.snapshot(10);
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.evictions, 1);
        assert_eq!(snap.expirations, 3);
        assert_eq!(snap.entry_count, 10);
        assert_eq!(snap.estimated_memory_bytes, 10 * ENTRY_COST_BYTES);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStatistics::default();
        assert_eq!(stats.snapshot(0).hit_rate(), 0.0);
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert!((stats.snapshot(0).hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset() {
        let stats = CacheStatistics::default();
        stats.record_hit();
        stats.reset();
        assert_eq!(stats.snapshot(0).hits, 0);
    }
}
