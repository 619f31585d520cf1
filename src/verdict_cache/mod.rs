//! TTL + LRU scan verdict cache
//!
//! Maps a file identity (path + mtime) to a previously computed verdict.
//! One structure handles both failure modes: capacity pressure falls to
//! strict least-recently-used eviction, staleness to lazy TTL expiry and
//! wholesale invalidation when the signature/definition version changes.

pub mod entry;
pub mod stats;
pub mod store;

pub use entry::{CacheEntry, Verdict};
pub use stats::CacheStatsSnapshot;
pub use store::CacheStore;

use crate::config::CacheConfig;
use crate::error::ReadError;
use crate::verdict_cache::entry::{normalize_path, FileIdentity};
use crate::verdict_cache::stats::CacheStatistics;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

struct Slot {
    entry: CacheEntry,
    /// Monotonic recency stamp; the smallest value is the LRU victim
    last_used: u64,
}

struct CacheInner {
    entries: HashMap<String, Slot>,
    signature_version: String,
    /// Recency clock, bumped on every table access
    tick: u64,
}

/// Thread-safe verdict cache. The entry table lives under one mutex;
/// statistics are tracked independently so monitoring never contends with
/// lookups holding the table lock.
pub struct VerdictCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
    stats: CacheStatistics,
}

impl VerdictCache {
    pub fn new(config: CacheConfig) -> Self {
        let signature_version = config.signature_version.clone();
        Self {
            config,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                signature_version,
                tick: 0,
            }),
            stats: CacheStatistics::default(),
        }
    }

    /// Look up the verdict for a file's current identity.
    ///
    /// Returns the entry only if present, unexpired, and computed against
    /// the active signature version; anything else is a miss. A hit bumps
    /// the entry's access count and recency. Every call records exactly one
    /// hit or one miss.
    pub fn get(&self, path: &Path) -> Option<CacheEntry> {
        let identity = match FileIdentity::probe(path) {
            Ok(identity) => identity,
            Err(_) => {
                // Unreadable metadata cannot match any cached identity.
                self.stats.record_miss();
                return None;
            }
        };
        let key = identity.cache_key();
        let now = Utc::now().timestamp();

        enum Outcome {
            Hit(CacheEntry),
            Expired,
            StaleVersion,
            Absent,
        }

        let mut guard = self.lock_inner();
        let inner = &mut *guard;
        inner.tick += 1;
        let tick = inner.tick;

        let outcome = match inner.entries.get_mut(&key) {
            None => Outcome::Absent,
            Some(slot) => {
                if Self::is_expired(now, slot.entry.created_at, self.config.ttl_seconds) {
                    Outcome::Expired
                } else if slot.entry.signature_version != inner.signature_version {
                    // Version changes clear the table, so this only defends
                    // against rows a load() let through.
                    Outcome::StaleVersion
                } else {
                    slot.entry.access_count += 1;
                    slot.last_used = tick;
                    Outcome::Hit(slot.entry.clone())
                }
            }
        };

        match outcome {
            Outcome::Hit(entry) => {
                drop(guard);
                self.stats.record_hit();
                Some(entry)
            }
            Outcome::Expired => {
                inner.entries.remove(&key);
                drop(guard);
                self.stats.record_expirations(1);
                self.stats.record_miss();
                None
            }
            Outcome::StaleVersion => {
                inner.entries.remove(&key);
                drop(guard);
                self.stats.record_miss();
                None
            }
            Outcome::Absent => {
                drop(guard);
                self.stats.record_miss();
                None
            }
        }
    }

    /// Insert or refresh the verdict for a file.
    ///
    /// At capacity, the least-recently-used entry is evicted first. The new
    /// entry is stamped with the current time, the cache's TTL window, and
    /// the active signature version.
    pub fn put(
        &self,
        path: &Path,
        verdict: Verdict,
        threat_name: Option<String>,
        threat_level: f32,
        engine: &str,
    ) -> Result<(), ReadError> {
        let identity = FileIdentity::probe(path).map_err(|e| ReadError::new(path, e))?;
        let key = identity.cache_key();

        let mut inner = self.lock_inner();
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.config.max_entries {
            if let Some(victim) = Self::lru_victim(&inner.entries) {
                let removed = inner.entries.remove(&victim);
                if let Some(slot) = removed {
                    debug!(
                        evicted = %slot.entry.source_path.display(),
                        "capacity eviction"
                    );
                }
                self.stats.record_eviction();
            }
        }

        let entry = CacheEntry {
            key: key.clone(),
            source_path: path.to_path_buf(),
            verdict,
            threat_name,
            threat_level: threat_level.clamp(0.0, 1.0),
            engine: engine.to_string(),
            created_at: Utc::now().timestamp(),
            signature_version: inner.signature_version.clone(),
            file_size: identity.size,
            mtime_secs: identity.mtime_secs,
            mtime_nsecs: identity.mtime_nsecs,
            access_count: 0,
        };
        inner.entries.insert(
            key,
            Slot {
                entry,
                last_used: tick,
            },
        );
        Ok(())
    }

    /// Remove every entry recorded for this path, regardless of mtime.
    pub fn delete(&self, path: &Path) -> usize {
        let normalized = normalize_path(path);
        let mut inner = self.lock_inner();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, slot| normalize_path(&slot.entry.source_path) != normalized);
        before - inner.entries.len()
    }

    pub fn clear(&self) {
        self.lock_inner().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock_inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn signature_version(&self) -> String {
        self.lock_inner().signature_version.clone()
    }

    /// Track a new definition version. A changed version atomically clears
    /// the cache: every previously computed verdict is void, since a file
    /// once judged clean may now be flagged.
    pub fn update_signature_version(&self, new_version: &str) {
        let mut inner = self.lock_inner();
        if inner.signature_version == new_version {
            return;
        }
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.signature_version = new_version.to_string();
        debug!(
            version = new_version,
            dropped, "signature version changed, cache cleared"
        );
    }

    /// Proactively sweep expired entries. Lazy expiry at lookup remains the
    /// correctness mechanism; this just reclaims memory earlier.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now().timestamp();
        let ttl = self.config.ttl_seconds;
        let mut inner = self.lock_inner();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, slot| !Self::is_expired(now, slot.entry.created_at, ttl));
        let purged = before - inner.entries.len();
        drop(inner);
        if purged > 0 {
            self.stats.record_expirations(purged as u64);
        }
        purged
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let entry_count = self.len();
        self.stats.snapshot(entry_count)
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Persist all current, unexpired entries.
    pub fn save(&self, store: &mut CacheStore) -> anyhow::Result<usize> {
        let now = Utc::now().timestamp();
        let live: Vec<CacheEntry> = {
            let inner = self.lock_inner();
            inner
                .entries
                .values()
                .filter(|slot| !Self::is_expired(now, slot.entry.created_at, self.config.ttl_seconds))
                .map(|slot| slot.entry.clone())
                .collect()
        };
        store.save_entries(&live)
    }

    /// Rebuild the in-memory table from the store, silently discarding rows
    /// whose TTL has elapsed or whose signature version no longer matches.
    /// A corrupt store leaves the cache empty and scanning continues.
    /// Returns the number of rows actually restored.
    pub fn load(&self, store: &CacheStore) -> usize {
        let rows = match store.load_entries() {
            Ok(rows) => rows,
            Err(e) => {
                warn!(
                    store = %store.path().display(),
                    error = %e,
                    "cache store corrupt, continuing with an empty cache"
                );
                return 0;
            }
        };

        let now = Utc::now().timestamp();
        let mut inner = self.lock_inner();
        let active_version = inner.signature_version.clone();
        let mut restored = 0;
        for entry in rows {
            if Self::is_expired(now, entry.created_at, self.config.ttl_seconds) {
                continue;
            }
            if entry.signature_version != active_version {
                continue;
            }
            if inner.entries.len() >= self.config.max_entries {
                break;
            }
            inner.tick += 1;
            let tick = inner.tick;
            inner.entries.insert(
                entry.key.clone(),
                Slot {
                    entry,
                    last_used: tick,
                },
            );
            restored += 1;
        }
        restored
    }

    fn is_expired(now: i64, created_at: i64, ttl_seconds: u64) -> bool {
        now.saturating_sub(created_at) >= ttl_seconds as i64
    }

    fn lru_victim(entries: &HashMap<String, Slot>) -> Option<String> {
        // O(n) scan; fine at the configured capacities (default 1024).
        entries
            .iter()
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(key, _)| key.clone())
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
