//! Configuration consumed by the scanning core
//!
//! Values are supplied by an external configuration loader; this module only
//! defines the shapes and defaults. All structs deserialize with missing
//! fields falling back to their defaults.

use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration for all three subsystems.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub io: IoConfig,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
}

/// Adaptive I/O manager tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Chunk size for streaming reads, bytes
    pub chunk_size: usize,
    /// Cap on in-flight read operations across all entry points
    pub max_concurrent_ops: usize,
    /// Files below this size use the direct whole-buffer read path
    pub async_threshold_bytes: u64,
    /// Files at or above this size are memory-mapped
    pub mapped_threshold_bytes: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024,
            max_concurrent_ops: 20,
            async_threshold_bytes: 1024 * 1024,
            mapped_threshold_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Result cache sizing and freshness.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction kicks in
    pub max_entries: usize,
    /// Entry time-to-live, seconds
    pub ttl_seconds: u64,
    /// Signature/definition version the cache starts tracking
    pub signature_version: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            ttl_seconds: 3600,
            signature_version: String::from("unversioned"),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Worker pool bounds and scaling policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Workers added or removed per scaling action
    pub scale_step: usize,
    /// CPU utilization (%) above which the pool scales down
    pub cpu_high_watermark: f32,
    /// CPU utilization (%) below which an I/O-bound pool scales up
    pub cpu_low_watermark: f32,
    /// Memory utilization (%) above which the pool always scales down
    pub memory_high_watermark: f32,
    /// Minimum interval between scaling actions, milliseconds
    pub cooldown_ms: u64,
    /// Background sampling interval, milliseconds
    pub sample_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 32,
            scale_step: 2,
            cpu_high_watermark: 85.0,
            cpu_low_watermark: 30.0,
            memory_high_watermark: 80.0,
            cooldown_ms: 30_000,
            sample_interval_ms: 5_000,
        }
    }
}

impl PoolConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_defaults() {
        let io = IoConfig::default();
        assert_eq!(io.chunk_size, 262_144);
        assert_eq!(io.max_concurrent_ops, 20);
        assert_eq!(io.async_threshold_bytes, 1_048_576);
        assert_eq!(io.mapped_threshold_bytes, 104_857_600);
    }

    #[test]
    fn test_cache_defaults() {
        let cache = CacheConfig::default();
        assert_eq!(cache.max_entries, 1024);
        assert_eq!(cache.ttl_seconds, 3600);
    }

    #[test]
    fn test_pool_defaults() {
        let pool = PoolConfig::default();
        assert_eq!(pool.min_workers, 2);
        assert_eq!(pool.max_workers, 32);
        assert_eq!(pool.cooldown(), Duration::from_secs(30));
    }
}
