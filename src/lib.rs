//! scancore — file-scanning performance core
//!
//! Three tightly coupled subsystems used by a security scanner:
//!
//! - [`io_manager::IoManager`] reads candidate files with a size-appropriate
//!   strategy under a global concurrency cap
//! - [`verdict_cache::VerdictCache`] remembers scan verdicts per file
//!   identity with TTL + LRU eviction and optional SQLite persistence
//! - [`worker_pool::AdaptiveWorkerPool`] bounds concurrent scan tasks and
//!   resizes itself from sampled system load
//!
//! The scan engines, GUI, reporting, and configuration loading live in the
//! surrounding application; this crate only moves bytes, remembers verdicts,
//! and admits work. Instantiate each component explicitly and pass handles
//! to callers; there are no process-wide singletons.
//!
//! The miss path for one scan request:
//!
//! ```no_run
//! use scancore::config::CoreConfig;
//! use scancore::io_manager::IoManager;
//! use scancore::verdict_cache::{Verdict, VerdictCache};
//! use scancore::worker_pool::AdaptiveWorkerPool;
//! # fn scan(bytes: &[u8]) -> Verdict { Verdict::Clean }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::default();
//! let io = IoManager::new(config.io);
//! let cache = VerdictCache::new(config.cache);
//! let pool = AdaptiveWorkerPool::new(config.pool);
//!
//! let path = std::path::Path::new("suspect.bin");
//! if cache.get(path).is_none() {
//!     let _slot = pool.acquire(None)?;
//!     let bytes = io.read_whole(path)?;
//!     let verdict = scan(&bytes);
//!     cache.put(path, verdict, None, 0.0, "signature-db")?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod io_manager;
pub mod io_metrics;
pub mod verdict_cache;
pub mod worker_pool;

pub use config::{CacheConfig, CoreConfig, IoConfig, PoolConfig};
pub use error::{
    AcquireTimeout, CacheCorruptionError, MetricsSamplingError, ReadError, ReadErrorKind,
};
pub use io_manager::{ChunkStream, IoManager};
pub use io_metrics::{IoMetrics, IoMetricsSnapshot, Strategy, WorkloadKind};
pub use verdict_cache::{CacheEntry, CacheStatsSnapshot, CacheStore, Verdict, VerdictCache};
pub use worker_pool::{
    AdaptiveWorkerPool, AutoscalerHandle, PoolState, SysinfoProbe, SystemProbe, SystemSample,
    WorkerSlot,
};
