//! Load-aware worker pool
//!
//! Static pool sizes either starve I/O-bound bursts or over-subscribe
//! CPU-bound ones. The pool is a resizable counting semaphore; a sampling
//! loop reads CPU and memory utilization plus the I/O manager's workload
//! hint and nudges the size up or down, one step per cooldown window, inside
//! the configured bounds.

use crate::config::PoolConfig;
use crate::error::{AcquireTimeout, MetricsSamplingError};
use crate::io_metrics::{IoMetrics, WorkloadKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::{debug, warn};

/// One sampling of system state.
#[derive(Debug, Clone, Copy)]
pub struct SystemSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub workload: WorkloadKind,
}

/// Source of system samples. Swappable so tests can script load patterns.
pub trait SystemProbe: Send {
    fn sample(&mut self) -> Result<SystemSample, MetricsSamplingError>;
}

/// Production probe: sysinfo for CPU/memory, the I/O manager's metrics for
/// the workload classification.
pub struct SysinfoProbe {
    system: System,
    io_metrics: Arc<IoMetrics>,
}

impl SysinfoProbe {
    pub fn new(io_metrics: Arc<IoMetrics>) -> Self {
        let mut system = System::new();
        // First refresh establishes the baseline CPU usage deltas build on.
        system.refresh_cpu_all();
        system.refresh_memory();
        Self { system, io_metrics }
    }
}

impl SystemProbe for SysinfoProbe {
    fn sample(&mut self) -> Result<SystemSample, MetricsSamplingError> {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            return Err(MetricsSamplingError::new(
                "platform reported zero total memory",
            ));
        }
        let memory_percent = (self.system.used_memory() as f64 / total as f64 * 100.0) as f32;

        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return Err(MetricsSamplingError::new("no CPUs reported"));
        }
        let cpu_percent = cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32;
        if !cpu_percent.is_finite() {
            return Err(MetricsSamplingError::new("CPU utilization unavailable"));
        }

        Ok(SystemSample {
            cpu_percent,
            memory_percent,
            workload: self.io_metrics.workload_hint(),
        })
    }
}

/// Observable pool state.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub current_workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub last_scaled: Option<Instant>,
    pub cooldown: Duration,
    pub last_workload: WorkloadKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScaleAction {
    Up,
    Down,
    Hold,
}

/// Scaling rules, in priority order. Memory pressure always wins; extra
/// concurrency only helps when workers are mostly waiting on I/O.
fn decide(sample: &SystemSample, config: &PoolConfig) -> ScaleAction {
    if sample.memory_percent > config.memory_high_watermark {
        ScaleAction::Down
    } else if sample.cpu_percent < config.cpu_low_watermark
        && sample.workload == WorkloadKind::IoBound
    {
        ScaleAction::Up
    } else if sample.cpu_percent > config.cpu_high_watermark {
        ScaleAction::Down
    } else {
        ScaleAction::Hold
    }
}

struct PoolInner {
    /// Current worker limit; always within [min_workers, max_workers]
    limit: usize,
    in_use: usize,
    last_scaled: Option<Instant>,
    last_workload: WorkloadKind,
}

struct PoolShared {
    inner: Mutex<PoolInner>,
    cv: Condvar,
}

/// Bounded, self-scaling admission control for concurrent scan tasks.
///
/// The pool is the sole authority for admitting new scan tasks; a slot is
/// returned by dropping its [`WorkerSlot`].
pub struct AdaptiveWorkerPool {
    config: PoolConfig,
    shared: Arc<PoolShared>,
}

impl AdaptiveWorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let min = config.min_workers.max(1);
        Self {
            shared: Arc::new(PoolShared {
                inner: Mutex::new(PoolInner {
                    limit: min,
                    in_use: 0,
                    last_scaled: None,
                    last_workload: WorkloadKind::Unknown,
                }),
                cv: Condvar::new(),
            }),
            config,
        }
    }

    /// Block until a worker slot is available, or until the timeout elapses.
    /// A timed-out acquire has no side effects.
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<WorkerSlot, AcquireTimeout> {
        let start = Instant::now();
        let deadline = timeout.map(|t| start + t);
        let mut inner = self.lock_inner();

        loop {
            if inner.in_use < inner.limit {
                inner.in_use += 1;
                return Ok(WorkerSlot {
                    shared: Arc::clone(&self.shared),
                });
            }
            match deadline {
                None => {
                    inner = self
                        .shared
                        .cv
                        .wait(inner)
                        .unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    let Some(remaining) = deadline.checked_duration_since(now) else {
                        return Err(AcquireTimeout {
                            waited: start.elapsed(),
                        });
                    };
                    let (guard, _timed_out) = self
                        .shared
                        .cv
                        .wait_timeout(inner, remaining)
                        .unwrap_or_else(|e| e.into_inner());
                    inner = guard;
                }
            }
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<WorkerSlot> {
        let mut inner = self.lock_inner();
        if inner.in_use < inner.limit {
            inner.in_use += 1;
            Some(WorkerSlot {
                shared: Arc::clone(&self.shared),
            })
        } else {
            None
        }
    }

    pub fn current_workers(&self) -> usize {
        self.lock_inner().limit
    }

    pub fn in_use(&self) -> usize {
        self.lock_inner().in_use
    }

    pub fn state(&self) -> PoolState {
        let inner = self.lock_inner();
        PoolState {
            current_workers: inner.limit,
            min_workers: self.config.min_workers.max(1),
            max_workers: self.config.max_workers,
            last_scaled: inner.last_scaled,
            cooldown: self.config.cooldown(),
            last_workload: inner.last_workload,
        }
    }

    /// Run one sampling step: probe the system and apply the scaling policy.
    ///
    /// A failed sample holds the last known good size; the pool never scales
    /// on it.
    pub fn tick(&self, probe: &mut dyn SystemProbe) {
        let sample = match probe.sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "metrics sample failed, holding pool size");
                return;
            }
        };
        self.apply_sample(&sample);
    }

    fn apply_sample(&self, sample: &SystemSample) {
        let min = self.config.min_workers.max(1);
        let max = self.config.max_workers.max(min);
        let step = self.config.scale_step.max(1);

        let mut inner = self.lock_inner();
        inner.last_workload = sample.workload;

        // Cooldown gates actions, not observation.
        if let Some(last) = inner.last_scaled {
            if last.elapsed() < self.config.cooldown() {
                return;
            }
        }

        let target = match decide(sample, &self.config) {
            ScaleAction::Up => (inner.limit + step).min(max),
            ScaleAction::Down => inner.limit.saturating_sub(step).max(min),
            ScaleAction::Hold => inner.limit,
        };

        if target != inner.limit {
            debug!(
                from = inner.limit,
                to = target,
                cpu = sample.cpu_percent,
                memory = sample.memory_percent,
                workload = ?sample.workload,
                "scaling worker pool"
            );
            let scaled_up = target > inner.limit;
            inner.limit = target;
            inner.last_scaled = Some(Instant::now());
            drop(inner);
            if scaled_up {
                // Newly freed capacity may unblock waiters.
                self.shared.cv.notify_all();
            }
        }
    }

    /// Spawn the background sampling loop. The returned handle stops and
    /// joins the thread when dropped.
    pub fn start_autoscaler(
        self: &Arc<Self>,
        mut probe: impl SystemProbe + 'static,
    ) -> AutoscalerHandle {
        let pool = Arc::clone(self);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let interval = self.config.sample_interval();

        let handle = std::thread::Builder::new()
            .name("scancore-autoscaler".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    pool.tick(&mut probe);
                    // Sleep in short slices so shutdown stays prompt.
                    let deadline = Instant::now() + interval;
                    while Instant::now() < deadline {
                        if stop_flag.load(Ordering::Relaxed) {
                            return;
                        }
                        std::thread::sleep(Duration::from_millis(20).min(interval));
                    }
                }
            })
            .expect("failed to spawn autoscaler thread");

        AutoscalerHandle {
            stop,
            handle: Some(handle),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// RAII admission slot; dropping it releases the worker back to the pool.
pub struct WorkerSlot {
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for WorkerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSlot").finish_non_exhaustive()
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.in_use = inner.in_use.saturating_sub(1);
        drop(inner);
        self.shared.cv.notify_one();
    }
}

/// Owns the background sampling thread.
pub struct AutoscalerHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for AutoscalerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
