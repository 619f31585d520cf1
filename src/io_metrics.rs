//! I/O throughput metrics and workload classification
//!
//! Counters are plain atomics so monitoring reads never contend with the
//! read hot path. The rolling window of recent operations sits behind its
//! own small lock and feeds both the throughput average and the
//! I/O-bound/CPU-bound hint consumed by the worker pool.

use bytesize::ByteSize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// The read technique chosen for a given file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Direct whole-buffer read, cheap under high fan-out of small files
    Async,
    /// Sequential buffered read with read-ahead
    Buffered,
    /// Memory-mapped read with a sequential-access hint
    Mapped,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Async => "async",
            Strategy::Buffered => "buffered",
            Strategy::Mapped => "mapped",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the recent workload, inferred from observed reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    /// Workers spend most of their time waiting on the device
    IoBound,
    /// Reads complete quickly; scan compute dominates
    CpuBound,
    /// Not enough samples to tell
    Unknown,
}

/// Recent operations kept for the rolling throughput average.
const WINDOW_CAP: usize = 64;

/// EWMA smoothing factor for the throughput average.
const EWMA_ALPHA: f64 = 0.2;

/// Below this effective throughput, workers are judged to be waiting on
/// the device rather than on compute.
const IO_BOUND_THROUGHPUT_FLOOR: f64 = 50.0 * 1024.0 * 1024.0;

struct OpSample {
    bytes: u64,
    elapsed: Duration,
}

#[derive(Default)]
struct RollingWindow {
    samples: VecDeque<OpSample>,
    ewma_bytes_per_sec: f64,
}

impl RollingWindow {
    fn push(&mut self, bytes: u64, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            let rate = bytes as f64 / secs;
            self.ewma_bytes_per_sec = if self.ewma_bytes_per_sec == 0.0 {
                rate
            } else {
                EWMA_ALPHA * rate + (1.0 - EWMA_ALPHA) * self.ewma_bytes_per_sec
            };
        }
        if self.samples.len() == WINDOW_CAP {
            self.samples.pop_front();
        }
        self.samples.push_back(OpSample { bytes, elapsed });
    }

    /// Throughput over the window as a whole, not per-op averaged, so a few
    /// tiny fast reads cannot mask one slow large one.
    fn effective_throughput(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let total_bytes: u64 = self.samples.iter().map(|s| s.bytes).sum();
        let total_secs: f64 = self.samples.iter().map(|s| s.elapsed.as_secs_f64()).sum();
        if total_secs <= 0.0 {
            return None;
        }
        Some(total_bytes as f64 / total_secs)
    }
}

/// Per-manager read metrics. Counts and totals are non-decreasing for the
/// lifetime of the owning manager; reset only on explicit [`reset`].
///
/// [`reset`]: IoMetrics::reset
pub struct IoMetrics {
    total_bytes: AtomicU64,
    total_ops: AtomicU64,
    total_micros: AtomicU64,
    async_ops: AtomicU64,
    buffered_ops: AtomicU64,
    mapped_ops: AtomicU64,
    window: Mutex<RollingWindow>,
}

impl Default for IoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IoMetrics {
    pub fn new() -> Self {
        Self {
            total_bytes: AtomicU64::new(0),
            total_ops: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
            async_ops: AtomicU64::new(0),
            buffered_ops: AtomicU64::new(0),
            mapped_ops: AtomicU64::new(0),
            window: Mutex::new(RollingWindow::default()),
        }
    }

    /// Record one completed read. Called exactly once per operation,
    /// whichever entry point produced it.
    pub(crate) fn record(&self, strategy: Strategy, bytes: u64, elapsed: Duration) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.total_ops.fetch_add(1, Ordering::Relaxed);
        self.total_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        let counter = match strategy {
            Strategy::Async => &self.async_ops,
            Strategy::Buffered => &self.buffered_ops,
            Strategy::Mapped => &self.mapped_ops,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut window) = self.window.lock() {
            window.push(bytes, elapsed);
        }
    }

    /// Classify the recent workload from the mix of sizes and latencies.
    pub fn workload_hint(&self) -> WorkloadKind {
        let window = match self.window.lock() {
            Ok(w) => w,
            Err(_) => return WorkloadKind::Unknown,
        };
        match window.effective_throughput() {
            Some(rate) if rate < IO_BOUND_THROUGHPUT_FLOOR => WorkloadKind::IoBound,
            Some(_) => WorkloadKind::CpuBound,
            None => WorkloadKind::Unknown,
        }
    }

    pub fn snapshot(&self) -> IoMetricsSnapshot {
        let ewma = self
            .window
            .lock()
            .map(|w| w.ewma_bytes_per_sec)
            .unwrap_or(0.0);
        IoMetricsSnapshot {
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            total_ops: self.total_ops.load(Ordering::Relaxed),
            total_elapsed: Duration::from_micros(self.total_micros.load(Ordering::Relaxed)),
            async_ops: self.async_ops.load(Ordering::Relaxed),
            buffered_ops: self.buffered_ops.load(Ordering::Relaxed),
            mapped_ops: self.mapped_ops.load(Ordering::Relaxed),
            avg_throughput_bytes_per_sec: ewma,
        }
    }

    /// Zero all counters and forget the rolling window.
    pub fn reset(&self) {
        self.total_bytes.store(0, Ordering::Relaxed);
        self.total_ops.store(0, Ordering::Relaxed);
        self.total_micros.store(0, Ordering::Relaxed);
        self.async_ops.store(0, Ordering::Relaxed);
        self.buffered_ops.store(0, Ordering::Relaxed);
        self.mapped_ops.store(0, Ordering::Relaxed);
        if let Ok(mut window) = self.window.lock() {
            *window = RollingWindow::default();
        }
    }
}

/// Point-in-time copy of the metrics, safe to hold across other calls.
#[derive(Debug, Clone, PartialEq)]
pub struct IoMetricsSnapshot {
    pub total_bytes: u64,
    pub total_ops: u64,
    pub total_elapsed: Duration,
    pub async_ops: u64,
    pub buffered_ops: u64,
    pub mapped_ops: u64,
    pub avg_throughput_bytes_per_sec: f64,
}

impl fmt::Display for IoMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} read in {} ops (async {}, buffered {}, mapped {}), avg {}/s",
            ByteSize(self.total_bytes),
            self.total_ops,
            self.async_ops,
            self.buffered_ops,
            self.mapped_ops,
            ByteSize(self.avg_throughput_bytes_per_sec as u64),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = IoMetrics::new();
        metrics.record(Strategy::Async, 100, Duration::from_micros(50));
        metrics.record(Strategy::Buffered, 2000, Duration::from_millis(1));
        metrics.record(Strategy::Mapped, 30_000, Duration::from_millis(5));

        let snap = metrics.snapshot();
        assert_eq!(snap.total_bytes, 32_100);
        assert_eq!(snap.total_ops, 3);
        assert_eq!(snap.async_ops, 1);
        assert_eq!(snap.buffered_ops, 1);
        assert_eq!(snap.mapped_ops, 1);
        assert!(snap.avg_throughput_bytes_per_sec > 0.0);
    }

    #[test]
    fn test_no_samples_is_unknown() {
        let metrics = IoMetrics::new();
        assert_eq!(metrics.workload_hint(), WorkloadKind::Unknown);
    }

    #[test]
    fn test_slow_reads_classify_io_bound() {
        let metrics = IoMetrics::new();
        // 1 MiB taking a full second apiece: ~1 MiB/s, well under the floor.
        for _ in 0..8 {
            metrics.record(Strategy::Buffered, 1024 * 1024, Duration::from_secs(1));
        }
        assert_eq!(metrics.workload_hint(), WorkloadKind::IoBound);
    }

    #[test]
    fn test_fast_reads_classify_cpu_bound() {
        let metrics = IoMetrics::new();
        // 1 MiB in 1 ms apiece: ~1 GiB/s.
        for _ in 0..8 {
            metrics.record(Strategy::Async, 1024 * 1024, Duration::from_millis(1));
        }
        assert_eq!(metrics.workload_hint(), WorkloadKind::CpuBound);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let metrics = IoMetrics::new();
        metrics.record(Strategy::Async, 100, Duration::from_micros(10));
        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.total_ops, 0);
        assert_eq!(snap.total_bytes, 0);
        assert_eq!(metrics.workload_hint(), WorkloadKind::Unknown);
    }

    #[test]
    fn test_window_is_bounded() {
        let metrics = IoMetrics::new();
        for _ in 0..(WINDOW_CAP * 3) {
            metrics.record(Strategy::Async, 10, Duration::from_micros(1));
        }
        let window = metrics.window.lock().unwrap();
        assert_eq!(window.samples.len(), WINDOW_CAP);
    }
}
