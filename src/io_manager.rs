//! Adaptive file reading
//!
//! File size is the dominant predictor of which read technique minimizes
//! latency and memory pressure, so the manager picks a strategy from a
//! metadata probe: small files get a direct whole-buffer read, mid-sized
//! files a buffered sequential read with read-ahead, and large files a
//! memory map with a sequential-access hint. A global in-flight cap keeps
//! file-descriptor and memory use bounded when thousands of files are
//! scanned in parallel.

use crate::config::IoConfig;
use crate::error::ReadError;
use crate::io_metrics::{IoMetrics, Strategy};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;
use tracing::debug;

/// Reads file content with a size-appropriate strategy and records every
/// completed read into its [`IoMetrics`].
pub struct IoManager {
    config: IoConfig,
    metrics: Arc<IoMetrics>,
    gate: Arc<OpGate>,
}

impl IoManager {
    pub fn new(config: IoConfig) -> Self {
        let gate = Arc::new(OpGate::new(config.max_concurrent_ops.max(1)));
        Self {
            config,
            metrics: Arc::new(IoMetrics::new()),
            gate,
        }
    }

    /// Shared handle to this manager's metrics; the worker pool's probe
    /// reads the workload hint from it.
    pub fn metrics(&self) -> Arc<IoMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Pick the read strategy for a file of the given size.
    pub fn select_strategy(&self, file_size: u64) -> Strategy {
        if file_size < self.config.async_threshold_bytes {
            Strategy::Async
        } else if file_size < self.config.mapped_threshold_bytes {
            Strategy::Buffered
        } else {
            Strategy::Mapped
        }
    }

    /// Read the entire file, selecting the strategy by size.
    pub fn read_whole(&self, path: &Path) -> Result<Vec<u8>, ReadError> {
        let size = file_size(path)?;
        self.read_sized(path, size, self.select_strategy(size))
    }

    /// Read the entire file with a caller-forced strategy, bypassing
    /// size-based selection.
    pub fn read_with(&self, path: &Path, strategy: Strategy) -> Result<Vec<u8>, ReadError> {
        let size = file_size(path)?;
        self.read_sized(path, size, strategy)
    }

    fn read_sized(
        &self,
        path: &Path,
        size: u64,
        strategy: Strategy,
    ) -> Result<Vec<u8>, ReadError> {
        let _permit = self.gate.acquire();
        let start = Instant::now();

        let bytes = match strategy {
            Strategy::Async => read_direct(path, size),
            Strategy::Buffered => read_buffered(path, self.read_ahead_capacity()),
            Strategy::Mapped => read_mapped(path, size)
                // Mapping can fail on exotic filesystems; buffered reads are
                // functionally equivalent, possibly slower.
                .or_else(|_| read_buffered(path, self.read_ahead_capacity())),
        }
        .map_err(|e| ReadError::new(path, e))?;

        let elapsed = start.elapsed();
        self.metrics.record(strategy, bytes.len() as u64, elapsed);
        debug!(
            path = %path.display(),
            strategy = %strategy,
            bytes = bytes.len(),
            ?elapsed,
            "read complete"
        );
        Ok(bytes)
    }

    /// Lazily read the file as `chunk_size` chunks.
    ///
    /// Each call starts a fresh sequence; the stream terminates at end of
    /// file and stops issuing I/O as soon as it is dropped. Buffered and
    /// mapped sources never materialize the whole file.
    pub fn stream_chunks(&self, path: &Path) -> Result<ChunkStream, ReadError> {
        let permit = self.gate.acquire();
        let size = file_size(path)?;
        let strategy = self.select_strategy(size);

        let source = match strategy {
            // Under the async threshold the whole file fits comfortably in
            // one buffer; chunking just slices it.
            Strategy::Async => ChunkSource::Owned {
                buf: read_direct(path, size).map_err(|e| ReadError::new(path, e))?,
                pos: 0,
            },
            Strategy::Buffered => ChunkSource::Reader(self.open_buffered(path)?),
            Strategy::Mapped => match map_file(path, size) {
                Ok(Some(mmap)) => ChunkSource::Mapped { mmap, pos: 0 },
                Ok(None) => ChunkSource::Owned {
                    buf: Vec::new(),
                    pos: 0,
                },
                Err(_) => ChunkSource::Reader(self.open_buffered(path)?),
            },
        };

        Ok(ChunkStream {
            path: path.to_path_buf(),
            strategy,
            chunk_size: self.config.chunk_size.max(1),
            source,
            bytes_read: 0,
            started: Instant::now(),
            finished: false,
            metrics: Arc::clone(&self.metrics),
            _permit: permit,
        })
    }

    fn open_buffered(&self, path: &Path) -> Result<BufReader<File>, ReadError> {
        let file = File::open(path).map_err(|e| ReadError::new(path, e))?;
        Ok(BufReader::with_capacity(self.read_ahead_capacity(), file))
    }

    /// Read-ahead buffer is twice the chunk size.
    fn read_ahead_capacity(&self) -> usize {
        self.config.chunk_size.max(1) * 2
    }
}

fn file_size(path: &Path) -> Result<u64, ReadError> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| ReadError::new(path, e))
}

/// Direct read into one exactly-sized buffer.
fn read_direct(path: &Path, size: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buf = Vec::with_capacity(size as usize + 1);
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

fn read_buffered(path: &Path, capacity: usize) -> std::io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(capacity, file);
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

fn read_mapped(path: &Path, size: u64) -> std::io::Result<Vec<u8>> {
    match map_file(path, size)? {
        Some(mmap) => Ok(mmap.to_vec()),
        None => Ok(Vec::new()),
    }
}

/// Map a file read-only. Empty files are not mappable on all platforms, so
/// zero bytes maps to `None`.
fn map_file(path: &Path, size: u64) -> std::io::Result<Option<Mmap>> {
    if size == 0 {
        return Ok(None);
    }
    let file = File::open(path)?;
    // Safety: the mapping is read-only; concurrent truncation of a file
    // under scan is outside this core's consistency guarantees.
    let mmap = unsafe { Mmap::map(&file)? };
    #[cfg(unix)]
    {
        // Advisory only; platforms without madvise just read cold.
        let _ = mmap.advise(memmap2::Advice::Sequential);
    }
    Ok(Some(mmap))
}

enum ChunkSource {
    Owned { buf: Vec<u8>, pos: usize },
    Reader(BufReader<File>),
    Mapped { mmap: Mmap, pos: usize },
}

/// Finite iterator of byte chunks for one streaming read.
///
/// Holds one of the manager's in-flight permits for its whole lifetime and
/// records into the metrics exactly once, on drop, with the bytes it
/// actually produced.
pub struct ChunkStream {
    path: PathBuf,
    strategy: Strategy,
    chunk_size: usize,
    source: ChunkSource,
    bytes_read: u64,
    started: Instant,
    finished: bool,
    metrics: Arc<IoMetrics>,
    _permit: OpPermit,
}

impl ChunkStream {
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for ChunkStream {
    type Item = Result<Vec<u8>, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let chunk_size = self.chunk_size;
        let result: std::io::Result<Option<Vec<u8>>> = match &mut self.source {
            ChunkSource::Owned { buf, pos } => Ok(slice_chunk(buf, pos, chunk_size)),
            ChunkSource::Mapped { mmap, pos } => Ok(slice_chunk(&mmap[..], pos, chunk_size)),
            ChunkSource::Reader(reader) => fill_chunk(reader, chunk_size),
        };
        match result {
            Ok(Some(chunk)) => {
                self.bytes_read += chunk.len() as u64;
                Some(Ok(chunk))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(ReadError::new(self.path.clone(), e)))
            }
        }
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.metrics
            .record(self.strategy, self.bytes_read, self.started.elapsed());
    }
}

fn slice_chunk(data: &[u8], pos: &mut usize, chunk_size: usize) -> Option<Vec<u8>> {
    if *pos >= data.len() {
        return None;
    }
    let end = (*pos + chunk_size).min(data.len());
    let chunk = data[*pos..end].to_vec();
    *pos = end;
    Some(chunk)
}

/// Read until the chunk is full or end of file; a short final chunk is
/// normal, zero bytes means done.
fn fill_chunk(reader: &mut BufReader<File>, chunk_size: usize) -> std::io::Result<Option<Vec<u8>>> {
    let mut chunk = vec![0u8; chunk_size];
    let mut filled = 0;
    while filled < chunk_size {
        match reader.read(&mut chunk[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    if filled == 0 {
        return Ok(None);
    }
    chunk.truncate(filled);
    Ok(Some(chunk))
}

/// Counting gate bounding in-flight operations across both entry points.
struct OpGate {
    cap: usize,
    in_flight: Mutex<usize>,
    cv: Condvar,
}

impl OpGate {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            in_flight: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    fn acquire(self: &Arc<Self>) -> OpPermit {
        let mut count = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        while *count >= self.cap {
            count = self.cv.wait(count).unwrap_or_else(|e| e.into_inner());
        }
        *count += 1;
        OpPermit {
            gate: Arc::clone(self),
        }
    }
}

struct OpPermit {
    gate: Arc<OpGate>,
}

impl Drop for OpPermit {
    fn drop(&mut self) {
        let mut count = self
            .gate
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *count = count.saturating_sub(1);
        self.gate.cv.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReadErrorKind;
    use std::fs;
    use tempfile::TempDir;

    fn patterned_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_strategy_selection_by_size() {
        let manager = IoManager::new(IoConfig::default());
        assert_eq!(manager.select_strategy(500 * 1024), Strategy::Async);
        assert_eq!(manager.select_strategy(10 * 1024 * 1024), Strategy::Buffered);
        assert_eq!(
            manager.select_strategy(150 * 1024 * 1024),
            Strategy::Mapped
        );
    }

    #[test]
    fn test_strategy_selection_boundaries() {
        let manager = IoManager::new(IoConfig::default());
        assert_eq!(manager.select_strategy(0), Strategy::Async);
        assert_eq!(manager.select_strategy(1024 * 1024 - 1), Strategy::Async);
        assert_eq!(manager.select_strategy(1024 * 1024), Strategy::Buffered);
        assert_eq!(
            manager.select_strategy(100 * 1024 * 1024),
            Strategy::Mapped
        );
    }

    #[test]
    fn test_read_whole_small_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "small.bin", b"hello scanner");
        let manager = IoManager::new(IoConfig::default());
        let bytes = manager.read_whole(&path).unwrap();
        assert_eq!(bytes, b"hello scanner");
    }

    #[test]
    fn test_read_whole_missing_file() {
        let dir = TempDir::new().unwrap();
        let manager = IoManager::new(IoConfig::default());
        let err = manager.read_whole(&dir.path().join("nope.bin")).unwrap_err();
        assert_eq!(err.kind, ReadErrorKind::NotFound);
    }

    #[test]
    fn test_empty_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "empty.bin", b"");
        let manager = IoManager::new(IoConfig::default());

        assert!(manager.read_whole(&path).unwrap().is_empty());

        let chunks: Vec<_> = manager.stream_chunks(&path).unwrap().collect();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_forced_strategy_round_trip() {
        let dir = TempDir::new().unwrap();
        let content = patterned_bytes(9000);
        let path = write_file(&dir, "forced.bin", &content);
        let manager = IoManager::new(IoConfig::default());

        for strategy in [Strategy::Async, Strategy::Buffered, Strategy::Mapped] {
            assert_eq!(manager.read_with(&path, strategy).unwrap(), content);
        }
    }

    #[test]
    fn test_stream_matches_whole_read() {
        // Shrunk thresholds exercise all three streaming sources without
        // writing 100 MiB to disk.
        let config = IoConfig {
            chunk_size: 1024,
            async_threshold_bytes: 4 * 1024,
            mapped_threshold_bytes: 64 * 1024,
            ..IoConfig::default()
        };
        let dir = TempDir::new().unwrap();
        let manager = IoManager::new(config);

        for (name, len, expected) in [
            ("tiny.bin", 3 * 1024, Strategy::Async),
            ("mid.bin", 20 * 1024 + 17, Strategy::Buffered),
            ("big.bin", 80 * 1024 + 5, Strategy::Mapped),
        ] {
            let content = patterned_bytes(len);
            let path = write_file(&dir, name, &content);

            let stream = manager.stream_chunks(&path).unwrap();
            assert_eq!(stream.strategy(), expected);

            let mut joined = Vec::new();
            for chunk in stream {
                joined.extend_from_slice(&chunk.unwrap());
            }
            assert_eq!(joined, manager.read_whole(&path).unwrap());
            assert_eq!(joined, content);
        }
    }

    #[test]
    fn test_chunk_sizes_are_uniform_except_last() {
        let config = IoConfig {
            chunk_size: 1000,
            async_threshold_bytes: 1,
            mapped_threshold_bytes: u64::MAX,
            ..IoConfig::default()
        };
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "chunky.bin", &patterned_bytes(3500));
        let manager = IoManager::new(config);

        let chunks: Vec<Vec<u8>> = manager
            .stream_chunks(&path)
            .unwrap()
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(chunks.len(), 4);
        assert!(chunks[..3].iter().all(|c| c.len() == 1000));
        assert_eq!(chunks[3].len(), 500);
    }

    #[test]
    fn test_stream_is_restartable() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "again.bin", &patterned_bytes(2048));
        let manager = IoManager::new(IoConfig::default());

        let first: Vec<u8> = manager
            .stream_chunks(&path)
            .unwrap()
            .flat_map(|c| c.unwrap())
            .collect();
        let second: Vec<u8> = manager
            .stream_chunks(&path)
            .unwrap()
            .flat_map(|c| c.unwrap())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_metrics_recorded_once_per_read() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "counted.bin", &patterned_bytes(512));
        let manager = IoManager::new(IoConfig::default());

        manager.read_whole(&path).unwrap();
        let snap = manager.metrics().snapshot();
        assert_eq!(snap.total_ops, 1);
        assert_eq!(snap.total_bytes, 512);
        assert_eq!(snap.async_ops, 1);

        // A fully consumed stream records once more, on drop.
        let stream = manager.stream_chunks(&path).unwrap();
        for chunk in stream {
            chunk.unwrap();
        }
        let snap = manager.metrics().snapshot();
        assert_eq!(snap.total_ops, 2);
        assert_eq!(snap.total_bytes, 1024);
    }

    #[test]
    fn test_abandoned_stream_records_partial_bytes() {
        let config = IoConfig {
            chunk_size: 256,
            async_threshold_bytes: 1,
            ..IoConfig::default()
        };
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "partial.bin", &patterned_bytes(1024));
        let manager = IoManager::new(config);

        let mut stream = manager.stream_chunks(&path).unwrap();
        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.len(), 256);
        drop(stream);

        let snap = manager.metrics().snapshot();
        assert_eq!(snap.total_ops, 1);
        assert_eq!(snap.total_bytes, 256);
    }

    #[test]
    fn test_concurrent_reads_respect_cap() {
        let config = IoConfig {
            max_concurrent_ops: 2,
            ..IoConfig::default()
        };
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "shared.bin", &patterned_bytes(4096));
        let manager = Arc::new(IoManager::new(config));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let path = path.clone();
                std::thread::spawn(move || manager.read_whole(&path).unwrap().len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 4096);
        }
        assert_eq!(manager.metrics().snapshot().total_ops, 8);
    }
}
