//! Error taxonomy for the scanning core
//!
//! Every fault here is per-operation: a failed read aborts only that file's
//! scan, a corrupt cache store falls back to an empty cache, and a failed
//! metrics sample leaves the worker pool at its last known good size.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a file could not be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadErrorKind {
    /// File does not exist (or vanished between metadata probe and open)
    NotFound,
    /// Process lacks permission to open or map the file
    PermissionDenied,
    /// Any other underlying I/O fault
    Io,
}

impl ReadErrorKind {
    fn classify(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => ReadErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ReadErrorKind::PermissionDenied,
            _ => ReadErrorKind::Io,
        }
    }
}

/// A file was inaccessible or an I/O fault occurred mid-read.
///
/// Always identifies the path; a read never returns partial data with a
/// success indication.
#[derive(Debug, Error)]
#[error("failed to read {}: {kind:?}", .path.display())]
pub struct ReadError {
    pub path: PathBuf,
    pub kind: ReadErrorKind,
    #[source]
    pub source: io::Error,
}

impl ReadError {
    pub fn new(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let kind = ReadErrorKind::classify(source.kind());
        Self {
            path: path.into(),
            kind,
            source,
        }
    }
}

/// The persisted cache store is malformed or unreadable.
///
/// Recovered locally: the cache falls back to empty and scanning continues
/// without previously persisted results.
#[derive(Debug, Error)]
#[error("cache store corrupted: {reason}")]
pub struct CacheCorruptionError {
    pub reason: String,
}

impl CacheCorruptionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// System metrics could not be sampled (platform API failure).
///
/// The worker pool holds its last known good size and never scales on a
/// failed sample.
#[derive(Debug, Error)]
#[error("system metrics unavailable: {reason}")]
pub struct MetricsSamplingError {
    pub reason: String,
}

impl MetricsSamplingError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// `acquire` gave up waiting for a worker slot.
#[derive(Debug, Error)]
#[error("timed out after {waited:?} waiting for a worker slot")]
pub struct AcquireTimeout {
    pub waited: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_classification() {
        let err = ReadError::new("/tmp/missing", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.kind, ReadErrorKind::NotFound);

        let err = ReadError::new(
            "/root/secret",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.kind, ReadErrorKind::PermissionDenied);

        let err = ReadError::new("/dev/faulty", io::Error::from(io::ErrorKind::UnexpectedEof));
        assert_eq!(err.kind, ReadErrorKind::Io);
    }

    #[test]
    fn test_read_error_includes_path() {
        let err = ReadError::new("/tmp/gone.bin", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.to_string().contains("/tmp/gone.bin"));
    }
}
