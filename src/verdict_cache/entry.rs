//! Cache entries and file-identity key derivation

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// The scan engine's classification of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Clean,
    Infected,
    Suspicious,
    Error,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Clean => "clean",
            Verdict::Infected => "infected",
            Verdict::Suspicious => "suspicious",
            Verdict::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clean" => Some(Verdict::Clean),
            "infected" => Some(Verdict::Infected),
            "suspicious" => Some(Verdict::Suspicious),
            "error" => Some(Verdict::Error),
            _ => None,
        }
    }
}

/// One cached scan verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Opaque hash of the file identity (path + mtime)
    pub key: String,
    pub source_path: PathBuf,
    pub verdict: Verdict,
    pub threat_name: Option<String>,
    /// 0.0 (benign) to 1.0 (confirmed threat)
    pub threat_level: f32,
    /// Identifier of the engine that produced the verdict
    pub engine: String,
    /// Epoch seconds at insertion; drives TTL expiry
    pub created_at: i64,
    /// Definition version the verdict was computed against
    pub signature_version: String,
    pub file_size: u64,
    pub mtime_secs: i64,
    pub mtime_nsecs: i64,
    pub access_count: u64,
}

/// Transient identity of a file: normalized path plus modification time.
///
/// Chosen over content hashing because it is O(1) to derive and a changed
/// mtime yields a different key, so modification invalidates automatically.
/// Never stored beyond the derived hash.
#[derive(Debug, Clone)]
pub(crate) struct FileIdentity {
    pub path: String,
    pub size: u64,
    pub mtime_secs: i64,
    pub mtime_nsecs: i64,
}

impl FileIdentity {
    /// Probe a file's metadata and build its identity.
    pub fn probe(path: &Path) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let mtime = metadata.modified()?;
        let (mtime_secs, mtime_nsecs) = system_time_to_secs_nsecs(mtime);
        Ok(Self {
            path: normalize_path(path),
            size: metadata.len(),
            mtime_secs,
            mtime_nsecs,
        })
    }

    /// Opaque cache key: blake3 over the normalized path and mtime.
    pub fn cache_key(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.path.as_bytes());
        hasher.update(&self.mtime_secs.to_le_bytes());
        hasher.update(&self.mtime_nsecs.to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Normalize path for consistent storage and lookup.
/// On Windows, lowercases for case-insensitive matching.
pub(crate) fn normalize_path(path: &Path) -> String {
    #[cfg(windows)]
    {
        path.to_string_lossy().to_lowercase().replace('\\', "/")
    }
    #[cfg(not(windows))]
    {
        path.to_string_lossy().replace('\\', "/")
    }
}

/// Convert SystemTime to (seconds, nanoseconds) since the epoch.
pub(crate) fn system_time_to_secs_nsecs(time: SystemTime) -> (i64, i64) {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => (duration.as_secs() as i64, duration.subsec_nanos() as i64),
        Err(_) => (0, 0),
    }
}
