//! SQLite persistence for cached verdicts

use crate::error::CacheCorruptionError;
use crate::verdict_cache::entry::{CacheEntry, Verdict};
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tracing::warn;

const SCHEMA_VERSION: i32 = 1;

/// Durable store for cache entries.
pub struct CacheStore {
    db: Connection,
    path: PathBuf,
}

impl CacheStore {
    /// Open or create the store at the given path.
    ///
    /// A database file that cannot be initialized is backed up, removed,
    /// and recreated empty; previously persisted verdicts are lost but the
    /// store stays usable.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create store directory: {}", parent.display())
            })?;
        }

        match Self::open_and_init(path) {
            Ok(store) => Ok(store),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "cache store unusable, backing up and recreating"
                );
                let backup_path = path.with_extension("db.backup");
                let _ = std::fs::copy(path, &backup_path);
                let _ = std::fs::remove_file(path);
                Self::open_and_init(path).with_context(|| "Failed to recreate cache store")
            }
        }
    }

    fn open_and_init(path: &Path) -> Result<Self> {
        let mut store = Self::open_at(path)?;
        store.init_schema()?;
        Ok(store)
    }

    fn open_at(path: &Path) -> Result<Self> {
        let db = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // WAL allows statistics readers while a save is in progress
        db.pragma_update(None, "journal_mode", "WAL")
            .with_context(|| "Failed to enable WAL mode")?;
        db.busy_timeout(std::time::Duration::from_secs(30))
            .with_context(|| "Failed to set busy timeout")?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    fn init_schema(&mut self) -> Result<()> {
        let version: i32 = self
            .db
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .or_else(|_| {
                self.db.execute(
                    "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
                    [],
                )?;
                self.db
                    .execute("INSERT INTO schema_version (version) VALUES (0)", [])?;
                Ok::<i32, rusqlite::Error>(0)
            })?;

        if version < SCHEMA_VERSION {
            self.migrate_schema(version)?;
        }

        Ok(())
    }

    fn migrate_schema(&mut self, from_version: i32) -> Result<()> {
        let tx = self
            .db
            .transaction()
            .with_context(|| "Failed to start migration transaction")?;

        if from_version == 0 {
            tx.execute(
                "CREATE TABLE IF NOT EXISTS verdict_entries (
                    key TEXT PRIMARY KEY,
                    source_path TEXT NOT NULL,
                    verdict TEXT NOT NULL,
                    threat_name TEXT,
                    threat_level REAL NOT NULL,
                    engine TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    signature_version TEXT NOT NULL,
                    file_size INTEGER NOT NULL,
                    mtime_secs INTEGER NOT NULL,
                    mtime_nsecs INTEGER NOT NULL,
                    access_count INTEGER NOT NULL
                )",
                [],
            )
            .with_context(|| "Failed to create verdict_entries table")?;

            tx.execute(
                "CREATE INDEX IF NOT EXISTS idx_signature_version
                 ON verdict_entries(signature_version)",
                [],
            )
            .with_context(|| "Failed to create signature_version index")?;
            tx.execute(
                "CREATE INDEX IF NOT EXISTS idx_created_at ON verdict_entries(created_at)",
                [],
            )
            .with_context(|| "Failed to create created_at index")?;

            tx.execute("UPDATE schema_version SET version = ?1", [SCHEMA_VERSION])
                .with_context(|| "Failed to update schema version")?;
        }

        tx.commit()
            .with_context(|| "Failed to commit migration transaction")?;
        Ok(())
    }

    /// Replace the persisted rows with the given entries, atomically.
    pub fn save_entries(&mut self, entries: &[CacheEntry]) -> Result<usize> {
        let tx = self
            .db
            .transaction()
            .with_context(|| "Failed to start save transaction")?;

        tx.execute("DELETE FROM verdict_entries", [])
            .with_context(|| "Failed to clear previous rows")?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO verdict_entries (
                        key, source_path, verdict, threat_name, threat_level, engine,
                        created_at, signature_version, file_size, mtime_secs, mtime_nsecs,
                        access_count
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )
                .with_context(|| "Failed to prepare insert")?;

            for entry in entries {
                stmt.execute(params![
                    entry.key,
                    entry.source_path.to_string_lossy(),
                    entry.verdict.as_str(),
                    entry.threat_name,
                    entry.threat_level as f64,
                    entry.engine,
                    entry.created_at,
                    entry.signature_version,
                    entry.file_size as i64,
                    entry.mtime_secs,
                    entry.mtime_nsecs,
                    entry.access_count as i64,
                ])
                .with_context(|| format!("Failed to persist entry {}", entry.key))?;
            }
        }

        tx.commit().with_context(|| "Failed to commit save")?;
        Ok(entries.len())
    }

    /// Read back every persisted row. Individually malformed rows are
    /// skipped with a warning; a store that cannot be queried at all is
    /// reported as corruption for the cache to recover from.
    pub fn load_entries(&self) -> std::result::Result<Vec<CacheEntry>, CacheCorruptionError> {
        let mut stmt = self
            .db
            .prepare(
                "SELECT key, source_path, verdict, threat_name, threat_level, engine,
                        created_at, signature_version, file_size, mtime_secs, mtime_nsecs,
                        access_count
                 FROM verdict_entries",
            )
            .map_err(|e| CacheCorruptionError::new(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, i64>(8)?,
                    row.get::<_, i64>(9)?,
                    row.get::<_, i64>(10)?,
                    row.get::<_, i64>(11)?,
                ))
            })
            .map_err(|e| CacheCorruptionError::new(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let (
                key,
                source_path,
                verdict,
                threat_name,
                threat_level,
                engine,
                created_at,
                signature_version,
                file_size,
                mtime_secs,
                mtime_nsecs,
                access_count,
            ) = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "skipping malformed cache row");
                    continue;
                }
            };

            let Some(verdict) = Verdict::parse(&verdict) else {
                warn!(key, verdict, "skipping row with unknown verdict");
                continue;
            };

            entries.push(CacheEntry {
                key,
                source_path: PathBuf::from(source_path),
                verdict,
                threat_name,
                threat_level: threat_level as f32,
                engine,
                created_at,
                signature_version,
                file_size: file_size.max(0) as u64,
                mtime_secs,
                mtime_nsecs,
                access_count: access_count.max(0) as u64,
            });
        }

        Ok(entries)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_entry(key: &str, verdict: Verdict) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            source_path: PathBuf::from(format!("/scans/{key}.bin")),
            verdict,
            threat_name: matches!(verdict, Verdict::Infected)
                .then(|| "EICAR-Test-File".to_string()),
            threat_level: 0.9,
            engine: "signature-db".to_string(),
            created_at: chrono::Utc::now().timestamp(),
            signature_version: "2026.08.1".to_string(),
            file_size: 1337,
            mtime_secs: 1_700_000_000,
            mtime_nsecs: 42,
            access_count: 3,
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut store = CacheStore::open(&dir.path().join("verdicts.db")).unwrap();

        let entries = vec![
            sample_entry("aaa", Verdict::Clean),
            sample_entry("bbb", Verdict::Infected),
        ];
        assert_eq!(store.save_entries(&entries).unwrap(), 2);

        let mut loaded = store.load_entries().unwrap();
        loaded.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(loaded, entries);
    }

    #[test]
    fn test_save_replaces_previous_rows() {
        let dir = TempDir::new().unwrap();
        let mut store = CacheStore::open(&dir.path().join("verdicts.db")).unwrap();

        store
            .save_entries(&[sample_entry("old", Verdict::Clean)])
            .unwrap();
        store
            .save_entries(&[sample_entry("new", Verdict::Suspicious)])
            .unwrap();

        let loaded = store.load_entries().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key, "new");
    }

    #[test]
    fn test_open_recovers_from_garbage_file() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("verdicts.db");
        std::fs::write(&db_path, b"this is not a sqlite database, not even close").unwrap();

        let store = CacheStore::open(&db_path).unwrap();
        assert!(store.load_entries().unwrap().is_empty());
        assert!(db_path.with_extension("db.backup").exists());
    }

    #[test]
    fn test_reopen_preserves_rows() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("verdicts.db");
        {
            let mut store = CacheStore::open(&db_path).unwrap();
            store
                .save_entries(&[sample_entry("persisted", Verdict::Clean)])
                .unwrap();
        }
        let store = CacheStore::open(&db_path).unwrap();
        assert_eq!(store.load_entries().unwrap().len(), 1);
    }
}
