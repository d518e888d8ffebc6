// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent fingerprint-aware cache
//!
//! Key→value store backed by one SQLite database per project. Every entry
//! declares the source files it was computed from; `get` revalidates those
//! fingerprints and returns a miss the moment any tracked file changed.
//! Staleness is never silently served.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

const CACHE_DIR_NAME: &str = ".scour";
const CACHE_FILE_NAME: &str = "cache.db";

/// Default age after which unread entries are reclaimed.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// `(path, mtime, size)` identity of a tracked file, with a blake3 content
/// hash as the comparison of record when the filesystem reports no mtime.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    path: String,
    mtime_ns: i64,
    size: i64,
    hash: String,
}

fn fingerprint_file(path: &Path) -> Option<Fingerprint> {
    let meta = fs::metadata(path).ok()?;
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    let hash = hash_file(path)?;
    Some(Fingerprint {
        path: path.to_string_lossy().into_owned(),
        mtime_ns,
        size: meta.len() as i64,
        hash,
    })
}

fn hash_file(path: &Path) -> Option<String> {
    use std::io::Read;

    let mut file = fs::File::open(path).ok()?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer).ok()?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Some(hasher.finalize().to_hex().to_string())
}

/// Shared cache handle. One connection per instance; the mutex serializes
/// writers while the instance itself is cloned behind an `Arc` into every
/// index.
pub struct FingerprintCache {
    conn: Mutex<Connection>,
}

impl FingerprintCache {
    /// Open (or create) the per-project store under `<root>/.scour/cache.db`.
    /// A corrupted database is deleted and rebuilt from empty; only an
    /// unwritable cache directory is a hard error.
    pub fn open(project_root: &Path) -> Result<Self> {
        let dir = project_root.join(CACHE_DIR_NAME);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
        let gitignore = dir.join(".gitignore");
        if !gitignore.exists() {
            let _ = fs::write(&gitignore, "*\n");
        }
        let cache = Self::open_at(&dir.join(CACHE_FILE_NAME))?;
        let removed = cache.cleanup(DEFAULT_MAX_AGE);
        if removed > 0 {
            debug!("cache cleanup reclaimed {} aged entries", removed);
        }
        Ok(cache)
    }

    /// Open a store at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = match Self::try_open(path) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(
                    "cache store {} unusable ({}); rebuilding from empty",
                    path.display(),
                    e
                );
                let _ = fs::remove_file(path);
                Self::try_open(path)
                    .with_context(|| format!("failed to rebuild cache at {}", path.display()))?
            }
        };
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Transient store for tests and cache-disabled runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory cache")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn try_open(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init_schema(&conn)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                 key         TEXT PRIMARY KEY,
                 value       TEXT NOT NULL,
                 created_at  INTEGER NOT NULL,
                 accessed_at INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS fingerprints (
                 key      TEXT NOT NULL,
                 path     TEXT NOT NULL,
                 mtime_ns INTEGER NOT NULL,
                 size     INTEGER NOT NULL,
                 hash     TEXT NOT NULL,
                 PRIMARY KEY (key, path)
             );",
        )
        .context("failed to initialize cache schema")?;
        Ok(())
    }

    /// Fetch a value. Returns `None` on miss, on any tracked-file change, or
    /// on any storage error (degraded to miss, never propagated).
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("cache entry '{}' undecodable ({}); dropping", key, e);
                self.invalidate(key);
                None
            }
        }
    }

    /// Store a value computed from `tracked_files`. Failures are logged and
    /// swallowed; the next `get` simply misses.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, tracked_files: &[&Path]) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("cache entry '{}' unencodable: {}", key, e);
                return;
            }
        };
        self.set_raw(key, &raw, tracked_files);
    }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        let conn = self.conn.lock().ok()?;
        match Self::get_inner(&conn, key) {
            Ok(value) => value,
            Err(e) => {
                warn!("cache get '{}' failed: {}", key, e);
                None
            }
        }
    }

    fn get_inner(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
        let value: Option<String> = conn
            .query_row("SELECT value FROM entries WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(value) = value else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT path, mtime_ns, size, hash FROM fingerprints WHERE key = ?1")?;
        let stored: Vec<Fingerprint> = stmt
            .query_map([key], |row| {
                Ok(Fingerprint {
                    path: row.get(0)?,
                    mtime_ns: row.get(1)?,
                    size: row.get(2)?,
                    hash: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        for fp in &stored {
            if is_stale(fp) {
                debug!("cache entry '{}' stale ({} changed)", key, fp.path);
                Self::delete_entry(conn, key)?;
                return Ok(None);
            }
        }

        conn.execute(
            "UPDATE entries SET accessed_at = ?1 WHERE key = ?2",
            params![chrono::Utc::now().timestamp(), key],
        )?;
        Ok(Some(value))
    }

    pub fn set_raw(&self, key: &str, value: &str, tracked_files: &[&Path]) {
        // Fingerprint outside the lock; a file vanishing mid-set makes the
        // entry untrackable, so skip the store entirely.
        let mut fingerprints = Vec::with_capacity(tracked_files.len());
        for path in tracked_files {
            match fingerprint_file(path) {
                Some(fp) => fingerprints.push(fp),
                None => {
                    debug!(
                        "not caching '{}': tracked file {} unreadable",
                        key,
                        path.display()
                    );
                    return;
                }
            }
        }

        let Ok(mut conn) = self.conn.lock() else {
            return;
        };
        if let Err(e) = Self::set_inner(&mut conn, key, value, &fingerprints) {
            warn!("cache set '{}' failed: {}", key, e);
        }
    }

    fn set_inner(
        conn: &mut Connection,
        key: &str,
        value: &str,
        fingerprints: &[Fingerprint],
    ) -> rusqlite::Result<()> {
        let now = chrono::Utc::now().timestamp();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO entries (key, value, created_at, accessed_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![key, value, now],
        )?;
        tx.execute("DELETE FROM fingerprints WHERE key = ?1", [key])?;
        for fp in fingerprints {
            tx.execute(
                "INSERT INTO fingerprints (key, path, mtime_ns, size, hash)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![key, fp.path, fp.mtime_ns, fp.size, fp.hash],
            )?;
        }
        tx.commit()
    }

    /// Explicitly drop one entry. Idempotent.
    pub fn invalidate(&self, key: &str) {
        let Ok(conn) = self.conn.lock() else {
            return;
        };
        if let Err(e) = Self::delete_entry(&conn, key) {
            warn!("cache invalidate '{}' failed: {}", key, e);
        }
    }

    fn delete_entry(conn: &Connection, key: &str) -> rusqlite::Result<()> {
        conn.execute("DELETE FROM entries WHERE key = ?1", [key])?;
        conn.execute("DELETE FROM fingerprints WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Delete entries not accessed within `max_age`. Returns the number of
    /// entries removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Utc::now().timestamp() - max_age.as_secs() as i64;
        let Ok(conn) = self.conn.lock() else {
            return 0;
        };
        let removed = conn
            .execute("DELETE FROM entries WHERE accessed_at < ?1", [cutoff])
            .unwrap_or_else(|e| {
                warn!("cache cleanup failed: {}", e);
                0
            });
        let _ = conn.execute(
            "DELETE FROM fingerprints WHERE key NOT IN (SELECT key FROM entries)",
            [],
        );
        removed
    }

    /// Number of live entries (diagnostics).
    pub fn len(&self) -> usize {
        let Ok(conn) = self.conn.lock() else {
            return 0;
        };
        conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A tracked file is stale when it is missing, or its `(mtime, size)` differs
/// from the stored fingerprint. When the stored mtime is 0 the content hash
/// decides instead.
fn is_stale(stored: &Fingerprint) -> bool {
    let path = Path::new(&stored.path);
    let Ok(meta) = fs::metadata(path) else {
        return true;
    };
    if meta.len() as i64 != stored.size {
        return true;
    }
    let current_mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    if stored.mtime_ns == 0 || current_mtime == 0 {
        return hash_file(path).map_or(true, |h| h != stored.hash);
    }
    current_mtime != stored.mtime_ns
}

/// Default cache location for a project root.
pub fn default_cache_path(project_root: &Path) -> PathBuf {
    project_root.join(CACHE_DIR_NAME).join(CACHE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_set_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let tracked = dir.path().join("src.py");
        touch(&tracked, "print('hi')\n");

        let cache = FingerprintCache::in_memory().unwrap();
        cache.set_json("k", &vec![1, 2, 3], &[&tracked]);
        assert_eq!(cache.get_json::<Vec<i32>>("k"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_get_misses_after_tracked_file_changes() {
        let dir = TempDir::new().unwrap();
        let tracked = dir.path().join("src.py");
        touch(&tracked, "v1");

        let cache = FingerprintCache::in_memory().unwrap();
        cache.set_json("k", &"payload", &[&tracked]);
        assert!(cache.get_json::<String>("k").is_some());

        // Different size guarantees a fingerprint mismatch regardless of
        // mtime granularity.
        touch(&tracked, "v2 with more bytes");
        assert_eq!(cache.get_json::<String>("k"), None);
        // The stale row is reclaimed, not resurrected.
        assert_eq!(cache.get_json::<String>("k"), None);
    }

    #[test]
    fn test_get_misses_when_tracked_file_deleted() {
        let dir = TempDir::new().unwrap();
        let tracked = dir.path().join("gone.py");
        touch(&tracked, "x");

        let cache = FingerprintCache::in_memory().unwrap();
        cache.set_json("k", &1u32, &[&tracked]);
        fs::remove_file(&tracked).unwrap();
        assert_eq!(cache.get_json::<u32>("k"), None);
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let cache = FingerprintCache::in_memory().unwrap();
        cache.set_json("k", &1u32, &[]);
        cache.invalidate("k");
        cache.invalidate("k");
        assert_eq!(cache.get_json::<u32>("k"), None);
    }

    #[test]
    fn test_cleanup_reclaims_old_entries() {
        let cache = FingerprintCache::in_memory().unwrap();
        cache.set_json("old", &1u32, &[]);
        // Zero max age: everything written before "now" is eligible once the
        // cutoff passes its accessed_at second.
        std::thread::sleep(Duration::from_millis(1100));
        let removed = cache.cleanup(Duration::ZERO);
        assert_eq!(removed, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_corrupt_store_is_rebuilt_from_empty() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("cache.db");
        fs::write(&db, "this is not a sqlite database, not even close").unwrap();

        let cache = FingerprintCache::open_at(&db).unwrap();
        assert!(cache.is_empty());
        cache.set_json("k", &1u32, &[]);
        assert_eq!(cache.get_json::<u32>("k"), Some(1));
    }

    #[test]
    fn test_reopen_survives_process_restart() {
        let dir = TempDir::new().unwrap();
        let tracked = dir.path().join("a.rs");
        touch(&tracked, "fn a() {}");
        let db = dir.path().join("cache.db");

        {
            let cache = FingerprintCache::open_at(&db).unwrap();
            cache.set_json("k", &"persisted", &[&tracked]);
        }
        let cache = FingerprintCache::open_at(&db).unwrap();
        assert_eq!(cache.get_json::<String>("k"), Some("persisted".to_string()));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let tracked = dir.path().join("a.rs");
        touch(&tracked, "fn a() {}");
        let cache = Arc::new(FingerprintCache::open(dir.path()).unwrap());
        cache.set_json("shared", &0u32, &[&tracked]);

        let mut handles = Vec::new();
        for i in 0..8u32 {
            let cache = Arc::clone(&cache);
            let tracked = tracked.clone();
            handles.push(std::thread::spawn(move || {
                if i % 2 == 0 {
                    cache.set_json(&format!("w{}", i), &i, &[&tracked]);
                } else {
                    let _ = cache.get_json::<u32>("shared");
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.get_json::<u32>("shared"), Some(0));
    }
}
