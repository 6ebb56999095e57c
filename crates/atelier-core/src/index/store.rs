//! SQLite-backed content-addressable model index.
//!
//! One record per distinct content hash; records own their on-disk
//! locations and download sources. Every mutating operation runs inside a
//! single transaction so a concurrent reader never observes a half-written
//! record.

use crate::index::types::{
    IndexStats, ModelCategory, ModelLocation, ModelRecord, ModelSource, RecordPage, SourceKind,
};
use crate::{AtelierError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A pending location upsert, produced by the sync engine or an import.
#[derive(Debug, Clone)]
pub struct UpsertLocation {
    /// Canonical record hash (quick hash, or strong hash after arbitration).
    pub hash: String,
    /// Sampled quick hash of the file.
    pub quick_hash: String,
    /// Full-file strong hash when arbitration computed one.
    pub strong_hash: Option<String>,
    pub path: PathBuf,
    pub mtime_ms: i64,
    pub size: u64,
    pub category: ModelCategory,
}

/// A batch of index mutations applied as one transaction.
#[derive(Debug, Clone, Default)]
pub struct SyncBatch {
    /// Locations to insert or refresh.
    pub upserts: Vec<UpsertLocation>,
    /// Paths whose recorded location should be dropped.
    pub removals: Vec<PathBuf>,
    /// Hashes observed unchanged, to refresh `last_seen`.
    pub touched: Vec<String>,
}

/// Counts produced by applying a [`SyncBatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records created by this batch.
    pub created: usize,
    /// Locations added to records that already existed.
    pub merged: usize,
    /// Locations removed.
    pub removed_locations: usize,
    /// Records deleted (no locations and no sources left).
    pub deleted_records: usize,
}

/// Persistent mapping from content hash to model record.
pub struct ModelIndexStore {
    db_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl ModelIndexStore {
    /// Create or open an index at the given database path.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AtelierError::io_with_path(e, parent))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        Self::configure_connection(&conn)?;
        Self::ensure_schema(&conn)?;

        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=30000;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            PRAGMA foreign_keys=ON;
            ",
        )?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS models (
                hash TEXT PRIMARY KEY,
                quick_hash TEXT NOT NULL,
                strong_hash TEXT,
                size INTEGER NOT NULL,
                category TEXT NOT NULL,
                last_seen TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS locations (
                path TEXT PRIMARY KEY,
                hash TEXT NOT NULL REFERENCES models(hash) ON DELETE CASCADE,
                file_name TEXT NOT NULL,
                mtime_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL,
                kind TEXT NOT NULL,
                locator TEXT NOT NULL,
                registered_at TEXT NOT NULL,
                UNIQUE(hash, kind, locator)
            );
            CREATE INDEX IF NOT EXISTS idx_locations_hash ON locations(hash);
            CREATE INDEX IF NOT EXISTS idx_locations_name ON locations(file_name);
            CREATE INDEX IF NOT EXISTS idx_models_quick ON models(quick_hash);
            CREATE INDEX IF NOT EXISTS idx_sources_hash ON sources(hash);
            ",
        )?;
        Ok(())
    }

    /// Get the database path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| AtelierError::Database {
            message: "Failed to acquire connection lock".to_string(),
            source: None,
        })
    }

    // ========================================
    // Queries
    // ========================================

    /// Look up a record by its canonical hash.
    pub fn lookup(&self, hash: &str) -> Result<Option<ModelRecord>> {
        let conn = self.lock()?;
        Self::load_record(&conn, hash)
    }

    /// Look up records by quick hash.
    ///
    /// More than one result means a proven quick-hash collision is already
    /// recorded (the loser was re-keyed under its strong hash).
    pub fn lookup_by_quick_hash(&self, quick_hash: &str) -> Result<Vec<ModelRecord>> {
        let conn = self.lock()?;
        let hashes: Vec<String> = {
            let mut stmt =
                conn.prepare("SELECT hash FROM models WHERE quick_hash = ?1 ORDER BY hash")?;
            let rows = stmt.query_map(params![quick_hash], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        hashes
            .iter()
            .filter_map(|h| Self::load_record(&conn, h).transpose())
            .collect()
    }

    /// Find records whose canonical hash starts with the given prefix.
    pub fn find_by_hash_prefix(&self, prefix: &str) -> Result<Vec<ModelRecord>> {
        let conn = self.lock()?;
        let pattern = format!("{}%", escape_like(prefix));
        let hashes: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT hash FROM models WHERE hash LIKE ?1 ESCAPE '\\' ORDER BY hash",
            )?;
            let rows = stmt.query_map(params![pattern], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        hashes
            .iter()
            .filter_map(|h| Self::load_record(&conn, h).transpose())
            .collect()
    }

    /// Find records where any location's filename contains the given
    /// substring (case-insensitive).
    pub fn find_by_name(&self, substring: &str) -> Result<Vec<ModelRecord>> {
        let conn = self.lock()?;
        let pattern = format!("%{}%", escape_like(&substring.to_lowercase()));
        let hashes: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT hash FROM locations
                 WHERE lower(file_name) LIKE ?1 ESCAPE '\\' ORDER BY hash",
            )?;
            let rows = stmt.query_map(params![pattern], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        hashes
            .iter()
            .filter_map(|h| Self::load_record(&conn, h).transpose())
            .collect()
    }

    /// List records ordered by hash, one page at a time.
    ///
    /// Keyset pagination: the token is the last hash of the previous page,
    /// so ordering stays stable across pages even under concurrent writes.
    pub fn list(&self, page_size: usize, page_token: Option<&str>) -> Result<RecordPage> {
        let conn = self.lock()?;
        let after = page_token.unwrap_or("");
        let hashes: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT hash FROM models WHERE hash > ?1 ORDER BY hash LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![after, page_size as i64], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        let next_page_token = if hashes.len() == page_size {
            hashes.last().cloned()
        } else {
            None
        };

        let records = hashes
            .iter()
            .filter_map(|h| Self::load_record(&conn, h).transpose())
            .collect::<Result<Vec<_>>>()?;

        Ok(RecordPage {
            records,
            next_page_token,
        })
    }

    /// Records with more than one on-disk location.
    pub fn duplicates(&self) -> Result<Vec<ModelRecord>> {
        let conn = self.lock()?;
        let hashes: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT hash FROM locations GROUP BY hash HAVING COUNT(*) > 1 ORDER BY hash",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        hashes
            .iter()
            .filter_map(|h| Self::load_record(&conn, h).transpose())
            .collect()
    }

    /// All recorded locations, for sync planning.
    pub fn all_locations(&self) -> Result<Vec<ModelLocation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT path, hash, mtime_ms FROM locations")?;
        let rows = stmt.query_map([], |row| {
            Ok(ModelLocation {
                path: PathBuf::from(row.get::<_, String>(0)?),
                hash: row.get(1)?,
                mtime_ms: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.lock()?;
        let (record_count, total_bytes): (u64, u64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM models",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let location_count: u64 =
            conn.query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?;
        let source_count: u64 =
            conn.query_row("SELECT COUNT(*) FROM sources", [], |row| row.get(0))?;
        Ok(IndexStats {
            record_count,
            location_count,
            source_count,
            total_bytes,
        })
    }

    // ========================================
    // Mutations
    // ========================================

    /// Insert or refresh a single location.
    pub fn upsert_location(&self, upsert: &UpsertLocation) -> Result<BatchOutcome> {
        self.apply_batch(&SyncBatch {
            upserts: vec![upsert.clone()],
            ..Default::default()
        })
    }

    /// Remove a location by path, pruning the record if it has no locations
    /// and no sources left.
    pub fn remove_location(&self, path: &Path) -> Result<BatchOutcome> {
        self.apply_batch(&SyncBatch {
            removals: vec![path.to_path_buf()],
            ..Default::default()
        })
    }

    /// Ensure a record exists for a hash with no on-disk location yet
    /// ("known but absent", e.g. registered from an imported bundle).
    pub fn ensure_record(
        &self,
        hash: &str,
        size: u64,
        category: &ModelCategory,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO models (hash, quick_hash, strong_hash, size, category, last_seen)
             VALUES (?1, ?1, NULL, ?2, ?3, ?4)
             ON CONFLICT(hash) DO NOTHING",
            params![hash, size as i64, category.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Register a download source against a hash.
    ///
    /// Creates a "known but absent" record when the hash is new to the
    /// index. Duplicate sources are ignored.
    pub fn add_source(&self, hash: &str, kind: SourceKind, locator: &str) -> Result<()> {
        if kind == SourceKind::Url {
            url::Url::parse(locator).map_err(|e| AtelierError::Validation {
                field: "source".to_string(),
                message: format!("invalid source url {}: {}", locator, e),
            })?;
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO models (hash, quick_hash, strong_hash, size, category, last_seen)
             VALUES (?1, ?1, NULL, 0, 'other', ?2)
             ON CONFLICT(hash) DO NOTHING",
            params![hash, Utc::now().to_rfc3339()],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO sources (hash, kind, locator, registered_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![hash, kind.as_str(), locator, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        debug!("Registered {} source for {}", kind.as_str(), hash);
        Ok(())
    }

    /// Record a lazily-computed strong hash on an existing record.
    pub fn set_strong_hash(&self, hash: &str, strong_hash: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE models SET strong_hash = ?2 WHERE hash = ?1",
            params![hash, strong_hash],
        )?;
        Ok(())
    }

    /// Apply a batch of mutations as one transaction.
    ///
    /// The transaction boundary is what guarantees an interrupted run never
    /// leaves a half-written record behind.
    pub fn apply_batch(&self, batch: &SyncBatch) -> Result<BatchOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut outcome = BatchOutcome::default();
        let now = Utc::now().to_rfc3339();

        for upsert in &batch.upserts {
            let existed: bool = tx
                .query_row(
                    "SELECT 1 FROM models WHERE hash = ?1",
                    params![upsert.hash],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            tx.execute(
                "INSERT INTO models (hash, quick_hash, strong_hash, size, category, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(hash) DO UPDATE SET
                     strong_hash = COALESCE(excluded.strong_hash, models.strong_hash),
                     size = excluded.size,
                     last_seen = excluded.last_seen",
                params![
                    upsert.hash,
                    upsert.quick_hash,
                    upsert.strong_hash,
                    upsert.size as i64,
                    upsert.category.as_str(),
                    now,
                ],
            )?;

            let file_name = upsert
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let path_str = upsert.path.to_string_lossy().to_string();
            let prior_owner: Option<String> = tx
                .query_row(
                    "SELECT hash FROM locations WHERE path = ?1",
                    params![path_str],
                    |row| row.get(0),
                )
                .optional()?;

            tx.execute(
                "INSERT INTO locations (path, hash, file_name, mtime_ms)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(path) DO UPDATE SET
                     hash = excluded.hash,
                     file_name = excluded.file_name,
                     mtime_ms = excluded.mtime_ms",
                params![path_str, upsert.hash, file_name, upsert.mtime_ms],
            )?;

            if !existed {
                outcome.created += 1;
            } else if prior_owner.is_none() {
                outcome.merged += 1;
            }

            // A path re-hashed to different content moves its location to
            // the new record; the old owner may now be empty.
            if let Some(prior) = prior_owner {
                if prior != upsert.hash && Self::prune_if_empty(&tx, &prior)? {
                    outcome.deleted_records += 1;
                }
            }
        }

        for path in &batch.removals {
            let path_str = path.to_string_lossy().to_string();
            let owner: Option<String> = tx
                .query_row(
                    "SELECT hash FROM locations WHERE path = ?1",
                    params![path_str],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(hash) = owner else { continue };
            tx.execute("DELETE FROM locations WHERE path = ?1", params![path_str])?;
            outcome.removed_locations += 1;

            if Self::prune_if_empty(&tx, &hash)? {
                outcome.deleted_records += 1;
            }
        }

        if !batch.touched.is_empty() {
            for hash in &batch.touched {
                tx.execute(
                    "UPDATE models SET last_seen = ?2 WHERE hash = ?1",
                    params![hash, now],
                )?;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// Delete a record that has neither locations nor sources.
    fn prune_if_empty(tx: &Transaction<'_>, hash: &str) -> Result<bool> {
        let locations: u64 = tx.query_row(
            "SELECT COUNT(*) FROM locations WHERE hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        let sources: u64 = tx.query_row(
            "SELECT COUNT(*) FROM sources WHERE hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;

        if locations == 0 && sources == 0 {
            tx.execute("DELETE FROM models WHERE hash = ?1", params![hash])?;
            debug!("Pruned record with no locations or sources: {}", hash);
            return Ok(true);
        }
        Ok(false)
    }

    // ========================================
    // Row hydration
    // ========================================

    fn load_record(conn: &Connection, hash: &str) -> Result<Option<ModelRecord>> {
        let base = conn
            .query_row(
                "SELECT hash, quick_hash, strong_hash, size, category, last_seen
                 FROM models WHERE hash = ?1",
                params![hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((hash, quick_hash, strong_hash, size, category, last_seen)) = base else {
            return Ok(None);
        };

        let locations = {
            let mut stmt = conn.prepare(
                "SELECT path, hash, mtime_ms FROM locations WHERE hash = ?1 ORDER BY path",
            )?;
            let rows = stmt.query_map(params![hash], |row| {
                Ok(ModelLocation {
                    path: PathBuf::from(row.get::<_, String>(0)?),
                    hash: row.get(1)?,
                    mtime_ms: row.get(2)?,
                })
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let sources = {
            let mut stmt = conn.prepare(
                "SELECT kind, locator, hash, registered_at FROM sources
                 WHERE hash = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![hash], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
                .into_iter()
                .map(|(kind, locator, hash, registered_at)| ModelSource {
                    kind: kind.parse().unwrap_or(SourceKind::Unspecified),
                    locator,
                    hash,
                    registered_at: parse_timestamp(&registered_at),
                })
                .collect()
        };

        Ok(Some(ModelRecord {
            hash,
            quick_hash,
            strong_hash,
            size: size as u64,
            category: category.parse().unwrap_or(ModelCategory::Other(category)),
            last_seen: parse_timestamp(&last_seen),
            locations,
            sources,
        }))
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Escape LIKE wildcards in user-supplied query fragments.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ModelIndexStore) {
        let dir = TempDir::new().unwrap();
        let store = ModelIndexStore::open(dir.path().join("models.db")).unwrap();
        (dir, store)
    }

    fn upsert(hash: &str, path: &str, size: u64) -> UpsertLocation {
        UpsertLocation {
            hash: hash.to_string(),
            quick_hash: hash.to_string(),
            strong_hash: None,
            path: PathBuf::from(path),
            mtime_ms: 1_700_000_000_000,
            size,
            category: ModelCategory::Checkpoints,
        }
    }

    #[test]
    fn test_upsert_and_lookup() {
        let (_dir, store) = store();
        let outcome = store
            .upsert_location(&upsert("aaaa", "/m/checkpoints/sd15.safetensors", 42))
            .unwrap();
        assert_eq!(outcome.created, 1);

        let record = store.lookup("aaaa").unwrap().unwrap();
        assert_eq!(record.size, 42);
        assert_eq!(record.locations.len(), 1);
        assert_eq!(record.display_name(), "sd15.safetensors");
    }

    #[test]
    fn test_same_hash_merges_locations() {
        let (_dir, store) = store();
        store
            .upsert_location(&upsert("aaaa", "/m/checkpoints/a.safetensors", 42))
            .unwrap();
        let outcome = store
            .upsert_location(&upsert("aaaa", "/m/checkpoints/copy.safetensors", 42))
            .unwrap();
        assert_eq!(outcome.created, 0);
        assert_eq!(outcome.merged, 1);

        let record = store.lookup("aaaa").unwrap().unwrap();
        assert_eq!(record.locations.len(), 2);
        assert_eq!(store.duplicates().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_last_location_prunes_without_sources() {
        let (_dir, store) = store();
        store
            .upsert_location(&upsert("aaaa", "/m/checkpoints/a.safetensors", 42))
            .unwrap();
        let outcome = store
            .remove_location(Path::new("/m/checkpoints/a.safetensors"))
            .unwrap();
        assert_eq!(outcome.removed_locations, 1);
        assert_eq!(outcome.deleted_records, 1);
        assert!(store.lookup("aaaa").unwrap().is_none());
    }

    #[test]
    fn test_sources_keep_absent_record_alive() {
        let (_dir, store) = store();
        store
            .upsert_location(&upsert("aaaa", "/m/checkpoints/a.safetensors", 42))
            .unwrap();
        store
            .add_source("aaaa", SourceKind::Url, "https://example.com/a.safetensors")
            .unwrap();

        let outcome = store
            .remove_location(Path::new("/m/checkpoints/a.safetensors"))
            .unwrap();
        assert_eq!(outcome.deleted_records, 0);

        let record = store.lookup("aaaa").unwrap().unwrap();
        assert!(record.locations.is_empty());
        assert_eq!(record.sources.len(), 1);
    }

    #[test]
    fn test_add_source_for_unknown_hash_creates_absent_record() {
        let (_dir, store) = store();
        store
            .add_source("ffff", SourceKind::Registry, "civitai:12345")
            .unwrap();
        let record = store.lookup("ffff").unwrap().unwrap();
        assert!(record.locations.is_empty());
        assert_eq!(record.sources[0].kind, SourceKind::Registry);
    }

    #[test]
    fn test_invalid_source_url_rejected() {
        let (_dir, store) = store();
        let err = store
            .add_source("ffff", SourceKind::Url, "not a url at all")
            .unwrap_err();
        assert!(matches!(err, AtelierError::Validation { .. }));
        // Registry ids are opaque, not URLs.
        store
            .add_source("ffff", SourceKind::Registry, "civitai:12345")
            .unwrap();
    }

    #[test]
    fn test_duplicate_source_ignored() {
        let (_dir, store) = store();
        store.add_source("ffff", SourceKind::Url, "https://x/a").unwrap();
        store.add_source("ffff", SourceKind::Url, "https://x/a").unwrap();
        assert_eq!(store.lookup("ffff").unwrap().unwrap().sources.len(), 1);
    }

    #[test]
    fn test_find_by_name_case_insensitive_substring() {
        let (_dir, store) = store();
        store
            .upsert_location(&upsert("aaaa", "/m/loras/Anime-Style-v2.safetensors", 1))
            .unwrap();
        store
            .upsert_location(&upsert("bbbb", "/m/vae/kl-f8.pt", 2))
            .unwrap();

        let hits = store.find_by_name("style").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].hash, "aaaa");

        // Substring matches anywhere in the filename, not just the start.
        let hits = store.find_by_name("f8").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].hash, "bbbb");
    }

    #[test]
    fn test_find_by_hash_prefix() {
        let (_dir, store) = store();
        store.upsert_location(&upsert("abc111", "/m/a", 1)).unwrap();
        store.upsert_location(&upsert("abd222", "/m/b", 1)).unwrap();

        let hits = store.find_by_hash_prefix("ab").unwrap();
        assert_eq!(hits.len(), 2);
        let hits = store.find_by_hash_prefix("abc").unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_list_keyset_pagination() {
        let (_dir, store) = store();
        for i in 0..5 {
            store
                .upsert_location(&upsert(&format!("h{}", i), &format!("/m/f{}", i), 1))
                .unwrap();
        }

        let page1 = store.list(2, None).unwrap();
        assert_eq!(page1.records.len(), 2);
        let token = page1.next_page_token.clone().unwrap();

        let page2 = store.list(2, Some(&token)).unwrap();
        assert_eq!(page2.records.len(), 2);
        assert!(page2.records[0].hash > page1.records[1].hash);

        let page3 = store.list(2, page2.next_page_token.as_deref()).unwrap();
        assert_eq!(page3.records.len(), 1);
        assert!(page3.next_page_token.is_none());
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = store();
        store.upsert_location(&upsert("aaaa", "/m/a", 10)).unwrap();
        store.upsert_location(&upsert("bbbb", "/m/b", 30)).unwrap();
        store.add_source("aaaa", SourceKind::Url, "https://x/a").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.record_count, 2);
        assert_eq!(stats.location_count, 2);
        assert_eq!(stats.source_count, 1);
        assert_eq!(stats.total_bytes, 40);
    }

    #[test]
    fn test_batch_is_atomic_per_call() {
        let (_dir, store) = store();
        store.upsert_location(&upsert("aaaa", "/m/a", 10)).unwrap();

        let batch = SyncBatch {
            upserts: vec![upsert("bbbb", "/m/b", 20)],
            removals: vec![PathBuf::from("/m/a")],
            touched: vec![],
        };
        let outcome = store.apply_batch(&batch).unwrap();
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.removed_locations, 1);
        assert_eq!(outcome.deleted_records, 1);
        assert!(store.lookup("aaaa").unwrap().is_none());
        assert!(store.lookup("bbbb").unwrap().is_some());
    }

    #[test]
    fn test_like_escaping() {
        let (_dir, store) = store();
        store
            .upsert_location(&upsert("aaaa", "/m/loras/100%_real.safetensors", 1))
            .unwrap();
        let hits = store.find_by_name("100%").unwrap();
        assert_eq!(hits.len(), 1);
        let hits = store.find_by_name("0%_r").unwrap();
        assert_eq!(hits.len(), 1);
    }
}
