//! Sync engine: reconciles the model index against the live filesystem.
//!
//! The diff between the live listing and the recorded locations is computed
//! by [`plan_sync`], a pure function, so the reconciliation logic is
//! testable without a filesystem. The engine then quick-hashes changed
//! files on a bounded worker pool, collects every result, and applies all
//! mutations in one store transaction.

use crate::config::{PathsConfig, SyncConfig};
use crate::index::{ModelIndexStore, ModelLocation, ModelRecord, SyncBatch, UpsertLocation};
use crate::library::hashing::Hasher;
use crate::library::scanner::{scan, ScanFilter, ScannedFile};
use crate::{AtelierError, Result};
use fs2::FileExt;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A per-file failure collected during a bulk operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncError {
    pub path: Option<PathBuf>,
    pub message: String,
}

/// Counts reported by one sync run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// New records created.
    pub created: usize,
    /// Locations added to records that already existed (dedup discovered).
    pub merged: usize,
    /// Locations removed because their path no longer resolves to a file.
    pub removed_locations: usize,
    /// Records deleted (zero locations and zero sources left).
    pub deleted_records: usize,
    /// Live paths left untouched.
    pub unchanged: usize,
    /// Per-file failures; the run itself still completes.
    pub errors: Vec<SyncError>,
}

impl SyncReport {
    /// True when the run observed no filesystem drift at all.
    pub fn is_noop(&self) -> bool {
        self.created == 0
            && self.merged == 0
            && self.removed_locations == 0
            && self.deleted_records == 0
    }
}

/// The three-way diff between a live listing and recorded locations.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// Live paths whose recorded mtime matches: hashing skipped, the
    /// recorded hash is reused.
    ///
    /// This is a performance shortcut, not a correctness guarantee: a
    /// changed file with an unchanged mtime (archive extraction, forged
    /// timestamps) is missed. Accepted limitation.
    pub unchanged: Vec<(ScannedFile, String)>,
    /// Live paths that need hashing (new, or mtime drifted).
    pub to_hash: Vec<ScannedFile>,
    /// Recorded paths no longer present in the live listing.
    pub removed: Vec<PathBuf>,
}

/// Compute the sync diff. Pure function of its inputs.
///
/// `recorded` must already be restricted to locations under the scanned
/// root; the caller decides the scope so that scanning a side directory
/// never removes locations recorded elsewhere.
pub fn plan_sync(live: &[ScannedFile], recorded: &[ModelLocation]) -> SyncPlan {
    let recorded_by_path: HashMap<&Path, &ModelLocation> = recorded
        .iter()
        .map(|loc| (loc.path.as_path(), loc))
        .collect();

    let mut plan = SyncPlan::default();
    let mut seen: std::collections::HashSet<&Path> = std::collections::HashSet::new();

    for file in live {
        seen.insert(file.path.as_path());
        match recorded_by_path.get(file.path.as_path()) {
            Some(loc) if loc.mtime_ms == file.mtime_ms => {
                plan.unchanged.push((file.clone(), loc.hash.clone()));
            }
            _ => plan.to_hash.push(file.clone()),
        }
    }

    for loc in recorded {
        if !seen.contains(loc.path.as_path()) {
            plan.removed.push(loc.path.clone());
        }
    }

    plan
}

/// A record the current run can merge into: either already persisted or
/// created earlier in the same run.
struct MergeCandidate {
    hash: String,
    strong_hash: Option<String>,
    /// A path whose bytes back this record, for lazy strong-hash
    /// computation. Absent for "known but absent" records.
    sample_path: Option<PathBuf>,
}

impl MergeCandidate {
    fn from_record(record: &ModelRecord) -> Self {
        let sample_path = record
            .locations
            .iter()
            .map(|l| l.path.clone())
            .find(|p| p.exists());
        Self {
            hash: record.hash.clone(),
            strong_hash: record.strong_hash.clone(),
            sample_path,
        }
    }
}

/// Reconciles the model index against a directory tree.
pub struct SyncEngine {
    store: Arc<ModelIndexStore>,
    hasher: Hasher,
    workers: usize,
    filter: ScanFilter,
}

impl SyncEngine {
    pub fn new(store: Arc<ModelIndexStore>) -> Self {
        Self {
            store,
            hasher: Hasher::default(),
            workers: SyncConfig::default_hash_workers(),
            filter: ScanFilter::default(),
        }
    }

    /// Override the hasher (sample length).
    pub fn with_hasher(mut self, hasher: Hasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Override the hashing pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Override the scan filter.
    pub fn with_filter(mut self, filter: ScanFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Reconcile the index against `root`.
    ///
    /// Holds an exclusive advisory lock for the duration of the run; a
    /// second sync against the same index fails fast with
    /// `SyncInProgress`. Reads may proceed concurrently and observe the
    /// pre-run state until the single commit at the end.
    pub async fn sync(&self, root: &Path) -> Result<SyncReport> {
        let _lock = self.acquire_run_lock(root)?;
        info!("Syncing model index against {}", root.display());

        let mut report = SyncReport::default();

        // 1. Live listing
        let (live, scan_errors) = self.scan_root(root).await?;
        for err in scan_errors {
            report.errors.push(err);
        }

        // 2. Recorded locations under this root
        let recorded: Vec<ModelLocation> = self
            .store
            .all_locations()?
            .into_iter()
            .filter(|loc| loc.path.starts_with(root))
            .collect();

        // 3. Pure diff
        let plan = plan_sync(&live, &recorded);
        report.unchanged = plan.unchanged.len();
        debug!(
            "Sync plan: {} unchanged, {} to hash, {} removed",
            plan.unchanged.len(),
            plan.to_hash.len(),
            plan.removed.len()
        );

        // 4. Hash everything first; no store mutation happens until every
        //    outstanding hash result has been collected.
        let hashed = self.quick_hash_all(plan.to_hash, &mut report).await;

        // 5. Arbitrate and build the batch
        let recorded_by_path: HashMap<PathBuf, String> = recorded
            .iter()
            .map(|loc| (loc.path.clone(), loc.hash.clone()))
            .collect();
        let mut batch = SyncBatch::default();
        let mut candidates: HashMap<String, Vec<MergeCandidate>> = HashMap::new();

        for (file, quick_hash) in hashed {
            match self
                .resolve_record(&file, &quick_hash, &recorded_by_path, &mut candidates)
                .await
            {
                Ok(Resolution::Unchanged(upsert)) => {
                    report.unchanged += 1;
                    batch.upserts.push(upsert);
                }
                Ok(Resolution::Upsert(upsert)) => batch.upserts.push(upsert),
                Err(e) => report.errors.push(SyncError {
                    path: Some(file.path.clone()),
                    message: e.to_string(),
                }),
            }
        }

        batch.removals = plan.removed;
        batch.touched = plan
            .unchanged
            .iter()
            .map(|(_, hash)| hash.clone())
            .collect();

        // 6. One transaction; an interrupted run never leaves a
        //    half-written record.
        let outcome = self.store.apply_batch(&batch)?;
        report.created = outcome.created;
        report.merged = outcome.merged;
        report.removed_locations = outcome.removed_locations;
        report.deleted_records = outcome.deleted_records;

        info!(
            "Sync complete: {} created, {} merged, {} removed, {} deleted, {} unchanged, {} errors",
            report.created,
            report.merged,
            report.removed_locations,
            report.deleted_records,
            report.unchanged,
            report.errors.len()
        );
        Ok(report)
    }

    fn acquire_run_lock(&self, root: &Path) -> Result<std::fs::File> {
        let lock_path = self
            .store
            .db_path()
            .parent()
            .map(|p| p.join(PathsConfig::SYNC_LOCK_NAME))
            .unwrap_or_else(|| PathBuf::from(PathsConfig::SYNC_LOCK_NAME));
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| AtelierError::io_with_path(e, &lock_path))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| AtelierError::SyncInProgress {
                root: root.to_path_buf(),
            })?;
        Ok(lock_file)
    }

    async fn scan_root(&self, root: &Path) -> Result<(Vec<ScannedFile>, Vec<SyncError>)> {
        let root = root.to_path_buf();
        let filter = self.filter.clone();
        tokio::task::spawn_blocking(move || {
            let mut live = Vec::new();
            let mut errors = Vec::new();
            for item in scan(&root, &filter) {
                match item {
                    Ok(file) => live.push(file),
                    Err(e) => errors.push(SyncError {
                        path: None,
                        message: e.to_string(),
                    }),
                }
            }
            (live, errors)
        })
        .await
        .map_err(|e| AtelierError::Other(format!("Scan task failed: {}", e)))
    }

    /// Quick-hash files on the bounded worker pool. Failures are recorded
    /// per file; the run continues.
    async fn quick_hash_all(
        &self,
        files: Vec<ScannedFile>,
        report: &mut SyncReport,
    ) -> Vec<(ScannedFile, String)> {
        let hasher = self.hasher;
        let results: Vec<(ScannedFile, Result<String>)> = stream::iter(files)
            .map(|file| async move {
                let path = file.path.clone();
                let result = tokio::task::spawn_blocking(move || hasher.quick_hash(&path))
                    .await
                    .unwrap_or_else(|e| {
                        Err(AtelierError::Other(format!("Hash task failed: {}", e)))
                    });
                (file, result)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut hashed = Vec::new();
        for (file, result) in results {
            match result {
                Ok(hash) => hashed.push((file, hash)),
                Err(e) => {
                    warn!("Failed to hash {}: {}", file.path.display(), e);
                    report.errors.push(SyncError {
                        path: Some(file.path.clone()),
                        message: e.to_string(),
                    });
                }
            }
        }
        hashed
    }

    /// Decide which record a freshly-hashed file belongs to.
    async fn resolve_record(
        &self,
        file: &ScannedFile,
        quick_hash: &str,
        recorded_by_path: &HashMap<PathBuf, String>,
        candidates: &mut HashMap<String, Vec<MergeCandidate>>,
    ) -> Result<Resolution> {
        // First sight of this quick hash in the run: pull persisted matches.
        if !candidates.contains_key(quick_hash) {
            let existing = self
                .store
                .lookup_by_quick_hash(quick_hash)?
                .iter()
                .map(MergeCandidate::from_record)
                .collect();
            candidates.insert(quick_hash.to_string(), existing);
        }

        // A re-hash of a path that still resolves to its recorded record is
        // a content-unchanged mtime drift, not a dedup event.
        if let Some(prior_hash) = recorded_by_path.get(&file.path) {
            let list = candidates.get(quick_hash).unwrap();
            if list.iter().any(|c| &c.hash == prior_hash) {
                return Ok(Resolution::Unchanged(UpsertLocation {
                    hash: prior_hash.clone(),
                    quick_hash: quick_hash.to_string(),
                    strong_hash: None,
                    path: file.path.clone(),
                    mtime_ms: file.mtime_ms,
                    size: file.size,
                    category: file.category.clone(),
                }));
            }
        }

        let list = candidates.get_mut(quick_hash).unwrap();
        if list.is_empty() {
            // Brand new content.
            let upsert = UpsertLocation {
                hash: quick_hash.to_string(),
                quick_hash: quick_hash.to_string(),
                strong_hash: None,
                path: file.path.clone(),
                mtime_ms: file.mtime_ms,
                size: file.size,
                category: file.category.clone(),
            };
            list.push(MergeCandidate {
                hash: quick_hash.to_string(),
                strong_hash: None,
                sample_path: Some(file.path.clone()),
            });
            return Ok(Resolution::Upsert(upsert));
        }

        // Quick-hash match against other files: arbitration. The quick hash
        // digests header, footer and size, so no cheap signal separates a
        // true duplicate from a collision; the strong hash decides.
        let new_strong = self.strong_of(&file.path).await?;

        for candidate in list.iter_mut() {
            let candidate_strong = match &candidate.strong_hash {
                Some(s) => Some(s.clone()),
                None => match &candidate.sample_path {
                    Some(sample) => {
                        let s = self.strong_of(sample).await?;
                        candidate.strong_hash = Some(s.clone());
                        self.store.set_strong_hash(&candidate.hash, &s)?;
                        Some(s)
                    }
                    // Known-but-absent record with no bytes anywhere to
                    // arbitrate against: trust the quick hash and merge.
                    None => None,
                },
            };

            if candidate_strong.is_none() || candidate_strong.as_deref() == Some(new_strong.as_str()) {
                return Ok(Resolution::Upsert(UpsertLocation {
                    hash: candidate.hash.clone(),
                    quick_hash: quick_hash.to_string(),
                    strong_hash: Some(new_strong),
                    path: file.path.clone(),
                    mtime_ms: file.mtime_ms,
                    size: file.size,
                    category: file.category.clone(),
                }));
            }
        }

        // A genuine collision: same sampled regions, different bytes. The
        // newcomer is keyed by its strong hash.
        debug!(
            "Quick-hash collision on {}: keying {} by strong hash",
            quick_hash,
            file.path.display()
        );
        let upsert = UpsertLocation {
            hash: new_strong.clone(),
            quick_hash: quick_hash.to_string(),
            strong_hash: Some(new_strong.clone()),
            path: file.path.clone(),
            mtime_ms: file.mtime_ms,
            size: file.size,
            category: file.category.clone(),
        };
        list.push(MergeCandidate {
            hash: new_strong.clone(),
            strong_hash: Some(new_strong),
            sample_path: Some(file.path.clone()),
        });
        Ok(Resolution::Upsert(upsert))
    }

    async fn strong_of(&self, path: &Path) -> Result<String> {
        let hasher = self.hasher;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || hasher.strong_hash(&path))
            .await
            .unwrap_or_else(|e| Err(AtelierError::Other(format!("Hash task failed: {}", e))))
    }
}

enum Resolution {
    /// Same content as before, only the mtime moved.
    Unchanged(UpsertLocation),
    /// New or merged location.
    Upsert(UpsertLocation),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ModelCategory;

    fn file(path: &str, mtime: i64) -> ScannedFile {
        ScannedFile {
            path: PathBuf::from(path),
            size: 100,
            mtime_ms: mtime,
            category: ModelCategory::Checkpoints,
        }
    }

    fn location(path: &str, hash: &str, mtime: i64) -> ModelLocation {
        ModelLocation {
            path: PathBuf::from(path),
            hash: hash.to_string(),
            mtime_ms: mtime,
        }
    }

    #[test]
    fn test_plan_unchanged_when_mtime_matches() {
        let live = vec![file("/m/a", 100)];
        let recorded = vec![location("/m/a", "aaaa", 100)];

        let plan = plan_sync(&live, &recorded);
        assert_eq!(plan.unchanged.len(), 1);
        assert_eq!(plan.unchanged[0].1, "aaaa");
        assert!(plan.to_hash.is_empty());
        assert!(plan.removed.is_empty());
    }

    #[test]
    fn test_plan_hashes_new_and_drifted() {
        let live = vec![file("/m/a", 100), file("/m/b", 50)];
        let recorded = vec![location("/m/a", "aaaa", 99)];

        let plan = plan_sync(&live, &recorded);
        assert!(plan.unchanged.is_empty());
        assert_eq!(plan.to_hash.len(), 2);
    }

    #[test]
    fn test_plan_removes_missing_paths() {
        let live = vec![];
        let recorded = vec![location("/m/gone", "aaaa", 100)];

        let plan = plan_sync(&live, &recorded);
        assert_eq!(plan.removed, vec![PathBuf::from("/m/gone")]);
    }

    #[test]
    fn test_plan_is_pure_and_complete() {
        let live = vec![file("/m/keep", 1), file("/m/new", 2), file("/m/touch", 3)];
        let recorded = vec![
            location("/m/keep", "k", 1),
            location("/m/touch", "t", 2),
            location("/m/gone", "g", 9),
        ];

        let plan = plan_sync(&live, &recorded);
        assert_eq!(plan.unchanged.len(), 1);
        assert_eq!(plan.to_hash.len(), 2);
        assert_eq!(plan.removed.len(), 1);
        // Every live path is accounted for exactly once.
        assert_eq!(plan.unchanged.len() + plan.to_hash.len(), live.len());
    }
}
