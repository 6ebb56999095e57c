//! Per-environment version history.
//!
//! The history lives under `.history/`: an append-only `commits.jsonl`
//! (one commit per line), a `HEAD` pointer file, and one snapshot
//! directory per commit holding the manifest, the opaque lockfile, and
//! every tracked workflow file. Snapshots are staged into a temp
//! directory and renamed into place, so a partially-written snapshot is
//! never referenced by the log.

use crate::metadata::atomic_write_bytes;
use crate::{AtelierError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const COMMITS_FILE: &str = "commits.jsonl";
const HEAD_FILE: &str = "HEAD";
const SNAPSHOTS_DIR: &str = "snapshots";

/// A unique commit identifier (UUID v4 as a string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable snapshot of the environment's declarative state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    /// Parent commit; `None` for the first commit.
    #[serde(rename = "parentId")]
    pub parent_id: Option<CommitId>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Model references that did not resolve in the index at commit time.
    /// Recorded explicitly, never silently dropped.
    #[serde(rename = "unresolvedModels", default)]
    pub unresolved_models: Vec<String>,
}

/// Ordering for [`History::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOrder {
    OldestFirst,
    NewestFirst,
}

/// The files captured by one commit, keyed by path relative to the
/// environment root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub files: BTreeMap<PathBuf, Vec<u8>>,
}

impl Snapshot {
    /// Read a snapshot back from a snapshot directory.
    pub fn read_from(dir: &Path) -> Result<Self> {
        let mut files = BTreeMap::new();
        for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| AtelierError::Other(format!("Snapshot path error: {}", e)))?
                .to_path_buf();
            let bytes = fs::read(entry.path())
                .map_err(|e| AtelierError::io_with_path(e, entry.path()))?;
            files.insert(relative, bytes);
        }
        Ok(Self { files })
    }

    fn write_to(&self, dir: &Path) -> Result<()> {
        for (relative, bytes) in &self.files {
            let path = dir.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| AtelierError::io_with_path(e, parent))?;
            }
            fs::write(&path, bytes).map_err(|e| AtelierError::io_with_path(e, &path))?;
        }
        Ok(())
    }
}

/// Append-only commit store for one environment.
#[derive(Debug, Clone)]
pub struct History {
    dir: PathBuf,
}

impl History {
    /// Open (creating if needed) the history at a `.history` directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(SNAPSHOTS_DIR))
            .map_err(|e| AtelierError::io_with_path(e, &dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn commits_path(&self) -> PathBuf {
        self.dir.join(COMMITS_FILE)
    }

    fn head_path(&self) -> PathBuf {
        self.dir.join(HEAD_FILE)
    }

    /// Directory of one commit's snapshot.
    pub fn snapshot_dir(&self, id: &CommitId) -> PathBuf {
        self.dir.join(SNAPSHOTS_DIR).join(id.as_str())
    }

    /// The full commit sequence in log order (oldest first on disk).
    pub fn commits(&self) -> Result<Vec<Commit>> {
        let path = self.commits_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path).map_err(|e| AtelierError::io_with_path(e, &path))?;
        let mut commits = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| AtelierError::io_with_path(e, &path))?;
            if line.trim().is_empty() {
                continue;
            }
            commits.push(serde_json::from_str(&line)?);
        }
        Ok(commits)
    }

    /// The commit sequence in the requested order.
    pub fn log(&self, order: LogOrder) -> Result<Vec<Commit>> {
        let mut commits = self.commits()?;
        if order == LogOrder::NewestFirst {
            commits.reverse();
        }
        Ok(commits)
    }

    /// The commit HEAD points at, if any commit exists.
    pub fn head(&self) -> Result<Option<CommitId>> {
        let path = self.head_path();
        if !path.exists() {
            return Ok(None);
        }
        let id = fs::read_to_string(&path).map_err(|e| AtelierError::io_with_path(e, &path))?;
        let id = id.trim();
        if id.is_empty() {
            return Ok(None);
        }
        Ok(Some(CommitId::new(id)))
    }

    /// Look up a commit by id, accepting unambiguous prefixes.
    pub fn find(&self, id_or_prefix: &str) -> Result<Commit> {
        let commits = self.commits()?;
        let matches: Vec<&Commit> = commits
            .iter()
            .filter(|c| c.id.as_str().starts_with(id_or_prefix))
            .collect();
        match matches.len() {
            1 => Ok(matches[0].clone()),
            0 => Err(AtelierError::UnknownCommit {
                id: id_or_prefix.to_string(),
            }),
            _ => Err(AtelierError::UnknownCommit {
                id: format!("{} (ambiguous)", id_or_prefix),
            }),
        }
    }

    /// Persist a new commit: snapshot first, log append second, HEAD last.
    ///
    /// The snapshot is staged under a temp name and renamed, so the log
    /// never references a half-written snapshot. A failure before the log
    /// append leaves the history untouched.
    pub fn append(&self, commit: &Commit, snapshot: &Snapshot) -> Result<()> {
        let final_dir = self.snapshot_dir(&commit.id);
        let staging_dir = self
            .dir
            .join(SNAPSHOTS_DIR)
            .join(format!(".tmp-{}", commit.id.as_str()));

        if staging_dir.exists() {
            fs::remove_dir_all(&staging_dir)
                .map_err(|e| AtelierError::io_with_path(e, &staging_dir))?;
        }
        fs::create_dir_all(&staging_dir)
            .map_err(|e| AtelierError::io_with_path(e, &staging_dir))?;
        snapshot.write_to(&staging_dir)?;
        fs::rename(&staging_dir, &final_dir)
            .map_err(|e| AtelierError::io_with_path(e, &final_dir))?;

        self.append_log_line(commit)?;
        self.set_head(&commit.id)?;
        debug!("Committed {}: {}", commit.id, commit.message);
        Ok(())
    }

    /// Append a commit line without touching HEAD (used by pull).
    pub fn append_log_line(&self, commit: &Commit) -> Result<()> {
        let path = self.commits_path();
        let line = serde_json::to_string(commit)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AtelierError::io_with_path(e, &path))?;
        writeln!(file, "{}", line).map_err(|e| AtelierError::io_with_path(e, &path))?;
        file.sync_all()
            .map_err(|e| AtelierError::io_with_path(e, &path))?;
        Ok(())
    }

    /// Point HEAD at a commit.
    pub fn set_head(&self, id: &CommitId) -> Result<()> {
        atomic_write_bytes(&self.head_path(), id.as_str().as_bytes())
    }

    /// Load the snapshot of a commit.
    pub fn snapshot(&self, id: &CommitId) -> Result<Snapshot> {
        let dir = self.snapshot_dir(id);
        if !dir.exists() {
            return Err(AtelierError::UnknownCommit {
                id: id.as_str().to_string(),
            });
        }
        Snapshot::read_from(&dir)
    }

    /// Copy a snapshot directory into another history (push/pull).
    pub fn copy_snapshot_to(&self, id: &CommitId, other: &History) -> Result<()> {
        let snapshot = self.snapshot(id)?;
        let final_dir = other.snapshot_dir(id);
        if final_dir.exists() {
            return Ok(());
        }
        let staging_dir = other
            .dir
            .join(SNAPSHOTS_DIR)
            .join(format!(".tmp-{}", id.as_str()));
        if staging_dir.exists() {
            fs::remove_dir_all(&staging_dir)
                .map_err(|e| AtelierError::io_with_path(e, &staging_dir))?;
        }
        fs::create_dir_all(&staging_dir)
            .map_err(|e| AtelierError::io_with_path(e, &staging_dir))?;
        snapshot.write_to(&staging_dir)?;
        fs::rename(&staging_dir, &final_dir)
            .map_err(|e| AtelierError::io_with_path(e, &final_dir))?;
        Ok(())
    }
}
