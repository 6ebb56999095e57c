//! Isolated AI-workflow environments.
//!
//! An environment is a named directory holding a declarative manifest
//! (`pyproject.toml`), the external resolver's opaque lockfile, tracked
//! workflow files, a symlink to the shared workspace models directory,
//! and an append-only version history.

pub mod history;
pub mod manifest;
pub mod remote;

pub use history::{Commit, CommitId, History, LogOrder, Snapshot};
pub use manifest::{Manifest, ModelRef, NodeOrigin, NodeRef};
pub use remote::{pull as pull_history, push as push_history, PullReport, PushReport};

use crate::config::EnvLayout;
use crate::index::ModelIndexStore;
use crate::library::{ensure_link, LinkEntry, LinkRegistry};
use crate::{AtelierError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Summary of an environment's current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    pub name: String,
    pub head: Option<CommitId>,
    pub commits: usize,
    pub dirty: bool,
}

/// A single environment rooted at `environments/<name>`.
#[derive(Debug)]
pub struct Environment {
    name: String,
    root: PathBuf,
    history: History,
}

impl Environment {
    /// Validate an environment name: it becomes a directory name and a
    /// `[project] name`, so path separators and leading dots are out.
    pub fn validate_name(name: &str) -> Result<()> {
        let ok = !name.is_empty()
            && !name.starts_with(['.', '-'])
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if ok {
            Ok(())
        } else {
            Err(AtelierError::InvalidEnvironmentName {
                name: name.to_string(),
                reason: "use ascii letters, digits, '-', '_' or '.', not leading '.'/'-'"
                    .to_string(),
            })
        }
    }

    /// Create a fresh environment: scaffold directories, write the
    /// template manifest, and link the shared models directory.
    pub fn create(
        environments_dir: &Path,
        name: &str,
        models_target: &Path,
        link_registry: &mut LinkRegistry,
    ) -> Result<Self> {
        Self::validate_name(name)?;
        let root = environments_dir.join(name);
        if root.exists() {
            return Err(AtelierError::EnvironmentExists {
                name: name.to_string(),
            });
        }

        fs::create_dir_all(root.join(EnvLayout::WORKFLOWS_DIR_NAME))
            .map_err(|e| AtelierError::io_with_path(e, &root))?;

        let manifest = Manifest::new(name);
        manifest.save(&root.join(EnvLayout::MANIFEST_NAME))?;

        let link_path = root.join(EnvLayout::MODELS_LINK_NAME);
        ensure_link(&link_path, models_target)?;
        link_registry.register(LinkEntry {
            environment: name.to_string(),
            link_path,
            target: models_target.to_path_buf(),
            created_at: Utc::now(),
        })?;

        let history = History::open(root.join(EnvLayout::HISTORY_DIR_NAME))?;
        info!("Created environment {}", name);
        Ok(Self {
            name: name.to_string(),
            root,
            history,
        })
    }

    /// Open an existing environment.
    pub fn open(environments_dir: &Path, name: &str) -> Result<Self> {
        let root = environments_dir.join(name);
        if !root.join(EnvLayout::MANIFEST_NAME).exists() {
            return Err(AtelierError::EnvironmentNotFound {
                name: name.to_string(),
            });
        }
        let history = History::open(root.join(EnvLayout::HISTORY_DIR_NAME))?;
        Ok(Self {
            name: name.to_string(),
            root,
            history,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(EnvLayout::MANIFEST_NAME)
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.root.join(EnvLayout::LOCKFILE_NAME)
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.root.join(EnvLayout::WORKFLOWS_DIR_NAME)
    }

    pub fn models_link_path(&self) -> PathBuf {
        self.root.join(EnvLayout::MODELS_LINK_NAME)
    }

    /// Load the manifest from disk.
    pub fn manifest(&self) -> Result<Manifest> {
        Manifest::load(&self.manifest_path())
    }

    /// Persist a mutated manifest.
    pub fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        manifest.save(&self.manifest_path())
    }

    /// Snapshot/replace the opaque lockfile produced by the external
    /// resolver. The contents are never parsed.
    pub fn write_lockfile(&self, bytes: &[u8]) -> Result<()> {
        crate::metadata::atomic_write_bytes(&self.lockfile_path(), bytes)
    }

    // ========================================
    // Declared nodes and models
    // ========================================

    /// Declare a custom node in the manifest.
    pub fn add_node(&self, node: &NodeRef) -> Result<()> {
        let mut manifest = self.manifest()?;
        manifest.add_node(node)?;
        self.save_manifest(&manifest)
    }

    /// Drop a declared node (and its dependency group).
    pub fn remove_node(&self, name: &str) -> Result<bool> {
        let mut manifest = self.manifest()?;
        let removed = manifest.remove_node(name)?;
        if removed {
            self.save_manifest(&manifest)?;
        }
        Ok(removed)
    }

    /// All declared nodes.
    pub fn list_nodes(&self) -> Result<Vec<NodeRef>> {
        Ok(self.manifest()?.nodes())
    }

    /// Change a declared node's origin (e.g. pin a new revision).
    pub fn update_node(&self, name: &str, origin: NodeOrigin) -> Result<()> {
        let mut manifest = self.manifest()?;
        manifest.update_node(name, origin)?;
        self.save_manifest(&manifest)
    }

    /// Declare a model reference by content hash.
    pub fn add_model_ref(&self, model: &ModelRef) -> Result<()> {
        let mut manifest = self.manifest()?;
        manifest.add_model(model)?;
        self.save_manifest(&manifest)
    }

    /// Drop a model reference by content hash.
    pub fn remove_model_ref(&self, hash: &str) -> Result<bool> {
        let mut manifest = self.manifest()?;
        let removed = manifest.remove_model(hash)?;
        if removed {
            self.save_manifest(&manifest)?;
        }
        Ok(removed)
    }

    // ========================================
    // Version control
    // ========================================

    /// Collect the environment's committable state: manifest bytes, the
    /// lockfile verbatim, and every tracked workflow file.
    ///
    /// A tracked workflow missing from disk fails the snapshot and any
    /// commit built from it; a partial snapshot is never produced.
    pub fn working_snapshot(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::default();

        let manifest_path = self.manifest_path();
        let manifest_bytes =
            fs::read(&manifest_path).map_err(|e| AtelierError::io_with_path(e, &manifest_path))?;
        snapshot
            .files
            .insert(PathBuf::from(EnvLayout::MANIFEST_NAME), manifest_bytes);

        let lockfile_path = self.lockfile_path();
        if lockfile_path.exists() {
            let bytes = fs::read(&lockfile_path)
                .map_err(|e| AtelierError::io_with_path(e, &lockfile_path))?;
            snapshot
                .files
                .insert(PathBuf::from(EnvLayout::LOCKFILE_NAME), bytes);
        }

        let manifest = self.manifest()?;
        for relative in manifest.workflows() {
            let path = self.root.join(&relative);
            if !path.exists() {
                return Err(AtelierError::Validation {
                    field: "workflows".to_string(),
                    message: format!("tracked workflow {} is missing on disk", relative),
                });
            }
            let bytes = fs::read(&path).map_err(|e| AtelierError::io_with_path(e, &path))?;
            snapshot.files.insert(PathBuf::from(relative), bytes);
        }

        Ok(snapshot)
    }

    /// Whether the working state differs from the last commit.
    ///
    /// A freshly created environment with no commits is always dirty.
    pub fn is_dirty(&self) -> Result<bool> {
        let Some(head) = self.history.head()? else {
            return Ok(true);
        };
        Ok(self.working_snapshot()? != self.history.snapshot(&head)?)
    }

    /// Current status summary.
    pub fn status(&self) -> Result<EnvironmentStatus> {
        Ok(EnvironmentStatus {
            name: self.name.clone(),
            head: self.history.head()?,
            commits: self.history.commits()?.len(),
            dirty: self.is_dirty()?,
        })
    }

    /// Commit the working state as one atomic unit.
    ///
    /// Model references that do not resolve in the index are recorded on
    /// the commit as unresolved, never dropped.
    pub fn commit(&self, message: &str, index: &ModelIndexStore) -> Result<Commit> {
        let snapshot = self.working_snapshot()?;
        let head = self.history.head()?;

        if let Some(head) = &head {
            if self.history.snapshot(head)? == snapshot {
                return Err(AtelierError::NothingToCommit {
                    name: self.name.clone(),
                });
            }
        }

        let manifest = self.manifest()?;
        let mut unresolved = Vec::new();
        for model in manifest.models() {
            if index.lookup(&model.hash)?.is_none() {
                unresolved.push(model.hash);
            }
        }

        let commit = Commit {
            id: CommitId::generate(),
            parent_id: head,
            message: message.to_string(),
            timestamp: Utc::now(),
            unresolved_models: unresolved,
        };
        self.history.append(&commit, &snapshot)?;
        info!("Environment {} committed {}", self.name, commit.id);
        Ok(commit)
    }

    /// The commit sequence.
    pub fn log(&self, order: LogOrder) -> Result<Vec<Commit>> {
        self.history.log(order)
    }

    /// Restore a commit's snapshot, or discard uncommitted changes.
    ///
    /// With a target, the working files are restored to exactly that
    /// commit and HEAD moves there; later commits stay in the log. With no
    /// target, the last commit is restored over any uncommitted changes.
    pub fn rollback(&self, target: Option<&str>) -> Result<Commit> {
        let commit = match target {
            Some(id_or_prefix) => self.history.find(id_or_prefix)?,
            None => {
                let head = self.history.head()?.ok_or(AtelierError::UnknownCommit {
                    id: "HEAD".to_string(),
                })?;
                self.history.find(head.as_str())?
            }
        };

        let snapshot = self.history.snapshot(&commit.id)?;
        self.restore(&snapshot)?;
        self.history.set_head(&commit.id)?;
        info!("Environment {} rolled back to {}", self.name, commit.id);
        Ok(commit)
    }

    /// Overwrite the working files with a snapshot's contents.
    fn restore(&self, snapshot: &Snapshot) -> Result<()> {
        // The tracked area is rebuilt wholesale; the lockfile disappears
        // when the snapshot carries none.
        let workflows_dir = self.workflows_dir();
        if workflows_dir.exists() {
            fs::remove_dir_all(&workflows_dir)
                .map_err(|e| AtelierError::io_with_path(e, &workflows_dir))?;
        }
        fs::create_dir_all(&workflows_dir)
            .map_err(|e| AtelierError::io_with_path(e, &workflows_dir))?;

        let lockfile_path = self.lockfile_path();
        if lockfile_path.exists()
            && !snapshot
                .files
                .contains_key(Path::new(EnvLayout::LOCKFILE_NAME))
        {
            fs::remove_file(&lockfile_path)
                .map_err(|e| AtelierError::io_with_path(e, &lockfile_path))?;
        }

        for (relative, bytes) in &snapshot.files {
            let path = self.root.join(relative);
            crate::metadata::atomic_write_bytes(&path, bytes)?;
        }
        debug!("Restored {} file(s) in {}", snapshot.files.len(), self.name);
        Ok(())
    }

    // ========================================
    // Remote synchronization
    // ========================================

    /// Push this environment's history to a remote directory counterpart.
    pub fn push(&self, remote_dir: &Path) -> Result<PushReport> {
        let remote = History::open(remote_dir)?;
        remote::push(&self.history, &remote)
    }

    /// Fast-forward from a remote directory counterpart and restore the
    /// new tip's snapshot.
    ///
    /// Requires a clean working state, except for an environment with no
    /// commits yet (a fresh clone target).
    pub fn pull(&self, remote_dir: &Path) -> Result<PullReport> {
        if self.history.head()?.is_some() && self.is_dirty()? {
            return Err(AtelierError::DirtyWorkingState {
                name: self.name.clone(),
            });
        }

        let remote = History::open(remote_dir)?;
        let report = remote::pull(&self.history, &remote)?;

        if let Some(tip) = &report.new_tip {
            let snapshot = self.history.snapshot(tip)?;
            self.restore(&snapshot)?;
        }
        Ok(report)
    }
}
