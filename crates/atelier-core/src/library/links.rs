//! Environment model-directory links.
//!
//! Every environment sees the shared workspace models directory through a
//! symlink at `<env>/models`. This module creates and validates those
//! links and keeps a registry of them for repair flows.

use crate::metadata::{atomic_read_json, atomic_write_json};
use crate::{AtelierError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Outcome of [`ensure_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The link was created.
    Created,
    /// A correct link was already in place.
    AlreadyLinked,
    /// An existing link pointed elsewhere and was re-pointed.
    Repaired,
}

/// Result of a pure link check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Ok,
    /// Nothing exists at the link path.
    Missing,
    /// A symlink exists but points at the wrong target.
    WrongTarget(PathBuf),
    /// A real file or directory occupies the link path.
    NotALink,
}

/// Ensure `link_path` is a symlink to `target`.
///
/// A real directory with content at `link_path` fails with
/// `SymlinkConflict`: migrating existing data is an explicit caller
/// decision, never an implicit overwrite. An empty directory is replaced.
pub fn ensure_link(link_path: &Path, target: &Path) -> Result<LinkOutcome> {
    match verify_link(link_path, target) {
        LinkStatus::Ok => return Ok(LinkOutcome::AlreadyLinked),
        LinkStatus::WrongTarget(old) => {
            debug!(
                "Re-pointing {} from {} to {}",
                link_path.display(),
                old.display(),
                target.display()
            );
            fs::remove_file(link_path).map_err(|e| AtelierError::io_with_path(e, link_path))?;
            create_symlink(link_path, target)?;
            return Ok(LinkOutcome::Repaired);
        }
        LinkStatus::NotALink => {
            let is_empty_dir = link_path.is_dir()
                && fs::read_dir(link_path)
                    .map(|mut entries| entries.next().is_none())
                    .unwrap_or(false);
            if !is_empty_dir {
                return Err(AtelierError::SymlinkConflict(link_path.to_path_buf()));
            }
            fs::remove_dir(link_path).map_err(|e| AtelierError::io_with_path(e, link_path))?;
            create_symlink(link_path, target)?;
            return Ok(LinkOutcome::Created);
        }
        LinkStatus::Missing => {}
    }

    if let Some(parent) = link_path.parent() {
        fs::create_dir_all(parent).map_err(|e| AtelierError::io_with_path(e, parent))?;
    }
    create_symlink(link_path, target)?;
    info!(
        "Linked {} -> {}",
        link_path.display(),
        target.display()
    );
    Ok(LinkOutcome::Created)
}

/// Pure check of a link path against its expected target.
pub fn verify_link(link_path: &Path, expected_target: &Path) -> LinkStatus {
    let meta = match link_path.symlink_metadata() {
        Ok(m) => m,
        Err(_) => return LinkStatus::Missing,
    };
    if !meta.file_type().is_symlink() {
        return LinkStatus::NotALink;
    }
    match fs::read_link(link_path) {
        Ok(actual) if actual == expected_target => LinkStatus::Ok,
        Ok(actual) => LinkStatus::WrongTarget(actual),
        Err(_) => LinkStatus::WrongTarget(PathBuf::new()),
    }
}

fn create_symlink(link_path: &Path, target: &Path) -> Result<()> {
    #[cfg(unix)]
    let created = std::os::unix::fs::symlink(target, link_path);
    #[cfg(windows)]
    let created = std::os::windows::fs::symlink_dir(target, link_path);

    created.map_err(|e| AtelierError::SymlinkFailed {
        src: target.to_path_buf(),
        dest: link_path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// One tracked environment link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkEntry {
    /// Environment the link belongs to.
    pub environment: String,
    /// The link path inside the environment.
    pub link_path: PathBuf,
    /// The shared models directory the link must point to.
    pub target: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// A problem found by [`LinkRegistry::verify_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkIssue {
    pub environment: String,
    pub link_path: PathBuf,
    pub problem: String,
}

/// Registry of every environment-models link the workspace created.
///
/// Persisted as JSON so repair flows can enumerate links without walking
/// every environment directory.
#[derive(Debug)]
pub struct LinkRegistry {
    registry_path: PathBuf,
    entries: Vec<LinkEntry>,
}

impl LinkRegistry {
    /// Load the registry, or start empty when the file is absent.
    pub fn load(registry_path: impl Into<PathBuf>) -> Result<Self> {
        let registry_path = registry_path.into();
        let entries: Vec<LinkEntry> = atomic_read_json(&registry_path)?.unwrap_or_default();
        Ok(Self {
            registry_path,
            entries,
        })
    }

    fn save(&self) -> Result<()> {
        atomic_write_json(&self.registry_path, &self.entries, false)
    }

    /// Record a link for an environment, replacing any previous entry for
    /// the same link path.
    pub fn register(&mut self, entry: LinkEntry) -> Result<()> {
        self.entries.retain(|e| e.link_path != entry.link_path);
        self.entries.push(entry);
        self.save()
    }

    /// Drop every link recorded for an environment.
    pub fn remove_environment(&mut self, environment: &str) -> Result<Vec<LinkEntry>> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|e| e.environment == environment);
        self.entries = kept;
        self.save()?;
        Ok(removed)
    }

    /// All registered links.
    pub fn entries(&self) -> &[LinkEntry] {
        &self.entries
    }

    /// Check every registered link against the filesystem.
    pub fn verify_all(&self) -> Vec<LinkIssue> {
        let mut issues = Vec::new();
        for entry in &self.entries {
            let problem = match verify_link(&entry.link_path, &entry.target) {
                LinkStatus::Ok => continue,
                LinkStatus::Missing => "link is missing".to_string(),
                LinkStatus::WrongTarget(actual) => {
                    format!("link points at {}", actual.display())
                }
                LinkStatus::NotALink => "path is occupied by a real file or directory".to_string(),
            };
            issues.push(LinkIssue {
                environment: entry.environment.clone(),
                link_path: entry.link_path.clone(),
                problem,
            });
        }
        issues
    }
}
