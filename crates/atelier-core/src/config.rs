//! Centralized configuration for the Atelier library.
//!
//! Workspace directory layout constants and the persisted workspace
//! configuration file (`atelier.json`).

use crate::metadata::{atomic_read_json, atomic_write_json};
use crate::{AtelierError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Shared directory and file name configuration.
pub struct PathsConfig;

impl PathsConfig {
    /// Workspace configuration file at the workspace root.
    pub const CONFIG_FILE_NAME: &'static str = "atelier.json";
    /// Shared models directory.
    pub const MODELS_DIR_NAME: &'static str = "models";
    /// Model index directory (SQLite database and sync lock).
    pub const INDEX_DIR_NAME: &'static str = "index";
    /// SQLite database filename.
    pub const INDEX_DB_NAME: &'static str = "models.db";
    /// Sync run lock filename inside the index directory.
    pub const SYNC_LOCK_NAME: &'static str = "sync.lock";
    /// Registry metadata cache directory.
    pub const REGISTRY_CACHE_DIR_NAME: &'static str = "registry-cache";
    /// Environments parent directory.
    pub const ENVIRONMENTS_DIR_NAME: &'static str = "environments";
    /// Link registry file at the workspace root.
    pub const LINK_REGISTRY_NAME: &'static str = "links.json";
}

/// Per-environment directory layout.
pub struct EnvLayout;

impl EnvLayout {
    /// Manifest file, pyproject-compatible.
    pub const MANIFEST_NAME: &'static str = "pyproject.toml";
    /// Opaque lockfile written by the external resolver.
    pub const LOCKFILE_NAME: &'static str = "atelier.lock";
    /// Tracked workflow files directory.
    pub const WORKFLOWS_DIR_NAME: &'static str = "workflows";
    /// Symlink to the shared workspace models directory.
    pub const MODELS_LINK_NAME: &'static str = "models";
    /// Version history directory.
    pub const HISTORY_DIR_NAME: &'static str = ".history";
}

/// Hashing and sync tuning.
pub struct SyncConfig;

impl SyncConfig {
    /// Sample length for the quick hash (first + last chunk), 8MB.
    pub const QUICK_HASH_SAMPLE: usize = 8 * 1024 * 1024;
    /// Chunk size for streaming strong hashes, 8MB.
    pub const HASH_CHUNK_SIZE: usize = 8 * 1024 * 1024;
    /// Upper bound for the hashing worker pool.
    pub const MAX_HASH_WORKERS: usize = 8;

    /// Default hashing pool size: a small multiple of available I/O
    /// concurrency, capped so spinning disks and network storage are not
    /// thrashed.
    pub fn default_hash_workers() -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        (cpus * 2).min(Self::MAX_HASH_WORKERS)
    }
}

/// Persisted workspace configuration (`atelier.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Shared models directory, relative to the workspace root unless absolute.
    pub models_dir: PathBuf,
    /// Registry metadata cache directory.
    pub registry_cache_dir: PathBuf,
    /// Name of the active environment, if any.
    pub active_environment: Option<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from(PathsConfig::MODELS_DIR_NAME),
            registry_cache_dir: PathBuf::from(PathsConfig::REGISTRY_CACHE_DIR_NAME),
            active_environment: None,
        }
    }
}

impl WorkspaceConfig {
    /// Load the configuration from a workspace root.
    ///
    /// Returns `WorkspaceNotInitialized` when the config file is absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(PathsConfig::CONFIG_FILE_NAME);
        atomic_read_json(&path)?
            .ok_or_else(|| AtelierError::WorkspaceNotInitialized(root.to_path_buf()))
    }

    /// Persist the configuration to a workspace root.
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = root.join(PathsConfig::CONFIG_FILE_NAME);
        atomic_write_json(&path, self, false)
    }

    /// Resolve the models directory against the workspace root.
    pub fn models_dir(&self, root: &Path) -> PathBuf {
        if self.models_dir.is_absolute() {
            self.models_dir.clone()
        } else {
            root.join(&self.models_dir)
        }
    }

    /// Resolve the registry cache directory against the workspace root.
    pub fn registry_cache_dir(&self, root: &Path) -> PathBuf {
        if self.registry_cache_dir.is_absolute() {
            self.registry_cache_dir.clone()
        } else {
            root.join(&self.registry_cache_dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut config = WorkspaceConfig::default();
        config.active_environment = Some("dev".to_string());
        config.save(dir.path()).unwrap();

        let loaded = WorkspaceConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.active_environment.as_deref(), Some("dev"));
        assert_eq!(loaded.models_dir, PathBuf::from("models"));
    }

    #[test]
    fn test_load_missing_is_uninitialized() {
        let dir = TempDir::new().unwrap();
        let err = WorkspaceConfig::load(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            AtelierError::WorkspaceNotInitialized(_)
        ));
    }

    #[test]
    fn test_relative_dirs_resolve_against_root() {
        let config = WorkspaceConfig::default();
        let resolved = config.models_dir(Path::new("/ws"));
        assert_eq!(resolved, PathBuf::from("/ws/models"));
    }

    #[test]
    fn test_default_hash_workers_bounded() {
        let workers = SyncConfig::default_hash_workers();
        assert!(workers >= 1 && workers <= SyncConfig::MAX_HASH_WORKERS);
    }
}
