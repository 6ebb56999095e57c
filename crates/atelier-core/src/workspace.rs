//! Workspace: process-wide state and the operation surface.
//!
//! A workspace owns one models directory, one registry cache, one model
//! index store, and the set of environments. It is created exactly once
//! by [`Workspace::init`]; every other entry point requires it to exist.
//! The index store is owned here and passed into every operation that
//! touches models.

use crate::bundle::{self, ExportReport, ImportReport};
use crate::config::{PathsConfig, WorkspaceConfig};
use crate::environment::{Environment, EnvironmentStatus};
use crate::index::{
    IndexStats, ModelIndexStore, ModelRecord, RecordPage, SourceKind,
};
use crate::library::{ensure_link, LinkIssue, LinkRegistry, SyncEngine, SyncReport};
use crate::{AtelierError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Category directories scaffolded under a new models root.
const DEFAULT_CATEGORY_DIRS: &[&str] = &[
    "checkpoints",
    "loras",
    "vae",
    "controlnet",
    "embeddings",
    "upscale",
    "clip",
];

/// A resolved Atelier workspace.
pub struct Workspace {
    root: PathBuf,
    config: WorkspaceConfig,
    index: Arc<ModelIndexStore>,
}

impl Workspace {
    /// Initialize a new workspace at `root`.
    ///
    /// Fails with `WorkspaceExists` when one is already present.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.join(PathsConfig::CONFIG_FILE_NAME).exists() {
            return Err(AtelierError::WorkspaceExists(root));
        }

        let config = WorkspaceConfig::default();
        let models_dir = config.models_dir(&root);
        for category in DEFAULT_CATEGORY_DIRS {
            fs::create_dir_all(models_dir.join(category))
                .map_err(|e| AtelierError::io_with_path(e, &models_dir))?;
        }
        fs::create_dir_all(config.registry_cache_dir(&root))
            .map_err(|e| AtelierError::io_with_path(e, &root))?;
        fs::create_dir_all(root.join(PathsConfig::ENVIRONMENTS_DIR_NAME))
            .map_err(|e| AtelierError::io_with_path(e, &root))?;

        config.save(&root)?;
        let index = Arc::new(ModelIndexStore::open(
            root.join(PathsConfig::INDEX_DIR_NAME)
                .join(PathsConfig::INDEX_DB_NAME),
        )?);

        info!("Initialized workspace at {}", root.display());
        Ok(Self {
            root,
            config,
            index,
        })
    }

    /// Open an existing workspace.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = WorkspaceConfig::load(&root)?;
        let index = Arc::new(ModelIndexStore::open(
            root.join(PathsConfig::INDEX_DIR_NAME)
                .join(PathsConfig::INDEX_DB_NAME),
        )?);
        Ok(Self {
            root,
            config,
            index,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn models_dir(&self) -> PathBuf {
        self.config.models_dir(&self.root)
    }

    pub fn environments_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::ENVIRONMENTS_DIR_NAME)
    }

    /// The shared model index store.
    pub fn index(&self) -> &Arc<ModelIndexStore> {
        &self.index
    }

    fn link_registry(&self) -> Result<LinkRegistry> {
        LinkRegistry::load(self.root.join(PathsConfig::LINK_REGISTRY_NAME))
    }

    // ========================================
    // Environments
    // ========================================

    /// Create a new environment.
    pub fn create_environment(&self, name: &str) -> Result<Environment> {
        let mut registry = self.link_registry()?;
        Environment::create(
            &self.environments_dir(),
            name,
            &self.models_dir(),
            &mut registry,
        )
    }

    /// Open an environment by name.
    pub fn environment(&self, name: &str) -> Result<Environment> {
        Environment::open(&self.environments_dir(), name)
    }

    /// Mark an environment active. At most one is active at a time.
    pub fn use_environment(&mut self, name: &str) -> Result<()> {
        self.environment(name)?;
        self.config.active_environment = Some(name.to_string());
        self.config.save(&self.root)
    }

    /// The active environment's name, if one is set.
    pub fn active_environment(&self) -> Option<&str> {
        self.config.active_environment.as_deref()
    }

    /// Delete an environment directory and its registered links.
    ///
    /// The shared model index is deliberately left untouched: models are
    /// workspace property, not environment property.
    pub fn delete_environment(&mut self, name: &str) -> Result<()> {
        let env = self.environment(name)?;
        fs::remove_dir_all(env.root())
            .map_err(|e| AtelierError::io_with_path(e, env.root()))?;

        let mut registry = self.link_registry()?;
        registry.remove_environment(name)?;

        if self.config.active_environment.as_deref() == Some(name) {
            self.config.active_environment = None;
            self.config.save(&self.root)?;
        }
        info!("Deleted environment {}", name);
        Ok(())
    }

    /// Status of every environment in the workspace.
    pub fn list_environments(&self) -> Result<Vec<EnvironmentStatus>> {
        let dir = self.environments_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut statuses = Vec::new();
        let mut names: Vec<String> = fs::read_dir(&dir)
            .map_err(|e| AtelierError::io_with_path(e, &dir))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
            .collect();
        names.sort();
        for name in names {
            if let Ok(env) = self.environment(&name) {
                statuses.push(env.status()?);
            }
        }
        Ok(statuses)
    }

    // ========================================
    // Index operations
    // ========================================

    /// Reconcile the index against the shared models directory.
    pub async fn sync_index(&self) -> Result<SyncReport> {
        SyncEngine::new(self.index.clone())
            .sync(&self.models_dir())
            .await
    }

    /// Index an arbitrary directory tree (an existing model collection
    /// outside the workspace). Additive: locations recorded under other
    /// roots are never removed by this scan.
    pub async fn scan_directory(&self, dir: &Path) -> Result<SyncReport> {
        if !dir.is_dir() {
            return Err(AtelierError::NotADirectory(dir.to_path_buf()));
        }
        SyncEngine::new(self.index.clone()).sync(dir).await
    }

    /// Find models whose filename contains the query (case-insensitive).
    pub fn find_models(&self, query: &str) -> Result<Vec<ModelRecord>> {
        self.index.find_by_name(query)
    }

    /// Show one model by exact hash or unambiguous hash prefix.
    pub fn show_model(&self, hash_or_prefix: &str) -> Result<ModelRecord> {
        if let Some(record) = self.index.lookup(hash_or_prefix)? {
            return Ok(record);
        }
        let mut matches = self.index.find_by_hash_prefix(hash_or_prefix)?;
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(AtelierError::ModelNotFound {
                hash: hash_or_prefix.to_string(),
            }),
            n => Err(AtelierError::Validation {
                field: "hash".to_string(),
                message: format!("prefix {} matches {} records", hash_or_prefix, n),
            }),
        }
    }

    /// List index records, one stable page at a time.
    pub fn list_models(&self, page_size: usize, page_token: Option<&str>) -> Result<RecordPage> {
        self.index.list(page_size, page_token)
    }

    /// Records backed by more than one file.
    pub fn duplicate_models(&self) -> Result<Vec<ModelRecord>> {
        self.index.duplicates()
    }

    /// Aggregate index statistics.
    pub fn index_stats(&self) -> Result<IndexStats> {
        self.index.stats()
    }

    /// Register a download source for a model hash.
    pub fn add_model_source(&self, hash: &str, kind: SourceKind, locator: &str) -> Result<()> {
        self.index.add_source(hash, kind, locator)
    }

    // ========================================
    // Bundles
    // ========================================

    /// Export an environment's committed state to a bundle.
    pub fn export_environment(&self, name: &str, dest: &Path) -> Result<ExportReport> {
        let env = self.environment(name)?;
        bundle::export(&env, &self.index, dest)
    }

    /// Rebuild an environment from a bundle under a new name.
    pub fn import_environment(&self, bundle_path: &Path, new_name: &str) -> Result<ImportReport> {
        let mut registry = self.link_registry()?;
        let (_env, report) = bundle::import(
            bundle_path,
            new_name,
            &self.environments_dir(),
            &self.models_dir(),
            &mut registry,
            &self.index,
        )?;
        Ok(report)
    }

    // ========================================
    // Link maintenance
    // ========================================

    /// Check every registered environment link.
    pub fn verify_links(&self) -> Result<Vec<LinkIssue>> {
        Ok(self.link_registry()?.verify_all())
    }

    /// Re-create every broken or retargeted registered link.
    ///
    /// Links whose path is occupied by real data are left alone and stay
    /// in the issue list; migrating that data is the caller's call.
    pub fn repair_links(&self) -> Result<usize> {
        let registry = self.link_registry()?;
        let mut repaired = 0;
        for entry in registry.entries() {
            match ensure_link(&entry.link_path, &entry.target) {
                Ok(crate::library::LinkOutcome::AlreadyLinked) => {}
                Ok(_) => repaired += 1,
                Err(AtelierError::SymlinkConflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(repaired)
    }
}
