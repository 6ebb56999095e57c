//! Environment export.

use crate::bundle::{
    BundleMeta, BundledModel, BundledSource, BUNDLE_FORMAT_VERSION, BUNDLE_META_NAME,
    DEV_NODES_DIR, MODEL_SOURCES_FILE_NAME, NODES_FILE_NAME,
};
use crate::config::EnvLayout;
use crate::environment::{Environment, Manifest, NodeOrigin};
use crate::index::ModelIndexStore;
use crate::{AtelierError, Result};
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Result of an export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub bundle_path: PathBuf,
    /// Model references included in the bundle.
    pub models: usize,
    /// Referenced models with no source record; they travel as hash-only
    /// entries and will surface as unresolved on import.
    pub models_without_sources: Vec<String>,
    /// Declared nodes included in the bundle.
    pub nodes: usize,
    /// Per-item failures (unreadable development sources and the like).
    pub errors: Vec<String>,
    /// Whether uncommitted changes were left out of the bundle.
    pub working_tree_dirty: bool,
}

/// Export an environment's committed state into a tar.gz bundle at `dest`.
///
/// Model bytes never enter the bundle; only source records do.
pub fn export(env: &Environment, index: &ModelIndexStore, dest: &Path) -> Result<ExportReport> {
    let head = env
        .history()
        .head()?
        .ok_or_else(|| AtelierError::Validation {
            field: "history".to_string(),
            message: format!("environment {} has no commits to export", env.name()),
        })?;
    let snapshot = env.history().snapshot(&head)?;
    let working_tree_dirty = env.is_dirty()?;
    if working_tree_dirty {
        warn!(
            "Exporting committed state of {}; uncommitted changes are not bundled",
            env.name()
        );
    }

    let manifest_bytes = snapshot
        .files
        .get(Path::new(EnvLayout::MANIFEST_NAME))
        .ok_or_else(|| AtelierError::Other("commit snapshot lacks a manifest".to_string()))?;
    let manifest = Manifest::parse(String::from_utf8_lossy(manifest_bytes).into_owned())?;

    let staging = tempfile::tempdir().map_err(AtelierError::from)?;
    for (relative, bytes) in &snapshot.files {
        let path = staging.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| AtelierError::io_with_path(e, parent))?;
        }
        fs::write(&path, bytes).map_err(|e| AtelierError::io_with_path(e, &path))?;
    }

    let mut report_errors = Vec::new();

    // Node origin records, and development source trees for nodes that are
    // not reproducible from a registry/URL reference.
    let nodes = manifest.nodes();
    for node in &nodes {
        if let NodeOrigin::Development { path } = &node.origin {
            let source_dir = env.root().join(path);
            let dest_dir = staging.path().join(DEV_NODES_DIR).join(&node.name);
            if let Err(e) = copy_tree(&source_dir, &dest_dir) {
                report_errors.push(format!("dev node {}: {}", node.name, e));
            }
        }
    }
    crate::metadata::atomic_write_json(&staging.path().join(NODES_FILE_NAME), &nodes, false)?;

    // Model source records.
    let mut bundled_models = Vec::new();
    let mut models_without_sources = Vec::new();
    for model in manifest.models() {
        let record = index.lookup(&model.hash)?;
        let (category, size, sources) = match record {
            Some(record) => (
                record.category.as_str().to_string(),
                record.size,
                record
                    .sources
                    .iter()
                    .map(|s| BundledSource {
                        kind: s.kind,
                        locator: s.locator.clone(),
                    })
                    .collect::<Vec<_>>(),
            ),
            None => ("other".to_string(), 0, Vec::new()),
        };
        if sources.is_empty() {
            models_without_sources.push(model.hash.clone());
        }
        bundled_models.push(BundledModel {
            name: model.name,
            hash: model.hash,
            category,
            size,
            sources,
        });
    }
    crate::metadata::atomic_write_json(
        &staging.path().join(MODEL_SOURCES_FILE_NAME),
        &bundled_models,
        false,
    )?;

    let meta = BundleMeta {
        format_version: BUNDLE_FORMAT_VERSION,
        environment: env.name().to_string(),
        commit_id: head,
        created_at: Utc::now(),
        working_tree_dirty,
    };
    crate::metadata::atomic_write_json(&staging.path().join(BUNDLE_META_NAME), &meta, false)?;

    // Pack the staging tree.
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| AtelierError::io_with_path(e, parent))?;
    }
    let file = fs::File::create(dest).map_err(|e| AtelierError::io_with_path(e, dest))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all("", staging.path())
        .map_err(|e| AtelierError::io_with_path(e, staging.path()))?;
    let encoder = builder
        .into_inner()
        .map_err(|e| AtelierError::io_with_path(e, dest))?;
    encoder
        .finish()
        .map_err(|e| AtelierError::io_with_path(e, dest))?;

    info!(
        "Exported {} ({} models, {} nodes) to {}",
        env.name(),
        bundled_models.len(),
        nodes.len(),
        dest.display()
    );
    Ok(ExportReport {
        bundle_path: dest.to_path_buf(),
        models: bundled_models.len(),
        models_without_sources,
        nodes: nodes.len(),
        errors: report_errors,
        working_tree_dirty,
    })
}

/// Copy a directory tree, file by file.
fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    if !src.is_dir() {
        return Err(AtelierError::NotADirectory(src.to_path_buf()));
    }
    for entry in walkdir::WalkDir::new(src).into_iter().filter_map(|e| e.ok()) {
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AtelierError::Other(format!("Copy path error: {}", e)))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| AtelierError::io_with_path(e, &target))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| AtelierError::io_with_path(e, parent))?;
            }
            fs::copy(entry.path(), &target)
                .map_err(|e| AtelierError::io_with_path(e, entry.path()))?;
        }
    }
    Ok(())
}
