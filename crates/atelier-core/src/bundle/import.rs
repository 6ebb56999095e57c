//! Environment import.

use crate::bundle::{
    BundleMeta, BundledModel, BUNDLE_FORMAT_VERSION, BUNDLE_META_NAME, DEV_NODES_DIR,
    MODEL_SOURCES_FILE_NAME, NODES_FILE_NAME,
};
use crate::config::EnvLayout;
use crate::environment::{CommitId, Environment, NodeOrigin, NodeRef};
use crate::index::ModelIndexStore;
use crate::library::LinkRegistry;
use crate::metadata::atomic_read_json;
use crate::{AtelierError, Result};
use flate2::read::GzDecoder;
use std::fs;
use std::path::Path;
use tracing::info;

use serde::{Deserialize, Serialize};

/// Result of an import.
///
/// Unresolved models are reported, never fatal: the rest of the
/// environment is still reconstructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub environment: String,
    /// The commit created from the replayed manifest.
    pub commit_id: CommitId,
    /// Referenced models already present in the local index; the shared
    /// models link makes them visible immediately.
    pub reused_models: Vec<String>,
    /// Absent models with bundled sources, queued for download.
    pub queued_downloads: Vec<String>,
    /// Absent models with no resolvable source.
    pub unresolved_models: Vec<String>,
    /// Declared nodes whose installation is an external step.
    pub nodes_pending_install: Vec<String>,
}

/// Rebuild an environment from a bundle under a new name.
pub fn import(
    bundle_path: &Path,
    new_name: &str,
    environments_dir: &Path,
    models_target: &Path,
    link_registry: &mut LinkRegistry,
    index: &ModelIndexStore,
) -> Result<(Environment, ImportReport)> {
    // Unpack into a scratch directory first; a truncated archive never
    // leaves a half-created environment behind.
    let staging = tempfile::tempdir().map_err(AtelierError::from)?;
    let file = fs::File::open(bundle_path)
        .map_err(|e| AtelierError::io_with_path(e, bundle_path))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive
        .unpack(staging.path())
        .map_err(|e| AtelierError::InvalidBundle {
            message: format!("failed to unpack {}: {}", bundle_path.display(), e),
        })?;

    let meta: BundleMeta = atomic_read_json(&staging.path().join(BUNDLE_META_NAME))?
        .ok_or_else(|| AtelierError::InvalidBundle {
            message: "bundle.json is missing".to_string(),
        })?;
    if meta.format_version != BUNDLE_FORMAT_VERSION {
        return Err(AtelierError::InvalidBundle {
            message: format!("unsupported bundle format {}", meta.format_version),
        });
    }

    let staged_manifest = staging.path().join(EnvLayout::MANIFEST_NAME);
    if !staged_manifest.exists() {
        return Err(AtelierError::InvalidBundle {
            message: "bundle carries no manifest".to_string(),
        });
    }

    let nodes: Vec<NodeRef> =
        atomic_read_json(&staging.path().join(NODES_FILE_NAME))?.unwrap_or_default();
    let bundled_models: Vec<BundledModel> =
        atomic_read_json(&staging.path().join(MODEL_SOURCES_FILE_NAME))?.unwrap_or_default();

    let env = Environment::create(environments_dir, new_name, models_target, link_registry)?;

    // Replay the manifest verbatim, then the lockfile and workflows.
    let manifest_bytes = fs::read(&staged_manifest)
        .map_err(|e| AtelierError::io_with_path(e, &staged_manifest))?;
    crate::metadata::atomic_write_bytes(&env.manifest_path(), &manifest_bytes)?;

    let staged_lockfile = staging.path().join(EnvLayout::LOCKFILE_NAME);
    if staged_lockfile.exists() {
        let bytes = fs::read(&staged_lockfile)
            .map_err(|e| AtelierError::io_with_path(e, &staged_lockfile))?;
        env.write_lockfile(&bytes)?;
    }

    let staged_workflows = staging.path().join(EnvLayout::WORKFLOWS_DIR_NAME);
    if staged_workflows.exists() {
        copy_into(&staged_workflows, &env.workflows_dir())?;
    }

    // Development node sources land at their declared paths.
    for node in &nodes {
        if let NodeOrigin::Development { path } = &node.origin {
            let source = staging.path().join(DEV_NODES_DIR).join(&node.name);
            if source.is_dir() {
                copy_into(&source, &env.root().join(path))?;
            }
        }
    }

    // Register bundled sources so re-download stays possible, then triage
    // every referenced model.
    let mut reused_models = Vec::new();
    let mut queued_downloads = Vec::new();
    let mut unresolved_models = Vec::new();
    for model in &bundled_models {
        let present_locally = index
            .lookup(&model.hash)?
            .map(|r| !r.locations.is_empty())
            .unwrap_or(false);

        if !model.sources.is_empty() {
            let category = model
                .category
                .parse()
                .unwrap_or(crate::index::ModelCategory::Other("other".to_string()));
            index.ensure_record(&model.hash, model.size, &category)?;
            for source in &model.sources {
                index.add_source(&model.hash, source.kind, &source.locator)?;
            }
        }

        if present_locally {
            reused_models.push(model.hash.clone());
        } else if !model.sources.is_empty() {
            queued_downloads.push(model.hash.clone());
        } else {
            unresolved_models.push(model.hash.clone());
        }
    }

    // One commit pins the replayed state as the environment's baseline.
    let commit = env.commit(&format!("Import bundle of {}", meta.environment), index)?;

    let report = ImportReport {
        environment: new_name.to_string(),
        commit_id: commit.id,
        reused_models,
        queued_downloads,
        unresolved_models,
        nodes_pending_install: nodes.iter().map(|n| n.name.clone()).collect(),
    };
    info!(
        "Imported {} as {}: {} reused, {} queued, {} unresolved",
        meta.environment,
        new_name,
        report.reused_models.len(),
        report.queued_downloads.len(),
        report.unresolved_models.len()
    );
    Ok((env, report))
}

fn copy_into(src: &Path, dest: &Path) -> Result<()> {
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
