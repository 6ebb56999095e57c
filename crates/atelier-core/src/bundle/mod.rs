//! Portable environment bundles.
//!
//! A bundle is a tar.gz archive carrying everything needed to rebuild an
//! environment elsewhere: the committed manifest, the opaque lockfile,
//! tracked workflows, node origin records, model source records (never
//! model bytes), and the raw source trees of development nodes.

mod export;
mod import;

pub use export::{export, ExportReport};
pub use import::{import, ImportReport};

use crate::environment::CommitId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current bundle format version.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Bundle descriptor file name inside the archive.
pub(crate) const BUNDLE_META_NAME: &str = "bundle.json";
/// Node origin records file name.
pub(crate) const NODES_FILE_NAME: &str = "nodes.json";
/// Model source records file name.
pub(crate) const MODEL_SOURCES_FILE_NAME: &str = "model-sources.json";
/// Directory of development-node source trees.
pub(crate) const DEV_NODES_DIR: &str = "dev-nodes";

/// Bundle descriptor (`bundle.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMeta {
    pub format_version: u32,
    /// Name of the exported environment.
    pub environment: String,
    /// Commit the bundle was produced from.
    pub commit_id: CommitId,
    pub created_at: DateTime<Utc>,
    /// Whether uncommitted changes existed at export time (they are not
    /// part of the bundle).
    pub working_tree_dirty: bool,
}

/// A download origin carried in the bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundledSource {
    pub kind: crate::index::SourceKind,
    pub locator: String,
}

/// Source records for one referenced model (`model-sources.json` entry).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundledModel {
    pub name: String,
    pub hash: String,
    pub category: String,
    pub size: u64,
    pub sources: Vec<BundledSource>,
}
