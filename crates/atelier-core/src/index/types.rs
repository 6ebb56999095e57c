//! Model index record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Model category, derived from the first path segment under the models root.
///
/// Open enumeration: unknown segments map to `Other` rather than erroring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelCategory {
    /// Full model checkpoint
    Checkpoints,
    /// LoRA adapter
    Loras,
    /// VAE encoder/decoder
    Vae,
    /// ControlNet
    Controlnet,
    /// Text embeddings
    Embeddings,
    /// Upscaler model
    Upscale,
    /// CLIP text encoder
    Clip,
    /// Other/unknown category
    Other(String),
}

impl ModelCategory {
    /// Return the canonical lowercase string for this category.
    pub fn as_str(&self) -> &str {
        match self {
            ModelCategory::Checkpoints => "checkpoints",
            ModelCategory::Loras => "loras",
            ModelCategory::Vae => "vae",
            ModelCategory::Controlnet => "controlnet",
            ModelCategory::Embeddings => "embeddings",
            ModelCategory::Upscale => "upscale",
            ModelCategory::Clip => "clip",
            ModelCategory::Other(s) => s,
        }
    }

    /// Derive a category from the first path segment under the models root.
    ///
    /// Files directly under the root, or under unrecognized directories,
    /// land in the catch-all category.
    pub fn from_segment(segment: Option<&str>) -> Self {
        match segment {
            None | Some("") => ModelCategory::Other("other".to_string()),
            Some(s) => s.parse().unwrap_or_else(|_| {
                ModelCategory::Other(s.to_lowercase())
            }),
        }
    }
}

impl std::str::FromStr for ModelCategory {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "checkpoints" | "checkpoint" => ModelCategory::Checkpoints,
            "loras" | "lora" => ModelCategory::Loras,
            "vae" => ModelCategory::Vae,
            "controlnet" => ModelCategory::Controlnet,
            "embeddings" | "embedding" => ModelCategory::Embeddings,
            "upscale" | "upscaler" | "upscalers" | "upscale_models" => ModelCategory::Upscale,
            "clip" => ModelCategory::Clip,
            other => ModelCategory::Other(other.to_string()),
        })
    }
}

impl std::fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A known on-disk location of a model file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelLocation {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Owning record's canonical hash.
    pub hash: String,
    /// File modification time at last observation, unix milliseconds.
    pub mtime_ms: i64,
}

/// Kind of download origin for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A registry identifier (CivitAI/HuggingFace style lookup key).
    Registry,
    /// A direct download URL.
    Url,
    /// Origin asserted without a resolvable locator.
    Unspecified,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Registry => "registry",
            SourceKind::Url => "url",
            SourceKind::Unspecified => "unspecified",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registry" => Ok(SourceKind::Registry),
            "url" => Ok(SourceKind::Url),
            "unspecified" => Ok(SourceKind::Unspecified),
            _ => Err(()),
        }
    }
}

/// A download origin registered against a model hash.
///
/// Sources are user/tool-asserted metadata: a scan never removes them, and
/// they may reference a hash with no current on-disk location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSource {
    /// Kind of origin.
    pub kind: SourceKind,
    /// Registry id or URL; empty for `Unspecified`.
    pub locator: String,
    /// Hash the source was registered against.
    pub hash: String,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

/// A record in the model index.
///
/// Exactly one record exists per distinct content hash; files with
/// identical bytes collapse into one record regardless of name or path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    /// Canonical content hash (primary key).
    pub hash: String,
    /// Sampled quick hash of the content.
    pub quick_hash: String,
    /// Full-file strong hash, computed lazily for collision arbitration
    /// or integrity checks.
    pub strong_hash: Option<String>,
    /// File size in bytes.
    pub size: u64,
    /// Category derived from the on-disk location.
    pub category: ModelCategory,
    /// Last time a sync observed this model on disk.
    pub last_seen: DateTime<Utc>,
    /// All known on-disk locations.
    pub locations: Vec<ModelLocation>,
    /// All known download origins.
    pub sources: Vec<ModelSource>,
}

impl ModelRecord {
    /// Display name for the record: the filename of its first location,
    /// falling back to an abbreviated hash for absent models.
    pub fn display_name(&self) -> String {
        self.locations
            .first()
            .and_then(|l| l.path.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("<absent {}>", &self.hash[..self.hash.len().min(12)]))
    }
}

/// Aggregate statistics over the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub record_count: u64,
    pub location_count: u64,
    pub source_count: u64,
    pub total_bytes: u64,
}

/// One page of index records, ordered by hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub records: Vec<ModelRecord>,
    /// Pass back as `page_token` to fetch the next page; `None` at the end.
    pub next_page_token: Option<String>,
}
