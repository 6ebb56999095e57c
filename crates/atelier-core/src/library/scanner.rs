//! Recursive model directory scanner.
//!
//! Walks the models root, classifies every regular file by its top-level
//! subdirectory, and yields metadata lazily. Symlinked directories are
//! followed, but a link that re-enters an already-visited real path is
//! skipped so no subtree is walked twice.

use crate::index::ModelCategory;
use crate::{AtelierError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;
use walkdir::WalkDir;

/// Suffixes of in-progress or temporary downloads, excluded by default.
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".tmp", ".download", ".crdownload", ".aria2"];

/// A regular file found under the models root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time, unix milliseconds.
    pub mtime_ms: i64,
    pub category: ModelCategory,
}

/// Configurable exclusion filter for scans.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    /// Include dotfiles and dot-directories.
    pub include_hidden: bool,
    /// Filename suffixes to exclude (in-progress downloads, editor litter).
    pub excluded_suffixes: Vec<String>,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            include_hidden: false,
            excluded_suffixes: PARTIAL_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ScanFilter {
    fn excludes_name(&self, name: &str) -> bool {
        if !self.include_hidden && name.starts_with('.') {
            return true;
        }
        self.excluded_suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix.as_str()))
    }
}

/// Lazily scan a models root.
///
/// Yields one item per regular file; per-entry walk failures surface as
/// `Err` items so a single unreadable directory never aborts the scan.
pub fn scan(
    root: &Path,
    filter: &ScanFilter,
) -> impl Iterator<Item = Result<ScannedFile>> {
    let root = root.to_path_buf();
    let filter = filter.clone();
    let mut visited_dirs: HashSet<PathBuf> = HashSet::new();

    let walker = WalkDir::new(root.clone())
        .follow_links(true)
        .into_iter()
        .filter_entry(move |entry| {
            let name = entry.file_name().to_string_lossy();
            if entry.depth() > 0 && filter.excludes_name(&name) {
                debug!("Excluded by filter: {}", entry.path().display());
                return false;
            }
            if entry.file_type().is_dir() {
                // Repeat-visit protection: a symlinked directory resolving
                // to an already-walked real path is pruned here.
                if let Ok(real) = entry.path().canonicalize() {
                    if !visited_dirs.insert(real) {
                        debug!("Already visited: {}", entry.path().display());
                        return false;
                    }
                }
            }
            true
        });

    walker.filter_map(move |entry| match entry {
        Ok(entry) => {
            if !entry.file_type().is_file() {
                return None;
            }
            let path = entry.path().to_path_buf();
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    return Some(Err(AtelierError::Io {
                        message: e.to_string(),
                        path: Some(path),
                        source: e.into_io_error(),
                    }))
                }
            };
            let mtime_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            let category = category_for(&root, &path);

            Some(Ok(ScannedFile {
                path,
                size: metadata.len(),
                mtime_ms,
                category,
            }))
        }
        Err(e) => {
            let path = e.path().map(|p| p.to_path_buf());
            Some(Err(AtelierError::Io {
                message: e.to_string(),
                path,
                source: e.into_io_error(),
            }))
        }
    })
}

/// Derive the category from the first path segment under the root.
fn category_for(root: &Path, path: &Path) -> ModelCategory {
    let relative = match path.strip_prefix(root) {
        Ok(r) => r,
        Err(_) => return ModelCategory::from_segment(None),
    };
    let mut components = relative.components();
    let first = components.next();
    // A file directly under the root has no directory segment.
    if components.next().is_none() {
        return ModelCategory::from_segment(None);
    }
    ModelCategory::from_segment(first.and_then(|c| c.as_os_str().to_str()))
}
