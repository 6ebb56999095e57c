//! Error types for the Atelier library.
//!
//! One crate-wide error enum; bulk operations (scan, sync, export, import)
//! collect per-item failures into their reports instead of returning the
//! first error they hit.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Atelier operations.
#[derive(Debug, Error)]
pub enum AtelierError {
    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Cannot hash zero-byte file: {0}")]
    EmptyFile(PathBuf),

    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to create symlink from {src} to {dest}: {reason}")]
    SymlinkFailed {
        src: PathBuf,
        dest: PathBuf,
        reason: String,
    },

    #[error("Refusing to replace existing directory with content: {0}")]
    SymlinkConflict(PathBuf),

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Manifest error in {path:?}: {message}")]
    Manifest {
        message: String,
        path: Option<PathBuf>,
    },

    // Workspace errors
    #[error("Workspace not initialized at {0}")]
    WorkspaceNotInitialized(PathBuf),

    #[error("Workspace already initialized at {0}")]
    WorkspaceExists(PathBuf),

    // Environment errors
    #[error("Environment not found: {name}")]
    EnvironmentNotFound { name: String },

    #[error("Environment already exists: {name}")]
    EnvironmentExists { name: String },

    #[error("Invalid environment name: {name}: {reason}")]
    InvalidEnvironmentName { name: String, reason: String },

    // Version-control errors
    #[error("Nothing to commit in environment {name}")]
    NothingToCommit { name: String },

    #[error("Unknown commit: {id}")]
    UnknownCommit { id: String },

    #[error("Histories have diverged: {message}")]
    DivergedHistory { message: String },

    #[error("Environment {name} has uncommitted changes")]
    DirtyWorkingState { name: String },

    // Index errors
    #[error("Model not found in index: {hash}")]
    ModelNotFound { hash: String },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("A sync is already running for {root}")]
    SyncInProgress { root: PathBuf },

    // Bundle errors
    #[error("Invalid bundle: {message}")]
    InvalidBundle { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Atelier operations.
pub type Result<T> = std::result::Result<T, AtelierError>;

// Conversion implementations for common error types

impl From<std::io::Error> for AtelierError {
    fn from(err: std::io::Error) -> Self {
        AtelierError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for AtelierError {
    fn from(err: serde_json::Error) -> Self {
        AtelierError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for AtelierError {
    fn from(err: rusqlite::Error) -> Self {
        AtelierError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<toml::de::Error> for AtelierError {
    fn from(err: toml::de::Error) -> Self {
        AtelierError::Manifest {
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<toml::ser::Error> for AtelierError {
    fn from(err: toml::ser::Error) -> Self {
        AtelierError::Manifest {
            message: err.to_string(),
            path: None,
        }
    }
}

impl AtelierError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        AtelierError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Whether this error aborts only a single item of a bulk operation.
    ///
    /// Per-item errors are collected into the operation report; everything
    /// else is fatal to the operation that produced it.
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            AtelierError::Io { .. }
                | AtelierError::FileNotFound(_)
                | AtelierError::EmptyFile(_)
                | AtelierError::HashMismatch { .. }
        )
    }
}
