//! Atelier Core - Headless library for reproducible AI-workflow environments.
//!
//! Two-tier reproducibility:
//! - a workspace-wide content-addressable model index that deduplicates
//!   large model files across environments by hash rather than path, and
//! - a per-environment version-control tier over the declarative manifest
//!   (nodes, model references, dependency groups, tracked workflows).
//!
//! The CLI layer, dependency resolver, and renderer process are external
//! collaborators; this crate exposes the operation surface they consume.
//!
//! # Example
//!
//! ```rust,ignore
//! use atelier_library::Workspace;
//!
//! #[tokio::main]
//! async fn main() -> atelier_library::Result<()> {
//!     let ws = Workspace::init("/path/to/workspace")?;
//!     let env = ws.create_environment("dev")?;
//!
//!     // Index the shared models directory.
//!     let report = ws.sync_index().await?;
//!     println!("{} models indexed", report.created);
//!
//!     // Snapshot the environment.
//!     env.commit("initial state", ws.index())?;
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod config;
pub mod environment;
pub mod error;
pub mod index;
pub mod library;
pub mod metadata;

mod workspace;

// Re-export commonly used types
pub use bundle::{BundleMeta, BundledModel, BundledSource, ExportReport, ImportReport};
pub use environment::{
    Commit, CommitId, Environment, EnvironmentStatus, History, LogOrder, Manifest, ModelRef,
    NodeOrigin, NodeRef, PullReport, PushReport, Snapshot,
};
pub use error::{AtelierError, Result};
pub use index::{
    IndexStats, ModelCategory, ModelIndexStore, ModelLocation, ModelRecord, ModelSource,
    RecordPage, SourceKind,
};
pub use library::{
    ensure_link, plan_sync, verify_link, Hasher, LinkOutcome, LinkRegistry, LinkStatus,
    ScanFilter, ScannedFile, SyncEngine, SyncReport,
};
pub use workspace::Workspace;
