//! Shared model library: hashing, scanning, sync, and links.
//!
//! The pieces that keep the workspace models directory and the
//! content-addressable index consistent with each other:
//!
//! ```text
//! scanner  - live listing of the models tree
//!     │
//! plan_sync - pure diff against recorded locations
//!     │
//! SyncEngine - bounded-pool hashing + one-transaction apply
//!     │
//! ModelIndexStore (SQLite)
//! ```

mod hashing;
mod links;
mod scanner;
mod sync;

pub use hashing::Hasher;
pub use links::{
    ensure_link, verify_link, LinkEntry, LinkIssue, LinkOutcome, LinkRegistry, LinkStatus,
};
pub use scanner::{scan, ScanFilter, ScannedFile};
pub use sync::{plan_sync, SyncEngine, SyncError, SyncPlan, SyncReport};
