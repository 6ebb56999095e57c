//! Content-addressable model index.
//!
//! Maps content hashes to model records with their on-disk locations and
//! download sources. The store is the one resource shared across
//! environments; it is always passed in explicitly, never reached through
//! a global.

mod store;
mod types;

pub use store::{BatchOutcome, ModelIndexStore, SyncBatch, UpsertLocation};
pub use types::{
    IndexStats, ModelCategory, ModelLocation, ModelRecord, ModelSource, RecordPage, SourceKind,
};
