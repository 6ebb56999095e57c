//! Atomic metadata persistence.
//!
//! All owned metadata files (workspace config, link registry, commit log
//! pointers, bundle descriptors) go through the atomic write path so a
//! crash never leaves a half-written file behind.

mod atomic;

pub use atomic::{atomic_read_json, atomic_write_bytes, atomic_write_json};
