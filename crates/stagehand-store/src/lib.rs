//! Durable provisioning state for Stagehand units.
//!
//! This crate provides the storage layer: the `KeyValueStore` abstraction with a
//! durable `FileStore` (atomic, checksummed writes) and an in-memory
//! `MemoryStore`, per-unit `MilestoneStore`, leader-written `SharedState`
//! markers, the in-flight action `Journal`, and `StoreLayout` for directory
//! structure and format versioning.

pub mod journal;
pub mod kv;
pub mod layout;
pub mod milestones;
pub mod shared;

pub use journal::{Journal, JournalEntry};
pub use kv::{FileStore, KeyValueStore, MemoryStore};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use milestones::{Milestone, MilestoneSet, MilestoneStore};
pub use shared::{SharedState, DB_SYNCED, DOMAIN_INIT_DONE};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for key '{key}': expected {expected}, got {actual}")]
    IntegrityFailure {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("invalid key '{0}': keys must match [a-z0-9:._-]")]
    InvalidKey(String),
    #[error("unknown milestone: {0}")]
    UnknownMilestone(String),
    #[error("only the leader may publish shared marker '{0}'")]
    NotLeader(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store state poisoned: {0}")]
    Poisoned(String),
}
