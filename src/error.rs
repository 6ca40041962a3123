//! Crate error taxonomy.
//!
//! Only session-level preconditions are surfaced as `Err`: missing roots,
//! unknown handles, undiffable requests. Entry-level read failures during a
//! build or an execution are recorded on the affected entry or step so that
//! batch operations always return a complete result set.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::SessionHandle;

/// Errors that can occur in snapcmp
#[derive(Error, Debug)]
pub enum Error {
    #[error("Snapshot root does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("Snapshot root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Pre and post snapshots are identical")]
    SnapshotsIdentical,

    #[error("Comparison session not found: {0}")]
    SessionNotFound(SessionHandle),

    #[error("No entry for path: {0}")]
    PathNotFound(String),

    #[error("Cannot diff {path}: {reason}")]
    NotDiffable { path: String, reason: String },

    #[error("Snapshot could not be resolved: {0}")]
    ResolveFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
