//! Snapshot comparison and undo engine.
//!
//! Compares two snapshots of a filesystem tree, classifies every diverging
//! path, renders per-file diffs and selectively reverts the post side back
//! to the pre side. Snapshots are plain directory trees; how they come to
//! exist (btrfs, rsync, anything else) is outside this crate.
//!
//! The typical flow goes through the [`Engine`]: resolve two snapshot
//! numbers into a [`ComparisonSession`], inspect its changed files, adjust
//! the undo selection and finally execute the undo. Each layer is also
//! usable on its own for callers that manage their roots directly.

pub mod attrs;
pub mod cancel;
pub mod classify;
pub mod diff;
pub mod engine;
pub mod error;
pub mod session;
pub mod undo;
pub mod walk;

pub use attrs::{FileKind, PathAttributes};
pub use cancel::CancelFlag;
pub use classify::{ChangeFlags, Classification, Status};
pub use diff::{DiffOptions, DiffOutcome};
pub use engine::{Engine, FileInfo, SessionHandle, SnapshotResolver};
pub use error::{Error, Result};
pub use session::{BuildOptions, ComparisonSession, FileEntry, Location, Roots};
pub use undo::{
    ExecutionReport, StepOutcome, StepReport, UndoAction, UndoExecutor, UndoPlan, UndoStatistic,
    UndoStep,
};
pub use walk::{Scope, TreeWalker, WalkIssue};
