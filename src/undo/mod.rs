//! Undo planning and execution.
//!
//! Undo reverts the post side of a comparison back to the pre side, one
//! selected entry at a time. Planning derives a deterministic step list
//! from a session's undo flags; execution applies the steps to the post
//! root and reports a per-step outcome without ever aborting the batch.

mod executor;
mod planner;

pub use executor::{ExecutionReport, StepOutcome, StepReport, UndoExecutor};
pub use planner::{plan, statistic, UndoPlan};

use serde::{Deserialize, Serialize};

/// What undoing one entry requires on the post side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoAction {
    /// Recreate an entry that was deleted
    Create,
    /// Remove an entry that was created
    Delete,
    /// Rewrite content (and metadata) from the pre side
    RestoreContent,
    /// Restore mode and ownership only, content is already equal
    RestoreMetadata,
    /// Remove the entry and recreate it with the pre side's kind
    ReplaceType,
}

/// One step of an undo plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoStep {
    /// Relative entry path with a leading slash
    pub path: String,
    pub action: UndoAction,
}

/// Aggregate counts over an undo plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoStatistic {
    /// Entries that will be recreated
    pub created: usize,
    /// Entries that will be removed
    pub deleted: usize,
    /// Entries whose content will be rewritten
    pub modified_content: usize,
    /// Entries whose mode or ownership will be restored
    pub modified_metadata: usize,
}

impl UndoStatistic {
    /// Entries modified in place, content and metadata-only combined
    pub fn modified(&self) -> usize {
        self.modified_content + self.modified_metadata
    }

    pub fn is_empty(&self) -> bool {
        self.created == 0 && self.deleted == 0 && self.modified() == 0
    }
}
