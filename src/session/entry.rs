//! Comparison entries.
//!
//! A [`FileEntry`] is one relative path considered by a comparison, with the
//! attributes captured on both sides and the derived classification. The
//! undo flag is the only caller-mutable piece of state; mutation goes
//! through the owning session so that concurrent cursors over one session
//! can never disagree about the selection.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::attrs::PathAttributes;
use crate::classify::{classify, ChangeFlags, Status};
use crate::walk::WalkedEntry;

/// The three roots an entry's path can be rendered against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    /// The pre-snapshot root
    Pre,
    /// The post-snapshot root
    Post,
    /// The live system root
    System,
}

/// The root directories of one comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roots {
    pub pre: PathBuf,
    pub post: PathBuf,
    pub system: PathBuf,
}

impl Roots {
    pub fn new(pre: impl Into<PathBuf>, post: impl Into<PathBuf>) -> Self {
        Self {
            pre: pre.into(),
            post: post.into(),
            system: PathBuf::from("/"),
        }
    }

    pub fn with_system(mut self, system: impl Into<PathBuf>) -> Self {
        self.system = system.into();
        self
    }

    pub fn root(&self, loc: Location) -> &Path {
        match loc {
            Location::Pre => &self.pre,
            Location::Post => &self.post,
            Location::System => &self.system,
        }
    }

    /// Render a relative entry path (leading slash) against one root.
    pub fn absolute_path(&self, entry_path: &str, loc: Location) -> PathBuf {
        self.root(loc).join(entry_path.trim_start_matches('/'))
    }
}

/// One path considered by a comparison
#[derive(Debug, Clone)]
pub struct FileEntry {
    path: String,
    pre: Option<PathAttributes>,
    post: Option<PathAttributes>,
    status: Status,
    flags: ChangeFlags,
    undo: bool,
    issue: Option<String>,
}

impl FileEntry {
    /// Classify a walked path into an entry. The undo flag defaults to
    /// selected for every changed path that classified cleanly; an entry
    /// carrying an issue must be selected explicitly.
    pub(crate) fn from_walked(walked: WalkedEntry) -> Self {
        let capture_issue = walked.issue;
        let classification = classify(walked.pre.as_ref(), walked.post.as_ref());

        // A side that failed capture is unknown, not absent. Deriving
        // Created or Deleted from it would let a transient read error plan
        // the removal of a healthy file, so the entry is flagged as
        // modified instead.
        let (status, flags) = if capture_issue.is_some() {
            (
                Status::Modified,
                ChangeFlags {
                    content: true,
                    ..ChangeFlags::default()
                },
            )
        } else {
            (classification.status, classification.flags)
        };

        let issue = match (capture_issue, classification.issue) {
            (Some(a), Some(b)) => Some(format!("{}; {}", a, b)),
            (a, b) => a.or(b),
        };

        Self {
            path: walked.path,
            pre: walked.pre,
            post: walked.post,
            status,
            flags,
            undo: issue.is_none() && status != Status::Unchanged,
            issue,
        }
    }

    /// Relative path with a leading slash; unique key within one session
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn flags(&self) -> ChangeFlags {
        self.flags
    }

    pub fn present_in_pre(&self) -> bool {
        self.pre.is_some()
    }

    pub fn present_in_post(&self) -> bool {
        self.post.is_some()
    }

    pub fn pre_attrs(&self) -> Option<&PathAttributes> {
        self.pre.as_ref()
    }

    pub fn post_attrs(&self) -> Option<&PathAttributes> {
        self.post.as_ref()
    }

    /// Whether this entry is selected for undo
    pub fn undo(&self) -> bool {
        self.undo
    }

    pub(crate) fn set_undo(&mut self, value: bool) {
        self.undo = value;
    }

    /// Localized read failure attached to this entry, if any
    pub fn issue(&self) -> Option<&str> {
        self.issue.as_deref()
    }

    /// The entry's path rendered against one of the three roots.
    pub fn absolute_path(&self, loc: Location, roots: &Roots) -> PathBuf {
        roots.absolute_path(&self.path, loc)
    }
}
