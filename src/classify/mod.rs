//! File classification.
//!
//! Compares the captured attributes of one path across the two sides of a
//! comparison and derives a [`Status`] plus finer-grained [`ChangeFlags`].
//! Classification is pure and total: every path in the union of both trees
//! gets exactly one status. A type mismatch always wins over content
//! comparison; a content diff across a type change is never attempted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attrs::{FileKind, PathAttributes};

/// Overall divergence of one path between the pre and post side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Absent in pre, present in post
    Created,
    /// Present in pre, absent in post
    Deleted,
    /// Present in both with a different entry kind
    TypeChanged,
    /// Same kind, content or metadata differs
    Modified,
    /// Structurally equal on both sides
    Unchanged,
}

/// Fine-grained change indicators for a path present on both sides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeFlags {
    /// File content (or symlink target) differs
    pub content: bool,
    /// Permission bits differ
    pub permissions: bool,
    /// Owning user differs
    pub owner: bool,
    /// Owning group differs
    pub group: bool,
}

impl ChangeFlags {
    pub fn any(&self) -> bool {
        self.content || self.permissions || self.owner || self.group
    }

    /// Whether only mode/ownership differ, with identical content
    pub fn metadata_only(&self) -> bool {
        !self.content && (self.permissions || self.owner || self.group)
    }
}

/// Result of classifying one path
#[derive(Debug, Clone)]
pub struct Classification {
    pub status: Status,
    pub flags: ChangeFlags,
    /// Localized read failure encountered while comparing content, if any.
    /// The path is then conservatively reported as changed.
    pub issue: Option<String>,
}

impl Classification {
    fn unchanged() -> Self {
        Self {
            status: Status::Unchanged,
            flags: ChangeFlags::default(),
            issue: None,
        }
    }

    /// Compact four-character rendering: status letter followed by
    /// permissions/user/group markers, e.g. `+...`, `c.u.`, `tpug`.
    pub fn compact(&self) -> String {
        let mut ret = String::with_capacity(4);
        ret.push(match self.status {
            Status::Created => '+',
            Status::Deleted => '-',
            Status::TypeChanged => 't',
            Status::Modified if self.flags.content => 'c',
            _ => '.',
        });
        ret.push(if self.flags.permissions { 'p' } else { '.' });
        ret.push(if self.flags.owner { 'u' } else { '.' });
        ret.push(if self.flags.group { 'g' } else { '.' });
        ret
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compact())
    }
}

/// Classify one path given its attributes on both sides.
pub fn classify(pre: Option<&PathAttributes>, post: Option<&PathAttributes>) -> Classification {
    let (pre, post) = match (pre, post) {
        (None, None) => return Classification::unchanged(),
        (None, Some(_)) => {
            return Classification {
                status: Status::Created,
                flags: ChangeFlags::default(),
                issue: None,
            }
        }
        (Some(_), None) => {
            return Classification {
                status: Status::Deleted,
                flags: ChangeFlags::default(),
                issue: None,
            }
        }
        (Some(pre), Some(post)) => (pre, post),
    };

    let mut flags = ChangeFlags {
        permissions: pre.mode != post.mode,
        owner: pre.uid != post.uid,
        group: pre.gid != post.gid,
        content: false,
    };
    let mut issue = None;

    if pre.kind != post.kind {
        return Classification {
            status: Status::TypeChanged,
            flags,
            issue,
        };
    }

    match same_content(pre, post) {
        Ok(equal) => flags.content = !equal,
        Err(e) => {
            tracing::warn!(
                pre = %pre.source().display(),
                post = %post.source().display(),
                error = %e,
                "Content comparison failed, reporting path as changed"
            );
            flags.content = true;
            issue = Some(format!("content comparison failed: {}", e));
        }
    }

    Classification {
        status: if flags.any() {
            Status::Modified
        } else {
            Status::Unchanged
        },
        flags,
        issue,
    }
}

/// Content equality for two entries of the same kind.
///
/// Regular files short-circuit on equal mtimes, then on differing sizes,
/// and only then fall back to digests. Symlinks compare their targets.
/// Directories and special files have no content of their own.
fn same_content(pre: &PathAttributes, post: &PathAttributes) -> std::io::Result<bool> {
    match pre.kind {
        FileKind::File => {
            if pre.mtime == post.mtime && pre.mtime_nsec == post.mtime_nsec {
                return Ok(true);
            }
            if pre.size != post.size {
                return Ok(false);
            }
            if pre.size == 0 {
                return Ok(true);
            }
            Ok(pre.digest()? == post.digest()?)
        }
        FileKind::Symlink => Ok(pre.link_target == post.link_target),
        _ => Ok(true),
    }
}
