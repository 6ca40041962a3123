//! Tree walker.
//!
//! Produces the ordered, deduplicated union of relative paths present in
//! either of two root directories as a lazy iterator. Both sides of each
//! directory are listed, sorted by name and merged, so the sequence is
//! totally ordered by path-component sequence and parents always precede
//! their children. A path present on only one side still yields exactly one
//! item; its whole subtree is enumerated from that side alone.
//!
//! Symlinks are opaque leaves. The walker never resolves a link to decide
//! whether to descend, which keeps cyclic links harmless and traversal
//! inside the snapshot roots.
//!
//! An unreadable directory yields a [`WalkIssue`] for that subtree and the
//! walk continues with its siblings.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::attrs::PathAttributes;
use crate::cancel::CancelFlag;

/// Optional path-prefix restriction limiting which entries a walk yields.
///
/// The prefix is a relative path with a leading slash, e.g. `/etc`. Entries
/// equal to or below the prefix are admitted; everything else is filtered
/// out while traversal still descends toward the prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    prefix: String,
}

impl Scope {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.starts_with('/') {
            prefix.insert(0, '/');
        }
        while prefix.len() > 1 && prefix.ends_with('/') {
            prefix.pop();
        }
        Self { prefix }
    }

    /// Whether `rel` itself is inside the scope.
    pub fn admits(&self, rel: &str) -> bool {
        self.prefix == "/"
            || rel == self.prefix
            || rel.starts_with(&format!("{}/", self.prefix))
    }

    /// Whether anything below the directory `rel` can be inside the scope.
    fn can_descend(&self, rel: &str) -> bool {
        rel.is_empty() || self.admits(rel) || self.prefix.starts_with(&format!("{}/", rel))
    }
}

/// A directory that could not be read; its subtree is missing from the walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkIssue {
    /// Relative path of the unreadable directory
    pub path: String,
    pub message: String,
}

/// One path from the union of both trees, with per-side attributes
#[derive(Debug, Clone)]
pub struct WalkedEntry {
    /// Relative path with a leading slash
    pub path: String,
    pub pre: Option<PathAttributes>,
    pub post: Option<PathAttributes>,
    /// Localized metadata read failure for either side, if any
    pub issue: Option<String>,
}

/// Item yielded by [`UnionWalk`]
#[derive(Debug)]
pub enum WalkItem {
    Entry(WalkedEntry),
    Issue(WalkIssue),
}

/// Configuration for a union walk
#[derive(Debug, Clone, Default)]
pub struct TreeWalker {
    scope: Option<Scope>,
    cancel: Option<CancelFlag>,
}

impl TreeWalker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the walk to a path prefix
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Attach a cooperative cancellation flag, checked between entries
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Start a walk over the union of `pre_root` and `post_root`.
    ///
    /// The returned iterator is lazy; calling `walk` again restarts from
    /// the beginning with fresh directory listings.
    pub fn walk(&self, pre_root: &Path, post_root: &Path) -> UnionWalk {
        let mut pending = VecDeque::new();
        let pre = read_dir_sorted(pre_root, "", &mut pending);
        let post = read_dir_sorted(post_root, "", &mut pending);

        UnionWalk {
            scope: self.scope.clone(),
            cancel: self.cancel.clone(),
            pending,
            stack: vec![Frame::Merge { pre, post }],
        }
    }
}

/// One name inside a directory, on one side
#[derive(Debug)]
struct DirItem {
    /// Relative path with leading slash
    rel: String,
    /// Absolute path on this side
    abs: PathBuf,
}

enum Frame {
    /// A directory present on both sides, merged name by name
    Merge {
        pre: VecDeque<DirItem>,
        post: VecDeque<DirItem>,
    },
    /// A subtree present on one side only, enumerated depth-first
    OneSide {
        pre_side: bool,
        rel_base: String,
        abs_base: PathBuf,
        iter: walkdir::IntoIter,
    },
}

/// What the top frame produced for this step
enum Step {
    PopFrame,
    Lonesome(DirItem, bool),
    Twosome(DirItem, DirItem),
    Emit(WalkItem),
}

/// Lazy merge-sorted union of two trees
pub struct UnionWalk {
    scope: Option<Scope>,
    cancel: Option<CancelFlag>,
    pending: VecDeque<WalkItem>,
    stack: Vec<Frame>,
}

impl UnionWalk {
    fn admitted(&self, rel: &str) -> bool {
        self.scope.as_ref().map_or(true, |s| s.admits(rel))
    }

    fn can_descend(&self, rel: &str) -> bool {
        self.scope.as_ref().map_or(true, |s| s.can_descend(rel))
    }

    /// Capture one side of an entry, downgrading failures to an issue note.
    fn capture_side(abs: &Path, issue: &mut Option<String>) -> Option<PathAttributes> {
        match PathAttributes::capture(abs) {
            Ok(attrs) => attrs,
            Err(e) => {
                tracing::warn!(path = %abs.display(), error = %e, "Failed to read metadata");
                *issue = Some(format!("metadata read failed: {}", e));
                None
            }
        }
    }

    /// Queue depth-first enumeration of a subtree present on one side only.
    fn push_one_side(&mut self, abs: &Path, rel: &str, pre_side: bool) {
        self.stack.push(Frame::OneSide {
            pre_side,
            rel_base: rel.to_string(),
            abs_base: abs.to_path_buf(),
            iter: WalkDir::new(abs)
                .min_depth(1)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter(),
        });
    }

    /// Emit one path present on a single side and queue its subtree when it
    /// is a directory.
    fn lonesome(&mut self, item: DirItem, pre_side: bool) -> WalkedEntry {
        let mut issue = None;
        let attrs = Self::capture_side(&item.abs, &mut issue);

        if attrs.as_ref().is_some_and(|a| a.is_dir()) && self.can_descend(&item.rel) {
            self.push_one_side(&item.abs, &item.rel, pre_side);
        }

        let (pre, post) = if pre_side { (attrs, None) } else { (None, attrs) };
        WalkedEntry {
            path: item.rel,
            pre,
            post,
            issue,
        }
    }

    /// Emit one path present on both sides and queue subtree traversal.
    ///
    /// Matching directories are merged further; a type change descends each
    /// side separately so the subtree shows up as one-sided entries.
    fn twosome(&mut self, pre_item: DirItem, post_item: DirItem) -> WalkedEntry {
        let mut issue = None;
        let pre = Self::capture_side(&pre_item.abs, &mut issue);
        let post = Self::capture_side(&post_item.abs, &mut issue);

        let pre_dir = pre.as_ref().is_some_and(|a| a.is_dir());
        let post_dir = post.as_ref().is_some_and(|a| a.is_dir());

        if self.can_descend(&pre_item.rel) {
            if pre_dir && post_dir {
                let pre_listing =
                    read_dir_sorted(&pre_item.abs, &pre_item.rel, &mut self.pending);
                let post_listing =
                    read_dir_sorted(&post_item.abs, &post_item.rel, &mut self.pending);
                self.stack.push(Frame::Merge {
                    pre: pre_listing,
                    post: post_listing,
                });
            } else if pre_dir {
                self.push_one_side(&pre_item.abs, &pre_item.rel, true);
            } else if post_dir {
                self.push_one_side(&post_item.abs, &post_item.rel, false);
            }
        }

        WalkedEntry {
            path: pre_item.rel,
            pre,
            post,
            issue,
        }
    }

    /// Advance the top frame by one item.
    fn step(&mut self) -> Option<Step> {
        let frame = self.stack.last_mut()?;

        match frame {
            Frame::Merge { pre, post } => Some(match (pre.front(), post.front()) {
                (None, None) => Step::PopFrame,
                (Some(_), None) => Step::Lonesome(pre.pop_front().unwrap(), true),
                (None, Some(_)) => Step::Lonesome(post.pop_front().unwrap(), false),
                (Some(a), Some(b)) => {
                    if a.rel < b.rel {
                        Step::Lonesome(pre.pop_front().unwrap(), true)
                    } else if b.rel < a.rel {
                        Step::Lonesome(post.pop_front().unwrap(), false)
                    } else {
                        let pre_item = pre.pop_front().unwrap();
                        let post_item = post.pop_front().unwrap();
                        Step::Twosome(pre_item, post_item)
                    }
                }
            }),
            Frame::OneSide {
                pre_side,
                rel_base,
                abs_base,
                iter,
            } => {
                let pre_side = *pre_side;
                match iter.next() {
                    None => Some(Step::PopFrame),
                    Some(Err(e)) => {
                        let rel = e
                            .path()
                            .and_then(|p| relativize(rel_base, abs_base, p))
                            .unwrap_or_else(|| rel_base.clone());
                        tracing::warn!(path = %rel, error = %e, "Failed to read subtree");
                        Some(Step::Emit(WalkItem::Issue(WalkIssue {
                            path: rel,
                            message: format!("subtree read failed: {}", e),
                        })))
                    }
                    Some(Ok(entry)) => {
                        let rel = relativize(rel_base, abs_base, entry.path())
                            .unwrap_or_else(|| rel_base.clone());
                        let mut issue = None;
                        let attrs = Self::capture_side(entry.path(), &mut issue);
                        let (pre, post) = if pre_side { (attrs, None) } else { (None, attrs) };
                        Some(Step::Emit(WalkItem::Entry(WalkedEntry {
                            path: rel,
                            pre,
                            post,
                            issue,
                        })))
                    }
                }
            }
        }
    }
}

impl Iterator for UnionWalk {
    type Item = WalkItem;

    fn next(&mut self) -> Option<WalkItem> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }

            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return None;
            }

            let item = match self.step()? {
                Step::PopFrame => {
                    self.stack.pop();
                    continue;
                }
                Step::Lonesome(item, pre_side) => WalkItem::Entry(self.lonesome(item, pre_side)),
                Step::Twosome(pre_item, post_item) => {
                    WalkItem::Entry(self.twosome(pre_item, post_item))
                }
                Step::Emit(item) => item,
            };

            match &item {
                WalkItem::Entry(e) if !self.admitted(&e.path) => continue,
                _ => return Some(item),
            }
        }
    }
}

/// Relative path (with leading slash) of `abs` inside a one-sided subtree.
fn relativize(rel_base: &str, abs_base: &Path, abs: &Path) -> Option<String> {
    let suffix = abs.strip_prefix(abs_base).ok()?;
    if suffix.as_os_str().is_empty() {
        return Some(rel_base.to_string());
    }
    Some(format!("{}/{}", rel_base, suffix.to_string_lossy()))
}

/// List one directory sorted by name. A read failure is downgraded to a
/// [`WalkIssue`] and an empty listing, so the walk continues with siblings.
fn read_dir_sorted(
    abs_dir: &Path,
    rel_dir: &str,
    pending: &mut VecDeque<WalkItem>,
) -> VecDeque<DirItem> {
    let dir_rel = || {
        if rel_dir.is_empty() {
            "/".to_string()
        } else {
            rel_dir.to_string()
        }
    };

    let entries = match fs::read_dir(abs_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = %abs_dir.display(), error = %e, "Failed to read directory");
            pending.push_back(WalkItem::Issue(WalkIssue {
                path: dir_rel(),
                message: format!("directory read failed: {}", e),
            }));
            return VecDeque::new();
        }
    };

    let mut items: Vec<DirItem> = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => {
                let name = entry.file_name().to_string_lossy().into_owned();
                items.push(DirItem {
                    rel: format!("{}/{}", rel_dir, name),
                    abs: entry.path(),
                });
            }
            Err(e) => {
                tracing::warn!(path = %abs_dir.display(), error = %e, "Failed to read directory entry");
                pending.push_back(WalkItem::Issue(WalkIssue {
                    path: dir_rel(),
                    message: format!("directory entry read failed: {}", e),
                }));
            }
        }
    }

    items.sort_by(|a, b| a.rel.cmp(&b.rel));
    items.into()
}
