//! Comparison sessions.
//!
//! A [`ComparisonSession`] owns the ordered result of walking and
//! classifying every path in the union of two snapshot roots. The sequence
//! is strictly ordered by path-component sequence and contains exactly one
//! entry per path present in either root; unchanged entries are retained so
//! full-tree iteration stays possible, but the changed-files view excludes
//! them.
//!
//! Iteration order is a pure function of on-disk state: rebuilding over an
//! unchanged filesystem yields the same sequence.

mod entry;

pub use entry::{FileEntry, Location, Roots};

use std::cmp::Ordering;

use crate::cancel::CancelFlag;
use crate::classify::Status;
use crate::error::{Error, Result};
use crate::walk::{Scope, TreeWalker, WalkIssue, WalkItem};

/// Options for building a session
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    scope: Option<Scope>,
    cancel: Option<CancelFlag>,
    live: Option<Location>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the comparison to a path prefix
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Attach a cooperative cancellation flag, checked between entries
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Mark one side of the comparison as the live system rather than an
    /// immutable snapshot
    pub fn with_live(mut self, live: Location) -> Self {
        self.live = Some(live);
        self
    }
}

/// Ordered comparison of two snapshot roots
#[derive(Debug)]
pub struct ComparisonSession {
    roots: Roots,
    live: Option<Location>,
    entries: Vec<FileEntry>,
    walk_issues: Vec<WalkIssue>,
}

impl ComparisonSession {
    /// Walk and classify every path in scope under the two roots.
    ///
    /// Entry-level read failures are attached to their entries and
    /// unreadable subtrees are recorded as [`WalkIssue`]s; only missing or
    /// non-directory roots fail the build as a whole. With a cancellation
    /// flag set mid-build, the session holds whatever was processed.
    pub fn build(roots: Roots, options: BuildOptions) -> Result<Self> {
        for loc in [Location::Pre, Location::Post] {
            let root = roots.root(loc);
            let metadata = std::fs::metadata(root)
                .map_err(|_| Error::RootNotFound(root.to_path_buf()))?;
            if !metadata.is_dir() {
                return Err(Error::NotADirectory(root.to_path_buf()));
            }
        }

        let mut walker = TreeWalker::new();
        if let Some(scope) = options.scope {
            walker = walker.with_scope(scope);
        }
        if let Some(cancel) = options.cancel {
            walker = walker.with_cancel(cancel);
        }

        let mut entries = Vec::new();
        let mut walk_issues = Vec::new();

        for item in walker.walk(&roots.pre, &roots.post) {
            match item {
                WalkItem::Entry(walked) => entries.push(FileEntry::from_walked(walked)),
                WalkItem::Issue(issue) => walk_issues.push(issue),
            }
        }

        let changed = entries
            .iter()
            .filter(|e| e.status() != Status::Unchanged)
            .count();
        tracing::info!(
            pre = %roots.pre.display(),
            post = %roots.post.display(),
            entries = entries.len(),
            changed,
            issues = walk_issues.len(),
            "Built comparison session"
        );

        Ok(Self {
            roots,
            live: options.live,
            entries,
            walk_issues,
        })
    }

    pub fn roots(&self) -> &Roots {
        &self.roots
    }

    /// Total number of entries, unchanged ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in path order
    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter()
    }

    /// Entries with a status other than `Unchanged`, in path order
    pub fn changed(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries
            .iter()
            .filter(|e| e.status() != Status::Unchanged)
    }

    /// Subtrees that could not be read during the build
    pub fn walk_issues(&self) -> &[WalkIssue] {
        &self.walk_issues
    }

    /// Which side of the comparison is the live system, if any.
    ///
    /// `None` means both sides are immutable snapshots and no entry can go
    /// stale between build and execution.
    pub fn current_marker(&self) -> Option<Location> {
        self.live
    }

    /// Look up an entry by its relative path.
    pub fn find(&self, path: &str) -> Option<&FileEntry> {
        self.index_of(path).ok().map(|i| &self.entries[i])
    }

    /// The entry preceding `path` in path order; `None` before the first
    /// entry. The probe path itself does not have to exist in the session.
    pub fn entry_before(&self, path: &str) -> Option<&FileEntry> {
        let index = match self.index_of(path) {
            Ok(i) | Err(i) => i,
        };
        index.checked_sub(1).map(|i| &self.entries[i])
    }

    /// The entry following `path` in path order; `None` past the last entry.
    pub fn entry_after(&self, path: &str) -> Option<&FileEntry> {
        let index = match self.index_of(path) {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        self.entries.get(index)
    }

    /// Set the undo flag of one entry. Idempotent; readable immediately.
    pub fn set_undo(&mut self, path: &str, value: bool) -> Result<()> {
        let index = self
            .index_of(path)
            .map_err(|_| Error::PathNotFound(path.to_string()))?;
        self.entries[index].set_undo(value);
        Ok(())
    }

    /// Set the undo flag of every changed entry.
    pub fn set_undo_all(&mut self, value: bool) {
        for entry in &mut self.entries {
            if entry.status() != Status::Unchanged {
                entry.set_undo(value);
            }
        }
    }

    pub fn get_undo(&self, path: &str) -> Result<bool> {
        self.find(path)
            .map(FileEntry::undo)
            .ok_or_else(|| Error::PathNotFound(path.to_string()))
    }

    fn index_of(&self, path: &str) -> std::result::Result<usize, usize> {
        self.entries
            .binary_search_by(|e| path_cmp(e.path(), path))
    }
}

/// Order two relative paths by their component sequences.
///
/// This matches the walker's emission order: siblings sort by name and a
/// parent precedes everything below it, even when a sibling name would sort
/// before `'/'` as a raw byte.
pub(crate) fn path_cmp(a: &str, b: &str) -> Ordering {
    a.trim_start_matches('/')
        .split('/')
        .cmp(b.trim_start_matches('/').split('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(path: &Path, content: &[u8]) {
        File::create(path).unwrap().write_all(content).unwrap();
    }

    fn write_at(path: &Path, content: &[u8], mtime: i64) {
        write(path, content);
        filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    fn build(pre: &Path, post: &Path) -> ComparisonSession {
        ComparisonSession::build(Roots::new(pre, post), BuildOptions::new()).unwrap()
    }

    #[test]
    fn test_self_comparison_is_all_unchanged() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("dir")).unwrap();
        write(&root.path().join("dir/file"), b"content");
        write(&root.path().join("top"), b"t");

        let session = build(root.path(), root.path());
        assert_eq!(session.len(), 3);
        assert_eq!(session.changed().count(), 0);
        assert!(session.iter().all(|e| e.status() == Status::Unchanged));
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("gone");
        let err = ComparisonSession::build(
            Roots::new(&missing, root.path()),
            BuildOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::RootNotFound(_)));
    }

    #[test]
    fn test_exactly_one_entry_per_union_path() {
        let pre = TempDir::new().unwrap();
        let post = TempDir::new().unwrap();
        write_at(&pre.path().join("a"), b"X", 1_000);
        write_at(&post.path().join("a"), b"Y", 2_000);
        write(&post.path().join("b"), b"new");

        let session = build(pre.path(), post.path());
        let paths: Vec<_> = session.iter().map(|e| e.path().to_string()).collect();
        assert_eq!(paths, vec!["/a", "/b"]);

        assert_eq!(session.find("/a").unwrap().status(), Status::Modified);
        assert_eq!(session.find("/b").unwrap().status(), Status::Created);
        assert!(session.find("/c").is_none());
    }

    #[test]
    fn test_navigation_roundtrip_and_sentinels() {
        let pre = TempDir::new().unwrap();
        let post = TempDir::new().unwrap();
        for name in ["a", "b", "c"] {
            write(&pre.path().join(name), b"x");
        }

        let session = build(pre.path(), post.path());

        // entry_after(entry_before(e)) == e for non-boundary entries.
        let b = session.find("/b").unwrap().path().to_string();
        let before = session.entry_before(&b).unwrap();
        let roundtrip = session.entry_after(before.path()).unwrap();
        assert_eq!(roundtrip.path(), b);

        // Boundary sentinels are stable under repeated calls.
        assert!(session.entry_before("/a").is_none());
        assert!(session.entry_before("/a").is_none());
        assert!(session.entry_after("/c").is_none());
        assert!(session.entry_after("/c").is_none());
    }

    #[test]
    fn test_navigation_from_probe_path_between_entries() {
        let pre = TempDir::new().unwrap();
        let post = TempDir::new().unwrap();
        write(&pre.path().join("a"), b"x");
        write(&pre.path().join("c"), b"x");

        let session = build(pre.path(), post.path());
        assert_eq!(session.entry_after("/b").unwrap().path(), "/c");
        assert_eq!(session.entry_before("/b").unwrap().path(), "/a");
    }

    #[test]
    fn test_undo_flag_defaults_and_idempotence() {
        let pre = TempDir::new().unwrap();
        let post = TempDir::new().unwrap();
        write(&pre.path().join("deleted"), b"x");
        write(&pre.path().join("same"), b"s");
        fs::copy(pre.path().join("same"), post.path().join("same")).unwrap();
        filetime::set_file_mtime(
            post.path().join("same"),
            filetime::FileTime::from_last_modification_time(
                &fs::metadata(pre.path().join("same")).unwrap(),
            ),
        )
        .unwrap();

        let mut session = build(pre.path(), post.path());
        assert!(session.get_undo("/deleted").unwrap());
        assert!(!session.get_undo("/same").unwrap());

        session.set_undo("/deleted", false).unwrap();
        assert!(!session.get_undo("/deleted").unwrap());

        // Idempotent: setting the same value twice changes nothing further.
        session.set_undo("/deleted", true).unwrap();
        session.set_undo("/deleted", true).unwrap();
        assert!(session.get_undo("/deleted").unwrap());

        assert!(session.set_undo("/nonexistent", true).is_err());
    }

    #[test]
    fn test_set_undo_all_skips_unchanged() {
        let pre = TempDir::new().unwrap();
        let post = TempDir::new().unwrap();
        write(&pre.path().join("gone"), b"x");
        write(&pre.path().join("same"), b"s");
        fs::copy(pre.path().join("same"), post.path().join("same")).unwrap();
        filetime::set_file_mtime(
            post.path().join("same"),
            filetime::FileTime::from_last_modification_time(
                &fs::metadata(pre.path().join("same")).unwrap(),
            ),
        )
        .unwrap();

        let mut session = build(pre.path(), post.path());
        session.set_undo_all(false);
        assert!(!session.get_undo("/gone").unwrap());
        session.set_undo_all(true);
        assert!(session.get_undo("/gone").unwrap());
        assert!(!session.get_undo("/same").unwrap());
    }

    #[test]
    fn test_current_marker() {
        let pre = TempDir::new().unwrap();
        let post = TempDir::new().unwrap();

        let snapshots = build(pre.path(), post.path());
        assert_eq!(snapshots.current_marker(), None);

        let live = ComparisonSession::build(
            Roots::new(pre.path(), post.path()),
            BuildOptions::new().with_live(Location::Post),
        )
        .unwrap();
        assert_eq!(live.current_marker(), Some(Location::Post));
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let pre = TempDir::new().unwrap();
        let post = TempDir::new().unwrap();
        fs::create_dir(pre.path().join("d")).unwrap();
        write(&pre.path().join("d/f"), b"1");
        write(&post.path().join("z"), b"2");

        let first: Vec<_> = build(pre.path(), post.path())
            .iter()
            .map(|e| (e.path().to_string(), e.status()))
            .collect();
        let second: Vec<_> = build(pre.path(), post.path())
            .iter()
            .map(|e| (e.path().to_string(), e.status()))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_path_cmp_parent_precedes_subtree() {
        assert_eq!(path_cmp("/a", "/a/b"), Ordering::Less);
        assert_eq!(path_cmp("/a/z", "/a!b"), Ordering::Less);
        assert_eq!(path_cmp("/a", "/a"), Ordering::Equal);
        assert_eq!(path_cmp("/b", "/a"), Ordering::Greater);
    }
}
