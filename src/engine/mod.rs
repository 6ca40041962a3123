//! Transport-agnostic engine surface.
//!
//! The [`Engine`] owns live comparison sessions behind opaque handles and
//! exposes the operations a frontend needs: create a comparison, list its
//! changed files, render diffs, drive the undo selection and execute the
//! undo. Snapshot numbers are translated to directories by a caller-supplied
//! [`SnapshotResolver`]; number `0` conventionally names the live system.
//!
//! The engine serializes nothing itself and installs no subscriber; it is
//! meant to sit behind whatever transport the caller brings. Exclusive
//! access to the snapshot trees while a comparison or undo is in flight is
//! the caller's responsibility.

use std::fmt;
use std::path::PathBuf;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::{ChangeFlags, Status};
use crate::diff::{self, DiffOptions, DiffOutcome};
use crate::error::{Error, Result};
use crate::session::{BuildOptions, ComparisonSession, Location, Roots};
use crate::undo::{plan, ExecutionReport, UndoExecutor, UndoStatistic, UndoStep};
use crate::walk::WalkIssue;

/// Opaque identifier of one live comparison session
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Maps (config, snapshot number) pairs to on-disk snapshot roots.
///
/// `identity` must return a token that changes whenever the snapshot's
/// content may have changed; the engine uses it to decide whether a cached
/// comparison is still valid.
pub trait SnapshotResolver: Send + Sync {
    fn resolve(&self, config: &str, number: u32) -> Result<PathBuf>;
    fn identity(&self, config: &str, number: u32) -> Result<String>;
}

/// Wire-friendly view of one changed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub path: String,
    pub status: Status,
    pub flags: ChangeFlags,
    pub undo: bool,
    /// Localized read failure attached to this entry, if any
    pub issue: Option<String>,
}

#[derive(Debug)]
struct CachedComparison {
    pre_identity: String,
    post_identity: String,
    handle: SessionHandle,
}

type CacheKey = (String, u32, u32);

/// Session registry and operation surface
pub struct Engine<R: SnapshotResolver> {
    resolver: R,
    sessions: DashMap<SessionHandle, ComparisonSession>,
    cache: DashMap<CacheKey, CachedComparison>,
}

impl<R: SnapshotResolver> Engine<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            sessions: DashMap::new(),
            cache: DashMap::new(),
        }
    }

    /// Build (or reuse) the comparison of two snapshots of one config.
    ///
    /// Returns the session handle and the number of changed files. A cached
    /// session is reused as long as both snapshot identities still match;
    /// otherwise it is dropped and rebuilt.
    pub fn create_comparison(
        &self,
        config: &str,
        pre_number: u32,
        post_number: u32,
    ) -> Result<(SessionHandle, usize)> {
        if pre_number == post_number {
            return Err(Error::SnapshotsIdentical);
        }

        let pre_identity = self.resolver.identity(config, pre_number)?;
        let post_identity = self.resolver.identity(config, post_number)?;

        let key = (config.to_string(), pre_number, post_number);
        if let Some(cached) = self.cache.get(&key) {
            if cached.pre_identity == pre_identity && cached.post_identity == post_identity {
                if let Some(session) = self.sessions.get(&cached.handle) {
                    return Ok((cached.handle, session.changed().count()));
                }
            }
        }

        let pre_root = self.resolver.resolve(config, pre_number)?;
        let post_root = self.resolver.resolve(config, post_number)?;
        if pre_root == post_root {
            return Err(Error::SnapshotsIdentical);
        }

        let mut options = BuildOptions::new();
        if post_number == 0 {
            options = options.with_live(Location::Post);
        } else if pre_number == 0 {
            options = options.with_live(Location::Pre);
        }

        let session = ComparisonSession::build(Roots::new(pre_root, post_root), options)?;
        let changed = session.changed().count();
        let handle = SessionHandle::new();

        tracing::info!(
            config = %config,
            pre = pre_number,
            post = post_number,
            %handle,
            changed,
            "Created comparison"
        );

        self.sessions.insert(handle, session);
        if let Some(old) = self.cache.insert(
            key,
            CachedComparison {
                pre_identity,
                post_identity,
                handle,
            },
        ) {
            self.sessions.remove(&old.handle);
        }

        Ok((handle, changed))
    }

    /// Drop a session and its cache slot.
    pub fn delete_comparison(&self, handle: SessionHandle) -> Result<()> {
        self.sessions
            .remove(&handle)
            .ok_or(Error::SessionNotFound(handle))?;
        self.cache.retain(|_, cached| cached.handle != handle);
        Ok(())
    }

    /// All changed files of a session, in path order.
    pub fn get_files(&self, handle: SessionHandle) -> Result<Vec<FileInfo>> {
        let session = self.session(handle)?;
        Ok(session
            .changed()
            .map(|entry| FileInfo {
                path: entry.path().to_string(),
                status: entry.status(),
                flags: entry.flags(),
                undo: entry.undo(),
                issue: entry.issue().map(str::to_string),
            })
            .collect())
    }

    /// Subtrees the build could not read; empty when the walk was complete.
    pub fn get_walk_issues(&self, handle: SessionHandle) -> Result<Vec<WalkIssue>> {
        Ok(self.session(handle)?.walk_issues().to_vec())
    }

    /// Unified diff of one entry, computed on demand.
    pub fn get_diff(
        &self,
        handle: SessionHandle,
        path: &str,
        options: &DiffOptions,
    ) -> Result<DiffOutcome> {
        let session = self.session(handle)?;
        let entry = session
            .find(path)
            .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
        diff::diff(entry, session.roots(), options)
    }

    pub fn set_undo(&self, handle: SessionHandle, path: &str, value: bool) -> Result<()> {
        self.session_mut(handle)?.set_undo(path, value)
    }

    pub fn set_undo_all(&self, handle: SessionHandle, value: bool) -> Result<()> {
        self.session_mut(handle)?.set_undo_all(value);
        Ok(())
    }

    pub fn get_undo(&self, handle: SessionHandle, path: &str) -> Result<bool> {
        self.session(handle)?.get_undo(path)
    }

    /// Aggregate counts over the currently selected entries.
    pub fn get_undo_statistic(&self, handle: SessionHandle) -> Result<UndoStatistic> {
        let session = self.session(handle)?;
        Ok(plan(&session).statistic())
    }

    /// The ordered steps an undo of the current selection would take.
    pub fn get_undo_steps(&self, handle: SessionHandle) -> Result<Vec<UndoStep>> {
        let session = self.session(handle)?;
        Ok(plan(&session).steps().to_vec())
    }

    /// Execute the undo of the current selection against the post root.
    ///
    /// The session's cache slot is invalidated afterwards, so the next
    /// `create_comparison` over the same pair rebuilds from disk. The
    /// session itself stays addressable for report inspection.
    pub fn do_undo(&self, handle: SessionHandle) -> Result<ExecutionReport> {
        let session = self.session(handle)?;
        let report = UndoExecutor::new().execute(&session, &plan(&session));
        drop(session);
        self.cache.retain(|_, cached| cached.handle != handle);
        Ok(report)
    }

    fn session(
        &self,
        handle: SessionHandle,
    ) -> Result<dashmap::mapref::one::Ref<'_, SessionHandle, ComparisonSession>> {
        self.sessions
            .get(&handle)
            .ok_or(Error::SessionNotFound(handle))
    }

    fn session_mut(
        &self,
        handle: SessionHandle,
    ) -> Result<dashmap::mapref::one::RefMut<'_, SessionHandle, ComparisonSession>> {
        self.sessions
            .get_mut(&handle)
            .ok_or(Error::SessionNotFound(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs::{self, File};
    use std::io::Write;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Resolves numbers to subdirectories of one base dir; identities are
    /// stored in a shared map so tests can invalidate them.
    struct TestResolver {
        base: PathBuf,
        identities: Arc<Mutex<HashMap<u32, String>>>,
    }

    impl TestResolver {
        fn new(base: &Path) -> Self {
            Self {
                base: base.to_path_buf(),
                identities: Arc::new(Mutex::new(HashMap::new())),
            }
        }
    }

    impl SnapshotResolver for TestResolver {
        fn resolve(&self, _config: &str, number: u32) -> Result<PathBuf> {
            let dir = if number == 0 {
                self.base.join("live")
            } else {
                self.base.join(format!("snap{}", number))
            };
            if !dir.is_dir() {
                return Err(Error::ResolveFailed(format!("no snapshot {}", number)));
            }
            Ok(dir)
        }

        fn identity(&self, _config: &str, number: u32) -> Result<String> {
            let identities = self.identities.lock().unwrap();
            Ok(identities
                .get(&number)
                .cloned()
                .unwrap_or_else(|| number.to_string()))
        }
    }

    fn write_at(path: &Path, content: &[u8], mtime: i64) {
        File::create(path).unwrap().write_all(content).unwrap();
        filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    /// snap1 and live differ in one deleted, one created and one modified
    /// file.
    fn fixture() -> TempDir {
        let base = TempDir::new().unwrap();
        fs::create_dir(base.path().join("snap1")).unwrap();
        fs::create_dir(base.path().join("live")).unwrap();
        write_at(&base.path().join("snap1/deleted"), b"X", 1_000);
        write_at(&base.path().join("snap1/mod"), b"old", 1_000);
        write_at(&base.path().join("live/mod"), b"new", 2_000);
        write_at(&base.path().join("live/created"), b"Y", 1_000);
        base
    }

    fn engine(base: &TempDir) -> Engine<TestResolver> {
        Engine::new(TestResolver::new(base.path()))
    }

    #[test]
    fn test_create_comparison_and_list_files() {
        let base = fixture();
        let engine = engine(&base);

        let (handle, changed) = engine.create_comparison("root", 1, 0).unwrap();
        assert_eq!(changed, 3);

        let files = engine.get_files(handle).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/created", "/deleted", "/mod"]);
        assert!(files.iter().all(|f| f.undo));
        assert!(files.iter().all(|f| f.issue.is_none()));
        assert_eq!(files[0].status, Status::Created);
        assert_eq!(files[1].status, Status::Deleted);
        assert_eq!(files[2].status, Status::Modified);

        assert!(engine.get_walk_issues(handle).unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_subtree_issues_are_exposed() {
        use std::os::unix::fs::PermissionsExt;

        // Meaningless as root, which can read anything.
        if unsafe { geteuid() } == 0 {
            return;
        }

        let base = fixture();
        fs::create_dir(base.path().join("live/locked")).unwrap();
        write_at(&base.path().join("live/locked/secret"), b"s", 1_000);
        fs::set_permissions(
            base.path().join("live/locked"),
            fs::Permissions::from_mode(0o000),
        )
        .unwrap();

        let engine = engine(&base);
        let result = engine.create_comparison("root", 1, 0);

        fs::set_permissions(
            base.path().join("live/locked"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();

        let (handle, _) = result.unwrap();
        let issues = engine.get_walk_issues(handle).unwrap();
        assert!(issues.iter().any(|i| i.path == "/locked"));
    }

    extern "C" {
        fn geteuid() -> u32;
    }

    #[test]
    fn test_identical_numbers_are_rejected() {
        let base = fixture();
        let engine = engine(&base);
        let err = engine.create_comparison("root", 1, 1).unwrap_err();
        assert!(matches!(err, Error::SnapshotsIdentical));
    }

    #[test]
    fn test_unknown_snapshot_fails_resolution() {
        let base = fixture();
        let engine = engine(&base);
        let err = engine.create_comparison("root", 1, 7).unwrap_err();
        assert!(matches!(err, Error::ResolveFailed(_)));
    }

    #[test]
    fn test_unknown_handle_is_reported() {
        let base = fixture();
        let engine = engine(&base);
        let bogus = SessionHandle::new();
        assert!(matches!(
            engine.get_files(bogus).unwrap_err(),
            Error::SessionNotFound(_)
        ));
    }

    #[test]
    fn test_comparison_is_cached_until_identity_changes() {
        let base = fixture();
        let engine = engine(&base);

        let (first, _) = engine.create_comparison("root", 1, 0).unwrap();
        let (second, _) = engine.create_comparison("root", 1, 0).unwrap();
        assert_eq!(first, second);

        engine
            .resolver
            .identities
            .lock()
            .unwrap()
            .insert(0, "live-v2".to_string());
        let (third, _) = engine.create_comparison("root", 1, 0).unwrap();
        assert_ne!(first, third);

        // The stale session was dropped together with its cache slot.
        assert!(matches!(
            engine.get_files(first).unwrap_err(),
            Error::SessionNotFound(_)
        ));
    }

    #[test]
    fn test_diff_and_undo_selection_via_handles() {
        let base = fixture();
        let engine = engine(&base);
        let (handle, _) = engine.create_comparison("root", 1, 0).unwrap();

        let outcome = engine
            .get_diff(handle, "/mod", &DiffOptions::default())
            .unwrap();
        match outcome {
            DiffOutcome::Text(lines) => {
                assert!(lines.iter().any(|l| l == "-old"));
                assert!(lines.iter().any(|l| l == "+new"));
            }
            DiffOutcome::Binary => panic!("expected text diff"),
        }

        assert!(engine.get_undo(handle, "/mod").unwrap());
        engine.set_undo(handle, "/mod", false).unwrap();
        assert!(!engine.get_undo(handle, "/mod").unwrap());

        engine.set_undo_all(handle, false).unwrap();
        assert!(engine.get_undo_statistic(handle).unwrap().is_empty());
        assert!(engine.get_undo_steps(handle).unwrap().is_empty());
    }

    #[test]
    fn test_do_undo_reverts_live_and_invalidates_cache() {
        let base = fixture();
        let engine = engine(&base);
        let (handle, _) = engine.create_comparison("root", 1, 0).unwrap();

        let stat = engine.get_undo_statistic(handle).unwrap();
        assert_eq!(stat.created, 1);
        assert_eq!(stat.deleted, 1);
        assert_eq!(stat.modified(), 1);

        let report = engine.do_undo(handle).unwrap();
        assert!(report.all_succeeded());
        assert_eq!(report.applied(), 3);

        assert_eq!(
            fs::read(base.path().join("live/deleted")).unwrap(),
            b"X".to_vec()
        );
        assert_eq!(
            fs::read(base.path().join("live/mod")).unwrap(),
            b"old".to_vec()
        );
        assert!(!base.path().join("live/created").exists());

        // The cache slot is gone, so a fresh comparison is built and sees
        // no remaining changes.
        let (fresh, changed) = engine.create_comparison("root", 1, 0).unwrap();
        assert_ne!(fresh, handle);
        assert_eq!(changed, 0);
    }

    #[test]
    fn test_delete_comparison() {
        let base = fixture();
        let engine = engine(&base);
        let (handle, _) = engine.create_comparison("root", 1, 0).unwrap();

        engine.delete_comparison(handle).unwrap();
        assert!(matches!(
            engine.get_files(handle).unwrap_err(),
            Error::SessionNotFound(_)
        ));
        assert!(matches!(
            engine.delete_comparison(handle).unwrap_err(),
            Error::SessionNotFound(_)
        ));
    }
}
