//! Undo plan derivation.
//!
//! Translates the selected entries of a session into an ordered step list.
//! Removals come first, in reverse path order, so children disappear before
//! their parent directories. Everything else follows in forward path order,
//! so parent directories are recreated before their children.

use crate::classify::Status;
use crate::session::{ComparisonSession, FileEntry};

use super::{UndoAction, UndoStatistic, UndoStep};

/// Ordered undo steps derived from one session's selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoPlan {
    steps: Vec<UndoStep>,
}

impl UndoPlan {
    pub fn steps(&self) -> &[UndoStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn statistic(&self) -> UndoStatistic {
        let mut stat = UndoStatistic::default();
        for step in &self.steps {
            match step.action {
                UndoAction::Create => stat.created += 1,
                UndoAction::Delete => stat.deleted += 1,
                UndoAction::RestoreContent | UndoAction::ReplaceType => {
                    stat.modified_content += 1
                }
                UndoAction::RestoreMetadata => stat.modified_metadata += 1,
            }
        }
        stat
    }
}

/// Derive the undo plan for every entry currently selected in `session`.
pub fn plan(session: &ComparisonSession) -> UndoPlan {
    let selected = session.changed().filter(|e| e.undo());

    let mut deletes = Vec::new();
    let mut rest = Vec::new();

    for entry in selected {
        let action = match action_for(entry) {
            Some(a) => a,
            None => continue,
        };
        let step = UndoStep {
            path: entry.path().to_string(),
            action,
        };
        match action {
            UndoAction::Delete => deletes.push(step),
            _ => rest.push(step),
        }
    }

    deletes.reverse();
    deletes.extend(rest);
    UndoPlan { steps: deletes }
}

/// Aggregate counts for the current selection without keeping the plan.
pub fn statistic(session: &ComparisonSession) -> UndoStatistic {
    plan(session).statistic()
}

fn action_for(entry: &FileEntry) -> Option<UndoAction> {
    match entry.status() {
        Status::Created => Some(UndoAction::Delete),
        Status::Deleted => Some(UndoAction::Create),
        Status::TypeChanged => Some(UndoAction::ReplaceType),
        Status::Modified => Some(if entry.flags().metadata_only() {
            UndoAction::RestoreMetadata
        } else {
            UndoAction::RestoreContent
        }),
        Status::Unchanged => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{BuildOptions, Roots};
    use std::fs::{self, File};
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_at(path: &Path, content: &[u8], mtime: i64) {
        File::create(path).unwrap().write_all(content).unwrap();
        filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    fn build(pre: &Path, post: &Path) -> ComparisonSession {
        ComparisonSession::build(Roots::new(pre, post), BuildOptions::new()).unwrap()
    }

    #[test]
    fn test_actions_match_statuses() {
        let pre = TempDir::new().unwrap();
        let post = TempDir::new().unwrap();
        write_at(&pre.path().join("deleted"), b"x", 1_000);
        write_at(&post.path().join("created"), b"y", 1_000);
        write_at(&pre.path().join("modified"), b"old", 1_000);
        write_at(&post.path().join("modified"), b"new!", 2_000);
        write_at(&pre.path().join("typed"), b"file", 1_000);
        fs::create_dir(post.path().join("typed")).unwrap();

        let session = build(pre.path(), post.path());
        let plan = plan(&session);

        let find = |p: &str| {
            plan.steps()
                .iter()
                .find(|s| s.path == p)
                .map(|s| s.action)
                .unwrap()
        };
        assert_eq!(find("/deleted"), UndoAction::Create);
        assert_eq!(find("/created"), UndoAction::Delete);
        assert_eq!(find("/modified"), UndoAction::RestoreContent);
        assert_eq!(find("/typed"), UndoAction::ReplaceType);
    }

    #[test]
    fn test_metadata_only_change_restores_metadata() {
        let pre = TempDir::new().unwrap();
        let post = TempDir::new().unwrap();
        let a = pre.path().join("f");
        let b = post.path().join("f");
        write_at(&a, b"same", 1_000);
        write_at(&b, b"same", 1_000);
        fs::set_permissions(&b, fs::Permissions::from_mode(0o600)).unwrap();
        fs::set_permissions(&a, fs::Permissions::from_mode(0o644)).unwrap();

        let session = build(pre.path(), post.path());
        let plan = plan(&session);
        assert_eq!(plan.steps().len(), 1);
        assert_eq!(plan.steps()[0].action, UndoAction::RestoreMetadata);
    }

    #[test]
    fn test_deletes_reverse_then_creates_forward() {
        let pre = TempDir::new().unwrap();
        let post = TempDir::new().unwrap();
        // A created subtree and a deleted subtree.
        fs::create_dir_all(post.path().join("new/sub")).unwrap();
        write_at(&post.path().join("new/sub/f"), b"x", 1_000);
        fs::create_dir(pre.path().join("old")).unwrap();
        write_at(&pre.path().join("old/g"), b"y", 1_000);

        let session = build(pre.path(), post.path());
        let plan = plan(&session);
        let paths: Vec<_> = plan.steps().iter().map(|s| s.path.as_str()).collect();

        // Children of the created subtree are removed before their parents,
        // parents of the deleted subtree are recreated before their children.
        assert_eq!(
            paths,
            vec!["/new/sub/f", "/new/sub", "/new", "/old", "/old/g"]
        );
        assert!(plan.steps()[..3]
            .iter()
            .all(|s| s.action == UndoAction::Delete));
        assert!(plan.steps()[3..]
            .iter()
            .all(|s| s.action == UndoAction::Create));
    }

    #[test]
    fn test_deselected_entries_are_excluded() {
        let pre = TempDir::new().unwrap();
        let post = TempDir::new().unwrap();
        write_at(&pre.path().join("a"), b"x", 1_000);
        write_at(&pre.path().join("b"), b"y", 1_000);

        let mut session = build(pre.path(), post.path());
        session.set_undo("/b", false).unwrap();

        let plan = plan(&session);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps()[0].path, "/a");
    }

    #[test]
    fn test_statistic_matches_step_tally() {
        let pre = TempDir::new().unwrap();
        let post = TempDir::new().unwrap();
        write_at(&pre.path().join("gone"), b"x", 1_000);
        write_at(&post.path().join("fresh"), b"y", 1_000);
        write_at(&pre.path().join("mod"), b"old", 1_000);
        write_at(&post.path().join("mod"), b"new", 2_000);

        let session = build(pre.path(), post.path());
        let stat = statistic(&session);
        assert_eq!(stat.created, 1);
        assert_eq!(stat.deleted, 1);
        assert_eq!(stat.modified_content, 1);
        assert_eq!(stat.modified_metadata, 0);
        assert_eq!(stat.modified(), 1);
        assert!(!stat.is_empty());

        let empty = TempDir::new().unwrap();
        let session = build(empty.path(), empty.path());
        assert!(statistic(&session).is_empty());
    }
}
