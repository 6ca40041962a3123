//! Undo execution.
//!
//! Applies an [`UndoPlan`](super::UndoPlan) to the post root. Every step
//! gets exactly one outcome; a failing step is recorded and execution moves
//! on to the next one. Before touching a path the executor re-captures it
//! and refuses steps whose target no longer matches what the comparison
//! saw, so a post side that drifted since the build is never clobbered.
//!
//! Content rewrites go through a temporary file in the target's directory
//! followed by a rename, so readers never observe a half-written file.

use std::fs::{self, File, Permissions};
use std::io;
use std::os::unix::fs::{chown, lchown, symlink, PermissionsExt};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::attrs::{FileKind, PathAttributes};
use crate::cancel::CancelFlag;
use crate::session::{ComparisonSession, Location};

use super::{UndoAction, UndoPlan, UndoStep};

/// Outcome of one undo step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// The step was applied to the post root
    Applied,
    /// The step was not needed or execution was cancelled first
    Skipped(String),
    /// The step could not be applied; the reason is recorded
    Failed(String),
}

/// One executed step with its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub step: UndoStep,
    pub outcome: StepOutcome,
}

/// Complete result of one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    steps: Vec<StepReport>,
}

impl ExecutionReport {
    pub fn steps(&self) -> &[StepReport] {
        &self.steps
    }

    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Applied))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Failed(_)))
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&StepOutcome) -> bool) -> usize {
        self.steps.iter().filter(|s| pred(&s.outcome)).count()
    }
}

/// Applies undo plans to a session's post root
#[derive(Debug, Default)]
pub struct UndoExecutor {
    cancel: Option<CancelFlag>,
}

impl UndoExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cooperative cancellation flag, checked before each step
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Apply `plan` to the post root of `session`.
    pub fn execute(&self, session: &ComparisonSession, plan: &UndoPlan) -> ExecutionReport {
        let mut steps = Vec::with_capacity(plan.len());
        let mut cancelled = false;

        for step in plan.steps() {
            if cancelled || self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                cancelled = true;
                steps.push(StepReport {
                    step: step.clone(),
                    outcome: StepOutcome::Skipped("execution cancelled".to_string()),
                });
                continue;
            }

            let outcome = run_step(session, step);
            match &outcome {
                StepOutcome::Failed(reason) => {
                    tracing::warn!(path = %step.path, reason = %reason, "Undo step failed");
                }
                StepOutcome::Applied => {
                    tracing::debug!(path = %step.path, action = ?step.action, "Undo step applied");
                }
                StepOutcome::Skipped(_) => {}
            }
            steps.push(StepReport {
                step: step.clone(),
                outcome,
            });
        }

        let report = ExecutionReport { steps };
        tracing::info!(
            applied = report.applied(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Undo execution finished"
        );
        report
    }
}

fn run_step(session: &ComparisonSession, step: &UndoStep) -> StepOutcome {
    let entry = match session.find(&step.path) {
        Some(e) => e,
        None => return StepOutcome::Failed("no entry for path".to_string()),
    };

    let roots = session.roots();
    let target = entry.absolute_path(Location::Post, roots);
    let source = entry.absolute_path(Location::Pre, roots);

    let current = match PathAttributes::capture(&target) {
        Ok(c) => c,
        Err(e) => return StepOutcome::Failed(format!("cannot inspect target: {}", e)),
    };

    if let Some(outcome) = stale_check(step.action, entry.post_attrs(), current.as_ref()) {
        return outcome;
    }

    let result = match step.action {
        UndoAction::Create => match entry.pre_attrs() {
            Some(pre) => create_entry(pre, &source, &target),
            None => Err(other("entry has no pre side to recreate from")),
        },
        UndoAction::Delete => delete_entry(current.as_ref(), &target),
        UndoAction::RestoreContent => match entry.pre_attrs() {
            Some(pre) => restore_content(pre, &source, &target),
            None => Err(other("entry has no pre side to restore from")),
        },
        UndoAction::RestoreMetadata => match entry.pre_attrs() {
            Some(pre) => restore_metadata(pre, &target),
            None => Err(other("entry has no pre side to restore from")),
        },
        UndoAction::ReplaceType => match entry.pre_attrs() {
            Some(pre) => {
                delete_entry(current.as_ref(), &target)
                    .and_then(|_| create_entry(pre, &source, &target))
            }
            None => Err(other("entry has no pre side to recreate from")),
        },
    };

    match result {
        Ok(()) => StepOutcome::Applied,
        Err(e) => StepOutcome::Failed(e.to_string()),
    }
}

/// Refuse steps whose target drifted since the comparison was built.
///
/// Directories only have their kind checked; their size and mtime move
/// whenever a child changes, including through earlier steps of this very
/// execution.
fn stale_check(
    action: UndoAction,
    recorded: Option<&PathAttributes>,
    current: Option<&PathAttributes>,
) -> Option<StepOutcome> {
    match (recorded, current) {
        (Some(_), None) => {
            if action == UndoAction::Delete {
                Some(StepOutcome::Skipped("target already absent".to_string()))
            } else {
                Some(StepOutcome::Failed(
                    "target vanished since comparison".to_string(),
                ))
            }
        }
        (None, Some(_)) => Some(StepOutcome::Failed(
            "target appeared since comparison".to_string(),
        )),
        (Some(recorded), Some(current)) if drifted(recorded, current) => Some(
            StepOutcome::Failed("target changed since comparison".to_string()),
        ),
        _ => None,
    }
}

fn drifted(recorded: &PathAttributes, current: &PathAttributes) -> bool {
    if recorded.kind != current.kind {
        return true;
    }
    match recorded.kind {
        FileKind::File => {
            recorded.size != current.size
                || recorded.mtime != current.mtime
                || recorded.mtime_nsec != current.mtime_nsec
        }
        FileKind::Symlink => recorded.link_target != current.link_target,
        _ => false,
    }
}

fn create_entry(pre: &PathAttributes, source: &Path, target: &Path) -> io::Result<()> {
    match pre.kind {
        FileKind::Directory => {
            fs::create_dir(target)?;
            fs::set_permissions(target, Permissions::from_mode(pre.mode))?;
            chown(target, Some(pre.uid), Some(pre.gid))
        }
        FileKind::File => copy_into_place(pre, source, target),
        FileKind::Symlink => {
            let link_target = pre
                .link_target
                .as_ref()
                .ok_or_else(|| other("symlink without a recorded target"))?;
            symlink(link_target, target)?;
            lchown(target, Some(pre.uid), Some(pre.gid))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "special files are not recreated",
        )),
    }
}

fn delete_entry(current: Option<&PathAttributes>, target: &Path) -> io::Result<()> {
    match current {
        Some(attrs) if attrs.is_dir() => fs::remove_dir(target),
        Some(_) => fs::remove_file(target),
        None => Err(other("target already absent")),
    }
}

fn restore_content(pre: &PathAttributes, source: &Path, target: &Path) -> io::Result<()> {
    match pre.kind {
        FileKind::File => copy_into_place(pre, source, target),
        FileKind::Symlink => {
            fs::remove_file(target)?;
            create_entry(pre, source, target)
        }
        _ => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "kind has no restorable content",
        )),
    }
}

fn restore_metadata(pre: &PathAttributes, target: &Path) -> io::Result<()> {
    if pre.is_symlink() {
        return lchown(target, Some(pre.uid), Some(pre.gid));
    }
    fs::set_permissions(target, Permissions::from_mode(pre.mode))?;
    chown(target, Some(pre.uid), Some(pre.gid))
}

/// Write `source`'s content to a temporary file next to `target`, apply the
/// pre-side mode and ownership, then rename over the target.
fn copy_into_place(pre: &PathAttributes, source: &Path, target: &Path) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| other("target has no parent directory"))?;

    let mut temp = NamedTempFile::new_in(parent)?;
    io::copy(&mut File::open(source)?, temp.as_file_mut())?;
    temp.as_file().set_permissions(Permissions::from_mode(pre.mode))?;
    chown(temp.path(), Some(pre.uid), Some(pre.gid))?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn other(message: &str) -> io::Error {
    io::Error::other(message.to_string())
}
