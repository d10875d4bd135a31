//! Skip-worktree transaction
//!
//! Outside of an active resolver run, every keep file of every workspace has
//! the skip-worktree flag set, hiding permanent local edits from status,
//! diff and checkout. The resolver needs those edits visible, so it runs
//! inside this transaction: the flag is cleared on entry (acquisition) and
//! re-set on every exit path (release), whether the wrapped work succeeded
//! or failed. Release runs exactly once, after work, on every exit route.

use crate::error::Result;
use crate::git::Vcs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Run `work` with the skip-worktree flag cleared on `files`
///
/// Clears the flag on every file in `files` (making their real content
/// visible to the index), runs `work`, then unconditionally restores the
/// flag on the same set and propagates `work`'s result after cleanup
/// completes.
///
/// Error precedence: a failure inside `work` wins over a failure during
/// restore (the restore failure is logged); a restore failure after
/// successful work is returned, since leaving keep files unprotected is an
/// invariant violation the caller must hear about.
///
/// When acquisition itself fails partway, the flags cleared so far are
/// re-set before the error is returned and `work` never runs.
pub fn with_skip_worktree_visible<T, F>(
    vcs: &dyn Vcs,
    workspace: &Path,
    files: &[PathBuf],
    work: F,
) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    debug!(
        "Clearing skip-worktree on {} file(s) in {:?}",
        files.len(),
        workspace
    );
    for (index, file) in files.iter().enumerate() {
        if let Err(acquire_err) = vcs.clear_skip_worktree(workspace, file) {
            // Files already cleared must not stay unprotected.
            for cleared in &files[..index] {
                if let Err(e) = vcs.set_skip_worktree(workspace, cleared) {
                    warn!(
                        "Failed to restore skip-worktree on {:?} in {:?}: {}",
                        cleared, workspace, e
                    );
                }
            }
            return Err(acquire_err);
        }
    }

    let result = work();

    let mut restore_failure = None;
    for file in files {
        if let Err(e) = vcs.set_skip_worktree(workspace, file) {
            warn!(
                "Failed to restore skip-worktree on {:?} in {:?}: {}",
                file, workspace, e
            );
            restore_failure.get_or_insert(e);
        }
    }

    match (result, restore_failure) {
        (Ok(value), None) => Ok(value),
        (Ok(_), Some(restore_err)) => Err(restore_err),
        // Work error takes precedence; restore failure was already logged.
        (Err(work_err), _) => Err(work_err),
    }
}
