//! Keep-file resolver
//!
//! A keep file carries permanent local modifications that must survive
//! synchronization with the workspace's upstream remote. The resolver runs
//! once per workspace, inside the skip-worktree transaction, and drives a
//! small state machine per file:
//!
//! ```text
//! compare blobs ──unchanged──▶ done (no mutation)
//!     │changed
//!     ▼
//!   Prompt ◀───────────── Show diff (display only, loops back)
//!     │
//!     ├─ Reapply ─▶ backup file ─▶ create patch ─▶ backup patch
//!     │             ─▶ reset to upstream ─▶ dry-run check
//!     │                 ├─ clean ─▶ apply ─▶ delete patch
//!     │                 └─ conflict/tool error ─▶ retain patch + backup, warn
//!     ├─ Discard ─▶ reset to upstream
//!     └─ Skip    ─▶ leave on-disk content untouched
//! ```
//!
//! Every destructive step is preceded by a successful backup; a backup
//! failure aborts that file's attempt before anything was touched. A
//! conflict is not data loss: the pre-reset content lives in the backup
//! store and the divergence patch stays at its published path, which the
//! warning names verbatim. An interrupted run is recoverable purely from
//! that on-disk state.
//!
//! Failures scoped to one file (remote check, diff, patch tooling) never
//! abort sibling files; failures of shared infrastructure (the backup
//! store, the prompt, git itself) end the run, since every remaining file
//! would hit the same wall. Either way the transaction restores the
//! skip-worktree flag for the whole keep-file set.

use crate::backup::{create_file_backup, create_patch_backup};
use crate::error::{GitNestError, Result};
use crate::git::Vcs;
use crate::layout;
use crate::patch::PatchEngine;
use crate::transaction::with_skip_worktree_visible;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The four choices offered for a diverged keep file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepChoice {
    /// Reset to the remote version, then reapply the local divergence
    Reapply,
    /// Reset to the remote version, dropping the local divergence
    Discard,
    /// Leave the file untouched
    Skip,
    /// Display the remote-vs-local diff and ask again
    ShowDiff,
}

impl KeepChoice {
    /// Prompt labels, in presentation order
    pub const LABELS: [&'static str; 4] = [
        "Reapply local changes on top of the remote version (recommended)",
        "Discard local changes and take the remote version",
        "Skip this file for now",
        "Show diff",
    ];

    fn from_index(index: usize) -> Result<Self> {
        match index {
            0 => Ok(KeepChoice::Reapply),
            1 => Ok(KeepChoice::Discard),
            2 => Ok(KeepChoice::Skip),
            3 => Ok(KeepChoice::ShowDiff),
            other => Err(GitNestError::internal(format!(
                "prompt returned out-of-range choice {}",
                other
            ))),
        }
    }
}

/// Capability interface for the interactive prompt
///
/// A pure function of (message, options) to a selected index, so the
/// terminal implementation can be swapped for a scripted one in tests or
/// non-interactive runs.
pub trait Prompt {
    /// Present `options` under `message` and return the chosen index
    fn select(&mut self, message: &str, options: &[&str]) -> Result<usize>;

    /// Display informational text produced mid-resolution, such as a
    /// requested diff
    fn show(&mut self, text: &str);
}

/// Interactive terminal prompt backed by `inquire`
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn select(&mut self, message: &str, options: &[&str]) -> Result<usize> {
        let options: Vec<&str> = options.to_vec();
        let choice = inquire::Select::new(message, options)
            .raw_prompt()
            .map_err(|e| GitNestError::internal(format!("prompt failed: {}", e)))?;
        Ok(choice.index)
    }

    fn show(&mut self, text: &str) {
        println!("{}", text);
    }
}

/// Non-interactive prompt that answers every question the same way
#[derive(Debug, Clone, Copy)]
pub struct FixedPrompt(pub KeepChoice);

impl Prompt for FixedPrompt {
    fn select(&mut self, _message: &str, _options: &[&str]) -> Result<usize> {
        Ok(match self.0 {
            KeepChoice::Reapply => 0,
            KeepChoice::Discard => 1,
            KeepChoice::Skip => 2,
            KeepChoice::ShowDiff => 3,
        })
    }

    fn show(&mut self, text: &str) {
        // Non-interactive runs keep display text out of stdout.
        debug!("{}", text);
    }
}

/// Everything the resolver needs to know about one workspace
#[derive(Debug, Clone)]
pub struct ResolveContext<'a> {
    /// Absolute path of the workspace working tree
    pub workspace_path: &'a Path,
    /// Branch currently checked out in the workspace
    pub branch: &'a str,
    /// Keep files, relative to the workspace
    pub keep_files: &'a [PathBuf],
    /// Parent repository root (anchors backup and patch storage)
    pub repo_root: &'a Path,
    /// Workspace path relative to the parent repository root
    pub workspace_rel: &'a Path,
}

/// Terminal state reached by one keep file
#[derive(Debug, Clone, PartialEq, Eq)]
enum FileOutcome {
    Unchanged,
    Reapplied,
    Discarded,
    Skipped,
    /// Dry-run conflict or apply failure; the named patch was retained
    Retained(PathBuf),
}

/// Tally of one resolver run over a workspace's keep files
#[derive(Debug, Default, Clone)]
pub struct ResolveSummary {
    /// Files with no upstream divergence (no mutation performed)
    pub unchanged: usize,
    /// Files reset to upstream with local divergence reapplied cleanly
    pub reapplied: usize,
    /// Files reset to upstream with local divergence dropped on request
    pub discarded: usize,
    /// Files the user chose to leave untouched
    pub skipped: usize,
    /// Retained patch paths for files whose reapply conflicted or failed
    pub retained_patches: Vec<PathBuf>,
    /// Files whose resolution aborted, with the failure text
    pub errors: Vec<(PathBuf, String)>,
}

impl ResolveSummary {
    /// Whether every file reached a clean terminal state
    pub fn is_clean(&self) -> bool {
        self.retained_patches.is_empty() && self.errors.is_empty()
    }

    fn record(&mut self, file: &Path, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Unchanged => self.unchanged += 1,
            FileOutcome::Reapplied => self.reapplied += 1,
            FileOutcome::Discarded => self.discarded += 1,
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Retained(patch) => {
                debug!("Retained patch for {:?} at {:?}", file, patch);
                self.retained_patches.push(patch);
            }
        }
    }
}

/// Resolve every keep file of one workspace
///
/// Wraps the per-file loop in the skip-worktree transaction: the flag is
/// cleared for the whole set up front and restored for the whole set after
/// the loop completes or errors.
pub fn resolve_keep_files(
    vcs: &dyn Vcs,
    prompt: &mut dyn Prompt,
    patches: &PatchEngine,
    ctx: &ResolveContext<'_>,
) -> Result<ResolveSummary> {
    debug!(
        "Resolving {} keep file(s) in {:?} on branch {}",
        ctx.keep_files.len(),
        ctx.workspace_path,
        ctx.branch
    );
    with_skip_worktree_visible(vcs, ctx.workspace_path, ctx.keep_files, || {
        let mut summary = ResolveSummary::default();
        for file in ctx.keep_files {
            match resolve_one(vcs, prompt, patches, ctx, file) {
                Ok(outcome) => summary.record(file, outcome),
                Err(e) if e.is_isolated() => {
                    if e.is_data_retaining() {
                        warn!(
                            "Keep file {:?} not resolved: {}; recovery artifacts remain on disk",
                            file, e
                        );
                    } else {
                        warn!("Keep file {:?} not resolved: {}", file, e);
                    }
                    summary.errors.push((file.clone(), e.to_string()));
                }
                // Broken infrastructure (backup store, prompt, git itself)
                // would fail every remaining file the same way.
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    })
}

/// Drive the state machine for a single keep file
fn resolve_one(
    vcs: &dyn Vcs,
    prompt: &mut dyn Prompt,
    patches: &PatchEngine,
    ctx: &ResolveContext<'_>,
    file: &Path,
) -> Result<FileOutcome> {
    let changed = vcs
        .has_remote_changes(ctx.workspace_path, file, ctx.branch)
        .map_err(|e| GitNestError::RemoteCheck {
            workspace: ctx.workspace_path.to_path_buf(),
            file: file.to_path_buf(),
            message: e.to_string(),
        })?;
    if !changed {
        debug!("No upstream change for {:?}, leaving untouched", file);
        return Ok(FileOutcome::Unchanged);
    }

    let message = format!(
        "Upstream changed keep file '{}' in workspace '{}'. How should the local version be handled?",
        file.display(),
        ctx.workspace_rel.display()
    );
    loop {
        let index = prompt.select(&message, &KeepChoice::LABELS)?;
        match KeepChoice::from_index(index)? {
            KeepChoice::ShowDiff => {
                // Display suspends the prompt, it is not a terminal state.
                let diff = vcs.file_diff(ctx.workspace_path, file, ctx.branch)?;
                if diff.is_empty() {
                    prompt.show("(no textual difference)");
                } else {
                    prompt.show(&diff);
                }
            }
            KeepChoice::Reapply => return reapply(vcs, patches, ctx, file),
            KeepChoice::Discard => {
                vcs.reset_file(ctx.workspace_path, file, ctx.branch)?;
                info!("Discarded local changes to {:?}", file);
                return Ok(FileOutcome::Discarded);
            }
            KeepChoice::Skip => {
                debug!("Skipping {:?}", file);
                return Ok(FileOutcome::Skipped);
            }
        }
    }
}

/// The Reapply path: backup, patch, reset, dry-run, apply
fn reapply(
    vcs: &dyn Vcs,
    patches: &PatchEngine,
    ctx: &ResolveContext<'_>,
    file: &Path,
) -> Result<FileOutcome> {
    let backup_root = layout::backup_root(ctx.repo_root);
    let abs_file = ctx.workspace_path.join(file);

    // A failed backup aborts before anything was mutated.
    create_file_backup(&abs_file, &backup_root, ctx.repo_root)?;

    let patch_path = layout::patch_path(ctx.repo_root, ctx.workspace_rel, file);
    patches.create_patch(ctx.workspace_path, file, &patch_path)?;

    // No local divergence to carry over: take the remote version outright.
    if fs::metadata(&patch_path)?.len() == 0 {
        fs::remove_file(&patch_path)?;
        vcs.reset_file(ctx.workspace_path, file, ctx.branch)?;
        info!("No local divergence in {:?}, took the remote version", file);
        return Ok(FileOutcome::Reapplied);
    }

    create_patch_backup(&patch_path, &backup_root, &layout::patches_root(ctx.repo_root))?;

    vcs.reset_file(ctx.workspace_path, file, ctx.branch)?;

    match patches.check_patch(ctx.workspace_path, &patch_path) {
        Ok(false) => match patches.apply_patch(ctx.workspace_path, &patch_path) {
            Ok(()) => {
                fs::remove_file(&patch_path)?;
                info!("Reapplied local changes to {:?}", file);
                Ok(FileOutcome::Reapplied)
            }
            Err(e) => {
                warn_retained(file, &patch_path, &e);
                Ok(FileOutcome::Retained(patch_path))
            }
        },
        Ok(true) => {
            warn!(
                "Local changes to {:?} conflict with the remote version; \
                 file left at the remote version, patch retained at {}",
                file,
                patch_path.display()
            );
            Ok(FileOutcome::Retained(patch_path))
        }
        Err(e) => {
            warn_retained(file, &patch_path, &e);
            Ok(FileOutcome::Retained(patch_path))
        }
    }
}

fn warn_retained(file: &Path, patch_path: &Path, err: &GitNestError) {
    warn!(
        "Could not reapply local changes to {:?} ({}); \
         file left at the remote version, patch retained at {}",
        file,
        err,
        patch_path.display()
    );
}
