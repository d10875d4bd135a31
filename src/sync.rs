//! Workspace synchronization
//!
//! Synchronization is strictly sequential: one workspace at a time, one
//! keep file at a time, every git invocation a blocking subprocess run to
//! completion. Per-workspace failures are isolated; a broken workspace is
//! reported and its siblings still sync.

use crate::archive::{archive_old_backups, should_run_archive, update_archive_check, ArchiveReport};
use crate::error::{GitNestError, Result};
use crate::git::Vcs;
use crate::layout;
use crate::manifest::{Manifest, Workspace};
use crate::patch::PatchEngine;
use crate::resolver::{resolve_keep_files, Prompt, ResolveContext, ResolveSummary};
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of syncing one workspace
#[derive(Debug)]
pub struct WorkspaceSync {
    /// Workspace path relative to the parent repository root
    pub path: std::path::PathBuf,
    /// Keep-file resolution tally, when the workspace has keep files
    pub resolution: Option<ResolveSummary>,
}

/// Result of a whole sync pass
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Workspaces synced successfully
    pub synced: Vec<WorkspaceSync>,
    /// Workspaces that failed, with the failure text
    pub failures: Vec<(std::path::PathBuf, String)>,
    /// Archival maintenance outcome, when the throttle allowed a run
    pub archive: Option<ArchiveReport>,
}

/// Synchronize one workspace with its upstream remote
///
/// Fetches first so upstream comparisons see fresh refs, then runs the
/// keep-file resolver (inside the skip-worktree transaction) when the
/// workspace has keep files, then pulls.
pub fn sync_workspace(
    vcs: &dyn Vcs,
    prompt: &mut dyn Prompt,
    workspace: &Workspace,
    repo_root: &Path,
) -> Result<Option<ResolveSummary>> {
    let workspace_path = repo_root.join(&workspace.path);
    if !vcs.is_repo(&workspace_path) {
        return Err(GitNestError::Manifest(format!(
            "'{}' is tracked but is not a git repository; clone it first",
            workspace.path.display()
        )));
    }

    info!("Syncing workspace {:?}", workspace.path);
    vcs.fetch(&workspace_path)?;

    let resolution = if workspace.has_keep_files() {
        let branch = vcs.current_branch(&workspace_path)?;
        let ctx = ResolveContext {
            workspace_path: &workspace_path,
            branch: &branch,
            keep_files: &workspace.keep_files,
            repo_root,
            workspace_rel: &workspace.path,
        };
        Some(resolve_keep_files(vcs, prompt, &PatchEngine::new(), &ctx)?)
    } else {
        None
    };

    vcs.pull(&workspace_path)?;
    Ok(resolution)
}

/// Synchronize every workspace in the manifest, then run throttled
/// archival maintenance over the backup tree
pub fn sync_all(
    vcs: &dyn Vcs,
    prompt: &mut dyn Prompt,
    manifest: &Manifest,
    repo_root: &Path,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    for workspace in manifest.iter() {
        match sync_workspace(vcs, prompt, workspace, repo_root) {
            Ok(resolution) => report.synced.push(WorkspaceSync {
                path: workspace.path.clone(),
                resolution,
            }),
            Err(e) => {
                warn!("Workspace {:?} failed to sync: {}", workspace.path, e);
                report.failures.push((workspace.path.clone(), e.to_string()));
            }
        }
    }

    report.archive = run_archive_maintenance(repo_root)?;
    Ok(report)
}

/// Run archival maintenance if the 24-hour throttle allows it
///
/// Returns `None` when the throttle suppressed the scan. The marker is
/// updated even when individual buckets failed, so a persistently broken
/// bucket cannot turn every sync into an archive scan.
pub fn run_archive_maintenance(repo_root: &Path) -> Result<Option<ArchiveReport>> {
    if !should_run_archive(repo_root) {
        debug!("Archive maintenance throttled, skipping scan");
        return Ok(None);
    }
    let report = archive_old_backups(&layout::backup_root(repo_root))?;
    update_archive_check(repo_root)?;
    Ok(Some(report))
}
