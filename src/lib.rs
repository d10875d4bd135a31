//! # gitnest - nested workspaces with keep-file preservation
//!
//! gitnest manages independently-versioned git repositories ("workspaces")
//! embedded inside a parent repository, tracking their source files while
//! excluding their internal version-control metadata.
//!
//! The heart of the crate is the local override preservation and
//! backup/archival subsystem: specific files inside a workspace can carry
//! permanent local modifications ("keep files") that survive repeated
//! synchronization with the upstream remote, and every mutation that
//! mechanism performs is protected by a deduplicating backup store and a
//! verified archival engine.
//!
//! ## How keep files survive a sync
//!
//! Outside of a sync, every keep file has the git skip-worktree flag set,
//! hiding its local edits from status, diff and checkout. During a sync the
//! [`resolver`] runs inside a [`transaction`] that clears the flag, resolves
//! each diverged file (back up, diff, reset to upstream, reapply or discard
//! or skip), and restores the flag on every exit path.
//!
//! Nothing is lost on failure: before a keep file is reset, its on-disk
//! content goes into the [`backup`] store and its divergence into a patch
//! that is itself backed up. A conflicting reapply leaves the file at the
//! remote version with the patch retained at a path the warning names.
//!
//! ## Backup hygiene
//!
//! Backups are deduplicated by content digest, bucketed by day, and folded
//! month by month into verified `tar.gz` archives by the [`archive`] engine,
//! which deletes originals only after re-reading the archive end-to-end.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use gitnest::{GitCli, Manifest, TerminalPrompt};
//! use std::path::Path;
//!
//! # fn main() -> gitnest::Result<()> {
//! let repo_root = Path::new(".");
//! let manifest = Manifest::load(repo_root)?;
//! let git = GitCli::default();
//! let mut prompt = TerminalPrompt;
//! let report = gitnest::sync::sync_all(&git, &mut prompt, &manifest, repo_root)?;
//! println!("synced {} workspace(s)", report.synced.len());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod backup;
pub mod error;
pub mod git;
pub mod hash;
pub mod layout;
pub mod manifest;
pub mod patch;
pub mod resolver;
pub mod sync;
pub mod transaction;

mod util;

pub use archive::{
    archive_old_backups, should_run_archive, update_archive_check, ArchiveReport,
};
pub use backup::{cleanup, create_file_backup, create_patch_backup, find_latest_backup};
pub use error::{GitNestError, Result};
pub use git::{GitCli, Vcs};
pub use manifest::{Manifest, Workspace};
pub use patch::PatchEngine;
pub use resolver::{
    resolve_keep_files, FixedPrompt, KeepChoice, Prompt, ResolveContext, ResolveSummary,
    TerminalPrompt,
};
pub use sync::{sync_all, sync_workspace, SyncReport};
pub use transaction::with_skip_worktree_visible;
pub use util::ensure_ignore_entry;
