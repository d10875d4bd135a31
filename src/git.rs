//! Version-control collaborator
//!
//! gitnest never implements version control itself; it orchestrates the
//! external `git` binary through blocking subprocess calls. The [`Vcs`]
//! trait is the seam between the keep-file resolver and that binary, so
//! resolution logic can be exercised against a scripted fake in tests.
//!
//! ## Upstream resolution
//!
//! "Remote changes" for a keep file means the file's blob at the branch's
//! upstream tracking reference differs from its blob at `HEAD`. The
//! tracking reference is resolved through `<branch>@{upstream}`; when the
//! branch has no upstream configured, `<remote>/<branch>` is used with a
//! configurable remote name (default `origin`).

use crate::error::{GitNestError, Result};
use std::path::Path;
use std::process::Command;
use tracing::{debug, trace};

/// Default remote consulted when a branch has no configured upstream
pub const DEFAULT_REMOTE: &str = "origin";

/// Operations the keep-file machinery needs from the version-control tool
pub trait Vcs {
    /// Whether `path` is the root of a work tree
    fn is_repo(&self, path: &Path) -> bool;

    /// Fetch from the default remote
    fn fetch(&self, path: &Path) -> Result<()>;

    /// Pull the current branch
    fn pull(&self, path: &Path) -> Result<()>;

    /// Name of the currently checked-out branch
    fn current_branch(&self, path: &Path) -> Result<String>;

    /// Resolved upstream tracking reference for `branch`
    fn upstream_ref(&self, path: &Path, branch: &str) -> Result<String>;

    /// Whether `file`'s content at the upstream reference differs from its
    /// last-committed (`HEAD`) content
    fn has_remote_changes(&self, path: &Path, file: &Path, branch: &str) -> Result<bool>;

    /// Reset one file's index and working-tree content to the upstream version
    fn reset_file(&self, path: &Path, file: &Path, branch: &str) -> Result<()>;

    /// Unified diff of the working tree against the upstream reference,
    /// restricted to `file`
    fn file_diff(&self, path: &Path, file: &Path, branch: &str) -> Result<String>;

    /// Set the skip-worktree flag on one file
    fn set_skip_worktree(&self, path: &Path, file: &Path) -> Result<()>;

    /// Clear the skip-worktree flag on one file
    fn clear_skip_worktree(&self, path: &Path, file: &Path) -> Result<()>;
}

/// [`Vcs`] implementation shelling out to the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    /// Remote used when a branch has no upstream configured
    remote: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(DEFAULT_REMOTE)
    }
}

impl GitCli {
    /// Create a git runner that falls back to the given remote name
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
        }
    }

    /// Run git with `args` inside `path`, requiring a zero exit status.
    /// Returns captured stdout.
    pub(crate) fn run(&self, path: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(path)
            .output()
            .map_err(|e| GitNestError::git(args.join(" "), e.to_string()))?;
        trace!("git {:?} in {:?} -> {}", args, path, output.status);
        if !output.status.success() {
            return Err(GitNestError::git(
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Like [`run`](Self::run), but a non-zero exit is reported as `Ok(None)`
    /// instead of an error. Used for queries where failure is an answer
    /// (missing ref, missing path) rather than a fault.
    fn run_query(&self, path: &Path, args: &[&str]) -> Result<Option<String>> {
        let output = Command::new("git")
            .args(args)
            .current_dir(path)
            .output()
            .map_err(|e| GitNestError::git(args.join(" "), e.to_string()))?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).to_string()))
        } else {
            Ok(None)
        }
    }

    /// Blob id of `file` at `rev`, or `None` if the file does not exist there
    fn blob_id(&self, path: &Path, rev: &str, file: &Path) -> Result<Option<String>> {
        let spec = format!("{}:{}", rev, file.display());
        Ok(self
            .run_query(path, &["rev-parse", "--verify", "--quiet", &spec])?
            .map(|s| s.trim().to_string()))
    }
}

impl Vcs for GitCli {
    fn is_repo(&self, path: &Path) -> bool {
        path.join(".git").exists()
            && self
                .run_query(path, &["rev-parse", "--is-inside-work-tree"])
                .ok()
                .flatten()
                .map(|s| s.trim() == "true")
                .unwrap_or(false)
    }

    fn fetch(&self, path: &Path) -> Result<()> {
        debug!("Fetching {:?}", path);
        self.run(path, &["fetch", "--prune", &self.remote]).map(|_| ())
    }

    fn pull(&self, path: &Path) -> Result<()> {
        debug!("Pulling {:?}", path);
        self.run(path, &["pull", "--ff-only"]).map(|_| ())
    }

    fn current_branch(&self, path: &Path) -> Result<String> {
        self.run(path, &["rev-parse", "--abbrev-ref", "HEAD"])
            .map(|s| s.trim().to_string())
    }

    fn upstream_ref(&self, path: &Path, branch: &str) -> Result<String> {
        let spec = format!("{}@{{upstream}}", branch);
        if let Some(upstream) =
            self.run_query(path, &["rev-parse", "--abbrev-ref", "--symbolic-full-name", &spec])?
        {
            let upstream = upstream.trim();
            if !upstream.is_empty() {
                return Ok(upstream.to_string());
            }
        }
        Ok(format!("{}/{}", self.remote, branch))
    }

    fn has_remote_changes(&self, path: &Path, file: &Path, branch: &str) -> Result<bool> {
        let upstream = self.upstream_ref(path, branch)?;
        let remote_blob = self.blob_id(path, &upstream, file)?;
        let local_blob = self.blob_id(path, "HEAD", file)?;
        trace!(
            "blob comparison for {:?}: upstream={:?} head={:?}",
            file,
            remote_blob,
            local_blob
        );
        Ok(remote_blob != local_blob)
    }

    fn reset_file(&self, path: &Path, file: &Path, branch: &str) -> Result<()> {
        let upstream = self.upstream_ref(path, branch)?;
        let file = file.to_str().ok_or_else(|| {
            GitNestError::PathConversion(file.to_path_buf())
        })?;
        debug!("Resetting {:?} to {}", file, upstream);
        self.run(path, &["checkout", &upstream, "--", file]).map(|_| ())
    }

    fn file_diff(&self, path: &Path, file: &Path, branch: &str) -> Result<String> {
        let upstream = self.upstream_ref(path, branch)?;
        let file = file.to_str().ok_or_else(|| {
            GitNestError::PathConversion(file.to_path_buf())
        })?;
        self.run(path, &["diff", &upstream, "--", file])
    }

    fn set_skip_worktree(&self, path: &Path, file: &Path) -> Result<()> {
        let file = file.to_str().ok_or_else(|| {
            GitNestError::PathConversion(file.to_path_buf())
        })?;
        self.run(path, &["update-index", "--skip-worktree", file])
            .map(|_| ())
    }

    fn clear_skip_worktree(&self, path: &Path, file: &Path) -> Result<()> {
        let file = file.to_str().ok_or_else(|| {
            GitNestError::PathConversion(file.to_path_buf())
        })?;
        self.run(path, &["update-index", "--no-skip-worktree", file])
            .map(|_| ())
    }
}

impl GitCli {
    /// Clone `url` into `path`
    pub fn clone_repo(&self, url: &str, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let dest = path.to_str().ok_or_else(|| {
            GitNestError::PathConversion(path.to_path_buf())
        })?;
        let output = Command::new("git")
            .args(["clone", url, dest])
            .output()
            .map_err(|e| GitNestError::git(format!("clone {}", url), e.to_string()))?;
        if !output.status.success() {
            return Err(GitNestError::git(
                format!("clone {}", url),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    /// One-line status summary for a workspace (porcelain, trimmed)
    pub fn status_short(&self, path: &Path) -> Result<String> {
        self.run(path, &["status", "--short", "--branch"])
    }
}
