//! Patch engine: create, dry-run check, and apply divergence patches
//!
//! A divergence patch captures the difference between a keep file's
//! last-committed content and its current on-disk content as a unified
//! diff. The same external tool (`git diff` / `git apply`) produces and
//! consumes the format, so a created patch is guaranteed to round-trip.
//!
//! The dry-run check runs before every real apply; a patch is never
//! half-applied to the working tree. A dry run that reports rejected hunks
//! is a *conflict*, which is an answer (`Ok(true)`), not an error — only a
//! missing or malformed patch, or a tool crash, is a
//! [`GitNestError::PatchTool`].

use crate::error::{GitNestError, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::{debug, trace};

/// Creates, checks and applies unified-diff patches via the `git` binary
#[derive(Debug, Default, Clone)]
pub struct PatchEngine;

impl PatchEngine {
    /// Create a patch engine
    pub fn new() -> Self {
        Self
    }

    /// Write the unified diff of local modifications to `patch_path`
    ///
    /// Diffs the file's current on-disk content against its last-committed
    /// (`HEAD`) content. An empty `file` diffs the whole workspace. Parent
    /// directories of `patch_path` are created as needed. An empty diff is
    /// valid output, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`GitNestError::Diff`] if the diff command itself errors
    /// (malformed repository, missing file).
    pub fn create_patch(&self, workspace: &Path, file: &Path, patch_path: &Path) -> Result<()> {
        let mut args = vec!["diff", "HEAD"];
        let file_str;
        if !file.as_os_str().is_empty() {
            file_str = file
                .to_str()
                .ok_or_else(|| GitNestError::PathConversion(file.to_path_buf()))?
                .to_string();
            args.push("--");
            args.push(&file_str);
        }

        let output = Command::new("git")
            .args(&args)
            .current_dir(workspace)
            .output()
            .map_err(|e| GitNestError::diff(e.to_string()))?;
        // git diff exits 0 whether or not differences exist; non-zero means
        // the diff itself could not be produced.
        if !output.status.success() {
            return Err(GitNestError::diff(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        if let Some(parent) = patch_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(patch_path, &output.stdout)?;
        debug!(
            "Wrote {} byte patch for {:?} to {:?}",
            output.stdout.len(),
            file,
            patch_path
        );
        Ok(())
    }

    /// Dry-run the patch against the working tree
    ///
    /// Returns `Ok(true)` when the dry run reports failed/rejected hunks
    /// (a conflict), `Ok(false)` when it reports a clean apply.
    ///
    /// # Errors
    ///
    /// Returns [`GitNestError::PatchTool`] for any failure that is not a
    /// hunk conflict: missing patch file, malformed patch, tool crash.
    pub fn check_patch(&self, workspace: &Path, patch_path: &Path) -> Result<bool> {
        if !patch_path.exists() {
            return Err(GitNestError::patch_tool(format!(
                "patch file not found: {}",
                patch_path.display()
            )));
        }
        let stderr = match self.run_apply(workspace, patch_path, true)? {
            None => return Ok(false),
            Some(stderr) => stderr,
        };
        if is_hunk_conflict(&stderr) {
            trace!("Dry run reported conflict for {:?}", patch_path);
            Ok(true)
        } else {
            Err(GitNestError::patch_tool(stderr))
        }
    }

    /// Apply the patch to the working tree for real
    ///
    /// # Errors
    ///
    /// Returns [`GitNestError::Apply`] with the captured tool output on any
    /// non-zero exit.
    pub fn apply_patch(&self, workspace: &Path, patch_path: &Path) -> Result<()> {
        match self.run_apply(workspace, patch_path, false)? {
            None => {
                debug!("Applied patch {:?} in {:?}", patch_path, workspace);
                Ok(())
            }
            Some(output) => Err(GitNestError::Apply { output }),
        }
    }

    /// Run `git apply` (optionally `--check`); `Ok(None)` on clean exit,
    /// `Ok(Some(stderr))` on non-zero exit
    fn run_apply(
        &self,
        workspace: &Path,
        patch_path: &Path,
        dry_run: bool,
    ) -> Result<Option<String>> {
        let patch = patch_path
            .to_str()
            .ok_or_else(|| GitNestError::PathConversion(patch_path.to_path_buf()))?;
        // -C1 relaxes the context requirement to one line, so an upstream
        // edit elsewhere in the file does not reject an unrelated local hunk.
        let mut args = vec!["apply", "--whitespace=nowarn", "-C1"];
        if dry_run {
            args.push("--check");
        }
        args.push(patch);

        let output = Command::new("git")
            .args(&args)
            .current_dir(workspace)
            .output()
            .map_err(|e| GitNestError::patch_tool(e.to_string()))?;
        if output.status.success() {
            Ok(None)
        } else {
            Ok(Some(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// Whether `git apply` stderr describes rejected hunks rather than a
/// malformed patch or tool fault
fn is_hunk_conflict(stderr: &str) -> bool {
    stderr.contains("patch does not apply")
        || stderr.contains("patch failed")
        || stderr.contains("already exists in working directory")
        || stderr.contains("does not exist in working directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        assert!(is_hunk_conflict(
            "error: patch failed: config.yaml:1\nerror: config.yaml: patch does not apply"
        ));
        assert!(!is_hunk_conflict("fatal: unrecognized input"));
        assert!(!is_hunk_conflict("error: corrupt patch at line 4"));
    }

    #[test]
    fn test_check_missing_patch_is_tool_error() {
        let engine = PatchEngine::new();
        let err = engine
            .check_patch(Path::new("."), Path::new("/nonexistent/divergence.patch"))
            .unwrap_err();
        assert!(matches!(err, GitNestError::PatchTool(_)));
    }
}
