//! Error types for the gitnest library
//!
//! This module defines all error types that can occur while managing
//! workspaces. Errors are designed to be informative and actionable: every
//! failure path that retains recovery artifacts on disk (patches, backups)
//! carries the exact location of those artifacts so that recovery is always
//! manual-but-possible, never silent data loss.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the gitnest library
pub type Result<T> = std::result::Result<T, GitNestError>;

/// Main error type for all gitnest operations
#[derive(Debug, Error)]
pub enum GitNestError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A git invocation failed (non-zero exit or failed to spawn)
    #[error("git {command} failed: {output}")]
    Git {
        /// The git subcommand and arguments that were run
        command: String,
        /// Captured stderr (or spawn error) of the invocation
        output: String,
    },

    /// Checking a keep file against its upstream reference failed
    #[error("remote check failed for {file:?} in {workspace:?}: {message}")]
    RemoteCheck {
        /// Workspace the file belongs to
        workspace: PathBuf,
        /// The keep file being checked
        file: PathBuf,
        /// Underlying failure description
        message: String,
    },

    /// The diff command itself errored while creating a patch
    #[error("diff failed: {0}")]
    Diff(String),

    /// The patch tool failed in a way that is not a hunk conflict
    /// (missing patch file, malformed patch, tool crash)
    #[error("patch tool error: {0}")]
    PatchTool(String),

    /// Applying a patch to the working tree failed
    #[error("patch apply failed: {output}")]
    Apply {
        /// Captured tool output from the failed apply
        output: String,
    },

    /// Creating a backup failed; the operation that required it must not proceed
    #[error("backup failed: {0}")]
    Backup(String),

    /// An archive failed verification; the partial archive was discarded
    /// and the original bucket directory was left untouched
    #[error("archive verification failed: {0}")]
    ArchiveVerify(String),

    /// Directory creation or compression failed while archiving a bucket
    #[error("archive IO error: {0}")]
    ArchiveIo(String),

    /// Manifest is malformed or an entry constraint was violated
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Path conversion error
    #[error("path conversion error: {0:?}")]
    PathConversion(PathBuf),

    /// Generic error for unexpected conditions
    #[error("internal error: {0}")]
    Internal(String),
}

impl GitNestError {
    /// Create a git subprocess error with the invoked command line
    pub fn git(command: impl Into<String>, output: impl Into<String>) -> Self {
        GitNestError::Git {
            command: command.into(),
            output: output.into(),
        }
    }

    /// Create a diff error with a custom message
    pub fn diff(msg: impl Into<String>) -> Self {
        GitNestError::Diff(msg.into())
    }

    /// Create a patch tool error with a custom message
    pub fn patch_tool(msg: impl Into<String>) -> Self {
        GitNestError::PatchTool(msg.into())
    }

    /// Create a backup error with a custom message
    pub fn backup(msg: impl Into<String>) -> Self {
        GitNestError::Backup(msg.into())
    }

    /// Create an archive verification error with a custom message
    pub fn archive_verify(msg: impl Into<String>) -> Self {
        GitNestError::ArchiveVerify(msg.into())
    }

    /// Create an archive IO error with a custom message
    pub fn archive_io(msg: impl Into<String>) -> Self {
        GitNestError::ArchiveIo(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        GitNestError::Internal(msg.into())
    }

    /// Check whether this failure leaves recovery artifacts on disk
    /// (a retained patch and/or backup) rather than rolling anything back
    pub fn is_data_retaining(&self) -> bool {
        matches!(
            self,
            GitNestError::Diff(_)
                | GitNestError::PatchTool(_)
                | GitNestError::Apply { .. }
        )
    }

    /// Check whether this failure is isolated to one file or bucket and
    /// should not abort processing of siblings
    pub fn is_isolated(&self) -> bool {
        matches!(
            self,
            GitNestError::RemoteCheck { .. }
                | GitNestError::Diff(_)
                | GitNestError::PatchTool(_)
                | GitNestError::Apply { .. }
                | GitNestError::ArchiveIo(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GitNestError::git("fetch origin", "could not resolve host");
        assert_eq!(
            err.to_string(),
            "git fetch origin failed: could not resolve host"
        );
    }

    #[test]
    fn test_error_data_retaining() {
        assert!(GitNestError::Apply {
            output: "hunk #1 FAILED".to_string()
        }
        .is_data_retaining());
        assert!(!GitNestError::Backup("disk full".to_string()).is_data_retaining());
    }

    #[test]
    fn test_error_isolated() {
        assert!(GitNestError::ArchiveIo("mkdir failed".to_string()).is_isolated());
        assert!(!GitNestError::ArchiveVerify("empty archive".to_string()).is_isolated());
        assert!(!GitNestError::Backup("copy failed".to_string()).is_isolated());
    }
}
