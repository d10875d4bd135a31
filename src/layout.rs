//! On-disk layout of gitnest state inside the parent repository
//!
//! Everything gitnest writes lives under a single `.workspaces/` directory
//! at the parent repository root:
//!
//! ```text
//! .workspaces/
//! ├── workspaces.json          # Workspace manifest
//! ├── .last-archive-check      # Archive throttle marker (RFC3339, one line)
//! ├── patches/                 # Divergence patches awaiting reapply/recovery
//! │   └── <workspace-path>/<basename>.patch
//! └── backup/
//!     ├── modified/<yyyy>/<mm>/<dd>/...   # File backups
//!     ├── patched/<yyyy>/<mm>/<dd>/...    # Patch backups
//!     └── archived/<yyyy>-<mm>-<kind>.tar.gz
//! ```

use std::path::{Path, PathBuf};

/// Name of the gitnest state directory at the parent repository root
pub const STATE_DIR: &str = ".workspaces";

/// Manifest filename inside the state directory
pub const MANIFEST_FILE: &str = "workspaces.json";

/// Archive throttle marker filename inside the state directory
pub const ARCHIVE_CHECK_MARKER: &str = ".last-archive-check";

/// Backup kind for working-tree file backups
pub const KIND_MODIFIED: &str = "modified";

/// Backup kind for divergence-patch backups
pub const KIND_PATCHED: &str = "patched";

/// Subdirectory of the backup root holding finished archives
pub const ARCHIVED_DIR: &str = "archived";

/// Root of all gitnest state for the given parent repository
pub fn state_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(STATE_DIR)
}

/// Path of the workspace manifest
pub fn manifest_path(repo_root: &Path) -> PathBuf {
    state_dir(repo_root).join(MANIFEST_FILE)
}

/// Root of the backup tree (`modified/`, `patched/`, `archived/`)
pub fn backup_root(repo_root: &Path) -> PathBuf {
    state_dir(repo_root).join("backup")
}

/// Root of the patch storage tree
pub fn patches_root(repo_root: &Path) -> PathBuf {
    state_dir(repo_root).join("patches")
}

/// Path of the archive throttle marker
pub fn archive_check_marker(repo_root: &Path) -> PathBuf {
    state_dir(repo_root).join(ARCHIVE_CHECK_MARKER)
}

/// Path where the divergence patch for one keep file is stored
///
/// `workspace_rel` is the workspace path relative to the parent repository
/// root; `file` is the keep file path relative to the workspace.
pub fn patch_path(repo_root: &Path, workspace_rel: &Path, file: &Path) -> PathBuf {
    let basename = file.file_name().unwrap_or(file.as_os_str());
    let name = format!("{}.patch", basename.to_string_lossy());
    patches_root(repo_root).join(workspace_rel).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_path_uses_basename() {
        let p = patch_path(
            Path::new("/repo"),
            Path::new("vendor/widget"),
            Path::new("conf/settings.yaml"),
        );
        assert_eq!(
            p,
            PathBuf::from("/repo/.workspaces/patches/vendor/widget/settings.yaml.patch")
        );
    }

    #[test]
    fn test_backup_root_under_state_dir() {
        assert_eq!(
            backup_root(Path::new("/repo")),
            PathBuf::from("/repo/.workspaces/backup")
        );
    }
}
