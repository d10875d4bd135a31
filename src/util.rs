//! Shared path and timestamp helpers

use crate::error::{GitNestError, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Timestamp format embedded into backup filenames.
///
/// Fixed-width and zero-padded so that the newest backup for a logical path
/// can be found with a plain lexicographic max over a directory listing.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Format a timestamp as a `yyyymmdd_hhmmss` backup filename segment
pub fn format_backup_timestamp(now: DateTime<Utc>) -> String {
    now.format(BACKUP_TIMESTAMP_FORMAT).to_string()
}

/// Make a path relative to a base path
///
/// Tries a plain lexical strip first so symbolic links are preserved, and
/// only falls back to canonicalizing both paths when the lexical approach
/// fails (relative components, differing normalization).
///
/// # Errors
///
/// Returns [`GitNestError::Internal`] if the path is not under the base path,
/// or [`GitNestError::Io`] if the canonicalization fallback fails.
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| {
            GitNestError::internal(format!(
                "Path {:?} is not relative to {:?}",
                path_canon, base_canon
            ))
        })
}

/// Remove a directory if it is empty, returning whether it was removed
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Atomic file write (write to temp file then rename)
///
/// The target is never visible in a partially written state; either the old
/// content or the complete new content exists at the path.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Append a line to the parent repository's `.gitignore` unless present
///
/// Returns whether the entry was added. Matching is exact against whole
/// trimmed lines.
pub fn ensure_ignore_entry(repo_root: &Path, entry: &str) -> Result<bool> {
    let ignore_path = repo_root.join(".gitignore");
    let existing = match fs::read_to_string(&ignore_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if existing.lines().any(|line| line.trim() == entry) {
        return Ok(false);
    }
    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(entry);
    updated.push('\n');
    fs::write(&ignore_path, updated)?;
    trace!("Added '{}' to {:?}", entry, ignore_path);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_format_backup_timestamp() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(format_backup_timestamp(ts), "20260307_090501");
    }

    #[test]
    fn test_timestamp_sorts_lexicographically() {
        let earlier = Utc.with_ymd_and_hms(2026, 9, 30, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        assert!(format_backup_timestamp(earlier) < format_backup_timestamp(later));
    }

    #[test]
    fn test_make_relative() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        let file = base.join("configs").join("app.yaml");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"x").unwrap();

        let relative = make_relative(&file, base).unwrap();
        assert_eq!(relative, PathBuf::from("configs/app.yaml"));
    }

    #[test]
    fn test_make_relative_outside_base() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let file = b.path().join("f.txt");
        fs::write(&file, b"x").unwrap();
        assert!(make_relative(&file, a.path()).is_err());
    }

    #[test]
    fn test_remove_dir_if_empty() {
        let temp_dir = TempDir::new().unwrap();
        let empty = temp_dir.path().join("empty");
        let full = temp_dir.path().join("full");
        fs::create_dir(&empty).unwrap();
        fs::create_dir(&full).unwrap();
        fs::write(full.join("f"), b"x").unwrap();

        assert!(remove_dir_if_empty(&empty).unwrap());
        assert!(!empty.exists());
        assert!(!remove_dir_if_empty(&full).unwrap());
        assert!(full.exists());
    }

    #[test]
    fn test_ensure_ignore_entry() {
        let temp_dir = TempDir::new().unwrap();
        assert!(ensure_ignore_entry(temp_dir.path(), "vendor/widget/").unwrap());
        assert!(!ensure_ignore_entry(temp_dir.path(), "vendor/widget/").unwrap());
        assert!(ensure_ignore_entry(temp_dir.path(), "other/").unwrap());
        let content = fs::read_to_string(temp_dir.path().join(".gitignore")).unwrap();
        assert_eq!(content, "vendor/widget/\nother/\n");
    }

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("manifest.json");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
        assert!(!path.with_extension("tmp").exists());
    }
}
