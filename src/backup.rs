//! Backup store: timestamped, date-bucketed, content-deduplicated copies
//!
//! Every mutation the keep-file resolver performs is preceded by a backup
//! of the state it is about to destroy. Backups are immutable once written:
//! a new timestamped copy is appended, an existing copy is never touched.
//!
//! ## Layout
//!
//! ```text
//! <backup_root>/
//! ├── modified/<yyyy>/<mm>/<dd>/<rel-path dirs>/<stem>.<yyyymmdd_hhmmss>[_NN][.<ext>]
//! ├── patched/<yyyy>/<mm>/<dd>/...
//! └── archived/                  # Written by the archival engine
//! ```
//!
//! When two backups of the same logical path land in the same second, the
//! later one takes a `_NN` counter segment. An existing backup file is
//! never overwritten.
//!
//! ## Deduplication
//!
//! Before writing, the store locates the most recent existing backup for
//! the same logical path inside the same day bucket and compares SHA-256
//! digests. Matching digests skip the write entirely, so repeated syncs of
//! an unchanged keep file never accumulate redundant copies, while any real
//! edit always produces a new, permanent backup point.
//!
//! The "latest backup" lookup is a plain string-max over the directory
//! listing: the embedded timestamp is fixed-width and zero-padded, so
//! lexicographic order is chronological order. No index structure exists.

use crate::error::{GitNestError, Result};
use crate::hash::hash_file_content;
use crate::layout::{KIND_MODIFIED, KIND_PATCHED};
use crate::util::{format_backup_timestamp, make_relative, remove_dir_if_empty};
use chrono::{DateTime, Duration, Utc};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};
use walkdir::WalkDir;

/// Width of the `yyyymmdd_hhmmss` timestamp segment in backup filenames
const TIMESTAMP_WIDTH: usize = 15;

/// Cap on the `_NN` disambiguation counter for same-second backups
const MAX_SAME_SECOND_BACKUPS: u32 = 99;

/// Back up a working-tree file before it is mutated
///
/// Returns the path of the created backup, or `None` when no backup was
/// needed: the source file does not exist (a keep file may legitimately be
/// absent), or the latest same-day backup already has identical content.
///
/// `repo_root` anchors the logical path: an absolute `file` is stored under
/// its path relative to `repo_root`, a relative `file` is stored as-is. The
/// copy is flushed to durable storage before this function returns.
///
/// # Errors
///
/// Returns [`GitNestError::Backup`] if the copy or flush fails; the caller
/// must not proceed with a destructive operation in that case.
pub fn create_file_backup(
    file: &Path,
    backup_root: &Path,
    repo_root: &Path,
) -> Result<Option<PathBuf>> {
    create_file_backup_at(file, backup_root, repo_root, Utc::now())
}

/// [`create_file_backup`] with an explicit timestamp, for callers that
/// control the clock
pub fn create_file_backup_at(
    file: &Path,
    backup_root: &Path,
    repo_root: &Path,
    now: DateTime<Utc>,
) -> Result<Option<PathBuf>> {
    if !file.exists() {
        trace!("Nothing to back up, {:?} does not exist", file);
        return Ok(None);
    }
    let rel = if file.is_absolute() {
        make_relative(file, repo_root)?
    } else {
        file.to_path_buf()
    };
    create_backup(file, backup_root, KIND_MODIFIED, &rel, now)
}

/// Back up a divergence patch before it is consumed or retained
///
/// Same contract as [`create_file_backup`], stored under the `patched/`
/// kind, with the logical path taken relative to the patch-storage root.
pub fn create_patch_backup(
    patch: &Path,
    backup_root: &Path,
    patches_root: &Path,
) -> Result<Option<PathBuf>> {
    create_patch_backup_at(patch, backup_root, patches_root, Utc::now())
}

/// [`create_patch_backup`] with an explicit timestamp
pub fn create_patch_backup_at(
    patch: &Path,
    backup_root: &Path,
    patches_root: &Path,
    now: DateTime<Utc>,
) -> Result<Option<PathBuf>> {
    if !patch.exists() {
        trace!("Nothing to back up, {:?} does not exist", patch);
        return Ok(None);
    }
    let rel = make_relative(patch, patches_root)?;
    create_backup(patch, backup_root, KIND_PATCHED, &rel, now)
}

/// Shared backup path: dedup check, timestamped name, copy, flush
fn create_backup(
    src: &Path,
    backup_root: &Path,
    kind: &str,
    rel: &Path,
    now: DateTime<Utc>,
) -> Result<Option<PathBuf>> {
    let day_dir = backup_root
        .join(kind)
        .join(now.format("%Y").to_string())
        .join(now.format("%m").to_string())
        .join(now.format("%d").to_string());

    let digest = hash_file_content(src)
        .map_err(|e| GitNestError::backup(format!("cannot hash {}: {}", src.display(), e)))?;
    if let Some(latest) = find_latest_backup(&day_dir, rel) {
        let latest_digest = hash_file_content(&latest).map_err(|e| {
            GitNestError::backup(format!("cannot hash {}: {}", latest.display(), e))
        })?;
        if latest_digest == digest {
            debug!("Backup of {:?} skipped, content unchanged", rel);
            return Ok(None);
        }
    }

    let file_name = rel
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| GitNestError::PathConversion(rel.to_path_buf()))?;
    let dest_dir = match rel.parent() {
        Some(parent) => day_dir.join(parent),
        None => day_dir,
    };
    let ts = format_backup_timestamp(now);
    let mut dest = dest_dir.join(timestamped_name(file_name, &ts));
    // Backups are append-only. A same-second write of differing content
    // takes a `_NN` counter segment instead of overwriting; the counter
    // keeps names string-sortable within the second.
    let mut seq = 0u32;
    while dest.exists() {
        seq += 1;
        if seq > MAX_SAME_SECOND_BACKUPS {
            return Err(GitNestError::backup(format!(
                "too many same-second backups of {:?} at {}",
                rel, ts
            )));
        }
        dest = dest_dir.join(timestamped_name(file_name, &format!("{}_{:02}", ts, seq)));
    }

    (|| -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, &dest)?;
        // The backup must hit durable storage before the caller mutates the
        // original.
        File::open(&dest)?.sync_all()?;
        Ok(())
    })()
    .map_err(|e| GitNestError::backup(format!("writing {}: {}", dest.display(), e)))?;

    info!("Backed up {:?} to {:?}", src, dest);
    Ok(Some(dest))
}

/// Insert a timestamp segment before the filename extension
///
/// `app.yaml` becomes `app.<ts>.yaml`; an extensionless or dotfile name
/// gets the timestamp appended (`Makefile.<ts>`, `.env.<ts>`).
fn timestamped_name(file_name: &str, ts: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}.{}.{}", stem, ts, ext),
        _ => format!("{}.{}", file_name, ts),
    }
}

/// Find the newest backup of `rel` inside one day bucket
///
/// Returns `None` when the bucket has no backup for that logical path.
/// Newest is decided by the embedded timestamp, string-sortable because its
/// format is fixed-width and zero-padded.
pub fn find_latest_backup(day_dir: &Path, rel: &Path) -> Option<PathBuf> {
    let file_name = rel.file_name()?.to_str()?;
    let dir = match rel.parent() {
        Some(parent) if parent.as_os_str().is_empty() => day_dir.to_path_buf(),
        Some(parent) => day_dir.join(parent),
        None => day_dir.to_path_buf(),
    };
    let entries = fs::read_dir(&dir).ok()?;

    let mut latest: Option<String> = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if backup_timestamp_of(name, file_name).is_some()
            && latest.as_deref().map_or(true, |cur| name > cur)
        {
            latest = Some(name.to_string());
        }
    }
    latest.map(|name| dir.join(name))
}

/// Extract the timestamp segment from a backup filename, if `candidate` is
/// a backup of `original`
fn backup_timestamp_of<'a>(candidate: &'a str, original: &str) -> Option<&'a str> {
    let ts = match original.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let rest = candidate.strip_prefix(stem)?.strip_prefix('.')?;
            rest.strip_suffix(ext)?.strip_suffix('.')?
        }
        _ => candidate.strip_prefix(original)?.strip_prefix('.')?,
    };
    is_backup_timestamp(ts).then_some(ts)
}

/// Whether `s` is a `yyyymmdd_hhmmss` segment, optionally carrying the
/// `_NN` same-second counter
fn is_backup_timestamp(s: &str) -> bool {
    let (base, counter) = match s.len() {
        TIMESTAMP_WIDTH => (s, None),
        n if n == TIMESTAMP_WIDTH + 3 => (&s[..TIMESTAMP_WIDTH], Some(&s[TIMESTAMP_WIDTH..])),
        _ => return false,
    };
    base.as_bytes()[8] == b'_'
        && base[..8].bytes().all(|b| b.is_ascii_digit())
        && base[9..].bytes().all(|b| b.is_ascii_digit())
        && counter.map_or(true, |c| {
            c.as_bytes()[0] == b'_' && c[1..].bytes().all(|b| b.is_ascii_digit())
        })
}

/// Delete backups older than the retention window
///
/// Removes every backup file under the `modified/` and `patched/` trees
/// whose modification time is older than `now - retention_days`, then
/// prunes bucket directories left empty. Finished archives under
/// `archived/` are never touched.
///
/// # Errors
///
/// Returns [`GitNestError::InvalidConfiguration`] if `retention_days <= 0`.
pub fn cleanup(backup_root: &Path, retention_days: i64) -> Result<usize> {
    if retention_days <= 0 {
        return Err(GitNestError::InvalidConfiguration(format!(
            "retention must be positive, got {} days",
            retention_days
        )));
    }
    let cutoff = std::time::SystemTime::from(Utc::now() - Duration::days(retention_days));

    let mut deleted = 0;
    for kind in [KIND_MODIFIED, KIND_PATCHED] {
        let kind_root = backup_root.join(kind);
        if !kind_root.is_dir() {
            continue;
        }
        // contents_first so emptied directories can be pruned on the way up
        for entry in WalkDir::new(&kind_root).contents_first(true) {
            let entry = entry.map_err(|e| GitNestError::backup(e.to_string()))?;
            if entry.file_type().is_file() {
                let modified = entry.metadata().map(|m| m.modified());
                if let Ok(Ok(modified)) = modified {
                    if modified < cutoff {
                        fs::remove_file(entry.path())?;
                        deleted += 1;
                        trace!("Deleted expired backup {:?}", entry.path());
                    }
                }
            } else if entry.file_type().is_dir() && entry.path() != kind_root {
                remove_dir_if_empty(entry.path())?;
            }
        }
    }
    if deleted > 0 {
        info!(
            "Cleanup removed {} backup(s) older than {} day(s)",
            deleted, retention_days
        );
    }
    Ok(deleted)
}
