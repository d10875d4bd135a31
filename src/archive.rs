//! Archival engine: compress prior-month backup buckets into verified tarballs
//!
//! The backup store grows one day bucket at a time. Once a month has passed,
//! its buckets are dead weight as loose files, so the archival engine folds
//! every year/month bucket strictly older than the current one into a single
//! `<yyyy>-<mm>-<kind>.tar.gz` under `archived/`.
//!
//! ## Safety
//!
//! Originals are deleted only after the freshly written archive has been
//! independently re-read: the tarball is reopened, decompressed, and every
//! entry's content is read end-to-end. An archive with zero entries, or one
//! that fails to decompress, is deleted again and the bucket is left exactly
//! as it was. An archive that already exists causes its bucket to be skipped
//! entirely, so interrupted runs are safe to repeat.
//!
//! The current year-month bucket is always skipped, even if it looks stale,
//! to avoid racing with in-flight backups.
//!
//! ## Throttle
//!
//! Scanning the backup tree on every sync would be wasteful, so the engine
//! is gated by a one-line RFC3339 marker file to at most one run per 24
//! hours. An absent or unreadable marker means "should run".

use crate::error::{GitNestError, Result};
use crate::layout::{archive_check_marker, ARCHIVED_DIR, KIND_MODIFIED, KIND_PATCHED};
use crate::util::remove_dir_if_empty;
use chrono::{DateTime, Datelike, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Minimum interval between archive scans
const ARCHIVE_CHECK_INTERVAL_HOURS: i64 = 24;

/// Outcome of one archival run, for reporting to the caller
#[derive(Debug, Default, Clone)]
pub struct ArchiveReport {
    /// Archives created and verified this run
    pub archived: Vec<PathBuf>,
    /// Buckets skipped because their archive already existed
    pub skipped_existing: usize,
    /// Buckets that failed and were left untouched, with the failure text
    pub failures: Vec<(PathBuf, String)>,
}

impl ArchiveReport {
    /// Whether anything went wrong during the run
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Archive every prior-month bucket under `backup_root`
///
/// Processes the `modified/` and `patched/` trees independently. Per-bucket
/// failures are recorded in the report and abort that bucket only; sibling
/// buckets still get processed.
pub fn archive_old_backups(backup_root: &Path) -> Result<ArchiveReport> {
    archive_old_backups_at(backup_root, Utc::now())
}

/// [`archive_old_backups`] with an explicit "now", for callers that control
/// the clock
pub fn archive_old_backups_at(backup_root: &Path, now: DateTime<Utc>) -> Result<ArchiveReport> {
    let mut report = ArchiveReport::default();
    let archived_dir = backup_root.join(ARCHIVED_DIR);

    for kind in [KIND_MODIFIED, KIND_PATCHED] {
        let kind_root = backup_root.join(kind);
        if !kind_root.is_dir() {
            continue;
        }
        for (year, month, bucket) in month_buckets(&kind_root)? {
            // Never touch the in-flight bucket.
            if year == now.year() && month == now.month() {
                debug!("Skipping current month bucket {:?}", bucket);
                continue;
            }
            if (year, month) > (now.year(), now.month()) {
                warn!("Ignoring future-dated bucket {:?}", bucket);
                continue;
            }

            let archive_path = archived_dir.join(format!("{:04}-{:02}-{}.tar.gz", year, month, kind));
            if archive_path.exists() {
                debug!("Archive {:?} already exists, skipping bucket", archive_path);
                report.skipped_existing += 1;
                continue;
            }

            // If removal fails after a verified archive was written, the next
            // run finds the archive present and skips the bucket, so the
            // failure stays confined to this bucket either way.
            let archived = archive_bucket(&bucket, &archive_path, year, month).and_then(|()| {
                fs::remove_dir_all(&bucket)
                    .map_err(|e| GitNestError::archive_io(format!("removing bucket: {}", e)))?;
                if let Some(year_dir) = bucket.parent() {
                    remove_dir_if_empty(year_dir)?;
                }
                Ok(())
            });
            match archived {
                Ok(()) => {
                    info!("Archived {:?} into {:?}", bucket, archive_path);
                    report.archived.push(archive_path);
                }
                Err(e) => {
                    warn!("Failed to archive {:?}: {}", bucket, e);
                    report.failures.push((bucket, e.to_string()));
                }
            }
        }
    }
    Ok(report)
}

/// Enumerate `<kind_root>/<yyyy>/<mm>` bucket directories
fn month_buckets(kind_root: &Path) -> Result<Vec<(i32, u32, PathBuf)>> {
    let mut buckets = Vec::new();
    for year_entry in fs::read_dir(kind_root)? {
        let year_entry = year_entry?;
        if !year_entry.file_type()?.is_dir() {
            continue;
        }
        let Some(year) = dir_number::<i32>(&year_entry.file_name(), 4) else {
            continue;
        };
        for month_entry in fs::read_dir(year_entry.path())? {
            let month_entry = month_entry?;
            if !month_entry.file_type()?.is_dir() {
                continue;
            }
            let Some(month) = dir_number::<u32>(&month_entry.file_name(), 2) else {
                continue;
            };
            buckets.push((year, month, month_entry.path()));
        }
    }
    buckets.sort();
    Ok(buckets)
}

/// Parse a fixed-width, all-digit directory name
fn dir_number<T: std::str::FromStr>(name: &std::ffi::OsStr, width: usize) -> Option<T> {
    let name = name.to_str()?;
    if name.len() != width || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Compress one bucket and verify the result; originals are not touched
fn archive_bucket(bucket: &Path, archive_path: &Path, year: i32, month: u32) -> Result<()> {
    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| GitNestError::archive_io(format!("creating archive dir: {}", e)))?;
    }

    let write = || -> Result<()> {
        let file = File::create(archive_path)
            .map_err(|e| GitNestError::archive_io(format!("creating archive: {}", e)))?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        // Entries keep their yyyy/mm/... relative structure so extraction
        // reproduces the bucket in place.
        let prefix = format!("{:04}/{:02}", year, month);
        builder
            .append_dir_all(&prefix, bucket)
            .map_err(|e| GitNestError::archive_io(format!("compressing bucket: {}", e)))?;
        let encoder = builder
            .into_inner()
            .map_err(|e| GitNestError::archive_io(format!("finalizing tar: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| GitNestError::archive_io(format!("finalizing gzip: {}", e)))?
            .sync_all()
            .map_err(|e| GitNestError::archive_io(format!("flushing archive: {}", e)))?;
        Ok(())
    };

    if let Err(e) = write() {
        let _ = fs::remove_file(archive_path);
        return Err(e);
    }
    if let Err(e) = verify_archive(archive_path) {
        // Partial or corrupt output must not survive; the original bucket
        // stays untouched.
        let _ = fs::remove_file(archive_path);
        return Err(e);
    }
    Ok(())
}

/// Re-read an archive end-to-end, rejecting one with zero entries
///
/// Decompresses the whole stream and reads every entry's full content, not
/// just the headers, so truncated or bit-rotted output is caught before any
/// original data is deleted.
pub fn verify_archive(archive_path: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .map_err(|e| GitNestError::archive_verify(format!("reopening archive: {}", e)))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut entries = 0usize;
    let iter = archive
        .entries()
        .map_err(|e| GitNestError::archive_verify(format!("reading entries: {}", e)))?;
    for entry in iter {
        let mut entry =
            entry.map_err(|e| GitNestError::archive_verify(format!("reading entry: {}", e)))?;
        let mut sink = io::sink();
        io::copy(&mut entry, &mut sink)
            .map_err(|e| GitNestError::archive_verify(format!("reading entry content: {}", e)))?;
        entries += 1;
    }
    if entries == 0 {
        return Err(GitNestError::archive_verify(format!(
            "{} contains no entries",
            archive_path.display()
        )));
    }
    debug!("Verified {:?} ({} entries)", archive_path, entries);
    Ok(())
}

/// Whether the archival engine is due to run
///
/// Reads the throttle marker under the state directory of `repo_root`; an
/// absent or unparsable marker means "should run".
pub fn should_run_archive(repo_root: &Path) -> bool {
    should_run_archive_at(repo_root, Utc::now())
}

/// [`should_run_archive`] with an explicit "now"
pub fn should_run_archive_at(repo_root: &Path, now: DateTime<Utc>) -> bool {
    let marker = archive_check_marker(repo_root);
    let Ok(content) = fs::read_to_string(&marker) else {
        return true;
    };
    match DateTime::parse_from_rfc3339(content.trim()) {
        Ok(last) => now - last.with_timezone(&Utc) >= Duration::hours(ARCHIVE_CHECK_INTERVAL_HOURS),
        Err(_) => {
            warn!("Unparsable archive marker {:?}, forcing run", marker);
            true
        }
    }
}

/// Record that an archive scan ran now
pub fn update_archive_check(repo_root: &Path) -> Result<()> {
    update_archive_check_at(repo_root, Utc::now())
}

/// [`update_archive_check`] with an explicit "now"
pub fn update_archive_check_at(repo_root: &Path, now: DateTime<Utc>) -> Result<()> {
    let marker = archive_check_marker(repo_root);
    if let Some(parent) = marker.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&marker, format!("{}\n", now.to_rfc3339()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::io::Read;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap()
    }

    fn seed_bucket(backup_root: &Path, kind: &str, year: i32, month: u32) -> PathBuf {
        let bucket = backup_root
            .join(kind)
            .join(format!("{:04}", year))
            .join(format!("{:02}", month));
        let day = bucket.join("15").join("conf");
        fs::create_dir_all(&day).unwrap();
        fs::write(
            day.join(format!("app.{:04}{:02}15_080000.yaml", year, month)),
            format!("content {}-{}", year, month),
        )
        .unwrap();
        bucket
    }

    /// Read back every regular file in an archive as (path, bytes)
    fn archive_contents(path: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
        let mut out = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry.path().unwrap().display().to_string();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            out.insert(name, bytes);
        }
        out
    }

    #[test]
    fn test_prior_month_archived_and_bucket_deleted() {
        let root = TempDir::new().unwrap();
        let bucket = seed_bucket(root.path(), "modified", 2026, 7);

        let report = archive_old_backups_at(root.path(), now()).unwrap();
        assert!(!report.has_failures());
        assert_eq!(report.archived.len(), 1);

        let archive = root.path().join("archived/2026-07-modified.tar.gz");
        assert!(archive.exists());
        assert!(!bucket.exists());

        // Round trip: bytes inside the archive equal the original bytes.
        let contents = archive_contents(&archive);
        assert_eq!(
            contents.get("2026/07/15/conf/app.20260715_080000.yaml").unwrap(),
            b"content 2026-7"
        );
    }

    #[test]
    fn test_current_month_never_archived() {
        let root = TempDir::new().unwrap();
        let bucket = seed_bucket(root.path(), "modified", 2026, 8);

        let report = archive_old_backups_at(root.path(), now()).unwrap();
        assert!(report.archived.is_empty());
        assert!(bucket.exists());
        assert!(!root.path().join("archived/2026-08-modified.tar.gz").exists());
    }

    #[test]
    fn test_existing_archive_skips_bucket() {
        let root = TempDir::new().unwrap();
        let bucket = seed_bucket(root.path(), "patched", 2026, 6);
        let archived = root.path().join("archived");
        fs::create_dir_all(&archived).unwrap();
        fs::write(archived.join("2026-06-patched.tar.gz"), "pre-existing").unwrap();

        let report = archive_old_backups_at(root.path(), now()).unwrap();
        assert_eq!(report.skipped_existing, 1);
        assert!(report.archived.is_empty());
        // Idempotent: the bucket is left alone, the stand-in untouched.
        assert!(bucket.exists());
        assert_eq!(
            fs::read(archived.join("2026-06-patched.tar.gz")).unwrap(),
            b"pre-existing"
        );
    }

    #[test]
    fn test_both_kinds_processed_and_year_dir_pruned() {
        let root = TempDir::new().unwrap();
        seed_bucket(root.path(), "modified", 2025, 12);
        seed_bucket(root.path(), "patched", 2025, 11);

        let report = archive_old_backups_at(root.path(), now()).unwrap();
        assert_eq!(report.archived.len(), 2);
        assert!(root.path().join("archived/2025-12-modified.tar.gz").exists());
        assert!(root.path().join("archived/2025-11-patched.tar.gz").exists());
        // Year directories emptied by bucket removal are pruned.
        assert!(!root.path().join("modified/2025").exists());
        assert!(!root.path().join("patched/2025").exists());
    }

    #[test]
    fn test_verify_rejects_empty_and_corrupt() {
        let root = TempDir::new().unwrap();

        // Zero-entry archive.
        let empty = root.path().join("empty.tar.gz");
        let encoder = GzEncoder::new(File::create(&empty).unwrap(), Compression::default());
        let builder = tar::Builder::new(encoder);
        builder
            .into_inner()
            .unwrap()
            .finish()
            .unwrap()
            .sync_all()
            .unwrap();
        assert!(verify_archive(&empty).is_err());

        // Not gzip at all.
        let garbage = root.path().join("garbage.tar.gz");
        fs::write(&garbage, b"definitely not a tarball").unwrap();
        assert!(verify_archive(&garbage).is_err());
    }

    #[test]
    fn test_non_bucket_dirs_ignored() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("modified/not-a-year/01")).unwrap();
        fs::create_dir_all(root.path().join("modified/2026/xx")).unwrap();
        let report = archive_old_backups_at(root.path(), now()).unwrap();
        assert!(report.archived.is_empty());
        assert!(!report.has_failures());
    }

    #[test]
    fn test_throttle_absent_marker_runs() {
        let root = TempDir::new().unwrap();
        assert!(should_run_archive_at(root.path(), now()));
    }

    #[test]
    fn test_throttle_within_24_hours() {
        let root = TempDir::new().unwrap();
        update_archive_check_at(root.path(), now()).unwrap();

        assert!(!should_run_archive_at(root.path(), now() + Duration::hours(2)));
        assert!(should_run_archive_at(root.path(), now() + Duration::hours(25)));
    }

    #[test]
    fn test_throttle_unparsable_marker_runs() {
        let root = TempDir::new().unwrap();
        let marker = archive_check_marker(root.path());
        fs::create_dir_all(marker.parent().unwrap()).unwrap();
        fs::write(&marker, "yesterday, probably\n").unwrap();
        assert!(should_run_archive_at(root.path(), now()));
    }
}
