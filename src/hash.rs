//! Content hashing for backup deduplication
//!
//! The backup store decides whether a new backup is needed by comparing the
//! SHA-256 digest of a file against the digest of the most recent existing
//! backup for the same logical path. Hashing is the only signal used for
//! deduplication: modification times are ignored because they change on
//! every sync even when content does not.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Hash a file's content using SHA-256
///
/// Reads the file in 8 KiB chunks so large files never have to fit in
/// memory. Returns the digest as a 64-character hexadecimal string.
///
/// # Errors
///
/// Returns [`crate::GitNestError::Io`] if the file cannot be opened or read.
pub fn hash_file_content(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
