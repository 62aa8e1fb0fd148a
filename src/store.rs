//! Content-addressed baseline store.
//!
//! A flat directory of files named by their content's SHA-256 hex digest,
//! holding the normalized baselines that three-way merges resolve against.
//! Writes are atomic and idempotent; the store is append-only from the
//! engine's perspective (garbage collection is a separable maintenance
//! operation).

use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::atomic::write_atomic;
use crate::model::types::Digest;
use crate::normalize::sha256;

/// A content-addressed object store rooted at `.cast/objects/`.
#[derive(Clone, Debug)]
pub struct ObjectStore {
    dir: PathBuf,
}

impl ObjectStore {
    /// Open a store rooted at `dir`. The directory is created lazily on the
    /// first write.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The path an object with this digest would occupy.
    #[must_use]
    pub fn object_path(&self, digest: &Digest) -> PathBuf {
        self.dir.join(digest.as_str())
    }

    /// Store `bytes`, returning their digest. Idempotent: an existing
    /// object is left untouched (write-once), so partial objects are
    /// impossible by construction.
    ///
    /// # Errors
    /// Returns [`StoreError`] on filesystem failure.
    pub fn put(&self, bytes: &[u8]) -> Result<Digest, StoreError> {
        let digest = sha256(bytes);
        let path = self.object_path(&digest);
        if path.exists() {
            return Ok(digest);
        }
        fs::create_dir_all(&self.dir).map_err(|e| StoreError {
            path: self.dir.clone(),
            detail: e.to_string(),
        })?;
        write_atomic(&path, bytes).map_err(|e| StoreError {
            path,
            detail: e.to_string(),
        })?;
        Ok(digest)
    }

    /// Fetch an object's bytes, or `None` if absent.
    ///
    /// # Errors
    /// Returns [`StoreError`] on filesystem failure other than absence.
    pub fn get(&self, digest: &Digest) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.object_path(digest);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError {
                path,
                detail: e.to_string(),
            }),
        }
    }

    /// Returns `true` if an object with this digest exists.
    #[must_use]
    pub fn has(&self, digest: &Digest) -> bool {
        self.object_path(digest).is_file()
    }
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// An object-store operation failed.
#[derive(Debug)]
pub struct StoreError {
    /// The path involved.
    pub path: PathBuf,
    /// The underlying error.
    pub detail: String,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "object store error at '{}': {}",
            self.path.display(),
            self.detail
        )
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
