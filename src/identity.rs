//! Stable document identity.
//!
//! Every synchronizable document carries a `cast-id` header key holding a
//! UUID v4, assigned once and never changed. This module injects missing
//! identifiers into eligible files, enforces the identifier-first header
//! layout, and detects duplicate identifiers within a vault.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::atomic::write_atomic;
use crate::header::{self, HeaderBlock, HeaderValue, ID_KEY, TYPE_KEY, VAULTS_KEY};
use crate::model::types::CastId;
use crate::normalize::{self, NormalizeError};

/// Generate a fresh document identifier.
#[must_use]
pub fn generate() -> CastId {
    CastId::generate()
}

/// Returns `true` when a header is eligible for identifier injection:
/// it lacks `cast-id` but carries `cast-vaults` or `cast-type`.
#[must_use]
pub fn needs_id(block: &HeaderBlock) -> bool {
    !block.contains_key(ID_KEY)
        && (block.contains_key(VAULTS_KEY) || block.contains_key(TYPE_KEY))
}

/// The outcome of an identity fix pass over one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FixOutcome {
    /// The file was left untouched.
    Unchanged,
    /// A fresh identifier was injected.
    Injected(CastId),
    /// An existing identifier was moved to the front of the header.
    Reordered(CastId),
}

/// Inject a missing identifier or move an existing one to the front,
/// persisting via an atomic write of the canonical content.
///
/// Files without a header, or whose header carries neither `cast-vaults`
/// nor `cast-type` and no identifier, are left untouched.
///
/// # Errors
/// Returns [`IdentityError`] on read/normalize/write failure.
pub fn fix_file(path: &Path, ephemeral: &BTreeSet<String>) -> Result<FixOutcome, IdentityError> {
    let raw = fs::read(path).map_err(|e| IdentityError::Io {
        path: path.to_owned(),
        detail: e.to_string(),
    })?;
    let doc = normalize::normalize(&raw, ephemeral).map_err(|e| IdentityError::Normalize {
        path: path.to_owned(),
        source: e,
    })?;

    let Some(mut block) = doc.header else {
        return Ok(FixOutcome::Unchanged);
    };

    if needs_id(&block) {
        let id = generate();
        block.insert_first(ID_KEY, HeaderValue::Scalar(id.to_string()));
        let content = header::assemble(Some(&block), &doc.body);
        write_atomic(path, content.as_bytes()).map_err(|e| IdentityError::Io {
            path: path.to_owned(),
            detail: e.to_string(),
        })?;
        return Ok(FixOutcome::Injected(id));
    }

    let id = block
        .id()
        .map_err(|e| IdentityError::Normalize {
            path: path.to_owned(),
            source: NormalizeError::Header(crate::header::HeaderError {
                detail: e.to_string(),
            }),
        })?;
    let Some(id) = id else {
        return Ok(FixOutcome::Unchanged);
    };

    if block.ensure_first(ID_KEY) {
        let content = header::assemble(Some(&block), &doc.body);
        write_atomic(path, content.as_bytes()).map_err(|e| IdentityError::Io {
            path: path.to_owned(),
            detail: e.to_string(),
        })?;
        return Ok(FixOutcome::Reordered(id));
    }

    Ok(FixOutcome::Unchanged)
}

/// Scan `(identifier, path)` pairs for identifiers used by more than one
/// path. Any non-singleton is a fatal inconsistency for the vault.
#[must_use]
pub fn find_duplicates<I>(pairs: I) -> BTreeMap<CastId, Vec<String>>
where
    I: IntoIterator<Item = (CastId, String)>,
{
    let mut by_id: BTreeMap<CastId, Vec<String>> = BTreeMap::new();
    for (id, path) in pairs {
        by_id.entry(id).or_default().push(path);
    }
    by_id.retain(|_, paths| paths.len() > 1);
    for paths in by_id.values_mut() {
        paths.sort();
    }
    by_id
}

// ---------------------------------------------------------------------------
// IdentityError
// ---------------------------------------------------------------------------

/// Identity maintenance failed for one file.
#[derive(Debug)]
pub enum IdentityError {
    /// Reading or writing the file failed.
    Io {
        /// The file in question.
        path: PathBuf,
        /// The underlying error.
        detail: String,
    },
    /// The file could not be normalized.
    Normalize {
        /// The file in question.
        path: PathBuf,
        /// The normalization failure.
        source: NormalizeError,
    },
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, detail } => {
                write!(f, "identity fix failed for '{}': {detail}", path.display())
            }
            Self::Normalize { path, source } => {
                write!(f, "identity fix failed for '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for IdentityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Normalize { source, .. } => Some(source),
            Self::Io { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
