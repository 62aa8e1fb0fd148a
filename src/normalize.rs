//! Content canonicalization and digest computation.
//!
//! Normalization is deterministic and purely functional: line endings become
//! LF, trailing whitespace is stripped from every line, and the content ends
//! with exactly one newline. Two SHA-256 digests are computed per document —
//! the *full digest* over the re-serialized digest view of the header plus
//! the body, and the *body digest* over the body alone. Body digests drive
//! sync decisions so that purely-local header edits never trigger conflicts.

use std::collections::BTreeSet;
use std::fmt;

use sha2::{Digest as _, Sha256};

use crate::header::{self, HeaderBlock, HeaderError};
use crate::model::types::Digest;

// ---------------------------------------------------------------------------
// NormalizedDoc
// ---------------------------------------------------------------------------

/// The result of normalizing raw file content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedDoc {
    /// Canonical full content: LF line endings, trailing whitespace
    /// stripped, exactly one trailing newline, author's header text kept
    /// in its original key order.
    pub content: String,
    /// The parsed header block, if the content carries one.
    pub header: Option<HeaderBlock>,
    /// The canonical body (everything after the header block).
    pub body: String,
    /// SHA-256 over the digest-view header plus the body.
    pub full_digest: Digest,
    /// SHA-256 over the body alone.
    pub body_digest: Digest,
}

/// Normalize raw bytes into canonical content and digests.
///
/// # Errors
/// Returns [`NormalizeError::Encoding`] if the bytes are not valid UTF-8 and
/// [`NormalizeError::Header`] if an opening header delimiter is never closed
/// or the header is not a YAML mapping.
pub fn normalize(raw: &[u8], ephemeral: &BTreeSet<String>) -> Result<NormalizedDoc, NormalizeError> {
    let text = std::str::from_utf8(raw).map_err(|e| NormalizeError::Encoding {
        detail: e.to_string(),
    })?;

    let unixed = to_lf(text);
    let (raw_header, raw_body) = header::split(&unixed)?;

    let body = canonicalize_lines(raw_body);
    let (content, parsed) = match raw_header {
        Some(header_text) => {
            let canonical_header = canonicalize_lines(header_text);
            let block = HeaderBlock::parse(&canonical_header)?;
            let content = if canonical_header.is_empty() {
                format!("---\n---\n{body}")
            } else {
                format!("---\n{canonical_header}---\n{body}")
            };
            (content, Some(block))
        }
        None => (body.clone(), None),
    };

    let (full_digest, body_digest) = digests(parsed.as_ref(), &body, ephemeral);

    Ok(NormalizedDoc {
        content,
        header: parsed,
        body,
        full_digest,
        body_digest,
    })
}

/// Compute the digest pair for an already-canonical header and body.
#[must_use]
pub fn digests(
    header: Option<&HeaderBlock>,
    body: &str,
    ephemeral: &BTreeSet<String>,
) -> (Digest, Digest) {
    let digest_header = header
        .map(|h| h.digest_view(ephemeral).to_yaml())
        .unwrap_or_default();
    let full_input = if digest_header.is_empty() {
        body.to_owned()
    } else {
        format!("---\n{digest_header}---\n{body}")
    };
    (sha256(full_input.as_bytes()), sha256(body.as_bytes()))
}

/// SHA-256 of a byte slice as a lowercase hex [`Digest`].
#[must_use]
pub fn sha256(bytes: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Digest::from_sha256(&hasher.finalize().into())
}

// ---------------------------------------------------------------------------
// Text canonicalization
// ---------------------------------------------------------------------------

/// Convert CR-LF and lone CR line endings to LF.
#[must_use]
pub fn to_lf(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_owned();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Strip trailing whitespace from every line and guarantee exactly one
/// trailing newline. Empty input stays empty.
#[must_use]
pub fn canonicalize_lines(text: &str) -> String {
    let mut out = text
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    while out.ends_with('\n') {
        out.pop();
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// NormalizeError
// ---------------------------------------------------------------------------

/// Normalization failed for one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NormalizeError {
    /// The file is not valid UTF-8.
    Encoding {
        /// Decoder error detail.
        detail: String,
    },
    /// The header block is malformed.
    Header(HeaderError),
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoding { detail } => write!(f, "content is not valid UTF-8: {detail}"),
            Self::Header(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl std::error::Error for NormalizeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Header(e) => Some(e),
            Self::Encoding { .. } => None,
        }
    }
}

impl From<HeaderError> for NormalizeError {
    fn from(e: HeaderError) -> Self {
        Self::Header(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
