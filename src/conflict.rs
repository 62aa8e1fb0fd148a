//! Conflict materialization.
//!
//! When a merge leaves unresolved hunks, the merged skeleton (markers
//! embedded) is written to a timestamped sibling of the destination file —
//! the destination itself is never modified. The conflict file inherits
//! the document identifier and gains a `cast-conflict` header key naming
//! the source vault and the materialization time, so operator tooling can
//! find and resolve it. The selector never indexes these siblings, which
//! keeps the inherited identifier from tripping duplicate detection.

use crate::header::{self, CONFLICT_KEY, HeaderBlock, HeaderValue, ID_KEY};
use crate::model::types::VaultId;
use crate::normalize::NormalizedDoc;

/// Derive the sibling path: `note.md` → `note.conflicted-<stamp>.md`.
#[must_use]
pub fn conflict_rel_path(rel: &str, stamp: &str) -> String {
    match rel.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !stem.ends_with('/') => {
            format!("{stem}.conflicted-{stamp}.{ext}")
        }
        _ => format!("{rel}.conflicted-{stamp}"),
    }
}

/// Stamp merged content with the conflict-marker header key.
///
/// The merged header (identifier first) is preserved; a `cast-conflict`
/// mapping naming the source vault and the timestamp is appended.
#[must_use]
pub fn stamp_conflict(content: &str, source_vault: &VaultId, stamp: &str) -> String {
    let (header_text, body) = match header::split(content) {
        Ok(parts) => parts,
        Err(_) => (None, content),
    };
    let mut block = header_text
        .and_then(|t| HeaderBlock::parse(t).ok())
        .unwrap_or_default();
    block.set(
        CONFLICT_KEY,
        HeaderValue::Mapping(vec![
            (
                "source".to_owned(),
                HeaderValue::Scalar(source_vault.to_string()),
            ),
            ("at".to_owned(), HeaderValue::Scalar(stamp.to_owned())),
        ]),
    );
    block.ensure_first(ID_KEY);
    header::assemble(Some(&block), body)
}

/// Build planner-direct conflict content: the merged header plus the whole
/// source and destination bodies interleaved between markers.
#[must_use]
pub fn interleave_bodies(
    merged_header: &HeaderBlock,
    source: &NormalizedDoc,
    dest: &NormalizedDoc,
    source_vault: &VaultId,
    dest_vault: &VaultId,
) -> String {
    let mut body = String::new();
    body.push_str("<<<<<<< ");
    body.push_str(source_vault.as_str());
    body.push('\n');
    body.push_str(&source.body);
    if !source.body.is_empty() && !source.body.ends_with('\n') {
        body.push('\n');
    }
    body.push_str("=======\n");
    body.push_str(&dest.body);
    if !dest.body.is_empty() && !dest.body.ends_with('\n') {
        body.push('\n');
    }
    body.push_str(">>>>>>> ");
    body.push_str(dest_vault.as_str());
    body.push('\n');
    header::assemble(Some(merged_header), &body)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
