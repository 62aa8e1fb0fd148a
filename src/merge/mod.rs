//! Three-way merge for structured Markdown documents.
//!
//! A merge runs in two phases. The *header merge* is key-wise: reserved
//! keys follow the source (authoritative for cross-vault identity and
//! routing), everything else follows the destination. The *body merge* is
//! block-wise over top-level heading boundaries: unchanged blocks pass
//! through, one-sided changes win, and both-sided changes either resolve
//! via the prefix-containment heuristic or surface as unresolved hunks.
//!
//! `UnresolvedHunks` is not an error — it is a first-class outcome that the
//! applier materializes as a conflict file.

pub mod body;
pub mod header;

use std::collections::BTreeSet;

use crate::header::assemble;
use crate::model::types::VaultId;
use crate::normalize::NormalizedDoc;

pub use body::Hunk;

/// The output of a three-way merge: full merged content plus any hunks the
/// merge could not resolve. Hunk byte ranges index into `content`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Merged content (header + body). When hunks remain, the competing
    /// versions are embedded between conflict markers.
    pub content: String,
    /// Unresolved hunks, in document order.
    pub hunks: Vec<Hunk>,
}

impl MergeOutcome {
    /// Returns `true` when the merge resolved without conflicts.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.hunks.is_empty()
    }
}

/// Merge `source` and `dest` against their common `base`.
///
/// All three documents must already be normalized. The vault ids label the
/// two sides of any unresolved hunk.
#[must_use]
pub fn merge(
    base: &NormalizedDoc,
    source: &NormalizedDoc,
    dest: &NormalizedDoc,
    source_vault: &VaultId,
    dest_vault: &VaultId,
    ephemeral: &BTreeSet<String>,
) -> MergeOutcome {
    let merged_header = header::merge_headers(
        source.header.as_ref(),
        dest.header.as_ref(),
        ephemeral,
    );

    let (body, body_hunks) = body::merge_bodies(
        &base.body,
        &source.body,
        &dest.body,
        source_vault.as_str(),
        dest_vault.as_str(),
    );

    let content = assemble(Some(&merged_header), &body);
    let offset = content.len() - body.len();
    let hunks = body_hunks
        .into_iter()
        .map(|h| Hunk {
            start: h.start + offset,
            end: h.end + offset,
            ..h
        })
        .collect();

    MergeOutcome { content, hunks }
}
