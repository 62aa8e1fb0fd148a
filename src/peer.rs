//! Per-peer sync-state journals.
//!
//! For each ordered pair (local vault, remote vault) the engine keeps one
//! JSON journal under `.cast/peers/<peer-id>.json`, mapping document
//! identifiers to the digests and outcome of the last agreement. The
//! journal is the sole authority for baseline selection in planning: the
//! planner reads it, only the applier writes it, and every save is atomic.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::model::types::{CastId, Digest, VaultId};

/// Journal format version.
const JOURNAL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// SyncOutcome
// ---------------------------------------------------------------------------

/// The recorded result of the last sync action for an identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The document was first copied to the peer.
    Create,
    /// One side's body overwrote the other.
    Update,
    /// A three-way merge resolved cleanly.
    Merge,
    /// A conflict file was materialized; the baseline was preserved.
    Conflict,
    /// Bodies already agreed.
    Skip,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Merge => write!(f, "merge"),
            Self::Conflict => write!(f, "conflict"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

// ---------------------------------------------------------------------------
// PeerEntry
// ---------------------------------------------------------------------------

/// The last-recorded state for one identifier between an ordered vault
/// pair.
///
/// `source_digest` and `dest_digest` are the body digests of the pair's
/// source and destination sides as of the last recorded sync; the planner
/// compares current body digests against them to decide which side
/// changed. `base_object` names the baseline content the merger resolves
/// against. After a conflict the baseline is left untouched so a
/// recoverable ancestor survives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Body digest of the source side at last sync.
    pub source_digest: Digest,
    /// Body digest of the destination side at last sync.
    pub dest_digest: Digest,
    /// Object-store key of the baseline content, when one was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_object: Option<Digest>,
    /// What the last action was.
    pub last_result: SyncOutcome,
    /// Unix timestamp (seconds) of the last update.
    pub last_timestamp: u64,
}

// ---------------------------------------------------------------------------
// PeerJournal
// ---------------------------------------------------------------------------

/// The journal for one ordered (local, remote) vault pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerJournal {
    /// Format version.
    pub version: u32,
    /// The local vault (the side this journal lives in).
    pub local: VaultId,
    /// The remote peer.
    pub remote: VaultId,
    /// Per-identifier state.
    #[serde(default)]
    pub entries: BTreeMap<CastId, PeerEntry>,
}

impl PeerJournal {
    /// Create an empty journal for a pair.
    #[must_use]
    pub const fn new(local: VaultId, remote: VaultId) -> Self {
        Self {
            version: JOURNAL_VERSION,
            local,
            remote,
            entries: BTreeMap::new(),
        }
    }

    /// Load a journal, or return an empty one if the file does not exist.
    ///
    /// # Errors
    /// Returns [`PeerError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load(path: &Path, local: VaultId, remote: VaultId) -> Result<Self, PeerError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::new(local, remote));
            }
            Err(e) => {
                return Err(PeerError {
                    path: path.to_owned(),
                    detail: format!("cannot read journal: {e}"),
                });
            }
        };
        serde_json::from_str(&text).map_err(|e| PeerError {
            path: path.to_owned(),
            detail: format!("journal is corrupted: {e}"),
        })
    }

    /// Save the journal atomically, creating the parent directory if
    /// needed.
    ///
    /// # Errors
    /// Returns [`PeerError`] on serialization or filesystem failure.
    pub fn save(&self, path: &Path) -> Result<(), PeerError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| PeerError {
                path: path.to_owned(),
                detail: e.to_string(),
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| PeerError {
            path: path.to_owned(),
            detail: e.to_string(),
        })?;
        write_atomic(path, json.as_bytes()).map_err(|e| PeerError {
            path: path.to_owned(),
            detail: e.to_string(),
        })
    }

    /// Look up the entry for an identifier.
    #[must_use]
    pub fn get(&self, id: &CastId) -> Option<&PeerEntry> {
        self.entries.get(id)
    }

    /// Record a new agreement for an identifier. All mutations go through
    /// here.
    pub fn update(&mut self, id: CastId, entry: PeerEntry) {
        self.entries.insert(id, entry);
    }

    /// Remove an identifier's entry (retired by an explicit delete).
    pub fn retire(&mut self, id: &CastId) -> Option<PeerEntry> {
        self.entries.remove(id)
    }

    /// Number of tracked identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no identifier has ever synced for this pair.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PeerError
// ---------------------------------------------------------------------------

/// A journal could not be loaded or saved.
#[derive(Debug)]
pub struct PeerError {
    /// The journal file.
    pub path: PathBuf,
    /// The underlying problem.
    pub detail: String,
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "peer journal error at '{}': {}",
            self.path.display(),
            self.detail
        )
    }
}

impl std::error::Error for PeerError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
