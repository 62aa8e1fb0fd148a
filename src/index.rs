//! The vault index: identifier → (path, digests, size, mtime, header
//! summary).
//!
//! The index is rebuilt incrementally: files whose (path, size, mtime)
//! match the prior snapshot reuse their recorded digests, everything else
//! is re-normalized and re-digested on a bounded worker pool (a fixed
//! worker set draining a shared queue — no async machinery). Entries whose
//! path vanished are dropped. Duplicate identifiers are a fatal
//! inconsistency for the vault.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::atomic::write_atomic;
use crate::identity::{self, FixOutcome};
use crate::model::types::{CastId, Digest, Participation, VaultId};
use crate::normalize;
use crate::select::{SelectError, Selector};
use crate::vault::Vault;

/// Index format version.
const INDEX_VERSION: u32 = 1;

/// Upper bound on digest workers.
const MAX_WORKERS: usize = 8;

// ---------------------------------------------------------------------------
// FileStamp
// ---------------------------------------------------------------------------

/// The cheap cache key deciding whether a file must be re-digested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    /// File size in bytes.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime_secs: u64,
    /// Sub-second part of the modification time.
    pub mtime_nanos: u32,
}

impl FileStamp {
    /// Read the stamp of a file on disk.
    ///
    /// # Errors
    /// Returns the underlying I/O error if the file cannot be stat'd.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        let (mtime_secs, mtime_nanos) = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or((0, 0), |d| (d.as_secs(), d.subsec_nanos()));
        Ok(Self {
            size: meta.len(),
            mtime_secs,
            mtime_nanos,
        })
    }
}

// ---------------------------------------------------------------------------
// IndexEntry
// ---------------------------------------------------------------------------

/// One tracked document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The document's stable identifier.
    pub id: CastId,
    /// Forward-slash path relative to the vault root.
    pub path: String,
    /// Size/mtime cache key.
    pub stamp: FileStamp,
    /// SHA-256 over the normalized digest-view content.
    pub full_digest: Digest,
    /// SHA-256 over the normalized body alone.
    pub body_digest: Digest,
    /// The document's vault-participation list.
    #[serde(default)]
    pub vaults: Vec<Participation>,
    /// The document type from `cast-type`, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
}

impl IndexEntry {
    /// The role this document assigns to a vault, if listed.
    #[must_use]
    pub fn role_of(&self, vault: &VaultId) -> Option<crate::model::types::Role> {
        self.vaults
            .iter()
            .find(|p| &p.vault == vault)
            .map(|p| p.role)
    }
}

// ---------------------------------------------------------------------------
// IndexSnapshot
// ---------------------------------------------------------------------------

/// The persisted index: a single JSON document written atomically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Format version.
    pub version: u32,
    /// The vault this index belongs to.
    pub vault: VaultId,
    /// Entries keyed by identifier.
    #[serde(default)]
    pub entries: BTreeMap<CastId, IndexEntry>,
}

impl IndexSnapshot {
    /// Create an empty snapshot for a vault.
    #[must_use]
    pub const fn new(vault: VaultId) -> Self {
        Self {
            version: INDEX_VERSION,
            vault,
            entries: BTreeMap::new(),
        }
    }

    /// Load a snapshot, returning `None` if the file does not exist.
    ///
    /// # Errors
    /// Returns [`IndexError::Corrupted`] if the file exists but cannot be
    /// parsed.
    pub fn load(path: &Path) -> Result<Option<Self>, IndexError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(IndexError::Io {
                    path: path.to_owned(),
                    detail: e.to_string(),
                });
            }
        };
        let snapshot: Self = serde_json::from_str(&text).map_err(|e| IndexError::Corrupted {
            path: path.to_owned(),
            detail: e.to_string(),
        })?;
        Ok(Some(snapshot))
    }

    /// Save the snapshot atomically.
    ///
    /// # Errors
    /// Returns [`IndexError::Io`] on serialization or filesystem failure.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| IndexError::Io {
                path: path.to_owned(),
                detail: e.to_string(),
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| IndexError::Io {
            path: path.to_owned(),
            detail: e.to_string(),
        })?;
        write_atomic(path, json.as_bytes()).map_err(|e| IndexError::Io {
            path: path.to_owned(),
            detail: e.to_string(),
        })
    }

    /// Look up an entry by identifier.
    #[must_use]
    pub fn lookup_by_id(&self, id: &CastId) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    /// Look up an entry by relative path.
    #[must_use]
    pub fn lookup_by_path(&self, rel: &str) -> Option<&IndexEntry> {
        self.entries.values().find(|e| e.path == rel)
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// How to build the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildMode {
    /// Reuse digests for files whose (path, size, mtime) are unchanged.
    Incremental,
    /// Re-digest everything.
    Rebuild,
}

/// A file that was selected but not indexed, with the reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedFile {
    /// Forward-slash relative path.
    pub path: String,
    /// Why the file was skipped.
    pub reason: String,
}

/// The result of an index build.
#[derive(Clone, Debug)]
pub struct BuildReport {
    /// The fresh snapshot (not yet saved).
    pub snapshot: IndexSnapshot,
    /// Files skipped with per-file structural or size reasons.
    pub skipped: Vec<SkippedFile>,
    /// Identifiers injected by the auto-fix pass.
    pub injected: Vec<(CastId, String)>,
    /// How many entries were reused from the prior snapshot.
    pub reused: usize,
    /// How many files were re-digested.
    pub digested: usize,
}

/// Build the vault index.
///
/// When `auto_fix` is set, the identity layer is invoked for header-bearing
/// files lacking an identifier *before* digesting.
///
/// # Errors
/// Returns [`IndexError`] for vault-wide failures: selection errors, a
/// corrupted prior snapshot in incremental mode, or duplicate identifiers.
pub fn build(vault: &Vault, mode: BuildMode, auto_fix: bool) -> Result<BuildReport, IndexError> {
    let config = &vault.config;
    let selector = Selector::new(
        &config.index.include,
        &config.index.exclude,
        config.index.include_hidden,
    )?;
    let selected = selector.select(vault.root())?;

    let prior = match mode {
        BuildMode::Incremental => IndexSnapshot::load(&vault.index_path())?,
        BuildMode::Rebuild => None,
    };
    let prior_by_path: HashMap<&str, &IndexEntry> = prior
        .iter()
        .flat_map(|s| s.entries.values())
        .map(|e| (e.path.as_str(), e))
        .collect();

    let ephemeral = config.ephemeral_keys();
    let mut skipped = Vec::new();
    let mut injected = Vec::new();
    let mut reused: Vec<IndexEntry> = Vec::new();
    let mut jobs: Vec<(String, PathBuf)> = Vec::new();

    for rel in selected {
        let abs = vault.abs(&rel);
        let stamp = match FileStamp::read(&abs) {
            Ok(stamp) => stamp,
            Err(e) => {
                skipped.push(SkippedFile {
                    path: rel,
                    reason: format!("cannot stat: {e}"),
                });
                continue;
            }
        };
        if stamp.size > config.index.max_file_size {
            skipped.push(SkippedFile {
                path: rel,
                reason: format!(
                    "file size {} exceeds index.max_file_size {}",
                    stamp.size, config.index.max_file_size
                ),
            });
            continue;
        }
        if let Some(entry) = prior_by_path.get(rel.as_str())
            && entry.stamp == stamp
        {
            reused.push((*entry).clone());
            continue;
        }

        if auto_fix {
            match identity::fix_file(&abs, &ephemeral) {
                Ok(FixOutcome::Injected(id)) => injected.push((id, rel.clone())),
                Ok(FixOutcome::Reordered(_) | FixOutcome::Unchanged) => {}
                Err(e) => {
                    skipped.push(SkippedFile {
                        path: rel,
                        reason: e.to_string(),
                    });
                    continue;
                }
            }
        }
        jobs.push((rel, abs));
    }

    let digested = jobs.len();
    let reused_count = reused.len();
    let processed = digest_pool(jobs, &ephemeral);

    let mut entries: BTreeMap<CastId, IndexEntry> = BTreeMap::new();
    let mut pairs: Vec<(CastId, String)> = Vec::new();

    for entry in reused {
        pairs.push((entry.id, entry.path.clone()));
        entries.insert(entry.id, entry);
    }
    for (rel, outcome) in processed {
        match outcome {
            Ok(Some(entry)) => {
                pairs.push((entry.id, entry.path.clone()));
                entries.insert(entry.id, entry);
            }
            // Header-bearing files without an identifier stay un-indexed.
            Ok(None) => {}
            Err(reason) => skipped.push(SkippedFile { path: rel, reason }),
        }
    }

    let duplicates = identity::find_duplicates(pairs);
    if let Some((id, paths)) = duplicates.into_iter().next() {
        return Err(IndexError::DuplicateId { id, paths });
    }

    debug!(
        vault = %vault.id(),
        entries = entries.len(),
        digested,
        skipped = skipped.len(),
        "index build complete"
    );

    let mut snapshot = IndexSnapshot::new(vault.id().clone());
    snapshot.entries = entries;
    Ok(BuildReport {
        snapshot,
        skipped,
        injected,
        reused: reused_count,
        digested,
    })
}

/// Run normalization + digesting for the given files on a bounded worker
/// pool. Output order is not significant; the caller re-keys by path.
fn digest_pool(
    jobs: Vec<(String, PathBuf)>,
    ephemeral: &std::collections::BTreeSet<String>,
) -> Vec<(String, Result<Option<IndexEntry>, String>)> {
    if jobs.is_empty() {
        return Vec::new();
    }
    let workers = std::thread::available_parallelism()
        .map_or(1, std::num::NonZero::get)
        .min(MAX_WORKERS)
        .min(jobs.len());

    let queue: Mutex<VecDeque<(String, PathBuf)>> = Mutex::new(jobs.into());
    let results: Mutex<Vec<(String, Result<Option<IndexEntry>, String>)>> =
        Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let job = queue.lock().ok().and_then(|mut q| q.pop_front());
                    let Some((rel, abs)) = job else { break };
                    let outcome = process_file(&rel, &abs, ephemeral);
                    if let Ok(mut out) = results.lock() {
                        out.push((rel, outcome));
                    }
                }
            });
        }
    });

    results.into_inner().unwrap_or_default()
}

fn process_file(
    rel: &str,
    abs: &Path,
    ephemeral: &std::collections::BTreeSet<String>,
) -> Result<Option<IndexEntry>, String> {
    let raw = fs::read(abs).map_err(|e| format!("cannot read: {e}"))?;
    let stamp = FileStamp::read(abs).map_err(|e| format!("cannot stat: {e}"))?;
    let doc = normalize::normalize(&raw, ephemeral).map_err(|e| e.to_string())?;

    let Some(header) = &doc.header else {
        return Ok(None);
    };
    let Some(id) = header.id().map_err(|e| e.to_string())? else {
        return Ok(None);
    };
    let vaults = header.participants().map_err(|e| e.to_string())?;

    Ok(Some(IndexEntry {
        id,
        path: rel.to_owned(),
        stamp,
        full_digest: doc.full_digest,
        body_digest: doc.body_digest,
        vaults,
        doc_type: header.doc_type(),
    }))
}

// ---------------------------------------------------------------------------
// IndexError
// ---------------------------------------------------------------------------

/// A vault-wide index failure.
#[derive(Debug)]
pub enum IndexError {
    /// File selection failed.
    Select(SelectError),
    /// Two files share an identifier — fatal for the vault.
    DuplicateId {
        /// The shared identifier.
        id: CastId,
        /// All paths carrying it.
        paths: Vec<String>,
    },
    /// The persisted snapshot exists but cannot be parsed.
    Corrupted {
        /// The snapshot file.
        path: PathBuf,
        /// Parse error detail.
        detail: String,
    },
    /// A filesystem failure outside per-file handling.
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        detail: String,
    },
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select(e) => fmt::Display::fmt(e, f),
            Self::DuplicateId { id, paths } => {
                write!(
                    f,
                    "duplicate document id {id} in {} files:",
                    paths.len()
                )?;
                for path in paths {
                    write!(f, "\n  - {path}")?;
                }
                write!(
                    f,
                    "\n  To fix: remove the cast-id line from all but one file and re-run the index."
                )
            }
            Self::Corrupted { path, detail } => {
                write!(
                    f,
                    "index file '{}' is corrupted: {detail}\n  To fix: rebuild the index:\n    cast index <vault> --rebuild",
                    path.display()
                )
            }
            Self::Io { path, detail } => {
                write!(f, "index I/O error at '{}': {detail}", path.display())
            }
        }
    }
}

impl std::error::Error for IndexError {}

impl From<SelectError> for IndexError {
    fn from(e: SelectError) -> Self {
        Self::Select(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
