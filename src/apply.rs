//! The applier: executes a planned action list against a destination vault.
//!
//! The whole apply runs under the destination's exclusive lock with the
//! source index frozen. Actions execute in plan order; each identifier is
//! touched at most once per run. Every content write is atomic
//! (temp + fsync + rename), so a crash at any point leaves either the
//! pre-state or the post-state of a path, never a partial write. A failed
//! action is recorded and the run continues; the index and peer journals
//! are persisted at the end and reflect exactly the completed actions.
//! Cancellation takes effect at action boundaries only.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::atomic::write_atomic;
use crate::config::LineEndings;
use crate::conflict::{conflict_rel_path, interleave_bodies, stamp_conflict};
use crate::error::CastError;
use crate::header::{self, HeaderBlock, ID_KEY, RESERVED_KEYS};
use crate::index::{self, BuildMode, FileStamp, IndexEntry, IndexSnapshot};
use crate::lock::{DEFAULT_TIMEOUT, VaultLock};
use crate::merge;
use crate::model::types::{CastId, Digest};
use crate::normalize::{self, NormalizedDoc};
use crate::peer::{PeerEntry, PeerJournal, SyncOutcome};
use crate::plan::{self, ActionKind, PlanOptions, PlanReason, PlannedAction};
use crate::report::{ActionOutcome, ActionRecord, RunReport};
use crate::store::ObjectStore;
use crate::vault::Vault;

// ---------------------------------------------------------------------------
// SyncOptions
// ---------------------------------------------------------------------------

/// Options for a sync run.
#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Force mirror mode (operator overpower).
    pub mirror: bool,
    /// Plan only; apply nothing.
    pub dry_run: bool,
    /// Inject missing identifiers while indexing.
    pub auto_fix: bool,
    /// Bound on lock acquisition.
    pub lock_timeout: Duration,
    /// Cooperative cancellation flag, honored at action boundaries.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mirror: false,
            dry_run: false,
            auto_fix: true,
            lock_timeout: DEFAULT_TIMEOUT,
            cancel: None,
        }
    }
}

impl SyncOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

// ---------------------------------------------------------------------------
// sync_vaults
// ---------------------------------------------------------------------------

/// Sync `source_root` into `dest_root`: index both vaults, plan, and apply.
///
/// # Errors
/// Returns [`CastError`] for vault-wide failures (configuration, locking,
/// index build, journal persistence). Per-action failures are recorded in
/// the returned report instead.
pub fn sync_vaults(
    source_root: &Path,
    dest_root: &Path,
    options: &SyncOptions,
) -> Result<RunReport, CastError> {
    let source = Vault::open(source_root)?;
    let dest = Vault::open(dest_root)?;
    if source.id() == dest.id() {
        return Err(CastError::Config(crate::config::ConfigError {
            path: None,
            message: format!(
                "source and destination vaults share the id '{}'; refusing to sync a vault with itself",
                source.id()
            ),
        }));
    }

    // Source side: indexing with auto-fix mutates files, so it takes the
    // source lock for the duration of the build. Without auto-fix the
    // source is read-only and needs no lock.
    let src_build = if options.auto_fix {
        let lock = VaultLock::acquire(&source.lock_path(), options.lock_timeout)?;
        let build = index::build(&source, BuildMode::Incremental, true)?;
        build.snapshot.save(&source.index_path())?;
        lock.release();
        build
    } else {
        index::build(&source, BuildMode::Incremental, false)?
    };

    // Destination side: hold the lock from indexing through the last
    // journal write.
    let lock = VaultLock::acquire(&dest.lock_path(), options.lock_timeout)?;
    let dst_build = index::build(&dest, BuildMode::Incremental, options.auto_fix)?;

    let dst_store = ObjectStore::new(dest.objects_dir());
    let src_store = ObjectStore::new(source.objects_dir());
    let dst_journal = PeerJournal::load(
        &dest.peer_journal_path(source.id()),
        dest.id().clone(),
        source.id().clone(),
    )?;
    let src_journal = PeerJournal::load(
        &source.peer_journal_path(dest.id()),
        source.id().clone(),
        dest.id().clone(),
    )?;

    let plan = plan::plan(
        &src_build.snapshot,
        &dst_build.snapshot,
        &dst_journal,
        &dst_store,
        PlanOptions {
            force_mirror: options.mirror,
            allow_delete: dest.config.sync.allow_delete,
        },
    );

    let mut report = RunReport::new(source.id().clone(), dest.id().clone());
    report.source_skipped = src_build.skipped;
    report.dest_skipped = dst_build.skipped;
    report.ineligible = plan.ineligible.len();
    report.dry_run = options.dry_run;

    if options.dry_run {
        for action in &plan.actions {
            report.records.push(ActionRecord {
                id: action.id,
                path: action.path.clone(),
                kind: action.kind,
                outcome: ActionOutcome::Planned,
            });
        }
        return Ok(report);
    }

    let ephemeral = dest.config.ephemeral_keys();
    let line_endings = dest.config.advanced.line_endings;
    let now = chrono::Utc::now();
    let mut run = SyncRun {
        source: &source,
        dest: &dest,
        src_index: &src_build.snapshot,
        dst_index: dst_build.snapshot,
        src_journal,
        dst_journal,
        src_store,
        dst_store,
        ephemeral,
        line_endings,
        now_secs: u64::try_from(now.timestamp()).unwrap_or_default(),
        stamp: now.format("%Y%m%d%H%M%S").to_string(),
        report,
    };

    for action in &plan.actions {
        if options.is_cancelled() {
            run.report.cancelled = true;
            break;
        }
        run.apply(action);
    }

    // Persist the transaction's outcome: index first, then both journals.
    run.dst_index.save(&dest.index_path())?;
    run.dst_journal.save(&dest.peer_journal_path(source.id()))?;
    run.src_journal.save(&source.peer_journal_path(dest.id()))?;
    lock.release();

    Ok(run.report)
}

// ---------------------------------------------------------------------------
// SyncRun
// ---------------------------------------------------------------------------

struct SyncRun<'a> {
    source: &'a Vault,
    dest: &'a Vault,
    src_index: &'a IndexSnapshot,
    dst_index: IndexSnapshot,
    src_journal: PeerJournal,
    dst_journal: PeerJournal,
    src_store: ObjectStore,
    dst_store: ObjectStore,
    ephemeral: BTreeSet<String>,
    line_endings: LineEndings,
    now_secs: u64,
    stamp: String,
    report: RunReport,
}

impl SyncRun<'_> {
    fn apply(&mut self, action: &PlannedAction) {
        debug!(id = %action.id, kind = %action.kind, path = %action.path, "applying");
        let result = match action.kind {
            ActionKind::Create => self.do_create(action),
            ActionKind::Update => self.do_update(action),
            ActionKind::Skip => self.do_skip(action),
            ActionKind::Merge => self.do_merge(action),
            ActionKind::Conflict => self.do_conflict(action),
            ActionKind::Delete => self.do_delete(action),
        };
        let (outcome, path) = match result {
            Ok(pair) => pair,
            Err(detail) => {
                warn!(id = %action.id, path = %action.path, detail, "action failed");
                (ActionOutcome::Failed { detail }, action.path.clone())
            }
        };
        self.report.records.push(ActionRecord {
            id: action.id,
            path,
            kind: action.kind,
            outcome,
        });
    }

    // -- actions ------------------------------------------------------------

    fn do_create(&mut self, action: &PlannedAction) -> Result<(ActionOutcome, String), String> {
        let src_entry = self.source_entry(action)?;
        let src_doc = self.read_doc(self.source, &src_entry.path)?;

        // Identifier-routed fields from the source; local keys absent.
        let mut header = HeaderBlock::new();
        if let Some(src_header) = &src_doc.header {
            for key in RESERVED_KEYS {
                if let Some(value) = src_header.get(key) {
                    header.set(key, value.clone());
                }
            }
        }
        header.ensure_first(ID_KEY);

        let mut rel = action.path.clone();
        if self.dest.abs(&rel).exists() {
            let renamed = collision_path(&rel, &action.id);
            self.report.events.push(format!(
                "path collision: '{rel}' already exists with a different identity; incoming file written as '{renamed}'"
            ));
            rel = renamed;
        }

        let content = header::assemble(Some(&header), &src_doc.body);
        self.write_doc(&rel, &content)?;
        let (base, body_digest) = self.put_baseline_both(&content)?;
        self.index_written(action.id, &rel, &content)?;
        self.record_both(action.id, body_digest.clone(), body_digest, Some(base), SyncOutcome::Create);
        Ok((ActionOutcome::Applied, rel))
    }

    fn do_update(&mut self, action: &PlannedAction) -> Result<(ActionOutcome, String), String> {
        let src_entry = self.source_entry(action)?;
        let src_doc = self.read_doc(self.source, &src_entry.path)?;
        let dst_doc = self.read_doc(self.dest, &action.path)?;

        // Source body plus merged header: reserved keys from the source,
        // everything else stays local.
        let merged_header = merge::header::merge_headers(
            src_doc.header.as_ref(),
            dst_doc.header.as_ref(),
            &self.ephemeral,
        );
        let content = header::assemble(Some(&merged_header), &src_doc.body);
        self.write_doc(&action.path, &content)?;
        let (base, body_digest) = self.put_baseline_both(&content)?;
        self.index_written(action.id, &action.path, &content)?;
        self.record_both(action.id, body_digest.clone(), body_digest, Some(base), SyncOutcome::Update);
        Ok((ActionOutcome::Applied, action.path.clone()))
    }

    fn do_skip(&mut self, action: &PlannedAction) -> Result<(ActionOutcome, String), String> {
        // Bodies agree: seed the baseline if none was ever recorded so a
        // later divergence merges instead of conflicting.
        if action.reason == PlanReason::BodiesEqual
            && self
                .dst_journal
                .get(&action.id)
                .is_none_or(|e| e.base_object.is_none())
        {
            let dst_doc = self.read_doc(self.dest, &action.path)?;
            let (base, body_digest) = self.put_baseline_both(&dst_doc.content)?;
            self.record_both(action.id, body_digest.clone(), body_digest, Some(base), SyncOutcome::Skip);
        }
        Ok((ActionOutcome::Skipped, action.path.clone()))
    }

    fn do_merge(&mut self, action: &PlannedAction) -> Result<(ActionOutcome, String), String> {
        let entry = self
            .dst_journal
            .get(&action.id)
            .cloned()
            .ok_or("journal entry vanished since planning")?;
        let base_object = entry
            .base_object
            .clone()
            .ok_or("baseline digest missing from journal entry")?;
        let base_bytes = self
            .dst_store
            .get(&base_object)
            .map_err(|e| e.to_string())?;
        let Some(base_bytes) = base_bytes else {
            // The object vanished between planning and applying; fall back
            // to a whole-body conflict rather than losing either side.
            return self.do_conflict(action);
        };

        let base_doc = self.normalize_bytes(&base_bytes)?;
        let src_entry = self.source_entry(action)?;
        let src_doc = self.read_doc(self.source, &src_entry.path)?;
        let dst_doc = self.read_doc(self.dest, &action.path)?;

        let outcome = merge::merge(
            &base_doc,
            &src_doc,
            &dst_doc,
            self.source.id(),
            self.dest.id(),
            &self.ephemeral,
        );

        if outcome.is_clean() {
            self.write_doc(&action.path, &outcome.content)?;
            let merged = self.normalize_bytes(outcome.content.as_bytes())?;
            let base = self
                .dst_store
                .put(merged.content.as_bytes())
                .map_err(|e| e.to_string())?;
            self.index_written(action.id, &action.path, &outcome.content)?;
            self.dst_journal.update(
                action.id,
                PeerEntry {
                    source_digest: src_doc.body_digest,
                    dest_digest: merged.body_digest,
                    base_object: Some(base),
                    last_result: SyncOutcome::Merge,
                    last_timestamp: self.now_secs,
                },
            );
            return Ok((ActionOutcome::Applied, action.path.clone()));
        }

        // Unresolved hunks: materialize a sibling conflict file and leave
        // the destination untouched; the baseline stays as a recoverable
        // ancestor.
        let conflict_rel = conflict_rel_path(&action.path, &self.stamp);
        let stamped = stamp_conflict(&outcome.content, self.source.id(), &self.stamp);
        self.write_doc(&conflict_rel, &stamped)?;
        self.dst_journal.update(
            action.id,
            PeerEntry {
                source_digest: src_doc.body_digest,
                dest_digest: dst_doc.body_digest,
                base_object: entry.base_object,
                last_result: SyncOutcome::Conflict,
                last_timestamp: self.now_secs,
            },
        );
        Ok((
            ActionOutcome::ConflictWritten {
                conflict_path: conflict_rel,
            },
            action.path.clone(),
        ))
    }

    fn do_conflict(&mut self, action: &PlannedAction) -> Result<(ActionOutcome, String), String> {
        let src_entry = self.source_entry(action)?;
        let src_doc = self.read_doc(self.source, &src_entry.path)?;
        let dst_doc = self.read_doc(self.dest, &action.path)?;

        let merged_header = merge::header::merge_headers(
            src_doc.header.as_ref(),
            dst_doc.header.as_ref(),
            &self.ephemeral,
        );
        let content = interleave_bodies(
            &merged_header,
            &src_doc,
            &dst_doc,
            self.source.id(),
            self.dest.id(),
        );
        let conflict_rel = conflict_rel_path(&action.path, &self.stamp);
        let stamped = stamp_conflict(&content, self.source.id(), &self.stamp);
        self.write_doc(&conflict_rel, &stamped)?;

        let prior_base = self
            .dst_journal
            .get(&action.id)
            .and_then(|e| e.base_object.clone());
        self.dst_journal.update(
            action.id,
            PeerEntry {
                source_digest: src_doc.body_digest,
                dest_digest: dst_doc.body_digest,
                base_object: prior_base,
                last_result: SyncOutcome::Conflict,
                last_timestamp: self.now_secs,
            },
        );
        Ok((
            ActionOutcome::ConflictWritten {
                conflict_path: conflict_rel,
            },
            action.path.clone(),
        ))
    }

    fn do_delete(&mut self, action: &PlannedAction) -> Result<(ActionOutcome, String), String> {
        match fs::remove_file(self.dest.abs(&action.path)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(format!("cannot remove '{}': {e}", action.path)),
        }
        self.dst_index.entries.remove(&action.id);
        self.dst_journal.retire(&action.id);
        self.src_journal.retire(&action.id);
        Ok((ActionOutcome::Applied, action.path.clone()))
    }

    // -- helpers ------------------------------------------------------------

    fn source_entry(&self, action: &PlannedAction) -> Result<IndexEntry, String> {
        self.src_index
            .lookup_by_id(&action.id)
            .cloned()
            .ok_or_else(|| "source entry vanished since planning".to_owned())
    }

    fn read_doc(&self, vault: &Vault, rel: &str) -> Result<NormalizedDoc, String> {
        let raw = fs::read(vault.abs(rel)).map_err(|e| format!("cannot read '{rel}': {e}"))?;
        self.normalize_bytes(&raw)
    }

    fn normalize_bytes(&self, raw: &[u8]) -> Result<NormalizedDoc, String> {
        normalize::normalize(raw, &self.ephemeral).map_err(|e| e.to_string())
    }

    fn write_doc(&self, rel: &str, content: &str) -> Result<(), String> {
        let abs = self.dest.abs(rel);
        if let Some(dir) = abs.parent() {
            fs::create_dir_all(dir).map_err(|e| format!("cannot create '{}': {e}", dir.display()))?;
        }
        let text = self.line_endings.apply(content);
        write_atomic(&abs, text.as_bytes()).map_err(|e| format!("cannot write '{rel}': {e}"))
    }

    /// Store the normalized form of `content` as a baseline in both vaults'
    /// object stores, returning the store key and the body digest.
    fn put_baseline_both(&self, content: &str) -> Result<(Digest, Digest), String> {
        let doc = self.normalize_bytes(content.as_bytes())?;
        let base = self
            .dst_store
            .put(doc.content.as_bytes())
            .map_err(|e| e.to_string())?;
        self.src_store
            .put(doc.content.as_bytes())
            .map_err(|e| e.to_string())?;
        Ok((base, doc.body_digest))
    }

    fn index_written(&mut self, id: CastId, rel: &str, content: &str) -> Result<(), String> {
        let doc = self.normalize_bytes(content.as_bytes())?;
        let stamp = FileStamp::read(&self.dest.abs(rel)).map_err(|e| e.to_string())?;
        let header = doc.header.as_ref();
        self.dst_index.entries.insert(
            id,
            IndexEntry {
                id,
                path: rel.to_owned(),
                stamp,
                full_digest: doc.full_digest,
                body_digest: doc.body_digest,
                vaults: header
                    .map(|h| h.participants().map_err(|e| e.to_string()))
                    .transpose()?
                    .unwrap_or_default(),
                doc_type: header.and_then(|h| h.doc_type()),
            },
        );
        Ok(())
    }

    /// Record an agreement with equal digests in both side's journals.
    fn record_both(
        &mut self,
        id: CastId,
        source_digest: Digest,
        dest_digest: Digest,
        base: Option<Digest>,
        result: SyncOutcome,
    ) {
        let entry = PeerEntry {
            source_digest,
            dest_digest,
            base_object: base,
            last_result: result,
            last_timestamp: self.now_secs,
        };
        self.dst_journal.update(id, entry.clone());
        self.src_journal.update(id, entry);
    }
}

/// Rename an incoming file whose destination path is occupied by a
/// different identity: `note.md` → `note-1a2b3c4d.md`.
fn collision_path(rel: &str, id: &CastId) -> String {
    let short = id.short();
    match rel.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !stem.ends_with('/') => {
            format!("{stem}-{short}.{ext}")
        }
        _ => format!("{rel}-{short}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
