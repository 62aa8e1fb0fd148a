//! The sync planner.
//!
//! Given a source index, a destination index, and the peer journal for the
//! pair, the planner classifies every identifier in the union of the two
//! indices into exactly one action. It is a pure function of its inputs
//! (indices, journal, and baseline presence in the object store): repeated
//! invocations yield identical action lists, and the emitted order is
//! stable — sorted by destination relative path with the identifier as
//! tie-breaker.

use std::collections::BTreeSet;
use std::fmt;

use crate::index::{IndexEntry, IndexSnapshot};
use crate::model::types::{CastId, Role, VaultId};
use crate::peer::PeerJournal;
use crate::store::ObjectStore;

// ---------------------------------------------------------------------------
// SyncMode
// ---------------------------------------------------------------------------

/// How a document pair synchronizes, implied by its participation roles
/// unless the operator forces mirror.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMode {
    /// Source is authoritative (`cast` → `sync`); destination edits are
    /// overwritten.
    Broadcast,
    /// Full two-way peering (`sync` ↔ `sync`).
    Bidirectional,
    /// Operator-forced overpower: destination becomes a copy of source.
    Mirror,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcast => write!(f, "broadcast"),
            Self::Bidirectional => write!(f, "bidirectional"),
            Self::Mirror => write!(f, "mirror"),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionKind + PlanReason
// ---------------------------------------------------------------------------

/// The planned action for one identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    /// Copy the document to the destination for the first time.
    Create,
    /// Overwrite the destination body with the source body.
    Update,
    /// No filesystem change.
    Skip,
    /// Three-way merge of both sides against the baseline.
    Merge,
    /// Materialize a conflict file without touching the destination.
    Conflict,
    /// Remove the destination document (mirror mode only, if configured).
    Delete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Skip => write!(f, "skip"),
            Self::Merge => write!(f, "merge"),
            Self::Conflict => write!(f, "conflict"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Why the planner chose an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanReason {
    /// The identifier exists only in the source.
    NewDocument,
    /// Body digests already agree.
    BodiesEqual,
    /// Both sides differ and no baseline was ever recorded.
    NoBaseline,
    /// A baseline digest is recorded but the object is absent; degraded to
    /// conflict rather than risking silent data loss.
    MissingBaseline,
    /// Only the source changed relative to the baseline.
    SourceChanged,
    /// Only the destination changed relative to the baseline.
    DestChanged,
    /// Both sides changed relative to the baseline.
    BothChanged,
    /// Neither side moved since the last recorded merge or conflict.
    Unchanged,
    /// Mirror mode removes documents absent from the source.
    SourceAbsent,
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewDocument => write!(f, "new document"),
            Self::BodiesEqual => write!(f, "bodies equal"),
            Self::NoBaseline => write!(f, "no baseline"),
            Self::MissingBaseline => write!(f, "baseline object missing"),
            Self::SourceChanged => write!(f, "source changed"),
            Self::DestChanged => write!(f, "destination changed"),
            Self::BothChanged => write!(f, "both changed"),
            Self::Unchanged => write!(f, "no new changes"),
            Self::SourceAbsent => write!(f, "absent from source"),
        }
    }
}

// ---------------------------------------------------------------------------
// PlannedAction + Plan
// ---------------------------------------------------------------------------

/// One classified identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedAction {
    /// The document identifier.
    pub id: CastId,
    /// The action to take.
    pub kind: ActionKind,
    /// Destination-relative path the action targets (the destination's
    /// existing path when present, else the source path).
    pub path: String,
    /// Why this action was chosen.
    pub reason: PlanReason,
    /// The mode that governed classification.
    pub mode: SyncMode,
}

/// An ordered action list plus planner bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    /// Actions in stable order.
    pub actions: Vec<PlannedAction>,
    /// Identifiers elided because their participation list does not cover
    /// both vaults (or pairs the role table does not define).
    pub ineligible: Vec<CastId>,
}

impl Plan {
    /// Count actions of a given kind.
    #[must_use]
    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    /// Returns `true` if every action is a skip.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.actions.iter().all(|a| a.kind == ActionKind::Skip)
    }
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

/// Planner options.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlanOptions {
    /// Operator-forced mirror mode.
    pub force_mirror: bool,
    /// Allow mirror mode to delete destination documents absent from the
    /// source (from the destination's `sync.allow_delete`).
    pub allow_delete: bool,
}

/// Classify every identifier in the union of the two indices.
///
/// `journal` is the destination-side journal for the (source, destination)
/// pair; `store` is the destination's object store, consulted only for
/// baseline presence.
#[must_use]
pub fn plan(
    src: &IndexSnapshot,
    dst: &IndexSnapshot,
    journal: &PeerJournal,
    store: &ObjectStore,
    options: PlanOptions,
) -> Plan {
    let src_vault = &src.vault;
    let dst_vault = &dst.vault;

    let ids: BTreeSet<CastId> = src.entries.keys().chain(dst.entries.keys()).copied().collect();

    let mut actions = Vec::new();
    let mut ineligible = Vec::new();

    for id in ids {
        let src_entry = src.lookup_by_id(&id);
        let dst_entry = dst.lookup_by_id(&id);
        let governing = src_entry.or(dst_entry);
        let Some(governing) = governing else { continue };

        let Some(mode) = mode_for(governing, src_vault, dst_vault, options.force_mirror) else {
            ineligible.push(id);
            continue;
        };

        let path = dst_entry
            .or(src_entry)
            .map(|e| e.path.clone())
            .unwrap_or_default();

        let classified = match (src_entry, dst_entry) {
            (Some(_), None) => Some((ActionKind::Create, PlanReason::NewDocument)),
            (None, Some(_)) => {
                if mode == SyncMode::Mirror && options.allow_delete {
                    Some((ActionKind::Delete, PlanReason::SourceAbsent))
                } else {
                    None
                }
            }
            (Some(s), Some(d)) => Some(classify_pair(s, d, &id, journal, store, mode)),
            (None, None) => None,
        };

        if let Some((kind, reason)) = classified {
            actions.push(PlannedAction {
                id,
                kind,
                path,
                reason,
                mode,
            });
        }
    }

    actions.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));
    ineligible.sort();
    Plan { actions, ineligible }
}

/// Determine the sync mode for one document, or `None` when the pair is
/// ineligible: the participation list must cover both vaults, and the role
/// combination must be one the table defines.
fn mode_for(
    entry: &IndexEntry,
    src_vault: &VaultId,
    dst_vault: &VaultId,
    force_mirror: bool,
) -> Option<SyncMode> {
    let src_role = entry.role_of(src_vault)?;
    let dst_role = entry.role_of(dst_vault)?;
    if force_mirror {
        return Some(SyncMode::Mirror);
    }
    match (src_role, dst_role) {
        (Role::Cast, Role::Sync) => Some(SyncMode::Broadcast),
        (Role::Sync, Role::Sync) => Some(SyncMode::Bidirectional),
        // Pushing into a `cast` destination is undefined; elide.
        (_, Role::Cast) => None,
    }
}

fn classify_pair(
    src: &IndexEntry,
    dst: &IndexEntry,
    id: &CastId,
    journal: &PeerJournal,
    store: &ObjectStore,
    mode: SyncMode,
) -> (ActionKind, PlanReason) {
    if src.body_digest == dst.body_digest {
        return (ActionKind::Skip, PlanReason::BodiesEqual);
    }

    let Some(entry) = journal.get(id) else {
        // Sides differ and have never agreed.
        return match mode {
            SyncMode::Broadcast | SyncMode::Mirror => {
                (ActionKind::Update, PlanReason::NoBaseline)
            }
            SyncMode::Bidirectional => (ActionKind::Conflict, PlanReason::NoBaseline),
        };
    };

    let src_changed = src.body_digest != entry.source_digest;
    let dst_changed = dst.body_digest != entry.dest_digest;

    match (src_changed, dst_changed) {
        (true, false) => (ActionKind::Update, PlanReason::SourceChanged),
        (false, true) => match mode {
            SyncMode::Broadcast | SyncMode::Bidirectional => {
                (ActionKind::Skip, PlanReason::DestChanged)
            }
            SyncMode::Mirror => (ActionKind::Update, PlanReason::DestChanged),
        },
        (true, true) => match mode {
            SyncMode::Broadcast | SyncMode::Mirror => {
                (ActionKind::Update, PlanReason::BothChanged)
            }
            SyncMode::Bidirectional => match &entry.base_object {
                None => (ActionKind::Conflict, PlanReason::NoBaseline),
                Some(base) if !store.has(base) => {
                    // Recorded but absent: degrade rather than risk silent
                    // data loss.
                    (ActionKind::Conflict, PlanReason::MissingBaseline)
                }
                Some(_) => (ActionKind::Merge, PlanReason::BothChanged),
            },
        },
        // Bodies differ but both sides already match the journal: a merge
        // or conflict was recorded and neither side has moved since.
        (false, false) => match mode {
            SyncMode::Broadcast | SyncMode::Bidirectional => {
                (ActionKind::Skip, PlanReason::Unchanged)
            }
            SyncMode::Mirror => (ActionKind::Update, PlanReason::Unchanged),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
