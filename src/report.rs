//! The run report.
//!
//! The applier never aborts once its transaction has begun: per-action
//! failures are recorded here and the run keeps going so a single broken
//! file cannot block a large sync. The finished report drives the engine
//! exit code.

use std::fmt;

use crate::error::{EXIT_CONFLICTS, EXIT_FILESYSTEM, EXIT_SUCCESS};
use crate::index::SkippedFile;
use crate::model::types::{CastId, VaultId};
use crate::plan::ActionKind;

// ---------------------------------------------------------------------------
// ActionOutcome + ActionRecord
// ---------------------------------------------------------------------------

/// What happened to one planned action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Dry run: the action was planned but not executed.
    Planned,
    /// The action completed.
    Applied,
    /// Nothing to do.
    Skipped,
    /// Unresolved hunks were materialized into a sibling conflict file.
    ConflictWritten {
        /// Destination-relative path of the conflict file.
        conflict_path: String,
    },
    /// The action failed; other actions proceeded.
    Failed {
        /// Why it failed.
        detail: String,
    },
}

/// One action's record in the report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRecord {
    /// The document identifier.
    pub id: CastId,
    /// The destination-relative path the action targeted.
    pub path: String,
    /// The planned action.
    pub kind: ActionKind,
    /// What happened.
    pub outcome: ActionOutcome,
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// The collected outcome of one sync run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// The source vault.
    pub source: VaultId,
    /// The destination vault.
    pub dest: VaultId,
    /// Per-action records in plan order.
    pub records: Vec<ActionRecord>,
    /// Noteworthy events (e.g. path collisions).
    pub events: Vec<String>,
    /// Source-side files skipped during indexing.
    pub source_skipped: Vec<SkippedFile>,
    /// Destination-side files skipped during indexing.
    pub dest_skipped: Vec<SkippedFile>,
    /// Identifiers elided as ineligible for this pair.
    pub ineligible: usize,
    /// Whether the run was cancelled at an action boundary.
    pub cancelled: bool,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

impl RunReport {
    /// Create an empty report for a pair.
    #[must_use]
    pub const fn new(source: VaultId, dest: VaultId) -> Self {
        Self {
            source,
            dest,
            records: Vec::new(),
            events: Vec::new(),
            source_skipped: Vec::new(),
            dest_skipped: Vec::new(),
            ineligible: 0,
            cancelled: false,
            dry_run: false,
        }
    }

    /// Count records whose planned kind matches.
    #[must_use]
    pub fn count_kind(&self, kind: ActionKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }

    /// Number of materialized conflict files.
    #[must_use]
    pub fn conflicts(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, ActionOutcome::ConflictWritten { .. }))
            .count()
    }

    /// Number of failed actions.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, ActionOutcome::Failed { .. }))
            .count()
    }

    /// The engine exit code this run should surface.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.failures() > 0 {
            EXIT_FILESYSTEM
        } else if self.conflicts() > 0 {
            EXIT_CONFLICTS
        } else {
            EXIT_SUCCESS
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "would sync" } else { "synced" };
        writeln!(f, "{} {} -> {}", verb, self.source, self.dest)?;
        for record in &self.records {
            let outcome = match &record.outcome {
                ActionOutcome::Planned => String::new(),
                ActionOutcome::Applied => " (done)".to_owned(),
                ActionOutcome::Skipped => String::new(),
                ActionOutcome::ConflictWritten { conflict_path } => {
                    format!(" -> {conflict_path}")
                }
                ActionOutcome::Failed { detail } => format!(" FAILED: {detail}"),
            };
            writeln!(f, "  {:<8} {}{outcome}", record.kind.to_string(), record.path)?;
        }
        for event in &self.events {
            writeln!(f, "  note: {event}")?;
        }
        for skipped in self.source_skipped.iter().chain(&self.dest_skipped) {
            writeln!(f, "  skipped {}: {}", skipped.path, skipped.reason)?;
        }
        if self.ineligible > 0 {
            writeln!(f, "  {} document(s) not eligible for this pair", self.ineligible)?;
        }
        if self.cancelled {
            writeln!(f, "  cancelled before completion")?;
        }
        write!(
            f,
            "{} action(s), {} conflict(s), {} failure(s)",
            self.records.len(),
            self.conflicts(),
            self.failures()
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
