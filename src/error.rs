//! Unified error type for engine operations.
//!
//! Per-file problems (encoding, malformed headers, oversized files) are
//! collected into the run report and never abort a run; [`CastError`]
//! covers the vault-wide failures that do. Each variant maps onto one of
//! the engine exit codes surfaced to the CLI.

use std::fmt;
use std::path::PathBuf;

use crate::config::ConfigError;
use crate::index::IndexError;
use crate::lock::LockError;
use crate::peer::PeerError;
use crate::store::StoreError;

/// Exit code: success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code: configuration error.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code: unresolved conflicts remain.
pub const EXIT_CONFLICTS: i32 = 3;
/// Exit code: filesystem or data error.
pub const EXIT_FILESYSTEM: i32 = 4;
/// Exit code: lock timeout.
pub const EXIT_LOCK: i32 = 5;

// ---------------------------------------------------------------------------
// CastError
// ---------------------------------------------------------------------------

/// A vault-wide failure that aborts the current run.
#[derive(Debug)]
pub enum CastError {
    /// Configuration is missing, malformed, or incompatible.
    Config(ConfigError),
    /// Index build or persistence failed (including duplicate ids and
    /// corrupted snapshots).
    Index(IndexError),
    /// The vault lock could not be acquired.
    Lock(LockError),
    /// A peer journal could not be loaded or saved.
    Peer(PeerError),
    /// The object store failed.
    Store(StoreError),
    /// A filesystem failure outside the other categories.
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        detail: String,
    },
}

impl CastError {
    /// The engine exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => EXIT_CONFIG,
            Self::Lock(_) => EXIT_LOCK,
            Self::Index(_) | Self::Peer(_) | Self::Store(_) | Self::Io { .. } => EXIT_FILESYSTEM,
        }
    }
}

impl fmt::Display for CastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => fmt::Display::fmt(e, f),
            Self::Index(e) => fmt::Display::fmt(e, f),
            Self::Lock(e) => fmt::Display::fmt(e, f),
            Self::Peer(e) => fmt::Display::fmt(e, f),
            Self::Store(e) => fmt::Display::fmt(e, f),
            Self::Io { path, detail } => {
                write!(f, "I/O error at '{}': {detail}", path.display())
            }
        }
    }
}

impl std::error::Error for CastError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Index(e) => Some(e),
            Self::Lock(e) => Some(e),
            Self::Peer(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Io { .. } => None,
        }
    }
}

impl From<ConfigError> for CastError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<IndexError> for CastError {
    fn from(e: IndexError) -> Self {
        Self::Index(e)
    }
}

impl From<LockError> for CastError {
    fn from(e: LockError) -> Self {
        Self::Lock(e)
    }
}

impl From<PeerError> for CastError {
    fn from(e: PeerError) -> Self {
        Self::Peer(e)
    }
}

impl From<StoreError> for CastError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
