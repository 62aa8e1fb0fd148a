//! Advisory exclusive vault locks.
//!
//! Each vault has one lock file (`.cast/.lock`) held for the duration of
//! any mutating operation. Mutual exclusion uses OS-level file locks
//! (`fs2`), so a crashed holder's lock is released by the kernel and the
//! next acquisition recovers without manual cleanup. Acquisition is
//! bounded by a timeout; the lock file itself persists across runs and
//! carries the current holder's pid for diagnostics.

use std::fmt;
use std::fs;
use std::io::{Seek as _, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fs2::FileExt as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default bound on lock acquisition.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for a held lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// LockInfo
// ---------------------------------------------------------------------------

/// Holder metadata written into the lock file. Purely diagnostic: mutual
/// exclusion is enforced by the OS lock, not by this content.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    acquired_at: u64,
}

// ---------------------------------------------------------------------------
// VaultLock
// ---------------------------------------------------------------------------

/// An exclusive lock on a vault, released on drop.
#[derive(Debug)]
pub struct VaultLock {
    file: fs::File,
    path: PathBuf,
}

impl VaultLock {
    /// Acquire the lock at `path`, waiting up to `timeout`.
    ///
    /// # Errors
    /// Returns [`LockError::Timeout`] when the bound is exceeded and
    /// [`LockError::Io`] on filesystem failure.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let io_err = |e: &std::io::Error| LockError::Io {
            path: path.to_owned(),
            detail: e.to_string(),
        };

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| io_err(&e))?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if start.elapsed() >= timeout {
                        return Err(LockError::Timeout {
                            path: path.to_owned(),
                            holder: read_holder(path),
                        });
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(io_err(&e)),
            }
        }

        // Lock held from here on; record the holder for diagnostics.
        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: unix_now(),
        };
        let json = serde_json::to_string(&info).unwrap_or_default();
        file.set_len(0).map_err(|e| io_err(&e))?;
        file.seek(SeekFrom::Start(0)).map_err(|e| io_err(&e))?;
        file.write_all(json.as_bytes()).map_err(|e| io_err(&e))?;
        let _ = file.sync_all();

        debug!(path = %path.display(), "vault lock acquired");
        Ok(Self {
            file,
            path: path.to_owned(),
        })
    }

    /// Acquire with the default 30-second timeout.
    ///
    /// # Errors
    /// Same as [`VaultLock::acquire`].
    pub fn acquire_default(path: &Path) -> Result<Self, LockError> {
        Self::acquire(path, DEFAULT_TIMEOUT)
    }

    /// Release the lock explicitly. (Dropping the guard releases it too.)
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for VaultLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "vault lock released");
    }
}

fn read_holder(path: &Path) -> Option<u32> {
    let text = fs::read_to_string(path).ok()?;
    let info: LockInfo = serde_json::from_str(&text).ok()?;
    Some(info.pid)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// LockError
// ---------------------------------------------------------------------------

/// Lock acquisition failed.
#[derive(Debug)]
pub enum LockError {
    /// The acquisition timeout was exceeded.
    Timeout {
        /// The lock file path.
        path: PathBuf,
        /// The pid of the current holder, when known.
        holder: Option<u32>,
    },
    /// A filesystem error occurred while locking.
    Io {
        /// The lock file path.
        path: PathBuf,
        /// The underlying error.
        detail: String,
    },
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { path, holder } => {
                write!(f, "timed out waiting for vault lock '{}'", path.display())?;
                if let Some(pid) = holder {
                    write!(f, " (held by pid {pid})")?;
                }
                write!(
                    f,
                    "\n  To fix: wait for the other cast process to finish and retry. A crashed holder's lock is released automatically."
                )
            }
            Self::Io { path, detail } => {
                write!(f, "lock I/O error at '{}': {detail}", path.display())
            }
        }
    }
}

impl std::error::Error for LockError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
