//! Atomic file writes.
//!
//! Every persistent artifact (documents, index, journals, baseline objects)
//! is written with the same contract: write to a sibling temp file in the
//! target directory, fsync, then rename over the target. The rename is the
//! commit point — a crash before it leaves no visible change.

use std::fs;
use std::io::{self, Write as _};
use std::path::Path;

/// Write `bytes` to `path` atomically.
///
/// The temp file is created in `path`'s directory (same filesystem, so the
/// rename is atomic) with restrictive permissions, fsynced, then persisted
/// over the target. The parent directory is fsynced afterwards so the
/// rename itself survives power loss.
///
/// # Errors
/// Returns any I/O error from creating, writing, syncing, or renaming.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    if let Ok(f) = fs::File::open(dir) {
        let _ = f.sync_all();
    }
    Ok(())
}
