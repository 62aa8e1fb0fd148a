//! Vault layout: a directory root plus its `.cast/` state directory.
//!
//! ```text
//! <vault>/
//!   .cast/
//!     config.yaml            include/exclude patterns, ephemeral keys, vault id
//!     index.json             identifier → entry, atomic single file
//!     objects/<sha256>       write-once baselines
//!     peers/<peer-id>.json   per-peer journal
//!     .lock                  advisory exclusive lock
//! ```

use std::path::{Path, PathBuf};

use crate::config::{ConfigError, VaultConfig};
use crate::model::types::VaultId;

/// The vault state directory name.
pub const STATE_DIR: &str = ".cast";

/// An opened vault: a directory root with validated configuration.
#[derive(Clone, Debug)]
pub struct Vault {
    root: PathBuf,
    /// The vault's parsed configuration.
    pub config: VaultConfig,
}

impl Vault {
    /// Open a vault at `root`, loading and validating `.cast/config.yaml`
    /// (including the protocol-version gate).
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the config is missing, malformed, or
    /// declares an unsupported protocol version.
    pub fn open(root: &Path) -> Result<Self, ConfigError> {
        let config = VaultConfig::load(&Self::config_path_of(root))?;
        Ok(Self {
            root: root.to_owned(),
            config,
        })
    }

    /// The vault's unique identifier.
    #[must_use]
    pub const fn id(&self) -> &VaultId {
        &self.config.vault.id
    }

    /// The vault root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `.cast/` state directory.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Path of the config file under a given root.
    #[must_use]
    pub fn config_path_of(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join("config.yaml")
    }

    /// The index snapshot file.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.state_dir().join("index.json")
    }

    /// The content-addressed baseline store directory.
    #[must_use]
    pub fn objects_dir(&self) -> PathBuf {
        self.state_dir().join("objects")
    }

    /// The per-peer journal directory.
    #[must_use]
    pub fn peers_dir(&self) -> PathBuf {
        self.state_dir().join("peers")
    }

    /// The journal file for a given peer.
    #[must_use]
    pub fn peer_journal_path(&self, peer: &VaultId) -> PathBuf {
        self.peers_dir().join(format!("{peer}.json"))
    }

    /// The advisory lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join(".lock")
    }

    /// Resolve a forward-slash relative path against the vault root.
    #[must_use]
    pub fn abs(&self, rel: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in rel.split('/') {
            path.push(segment);
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_vault(id: &str) -> (tempfile::TempDir, Vault) {
        let dir = tempfile::tempdir().unwrap();
        let cast = dir.path().join(STATE_DIR);
        fs::create_dir_all(&cast).unwrap();
        fs::write(cast.join("config.yaml"), format!("vault:\n  id: {id}\n")).unwrap();
        let vault = Vault::open(dir.path()).unwrap();
        (dir, vault)
    }

    #[test]
    fn open_reads_config() {
        let (_dir, vault) = make_vault("home");
        assert_eq!(vault.id().as_str(), "home");
    }

    #[test]
    fn open_without_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Vault::open(dir.path()).is_err());
    }

    #[test]
    fn open_refuses_future_version() {
        let dir = tempfile::tempdir().unwrap();
        let cast = dir.path().join(STATE_DIR);
        fs::create_dir_all(&cast).unwrap();
        fs::write(
            cast.join("config.yaml"),
            "cast-version: \"99\"\nvault:\n  id: home\n",
        )
        .unwrap();
        assert!(Vault::open(dir.path()).is_err());
    }

    #[test]
    fn layout_paths() {
        let (_dir, vault) = make_vault("home");
        assert!(vault.index_path().ends_with(".cast/index.json"));
        assert!(vault.objects_dir().ends_with(".cast/objects"));
        assert!(vault.lock_path().ends_with(".cast/.lock"));
        let peer = VaultId::new("work").unwrap();
        assert!(vault.peer_journal_path(&peer).ends_with(".cast/peers/work.json"));
    }

    #[test]
    fn abs_joins_forward_slash_segments() {
        let (_dir, vault) = make_vault("home");
        let abs = vault.abs("sub/note.md");
        assert!(abs.ends_with(Path::new("sub").join("note.md")));
    }
}
