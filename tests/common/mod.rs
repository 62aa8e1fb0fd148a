//! Shared harness for integration tests.
//!
//! Each test builds isolated temp vaults with a minimal `.cast/config.yaml`
//! and drives the engine through the same entry points the CLI uses.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use cast::apply::{SyncOptions, sync_vaults};
use cast::model::types::CastId;
use cast::report::RunReport;

/// A temp-dir vault that cleans up on drop.
pub struct TestVault {
    dir: tempfile::TempDir,
    pub id: String,
}

impl TestVault {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// Create a vault with default configuration.
pub fn make_vault(id: &str) -> TestVault {
    make_vault_with_config(id, &format!("vault:\n  id: {id}\n"))
}

/// Create a vault with explicit `config.yaml` contents.
pub fn make_vault_with_config(id: &str, config_yaml: &str) -> TestVault {
    let dir = tempfile::tempdir().expect("create temp vault");
    let cast_dir = dir.path().join(".cast");
    fs::create_dir_all(&cast_dir).expect("create .cast");
    fs::write(cast_dir.join("config.yaml"), config_yaml).expect("write config");
    TestVault {
        dir,
        id: id.to_owned(),
    }
}

/// Write a file under the vault root, creating parent directories.
pub fn write_note(vault: &TestVault, rel: &str, content: &str) {
    let path = vault.root().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parents");
    }
    fs::write(path, content).expect("write note");
}

/// Read a file under the vault root.
pub fn read_note(vault: &TestVault, rel: &str) -> String {
    fs::read_to_string(vault.root().join(rel)).expect("read note")
}

/// Compose tracked-document content: identifier + participation + body.
pub fn tracked(id: CastId, vaults: &[&str], body: &str) -> String {
    let mut content = format!("---\ncast-id: {id}\ncast-vaults:\n");
    for vault in vaults {
        content.push_str(&format!("- {vault}\n"));
    }
    content.push_str("---\n");
    content.push_str(body);
    content
}

/// Sync source into dest with default options, asserting vault-wide
/// success.
pub fn sync(source: &TestVault, dest: &TestVault) -> RunReport {
    sync_vaults(source.root(), dest.root(), &SyncOptions::default())
        .expect("sync should not fail vault-wide")
}

/// Sync with explicit options.
pub fn sync_with(source: &TestVault, dest: &TestVault, options: &SyncOptions) -> RunReport {
    sync_vaults(source.root(), dest.root(), options).expect("sync should not fail vault-wide")
}

/// All materialized conflict files under the vault root, sorted.
pub fn conflict_files(vault: &TestVault) -> Vec<PathBuf> {
    let mut found = Vec::new();
    collect_conflicts(vault.root(), &mut found);
    found.sort();
    found
}

fn collect_conflicts(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == ".cast" {
            continue;
        }
        if path.is_dir() {
            collect_conflicts(&path, out);
        } else if name.contains(".conflicted-") {
            out.push(path);
        }
    }
}
