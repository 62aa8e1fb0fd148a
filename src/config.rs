//! Vault configuration (`.cast/config.yaml`).
//!
//! Defines the typed configuration for a vault: identity, index selection
//! patterns, ephemeral header keys, and output line-ending policy. Missing
//! fields use sensible defaults; the file itself is required because it
//! carries the vault id.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::model::types::VaultId;

/// The protocol version this engine speaks. Forward-incompatible versions
/// cause the engine to refuse operation rather than risk data corruption.
pub const SUPPORTED_VERSION: &str = "1";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level vault configuration.
///
/// Parsed from `.cast/config.yaml`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// Protocol version (`cast-version: "1"`).
    #[serde(rename = "cast-version", default = "default_version")]
    pub version: String,

    /// Vault identity.
    pub vault: VaultSection,

    /// Index selection settings.
    #[serde(default)]
    pub index: IndexSection,

    /// Merge settings.
    #[serde(default)]
    pub merge: MergeSection,

    /// Sync behaviour settings.
    #[serde(default)]
    pub sync: SyncSection,

    /// Output-format settings.
    #[serde(default)]
    pub advanced: AdvancedSection,
}

impl VaultConfig {
    /// Load and validate a config file.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file is missing, malformed, or
    /// declares an unsupported protocol version.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError {
            path: Some(path.to_owned()),
            message: format!("cannot read config: {e}"),
        })?;
        let config: Self = serde_yaml::from_str(&text).map_err(|e| ConfigError {
            path: Some(path.to_owned()),
            message: e.to_string(),
        })?;
        if config.version != SUPPORTED_VERSION {
            return Err(ConfigError {
                path: Some(path.to_owned()),
                message: format!(
                    "unsupported cast-version '{}' (this engine speaks version {SUPPORTED_VERSION}); refusing to operate",
                    config.version
                ),
            });
        }
        Ok(config)
    }

    /// The configured ephemeral keys as a lookup set.
    #[must_use]
    pub fn ephemeral_keys(&self) -> BTreeSet<String> {
        self.merge.ephemeral_keys.iter().cloned().collect()
    }

    /// Build a config with defaults for a given vault id (used by tests and
    /// programmatic vault setup).
    #[must_use]
    pub fn for_vault(id: VaultId) -> Self {
        Self {
            version: default_version(),
            vault: VaultSection { id },
            index: IndexSection::default(),
            merge: MergeSection::default(),
            sync: SyncSection::default(),
            advanced: AdvancedSection::default(),
        }
    }
}

fn default_version() -> String {
    SUPPORTED_VERSION.to_owned()
}

// ---------------------------------------------------------------------------
// VaultSection
// ---------------------------------------------------------------------------

/// Vault identity settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultSection {
    /// Unique local vault identifier.
    pub id: VaultId,
}

// ---------------------------------------------------------------------------
// IndexSection
// ---------------------------------------------------------------------------

/// Index selection settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSection {
    /// Glob patterns selecting files to index.
    #[serde(default = "default_include")]
    pub include: Vec<String>,

    /// Glob patterns excluding files from the index.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Files above this size in bytes are skipped and reported.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Select hidden (dot-prefixed) files as well.
    #[serde(default)]
    pub include_hidden: bool,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            include: default_include(),
            exclude: Vec::new(),
            max_file_size: default_max_file_size(),
            include_hidden: false,
        }
    }
}

fn default_include() -> Vec<String> {
    vec!["**/*.md".to_owned()]
}

const fn default_max_file_size() -> u64 {
    // 10 MiB
    10 * 1024 * 1024
}

// ---------------------------------------------------------------------------
// MergeSection
// ---------------------------------------------------------------------------

/// Merge behaviour settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeSection {
    /// Header keys ignored in digests and merges (e.g. modification
    /// timestamps maintained by an editor).
    #[serde(default)]
    pub ephemeral_keys: Vec<String>,
}

// ---------------------------------------------------------------------------
// SyncSection
// ---------------------------------------------------------------------------

/// Sync behaviour settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSection {
    /// Allow mirror-mode sync to delete destination files absent from the
    /// source. Off by default; broadcast and bidirectional sync never
    /// delete regardless of this flag.
    #[serde(default)]
    pub allow_delete: bool,
}

// ---------------------------------------------------------------------------
// AdvancedSection
// ---------------------------------------------------------------------------

/// Output-format settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdvancedSection {
    /// Line-ending policy for files the applier writes.
    #[serde(default)]
    pub line_endings: LineEndings,
}

/// Output line-ending policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEndings {
    /// Unix line endings (the engine's internal form).
    #[default]
    Lf,
    /// Windows line endings.
    Crlf,
    /// Whatever the host platform uses.
    Native,
}

impl LineEndings {
    /// Convert canonical LF content to this policy's on-disk form.
    #[must_use]
    pub fn apply(self, text: &str) -> String {
        let crlf = match self {
            Self::Lf => false,
            Self::Crlf => true,
            Self::Native => cfg!(windows),
        };
        if crlf {
            text.replace('\n', "\r\n")
        } else {
            text.to_owned()
        }
    }
}

impl fmt::Display for LineEndings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lf => write!(f, "lf"),
            Self::Crlf => write!(f, "crlf"),
            Self::Native => write!(f, "native"),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A configuration file could not be loaded or validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigError {
    /// Path to the configuration file, when known.
    pub path: Option<PathBuf>,
    /// Human-readable description of the problem.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(
                f,
                "configuration error in '{}': {}",
                path.display(),
                self.message
            ),
            None => write!(f, "configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
