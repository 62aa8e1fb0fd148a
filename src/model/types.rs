//! Core vault types for Cast.
//!
//! Foundation types used throughout the engine: vault identifiers, document
//! identifiers, content digests, and vault-participation entries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// A validated 64-character lowercase hex SHA-256 digest.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Create a new `Digest` from a string, validating format.
    ///
    /// # Errors
    /// Returns an error if the string is not exactly 64 lowercase hex characters.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Build a `Digest` from raw SHA-256 output bytes.
    #[must_use]
    pub fn from_sha256(bytes: &[u8; 32]) -> Self {
        use std::fmt::Write as _;
        let mut hex = String::with_capacity(64);
        for b in bytes {
            let _ = write!(hex, "{b:02x}");
        }
        Self(hex)
    }

    /// Return the inner hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first eight hex characters, for compact display.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..8]
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.len() != 64 {
            return Err(ValidationError {
                kind: ErrorKind::Digest,
                value: s.to_owned(),
                reason: format!("expected 64 hex characters, got {}", s.len()),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(ValidationError {
                kind: ErrorKind::Digest,
                value: s.to_owned(),
                reason: "must contain only lowercase hex characters (0-9, a-f)".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.0
    }
}

// ---------------------------------------------------------------------------
// CastId
// ---------------------------------------------------------------------------

/// A stable document identifier — a UUID v4 stored as the first key of a
/// document's header block. Once assigned, never changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CastId(Uuid);

impl CastId {
    /// Generate a fresh identifier from a cryptographically random source.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identifier from its hyphenated string form.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let uuid = Uuid::parse_str(s).map_err(|e| ValidationError {
            kind: ErrorKind::CastId,
            value: s.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self(uuid))
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// The first eight hex characters of the identifier, for path suffixes
    /// and compact display.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_owned()
    }
}

impl fmt::Display for CastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.as_hyphenated(), f)
    }
}

impl FromStr for CastId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CastId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<CastId> for String {
    fn from(id: CastId) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// VaultId
// ---------------------------------------------------------------------------

/// A validated vault identifier.
///
/// Vault names must be lowercase alphanumeric with hyphens, 1–64 characters.
/// Examples: `home`, `work-notes`, `laptop-2`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VaultId(String);

impl VaultId {
    /// The maximum length of a vault name.
    pub const MAX_LEN: usize = 64;

    /// Create a new `VaultId` from a string, validating format.
    ///
    /// # Errors
    /// Returns an error if the name is empty, too long, or contains invalid characters.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the vault name as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.is_empty() {
            return Err(ValidationError {
                kind: ErrorKind::VaultId,
                value: s.to_owned(),
                reason: "vault name must not be empty".to_owned(),
            });
        }
        if s.len() > Self::MAX_LEN {
            return Err(ValidationError {
                kind: ErrorKind::VaultId,
                value: s.to_owned(),
                reason: format!(
                    "vault name must be at most {} characters, got {}",
                    Self::MAX_LEN,
                    s.len()
                ),
            });
        }
        if s.starts_with('-') || s.ends_with('-') {
            return Err(ValidationError {
                kind: ErrorKind::VaultId,
                value: s.to_owned(),
                reason: "vault name must not start or end with a hyphen".to_owned(),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ValidationError {
                kind: ErrorKind::VaultId,
                value: s.to_owned(),
                reason:
                    "vault name must contain only lowercase letters (a-z), digits (0-9), and hyphens (-)"
                        .to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VaultId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for VaultId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<VaultId> for String {
    fn from(id: VaultId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// Role + Participation
// ---------------------------------------------------------------------------

/// A vault's role in a document's participation list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Authoritative source; participates in broadcast mode.
    Cast,
    /// Full bidirectional peer.
    Sync,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cast => write!(f, "cast"),
            Self::Sync => write!(f, "sync"),
        }
    }
}

/// One entry of a document's `cast-vaults` participation list, written as
/// `<vault-id> (<role>)` in the header.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Participation {
    /// The participating vault.
    pub vault: VaultId,
    /// The vault's role for this document.
    pub role: Role,
}

impl Participation {
    /// Parse a participation entry of the form `<vault-id> (<role>)`.
    ///
    /// # Errors
    /// Returns an error if the entry is not in the expected form or the
    /// vault id or role is invalid.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let err = |reason: String| ValidationError {
            kind: ErrorKind::Participation,
            value: s.to_owned(),
            reason,
        };

        let trimmed = s.trim();
        let Some((name, rest)) = trimmed.split_once('(') else {
            return Err(err("expected '<vault-id> (<role>)'".to_owned()));
        };
        let Some(role_str) = rest.strip_suffix(')') else {
            return Err(err("missing closing ')' after role".to_owned()));
        };
        let vault = VaultId::new(name.trim())?;
        let role = match role_str.trim() {
            "cast" => Role::Cast,
            "sync" => Role::Sync,
            other => {
                return Err(err(format!(
                    "unknown role '{other}' (expected 'cast' or 'sync')"
                )));
            }
        };
        Ok(Self { vault, role })
    }
}

impl fmt::Display for Participation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.vault, self.role)
    }
}

impl FromStr for Participation {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Participation {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Participation> for String {
    fn from(p: Participation) -> Self {
        p.to_string()
    }
}

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Which kind of value failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A content digest.
    Digest,
    /// A document identifier.
    CastId,
    /// A vault identifier.
    VaultId,
    /// A participation-list entry.
    Participation,
}

/// A value failed format validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// What kind of value was being validated.
    pub kind: ErrorKind,
    /// The offending input.
    pub value: String,
    /// Why the input is invalid.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            ErrorKind::Digest => "digest",
            ErrorKind::CastId => "document id",
            ErrorKind::VaultId => "vault id",
            ErrorKind::Participation => "participation entry",
        };
        write!(f, "invalid {what} '{}': {}", self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
