//! Header blocks: the structured metadata region preceding body content.
//!
//! A header block is delimited by `---` lines at the very start of a file
//! and contains a YAML mapping. Cast preserves the author's key order when
//! rewriting headers, classifies every key into one of three buckets
//! (reserved, ephemeral, local), and re-serializes deterministically for
//! digest computation.

use std::collections::BTreeSet;
use std::fmt;

use crate::model::types::{CastId, Participation, ValidationError};

/// The header delimiter line.
pub const DELIMITER: &str = "---";

/// Header key holding the document identifier. Always the first key.
pub const ID_KEY: &str = "cast-id";
/// Header key holding the vault-participation list.
pub const VAULTS_KEY: &str = "cast-vaults";
/// Header key holding the document type.
pub const TYPE_KEY: &str = "cast-type";
/// Header key holding the protocol version.
pub const VERSION_KEY: &str = "cast-version";
/// Header key holding cross-vault codebase references.
pub const CODEBASES_KEY: &str = "cast-codebases";
/// Header key marking a materialized conflict file.
pub const CONFLICT_KEY: &str = "cast-conflict";

/// Keys reserved by the engine and synchronized across vaults. The source
/// side of a sync is authoritative for these.
pub const RESERVED_KEYS: &[&str] = &[ID_KEY, VAULTS_KEY, TYPE_KEY, VERSION_KEY, CODEBASES_KEY];

// ---------------------------------------------------------------------------
// HeaderValue
// ---------------------------------------------------------------------------

/// A header value: a scalar, a sequence, a nested mapping, or null.
///
/// Scalars keep their source text form; `to_yaml` re-parses the text so
/// numbers and booleans round-trip without quoting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderValue {
    /// An explicit null (or empty value).
    Null,
    /// A scalar, stored as its string rendering.
    Scalar(String),
    /// An ordered sequence of values.
    Sequence(Vec<HeaderValue>),
    /// An ordered nested mapping.
    Mapping(Vec<(String, HeaderValue)>),
}

impl HeaderValue {
    /// The scalar text, if this value is a scalar.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// The sequence items, if this value is a sequence.
    #[must_use]
    pub fn as_sequence(&self) -> Option<&[HeaderValue]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    fn from_yaml(value: &serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Null => Self::Null,
            serde_yaml::Value::Bool(b) => Self::Scalar(b.to_string()),
            serde_yaml::Value::Number(n) => Self::Scalar(n.to_string()),
            serde_yaml::Value::String(s) => Self::Scalar(s.clone()),
            serde_yaml::Value::Sequence(items) => {
                Self::Sequence(items.iter().map(Self::from_yaml).collect())
            }
            serde_yaml::Value::Mapping(map) => Self::Mapping(
                map.iter()
                    .map(|(k, v)| (yaml_key_to_string(k), Self::from_yaml(v)))
                    .collect(),
            ),
            serde_yaml::Value::Tagged(tagged) => Self::from_yaml(&tagged.value),
        }
    }

    fn to_yaml(&self) -> serde_yaml::Value {
        match self {
            Self::Null => serde_yaml::Value::Null,
            Self::Scalar(s) => scalar_to_yaml(s),
            Self::Sequence(items) => {
                serde_yaml::Value::Sequence(items.iter().map(Self::to_yaml).collect())
            }
            Self::Mapping(entries) => {
                let mut map = serde_yaml::Mapping::new();
                for (k, v) in entries {
                    map.insert(serde_yaml::Value::String(k.clone()), v.to_yaml());
                }
                serde_yaml::Value::Mapping(map)
            }
        }
    }
}

fn yaml_key_to_string(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_owned(),
    }
}

/// Re-parse a scalar's text so plain numbers, booleans, and nulls keep
/// their unquoted form. Anything that re-parses as a non-scalar (or fails
/// to parse) is emitted as a plain string.
fn scalar_to_yaml(text: &str) -> serde_yaml::Value {
    match serde_yaml::from_str::<serde_yaml::Value>(text) {
        Ok(
            v @ (serde_yaml::Value::Bool(_)
            | serde_yaml::Value::Number(_)
            | serde_yaml::Value::Null),
        ) if !text.is_empty() => v,
        _ => serde_yaml::Value::String(text.to_owned()),
    }
}

// ---------------------------------------------------------------------------
// KeyClass
// ---------------------------------------------------------------------------

/// The merge/digest bucket a header key belongs to.
///
/// The bucket drives digest inclusion and merge policy uniformly: reserved
/// keys follow the source of a sync, ephemeral keys are excluded from both
/// digests and merges, local keys stay with the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyClass {
    /// Engine-reserved, synchronized across vaults.
    Reserved,
    /// Excluded from digest computation and header merge.
    Ephemeral,
    /// Vault-local, preserved on the destination.
    Local,
}

/// Classify a header key against the configured ephemeral set.
#[must_use]
pub fn classify_key(key: &str, ephemeral: &BTreeSet<String>) -> KeyClass {
    if RESERVED_KEYS.contains(&key) {
        KeyClass::Reserved
    } else if ephemeral.contains(key) {
        KeyClass::Ephemeral
    } else {
        KeyClass::Local
    }
}

// ---------------------------------------------------------------------------
// HeaderBlock
// ---------------------------------------------------------------------------

/// An ordered key/value header mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    entries: Vec<(String, HeaderValue)>,
}

impl HeaderBlock {
    /// Create an empty header block.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Parse the text between the delimiter lines as a YAML mapping.
    ///
    /// # Errors
    /// Returns [`HeaderError`] if the text is not valid YAML or the top
    /// level is not a mapping.
    pub fn parse(yaml_text: &str) -> Result<Self, HeaderError> {
        if yaml_text.trim().is_empty() {
            return Ok(Self::new());
        }
        let value: serde_yaml::Value =
            serde_yaml::from_str(yaml_text).map_err(|e| HeaderError {
                detail: e.to_string(),
            })?;
        let serde_yaml::Value::Mapping(map) = value else {
            return Err(HeaderError {
                detail: "header block must be a key/value mapping".to_owned(),
            });
        };
        let entries = map
            .iter()
            .map(|(k, v)| (yaml_key_to_string(k), HeaderValue::from_yaml(v)))
            .collect();
        Ok(Self { entries })
    }

    /// Serialize back to YAML (without delimiter lines). Deterministic for
    /// a given entry order.
    #[must_use]
    pub fn to_yaml(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let mut map = serde_yaml::Mapping::new();
        for (k, v) in &self.entries {
            map.insert(serde_yaml::Value::String(k.clone()), v.to_yaml());
        }
        serde_yaml::to_string(&serde_yaml::Value::Mapping(map)).unwrap_or_default()
    }

    /// Returns `true` if the block has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns `true` if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set a key's value, replacing in place or appending at the end.
    pub fn set(&mut self, key: &str, value: HeaderValue) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key.to_owned(), value));
        }
    }

    /// Insert a key/value pair at the front, removing any prior occurrence.
    pub fn insert_first(&mut self, key: &str, value: HeaderValue) {
        self.entries.retain(|(k, _)| k != key);
        self.entries.insert(0, (key.to_owned(), value));
    }

    /// Remove a key, returning its value if present.
    pub fn remove(&mut self, key: &str) -> Option<HeaderValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Move `key` to the front if it exists elsewhere in the block.
    /// Returns `true` if the block changed.
    pub fn ensure_first(&mut self, key: &str) -> bool {
        match self.entries.iter().position(|(k, _)| k == key) {
            Some(0) | None => false,
            Some(pos) => {
                let entry = self.entries.remove(pos);
                self.entries.insert(0, entry);
                true
            }
        }
    }

    /// Iterate entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The document identifier, if present and well-formed.
    ///
    /// # Errors
    /// Returns an error if the `cast-id` key is present but not a valid UUID.
    pub fn id(&self) -> Result<Option<CastId>, ValidationError> {
        let Some(value) = self.get(ID_KEY) else {
            return Ok(None);
        };
        let text = value.as_scalar().unwrap_or_default();
        CastId::parse(text).map(Some)
    }

    /// The vault-participation list from `cast-vaults`. Missing key yields
    /// an empty list.
    ///
    /// # Errors
    /// Returns an error if any entry is malformed.
    pub fn participants(&self) -> Result<Vec<Participation>, ValidationError> {
        let Some(value) = self.get(VAULTS_KEY) else {
            return Ok(Vec::new());
        };
        let items: &[HeaderValue] = match value {
            HeaderValue::Sequence(items) => items,
            // A single scalar entry is accepted as a one-element list.
            single @ HeaderValue::Scalar(_) => std::slice::from_ref(single),
            _ => return Ok(Vec::new()),
        };
        items
            .iter()
            .filter_map(HeaderValue::as_scalar)
            .map(Participation::parse)
            .collect()
    }

    /// The document type from `cast-type`, if present.
    #[must_use]
    pub fn doc_type(&self) -> Option<String> {
        self.get(TYPE_KEY)
            .and_then(HeaderValue::as_scalar)
            .map(ToOwned::to_owned)
    }

    /// The view of this header used for digest computation: ephemeral keys
    /// dropped, identifier first, remaining keys in stable lexical order.
    #[must_use]
    pub fn digest_view(&self, ephemeral: &BTreeSet<String>) -> Self {
        let mut kept: Vec<(String, HeaderValue)> = self
            .entries
            .iter()
            .filter(|(k, _)| classify_key(k, ephemeral) != KeyClass::Ephemeral)
            .cloned()
            .collect();
        kept.sort_by(|(a, _), (b, _)| a.cmp(b));
        let mut view = Self { entries: kept };
        view.ensure_first(ID_KEY);
        view
    }
}

impl FromIterator<(String, HeaderValue)> for HeaderBlock {
    fn from_iter<T: IntoIterator<Item = (String, HeaderValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Frontmatter split
// ---------------------------------------------------------------------------

/// Split content into an optional raw header region and the body.
///
/// The content must already use LF line endings. A header block exists when
/// the content starts with a `---` line; it ends at the next `---` line.
/// Returns `(header_text, body)` where `header_text` excludes both
/// delimiter lines.
///
/// # Errors
/// Returns [`HeaderError`] when an opening delimiter has no closing
/// delimiter.
pub fn split(content: &str) -> Result<(Option<&str>, &str), HeaderError> {
    let Some(rest) = content.strip_prefix("---\n").or_else(|| {
        (content == DELIMITER).then_some("")
    }) else {
        return Ok((None, content));
    };

    if let Some(end) = rest.find("\n---\n") {
        let header = &rest[..=end];
        let body = &rest[end + "\n---\n".len()..];
        return Ok((Some(header), body));
    }
    // Closing delimiter at end of content with no trailing newline.
    if let Some(header) = rest.strip_suffix("\n---") {
        return Ok((Some(header), ""));
    }
    if rest.is_empty() || rest == DELIMITER || rest == "---\n" {
        // "---" alone or a pair of delimiters with nothing between.
        return Ok((Some(""), ""));
    }
    if let Some(body) = rest.strip_prefix("---\n") {
        return Ok((Some(""), body));
    }
    Err(HeaderError {
        detail: "header block is not terminated by a closing '---' line".to_owned(),
    })
}

/// Assemble full document content from an optional header and a body.
#[must_use]
pub fn assemble(header: Option<&HeaderBlock>, body: &str) -> String {
    match header {
        Some(block) if !block.is_empty() => {
            format!("{DELIMITER}\n{}{DELIMITER}\n{body}", block.to_yaml())
        }
        _ => body.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// HeaderError
// ---------------------------------------------------------------------------

/// A header block could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderError {
    /// Human-readable description of the problem.
    pub detail: String,
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed header block: {}", self.detail)
    }
}

impl std::error::Error for HeaderError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|k| (*k).to_owned()).collect()
    }

    // -- split --

    #[test]
    fn split_without_header() {
        let (header, body) = split("just a body\n").unwrap();
        assert!(header.is_none());
        assert_eq!(body, "just a body\n");
    }

    #[test]
    fn split_with_header() {
        let (header, body) = split("---\ncast-id: abc\n---\nhello\n").unwrap();
        assert_eq!(header, Some("cast-id: abc\n"));
        assert_eq!(body, "hello\n");
    }

    #[test]
    fn split_empty_header() {
        let (header, body) = split("---\n---\nbody\n").unwrap();
        assert_eq!(header, Some(""));
        assert_eq!(body, "body\n");
    }

    #[test]
    fn split_header_at_eof() {
        let (header, body) = split("---\nkey: v\n---").unwrap();
        assert_eq!(header, Some("key: v"));
        assert_eq!(body, "");
    }

    #[test]
    fn split_unterminated_header_fails() {
        assert!(split("---\nkey: v\nno closing").is_err());
    }

    #[test]
    fn split_horizontal_rule_later_is_body() {
        let (header, body) = split("text\n---\nmore\n").unwrap();
        assert!(header.is_none());
        assert_eq!(body, "text\n---\nmore\n");
    }

    // -- parse / to_yaml --

    #[test]
    fn parse_preserves_key_order() {
        let block = HeaderBlock::parse("zebra: 1\nalpha: 2\nmiddle: 3\n").unwrap();
        let keys: Vec<_> = block.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["zebra", "alpha", "middle"]);
    }

    #[test]
    fn parse_rejects_non_mapping() {
        assert!(HeaderBlock::parse("- a\n- b\n").is_err());
        assert!(HeaderBlock::parse("just a scalar").is_err());
    }

    #[test]
    fn parse_rejects_bad_yaml() {
        assert!(HeaderBlock::parse("key: [unclosed\n").is_err());
    }

    #[test]
    fn scalar_kinds_roundtrip_unquoted() {
        let block = HeaderBlock::parse("count: 42\nflag: true\nname: hello\n").unwrap();
        let yaml = block.to_yaml();
        assert!(yaml.contains("count: 42"));
        assert!(yaml.contains("flag: true"));
        assert!(yaml.contains("name: hello"));
    }

    #[test]
    fn sequences_and_mappings_survive() {
        let block = HeaderBlock::parse("tags:\n- a\n- b\nmeta:\n  nested: 1\n").unwrap();
        assert!(matches!(block.get("tags"), Some(HeaderValue::Sequence(_))));
        assert!(matches!(block.get("meta"), Some(HeaderValue::Mapping(_))));
        let reparsed = HeaderBlock::parse(&block.to_yaml()).unwrap();
        assert_eq!(reparsed, block);
    }

    #[test]
    fn null_value_survives() {
        let block = HeaderBlock::parse("empty:\n").unwrap();
        assert_eq!(block.get("empty"), Some(&HeaderValue::Null));
    }

    // -- mutation --

    #[test]
    fn insert_first_puts_key_at_front() {
        let mut block = HeaderBlock::parse("a: 1\nb: 2\n").unwrap();
        block.insert_first(ID_KEY, HeaderValue::Scalar("x".to_owned()));
        let keys: Vec<_> = block.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, [ID_KEY, "a", "b"]);
    }

    #[test]
    fn ensure_first_reorders() {
        let mut block = HeaderBlock::parse(&format!("a: 1\n{ID_KEY}: x\n")).unwrap();
        assert!(block.ensure_first(ID_KEY));
        let keys: Vec<_> = block.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, [ID_KEY, "a"]);
        // Already first: no change reported.
        assert!(!block.ensure_first(ID_KEY));
    }

    #[test]
    fn set_replaces_in_place() {
        let mut block = HeaderBlock::parse("a: 1\nb: 2\n").unwrap();
        block.set("a", HeaderValue::Scalar("9".to_owned()));
        let keys: Vec<_> = block.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(block.get("a").and_then(HeaderValue::as_scalar), Some("9"));
    }

    // -- typed accessors --

    #[test]
    fn id_parses_uuid() {
        let block =
            HeaderBlock::parse("cast-id: 123e4567-e89b-42d3-a456-426614174000\n").unwrap();
        assert!(block.id().unwrap().is_some());
    }

    #[test]
    fn id_absent_is_none() {
        let block = HeaderBlock::parse("title: x\n").unwrap();
        assert_eq!(block.id().unwrap(), None);
    }

    #[test]
    fn id_malformed_is_error() {
        let block = HeaderBlock::parse("cast-id: nope\n").unwrap();
        assert!(block.id().is_err());
    }

    #[test]
    fn participants_parse() {
        let block =
            HeaderBlock::parse("cast-vaults:\n- home (sync)\n- hub (cast)\n").unwrap();
        let parts = block.participants().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].vault.as_str(), "home");
        assert_eq!(parts[1].vault.as_str(), "hub");
    }

    #[test]
    fn participants_absent_is_empty() {
        let block = HeaderBlock::parse("title: x\n").unwrap();
        assert!(block.participants().unwrap().is_empty());
    }

    // -- classification + digest view --

    #[test]
    fn classify_buckets() {
        let eph = ephemeral(&["modified"]);
        assert_eq!(classify_key(ID_KEY, &eph), KeyClass::Reserved);
        assert_eq!(classify_key(VAULTS_KEY, &eph), KeyClass::Reserved);
        assert_eq!(classify_key("modified", &eph), KeyClass::Ephemeral);
        assert_eq!(classify_key("tags", &eph), KeyClass::Local);
    }

    #[test]
    fn digest_view_drops_ephemeral_and_sorts() {
        let block = HeaderBlock::parse(
            "zebra: 1\ncast-id: 123e4567-e89b-42d3-a456-426614174000\nmodified: now\nalpha: 2\n",
        )
        .unwrap();
        let view = block.digest_view(&ephemeral(&["modified"]));
        let keys: Vec<_> = view.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, [ID_KEY, "alpha", "zebra"]);
    }

    #[test]
    fn digest_view_is_stable() {
        let a = HeaderBlock::parse("b: 1\na: 2\n").unwrap();
        let b = HeaderBlock::parse("a: 2\nb: 1\n").unwrap();
        let eph = BTreeSet::new();
        assert_eq!(a.digest_view(&eph).to_yaml(), b.digest_view(&eph).to_yaml());
    }

    // -- assemble --

    #[test]
    fn assemble_with_header() {
        let block = HeaderBlock::parse("a: 1\n").unwrap();
        let content = assemble(Some(&block), "body\n");
        assert_eq!(content, "---\na: 1\n---\nbody\n");
    }

    #[test]
    fn assemble_without_header() {
        assert_eq!(assemble(None, "body\n"), "body\n");
        let empty = HeaderBlock::new();
        assert_eq!(assemble(Some(&empty), "body\n"), "body\n");
    }
}
