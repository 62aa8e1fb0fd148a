//! Key-wise header merge.
//!
//! Reserved keys (identifier, participation list, type, version,
//! codebases) are taken from the source — it is authoritative for
//! cross-vault identity and routing. All other keys are taken from the
//! destination so each vault retains its own categorization. The resulting
//! identifier appears first; other keys follow the destination's original
//! order, with source-only reserved keys appended after.

use std::collections::BTreeSet;

use crate::header::{classify_key, HeaderBlock, ID_KEY, KeyClass, RESERVED_KEYS};

/// Merge two headers key-wise. Either side may be absent.
#[must_use]
pub fn merge_headers(
    source: Option<&HeaderBlock>,
    dest: Option<&HeaderBlock>,
    ephemeral: &BTreeSet<String>,
) -> HeaderBlock {
    let empty = HeaderBlock::new();
    let source = source.unwrap_or(&empty);
    let dest = dest.unwrap_or(&empty);

    let mut merged = HeaderBlock::new();

    // Destination order wins for layout. Reserved slots take the source's
    // value; a reserved key the source no longer carries is dropped.
    for (key, value) in dest.iter() {
        match classify_key(key, ephemeral) {
            KeyClass::Reserved => {
                if let Some(src_value) = source.get(key) {
                    merged.set(key, src_value.clone());
                }
            }
            KeyClass::Ephemeral | KeyClass::Local => merged.set(key, value.clone()),
        }
    }

    // Source-only reserved keys are appended, in reserved-key order.
    for key in RESERVED_KEYS {
        if !merged.contains_key(key)
            && let Some(src_value) = source.get(key)
        {
            merged.set(key, src_value.clone());
        }
    }

    merged.ensure_first(ID_KEY);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{HeaderValue, TYPE_KEY, VAULTS_KEY};

    fn block(yaml: &str) -> HeaderBlock {
        HeaderBlock::parse(yaml).unwrap()
    }

    fn no_ephemeral() -> BTreeSet<String> {
        BTreeSet::new()
    }

    #[test]
    fn reserved_keys_follow_source() {
        let source = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\ncast-type: journal\n");
        let dest = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\ncast-type: note\n");
        let merged = merge_headers(Some(&source), Some(&dest), &no_ephemeral());
        assert_eq!(
            merged.get(TYPE_KEY).and_then(HeaderValue::as_scalar),
            Some("journal")
        );
    }

    #[test]
    fn local_keys_follow_destination() {
        let source = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\ntags:\n- remote\n");
        let dest = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\ntags:\n- local\n");
        let merged = merge_headers(Some(&source), Some(&dest), &no_ephemeral());
        let tags = merged.get("tags").and_then(HeaderValue::as_sequence).unwrap();
        assert_eq!(tags, &[HeaderValue::Scalar("local".to_owned())]);
    }

    #[test]
    fn source_only_local_keys_are_not_imported() {
        let source = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\nprivate: yes\n");
        let dest = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\n");
        let merged = merge_headers(Some(&source), Some(&dest), &no_ephemeral());
        assert!(!merged.contains_key("private"));
    }

    #[test]
    fn source_only_reserved_keys_are_appended() {
        let source = block(
            "cast-id: 123e4567-e89b-42d3-a456-426614174000\ncast-vaults:\n- a (sync)\n- b (sync)\n",
        );
        let dest = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\ntags:\n- x\n");
        let merged = merge_headers(Some(&source), Some(&dest), &no_ephemeral());
        assert!(merged.contains_key(VAULTS_KEY));
        let keys: Vec<_> = merged.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, [ID_KEY, "tags", VAULTS_KEY]);
    }

    #[test]
    fn reserved_key_dropped_by_source_is_dropped() {
        let source = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\n");
        let dest = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\ncast-type: note\n");
        let merged = merge_headers(Some(&source), Some(&dest), &no_ephemeral());
        assert!(!merged.contains_key(TYPE_KEY));
    }

    #[test]
    fn identifier_is_first() {
        let source = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\n");
        let dest = block("tags:\n- x\ncast-id: 123e4567-e89b-42d3-a456-426614174000\n");
        let merged = merge_headers(Some(&source), Some(&dest), &no_ephemeral());
        let keys: Vec<_> = merged.iter().map(|(k, _)| k).collect();
        assert_eq!(keys[0], ID_KEY);
    }

    #[test]
    fn destination_order_is_preserved() {
        let source = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\n");
        let dest = block(
            "zebra: 1\ncast-id: 123e4567-e89b-42d3-a456-426614174000\nalpha: 2\n",
        );
        let merged = merge_headers(Some(&source), Some(&dest), &no_ephemeral());
        let keys: Vec<_> = merged.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, [ID_KEY, "zebra", "alpha"]);
    }

    #[test]
    fn absent_sides_merge_to_the_other() {
        let source = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\n");
        let merged = merge_headers(Some(&source), None, &no_ephemeral());
        assert!(merged.contains_key(ID_KEY));

        let dest = block("tags:\n- x\n");
        let merged = merge_headers(None, Some(&dest), &no_ephemeral());
        assert!(merged.contains_key("tags"));
    }

    #[test]
    fn destination_ephemeral_keys_are_kept_as_is() {
        let eph: BTreeSet<String> = ["modified".to_owned()].into();
        let source = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\nmodified: remote\n");
        let dest = block("cast-id: 123e4567-e89b-42d3-a456-426614174000\nmodified: local\n");
        let merged = merge_headers(Some(&source), Some(&dest), &eph);
        assert_eq!(
            merged.get("modified").and_then(HeaderValue::as_scalar),
            Some("local")
        );
    }
}
