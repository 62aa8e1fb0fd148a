//! Merge-focused scenarios: header policy, ephemeral keys, and line-ending
//! output.

mod common;

use common::{conflict_files, make_vault, make_vault_with_config, read_note, sync, tracked, write_note};

use cast::model::types::CastId;
use cast::plan::ActionKind;

const BOTH: [&str; 2] = ["a (sync)", "b (sync)"];

fn ephemeral_config(id: &str) -> String {
    format!("vault:\n  id: {id}\nmerge:\n  ephemeral_keys:\n  - modified\n")
}

#[test]
fn ephemeral_key_changes_never_trigger_sync() {
    let a = make_vault_with_config("a", &ephemeral_config("a"));
    let b = make_vault_with_config("b", &ephemeral_config("b"));
    let id = CastId::generate();
    write_note(
        &a,
        "note.md",
        &format!("---\ncast-id: {id}\ncast-vaults:\n- a (sync)\n- b (sync)\nmodified: 100\n---\nhello\n"),
    );
    sync(&a, &b);

    // Only the ephemeral key changes on the source.
    write_note(
        &a,
        "note.md",
        &format!("---\ncast-id: {id}\ncast-vaults:\n- a (sync)\n- b (sync)\nmodified: 999\n---\nhello\n"),
    );

    let report = sync(&a, &b);
    assert_eq!(report.count_kind(ActionKind::Skip), 1);
    assert_eq!(report.count_kind(ActionKind::Update), 0);
}

#[test]
fn reserved_type_key_propagates_on_update() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(
        &a,
        "note.md",
        &format!("---\ncast-id: {id}\ncast-vaults:\n- a (sync)\n- b (sync)\ncast-type: note\n---\nv1\n"),
    );
    sync(&a, &b);

    // B categorizes locally; A retypes the document and edits the body.
    let local = read_note(&b, "note.md").replace("---\nv1", "status: open\n---\nv1");
    write_note(&b, "note.md", &local);
    write_note(
        &a,
        "note.md",
        &format!("---\ncast-id: {id}\ncast-vaults:\n- a (sync)\n- b (sync)\ncast-type: journal\n---\nv2\n"),
    );

    sync(&a, &b);
    let written = read_note(&b, "note.md");
    assert!(written.contains("cast-type: journal"), "reserved key follows source");
    assert!(written.contains("status: open"), "local key survives");
    assert!(written.starts_with(&format!("---\ncast-id: {id}\n")));
}

#[test]
fn disjoint_section_edits_merge_cleanly() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    let base = "intro\n\n# Plans\nold plans\n\n# Log\nold log\n";
    write_note(&a, "note.md", &tracked(id, &BOTH, base));
    sync(&a, &b);

    // A rewrites Plans, B rewrites Log.
    write_note(
        &a,
        "note.md",
        &tracked(id, &BOTH, "intro\n\n# Plans\nnew plans\n\n# Log\nold log\n"),
    );
    let b_edit = read_note(&b, "note.md").replace("old log", "fresh log");
    write_note(&b, "note.md", &b_edit);

    let report = sync(&a, &b);
    assert_eq!(report.count_kind(ActionKind::Merge), 1);
    assert_eq!(report.conflicts(), 0);

    let merged = read_note(&b, "note.md");
    assert!(merged.contains("new plans"));
    assert!(merged.contains("fresh log"));
    assert!(conflict_files(&b).is_empty());
}

#[test]
fn dest_only_change_skips_until_reverse_sync() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\n"));
    sync(&a, &b);

    let b_edit = read_note(&b, "note.md").replace("---\nhello", "---\nhello from b");
    write_note(&b, "note.md", &b_edit);

    // Forward: destination changed, source did not — keep the destination.
    let forward = sync(&a, &b);
    assert_eq!(forward.count_kind(ActionKind::Skip), 1);
    assert!(read_note(&b, "note.md").contains("hello from b"));

    // Reverse: now the change flows back.
    let reverse = sync(&b, &a);
    assert_eq!(reverse.count_kind(ActionKind::Update), 1);
    assert!(read_note(&a, "note.md").contains("hello from b"));
}

#[test]
fn crlf_policy_applies_to_written_files() {
    let a = make_vault("a");
    let b = make_vault_with_config(
        "b",
        "vault:\n  id: b\nadvanced:\n  line_endings: crlf\n",
    );
    let id = CastId::generate();
    write_note(&a, "note.md", &tracked(id, &BOTH, "line one\nline two\n"));

    sync(&a, &b);
    let written = read_note(&b, "note.md");
    assert!(written.contains("line one\r\nline two\r\n"));

    // CRLF on disk still normalizes to the same digests: nothing to do.
    let again = sync(&a, &b);
    assert_eq!(again.count_kind(ActionKind::Skip), 1);
}

#[test]
fn conflict_file_is_not_indexed_on_later_runs() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\n"));
    sync(&a, &b);

    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\n\n# S\naaa\n"));
    let b_edit = read_note(&b, "note.md").replace("---\nhello", "---\nhello\n\n# S\nbbb");
    write_note(&b, "note.md", &b_edit);

    let conflicted = sync(&a, &b);
    assert_eq!(conflicted.conflicts(), 1);

    // The sibling inherits the identifier, yet the next run must not trip
    // duplicate detection or re-conflict.
    let again = sync(&a, &b);
    assert_eq!(again.conflicts(), 0);
    assert_eq!(conflict_files(&b).len(), 1);
}
