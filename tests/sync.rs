//! End-to-end sync scenarios.
//!
//! Each test creates isolated temp vaults and drives full sync runs,
//! asserting on destination files, indices, journals, and exit codes.

mod common;

use std::time::Duration;

use common::{
    conflict_files, make_vault, make_vault_with_config, read_note, sync, sync_with, tracked,
    write_note,
};

use cast::apply::{SyncOptions, sync_vaults};
use cast::error::CastError;
use cast::index::{IndexError, IndexSnapshot};
use cast::lock::VaultLock;
use cast::model::types::CastId;
use cast::normalize::sha256;
use cast::peer::{PeerJournal, SyncOutcome};
use cast::plan::ActionKind;
use cast::report::ActionOutcome;
use cast::vault::Vault;

const BOTH: [&str; 2] = ["a (sync)", "b (sync)"];

fn load_journal(vault: &common::TestVault, peer: &str) -> PeerJournal {
    let opened = Vault::open(vault.root()).expect("open vault");
    let peer_id = cast::model::types::VaultId::new(peer).expect("peer id");
    PeerJournal::load(
        &opened.peer_journal_path(&peer_id),
        opened.id().clone(),
        peer_id,
    )
    .expect("load journal")
}

fn load_index(vault: &common::TestVault) -> IndexSnapshot {
    let opened = Vault::open(vault.root()).expect("open vault");
    IndexSnapshot::load(&opened.index_path())
        .expect("load index")
        .expect("index exists")
}

// -- scenario: first CREATE -------------------------------------------------

#[test]
fn first_create_copies_reserved_header_and_body() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(
        &a,
        "note.md",
        &format!("---\ncast-id: {id}\ncast-vaults:\n- a (sync)\n- b (sync)\ntags:\n- private\n---\nhello\n"),
    );

    let report = sync(&a, &b);
    assert_eq!(report.count_kind(ActionKind::Create), 1);
    assert_eq!(report.exit_code(), 0);

    let written = read_note(&b, "note.md");
    assert!(written.starts_with(&format!("---\ncast-id: {id}\n")));
    assert!(written.contains("cast-vaults:"));
    // Local keys from the source are absent.
    assert!(!written.contains("private"));
    assert!(written.ends_with("---\nhello\n"));

    // Destination index has an entry for the identifier.
    let index = load_index(&b);
    assert_eq!(index.lookup_by_id(&id).unwrap().path, "note.md");

    // Both journals record CREATE with the agreed body digest.
    for (vault, peer) in [(&b, "a"), (&a, "b")] {
        let journal = load_journal(vault, peer);
        let entry = journal.get(&id).expect("journal entry");
        assert_eq!(entry.last_result, SyncOutcome::Create);
        assert_eq!(entry.source_digest, sha256(b"hello\n"));
        assert!(entry.base_object.is_some());
    }
}

// -- scenario: header-only change is SKIP -----------------------------------

#[test]
fn header_only_change_is_skip() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\n"));
    sync(&a, &b);

    // B categorizes locally; body untouched.
    let local = read_note(&b, "note.md").replace("---\nhello", "tags:\n- x\n---\nhello");
    write_note(&b, "note.md", &local);

    let report = sync(&a, &b);
    assert_eq!(report.count_kind(ActionKind::Skip), 1);
    assert_eq!(report.count_kind(ActionKind::Update), 0);
    assert!(read_note(&b, "note.md").contains("tags:\n- x"));
}

// -- scenario: one-sided body change is UPDATE ------------------------------

#[test]
fn one_sided_body_change_updates_and_preserves_local_header() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\n"));
    sync(&a, &b);

    let baseline_before = load_journal(&b, "a").get(&id).unwrap().base_object.clone();

    // B adds a local tag; A edits the body.
    let local = read_note(&b, "note.md").replace("---\nhello", "tags:\n- x\n---\nhello");
    write_note(&b, "note.md", &local);
    write_note(&a, "note.md", &tracked(id, &BOTH, "hello world\n"));

    let report = sync(&a, &b);
    assert_eq!(report.count_kind(ActionKind::Update), 1);

    let written = read_note(&b, "note.md");
    assert!(written.contains("tags:\n- x"), "local tag preserved:\n{written}");
    assert!(written.ends_with("hello world\n"));

    let entry_after = load_journal(&b, "a");
    let entry_after = entry_after.get(&id).unwrap();
    assert_eq!(entry_after.last_result, SyncOutcome::Update);
    assert_ne!(entry_after.base_object, baseline_before, "baseline advances");
    assert_eq!(entry_after.dest_digest, sha256(b"hello world\n"));
}

// -- scenario: both-sided change is MERGE or CONFLICT -----------------------

#[test]
fn both_sided_divergent_section_materializes_conflict() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\n"));
    sync(&a, &b);

    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\n\n# Section\naaa\n"));
    let b_content = read_note(&b, "note.md").replace("---\nhello", "---\nhello\n\n# Section\nbbb");
    write_note(&b, "note.md", &b_content);
    let b_before = read_note(&b, "note.md");

    let report = sync(&a, &b);
    assert_eq!(report.count_kind(ActionKind::Merge), 1);
    assert_eq!(report.conflicts(), 1);
    assert_eq!(report.exit_code(), 3);

    // Destination file is byte-identical to its pre-run content.
    assert_eq!(read_note(&b, "note.md"), b_before);

    let conflicts = conflict_files(&b);
    assert_eq!(conflicts.len(), 1);
    let conflict = std::fs::read_to_string(&conflicts[0]).unwrap();
    assert!(conflict.contains("<<<<<<< a\n"));
    assert!(conflict.contains(">>>>>>> b\n"));
    assert!(conflict.contains("aaa"));
    assert!(conflict.contains("bbb"));
    assert!(conflict.contains(&format!("cast-id: {id}")));
    assert!(conflict.contains("cast-conflict:"));

    let journal = load_journal(&b, "a");
    assert_eq!(journal.get(&id).unwrap().last_result, SyncOutcome::Conflict);
    // The pre-divergence baseline is preserved as a recoverable ancestor.
    assert!(journal.get(&id).unwrap().base_object.is_some());
}

// -- scenario: append heuristic ---------------------------------------------

#[test]
fn one_sided_append_is_a_plain_update() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\n"));
    sync(&a, &b);

    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\nworld\n"));
    let report = sync(&a, &b);
    assert_eq!(report.count_kind(ActionKind::Update), 1);
    assert!(read_note(&b, "note.md").ends_with("hello\nworld\n"));
}

#[test]
fn prefix_containment_merges_without_hunks() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\n"));
    sync(&a, &b);

    // Both appended; one side's body is a strict prefix of the other's.
    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\nworld\nagain\n"));
    let b_content = read_note(&b, "note.md").replace("---\nhello\n", "---\nhello\nworld\n");
    write_note(&b, "note.md", &b_content);

    let report = sync(&a, &b);
    assert_eq!(report.count_kind(ActionKind::Merge), 1);
    assert_eq!(report.conflicts(), 0);
    assert!(read_note(&b, "note.md").ends_with("hello\nworld\nagain\n"));

    let journal = load_journal(&b, "a");
    assert_eq!(journal.get(&id).unwrap().last_result, SyncOutcome::Merge);
}

// -- scenario: duplicate identifier aborts ----------------------------------

#[test]
fn duplicate_identifier_aborts_the_run() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(&a, "one.md", &tracked(id, &BOTH, "one\n"));
    write_note(&a, "two.md", &tracked(id, &BOTH, "two\n"));

    let err = sync_vaults(a.root(), b.root(), &SyncOptions::default()).unwrap_err();
    let CastError::Index(IndexError::DuplicateId { id: dup, paths }) = err else {
        panic!("expected DuplicateId, got {err}");
    };
    assert_eq!(dup, id);
    assert_eq!(paths.len(), 2);
}

// -- convergence ------------------------------------------------------------

#[test]
fn forward_reverse_forward_is_a_noop() {
    let a = make_vault("a");
    let b = make_vault("b");
    for i in 0..3 {
        let id = CastId::generate();
        write_note(&a, &format!("n{i}.md"), &tracked(id, &BOTH, &format!("body {i}\n")));
    }

    let first = sync(&a, &b);
    assert_eq!(first.count_kind(ActionKind::Create), 3);

    let reverse = sync(&b, &a);
    assert_eq!(reverse.records.len(), 3);
    assert_eq!(reverse.count_kind(ActionKind::Skip), 3);

    let forward = sync(&a, &b);
    assert_eq!(forward.count_kind(ActionKind::Skip), 3);
    assert_eq!(forward.exit_code(), 0);
}

#[test]
fn clean_merge_converges_via_reverse_sync() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\n"));
    sync(&a, &b);

    // Disjoint section additions on each side.
    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\n\n# From A\naaa\n"));
    let b_content = read_note(&b, "note.md").replace("---\nhello\n", "---\nhello\n\n# From B\nbbb\n");
    write_note(&b, "note.md", &b_content);

    let merge_run = sync(&a, &b);
    assert_eq!(merge_run.count_kind(ActionKind::Merge), 1);
    assert_eq!(merge_run.conflicts(), 0);
    let merged = read_note(&b, "note.md");
    assert!(merged.contains("# From A"));
    assert!(merged.contains("# From B"));

    // The reverse direction folds the merge back into A.
    sync(&b, &a);
    let a_content = read_note(&a, "note.md");
    assert!(a_content.contains("# From A"));
    assert!(a_content.contains("# From B"));

    // Once both sides agree, everything skips.
    let settle = sync(&a, &b);
    assert!(settle.records.iter().all(|r| r.kind == ActionKind::Skip
        || matches!(r.outcome, ActionOutcome::Applied)));
    let final_run = sync(&a, &b);
    assert_eq!(final_run.count_kind(ActionKind::Skip), 1);
}

// -- eligibility ------------------------------------------------------------

#[test]
fn documents_not_listing_both_vaults_are_elided() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(&a, "other.md", &tracked(id, &["a (sync)", "c (sync)"], "x\n"));

    let report = sync(&a, &b);
    assert!(report.records.is_empty());
    assert_eq!(report.ineligible, 1);
    assert!(!b.root().join("other.md").exists());
}

#[test]
fn broadcast_source_overwrites_destination_edits() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    let roles = ["a (cast)", "b (sync)"];
    write_note(&a, "feed.md", &tracked(id, &roles, "v1\n"));
    sync(&a, &b);

    // Both edit; broadcast mode overwrites the destination.
    write_note(&a, "feed.md", &tracked(id, &roles, "v2\n"));
    let local_edit = read_note(&b, "feed.md").replace("v1\n", "local\n");
    write_note(&b, "feed.md", &local_edit);

    let report = sync(&a, &b);
    assert_eq!(report.count_kind(ActionKind::Update), 1);
    assert!(read_note(&b, "feed.md").ends_with("v2\n"));
}

// -- collisions -------------------------------------------------------------

#[test]
fn mismatched_identity_collision_renames_incoming_file() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id_a = CastId::generate();
    let id_b = CastId::generate();
    write_note(&a, "note.md", &tracked(id_a, &BOTH, "from a\n"));
    write_note(&b, "note.md", &tracked(id_b, &BOTH, "from b\n"));

    let report = sync(&a, &b);
    assert_eq!(report.count_kind(ActionKind::Create), 1);
    assert!(report.events.iter().any(|e| e.contains("collision")));

    // The pre-existing file is untouched; the incoming one is suffixed.
    assert!(read_note(&b, "note.md").contains("from b"));
    let renamed = format!("note-{}.md", id_a.short());
    assert!(read_note(&b, &renamed).contains("from a"));
}

// -- mirror + delete --------------------------------------------------------

#[test]
fn mirror_delete_requires_configuration() {
    let a = make_vault("a");
    let b = make_vault_with_config("b", "vault:\n  id: b\nsync:\n  allow_delete: true\n");
    let id = CastId::generate();
    write_note(&b, "stale.md", &tracked(id, &BOTH, "old\n"));

    // Bidirectional sync keeps destination-only documents.
    let plain = sync(&a, &b);
    assert_eq!(plain.records.len(), 0);
    assert!(b.root().join("stale.md").exists());

    let mirror = sync_with(
        &a,
        &b,
        &SyncOptions {
            mirror: true,
            ..SyncOptions::default()
        },
    );
    assert_eq!(mirror.count_kind(ActionKind::Delete), 1);
    assert!(!b.root().join("stale.md").exists());
    assert!(load_journal(&b, "a").get(&id).is_none());
}

// -- dry run ----------------------------------------------------------------

#[test]
fn dry_run_plans_without_applying() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\n"));

    let report = sync_with(
        &a,
        &b,
        &SyncOptions {
            dry_run: true,
            ..SyncOptions::default()
        },
    );
    assert!(report.dry_run);
    assert_eq!(report.count_kind(ActionKind::Create), 1);
    assert!(
        report
            .records
            .iter()
            .all(|r| r.outcome == ActionOutcome::Planned)
    );
    assert!(!b.root().join("note.md").exists());
}

// -- locking ----------------------------------------------------------------

#[test]
fn held_destination_lock_times_out() {
    let a = make_vault("a");
    let b = make_vault("b");
    let id = CastId::generate();
    write_note(&a, "note.md", &tracked(id, &BOTH, "hello\n"));

    let opened = Vault::open(b.root()).unwrap();
    let _held = VaultLock::acquire(&opened.lock_path(), Duration::from_millis(100)).unwrap();

    let err = sync_vaults(
        a.root(),
        b.root(),
        &SyncOptions {
            lock_timeout: Duration::from_millis(200),
            ..SyncOptions::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, CastError::Lock(_)));
    assert_eq!(err.exit_code(), 5);
}

// -- protocol version -------------------------------------------------------

#[test]
fn future_protocol_version_refuses_to_sync() {
    let a = make_vault_with_config("a", "cast-version: \"9\"\nvault:\n  id: a\n");
    let b = make_vault("b");

    let err = sync_vaults(a.root(), b.root(), &SyncOptions::default()).unwrap_err();
    assert!(matches!(err, CastError::Config(_)));
    assert_eq!(err.exit_code(), 2);
}

// -- identifier injection during sync ---------------------------------------

#[test]
fn auto_fix_assigns_ids_before_syncing() {
    let a = make_vault("a");
    let b = make_vault("b");
    write_note(
        &a,
        "fresh.md",
        "---\ncast-vaults:\n- a (sync)\n- b (sync)\n---\nnew note\n",
    );

    let report = sync(&a, &b);
    assert_eq!(report.count_kind(ActionKind::Create), 1);
    let written = read_note(&b, "fresh.md");
    assert!(written.starts_with("---\ncast-id: "));
    // Source got the same id persisted.
    let source = read_note(&a, "fresh.md");
    assert!(source.starts_with("---\ncast-id: "));
}
