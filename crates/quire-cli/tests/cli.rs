//! End-to-end runs over real files, the way the binary drives them.
//!
//! Every step reopens the file through a fresh session, so these cover the
//! whole load, edit, recompute, save cycle rather than one long-lived state.
//! Timeline *lengths* are left unasserted where edits land milliseconds
//! apart: snapshot compaction folds rapid commits together by design of the
//! decay schedule, and how many survive depends on the wall clock.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use quire_blocks::Library;
use quire_cli::{
    add_page, back, create, delete_page, open, page_listing, page_result, parse_path, rename_page,
    restore, save, set_line, standard_library,
};
use quire_core::{EntryId, Value};

fn fresh_file() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("notes.json");
    (dir, file)
}

/// One `set` invocation: open, type into the default line, save.
fn set(library: &Library, file: &Path, page: &[EntryId], code: &str) -> Value {
    let session = open(library, file).unwrap();
    let value = set_line(library, &session, page, None, None, code.to_string()).unwrap();
    save(&session, file).unwrap();
    value
}

#[test]
fn test_a_document_file_builds_command_by_command() {
    let (_dir, file) = fresh_file();
    let library = standard_library();

    create(&library, &file).unwrap();
    assert!(create(&library, &file).is_err(), "must not clobber");

    let session = open(&library, &file).unwrap();
    let at = add_page(&session, &[]).unwrap();
    assert_eq!(at, vec![EntryId(0)]);
    assert!(add_page(&session, &[EntryId(9)]).is_err());
    save(&session, &file).unwrap();

    // A fresh page carries one empty line; the first set types into it,
    // the second finds it occupied and appends.
    assert_eq!(set(&library, &file, &at, "\"Hello\""), Value::text("Hello"));
    assert_eq!(
        set(&library, &file, &at, "$0 + \" World\""),
        Value::text("Hello World")
    );

    let session = open(&library, &file).unwrap();
    assert_eq!(session.result(), Value::text("Hello World"));
    assert_eq!(
        page_listing(&library, &session.shown()),
        vec!["0  $0  Hello World".to_string()]
    );

    let stored: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
    assert_eq!(stored["t"], "quire.history");
}

#[test]
fn test_an_explicit_line_edit_replaces_instead_of_appending() {
    let (_dir, file) = fresh_file();
    let library = standard_library();

    create(&library, &file).unwrap();
    let session = open(&library, &file).unwrap();
    let at = add_page(&session, &[]).unwrap();
    save(&session, &file).unwrap();

    set(&library, &file, &at, "\"Hello\"");
    set(&library, &file, &at, "$0 + \" World\"");

    let session = open(&library, &file).unwrap();
    let value = set_line(
        &library,
        &session,
        &at,
        Some(EntryId(0)),
        None,
        "\"Hi\"".to_string(),
    )
    .unwrap();
    assert_eq!(value, Value::text("Hi World"));

    let missing = set_line(
        &library,
        &session,
        &at,
        Some(EntryId(9)),
        None,
        "\"lost\"".to_string(),
    );
    assert!(missing.is_err());
}

#[test]
fn test_renaming_a_page_heals_references_across_saves() {
    let (_dir, file) = fresh_file();
    let library = standard_library();

    create(&library, &file).unwrap();
    let session = open(&library, &file).unwrap();
    add_page(&session, &[]).unwrap();
    save(&session, &file).unwrap();
    set(&library, &file, &[EntryId(0)], "2 + 3");

    let session = open(&library, &file).unwrap();
    add_page(&session, &[EntryId(0)]).unwrap();
    save(&session, &file).unwrap();
    let broken = set(&library, &file, &[EntryId(1)], "five + 1");
    assert!(matches!(broken, Value::Error(_)));

    let session = open(&library, &file).unwrap();
    rename_page(&session, &[EntryId(0)], "five".to_string()).unwrap();
    save(&session, &file).unwrap();

    let session = open(&library, &file).unwrap();
    assert_eq!(
        page_result(&library, &session.shown(), &[EntryId(1)]).unwrap(),
        Value::Number(6.0)
    );
    let listing = page_listing(&library, &session.shown());
    assert_eq!(listing[0], "0  five  5");
}

#[test]
fn test_deleting_a_page_breaks_its_readers_in_the_file() {
    let (_dir, file) = fresh_file();
    let library = standard_library();

    create(&library, &file).unwrap();
    let session = open(&library, &file).unwrap();
    add_page(&session, &[]).unwrap();
    save(&session, &file).unwrap();
    set(&library, &file, &[EntryId(0)], "2 + 3");

    let session = open(&library, &file).unwrap();
    add_page(&session, &[EntryId(0)]).unwrap();
    save(&session, &file).unwrap();
    set(&library, &file, &[EntryId(1)], "$0 + 1");

    let session = open(&library, &file).unwrap();
    delete_page(&session, &[EntryId(0)]).unwrap();
    save(&session, &file).unwrap();

    let session = open(&library, &file).unwrap();
    assert!(matches!(
        page_result(&library, &session.shown(), &[EntryId(1)]).unwrap(),
        Value::Error(_)
    ));
    assert!(delete_page(&session, &[EntryId(7)]).is_err());
}

#[test]
fn test_history_commands_on_a_real_timeline() {
    let (_dir, file) = fresh_file();
    let library = standard_library();

    create(&library, &file).unwrap();
    let session = open(&library, &file).unwrap();
    assert!(back(&session, 1).is_err(), "nothing to step back to yet");
    assert!(restore(&session, 0).is_err());

    add_page(&session, &[]).unwrap();
    save(&session, &file).unwrap();
    set(&library, &file, &[EntryId(0)], "\"Hello\"");
    set(&library, &file, &[EntryId(0)], "$0 + \" World\"");

    let session = open(&library, &file).unwrap();
    let timeline = session.timeline();
    assert!(!timeline.is_empty());

    // Over-stepping saturates at the oldest surviving snapshot.
    let (position, _) = back(&session, timeline.len() + 10).unwrap();
    assert_eq!(position, 0);

    // Restoring the newest snapshot adopts it without rewriting anything.
    let session = open(&library, &file).unwrap();
    let len = session.timeline().len();
    restore(&session, len - 1).unwrap();
    assert_eq!(session.result(), Value::text("Hello World"));
    assert!(restore(&session, len + 10).is_err());
    save(&session, &file).unwrap();

    let session = open(&library, &file).unwrap();
    assert_eq!(session.result(), Value::text("Hello World"));
}

#[test]
fn test_page_paths_parse_and_print() {
    assert_eq!(parse_path("0.2").unwrap(), vec![EntryId(0), EntryId(2)]);
    assert_eq!(parse_path("7").unwrap(), vec![EntryId(7)]);
    assert!(parse_path("").is_err());
    assert!(parse_path("0.x").is_err());
    assert_eq!(quire_cli::format_path(&[EntryId(0), EntryId(2)]), "0.2");
}

#[test]
fn test_opening_garbage_fails_without_a_panic() {
    let (_dir, file) = fresh_file();
    let library = standard_library();

    assert!(open(&library, &file).is_err(), "missing file");

    fs::write(&file, "not json at all").unwrap();
    assert!(open(&library, &file).is_err(), "not JSON");

    fs::write(&file, "{\"t\": \"something.else\", \"v\": 0}").unwrap();
    assert!(open(&library, &file).is_err(), "wrong format");
}
