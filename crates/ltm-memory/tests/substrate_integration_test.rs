//! End-to-end behaviour of the storage engine against a real memory directory.

use ltm_memory::origin::OriginMapper;
use ltm_memory::MemorySubstrate;
use ltm_types::error::LtmError;
use ltm_types::memory::{MemoryChanges, MemoryQuery, NewMemory};
use rusqlite::Connection;
use std::path::Path;

fn open(dir: &Path) -> MemorySubstrate {
    MemorySubstrate::open(dir, OriginMapper::new()).unwrap()
}

fn note(id: &str, tags: &[&str]) -> NewMemory {
    NewMemory {
        id: Some(id.to_string()),
        title: format!("Note {id}"),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        summary: format!("About {id}"),
        content: format!("Body of {id}.\n"),
        ..Default::default()
    }
}

fn cooccurrence_rows(dir: &Path) -> Vec<(String, String, i64)> {
    let conn = Connection::open(dir.join("index.db")).unwrap();
    let mut stmt = conn
        .prepare("SELECT tag_a, tag_b, count FROM tag_cooccurrence ORDER BY tag_a, tag_b")
        .unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    rows
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn invalid_identifiers_fail_before_touching_files() {
    let outer = tempfile::tempdir().unwrap();
    let base = outer.path().join("memories");
    let substrate = open(&base);
    std::fs::write(outer.path().join("secret.md"), "keep me").unwrap();
    let before = dir_entries(&base);

    for id in ["../secret", "Upper", "a/b", "..", "", "dot.md", "sp ace"] {
        assert!(matches!(substrate.get(id), Err(LtmError::InvalidIdentifier(_))), "{id:?}");
        assert!(
            matches!(
                substrate.update(id, MemoryChanges::default()),
                Err(LtmError::InvalidIdentifier(_))
            ),
            "{id:?}"
        );
        assert!(matches!(substrate.delete(id), Err(LtmError::InvalidIdentifier(_))), "{id:?}");
    }
    let mut bad = note("ok", &[]);
    bad.id = Some("../escape".to_string());
    assert!(matches!(substrate.store(bad), Err(LtmError::InvalidIdentifier(_))));

    assert_eq!(dir_entries(&base), before);
    assert_eq!(
        std::fs::read_to_string(outer.path().join("secret.md")).unwrap(),
        "keep me"
    );
}

#[test]
fn duplicate_tags_are_stored_once() {
    let dir = tempfile::tempdir().unwrap();
    let substrate = open(dir.path());
    substrate.store(note("dupes", &["a", "a", "b", "A "])).unwrap();

    let recalled = substrate.get("dupes").unwrap();
    assert_eq!(recalled.memory.tags, vec!["a".to_string(), "b".to_string()]);
    let tags = substrate.tags(0).unwrap();
    assert_eq!(tags.len(), 2);
    assert!(tags.iter().all(|t| t.count == 1));
    assert_eq!(
        cooccurrence_rows(dir.path()),
        vec![("a".to_string(), "b".to_string(), 1)]
    );
}

#[test]
fn related_tags_of_nothing_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let substrate = open(dir.path());
    substrate.store(note("one", &["x", "y"])).unwrap();
    let empty: Vec<String> = Vec::new();
    assert!(substrate.related_tags(&empty, 10).unwrap().is_empty());
    let related = substrate.related_tags(&["x"], 10).unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].tag, "y");
}

#[test]
fn cooccurrence_never_goes_non_positive() {
    let dir = tempfile::tempdir().unwrap();
    let substrate = open(dir.path());
    substrate.store(note("one", &["a", "b", "c"])).unwrap();
    substrate.store(note("two", &["a", "b"])).unwrap();

    substrate
        .update(
            "one",
            MemoryChanges {
                tags: Some(vec!["a".into()]),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(
        cooccurrence_rows(dir.path()),
        vec![("a".to_string(), "b".to_string(), 1)]
    );

    substrate.delete("two").unwrap();
    assert!(cooccurrence_rows(dir.path()).is_empty());

    substrate
        .update(
            "one",
            MemoryChanges {
                tags: Some(vec!["a".into(), "d".into()]),
                ..Default::default()
            },
        )
        .unwrap();
    substrate.delete("one").unwrap();
    assert!(cooccurrence_rows(dir.path()).iter().all(|(_, _, n)| *n >= 1));
    assert!(cooccurrence_rows(dir.path()).is_empty());
}

#[test]
fn store_then_get_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let substrate = open(dir.path());
    substrate.store(note("target", &[])).unwrap();

    let mut input = note("round-trip", &["rust", "type:howto"]);
    input.title = "Round: trip \"quoted\"".to_string();
    input.summary = "Line one.\nLine two with --- inside".to_string();
    input.content = "# Not the title\n\nParagraph.\n".to_string();
    input.links = vec!["target".to_string()];
    input.source = Some("/abs/notes/file.md".to_string());
    substrate.store(input.clone()).unwrap();

    let first = substrate.get("round-trip").unwrap().memory;
    assert_eq!(first.title, input.title);
    assert_eq!(first.tags, vec!["rust".to_string(), "type:howto".to_string()]);
    assert_eq!(first.summary, input.summary);
    assert_eq!(first.content, input.content);
    assert_eq!(first.links, vec!["target".to_string()]);
    assert_eq!(first.source.as_deref(), Some("/abs/notes/file.md"));
    assert_eq!(first.access_count, 1);

    let second = substrate.get("round-trip").unwrap().memory;
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.access_count, 2);
    assert!(second.accessed_at >= first.accessed_at);
}

#[test]
fn links_to_missing_memories_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let substrate = open(dir.path());
    substrate.store(note("exists", &[])).unwrap();

    let mut input = note("linker", &[]);
    input.links = vec!["exists".into(), "missing".into(), "Not Valid".into()];
    let outcome = substrate.store(input).unwrap();
    assert_eq!(
        outcome.dropped_links,
        vec!["Not Valid".to_string(), "missing".to_string()]
    );
    assert_eq!(
        substrate.get("linker").unwrap().memory.links,
        vec!["exists".to_string()]
    );
}

#[test]
fn origin_contracts_on_write_and_expands_on_read() {
    let dir = tempfile::tempdir().unwrap();
    let substrate = open(dir.path());
    substrate
        .add_origin("proj", Path::new("/home/u/proj"))
        .unwrap();

    let mut input = note("sourced", &[]);
    input.source = Some("/home/u/proj/a.md".to_string());
    substrate.store(input).unwrap();

    let file = std::fs::read_to_string(dir.path().join("sourced.md")).unwrap();
    assert!(file.contains("proj:a.md"));
    assert!(!file.contains("/home/u/proj/a.md"));

    let recalled = substrate.get("sourced").unwrap();
    assert_eq!(recalled.memory.source.as_deref(), Some("/home/u/proj/a.md"));
    assert!(recalled.source_warning.is_none());
}

#[test]
fn adding_an_origin_rewrites_existing_sources() {
    let dir = tempfile::tempdir().unwrap();
    let substrate = open(dir.path());
    let mut inside = note("inside", &[]);
    inside.source = Some("/srv/docs/guide/intro.md".to_string());
    substrate.store(inside).unwrap();
    let mut outside = note("outside", &[]);
    outside.source = Some("/srv/other/x.md".to_string());
    substrate.store(outside).unwrap();

    let added = substrate.add_origin("docs", Path::new("/srv/docs/")).unwrap();
    assert_eq!(added.contracted, vec!["inside".to_string()]);
    let file = std::fs::read_to_string(dir.path().join("inside.md")).unwrap();
    assert!(file.contains("docs:guide/intro.md"));

    assert!(substrate.remove_origin("docs").unwrap());
    let recalled = substrate.get("inside").unwrap();
    assert_eq!(recalled.memory.source.as_deref(), Some("docs:guide/intro.md"));
    assert!(recalled.source_warning.is_some());
    assert_eq!(
        substrate.get("outside").unwrap().memory.source.as_deref(),
        Some("/srv/other/x.md")
    );
}

#[test]
fn more_overlap_ranks_higher() {
    let dir = tempfile::tempdir().unwrap();
    let substrate = open(dir.path());
    substrate.store(note("both", &["x", "y"])).unwrap();
    substrate.store(note("only-x", &["x"])).unwrap();
    // A read makes only-x the most recently accessed; overlap still wins.
    substrate.get("only-x").unwrap();

    let hits = substrate.query(&MemoryQuery::tags(["x", "y"])).unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["both", "only-x"]);
    assert!(hits[0].overlap > hits[1].overlap);
}

#[test]
fn reindex_recovers_orphans_and_drops_dangling_rows() {
    let dir = tempfile::tempdir().unwrap();
    {
        let substrate = open(dir.path());
        let mut first = note("first", &["a", "b"]);
        first.links = vec![];
        substrate.store(first).unwrap();
        let mut second = note("second", &["b"]);
        second.links = vec!["first".into()];
        substrate.store(second).unwrap();
        substrate.store(note("kept", &["c"])).unwrap();
    }

    // Lose the index, and lose one markdown file behind the index's back.
    std::fs::remove_file(dir.path().join("index.db")).unwrap();
    let substrate = open(dir.path());
    substrate.store(note("ghost", &["z"])).unwrap();
    std::fs::remove_file(dir.path().join("ghost.md")).unwrap();
    std::fs::write(dir.path().join("broken.md"), "no frontmatter").unwrap();

    let report = substrate.reindex().unwrap();
    assert_eq!(
        report.indexed,
        vec!["first".to_string(), "kept".to_string(), "second".to_string()]
    );
    assert_eq!(report.removed, vec!["ghost".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "broken");

    let second = substrate.get("second").unwrap();
    assert_eq!(second.memory.links, vec!["first".to_string()]);
    assert_eq!(
        cooccurrence_rows(dir.path()),
        vec![("a".to_string(), "b".to_string(), 1)]
    );

    let again = substrate.reindex().unwrap();
    assert!(again.indexed.is_empty());
    assert!(again.removed.is_empty());
}
