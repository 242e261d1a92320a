//! SQLite index of memories, tag membership, links and tag co-occurrence.
//!
//! Every operation opens its own short-lived connection with foreign keys enabled,
//! does its writes in one transaction and closes the connection on return.

use crate::cooccurrence::CooccurrenceLedger;
use crate::migration::run_migrations;
use chrono::{DateTime, SecondsFormat, Utc};
use ltm_types::error::{LtmError, LtmResult};
use ltm_types::memory::{Memory, TagCount};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A memory as held by the index (no body).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedMemory {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub access_count: u64,
    /// Sorted tag set.
    pub tags: Vec<String>,
    /// Sorted outgoing links.
    pub links: Vec<String>,
}

/// Handle to the SQLite index file.
#[derive(Debug, Clone)]
pub struct RelationalIndex {
    db_path: PathBuf,
}

impl RelationalIndex {
    /// Open (creating if needed) the index at `db_path` and bring its schema up to date.
    pub fn open(db_path: &Path) -> LtmResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let index = Self {
            db_path: db_path.to_path_buf(),
        };
        let conn = index.connect()?;
        run_migrations(&conn).map_err(|e| LtmError::Index(e.to_string()))?;
        Ok(index)
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Open a fresh connection with foreign-key enforcement on.
    pub(crate) fn connect(&self) -> LtmResult<Connection> {
        let conn = Connection::open(&self.db_path).map_err(|e| LtmError::Index(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| LtmError::Index(e.to_string()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| LtmError::Index(e.to_string()))?;
        Ok(conn)
    }

    /// Insert a memory with its tags and links, and count its tag pairs.
    ///
    /// Links whose target is not indexed are skipped. Returns the links actually stored.
    pub fn insert(&self, memory: &Memory) -> LtmResult<Vec<String>> {
        let mut conn = self.connect()?;
        let tx = begin(&mut conn)?;
        tx.execute(
            "INSERT INTO memories (id, title, summary, source, created_at, accessed_at, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                memory.id,
                memory.title,
                memory.summary,
                memory.source,
                ts(&memory.created_at),
                ts(&memory.accessed_at),
                memory.access_count as i64,
            ],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => LtmError::AlreadyExists(memory.id.clone()),
            _ => LtmError::Index(e.to_string()),
        })?;

        let tags = unique(&memory.tags);
        for tag in &tags {
            tx.execute(
                "INSERT INTO memory_tags (memory_id, tag) VALUES (?1, ?2)",
                rusqlite::params![memory.id, tag],
            )
            .map_err(|e| LtmError::Index(e.to_string()))?;
        }
        let links = insert_links(&tx, &memory.id, &memory.links)?;
        CooccurrenceLedger::new(&tx).increment(&tags)?;

        tx.commit().map_err(|e| LtmError::Index(e.to_string()))?;
        debug!(id = %memory.id, tags = tags.len(), links = links.len(), "Indexed memory");
        Ok(links)
    }

    /// Replace the indexed fields, tags and links of an existing memory.
    ///
    /// Only tag pairs that appear or disappear change their co-occurrence counts.
    /// `created_at` is never rewritten. Returns the links actually stored.
    pub fn update(&self, memory: &Memory) -> LtmResult<Vec<String>> {
        let mut conn = self.connect()?;
        let tx = begin(&mut conn)?;
        let changed = tx
            .execute(
                "UPDATE memories
                 SET title = ?2, summary = ?3, source = ?4, accessed_at = ?5, access_count = ?6
                 WHERE id = ?1",
                rusqlite::params![
                    memory.id,
                    memory.title,
                    memory.summary,
                    memory.source,
                    ts(&memory.accessed_at),
                    memory.access_count as i64,
                ],
            )
            .map_err(|e| LtmError::Index(e.to_string()))?;
        if changed == 0 {
            return Err(LtmError::NotFound(memory.id.clone()));
        }

        let old_tags = tags_of(&tx, &memory.id)?;
        let new_tags = unique(&memory.tags);
        for tag in old_tags.iter().filter(|t| !new_tags.contains(t)) {
            tx.execute(
                "DELETE FROM memory_tags WHERE memory_id = ?1 AND tag = ?2",
                rusqlite::params![memory.id, tag],
            )
            .map_err(|e| LtmError::Index(e.to_string()))?;
        }
        for tag in new_tags.iter().filter(|t| !old_tags.contains(t)) {
            tx.execute(
                "INSERT INTO memory_tags (memory_id, tag) VALUES (?1, ?2)",
                rusqlite::params![memory.id, tag],
            )
            .map_err(|e| LtmError::Index(e.to_string()))?;
        }
        CooccurrenceLedger::new(&tx).replace(&old_tags, &new_tags)?;

        tx.execute(
            "DELETE FROM memory_links WHERE from_id = ?1",
            rusqlite::params![memory.id],
        )
        .map_err(|e| LtmError::Index(e.to_string()))?;
        let links = insert_links(&tx, &memory.id, &memory.links)?;

        tx.commit().map_err(|e| LtmError::Index(e.to_string()))?;
        debug!(id = %memory.id, "Updated index row");
        Ok(links)
    }

    /// Replace only the outgoing links of a memory. Returns the links actually stored.
    pub fn set_links(&self, id: &str, links: &[String]) -> LtmResult<Vec<String>> {
        let mut conn = self.connect()?;
        let tx = begin(&mut conn)?;
        tx.execute(
            "DELETE FROM memory_links WHERE from_id = ?1",
            rusqlite::params![id],
        )
        .map_err(|e| LtmError::Index(e.to_string()))?;
        let stored = insert_links(&tx, id, links)?;
        tx.commit().map_err(|e| LtmError::Index(e.to_string()))?;
        Ok(stored)
    }

    /// Remove a memory, uncounting its tag pairs. Returns false if it was not indexed.
    pub fn remove(&self, id: &str) -> LtmResult<bool> {
        let mut conn = self.connect()?;
        let tx = begin(&mut conn)?;
        if !exists(&tx, id)? {
            return Ok(false);
        }
        let tags = tags_of(&tx, id)?;
        CooccurrenceLedger::new(&tx).decrement(&tags)?;
        for sql in [
            "DELETE FROM memory_tags WHERE memory_id = ?1",
            "DELETE FROM memory_links WHERE from_id = ?1 OR to_id = ?1",
            "DELETE FROM memories WHERE id = ?1",
        ] {
            tx.execute(sql, rusqlite::params![id])
                .map_err(|e| LtmError::Index(e.to_string()))?;
        }
        tx.commit().map_err(|e| LtmError::Index(e.to_string()))?;
        debug!(id, "Removed index row");
        Ok(true)
    }

    /// Fetch one memory's index row, tags and links.
    pub fn fetch(&self, id: &str) -> LtmResult<IndexedMemory> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT id, title, summary, source, created_at, accessed_at, access_count
                 FROM memories WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| LtmError::Index(e.to_string()))?;
        let Some((id, title, summary, source, created, accessed, access_count)) = row else {
            return Err(LtmError::NotFound(id.to_string()));
        };

        let mut tags = tags_of(&conn, &id)?;
        tags.sort();
        let mut stmt = conn
            .prepare("SELECT to_id FROM memory_links WHERE from_id = ?1 ORDER BY to_id")
            .map_err(|e| LtmError::Index(e.to_string()))?;
        let links = stmt
            .query_map(rusqlite::params![id], |row| row.get::<_, String>(0))
            .map_err(|e| LtmError::Index(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LtmError::Index(e.to_string()))?;

        Ok(IndexedMemory {
            id,
            title,
            summary,
            source,
            created_at: parse_ts(&created)?,
            accessed_at: parse_ts(&accessed)?,
            access_count: access_count.max(0) as u64,
            tags,
            links,
        })
    }

    /// Whether `id` has an index row.
    pub fn contains(&self, id: &str) -> LtmResult<bool> {
        let conn = self.connect()?;
        exists(&conn, id)
    }

    /// The subset of `ids` that currently have index rows.
    pub fn existing(&self, ids: &[String]) -> LtmResult<HashSet<String>> {
        let mut found = HashSet::new();
        if ids.is_empty() {
            return Ok(found);
        }
        let conn = self.connect()?;
        for id in ids {
            if exists(&conn, id)? {
                found.insert(id.clone());
            }
        }
        Ok(found)
    }

    /// All indexed identifiers, sorted.
    pub fn ids(&self) -> LtmResult<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT id FROM memories ORDER BY id")
            .map_err(|e| LtmError::Index(e.to_string()))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| LtmError::Index(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LtmError::Index(e.to_string()))?;
        Ok(ids)
    }

    /// Record a read: bump the access count and set the last-accessed time.
    pub fn touch_access(&self, id: &str, at: DateTime<Utc>) -> LtmResult<()> {
        let conn = self.connect()?;
        let changed = conn
            .execute(
                "UPDATE memories SET accessed_at = ?2, access_count = access_count + 1 WHERE id = ?1",
                rusqlite::params![id, ts(&at)],
            )
            .map_err(|e| LtmError::Index(e.to_string()))?;
        if changed == 0 {
            return Err(LtmError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Every stored `(id, source)` pair.
    pub fn sources(&self) -> LtmResult<Vec<(String, String)>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT id, source FROM memories WHERE source IS NOT NULL ORDER BY id")
            .map_err(|e| LtmError::Index(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| LtmError::Index(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LtmError::Index(e.to_string()))?;
        Ok(rows)
    }

    /// Overwrite one memory's stored source.
    pub fn set_source(&self, id: &str, source: Option<&str>) -> LtmResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE memories SET source = ?2 WHERE id = ?1",
            rusqlite::params![id, source],
        )
        .map_err(|e| LtmError::Index(e.to_string()))?;
        Ok(())
    }

    /// Every tag with its membership count, plus up to `examples_per_tag` summaries of
    /// the most recently accessed memories carrying it.
    pub fn list_tags(&self, examples_per_tag: usize) -> LtmResult<Vec<TagCount>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT tag, COUNT(*) AS n FROM memory_tags
                 GROUP BY tag ORDER BY n DESC, tag ASC",
            )
            .map_err(|e| LtmError::Index(e.to_string()))?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| LtmError::Index(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LtmError::Index(e.to_string()))?;

        let mut examples_stmt = conn
            .prepare(
                "SELECT m.summary FROM memories m
                 JOIN memory_tags mt ON m.id = mt.memory_id
                 WHERE mt.tag = ?1
                 ORDER BY m.accessed_at DESC, m.id ASC
                 LIMIT ?2",
            )
            .map_err(|e| LtmError::Index(e.to_string()))?;

        let mut tags = Vec::with_capacity(counts.len());
        for (tag, count) in counts {
            let examples = if examples_per_tag == 0 {
                Vec::new()
            } else {
                examples_stmt
                    .query_map(rusqlite::params![tag, examples_per_tag as i64], |row| {
                        row.get::<_, String>(0)
                    })
                    .map_err(|e| LtmError::Index(e.to_string()))?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| LtmError::Index(e.to_string()))?
            };
            tags.push(TagCount {
                tag,
                count: count.max(0) as u64,
                examples,
            });
        }
        Ok(tags)
    }
}

fn begin(conn: &mut Connection) -> LtmResult<Transaction<'_>> {
    conn.transaction()
        .map_err(|e| LtmError::Index(e.to_string()))
}

fn exists(conn: &Connection, id: &str) -> LtmResult<bool> {
    conn.query_row(
        "SELECT 1 FROM memories WHERE id = ?1",
        rusqlite::params![id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(|e| LtmError::Index(e.to_string()))
}

fn tags_of(conn: &Connection, id: &str) -> LtmResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT tag FROM memory_tags WHERE memory_id = ?1")
        .map_err(|e| LtmError::Index(e.to_string()))?;
    let tags = stmt
        .query_map(rusqlite::params![id], |row| row.get::<_, String>(0))
        .map_err(|e| LtmError::Index(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LtmError::Index(e.to_string()))?;
    Ok(tags)
}

/// Insert links whose target exists, skipping self links and duplicates.
fn insert_links(tx: &Transaction<'_>, from: &str, links: &[String]) -> LtmResult<Vec<String>> {
    let mut stored = Vec::new();
    for to in unique(links) {
        if to == from {
            continue;
        }
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO memory_links (from_id, to_id)
                 SELECT ?1, id FROM memories WHERE id = ?2",
                rusqlite::params![from, to],
            )
            .map_err(|e| LtmError::Index(e.to_string()))?;
        if inserted > 0 {
            stored.push(to);
        }
    }
    Ok(stored)
}

fn unique(values: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .iter()
        .filter(|v| seen.insert(v.as_str()))
        .cloned()
        .collect()
}

/// Timestamp format used in the index. Fixed width, so text order is time order.
pub(crate) fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> LtmResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LtmError::Index(format!("bad timestamp {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;

    fn setup() -> (tempfile::TempDir, RelationalIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = RelationalIndex::open(&dir.path().join("index.db")).unwrap();
        (dir, index)
    }

    fn memory(id: &str, tags: &[&str], links: &[&str]) -> Memory {
        let now = Utc::now().trunc_subsecs(6);
        Memory {
            id: id.to_string(),
            title: format!("Title {id}"),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            summary: format!("Summary of {id}"),
            content: String::new(),
            source: None,
            created_at: now,
            accessed_at: now,
            access_count: 0,
            links: links.iter().map(|l| l.to_string()).collect(),
        }
    }

    fn pair_count(index: &RelationalIndex, a: &str, b: &str) -> u64 {
        let conn = index.connect().unwrap();
        CooccurrenceLedger::new(&conn).count(a, b).unwrap()
    }

    #[test]
    fn test_insert_and_fetch() {
        let (_dir, index) = setup();
        let m = memory("alpha", &["b", "a", "b"], &[]);
        index.insert(&m).unwrap();

        let row = index.fetch("alpha").unwrap();
        assert_eq!(row.title, "Title alpha");
        assert_eq!(row.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(row.created_at, m.created_at);
        assert_eq!(pair_count(&index, "a", "b"), 1);
    }

    #[test]
    fn test_insert_duplicate_id() {
        let (_dir, index) = setup();
        index.insert(&memory("alpha", &[], &[])).unwrap();
        assert!(matches!(
            index.insert(&memory("alpha", &[], &[])),
            Err(LtmError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_links_to_missing_targets_are_skipped() {
        let (_dir, index) = setup();
        index.insert(&memory("target", &[], &[])).unwrap();
        let stored = index
            .insert(&memory("source", &[], &["target", "ghost", "source", "target"]))
            .unwrap();
        assert_eq!(stored, vec!["target".to_string()]);
        assert_eq!(index.fetch("source").unwrap().links, vec!["target".to_string()]);
    }

    #[test]
    fn test_update_adjusts_tags_and_pairs() {
        let (_dir, index) = setup();
        index.insert(&memory("one", &["a", "b", "c"], &[])).unwrap();
        index.insert(&memory("two", &["a", "b"], &[])).unwrap();
        assert_eq!(pair_count(&index, "a", "b"), 2);

        let mut changed = memory("one", &["a", "d"], &[]);
        changed.title = "Renamed".to_string();
        index.update(&changed).unwrap();

        let row = index.fetch("one").unwrap();
        assert_eq!(row.title, "Renamed");
        assert_eq!(row.tags, vec!["a".to_string(), "d".to_string()]);
        assert_eq!(pair_count(&index, "a", "b"), 1);
        assert_eq!(pair_count(&index, "b", "c"), 0);
        assert_eq!(pair_count(&index, "a", "d"), 1);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let (_dir, index) = setup();
        assert!(matches!(
            index.update(&memory("nope", &[], &[])),
            Err(LtmError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_cascades() {
        let (_dir, index) = setup();
        index.insert(&memory("one", &["a", "b"], &[])).unwrap();
        index.insert(&memory("two", &["a"], &["one"])).unwrap();
        assert!(index.remove("one").unwrap());
        assert!(!index.remove("one").unwrap());

        assert!(index.fetch("two").unwrap().links.is_empty());
        assert_eq!(pair_count(&index, "a", "b"), 0);
        let tags = index.list_tags(0).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].tag, "a");
    }

    #[test]
    fn test_touch_access() {
        let (_dir, index) = setup();
        index.insert(&memory("one", &[], &[])).unwrap();
        let later = Utc::now().trunc_subsecs(6) + chrono::Duration::seconds(5);
        index.touch_access("one", later).unwrap();
        let row = index.fetch("one").unwrap();
        assert_eq!(row.access_count, 1);
        assert_eq!(row.accessed_at, later);
        assert!(matches!(
            index.touch_access("nope", later),
            Err(LtmError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_tags_with_examples() {
        let (_dir, index) = setup();
        index.insert(&memory("one", &["rust", "cli"], &[])).unwrap();
        index.insert(&memory("two", &["rust"], &[])).unwrap();
        let tags = index.list_tags(1).unwrap();
        assert_eq!(tags[0].tag, "rust");
        assert_eq!(tags[0].count, 2);
        assert_eq!(tags[0].examples.len(), 1);
        assert_eq!(tags[1].tag, "cli");
        assert_eq!(tags[1].examples, vec!["Summary of one".to_string()]);
    }

    #[test]
    fn test_foreign_keys_enforced_per_connection() {
        let (_dir, index) = setup();
        let conn = index.connect().unwrap();
        let result = conn.execute(
            "INSERT INTO memory_tags (memory_id, tag) VALUES ('ghost', 'x')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_sources() {
        let (_dir, index) = setup();
        let mut m = memory("one", &[], &[]);
        m.source = Some("/abs/a.md".to_string());
        index.insert(&m).unwrap();
        index.insert(&memory("two", &[], &[])).unwrap();
        assert_eq!(
            index.sources().unwrap(),
            vec![("one".to_string(), "/abs/a.md".to_string())]
        );
        index.set_source("one", Some("proj:a.md")).unwrap();
        assert_eq!(
            index.fetch("one").unwrap().source.as_deref(),
            Some("proj:a.md")
        );
    }

    #[test]
    fn test_corrupt_timestamp_is_index_error() {
        let (_dir, index) = setup();
        index.insert(&memory("alpha", &[], &[])).unwrap();
        let conn = index.connect().unwrap();
        conn.execute(
            "UPDATE memories SET accessed_at = 'yesterday' WHERE id = 'alpha'",
            [],
        )
        .unwrap();
        assert!(matches!(index.fetch("alpha"), Err(LtmError::Index(_))));
    }
}
