//! Pairwise tag co-occurrence counts.
//!
//! Each unordered pair of distinct tags is one row with `tag_a < tag_b`. A pair's count
//! is the number of memories carrying both tags; pairs at zero have no row.

use ltm_types::error::{LtmError, LtmResult};
use ltm_types::memory::RelatedTag;
use rusqlite::Connection;
use std::collections::BTreeSet;

/// Canonical unordered tag pair.
pub type TagPair = (String, String);

/// Every unordered pair of distinct tags in `tags`, canonically ordered.
pub fn tag_pairs<S: AsRef<str>>(tags: &[S]) -> BTreeSet<TagPair> {
    let mut pairs = BTreeSet::new();
    for (i, a) in tags.iter().enumerate() {
        for b in &tags[i + 1..] {
            let (a, b) = (a.as_ref(), b.as_ref());
            match a.cmp(b) {
                std::cmp::Ordering::Less => pairs.insert((a.to_string(), b.to_string())),
                std::cmp::Ordering::Greater => pairs.insert((b.to_string(), a.to_string())),
                std::cmp::Ordering::Equal => false,
            };
        }
    }
    pairs
}

/// Maintains the `tag_cooccurrence` table within the caller's connection or transaction.
pub struct CooccurrenceLedger<'c> {
    conn: &'c Connection,
}

impl<'c> CooccurrenceLedger<'c> {
    /// Wrap a connection (a `Transaction` derefs to one).
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Add one to every pair drawn from `tags`, creating rows as needed.
    pub fn increment<S: AsRef<str>>(&self, tags: &[S]) -> LtmResult<()> {
        self.increment_pairs(&tag_pairs(tags))
    }

    /// Subtract one from every pair drawn from `tags`, deleting rows that reach zero.
    pub fn decrement<S: AsRef<str>>(&self, tags: &[S]) -> LtmResult<()> {
        self.decrement_pairs(&tag_pairs(tags))
    }

    /// Move from `old` to `new` tag sets touching only the pairs that differ.
    pub fn replace<S: AsRef<str>, T: AsRef<str>>(&self, old: &[S], new: &[T]) -> LtmResult<()> {
        let old_pairs = tag_pairs(old);
        let new_pairs = tag_pairs(new);
        let gone: BTreeSet<TagPair> = old_pairs.difference(&new_pairs).cloned().collect();
        let added: BTreeSet<TagPair> = new_pairs.difference(&old_pairs).cloned().collect();
        self.decrement_pairs(&gone)?;
        self.increment_pairs(&added)
    }

    fn increment_pairs(&self, pairs: &BTreeSet<TagPair>) -> LtmResult<()> {
        for (a, b) in pairs {
            self.conn
                .execute(
                    "INSERT INTO tag_cooccurrence (tag_a, tag_b, count) VALUES (?1, ?2, 1)
                     ON CONFLICT(tag_a, tag_b) DO UPDATE SET count = count + 1",
                    rusqlite::params![a, b],
                )
                .map_err(|e| LtmError::Index(e.to_string()))?;
        }
        Ok(())
    }

    fn decrement_pairs(&self, pairs: &BTreeSet<TagPair>) -> LtmResult<()> {
        for (a, b) in pairs {
            // Delete first so the row never holds a count below one.
            self.conn
                .execute(
                    "DELETE FROM tag_cooccurrence WHERE tag_a = ?1 AND tag_b = ?2 AND count <= 1",
                    rusqlite::params![a, b],
                )
                .map_err(|e| LtmError::Index(e.to_string()))?;
            self.conn
                .execute(
                    "UPDATE tag_cooccurrence SET count = count - 1 WHERE tag_a = ?1 AND tag_b = ?2",
                    rusqlite::params![a, b],
                )
                .map_err(|e| LtmError::Index(e.to_string()))?;
        }
        Ok(())
    }

    /// Current count for a pair (zero when absent).
    pub fn count(&self, a: &str, b: &str) -> LtmResult<u64> {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        let result = self.conn.query_row(
            "SELECT count FROM tag_cooccurrence WHERE tag_a = ?1 AND tag_b = ?2",
            rusqlite::params![a, b],
            |row| row.get::<_, i64>(0),
        );
        match result {
            Ok(n) => Ok(n.max(0) as u64),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(LtmError::Index(e.to_string())),
        }
    }

    /// Tags co-occurring with any of `tags` (but not in it), ranked by summed count.
    pub fn related<S: AsRef<str>>(&self, tags: &[S], limit: usize) -> LtmResult<Vec<RelatedTag>> {
        if tags.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; tags.len()].join(",");
        let sql = format!(
            "SELECT CASE WHEN tag_a IN ({placeholders}) THEN tag_b ELSE tag_a END AS related,
                    SUM(count) AS score
             FROM tag_cooccurrence
             WHERE (tag_a IN ({placeholders})) <> (tag_b IN ({placeholders}))
             GROUP BY related
             ORDER BY score DESC, related ASC
             LIMIT ?"
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        for _ in 0..3 {
            for tag in tags {
                params.push(Box::new(tag.as_ref().to_string()));
            }
        }
        params.push(Box::new(limit as i64));
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| LtmError::Index(e.to_string()))?;
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok(RelatedTag {
                    tag: row.get(0)?,
                    score: row.get::<_, i64>(1)?.max(0) as u64,
                })
            })
            .map_err(|e| LtmError::Index(e.to_string()))?;

        let mut related = Vec::new();
        for row in rows {
            related.push(row.map_err(|e| LtmError::Index(e.to_string()))?);
        }
        Ok(related)
    }
}
