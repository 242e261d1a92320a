//! Read-only queries over the index: tag-overlap ranking, staleness and related tags.

use crate::cooccurrence::CooccurrenceLedger;
use crate::index::{parse_ts, ts, RelationalIndex};
use crate::tags::normalize_tags;
use chrono::Utc;
use ltm_types::error::{LtmError, LtmResult};
use ltm_types::memory::{MemoryHit, MemoryQuery, RelatedTag, StaleFilter, StaleMemory};
use rusqlite::types::ToSql;

/// Maximum number of link suggestions returned by `store`.
pub const MAX_SUGGESTED_LINKS: usize = 5;

/// Query engine over a [`RelationalIndex`]. Never touches the markdown store.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    index: RelationalIndex,
}

impl QueryEngine {
    pub fn new(index: RelationalIndex) -> Self {
        Self { index }
    }

    /// Rank memories by how many of the query tags they carry.
    ///
    /// Hits must carry every required tag and at least one tag from the union of
    /// `tags` and `required_tags`. With no tags at all the newest memories are returned;
    /// tags that all normalize to nothing match nothing.
    /// `content` and `links` are left empty; `source` is the stored (unexpanded) form.
    pub fn query(&self, query: &MemoryQuery) -> LtmResult<Vec<MemoryHit>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let required = normalize_tags(&query.required_tags);
        let mut wanted = normalize_tags(&query.tags);
        let asked = !query.tags.is_empty() || !query.required_tags.is_empty();
        if asked && wanted.is_empty() && required.is_empty() {
            // Every tag normalized away: nothing can match.
            return Ok(Vec::new());
        }
        for tag in &required {
            if !wanted.contains(tag) {
                wanted.push(tag.clone());
            }
        }
        self.ranked(&wanted, &required, None, query.limit)
    }

    /// Identifiers of up to [`MAX_SUGGESTED_LINKS`] other memories sharing tags with `id`.
    pub fn suggest_links(&self, id: &str, tags: &[String]) -> LtmResult<Vec<String>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let hits = self.ranked(tags, &[], Some(id), MAX_SUGGESTED_LINKS)?;
        Ok(hits.into_iter().map(|h| h.id).collect())
    }

    fn ranked(
        &self,
        wanted: &[String],
        required: &[String],
        exclude: Option<&str>,
        limit: usize,
    ) -> LtmResult<Vec<MemoryHit>> {
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        let sql = if wanted.is_empty() {
            let mut sql = String::from(
                "SELECT m.id, m.title, m.summary, m.source, m.created_at, m.accessed_at, 0,
                        (SELECT GROUP_CONCAT(t.tag) FROM memory_tags t WHERE t.memory_id = m.id)
                 FROM memories m",
            );
            if let Some(id) = exclude {
                sql.push_str(" WHERE m.id <> ?");
                params.push(Box::new(id.to_string()));
            }
            sql.push_str(" ORDER BY m.created_at DESC, m.id ASC LIMIT ?");
            sql
        } else {
            let placeholders = vec!["?"; wanted.len()].join(",");
            let mut sql = format!(
                "SELECT m.id, m.title, m.summary, m.source, m.created_at, m.accessed_at,
                        COUNT(DISTINCT mt.tag) AS overlap,
                        (SELECT GROUP_CONCAT(t.tag) FROM memory_tags t WHERE t.memory_id = m.id)
                 FROM memories m
                 JOIN memory_tags mt ON mt.memory_id = m.id
                 WHERE mt.tag IN ({placeholders})"
            );
            for tag in wanted {
                params.push(Box::new(tag.clone()));
            }
            if !required.is_empty() {
                let placeholders = vec!["?"; required.len()].join(",");
                sql.push_str(&format!(
                    " AND m.id IN (SELECT memory_id FROM memory_tags WHERE tag IN ({placeholders})
                       GROUP BY memory_id HAVING COUNT(DISTINCT tag) = ?)"
                ));
                for tag in required {
                    params.push(Box::new(tag.clone()));
                }
                params.push(Box::new(required.len() as i64));
            }
            if let Some(id) = exclude {
                sql.push_str(" AND m.id <> ?");
                params.push(Box::new(id.to_string()));
            }
            sql.push_str(
                " GROUP BY m.id ORDER BY overlap DESC, m.accessed_at DESC, m.id ASC LIMIT ?",
            );
            sql
        };
        params.push(Box::new(limit as i64));
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let conn = self.index.connect()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LtmError::Index(e.to_string()))?;
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })
            .map_err(|e| LtmError::Index(e.to_string()))?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, title, summary, source, created, accessed, overlap, all_tags) =
                row.map_err(|e| LtmError::Index(e.to_string()))?;
            let mut tags: Vec<String> = all_tags
                .unwrap_or_default()
                .split(',')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            tags.sort();
            hits.push(MemoryHit {
                id,
                title,
                summary,
                tags,
                overlap: overlap.max(0) as u32,
                created_at: parse_ts(&created)?,
                accessed_at: parse_ts(&accessed)?,
                source,
                source_warning: None,
                content: None,
                links: None,
            });
        }
        Ok(hits)
    }

    /// Pruning candidates: rarely read and not read recently.
    pub fn stale(&self, filter: StaleFilter) -> LtmResult<Vec<StaleMemory>> {
        let mut sql = String::from(
            "SELECT id, title, summary, created_at, accessed_at, access_count
             FROM memories WHERE 1 = 1",
        );
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(max) = filter.max_access_count {
            sql.push_str(" AND access_count <= ?");
            params.push(Box::new(i64::try_from(max).unwrap_or(i64::MAX)));
        }
        if let Some(days) = filter.min_age_days {
            if days < 0 {
                return Err(LtmError::InvalidInput(format!(
                    "min_age_days must not be negative (got {days})"
                )));
            }
            // Nothing can be older than the earliest representable time.
            let Some(cutoff) =
                chrono::Duration::try_days(days).and_then(|d| Utc::now().checked_sub_signed(d))
            else {
                return Ok(Vec::new());
            };
            sql.push_str(" AND accessed_at < ?");
            params.push(Box::new(ts(&cutoff)));
        }
        sql.push_str(" ORDER BY access_count ASC, accessed_at ASC, id ASC");
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let conn = self.index.connect()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LtmError::Index(e.to_string()))?;
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .map_err(|e| LtmError::Index(e.to_string()))?;

        let mut stale = Vec::new();
        for row in rows {
            let (id, title, summary, created, accessed, count) =
                row.map_err(|e| LtmError::Index(e.to_string()))?;
            stale.push(StaleMemory {
                id,
                title,
                summary,
                created_at: parse_ts(&created)?,
                accessed_at: parse_ts(&accessed)?,
                access_count: count.max(0) as u64,
            });
        }
        Ok(stale)
    }

    /// Tags that co-occur with `tags`, strongest first.
    ///
    /// An empty (or entirely blank) tag list returns nothing without opening the index.
    pub fn related_tags<S: AsRef<str>>(&self, tags: &[S], limit: usize) -> LtmResult<Vec<RelatedTag>> {
        let tags = normalize_tags(tags);
        if tags.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let conn = self.index.connect()?;
        CooccurrenceLedger::new(&conn).related(&tags, limit)
    }
}
