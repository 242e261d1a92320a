//! MemorySubstrate: the single entry point that keeps the markdown store and the
//! relational index in step.

use crate::guard::slugify;
use crate::index::RelationalIndex;
use crate::markdown::MarkdownStore;
use crate::origin::{is_under, OriginMapper};
use crate::query::QueryEngine;
use crate::tags::normalize_tags;
use chrono::{DateTime, SubsecRound, Utc};
use ltm_types::error::{LtmError, LtmResult};
use ltm_types::memory::{
    Memory, MemoryChanges, MemoryHit, MemoryQuery, NewMemory, Origin, OriginAdded,
    RecalledMemory, ReindexReport, RelatedTag, StaleFilter, StaleMemory, StoreOutcome, TagCount,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// File name of the SQLite index inside the memory directory.
pub const INDEX_FILE: &str = "index.db";

/// The storage engine.
///
/// Write ordering is fixed: the markdown file is written (or deleted) first and the
/// index second. There is no transaction spanning both; a failure in between leaves an
/// orphaned markdown file that [`MemorySubstrate::reindex`] picks up again.
pub struct MemorySubstrate {
    markdown: MarkdownStore,
    index: RelationalIndex,
    queries: QueryEngine,
    origins: RwLock<OriginMapper>,
}

impl MemorySubstrate {
    /// Open the memory directory (creating it if needed) and its index.
    pub fn open(memory_dir: &Path, origins: OriginMapper) -> LtmResult<Self> {
        let markdown = MarkdownStore::new(memory_dir)?;
        let index = RelationalIndex::open(&markdown.base_dir().join(INDEX_FILE))?;
        debug!(dir = %markdown.base_dir().display(), "Opened memory substrate");
        Ok(Self {
            queries: QueryEngine::new(index.clone()),
            markdown,
            index,
            origins: RwLock::new(origins),
        })
    }

    /// The directory holding the markdown files and the index.
    pub fn memory_dir(&self) -> &Path {
        self.markdown.base_dir()
    }

    /// Store a new memory.
    pub fn store(&self, input: NewMemory) -> LtmResult<StoreOutcome> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(LtmError::InvalidInput("title must not be empty".to_string()));
        }
        let id = match input.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => {
                self.markdown.path_for(id)?;
                if self.is_taken(id)? {
                    return Err(LtmError::AlreadyExists(id.to_string()));
                }
                id.to_string()
            }
            None => self.unused_id(&slugify(&title))?,
        };

        let tags = normalize_tags(&input.tags);
        let (links, dropped_links) = self.resolve_links(&id, &input.links)?;
        let source = match input.source.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => Some(self.read_origins()?.contract(s)),
            _ => None,
        };
        let now = now();
        let memory = Memory {
            id: id.clone(),
            title,
            tags,
            summary: input.summary,
            content: input.content,
            source,
            created_at: now,
            accessed_at: now,
            access_count: 0,
            links,
        };

        self.markdown.write(&memory)?;
        self.index.insert(&memory).map_err(|e| index_phase_failed(&id, e))?;

        let suggested_links = self
            .queries
            .suggest_links(&id, &memory.tags)
            .unwrap_or_else(|e| {
                warn!(id = %id, error = %e, "Failed to compute link suggestions");
                Vec::new()
            });
        info!(id = %id, tags = memory.tags.len(), "Stored memory");
        Ok(StoreOutcome {
            id,
            suggested_links,
            dropped_links,
        })
    }

    /// Read a memory and record the access.
    ///
    /// The returned source is expanded against the registered origins.
    pub fn get(&self, id: &str) -> LtmResult<RecalledMemory> {
        self.markdown.path_for(id)?;
        let row = self.index.fetch(id)?;
        let mut memory = self.markdown.read(id)?;

        let now = now();
        memory.accessed_at = now;
        memory.access_count = row.access_count + 1;
        self.markdown.write(&memory)?;
        self.index.touch_access(id, now)?;

        let mut source_warning = None;
        if let Some(stored) = memory.source.take() {
            let expanded = self.read_origins()?.resolve(&stored);
            memory.source = Some(expanded.path);
            source_warning = expanded.warning;
        }
        Ok(RecalledMemory {
            memory,
            source_warning,
        })
    }

    /// Apply `changes` to an existing memory. Returns the memory as stored.
    pub fn update(&self, id: &str, changes: MemoryChanges) -> LtmResult<Memory> {
        self.markdown.path_for(id)?;
        let row = self.index.fetch(id)?;
        let mut memory = self.markdown.read(id)?;

        if let Some(title) = changes.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(LtmError::InvalidInput("title must not be empty".to_string()));
            }
            memory.title = title.to_string();
        }
        if let Some(tags) = changes.tags {
            memory.tags = normalize_tags(&tags);
        }
        if let Some(summary) = changes.summary {
            memory.summary = summary;
        }
        if let Some(content) = changes.content {
            memory.content = content;
        }
        if let Some(links) = changes.links {
            let (links, dropped) = self.resolve_links(id, &links)?;
            if !dropped.is_empty() {
                debug!(id, dropped = ?dropped, "Dropped unresolvable links");
            }
            memory.links = links;
        }
        if let Some(source) = changes.source {
            let source = source.trim();
            memory.source = if source.is_empty() {
                None
            } else {
                Some(self.read_origins()?.contract(source))
            };
        }
        memory.accessed_at = now();
        memory.access_count = row.access_count;

        self.markdown.write(&memory)?;
        self.index.update(&memory).map_err(|e| index_phase_failed(id, e))?;
        info!(id, "Updated memory");
        Ok(memory)
    }

    /// Delete a memory. Returns false if neither a file nor an index row existed.
    pub fn delete(&self, id: &str) -> LtmResult<bool> {
        self.markdown.path_for(id)?;
        let file_result = self.markdown.delete(id);
        let row_removed = self.index.remove(id)?;
        let file_removed = match file_result {
            Ok(removed) => removed,
            Err(e) => {
                warn!(id, error = %e, "Index row removed but markdown file could not be deleted");
                return Err(e);
            }
        };
        if file_removed || row_removed {
            info!(id, "Deleted memory");
        }
        Ok(file_removed || row_removed)
    }

    /// Rank memories by tag overlap.
    pub fn query(&self, query: &MemoryQuery) -> LtmResult<Vec<MemoryHit>> {
        let mut hits = self.queries.query(query)?;
        let origins = self.read_origins()?;
        for hit in &mut hits {
            if let Some(stored) = hit.source.take() {
                let expanded = origins.resolve(&stored);
                hit.source = Some(expanded.path);
                hit.source_warning = expanded.warning;
            }
            if query.include_content {
                let memory = self.markdown.read(&hit.id)?;
                hit.content = Some(memory.content);
                hit.links = Some(memory.links);
            }
        }
        Ok(hits)
    }

    /// Pruning candidates.
    pub fn stale(&self, filter: StaleFilter) -> LtmResult<Vec<StaleMemory>> {
        self.queries.stale(filter)
    }

    /// All tags with usage counts and example summaries.
    pub fn tags(&self, examples_per_tag: usize) -> LtmResult<Vec<TagCount>> {
        self.index.list_tags(examples_per_tag)
    }

    /// Tags that co-occur with `tags`.
    pub fn related_tags<S: AsRef<str>>(&self, tags: &[S], limit: usize) -> LtmResult<Vec<RelatedTag>> {
        self.queries.related_tags(tags, limit)
    }

    /// Registered origins, in registration order.
    pub fn list_origins(&self) -> LtmResult<Vec<Origin>> {
        Ok(self.read_origins()?.origins().to_vec())
    }

    /// Register an origin and contract every stored absolute source lying under it.
    pub fn add_origin(&self, name: &str, root: &Path) -> LtmResult<OriginAdded> {
        let origin = self.write_origins()?.add_origin(name, root)?;
        let origins = self.read_origins()?;

        let mut contracted = Vec::new();
        for (id, stored) in self.index.sources()? {
            if !is_under(&stored, &origin.root) {
                continue;
            }
            let short = origins.contract(&stored);
            if short == stored {
                continue;
            }
            let mut memory = match self.markdown.read(&id) {
                Ok(memory) => memory,
                Err(e) => {
                    warn!(id = %id, error = %e, "Skipping source rewrite for unreadable memory");
                    continue;
                }
            };
            memory.source = Some(short.clone());
            self.markdown.write(&memory)?;
            self.index.set_source(&id, Some(&short))?;
            contracted.push(id);
        }
        info!(
            origin = %origin.name,
            root = %origin.root.display(),
            rewritten = contracted.len(),
            "Registered origin"
        );
        Ok(OriginAdded { origin, contracted })
    }

    /// Forget an origin. Stored references to it are left as they are.
    pub fn remove_origin(&self, name: &str) -> LtmResult<bool> {
        let removed = self.write_origins()?.remove_origin(name);
        if removed {
            info!(origin = name, "Removed origin");
        }
        Ok(removed)
    }

    /// Reconcile the index with the markdown files.
    ///
    /// Files without an index row are parsed and indexed (rows first, links second, so
    /// recovered memories can link to each other). Rows without a file are removed.
    /// Memories present in both are left alone.
    pub fn reindex(&self) -> LtmResult<ReindexReport> {
        let files = self.markdown.list_ids()?;
        let indexed: HashSet<String> = self.index.ids()?.into_iter().collect();
        let mut report = ReindexReport::default();

        let mut recovered: Vec<(String, Vec<String>)> = Vec::new();
        for id in files.iter().filter(|id| !indexed.contains(*id)) {
            let mut memory = match self.markdown.read(id) {
                Ok(memory) => memory,
                Err(e) => {
                    warn!(id = %id, error = %e, "Skipping unparseable memory file");
                    report.failed.push((id.clone(), e.to_string()));
                    continue;
                }
            };
            memory.tags = normalize_tags(&memory.tags);
            let links = std::mem::take(&mut memory.links);
            self.index.insert(&memory)?;
            recovered.push((memory.id, links));
        }
        for (id, links) in recovered {
            if !links.is_empty() {
                self.index.set_links(&id, &links)?;
            }
            report.indexed.push(id);
        }

        let on_disk: HashSet<&String> = files.iter().collect();
        let mut stale_rows: Vec<&String> = indexed.iter().filter(|id| !on_disk.contains(id)).collect();
        stale_rows.sort();
        for id in stale_rows {
            self.index.remove(id)?;
            report.removed.push(id.clone());
        }

        info!(
            indexed = report.indexed.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Reindexed memories"
        );
        Ok(report)
    }

    fn is_taken(&self, id: &str) -> LtmResult<bool> {
        Ok(self.index.contains(id)? || self.markdown.exists(id)?)
    }

    /// `base`, or `base-2`, `base-3`, ... whichever is free first.
    fn unused_id(&self, base: &str) -> LtmResult<String> {
        let mut candidate = base.to_string();
        let mut n = 1;
        while self.is_taken(&candidate)? {
            n += 1;
            candidate = format!("{base}-{n}");
        }
        self.markdown.path_for(&candidate)?;
        Ok(candidate)
    }

    /// Split proposed links into those that resolve and those that do not.
    /// Self links and malformed identifiers are dropped.
    fn resolve_links(&self, id: &str, proposed: &[String]) -> LtmResult<(Vec<String>, Vec<String>)> {
        let mut candidates: Vec<String> = Vec::new();
        let mut dropped: Vec<String> = Vec::new();
        for link in proposed {
            let link = link.trim();
            if link.is_empty() || candidates.iter().any(|c| c == link) || dropped.iter().any(|d| d == link) {
                continue;
            }
            if link == id || crate::guard::validate_id(link).is_err() {
                dropped.push(link.to_string());
            } else {
                candidates.push(link.to_string());
            }
        }
        let existing = self.index.existing(&candidates)?;
        let (links, missing): (Vec<String>, Vec<String>) =
            candidates.into_iter().partition(|c| existing.contains(c));
        dropped.extend(missing);
        Ok((links, dropped))
    }

    fn read_origins(&self) -> LtmResult<RwLockReadGuard<'_, OriginMapper>> {
        self.origins
            .read()
            .map_err(|e| LtmError::Internal(e.to_string()))
    }

    fn write_origins(&self) -> LtmResult<RwLockWriteGuard<'_, OriginMapper>> {
        self.origins
            .write()
            .map_err(|e| LtmError::Internal(e.to_string()))
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn index_phase_failed(id: &str, e: LtmError) -> LtmError {
    match e {
        LtmError::AlreadyExists(_) | LtmError::NotFound(_) => e,
        other => {
            warn!(id, error = %other, "Index write failed; markdown file left in place");
            LtmError::IndexWrite {
                id: id.to_string(),
                reason: other.to_string(),
            }
        }
    }
}
