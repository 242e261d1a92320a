//! Memory types: stored memories, write requests, query payloads and origins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of results returned by tag queries.
pub const DEFAULT_QUERY_LIMIT: usize = 10;

/// Default number of related tags returned.
pub const DEFAULT_RELATED_LIMIT: usize = 10;

/// A single long-term memory, as held in both the markdown and the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Slug identifier, also the markdown file stem.
    pub id: String,
    /// Short human-readable title.
    pub title: String,
    /// Normalized tags, in order of first occurrence.
    pub tags: Vec<String>,
    /// One or two sentence summary.
    pub summary: String,
    /// Free-text markdown body.
    pub content: String,
    /// Source document reference (`origin:path` or absolute path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// When this memory was created.
    pub created_at: DateTime<Utc>,
    /// When this memory was last read or written.
    pub accessed_at: DateTime<Utc>,
    /// How many times this memory has been read.
    pub access_count: u64,
    /// Identifiers of linked memories.
    #[serde(default)]
    pub links: Vec<String>,
}

/// Input for storing a new memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewMemory {
    /// Explicit identifier. Derived from the title when absent.
    pub id: Option<String>,
    /// Short title.
    pub title: String,
    /// Raw tags; normalized and deduplicated on write.
    pub tags: Vec<String>,
    /// Summary line.
    pub summary: String,
    /// Markdown body.
    pub content: String,
    /// Proposed links; unresolvable identifiers are dropped.
    pub links: Vec<String>,
    /// Source path, contracted against known origins on write.
    pub source: Option<String>,
}

/// Partial update of an existing memory. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryChanges {
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub links: Option<Vec<String>>,
    /// An empty string clears the source.
    pub source: Option<String>,
}

impl MemoryChanges {
    /// True when no field would change.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.tags.is_none()
            && self.summary.is_none()
            && self.content.is_none()
            && self.links.is_none()
            && self.source.is_none()
    }
}

/// Result of a successful store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreOutcome {
    /// The identifier the memory was stored under.
    pub id: String,
    /// Other memories sharing the most tags with the new one.
    pub suggested_links: Vec<String>,
    /// Proposed links that did not resolve and were not stored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_links: Vec<String>,
}

/// A memory returned by `get`, with its source expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalledMemory {
    #[serde(flatten)]
    pub memory: Memory,
    /// Set when the stored source names an origin that is not registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_warning: Option<String>,
}

/// Tag-overlap query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryQuery {
    /// Tags to rank by overlap.
    pub tags: Vec<String>,
    /// Tags that must all be present (filter, not scoring).
    pub required_tags: Vec<String>,
    /// Maximum number of hits.
    pub limit: usize,
    /// Read body and links from the markdown store for each hit.
    pub include_content: bool,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            required_tags: Vec::new(),
            limit: DEFAULT_QUERY_LIMIT,
            include_content: false,
        }
    }
}

impl MemoryQuery {
    /// Query ranking by the given tags.
    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// One ranked query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: String,
    pub title: String,
    pub summary: String,
    /// Full tag set of the memory, sorted.
    pub tags: Vec<String>,
    /// Number of distinct query tags the memory carries.
    pub overlap: u32,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
}

/// A tag with its usage count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    /// Number of memories carrying this tag.
    pub count: u64,
    /// Summaries of recently accessed memories carrying this tag.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

/// A tag that co-occurs with a query set, with its summed co-occurrence count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedTag {
    pub tag: String,
    pub score: u64,
}

/// Criteria for selecting pruning candidates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaleFilter {
    /// Only memories accessed at most this many times.
    pub max_access_count: Option<u64>,
    /// Only memories not accessed for at least this many days.
    pub min_age_days: Option<i64>,
}

/// A pruning candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleMemory {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

/// A named root directory used to shorten stored source paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub name: String,
    pub root: PathBuf,
}

/// Result of registering an origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginAdded {
    pub origin: Origin,
    /// Memories whose stored absolute source was rewritten to the new origin.
    pub contracted: Vec<String>,
}

/// Result of rebuilding the index from the markdown files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReindexReport {
    /// Markdown files that had no index row and were indexed.
    pub indexed: Vec<String>,
    /// Index rows that had no markdown file and were removed.
    pub removed: Vec<String>,
    /// Files that could not be parsed: (id, reason).
    pub failed: Vec<(String, String)>,
}
