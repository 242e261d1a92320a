//! The operation table: every tool the server exposes, its JSON input schema and a
//! typed handler.

use crate::config::save_config;
use ltm_memory::origin::validate_origin;
use ltm_memory::MemorySubstrate;
use ltm_types::config::LtmConfig;
use ltm_types::error::{LtmError, LtmResult};
use ltm_types::memory::{
    MemoryChanges, MemoryQuery, NewMemory, StaleFilter, DEFAULT_RELATED_LIMIT,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Mutex;

/// State shared by every tool call.
pub struct ToolContext {
    substrate: MemorySubstrate,
    config: Mutex<LtmConfig>,
    config_path: PathBuf,
}

impl ToolContext {
    pub fn new(substrate: MemorySubstrate, config: LtmConfig, config_path: PathBuf) -> Self {
        Self {
            substrate,
            config: Mutex::new(config),
            config_path,
        }
    }

    /// Apply `edit` to the config and write it back to disk.
    fn persist_config(&self, edit: impl FnOnce(&mut LtmConfig)) -> LtmResult<()> {
        let mut config = self
            .config
            .lock()
            .map_err(|e| LtmError::Internal(e.to_string()))?;
        edit(&mut config);
        save_config(&self.config_path, &config)
    }
}

/// One entry in the tool table.
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: fn() -> Value,
    pub handler: fn(&ToolContext, Value) -> LtmResult<Value>,
}

/// Every tool, in the order `tools/list` reports them.
pub static TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "store_memory",
        description: "Store a new long-term memory with tags for later retrieval.",
        input_schema: store_schema,
        handler: store_memory,
    },
    ToolSpec {
        name: "query_memories",
        description: "Search memories by tags. Returns memories with highest tag overlap.",
        input_schema: query_schema,
        handler: query_memories,
    },
    ToolSpec {
        name: "get_memory",
        description: "Retrieve a specific memory by ID. Updates access stats.",
        input_schema: id_schema,
        handler: get_memory,
    },
    ToolSpec {
        name: "update_memory",
        description: "Update an existing memory's title, content, tags, links, or source.",
        input_schema: update_schema,
        handler: update_memory,
    },
    ToolSpec {
        name: "delete_memory",
        description: "Delete a memory permanently.",
        input_schema: id_schema,
        handler: delete_memory,
    },
    ToolSpec {
        name: "get_stale_memories",
        description: "Find memories that might be candidates for pruning or consolidation.",
        input_schema: stale_schema,
        handler: get_stale_memories,
    },
    ToolSpec {
        name: "get_tags",
        description: "Get all tags with usage counts. Use to discover existing tags before storing.",
        input_schema: tags_schema,
        handler: get_tags,
    },
    ToolSpec {
        name: "get_related_tags",
        description: "Find tags that frequently co-occur with given tags. Useful for query expansion.",
        input_schema: related_schema,
        handler: get_related_tags,
    },
    ToolSpec {
        name: "list_origins",
        description: "List configured origin directories. Origins allow short source paths like 'proj:notes/file.md'.",
        input_schema: empty_schema,
        handler: list_origins,
    },
    ToolSpec {
        name: "add_origin",
        description: "Add or update an origin directory mapping. Existing sources under it are shortened.",
        input_schema: add_origin_schema,
        handler: add_origin,
    },
    ToolSpec {
        name: "remove_origin",
        description: "Remove an origin directory mapping. Sources already using it are left as they are.",
        input_schema: name_schema,
        handler: remove_origin,
    },
    ToolSpec {
        name: "reindex_memories",
        description: "Rebuild the index from the markdown files: index orphaned files, drop rows whose file is gone.",
        input_schema: empty_schema,
        handler: reindex_memories,
    },
];

/// Look up a tool by name.
pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}

/// Run the named tool with JSON arguments.
pub fn call_tool(ctx: &ToolContext, name: &str, args: Value) -> LtmResult<Value> {
    let tool =
        find_tool(name).ok_or_else(|| LtmError::InvalidInput(format!("Unknown tool: {name}")))?;
    (tool.handler)(ctx, args)
}

/// Tool descriptors in MCP `tools/list` form.
pub fn tool_descriptors() -> Vec<Value> {
    TOOLS
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "inputSchema": (t.input_schema)(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct IdArgs {
    id: String,
}

#[derive(Deserialize)]
struct UpdateArgs {
    id: String,
    #[serde(flatten)]
    changes: MemoryChanges,
}

#[derive(Deserialize)]
struct TagsArgs {
    #[serde(default = "default_examples_per_tag")]
    examples_per_tag: usize,
}

fn default_examples_per_tag() -> usize {
    1
}

#[derive(Deserialize)]
struct RelatedArgs {
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_related_limit")]
    limit: usize,
}

fn default_related_limit() -> usize {
    DEFAULT_RELATED_LIMIT
}

#[derive(Deserialize)]
struct AddOriginArgs {
    name: String,
    path: PathBuf,
}

#[derive(Deserialize)]
struct NameArgs {
    name: String,
}

fn parse_args<T: DeserializeOwned>(args: Value) -> LtmResult<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| LtmError::InvalidInput(e.to_string()))
}

fn to_json<T: Serialize>(value: &T) -> LtmResult<Value> {
    serde_json::to_value(value).map_err(|e| LtmError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn store_memory(ctx: &ToolContext, args: Value) -> LtmResult<Value> {
    let input: NewMemory = parse_args(args)?;
    to_json(&ctx.substrate.store(input)?)
}

fn query_memories(ctx: &ToolContext, args: Value) -> LtmResult<Value> {
    let query: MemoryQuery = parse_args(args)?;
    let hits = ctx.substrate.query(&query)?;
    Ok(json!({ "count": hits.len(), "memories": to_json(&hits)? }))
}

fn get_memory(ctx: &ToolContext, args: Value) -> LtmResult<Value> {
    let IdArgs { id } = parse_args(args)?;
    to_json(&ctx.substrate.get(&id)?)
}

fn update_memory(ctx: &ToolContext, args: Value) -> LtmResult<Value> {
    let UpdateArgs { id, changes } = parse_args(args)?;
    if changes.is_empty() {
        return Err(LtmError::InvalidInput(
            "Nothing to update: pass at least one of title, tags, summary, content, links, source"
                .to_string(),
        ));
    }
    let memory = ctx.substrate.update(&id, changes)?;
    Ok(json!({ "updated": true, "memory": to_json(&memory)? }))
}

fn delete_memory(ctx: &ToolContext, args: Value) -> LtmResult<Value> {
    let IdArgs { id } = parse_args(args)?;
    if !ctx.substrate.delete(&id)? {
        return Err(LtmError::NotFound(id));
    }
    Ok(json!({ "deleted": true, "id": id }))
}

fn get_stale_memories(ctx: &ToolContext, args: Value) -> LtmResult<Value> {
    let filter: StaleFilter = parse_args(args)?;
    let stale = ctx.substrate.stale(filter)?;
    Ok(json!({ "count": stale.len(), "memories": to_json(&stale)? }))
}

fn get_tags(ctx: &ToolContext, args: Value) -> LtmResult<Value> {
    let TagsArgs { examples_per_tag } = parse_args(args)?;
    let tags = ctx.substrate.tags(examples_per_tag)?;
    Ok(json!({ "count": tags.len(), "tags": to_json(&tags)? }))
}

fn get_related_tags(ctx: &ToolContext, args: Value) -> LtmResult<Value> {
    let RelatedArgs { tags, limit } = parse_args(args)?;
    let related = ctx.substrate.related_tags(&tags, limit)?;
    Ok(json!({ "related_tags": to_json(&related)? }))
}

fn list_origins(ctx: &ToolContext, _args: Value) -> LtmResult<Value> {
    let origins = ctx.substrate.list_origins()?;
    Ok(json!({ "origins": to_json(&origins)? }))
}

fn add_origin(ctx: &ToolContext, args: Value) -> LtmResult<Value> {
    let AddOriginArgs { name, path } = parse_args(args)?;
    // Saved before any source is contracted, so a restart can always expand them.
    let origin = validate_origin(&name, &path)?;
    let root = origin.root.to_string_lossy().into_owned();
    ctx.persist_config(|config| {
        config.origins.insert(origin.name.clone(), root);
    })?;
    to_json(&ctx.substrate.add_origin(&origin.name, &origin.root)?)
}

fn remove_origin(ctx: &ToolContext, args: Value) -> LtmResult<Value> {
    let NameArgs { name } = parse_args(args)?;
    let name = name.trim().to_string();
    if !ctx.substrate.remove_origin(&name)? {
        return Err(LtmError::InvalidInput(format!("Unknown origin: {name}")));
    }
    ctx.persist_config(|config| {
        config.origins.remove(&name);
    })?;
    Ok(json!({ "removed": true, "name": name }))
}

fn reindex_memories(ctx: &ToolContext, _args: Value) -> LtmResult<Value> {
    to_json(&ctx.substrate.reindex()?)
}

// ---------------------------------------------------------------------------
// Input schemas
// ---------------------------------------------------------------------------

fn string_list(description: &str) -> Value {
    json!({ "type": "array", "items": { "type": "string" }, "description": description })
}

fn store_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string", "description": "Short title for the memory (3-8 words). Becomes the ID unless one is given." },
            "id": { "type": "string", "description": "Explicit ID (lowercase letters, digits and hyphens)." },
            "tags": string_list("Tags for retrieval. Use existing tags when possible (check with get_tags first)."),
            "summary": { "type": "string", "description": "1-2 sentence summary of the memory." },
            "content": { "type": "string", "description": "Full content in markdown." },
            "links": string_list("IDs of related memories to link to. Unknown IDs are dropped."),
            "source": { "type": "string", "description": "Path to the source document (absolute or origin:path). Shortened using configured origins." }
        },
        "required": ["title", "tags", "summary", "content"]
    })
}

fn query_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tags": string_list("Tags to search for. Results ranked by overlap count."),
            "required_tags": string_list("Tags that must ALL be present (filter, not scoring)."),
            "limit": { "type": "integer", "description": "Maximum results to return (default 10)." },
            "include_content": { "type": "boolean", "description": "Include full content and links in results (default false)." }
        },
        "required": ["tags"]
    })
}

fn id_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string", "description": "Memory ID (the file name without .md)." }
        },
        "required": ["id"]
    })
}

fn update_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string", "description": "Memory ID to update." },
            "title": { "type": "string", "description": "New title (does not change the ID)." },
            "tags": string_list("New tags (replaces existing)."),
            "summary": { "type": "string", "description": "New summary." },
            "content": { "type": "string", "description": "New content." },
            "links": string_list("New links (replaces existing)."),
            "source": { "type": "string", "description": "New source path. An empty string clears it." }
        },
        "required": ["id"]
    })
}

fn stale_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "max_access_count": { "type": "integer", "description": "Only memories accessed at most this many times." },
            "min_age_days": { "type": "integer", "description": "Only memories not accessed for at least this many days." }
        }
    })
}

fn tags_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "examples_per_tag": { "type": "integer", "description": "Example summaries per tag (default 1, 0 for none)." }
        }
    })
}

fn related_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tags": string_list("Tags to find related tags for."),
            "limit": { "type": "integer", "description": "Maximum related tags to return (default 10)." }
        },
        "required": ["tags"]
    })
}

fn add_origin_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "description": "Origin name (e.g. 'proj', 'notes')." },
            "path": { "type": "string", "description": "Absolute path to the origin directory (~ allowed)." }
        },
        "required": ["name", "path"]
    })
}

fn name_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "description": "Origin name to remove." }
        },
        "required": ["name"]
    })
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Build a context rooted in `dir`, for tests.
#[cfg(test)]
pub(crate) fn test_context(dir: &std::path::Path) -> ToolContext {
    let substrate = MemorySubstrate::open(
        &dir.join("memories"),
        ltm_memory::origin::OriginMapper::new(),
    )
    .unwrap();
    ToolContext::new(substrate, LtmConfig::default(), dir.join("config.toml"))
}
