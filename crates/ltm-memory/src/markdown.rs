//! Markdown store: one file per memory, YAML frontmatter followed by the body.
//!
//! ```text
//! ---
//! id: pytest-stop-on-first-failure
//! title: Pytest Stop on First Failure
//! tags:
//! - python
//! - testing
//! summary: Use -x to stop after the first failure.
//! created_at: 2026-10-19T09:12:44.125000Z
//! accessed_at: 2026-10-19T09:12:44.125000Z
//! access_count: 0
//! links: []
//! source: proj:notes/pytest.md
//! ---
//!
//! # Pytest Stop on First Failure
//!
//! Body text...
//! ```

use crate::guard::IdentifierGuard;
use chrono::{DateTime, Utc};
use ltm_types::error::{LtmError, LtmResult};
use ltm_types::memory::Memory;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Frontmatter block as written to disk.
#[derive(Debug, Serialize, Deserialize)]
struct Frontmatter {
    id: String,
    title: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    summary: String,
    created_at: DateTime<Utc>,
    accessed_at: DateTime<Utc>,
    #[serde(default)]
    access_count: u64,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

/// Reads and writes memories as markdown files under the guard's base directory.
#[derive(Debug, Clone)]
pub struct MarkdownStore {
    guard: IdentifierGuard,
}

impl MarkdownStore {
    /// Create a markdown store rooted at `base_dir`.
    pub fn new(base_dir: &Path) -> LtmResult<Self> {
        Ok(Self {
            guard: IdentifierGuard::new(base_dir)?,
        })
    }

    /// The directory holding the markdown files.
    pub fn base_dir(&self) -> &Path {
        self.guard.base_dir()
    }

    /// The validated file path for `id`.
    pub fn path_for(&self, id: &str) -> LtmResult<PathBuf> {
        self.guard.resolve(id)
    }

    /// Whether a file exists for `id`.
    pub fn exists(&self, id: &str) -> LtmResult<bool> {
        Ok(self.guard.resolve(id)?.is_file())
    }

    /// Write the complete file for `memory`, replacing any previous version.
    ///
    /// The content goes to a sibling temp file first and is renamed into place, so a
    /// reader never observes a half-written memory.
    pub fn write(&self, memory: &Memory) -> LtmResult<()> {
        let path = self.guard.resolve(&memory.id)?;
        let rendered = render(memory)?;
        let tmp = path.with_extension("md.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(rendered.as_bytes())?;
            file.sync_all()?;
        }
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(id = %memory.id, path = %path.display(), "Wrote memory file");
        Ok(())
    }

    /// Read and parse the file for `id`.
    pub fn read(&self, id: &str) -> LtmResult<Memory> {
        let path = self.guard.resolve(id)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LtmError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        parse(id, &content)
    }

    /// Delete the file for `id`. Returns whether a file was removed; absence is not an error.
    pub fn delete(&self, id: &str) -> LtmResult<bool> {
        let path = self.guard.resolve(id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Identifiers of every `<slug>.md` file in the base directory, sorted.
    pub fn list_ids(&self) -> LtmResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(self.guard.base_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") || !path.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if crate::guard::validate_id(stem).is_ok() {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Render a memory to its on-disk form.
pub fn render(memory: &Memory) -> LtmResult<String> {
    let frontmatter = Frontmatter {
        id: memory.id.clone(),
        title: memory.title.clone(),
        tags: memory.tags.clone(),
        summary: memory.summary.clone(),
        created_at: memory.created_at,
        accessed_at: memory.accessed_at,
        access_count: memory.access_count,
        links: memory.links.clone(),
        source: memory.source.clone(),
    };
    let yaml = serde_yaml::to_string(&frontmatter)
        .map_err(|e| LtmError::Serialization(e.to_string()))?;
    Ok(format!(
        "---\n{yaml}---\n\n{}\n\n{}",
        heading(&memory.title),
        memory.content
    ))
}

/// Parse the on-disk form back into a memory.
///
/// `id` is the identifier the file was looked up by; a frontmatter `id` that disagrees
/// is a parse failure, since the file name is what the index is keyed on.
pub fn parse(id: &str, content: &str) -> LtmResult<Memory> {
    let fail = |reason: &str| LtmError::Parse {
        id: id.to_string(),
        reason: reason.to_string(),
    };
    let mut lines = content.split_inclusive('\n');
    let first = lines.next().unwrap_or("");
    if !is_delimiter(first) {
        return Err(fail("file must start with YAML frontmatter (---)"));
    }
    let yaml_start = first.len();
    let mut offset = yaml_start;
    let mut close = None;
    for line in lines {
        if is_delimiter(line) {
            close = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let (yaml_end, body_start) =
        close.ok_or_else(|| fail("missing closing --- after frontmatter"))?;
    let yaml = &content[yaml_start..yaml_end];
    let body = &content[body_start..];

    let fm: Frontmatter = serde_yaml::from_str(yaml)
        .map_err(|e| fail(&format!("invalid YAML frontmatter: {e}")))?;
    if fm.id != id {
        return Err(fail(&format!("frontmatter id {:?} does not match file name", fm.id)));
    }

    let body = strip_newline(body);
    let heading = heading(&fm.title);
    let body = match body.strip_prefix(heading.as_str()) {
        Some(after) if after.is_empty() || after.starts_with(['\n', '\r']) => {
            strip_newline(strip_newline(after))
        }
        _ => body,
    };

    Ok(Memory {
        id: fm.id,
        title: fm.title,
        tags: fm.tags,
        summary: fm.summary,
        content: body.to_string(),
        source: fm.source,
        created_at: fm.created_at,
        accessed_at: fm.accessed_at,
        access_count: fm.access_count,
        links: fm.links,
    })
}

/// A `---` frontmatter fence, with either line ending.
fn is_delimiter(line: &str) -> bool {
    matches!(line, "---\n" | "---\r\n")
}

fn strip_newline(text: &str) -> &str {
    text.strip_prefix("\r\n")
        .or_else(|| text.strip_prefix('\n'))
        .unwrap_or(text)
}

fn heading(title: &str) -> String {
    format!("# {}", title.replace('\n', " "))
}
