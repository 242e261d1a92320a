//! Origin-relative source references.
//!
//! An origin is a named root directory. Absolute source paths under a known root are
//! stored as `name:relative/path` and expanded back on read, so memories survive the
//! root moving (update the origin, not every memory).

use ltm_types::config::LtmConfig;
use ltm_types::error::{LtmError, LtmResult};
use ltm_types::memory::Origin;
use std::path::{Component, Path, PathBuf};

/// Bidirectional mapping between `name:suffix` references and absolute paths.
#[derive(Debug, Clone, Default)]
pub struct OriginMapper {
    /// Registration order breaks ties between roots of equal length.
    origins: Vec<Origin>,
}

/// An expanded source reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedSource {
    pub path: String,
    /// Set when the reference names an unknown origin.
    pub warning: Option<String>,
}

impl OriginMapper {
    /// Create an empty mapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mapper from the configured origin table.
    pub fn from_config(config: &LtmConfig) -> LtmResult<Self> {
        let mut mapper = Self::new();
        for (name, root) in &config.origins {
            mapper.add_origin(name, Path::new(root))?;
        }
        Ok(mapper)
    }

    /// Registered origins, in registration order.
    pub fn origins(&self) -> &[Origin] {
        &self.origins
    }

    /// Look up an origin by name.
    pub fn get(&self, name: &str) -> Option<&Origin> {
        self.origins.iter().find(|o| o.name == name)
    }

    /// Register (or re-point) an origin. Returns the stored, normalized origin.
    pub fn add_origin(&mut self, name: &str, root: &Path) -> LtmResult<Origin> {
        let origin = validate_origin(name, root)?;
        match self.origins.iter_mut().find(|o| o.name == origin.name) {
            Some(existing) => *existing = origin.clone(),
            None => self.origins.push(origin.clone()),
        }
        Ok(origin)
    }

    /// Remove an origin. Sources already contracted against it stay as opaque strings.
    pub fn remove_origin(&mut self, name: &str) -> bool {
        let name = name.trim();
        let before = self.origins.len();
        self.origins.retain(|o| o.name != name);
        self.origins.len() != before
    }

    /// Contract an absolute path to `name:relative` using the longest matching root.
    /// Paths under no origin are returned unchanged.
    pub fn contract(&self, path: &str) -> String {
        let candidate = Path::new(path);
        if !candidate.is_absolute() {
            return path.to_string();
        }
        let normalized = lexical_normalize(candidate);
        let mut best: Option<(&Origin, PathBuf)> = None;
        for origin in &self.origins {
            let Ok(rel) = normalized.strip_prefix(&origin.root) else {
                continue;
            };
            if rel.as_os_str().is_empty() {
                continue;
            }
            let longer = best
                .as_ref()
                .map_or(true, |(b, _)| origin.root.as_os_str().len() > b.root.as_os_str().len());
            if longer {
                best = Some((origin, rel.to_path_buf()));
            }
        }
        match best {
            Some((origin, rel)) => format!("{}:{}", origin.name, path_to_slash(&rel)),
            None => path.to_string(),
        }
    }

    /// Expand a stored reference back to an absolute path.
    pub fn expand(&self, stored: &str) -> String {
        self.resolve(stored).path
    }

    /// Expand a stored reference, reporting references to unknown origins.
    pub fn resolve(&self, stored: &str) -> ExpandedSource {
        let unchanged = |warning: Option<String>| ExpandedSource {
            path: stored.to_string(),
            warning,
        };
        let Some((name, suffix)) = split_reference(stored) else {
            return unchanged(None);
        };
        match self.get(name) {
            Some(origin) => ExpandedSource {
                path: origin.root.join(suffix).to_string_lossy().into_owned(),
                warning: None,
            },
            None => unchanged(Some(format!(
                "Unknown origin '{name}'. Use list_origins to see available origins."
            ))),
        }
    }
}

/// True when `stored` is an absolute path lying strictly under `root`.
pub fn is_under(stored: &str, root: &Path) -> bool {
    let path = Path::new(stored);
    path.is_absolute()
        && lexical_normalize(path)
            .strip_prefix(root)
            .is_ok_and(|rel| !rel.as_os_str().is_empty())
}

/// Split `name:suffix`, ignoring absolute paths and Windows drive letters.
fn split_reference(stored: &str) -> Option<(&str, &str)> {
    if stored.starts_with('/') {
        return None;
    }
    let (name, suffix) = stored.split_once(':')?;
    let drive_letter = name.len() == 1 && name.chars().all(|c| c.is_ascii_alphabetic());
    if name.is_empty() || drive_letter {
        return None;
    }
    Some((name, suffix))
}

/// Check an origin name and normalize its root without registering anything.
pub fn validate_origin(name: &str, root: &Path) -> LtmResult<Origin> {
    let name = name.trim();
    if name.is_empty() || name.contains(':') || name.contains('/') || name.contains('\\') {
        return Err(LtmError::Config(format!(
            "Invalid origin name {name:?}: must be non-empty without ':' or path separators"
        )));
    }
    Ok(Origin {
        name: name.to_string(),
        root: normalize_root(root)?,
    })
}

fn normalize_root(root: &Path) -> LtmResult<PathBuf> {
    let expanded = match root.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .ok_or_else(|| LtmError::Config("Cannot resolve home directory".to_string()))?
            .join(rest),
        Err(_) => root.to_path_buf(),
    };
    if !expanded.is_absolute() {
        return Err(LtmError::Config(format!(
            "Origin root must be an absolute path: {}",
            root.display()
        )));
    }
    Ok(lexical_normalize(&expanded))
}

/// Resolve `.` and `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn path_to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
