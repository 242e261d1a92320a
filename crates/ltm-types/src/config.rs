//! Configuration for the ltm store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level configuration, usually loaded from `~/.ltm/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LtmConfig {
    /// Directory holding the markdown files and `index.db`.
    pub memory_dir: PathBuf,
    /// Default log filter when `RUST_LOG` is not set.
    pub log_level: String,
    /// Origin name to absolute root path.
    pub origins: BTreeMap<String, String>,
}

impl Default for LtmConfig {
    fn default() -> Self {
        Self {
            memory_dir: PathBuf::from("memories"),
            log_level: "info".to_string(),
            origins: BTreeMap::new(),
        }
    }
}
