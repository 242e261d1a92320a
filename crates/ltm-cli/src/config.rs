//! Configuration loading from `~/.ltm/config.toml` with defaults.
//!
//! `LTM_CONFIG` points at another config file and `LTM_PATH` overrides the memory
//! directory. A relative `memory_dir` is resolved against the config file's directory.

use ltm_types::config::LtmConfig;
use ltm_types::error::{LtmError, LtmResult};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "LTM_CONFIG";

/// Environment variable overriding the memory directory.
pub const MEMORY_DIR_ENV: &str = "LTM_PATH";

/// Config file to use: the explicit path, else `$LTM_CONFIG`, else the default.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return expand_home(path);
    }
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => expand_home(Path::new(&path)),
        _ => default_config_path(),
    }
}

/// Load configuration from a TOML file.
///
/// A missing file yields defaults. An unreadable or malformed file is a `Config` error.
pub fn load_config(path: &Path) -> LtmResult<LtmConfig> {
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return Ok(LtmConfig::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| {
        LtmError::Config(format!("Failed to read {}: {e}", path.display()))
    })?;
    let config: LtmConfig = toml::from_str(&contents).map_err(|e| {
        LtmError::Config(format!("Failed to parse {}: {e}", path.display()))
    })?;
    info!(path = %path.display(), origins = config.origins.len(), "Loaded configuration");
    Ok(config)
}

/// Write configuration back to `path`, creating parent directories as needed.
pub fn save_config(path: &Path, config: &LtmConfig) -> LtmResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents =
        toml::to_string_pretty(config).map_err(|e| LtmError::Serialization(e.to_string()))?;
    std::fs::write(path, contents)?;
    info!(path = %path.display(), "Saved configuration");
    Ok(())
}

/// The memory directory: the explicit override, else `$LTM_PATH`, else `memory_dir` from
/// the config (relative paths resolved against the config file's directory).
pub fn resolve_memory_dir(explicit: Option<&Path>, config: &LtmConfig, config_path: &Path) -> PathBuf {
    if let Some(dir) = explicit {
        return expand_home(dir);
    }
    if let Some(dir) = std::env::var_os(MEMORY_DIR_ENV).filter(|d| !d.is_empty()) {
        return expand_home(Path::new(&dir));
    }
    let configured = expand_home(&config.memory_dir);
    if configured.is_absolute() {
        return configured;
    }
    config_path
        .parent()
        .map(|dir| dir.join(&configured))
        .unwrap_or(configured)
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    ltm_home().join("config.toml")
}

/// Get the default ltm home directory.
pub fn ltm_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".ltm")
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
