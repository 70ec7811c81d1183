//! Reading and writing the configuration file.

use std::env;
use std::fs::{self, create_dir_all, write};
use std::path::{Path, PathBuf};

use dirs_next::config_dir;
use stevedore_util::expand_tilde;

use super::{ConfigError, StevedoreConfig, validate_config};

pub const CONFIG_PATH_ENV: &str = "STEVEDORE_CONFIG_PATH";

/// `$STEVEDORE_CONFIG_PATH` if set, otherwise `<config dir>/stevedore/config.json`.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("stevedore").join("config.json")
}

pub fn load_config() -> Result<StevedoreConfig, ConfigError> {
    load_config_from_path(&default_config_path())
}

/// Loads the file at `path`; a missing file yields the defaults.
pub fn load_config_from_path(path: &Path) -> Result<StevedoreConfig, ConfigError> {
    if !path.exists() {
        return Ok(StevedoreConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config: StevedoreConfig = serde_json::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn save_config_to_path(config: &StevedoreConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent_directory) = path.parent() {
        create_dir_all(parent_directory)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    write(path, content)?;
    Ok(())
}
