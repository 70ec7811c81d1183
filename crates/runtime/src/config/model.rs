//! Data model of the stevedore configuration file.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stevedore_util::expand_tilde;
use thiserror::Error;

use super::validation::ValidationError;

pub const DEFAULT_CLI_PATH: &str = "stevectl";
pub const DEFAULT_TAG: &str = "latest";
pub const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_LEGACY_WORKSPACE_DIR: &str = "~/stevedore-workspace";

/// Persisted settings, stored as camelCase JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StevedoreConfig {
    /// Runtime CLI executable. Bare names are resolved through `PATH`.
    pub cli_path: String,
    /// Tag installed and started when no override is set.
    pub default_tag: String,
    /// How long `enable()` waits for the readiness endpoint.
    pub readiness_timeout_secs: u64,
    /// Directory handed to the file watcher for its logs.
    pub log_dir: Option<String>,
    /// Workspace created by pre-container releases; its presence triggers migration checks.
    pub legacy_workspace_dir: Option<String>,
    /// Remote connection ids the user switched off.
    pub disabled_connections: BTreeSet<String>,
}

impl Default for StevedoreConfig {
    fn default() -> Self {
        Self {
            cli_path: DEFAULT_CLI_PATH.to_string(),
            default_tag: DEFAULT_TAG.to_string(),
            readiness_timeout_secs: DEFAULT_READINESS_TIMEOUT_SECS,
            log_dir: None,
            legacy_workspace_dir: Some(DEFAULT_LEGACY_WORKSPACE_DIR.to_string()),
            disabled_connections: BTreeSet::new(),
        }
    }
}

impl StevedoreConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    /// CLI executable with `~` expanded. Bare command names are returned unchanged.
    pub fn cli_executable(&self) -> PathBuf {
        expand_tilde(&self.cli_path)
    }

    pub fn log_directory(&self) -> PathBuf {
        match &self.log_dir {
            Some(dir) => expand_tilde(dir),
            None => dirs_next::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("stevedore")
                .join("logs"),
        }
    }

    pub fn legacy_workspace(&self) -> Option<PathBuf> {
        self.legacy_workspace_dir.as_deref().map(expand_tilde)
    }

    pub fn is_disabled(&self, connection_id: &str) -> bool {
        self.disabled_connections.contains(connection_id)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}
