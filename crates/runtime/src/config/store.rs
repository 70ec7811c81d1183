//! Shared, persisted configuration.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::{ConfigError, StevedoreConfig, load_config_from_path, save_config_to_path};

/// Persistence of per-connection user choices.
pub trait ConnectionPreferences: Send + Sync {
    fn is_disabled(&self, connection_id: &str) -> bool;
    fn set_disabled(&self, connection_id: &str, disabled: bool) -> Result<(), ConfigError>;
}

/// Configuration loaded once and written back whenever it changes.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: Mutex<StevedoreConfig>,
}

impl ConfigStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = load_config_from_path(&path)?;
        Ok(Self {
            path,
            config: Mutex::new(config),
        })
    }

    /// A store over an in-memory config; writes still go to `path`.
    pub fn with_config(path: impl Into<PathBuf>, config: StevedoreConfig) -> Self {
        Self {
            path: path.into(),
            config: Mutex::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> StevedoreConfig {
        self.lock().clone()
    }

    /// Applies `change` and saves. Nothing is written when `change` reports no difference.
    pub fn update(&self, change: impl FnOnce(&mut StevedoreConfig) -> bool) -> Result<(), ConfigError> {
        let mut config = self.lock();
        if !change(&mut config) {
            return Ok(());
        }
        save_config_to_path(&config, &self.path)?;
        debug!(path = %self.path.display(), "saved configuration");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, StevedoreConfig> {
        self.config.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConnectionPreferences for ConfigStore {
    fn is_disabled(&self, connection_id: &str) -> bool {
        self.lock().is_disabled(connection_id)
    }

    fn set_disabled(&self, connection_id: &str, disabled: bool) -> Result<(), ConfigError> {
        self.update(|config| {
            if disabled {
                config.disabled_connections.insert(connection_id.to_string())
            } else {
                config.disabled_connections.remove(connection_id)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_connections_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let store = ConfigStore::load(&path).unwrap();
        store.set_disabled("remote-1", true).unwrap();
        assert!(store.is_disabled("remote-1"));

        let reloaded = ConfigStore::load(&path).unwrap();
        assert!(reloaded.is_disabled("remote-1"));

        reloaded.set_disabled("remote-1", false).unwrap();
        assert!(!ConfigStore::load(&path).unwrap().is_disabled("remote-1"));
    }

    #[test]
    fn unchanged_updates_do_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load(&path).unwrap();

        store.set_disabled("never-disabled", false).unwrap();
        assert!(!path.exists());
    }
}
