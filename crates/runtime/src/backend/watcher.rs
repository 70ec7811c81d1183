//! File watcher seam.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use super::BackendError;

pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// Supplies the current access token to a long-lived collaborator.
pub trait TokenSource: Send + Sync {
    fn current_token(&self) -> Option<String>;
}

/// Everything the watcher needs to start.
#[derive(Clone)]
pub struct WatcherSpec {
    pub url: Url,
    pub log_dir: PathBuf,
    pub cli_path: PathBuf,
    /// Present for remote connections only.
    pub auth: Option<Arc<dyn TokenSource>>,
}

impl std::fmt::Debug for WatcherSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherSpec")
            .field("url", &self.url.as_str())
            .field("log_dir", &self.log_dir)
            .field("cli_path", &self.cli_path)
            .field("authenticated", &self.auth.is_some())
            .finish()
    }
}

#[async_trait]
pub trait FileWatcherFactory: Send + Sync {
    async fn create(&self, spec: WatcherSpec) -> Result<Box<dyn Disposable>, BackendError>;
}
