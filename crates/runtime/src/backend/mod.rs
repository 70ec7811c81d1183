//! Collaborators the control core talks to but does not implement.
//!
//! The HTTP API ([`BackendApi`]) has a reqwest implementation. The event
//! socket, the file watcher and the user prompts are consumed through narrow
//! traits; the binary and the tests provide their own implementations.

mod http;
mod prompt;
mod socket;
mod watcher;

pub use http::{HttpBackendApi, is_truthy_body};
pub use prompt::{Notice, Prompt, Prompter};
pub use socket::{EventSocket, SocketConnection, SocketEvent, SocketFactory};
pub use watcher::{Disposable, FileWatcherFactory, TokenSource, WatcherSpec};

use async_trait::async_trait;
use stevedore_types::{EnvironmentInfo, ProjectRecord};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{url} rejected the credentials (HTTP {status})")]
    Unauthorized { url: String, status: u16 },

    #[error("{url} answered HTTP {status}")]
    Http { url: String, status: u16, body: String },

    #[error("Could not reach {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("Unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl BackendError {
    pub fn transport(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn decode(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BackendError::Unauthorized { .. })
    }
}

/// HTTP endpoints served by a runtime instance.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Unauthenticated reachability check. Any HTTP answer counts as reachable.
    async fn ping(&self, base: &Url) -> Result<(), BackendError>;

    /// Whether the instance has finished booting.
    async fn is_ready(&self, base: &Url, token: Option<&str>) -> Result<bool, BackendError>;

    async fn environment(&self, base: &Url, token: Option<&str>) -> Result<EnvironmentInfo, BackendError>;

    async fn projects(&self, base: &Url, token: Option<&str>) -> Result<Vec<ProjectRecord>, BackendError>;
}
