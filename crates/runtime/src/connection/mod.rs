//! Connections to runtime instances.
//!
//! A [`Connection`] tracks one instance (the local one or a remote) through
//! `Initializing → Ready`, the error states and, for remotes, `Disabled`.
//! Remotes carry a [`ReconnectController`] that retries with exponential
//! backoff while the connection sits in `NetworkError`. The
//! [`ConnectionRegistry`] owns every live connection and is where subscribers
//! attach to the change feeds.

mod machine;
mod project;
mod reconnect;
mod registry;

pub use machine::Connection;
pub use project::Project;
pub use reconnect::{GROWTH_FACTOR, MAX_INTERVAL, MIN_INTERVAL, ReconnectController, Reconnectable};
pub use registry::{ConnectionRegistry, LOCAL_CONNECTION_ID, LOCAL_CONNECTION_LABEL};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use stevedore_types::ConnectionState;
use tokio::sync::broadcast;

use crate::backend::{BackendApi, FileWatcherFactory, Prompter, SocketFactory};
use crate::cli::CliExecutor;
use crate::config::{ConnectionPreferences, StevedoreConfig};
use crate::logging::CliOutputLog;

/// Delay between readiness probes while a connection is being enabled.
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(2);

const DEFAULT_SOCKET_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The toggle a remote connection is busy with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOperation {
    Connecting,
    Disconnecting,
}

impl fmt::Display for ToggleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToggleOperation::Connecting => write!(f, "connecting"),
            ToggleOperation::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionKind {
    Local,
    Remote { username: Option<String> },
}

impl ConnectionKind {
    pub fn is_remote(&self) -> bool {
        matches!(self, ConnectionKind::Remote { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionChange {
    Added { id: String },
    StateChanged {
        id: String,
        old: ConnectionState,
        new: ConnectionState,
    },
    Removed { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectChange {
    /// The project list of a connection was replaced by a fresh listing.
    Refreshed { connection_id: String, count: usize },
    /// The project list was emptied because the connection was torn down.
    Cleared { connection_id: String },
}

/// Broadcast feeds for connection and project changes.
///
/// Dropping a receiver unsubscribes it. Slow receivers observe `Lagged` and
/// should re-read the registry.
#[derive(Debug, Clone)]
pub struct ConnectionEvents {
    connections: broadcast::Sender<ConnectionChange>,
    projects: broadcast::Sender<ProjectChange>,
}

impl ConnectionEvents {
    pub fn new() -> Self {
        let (connections, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (projects, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { connections, projects }
    }

    pub fn subscribe_connections(&self) -> broadcast::Receiver<ConnectionChange> {
        self.connections.subscribe()
    }

    pub fn subscribe_projects(&self) -> broadcast::Receiver<ProjectChange> {
        self.projects.subscribe()
    }

    pub(crate) fn emit_connection(&self, change: ConnectionChange) {
        let _ = self.connections.send(change);
    }

    pub(crate) fn emit_project(&self, change: ProjectChange) {
        let _ = self.projects.send(change);
    }
}

impl Default for ConnectionEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Timeouts and paths shared by every connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub readiness_timeout: Duration,
    pub socket_connect_timeout: Duration,
    pub log_dir: PathBuf,
    pub cli_path: PathBuf,
}

impl ConnectionSettings {
    pub fn from_config(config: &StevedoreConfig) -> Self {
        Self {
            readiness_timeout: config.readiness_timeout(),
            socket_connect_timeout: DEFAULT_SOCKET_CONNECT_TIMEOUT,
            log_dir: config.log_directory(),
            cli_path: config.cli_executable(),
        }
    }
}

/// Collaborators handed to every connection the registry creates.
#[derive(Clone)]
pub struct ConnectionServices {
    pub executor: Arc<dyn CliExecutor>,
    pub backend: Arc<dyn BackendApi>,
    pub sockets: Arc<dyn SocketFactory>,
    pub watchers: Arc<dyn FileWatcherFactory>,
    pub prompter: Arc<dyn Prompter>,
    pub preferences: Arc<dyn ConnectionPreferences>,
    pub output_log: Arc<CliOutputLog>,
    pub events: ConnectionEvents,
    pub settings: ConnectionSettings,
}

impl fmt::Debug for ConnectionServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionServices").field("settings", &self.settings).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_the_configuration() {
        let config = StevedoreConfig {
            readiness_timeout_secs: 10,
            cli_path: "/opt/stevectl".into(),
            log_dir: Some("/var/log/stevedore".into()),
            ..StevedoreConfig::default()
        };
        let settings = ConnectionSettings::from_config(&config);
        assert_eq!(settings.readiness_timeout, Duration::from_secs(10));
        assert_eq!(settings.cli_path, PathBuf::from("/opt/stevectl"));
        assert_eq!(settings.log_dir, PathBuf::from("/var/log/stevedore"));
    }

    #[tokio::test]
    async fn events_reach_every_subscriber() {
        let events = ConnectionEvents::new();
        let mut first = events.subscribe_connections();
        let mut second = events.subscribe_connections();
        events.emit_connection(ConnectionChange::Added { id: "local".into() });
        assert_eq!(first.recv().await.unwrap(), ConnectionChange::Added { id: "local".into() });
        assert_eq!(second.recv().await.unwrap(), ConnectionChange::Added { id: "local".into() });
    }

    #[test]
    fn toggle_operation_reads_naturally_in_messages() {
        assert_eq!(ToggleOperation::Disconnecting.to_string(), "disconnecting");
        assert!(ConnectionKind::Remote { username: None }.is_remote());
        assert!(!ConnectionKind::Local.is_remote());
    }
}
