//! Live connections, local first.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Deserialize;
use stevedore_types::{ConnectionRecordList, ConnectionState};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use super::{Connection, ConnectionChange, ConnectionKind, ConnectionServices, ProjectChange};
use crate::cli::catalog::{CONNECTIONS_ADD, CONNECTIONS_LIST, CONNECTIONS_REMOVE};
use crate::types::RegistryError;

pub const LOCAL_CONNECTION_ID: &str = "local";
pub const LOCAL_CONNECTION_LABEL: &str = "Local";

#[derive(Debug, Deserialize)]
struct CreatedConnection {
    id: String,
}

/// Owns every live connection.
///
/// Iteration yields the local connection first. At most one local connection
/// is registered at a time.
#[derive(Debug)]
pub struct ConnectionRegistry {
    services: ConnectionServices,
    connections: RwLock<Vec<Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new(services: ConnectionServices) -> Self {
        Self {
            services,
            connections: RwLock::new(Vec::new()),
        }
    }

    pub fn services(&self) -> &ConnectionServices {
        &self.services
    }

    pub fn subscribe_connections(&self) -> broadcast::Receiver<ConnectionChange> {
        self.services.events.subscribe_connections()
    }

    pub fn subscribe_projects(&self) -> broadcast::Receiver<ProjectChange> {
        self.services.events.subscribe_projects()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.read().iter().find(|connection| connection.id() == id).cloned()
    }

    pub fn local(&self) -> Option<Arc<Connection>> {
        self.read().iter().find(|connection| !connection.is_remote()).cloned()
    }

    /// Registers the local instance at `url`. It starts in `Initializing`; call `enable()`.
    pub fn add_local(&self, url: &str) -> Result<Arc<Connection>, RegistryError> {
        let url = parse_url(url)?;
        let connection = {
            let mut connections = self.write();
            if connections.iter().any(|connection| !connection.is_remote()) {
                return Err(RegistryError::LocalAlreadyExists);
            }
            let connection = Connection::new(
                LOCAL_CONNECTION_ID,
                LOCAL_CONNECTION_LABEL,
                url,
                ConnectionKind::Local,
                ConnectionState::Initializing,
                self.services.clone(),
            );
            connections.insert(0, connection.clone());
            connection
        };

        info!(url = %connection.url(), "local connection registered");
        self.emit(ConnectionChange::Added {
            id: LOCAL_CONNECTION_ID.to_string(),
        });
        Ok(connection)
    }

    /// Removes and disposes the local connection. Returns whether one existed.
    pub fn remove_local(&self) -> bool {
        let removed = {
            let mut connections = self.write();
            connections
                .iter()
                .position(|connection| !connection.is_remote())
                .map(|index| connections.remove(index))
        };
        let Some(connection) = removed else {
            return false;
        };

        connection.dispose();
        info!("local connection removed");
        self.emit(ConnectionChange::Removed {
            id: connection.id().to_string(),
        });
        true
    }

    /// Registers the remotes the CLI has persisted.
    ///
    /// Connections the user disabled come back as `Disabled`; the others start
    /// in `Initializing` and are returned so the caller can enable them.
    pub async fn load_remotes(&self) -> Result<Vec<Arc<Connection>>, RegistryError> {
        let output = self.services.executor.execute(CONNECTIONS_LIST, &[], None).await?;
        let list: ConnectionRecordList = output.decode(&CONNECTIONS_LIST)?;

        let mut to_enable = Vec::new();
        for record in list.connections {
            if record.id == LOCAL_CONNECTION_ID || self.get(&record.id).is_some() {
                continue;
            }
            let url = match parse_url(&record.url) {
                Ok(url) => url,
                Err(error) => {
                    warn!(connection = %record.id, error = %error, "skipping persisted connection");
                    continue;
                }
            };

            let disabled = self.services.preferences.is_disabled(&record.id);
            let initial = if disabled {
                ConnectionState::Disabled
            } else {
                ConnectionState::Initializing
            };
            let connection = self.register_remote(record.id, record.label, url, record.username, initial);
            if !disabled {
                to_enable.push(connection);
            }
        }

        debug!(count = self.read().len(), "remote connections loaded");
        Ok(to_enable)
    }

    /// Enables each connection on its own task. Failures are already reflected in the connection state.
    pub fn enable_in_background(connections: Vec<Arc<Connection>>) {
        for connection in connections {
            tokio::spawn(async move {
                if let Err(error) = connection.enable().await {
                    debug!(connection = %connection.id(), error = %error, "background enable failed");
                }
            });
        }
    }

    /// Creates a remote through the CLI, stores its credentials and enables it.
    ///
    /// A failing enable leaves the connection registered in its error state. If the
    /// credentials cannot be stored, the new record is deleted again and the error returned.
    pub async fn create_remote(
        &self,
        label: &str,
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<Arc<Connection>, RegistryError> {
        let parsed = parse_url(url)?;
        let args = [
            "--label".to_string(),
            label.to_string(),
            "--url".to_string(),
            parsed.to_string(),
            "--username".to_string(),
            username.to_string(),
        ];
        let output = self.services.executor.execute(CONNECTIONS_ADD, &args, None).await?;
        let created: CreatedConnection = output.decode(&CONNECTIONS_ADD)?;

        let connection = self.register_remote(
            created.id,
            label.to_string(),
            parsed,
            Some(username.to_string()),
            ConnectionState::Initializing,
        );
        if let Err(error) = connection.update_credentials(username, password).await {
            self.discard_created(&connection).await;
            return Err(error.into());
        }

        if let Err(error) = connection.enable().await {
            warn!(connection = %connection.id(), error = %error, "new connection did not come up");
        }
        Ok(connection)
    }

    /// Deletes a remote from the CLI and disposes it.
    pub async fn remove_remote(&self, id: &str) -> Result<(), RegistryError> {
        let connection = self
            .get(id)
            .filter(|connection| connection.is_remote())
            .ok_or_else(|| RegistryError::not_found(id))?;

        let args = ["--conid".to_string(), id.to_string()];
        self.services.executor.execute(CONNECTIONS_REMOVE, &args, None).await?;

        self.write().retain(|existing| !Arc::ptr_eq(existing, &connection));
        connection.dispose();
        if let Err(error) = self.services.preferences.set_disabled(id, false) {
            warn!(connection = %id, error = %error, "failed to forget connection preference");
        }

        info!(connection = %id, "remote connection removed");
        self.emit(ConnectionChange::Removed { id: id.to_string() });
        Ok(())
    }

    async fn discard_created(&self, connection: &Arc<Connection>) {
        let id = connection.id().to_string();
        let args = ["--conid".to_string(), id.clone()];
        if let Err(error) = self.services.executor.execute(CONNECTIONS_REMOVE, &args, None).await {
            warn!(connection = %id, error = %error, "failed to delete half-created connection");
        }
        self.write().retain(|existing| !Arc::ptr_eq(existing, connection));
        connection.dispose();
        debug!(connection = %id, "half-created connection discarded");
        self.emit(ConnectionChange::Removed { id });
    }

    /// Disposes every connection and empties the registry.
    pub fn dispose_all(&self) {
        let connections = std::mem::take(&mut *self.write());
        for connection in connections {
            connection.dispose();
            self.emit(ConnectionChange::Removed {
                id: connection.id().to_string(),
            });
        }
    }

    fn register_remote(
        &self,
        id: String,
        label: String,
        url: Url,
        username: Option<String>,
        initial: ConnectionState,
    ) -> Arc<Connection> {
        let connection = Connection::new(
            id.clone(),
            label,
            url,
            ConnectionKind::Remote { username },
            initial,
            self.services.clone(),
        );
        self.write().push(connection.clone());
        debug!(connection = %id, state = %initial, "remote connection registered");
        self.emit(ConnectionChange::Added { id });
        connection
    }

    fn emit(&self, change: ConnectionChange) {
        self.services.events.emit_connection(change);
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Connection>>> {
        self.connections.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Connection>>> {
        self.connections.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_url(raw: &str) -> Result<Url, RegistryError> {
    let url = Url::parse(raw.trim()).map_err(|error| RegistryError::invalid_url(raw, error.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RegistryError::invalid_url(raw, "only http and https are supported"));
    }
    Ok(url)
}
