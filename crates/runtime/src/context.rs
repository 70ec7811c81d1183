//! The application context.
//!
//! [`AppContext`] is built once at startup and owns every long-lived service:
//! configuration, the output log, the CLI executor, the lifecycle manager and
//! the connection registry. Entry points take it by reference.
//!
//! The user-facing operations here also decide what the user sees when they
//! fail: cancellations stay silent, busy locks become warnings, rejected
//! credentials stay inline on the connection, everything else is a
//! dismissible error with a "view log" action.

use std::io;
use std::path::Path;
use std::sync::Arc;

use stevedore_types::{CliStatus, LifecycleState};
use tracing::{debug, info};

use crate::backend::{BackendApi, FileWatcherFactory, Notice, Prompter, SocketFactory};
use crate::cli::{CliExecutor, ProcessRunner, ProgressSink};
use crate::config::{ConfigError, ConfigStore, EnvironmentOverrides};
use crate::connection::{Connection, ConnectionEvents, ConnectionRegistry, ConnectionServices, ConnectionSettings};
use crate::lifecycle::{LifecycleManager, LifecycleSettings, StartReport};
use crate::logging::{CliOutputLog, LogExportError};
use crate::types::{ConnectionError, LifecycleError, RegistryError};

/// Collaborators the host application supplies.
#[derive(Clone)]
pub struct AppCollaborators {
    pub backend: Arc<dyn BackendApi>,
    pub sockets: Arc<dyn SocketFactory>,
    pub watchers: Arc<dyn FileWatcherFactory>,
    pub prompter: Arc<dyn Prompter>,
    pub progress: Arc<dyn ProgressSink>,
}

pub struct AppContext {
    config: Arc<ConfigStore>,
    overrides: EnvironmentOverrides,
    output_log: Arc<CliOutputLog>,
    executor: Arc<dyn CliExecutor>,
    lifecycle: Arc<LifecycleManager>,
    registry: Arc<ConnectionRegistry>,
    prompter: Arc<dyn Prompter>,
}

impl AppContext {
    /// Builds the context around a [`ProcessRunner`] for the configured CLI.
    pub fn new(config: Arc<ConfigStore>, overrides: EnvironmentOverrides, collaborators: AppCollaborators) -> Self {
        let output_log = Arc::new(CliOutputLog::new());
        let runner = ProcessRunner::new(config.snapshot().cli_executable(), output_log.clone());
        Self::with_executor(config, overrides, Arc::new(runner), output_log, collaborators)
    }

    pub fn with_executor(
        config: Arc<ConfigStore>,
        overrides: EnvironmentOverrides,
        executor: Arc<dyn CliExecutor>,
        output_log: Arc<CliOutputLog>,
        collaborators: AppCollaborators,
    ) -> Self {
        let snapshot = config.snapshot();
        let lifecycle = Arc::new(LifecycleManager::new(
            executor.clone(),
            collaborators.prompter.clone(),
            collaborators.progress.clone(),
            LifecycleSettings::from_config(&snapshot, &overrides),
        ));
        let services = ConnectionServices {
            executor: executor.clone(),
            backend: collaborators.backend,
            sockets: collaborators.sockets,
            watchers: collaborators.watchers,
            prompter: collaborators.prompter.clone(),
            preferences: config.clone(),
            output_log: output_log.clone(),
            events: ConnectionEvents::new(),
            settings: ConnectionSettings::from_config(&snapshot),
        };
        debug!(config = %config.path().display(), tag = %lifecycle.required_tag(), "application context ready");

        Self {
            config,
            overrides,
            output_log,
            executor,
            lifecycle,
            registry: Arc::new(ConnectionRegistry::new(services)),
            prompter: collaborators.prompter,
        }
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn overrides(&self) -> &EnvironmentOverrides {
        &self.overrides
    }

    pub fn output_log(&self) -> &Arc<CliOutputLog> {
        &self.output_log
    }

    pub fn executor(&self) -> &Arc<dyn CliExecutor> {
        &self.executor
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Checks once that a configured CLI path points at a file.
    ///
    /// Bare command names are left to `PATH` lookup at spawn time.
    pub fn verify_cli_binary(&self) -> Result<(), ConfigError> {
        if self.overrides.skip_binary_verification {
            debug!("CLI binary verification skipped");
            return Ok(());
        }
        let path = self.config.snapshot().cli_executable();
        if path.components().count() <= 1 {
            return Ok(());
        }
        if !path.is_file() {
            return Err(ConfigError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("runtime CLI not found at {}", path.display()),
            )));
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<CliStatus, LifecycleError> {
        let result = self.lifecycle.query_status().await;
        if let Err(error) = &result {
            self.report_lifecycle_failure(error).await;
        }
        result
    }

    /// Installs and starts the local runtime, then connects to it.
    ///
    /// When the runtime starts but the connection cannot be established the
    /// local state becomes `ErrorConnecting`.
    pub async fn start_local(&self) -> Result<StartReport, RegistryError> {
        let report = match self.lifecycle.install_and_start().await {
            Ok(report) => report,
            Err(error) => {
                self.report_lifecycle_failure(&error).await;
                return Err(ConnectionError::from(error).into());
            }
        };

        if let Some(message) = report.migration.summary() {
            let notice = if report.migration.is_failure() {
                Notice::Warning { message }
            } else {
                Notice::Info { message }
            };
            self.prompter.notify(notice).await;
        }

        let result = self.connect_local(report.url.as_deref()).await;
        if let Err(error) = &result {
            self.lifecycle.mark_state(LifecycleState::ErrorConnecting);
            self.report_registry_failure(error).await;
        }
        result.map(|_| report)
    }

    /// Removes the local connection, then stops the runtime.
    pub async fn stop_local(&self) -> Result<(), LifecycleError> {
        if self.registry.remove_local() {
            debug!("local connection removed before stop");
        }
        let result = self.lifecycle.stop().await;
        if let Err(error) = &result {
            self.report_lifecycle_failure(error).await;
        }
        result
    }

    pub async fn remove_version(&self, tag: &str) -> Result<(), LifecycleError> {
        let result = self.lifecycle.remove_version(tag).await;
        if let Err(error) = &result {
            self.report_lifecycle_failure(error).await;
        }
        result
    }

    /// Registers persisted remotes. Returns the ones the user left enabled.
    pub async fn load_remotes(&self) -> Result<Vec<Arc<Connection>>, RegistryError> {
        let result = self.registry.load_remotes().await;
        if let Err(error) = &result {
            self.report_registry_failure(error).await;
        }
        result
    }

    pub async fn create_remote(&self, label: &str, url: &str, username: &str, password: &str) -> Result<Arc<Connection>, RegistryError> {
        let result = self.registry.create_remote(label, url, username, password).await;
        if let Err(error) = &result {
            self.report_registry_failure(error).await;
        }
        result
    }

    pub async fn remove_remote(&self, id: &str) -> Result<(), RegistryError> {
        let result = self.registry.remove_remote(id).await;
        if let Err(error) = &result {
            self.report_registry_failure(error).await;
        }
        result
    }

    pub async fn enable_connection(&self, id: &str) -> Result<Arc<Connection>, RegistryError> {
        let result = self.toggle_connection(id, true).await;
        if let Err(error) = &result {
            self.report_registry_failure(error).await;
        }
        result
    }

    pub async fn disable_connection(&self, id: &str) -> Result<Arc<Connection>, RegistryError> {
        let result = self.toggle_connection(id, false).await;
        if let Err(error) = &result {
            self.report_registry_failure(error).await;
        }
        result
    }

    /// Writes the whole output log, redacted, for the "view log" action.
    pub async fn export_log(&self, path: &Path) -> Result<usize, LogExportError> {
        self.output_log.export(None, path, true).await
    }

    /// Cancels a running lifecycle command and disposes every connection.
    pub fn shutdown(&self) {
        if self.lifecycle.cancel_running() {
            info!("cancelled the running lifecycle command");
        }
        self.registry.dispose_all();
    }

    async fn connect_local(&self, url: Option<&str>) -> Result<Arc<Connection>, RegistryError> {
        let url = url.ok_or_else(|| RegistryError::invalid_url("", "the local runtime did not report its URL"))?;
        let local = match self.registry.local() {
            Some(existing) if same_url(existing.url().as_str(), url) => existing,
            Some(_) => {
                self.registry.remove_local();
                self.registry.add_local(url)?
            }
            None => self.registry.add_local(url)?,
        };
        local.enable().await?;
        Ok(local)
    }

    async fn toggle_connection(&self, id: &str, enable: bool) -> Result<Arc<Connection>, RegistryError> {
        let connection = self.registry.get(id).ok_or_else(|| RegistryError::not_found(id))?;
        if enable {
            connection.enable().await?;
        } else {
            connection.disable().await?;
        }
        Ok(connection)
    }

    async fn report_lifecycle_failure(&self, error: &LifecycleError) {
        match error {
            LifecycleError::Cancelled => debug!("lifecycle operation cancelled"),
            LifecycleError::Busy { .. } => {
                self.prompter.notify(Notice::Warning { message: error.summary() }).await;
            }
            _ => {
                self.prompter
                    .notify(Notice::Error {
                        message: error.summary(),
                        show_log: true,
                    })
                    .await;
            }
        }
    }

    async fn report_registry_failure(&self, error: &RegistryError) {
        if error.is_cancelled() {
            debug!("connection operation cancelled");
            return;
        }
        match error {
            // Shown inline on the connection until re-authentication clears it.
            RegistryError::Connection(ConnectionError::AuthRejected { .. }) => {}
            RegistryError::Connection(ConnectionError::Lifecycle(error)) => self.report_lifecycle_failure(error).await,
            RegistryError::Connection(ConnectionError::ToggleInProgress { .. }) => {
                self.prompter.notify(Notice::Warning { message: error.summary() }).await;
            }
            _ => {
                self.prompter
                    .notify(Notice::Error {
                        message: error.summary(),
                        show_log: true,
                    })
                    .await;
            }
        }
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config.path())
            .field("lifecycle_state", &self.lifecycle.state())
            .field("connections", &self.registry.connections().len())
            .finish()
    }
}

fn same_url(left: &str, right: &str) -> bool {
    left.trim_end_matches('/') == right.trim_end_matches('/')
}
