//! Lifecycle management of the local runtime.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use stevedore_types::{CliStatus, LifecycleState, MigrationReport};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::migration::{MigrationOutcome, migration_required};
use crate::backend::{Prompt, Prompter};
use crate::cli::catalog::{self, INSTALL, REMOVE, START, STOP, UPGRADE};
use crate::cli::{CliExecutor, CliOutput, LifecycleCommand, LifecycleCommandKind, ProgressScope, ProgressSink};
use crate::config::{EnvironmentOverrides, StevedoreConfig};
use crate::slot::OperationSlot;
use crate::types::{CliError, LifecycleError};

/// Error text the CLI prints when the container engine is down or missing.
const ENGINE_UNAVAILABLE_MARKERS: [&str; 5] = [
    "cannot connect to the docker daemon",
    "is the docker daemon running",
    "docker daemon is not running",
    "error during connect",
    "docker: command not found",
];

/// Settings the lifecycle manager needs from configuration and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub default_tag: String,
    pub tag_override: Option<String>,
    pub legacy_workspace_dir: Option<PathBuf>,
}

impl LifecycleSettings {
    pub fn from_config(config: &StevedoreConfig, overrides: &EnvironmentOverrides) -> Self {
        Self {
            default_tag: config.default_tag.clone(),
            tag_override: overrides.version_tag.clone(),
            legacy_workspace_dir: config.legacy_workspace(),
        }
    }

    /// The override from the environment if present, else the default tag.
    pub fn required_tag(&self) -> &str {
        self.tag_override.as_deref().unwrap_or(&self.default_tag)
    }
}

/// How the local runtime compares to the required version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    Stopped,
    StartedWrongVersion { running: Vec<String> },
    StartedCorrectVersion,
}

impl InstallState {
    pub fn classify(status: &CliStatus, required_tag: &str) -> Self {
        if !status.is_started() {
            InstallState::Stopped
        } else if status.is_started_at(required_tag) {
            InstallState::StartedCorrectVersion
        } else {
            InstallState::StartedWrongVersion {
                running: status.started_versions.iter().cloned().collect(),
            }
        }
    }
}

/// What `install_and_start` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReport {
    pub tag: String,
    pub url: Option<String>,
    pub installed: bool,
    pub removed: Vec<String>,
    /// A different version was running and was stopped first.
    pub upgraded: bool,
    pub migration: MigrationOutcome,
}

/// Drives install, start, stop, remove and upgrade of the single local runtime.
///
/// Only one lifecycle command runs at a time; a second request is rejected with
/// [`LifecycleError::Busy`] rather than queued.
pub struct LifecycleManager {
    executor: Arc<dyn CliExecutor>,
    prompter: Arc<dyn Prompter>,
    progress: Arc<dyn ProgressSink>,
    settings: LifecycleSettings,
    state: Mutex<LifecycleState>,
    running: OperationSlot<LifecycleCommandKind>,
    cancellation: Mutex<Option<CancellationToken>>,
    events: broadcast::Sender<LifecycleState>,
}

impl LifecycleManager {
    pub fn new(
        executor: Arc<dyn CliExecutor>,
        prompter: Arc<dyn Prompter>,
        progress: Arc<dyn ProgressSink>,
        settings: LifecycleSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            executor,
            prompter,
            progress,
            settings,
            state: Mutex::new(LifecycleState::default()),
            running: OperationSlot::new(),
            cancellation: Mutex::new(None),
            events,
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn required_tag(&self) -> &str {
        self.settings.required_tag()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleState> {
        self.events.subscribe()
    }

    /// The lifecycle command currently holding the lock.
    pub fn running_command(&self) -> Option<LifecycleCommandKind> {
        self.running.current()
    }

    /// Sets the local state outside of a lifecycle command (e.g. `ErrorConnecting`).
    pub fn mark_state(&self, state: LifecycleState) {
        self.set_state(state);
    }

    fn set_state(&self, new_state: LifecycleState) {
        let old_state = {
            let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *state, new_state)
        };
        if old_state != new_state {
            debug!(from = %old_state, to = %new_state, "local runtime state changed");
            let _ = self.events.send(new_state);
        }
    }

    /// Kills the running command if it is cancellable. Returns whether a command was signalled.
    pub fn cancel_running(&self) -> bool {
        let cancellation = self.cancellation.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match cancellation.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Runs `status`. An unreachable container engine becomes [`LifecycleError::EngineUnavailable`].
    pub async fn query_status(&self) -> Result<CliStatus, LifecycleError> {
        let output = self
            .executor
            .execute(catalog::STATUS, &[], None)
            .await
            .map_err(classify_status_error)?;
        Ok(output.decode(&catalog::STATUS)?)
    }

    pub async fn install_state(&self) -> Result<(CliStatus, InstallState), LifecycleError> {
        let status = self.query_status().await?;
        let state = InstallState::classify(&status, self.required_tag());
        Ok((status, state))
    }

    /// Brings the local runtime to "started at the required tag".
    pub async fn install_and_start(&self) -> Result<StartReport, LifecycleError> {
        let tag = self.required_tag().to_string();
        let (status, install_state) = self.install_state().await?;
        info!(tag = %tag, state = ?install_state, "starting local runtime");

        let mut had_old_version_running = false;
        if let InstallState::StartedWrongVersion { running } = install_state {
            let prompt = Prompt::StopAndUpgrade {
                running,
                required: tag.clone(),
            };
            if !self.prompter.confirm(prompt).await {
                return Err(LifecycleError::Cancelled);
            }
            self.run_lifecycle_command(STOP, None).await?;
            had_old_version_running = true;
        }

        let mut removed = Vec::new();
        let installed = !status.is_installed(&tag);
        if installed {
            let others = status.installed_except(&tag);
            if !others.is_empty() {
                // The upgrade confirmation already covers replacing the old version.
                if !had_old_version_running {
                    let prompt = Prompt::RemoveVersions {
                        versions: others.clone(),
                        required: tag.clone(),
                    };
                    if !self.prompter.confirm(prompt).await {
                        return Err(LifecycleError::Cancelled);
                    }
                }
                for version in others {
                    self.run_lifecycle_command(REMOVE, Some(&version)).await?;
                    removed.push(version);
                }
            }
            self.run_lifecycle_command(INSTALL, Some(&tag)).await?;
        }

        self.run_lifecycle_command(START, Some(&tag)).await?;

        let migration = self.migrate_if_required(&status).await;
        let url = self.query_status().await?.url;
        info!(tag = %tag, url = ?url, "local runtime started");

        Ok(StartReport {
            tag,
            url,
            installed,
            removed,
            upgraded: had_old_version_running,
            migration,
        })
    }

    pub async fn stop(&self) -> Result<(), LifecycleError> {
        self.run_lifecycle_command(STOP, None).await.map(|_| ())
    }

    pub async fn remove_version(&self, tag: &str) -> Result<(), LifecycleError> {
        self.run_lifecycle_command(REMOVE, Some(tag)).await.map(|_| ())
    }

    /// Runs one lifecycle command under the lifecycle lock, driving its state transitions.
    ///
    /// `tag` defaults to the required tag for commands that take one.
    pub async fn run_lifecycle_command(&self, command: LifecycleCommand, tag: Option<&str>) -> Result<CliOutput, LifecycleError> {
        self.run_with_args(command, tag, &[]).await
    }

    async fn run_with_args(&self, command: LifecycleCommand, tag: Option<&str>, extra_args: &[String]) -> Result<CliOutput, LifecycleError> {
        let _guard = match self.running.try_claim(command.kind) {
            Ok(guard) => guard,
            Err(running) => {
                warn!(running = %running, requested = %command.kind, "lifecycle command rejected, another one is in progress");
                return Err(LifecycleError::Busy {
                    running,
                    requested: command.kind,
                });
            }
        };

        let tag = tag.unwrap_or_else(|| self.required_tag()).to_string();
        let mut args = Vec::new();
        if command.uses_version_tag {
            args.push("--tag".to_string());
            args.push(tag.clone());
        }
        args.extend_from_slice(extra_args);

        let previous_state = self.state();
        if let Some(during) = command.transitions.during {
            self.set_state(during);
        }

        let token = CancellationToken::new();
        self.replace_cancellation(Some(token.clone()));
        let scope = ProgressScope::new(command.action_label(&tag), self.progress.clone(), token);
        let result = self.executor.execute(command.as_cli(), &args, Some(scope)).await;
        self.replace_cancellation(None);

        match &result {
            Ok(_) => {
                if let Some(after) = command.transitions.after {
                    self.set_state(after);
                }
                info!(command = %command.kind, tag = %tag, "lifecycle command finished");
            }
            Err(error) if error.is_cancelled() => {
                self.set_state(previous_state);
                info!(command = %command.kind, "lifecycle command cancelled");
            }
            Err(error) => {
                if let Some(on_error) = command.transitions.on_error {
                    self.set_state(on_error);
                }
                warn!(command = %command.kind, error = %error.summary(), "lifecycle command failed");
            }
        }
        result.map_err(LifecycleError::from)
    }

    fn replace_cancellation(&self, token: Option<CancellationToken>) {
        *self.cancellation.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    async fn migrate_if_required(&self, status: &CliStatus) -> MigrationOutcome {
        let workspace = self.settings.legacy_workspace_dir.as_deref();
        if !migration_required(workspace, status) {
            return MigrationOutcome::NotRequired;
        }
        let Some(workspace) = workspace else {
            return MigrationOutcome::NotRequired;
        };

        info!(workspace = %workspace.display(), "migrating legacy workspace");
        let args = ["--workspace".to_string(), workspace.display().to_string()];
        let outcome = match self.run_with_args(UPGRADE, None, &args).await {
            Ok(output) => match output.decode::<MigrationReport>(&UPGRADE.as_cli()) {
                Ok(report) => MigrationOutcome::from_report(report),
                Err(error) => MigrationOutcome::failed(error.summary()),
            },
            Err(error) => MigrationOutcome::failed(error.summary()),
        };
        if outcome.is_failure() {
            warn!(outcome = ?outcome, "workspace migration did not complete");
        }
        outcome
    }
}

fn classify_status_error(error: CliError) -> LifecycleError {
    let text = error.detail().to_lowercase();
    if ENGINE_UNAVAILABLE_MARKERS.iter().any(|marker| text.contains(marker)) {
        return LifecycleError::EngineUnavailable { detail: error.message() };
    }
    error.into()
}
