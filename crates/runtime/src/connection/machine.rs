use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use stevedore_types::{AccessToken, ConnectionState, EnvironmentInfo};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::project::Project;
use super::reconnect::{ReconnectController, Reconnectable};
use super::{ConnectionChange, ConnectionKind, ConnectionServices, ProjectChange, READINESS_POLL_INTERVAL, ToggleOperation};
use crate::backend::{BackendError, Disposable, EventSocket, SocketConnection, SocketEvent, TokenSource, WatcherSpec};
use crate::cli::catalog::{KEYRING_UPDATE, TOKEN_GET};
use crate::logging::connection_channel;
use crate::slot::{OperationSlot, SlotGuard};
use crate::types::{CliError, ConnectionError, LogLevel};

struct ConnectionInner {
    state: ConnectionState,
    socket: Option<Arc<dyn EventSocket>>,
    socket_task: Option<JoinHandle<()>>,
    watcher: Option<Box<dyn Disposable>>,
    projects: IndexMap<String, Arc<Project>>,
    environment: Option<EnvironmentInfo>,
    access_token: Option<String>,
    /// The enable path finished setup (environment, socket, watcher, projects).
    has_initialized: bool,
    /// The socket reported its first connect since it was opened.
    has_connected: bool,
    /// Suppresses socket events while the transport is being disposed.
    tearing_down: bool,
    last_error: Option<String>,
    disposed: bool,
}

impl ConnectionInner {
    fn new(state: ConnectionState) -> Self {
        Self {
            state,
            socket: None,
            socket_task: None,
            watcher: None,
            projects: IndexMap::new(),
            environment: None,
            access_token: None,
            has_initialized: false,
            has_connected: false,
            tearing_down: false,
            last_error: None,
            disposed: false,
        }
    }
}

/// A connection to one runtime instance.
///
/// Always held in an `Arc`; background tasks (socket listener, reconnect
/// timer, watcher token source) keep only a `Weak` back-reference so dropping
/// the last `Arc` tears nothing down implicitly. Call [`Connection::dispose`].
pub struct Connection {
    id: String,
    label: String,
    url: Url,
    kind: ConnectionKind,
    services: ConnectionServices,
    inner: Mutex<ConnectionInner>,
    toggle: OperationSlot<ToggleOperation>,
    reconnect: Option<ReconnectController<Connection>>,
    socket_connected: watch::Sender<bool>,
    this: Weak<Connection>,
}

impl Connection {
    pub(crate) fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        url: Url,
        kind: ConnectionKind,
        initial: ConnectionState,
        services: ConnectionServices,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Connection>| {
            let reconnect = kind
                .is_remote()
                .then(|| ReconnectController::new(this.clone(), services.prompter.clone()));
            let (socket_connected, _) = watch::channel(false);
            Connection {
                id: id.into(),
                label: label.into(),
                url,
                kind,
                services,
                inner: Mutex::new(ConnectionInner::new(initial)),
                toggle: OperationSlot::new(),
                reconnect,
                socket_connected,
                this: this.clone(),
            }
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> &ConnectionKind {
        &self.kind
    }

    pub fn is_remote(&self) -> bool {
        self.kind.is_remote()
    }

    pub fn username(&self) -> Option<&str> {
        match &self.kind {
            ConnectionKind::Remote { username } => username.as_deref(),
            ConnectionKind::Local => None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn environment(&self) -> Option<EnvironmentInfo> {
        self.lock().environment.clone()
    }

    /// Projects in the order the backend listed them.
    pub fn projects(&self) -> Vec<Arc<Project>> {
        self.lock().projects.values().cloned().collect()
    }

    pub fn project(&self, project_id: &str) -> Option<Arc<Project>> {
        self.lock().projects.get(project_id).cloned()
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }

    /// Redacted summary of the last enable or token failure, cleared on success.
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn toggle_in_progress(&self) -> Option<ToggleOperation> {
        self.toggle.current()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn reconnect(&self) -> Option<&ReconnectController<Connection>> {
        self.reconnect.as_ref()
    }

    /// Brings the connection to `Ready`.
    ///
    /// Remote connections first need a reachable URL and an access token. Any
    /// failure leaves the connection in `NetworkError` or `AuthError`.
    pub async fn enable(&self) -> Result<(), ConnectionError> {
        self.ensure_live()?;
        let _toggle = self.claim_toggle(ToggleOperation::Connecting)?;

        if self.state() == ConnectionState::Disabled {
            if let Err(error) = self.services.preferences.set_disabled(&self.id, false) {
                warn!(connection = %self.id, error = %error, "failed to persist enabled connection");
            }
            self.set_state(ConnectionState::Initializing);
        }

        info!(connection = %self.id, url = %self.url, "enabling connection");
        match self.establish().await {
            Ok(()) => {
                self.lock().last_error = None;
                self.log(LogLevel::Info, format!("Connected to {}", self.url)).await;
                Ok(())
            }
            Err(error) => {
                if self.is_disposed() {
                    return Err(error);
                }
                self.lock().tearing_down = true;
                self.dispose_transport();
                {
                    let mut inner = self.lock();
                    inner.tearing_down = false;
                    inner.has_initialized = false;
                    inner.has_connected = false;
                    inner.last_error = Some(error.summary());
                }

                warn!(connection = %self.id, error = %error, "failed to enable connection");
                self.log(LogLevel::Error, error.summary()).await;
                let terminal = error.terminal_state();
                self.set_state(terminal);
                // Staying in `NetworkError` is not a transition; a retry skipped during this toggle needs re-arming.
                if terminal == ConnectionState::NetworkError
                    && let Some(reconnect) = &self.reconnect
                {
                    reconnect.ensure_scheduled();
                }
                Err(error)
            }
        }
    }

    /// Tears a remote connection down and remembers that the user turned it off.
    pub async fn disable(&self) -> Result<(), ConnectionError> {
        if !self.is_remote() {
            return Err(ConnectionError::LocalDisable);
        }
        self.ensure_live()?;
        let _toggle = self.claim_toggle(ToggleOperation::Disconnecting)?;

        if let Some(reconnect) = &self.reconnect {
            reconnect.reset();
        }
        self.teardown();
        {
            let mut inner = self.lock();
            inner.access_token = None;
            inner.last_error = None;
        }
        self.set_state(ConnectionState::Disabled);
        if let Err(error) = self.services.preferences.set_disabled(&self.id, true) {
            warn!(connection = %self.id, error = %error, "failed to persist disabled connection");
        }

        info!(connection = %self.id, "connection disabled");
        self.log(LogLevel::Info, "Connection disabled").await;
        Ok(())
    }

    /// Final teardown when the connection leaves the registry. Idempotent.
    pub fn dispose(&self) {
        {
            let mut inner = self.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
        }
        if let Some(reconnect) = &self.reconnect {
            reconnect.reset();
        }
        self.teardown();
        debug!(connection = %self.id, "connection disposed");
    }

    /// Replaces the project list with a fresh listing.
    ///
    /// Projects are matched by id, so an `Arc<Project>` obtained earlier stays
    /// current. Projects missing from the listing are disposed.
    pub async fn refresh_projects(&self) -> Result<usize, ConnectionError> {
        let token = self.access_token();
        let records = self
            .services
            .backend
            .projects(&self.url, token.as_deref())
            .await
            .map_err(|error| self.backend_failure(error))?;
        let count = records.len();

        {
            let mut inner = self.lock();
            let mut previous = std::mem::take(&mut inner.projects);
            let mut next = IndexMap::with_capacity(count);
            for record in records {
                let project = match previous.shift_remove(&record.id) {
                    Some(existing) => {
                        existing.update(record);
                        existing
                    }
                    None => Arc::new(Project::new(self.id.clone(), record)),
                };
                next.insert(project.id().to_string(), project);
            }
            for stale in previous.values() {
                stale.dispose();
            }
            inner.projects = next;
        }

        debug!(connection = %self.id, count, "projects refreshed");
        self.services.events.emit_project(ProjectChange::Refreshed {
            connection_id: self.id.clone(),
            count,
        });
        Ok(count)
    }

    /// Fetches a new access token for a remote connection.
    ///
    /// A rejection moves the connection to `AuthError`; a success out of
    /// `AuthError` restores `Ready` when the transport is still up.
    pub async fn refresh_access_token(&self) -> Result<(), ConnectionError> {
        if !self.is_remote() {
            return Ok(());
        }
        match self.fetch_access_token().await {
            Ok(token) => {
                let restore = {
                    let mut inner = self.lock();
                    inner.access_token = Some(token);
                    let was_rejected = inner.state == ConnectionState::AuthError;
                    if was_rejected {
                        inner.last_error = None;
                    }
                    was_rejected && inner.has_initialized && inner.has_connected
                };
                if restore {
                    info!(connection = %self.id, "re-authenticated");
                    self.set_state(ConnectionState::Ready);
                }
                Ok(())
            }
            Err(error) => {
                if error.is_auth_rejected() {
                    {
                        let mut inner = self.lock();
                        inner.access_token = None;
                        inner.last_error = Some(error.summary());
                    }
                    warn!(connection = %self.id, error = %error, "access token rejected");
                    self.log(LogLevel::Error, error.summary()).await;
                    self.set_state(ConnectionState::AuthError);
                }
                Err(error)
            }
        }
    }

    /// Stores new credentials in the CLI keyring. The cached token is dropped.
    pub async fn update_credentials(&self, username: &str, password: &str) -> Result<(), ConnectionError> {
        let args = [
            "--conid".to_string(),
            self.id.clone(),
            "--username".to_string(),
            username.to_string(),
            "--password".to_string(),
            password.to_string(),
        ];
        self.services.executor.execute(KEYRING_UPDATE, &args, None).await?;
        self.lock().access_token = None;
        debug!(connection = %self.id, "credentials updated");
        Ok(())
    }

    async fn establish(&self) -> Result<(), ConnectionError> {
        self.dispose_transport();
        self.reset_flags();

        if self.is_remote() {
            self.services
                .backend
                .ping(&self.url)
                .await
                .map_err(|error| ConnectionError::unreachable(self.url.as_str(), error.to_string()))?;
            let token = self.fetch_access_token().await?;
            self.lock().access_token = Some(token);
        }

        self.wait_until_ready().await?;

        let token = self.access_token();
        let environment = self
            .services
            .backend
            .environment(&self.url, token.as_deref())
            .await
            .map_err(|error| self.backend_failure(error))?;
        let namespace = environment.socket_namespace.clone();
        debug!(connection = %self.id, version = %environment.version, workspace = %environment.workspace_location, "environment loaded");
        self.lock().environment = Some(environment);

        let SocketConnection { socket, events } = self
            .services
            .sockets
            .connect(&self.url, namespace.as_deref())
            .await
            .map_err(|error| self.backend_failure(error))?;
        if let Some(token) = &token
            && let Err(error) = socket.authenticate(token).await
        {
            socket.dispose();
            return Err(self.backend_failure(error));
        }
        let listener = self.spawn_socket_listener(events);
        {
            let mut inner = self.lock();
            inner.socket = Some(socket);
            inner.socket_task = Some(listener);
        }

        let auth: Option<Arc<dyn TokenSource>> = self
            .is_remote()
            .then(|| Arc::new(ConnectionTokens(self.this.clone())) as Arc<dyn TokenSource>);
        let watcher = self
            .services
            .watchers
            .create(WatcherSpec {
                url: self.url.clone(),
                log_dir: self.services.settings.log_dir.clone(),
                cli_path: self.services.settings.cli_path.clone(),
                auth,
            })
            .await
            .map_err(|error| self.backend_failure(error))?;
        self.lock().watcher = Some(watcher);

        self.refresh_projects().await?;
        self.lock().has_initialized = true;

        self.wait_for_socket().await?;
        self.try_mark_ready();
        Ok(())
    }

    /// Polls the readiness endpoint until it answers truthy. The timeout bounds wall time,
    /// including probes that hang.
    async fn wait_until_ready(&self) -> Result<(), ConnectionError> {
        let timeout = self.services.settings.readiness_timeout;
        match tokio::time::timeout(timeout, self.poll_readiness(timeout)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(connection = %self.id, timeout_secs = timeout.as_secs(), "readiness deadline reached");
                Err(self.not_ready(timeout))
            }
        }
    }

    async fn poll_readiness(&self, timeout: Duration) -> Result<(), ConnectionError> {
        let attempts = (timeout.as_secs() / READINESS_POLL_INTERVAL.as_secs()).max(1);

        for attempt in 1..=attempts {
            let token = self.access_token();
            match self.services.backend.is_ready(&self.url, token.as_deref()).await {
                Ok(true) => {
                    debug!(connection = %self.id, attempt, "instance ready");
                    return Ok(());
                }
                Ok(false) => debug!(connection = %self.id, attempt, "instance not ready yet"),
                Err(error) if error.is_unauthorized() => return Err(self.backend_failure(error)),
                Err(error) => debug!(connection = %self.id, attempt, error = %error, "readiness probe failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(READINESS_POLL_INTERVAL).await;
            }
        }

        Err(self.not_ready(timeout))
    }

    fn not_ready(&self, timeout: Duration) -> ConnectionError {
        ConnectionError::NotReady {
            url: self.url.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    }

    async fn wait_for_socket(&self) -> Result<(), ConnectionError> {
        let mut connected = self.socket_connected.subscribe();
        let timeout = self.services.settings.socket_connect_timeout;
        match tokio::time::timeout(timeout, connected.wait_for(|connected| *connected)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ConnectionError::network(self.url.as_str(), "event socket closed")),
            Err(_) => Err(ConnectionError::network(
                self.url.as_str(),
                format!("event socket did not connect within {} seconds", timeout.as_secs()),
            )),
        }
    }

    async fn fetch_access_token(&self) -> Result<String, ConnectionError> {
        let args = ["--conid".to_string(), self.id.clone()];
        let output = self
            .services
            .executor
            .execute(TOKEN_GET, &args, None)
            .await
            .map_err(|error| self.token_failure(error))?;
        let token: AccessToken = output.decode(&TOKEN_GET).map_err(|error| self.token_failure(error))?;
        Ok(token.access_token)
    }

    fn spawn_socket_listener(&self, mut events: mpsc::UnboundedReceiver<SocketEvent>) -> JoinHandle<()> {
        let this = self.this.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(connection) = this.upgrade() else {
                    break;
                };
                connection.on_socket_event(event).await;
            }
        })
    }

    async fn on_socket_event(&self, event: SocketEvent) {
        match event {
            SocketEvent::Connected => {
                let first = {
                    let mut inner = self.lock();
                    if inner.tearing_down || inner.disposed {
                        return;
                    }
                    !std::mem::replace(&mut inner.has_connected, true)
                };
                self.socket_connected.send_replace(true);

                if first {
                    debug!(connection = %self.id, "event socket connected");
                    self.try_mark_ready();
                    return;
                }

                debug!(connection = %self.id, "event socket reconnected");
                if let Err(error) = self.refresh_projects().await {
                    warn!(connection = %self.id, error = %error, "failed to refresh projects after reconnect");
                }
                self.try_mark_ready();
            }
            SocketEvent::Disconnected { reason } => {
                {
                    let inner = self.lock();
                    if inner.tearing_down || inner.disposed || inner.state == ConnectionState::Disabled {
                        return;
                    }
                }
                self.socket_connected.send_replace(false);
                warn!(connection = %self.id, reason = %reason, "event socket disconnected");
                self.log(LogLevel::Warn, format!("Event socket disconnected: {reason}")).await;
                self.set_state(ConnectionState::NetworkError);
            }
        }
    }

    fn try_mark_ready(&self) {
        let ready = {
            let inner = self.lock();
            inner.has_initialized
                && inner.has_connected
                && !inner.tearing_down
                && !inner.disposed
                && !matches!(inner.state, ConnectionState::Disabled | ConnectionState::AuthError)
        };
        if ready {
            self.set_state(ConnectionState::Ready);
        }
    }

    fn set_state(&self, new: ConnectionState) {
        let old = {
            let mut inner = self.lock();
            if inner.state == new {
                return;
            }
            std::mem::replace(&mut inner.state, new)
        };

        info!(connection = %self.id, from = %old, to = %new, "connection state changed");
        self.services.events.emit_connection(ConnectionChange::StateChanged {
            id: self.id.clone(),
            old,
            new,
        });

        if let Some(reconnect) = &self.reconnect {
            if new == ConnectionState::NetworkError {
                reconnect.schedule_reconnect();
            } else if old == ConnectionState::NetworkError {
                reconnect.reset();
            }
        }
    }

    /// Disposes socket, watcher and projects, then clears the setup flags.
    fn teardown(&self) {
        self.lock().tearing_down = true;
        self.dispose_transport();

        let projects = std::mem::take(&mut self.lock().projects);
        for project in projects.values() {
            project.dispose();
        }
        if !projects.is_empty() {
            self.services.events.emit_project(ProjectChange::Cleared {
                connection_id: self.id.clone(),
            });
        }

        self.reset_flags();
        self.lock().tearing_down = false;
    }

    fn dispose_transport(&self) {
        let (socket, watcher, listener) = {
            let mut inner = self.lock();
            (inner.socket.take(), inner.watcher.take(), inner.socket_task.take())
        };
        if let Some(socket) = socket {
            socket.dispose();
        }
        if let Some(watcher) = watcher {
            watcher.dispose();
        }
        if let Some(listener) = listener {
            listener.abort();
        }
        self.socket_connected.send_replace(false);
    }

    fn reset_flags(&self) {
        let mut inner = self.lock();
        inner.has_connected = false;
        inner.has_initialized = false;
    }

    fn claim_toggle(&self, operation: ToggleOperation) -> Result<Option<SlotGuard<'_, ToggleOperation>>, ConnectionError> {
        if !self.is_remote() {
            return Ok(None);
        }
        self.toggle
            .try_claim(operation)
            .map(Some)
            .map_err(|running| {
                warn!(connection = %self.id, running = %running, requested = %operation, "connection toggle rejected");
                ConnectionError::ToggleInProgress {
                    connection: self.label.clone(),
                    operation: running,
                }
            })
    }

    fn ensure_live(&self) -> Result<(), ConnectionError> {
        if self.is_disposed() {
            return Err(ConnectionError::Disposed {
                connection: self.label.clone(),
            });
        }
        Ok(())
    }

    fn backend_failure(&self, error: BackendError) -> ConnectionError {
        if error.is_unauthorized() {
            ConnectionError::auth_rejected(self.label.clone(), error.to_string())
        } else {
            ConnectionError::network(self.url.as_str(), error.to_string())
        }
    }

    /// Only a failure the CLI explains itself (the auth server's `error_description`) is a
    /// credential rejection. Launch failures and crashes are treated as network trouble.
    fn token_failure(&self, error: CliError) -> ConnectionError {
        if error.is_cancelled() {
            ConnectionError::Cancelled
        } else if error.is_described() {
            ConnectionError::auth_rejected(self.label.clone(), error.summary())
        } else {
            ConnectionError::network(self.url.as_str(), error.summary())
        }
    }

    async fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.services
            .output_log
            .system(&connection_channel(&self.id), level, message)
            .await;
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("url", &self.url.as_str())
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl Reconnectable for Connection {
    fn reconnect_label(&self) -> String {
        self.label.clone()
    }

    fn current_state(&self) -> ConnectionState {
        self.state()
    }

    fn is_toggle_in_progress(&self) -> bool {
        self.toggle.is_busy()
    }

    async fn attempt_reconnect(&self) -> Result<(), ConnectionError> {
        self.enable().await
    }

    async fn disable_after_retries(&self) -> Result<(), ConnectionError> {
        self.disable().await
    }
}

/// Hands the watcher whatever token the connection currently holds.
struct ConnectionTokens(Weak<Connection>);

impl TokenSource for ConnectionTokens {
    fn current_token(&self) -> Option<String> {
        self.0.upgrade().and_then(|connection| connection.access_token())
    }
}
