//! Test doubles shared by the lifecycle and connection tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use stevedore_types::{EnvironmentInfo, ProjectRecord};
use tokio::sync::{Notify, mpsc};
use url::Url;

use crate::backend::{
    BackendApi, BackendError, Disposable, EventSocket, FileWatcherFactory, Notice, Prompt, Prompter, SocketConnection, SocketEvent,
    SocketFactory, WatcherSpec,
};
use crate::cli::{CliCommand, CliExecutor, CliOutput, ProgressScope, ProgressSink};
use crate::config::{ConfigError, ConnectionPreferences};
use crate::connection::{ConnectionEvents, ConnectionServices, ConnectionSettings};
use crate::logging::CliOutputLog;
use crate::types::CliError;

/// A scripted runtime CLI.
///
/// Responses are queued per command name; the last queued response is sticky.
/// Commands without a script succeed with empty output.
#[derive(Default)]
pub struct FakeCli {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    responses: Mutex<HashMap<String, VecDeque<Result<CliOutput, CliError>>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakeCli {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, command: &str, response: Result<CliOutput, CliError>) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn respond_json(&self, command: &str, value: Value) -> &Self {
        self.respond(command, Ok(CliOutput::Structured(value)))
    }

    /// Makes `command` wait until the returned handle is notified (or its scope is cancelled).
    pub fn gate(&self, command: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(command.to_string(), notify.clone());
        notify
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn command_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls().iter().filter(|(name, _)| name == command).count()
    }

    fn next_response(&self, command: &CliCommand) -> Result<CliOutput, CliError> {
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(&command.display_name()) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| Ok(CliOutput::empty())),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| Ok(CliOutput::empty())),
            None if command.descriptor().structured_output => Ok(CliOutput::empty()),
            None => Ok(CliOutput::Text(String::new())),
        }
    }
}

#[async_trait]
impl CliExecutor for FakeCli {
    async fn execute(&self, command: CliCommand, args: &[String], progress: Option<ProgressScope>) -> Result<CliOutput, CliError> {
        let name = command.display_name();
        self.calls.lock().unwrap().push((name.clone(), args.to_vec()));

        let gate = self.gates.lock().unwrap().get(&name).cloned();
        if let Some(gate) = gate {
            let cancellation = progress
                .as_ref()
                .filter(|_| command.descriptor().cancellable)
                .map(|scope| scope.cancellation.clone());
            match cancellation {
                Some(token) => {
                    tokio::select! {
                        _ = gate.notified() => {}
                        _ = token.cancelled() => return Err(CliError::Cancelled),
                    }
                }
                None => gate.notified().await,
            }
        }
        self.next_response(&command)
    }
}

/// Answers prompts from a queue (default: yes) and records everything shown.
#[derive(Default)]
pub struct FakePrompter {
    answers: Mutex<VecDeque<bool>>,
    prompts: Mutex<Vec<Prompt>>,
    notices: Mutex<Vec<Notice>>,
}

impl FakePrompter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answering(answers: &[bool]) -> Arc<Self> {
        let prompter = Self::default();
        prompter.answers.lock().unwrap().extend(answers.iter().copied());
        Arc::new(prompter)
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prompter for FakePrompter {
    async fn confirm(&self, prompt: Prompt) -> bool {
        self.prompts.lock().unwrap().push(prompt);
        self.answers.lock().unwrap().pop_front().unwrap_or(true)
    }

    async fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

#[derive(Default)]
pub struct RecordingProgress(Mutex<Vec<(String, String)>>);

impl RecordingProgress {
    pub fn labels(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(label, _)| label.clone()).collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, label: &str, message: &str) {
        self.0.lock().unwrap().push((label.to_string(), message.to_string()));
    }
}

/// An in-process runtime instance.
#[derive(Default)]
pub struct FakeBackend {
    pub unreachable: AtomicBool,
    pub not_ready: AtomicBool,
    /// Readiness probes stall for 30 s and then fail, like a socket that accepts but never answers.
    pub hang_ready: AtomicBool,
    pub unauthorized: AtomicBool,
    pub ready_checks: AtomicUsize,
    projects: Mutex<Vec<ProjectRecord>>,
    tokens: Mutex<Vec<Option<String>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_projects(&self, projects: &[(&str, &str)]) {
        *self.projects.lock().unwrap() = projects
            .iter()
            .map(|(id, name)| ProjectRecord {
                id: id.to_string(),
                name: name.to_string(),
                language: None,
                state: Some("open".into()),
                app_status: None,
            })
            .collect();
    }

    /// Tokens presented to the readiness endpoint, in order.
    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.tokens.lock().unwrap().clone()
    }

    fn check_auth(&self, base: &Url) -> Result<(), BackendError> {
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(BackendError::Unauthorized {
                url: base.to_string(),
                status: 401,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn ping(&self, base: &Url) -> Result<(), BackendError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BackendError::transport(base.as_str(), "connection refused"));
        }
        Ok(())
    }

    async fn is_ready(&self, base: &Url, token: Option<&str>) -> Result<bool, BackendError> {
        self.ready_checks.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(token.map(str::to_string));
        if self.hang_ready.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
            return Err(BackendError::transport(base.as_str(), "operation timed out"));
        }
        self.check_auth(base)?;
        Ok(!self.not_ready.load(Ordering::SeqCst))
    }

    async fn environment(&self, base: &Url, _token: Option<&str>) -> Result<EnvironmentInfo, BackendError> {
        self.check_auth(base)?;
        Ok(EnvironmentInfo {
            workspace_location: "/workspace".into(),
            version: "1.0.0".into(),
            socket_namespace: Some("/events".into()),
        })
    }

    async fn projects(&self, base: &Url, _token: Option<&str>) -> Result<Vec<ProjectRecord>, BackendError> {
        self.check_auth(base)?;
        Ok(self.projects.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeSocket {
    authenticated_with: Mutex<Option<String>>,
    disposed: AtomicBool,
}

impl FakeSocket {
    pub fn token(&self) -> Option<String> {
        self.authenticated_with.lock().unwrap().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSocket for FakeSocket {
    async fn authenticate(&self, token: &str) -> Result<(), BackendError> {
        *self.authenticated_with.lock().unwrap() = Some(token.to_string());
        Ok(())
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Opens [`FakeSocket`]s. By default each socket reports `Connected` right away.
pub struct FakeSockets {
    auto_connect: AtomicBool,
    opened: Mutex<Vec<(Arc<FakeSocket>, mpsc::UnboundedSender<SocketEvent>)>>,
    namespaces: Mutex<Vec<Option<String>>>,
}

impl FakeSockets {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            auto_connect: AtomicBool::new(true),
            opened: Mutex::new(Vec::new()),
            namespaces: Mutex::new(Vec::new()),
        })
    }

    /// Sockets that never connect on their own.
    pub fn silent() -> Arc<Self> {
        let sockets = Self::new();
        sockets.auto_connect.store(false, Ordering::SeqCst);
        sockets
    }

    pub fn sockets(&self) -> Vec<Arc<FakeSocket>> {
        self.opened.lock().unwrap().iter().map(|(socket, _)| socket.clone()).collect()
    }

    pub fn namespaces(&self) -> Vec<Option<String>> {
        self.namespaces.lock().unwrap().clone()
    }

    /// Delivers `event` on the most recently opened socket.
    pub fn emit(&self, event: SocketEvent) {
        if let Some((_, sender)) = self.opened.lock().unwrap().last() {
            let _ = sender.send(event);
        }
    }
}

#[async_trait]
impl SocketFactory for FakeSockets {
    async fn connect(&self, _url: &Url, namespace: Option<&str>) -> Result<SocketConnection, BackendError> {
        let (sender, events) = mpsc::unbounded_channel();
        if self.auto_connect.load(Ordering::SeqCst) {
            let _ = sender.send(SocketEvent::Connected);
        }
        let socket = Arc::new(FakeSocket::default());
        self.opened.lock().unwrap().push((socket.clone(), sender));
        self.namespaces.lock().unwrap().push(namespace.map(str::to_string));
        Ok(SocketConnection { socket, events })
    }
}

#[derive(Default)]
pub struct FakeWatchers {
    specs: Mutex<Vec<WatcherSpec>>,
    disposed: Arc<AtomicUsize>,
}

impl FakeWatchers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn specs(&self) -> Vec<WatcherSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

struct FakeWatcher(Arc<AtomicUsize>);

impl Disposable for FakeWatcher {
    fn dispose(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileWatcherFactory for FakeWatchers {
    async fn create(&self, spec: WatcherSpec) -> Result<Box<dyn Disposable>, BackendError> {
        self.specs.lock().unwrap().push(spec);
        Ok(Box::new(FakeWatcher(self.disposed.clone())))
    }
}

#[derive(Default)]
pub struct MemoryPreferences(Mutex<BTreeSet<String>>);

impl MemoryPreferences {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn disabled(&self) -> BTreeSet<String> {
        self.0.lock().unwrap().clone()
    }
}

impl ConnectionPreferences for MemoryPreferences {
    fn is_disabled(&self, connection_id: &str) -> bool {
        self.0.lock().unwrap().contains(connection_id)
    }

    fn set_disabled(&self, connection_id: &str, disabled: bool) -> Result<(), ConfigError> {
        let mut set = self.0.lock().unwrap();
        if disabled {
            set.insert(connection_id.to_string());
        } else {
            set.remove(connection_id);
        }
        Ok(())
    }
}

/// Every fake a connection needs, wired into [`ConnectionServices`].
pub struct Harness {
    pub cli: Arc<FakeCli>,
    pub backend: Arc<FakeBackend>,
    pub sockets: Arc<FakeSockets>,
    pub watchers: Arc<FakeWatchers>,
    pub prompter: Arc<FakePrompter>,
    pub preferences: Arc<MemoryPreferences>,
    pub output_log: Arc<CliOutputLog>,
    pub events: ConnectionEvents,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_sockets(FakeSockets::new())
    }

    pub fn with_sockets(sockets: Arc<FakeSockets>) -> Self {
        let cli = FakeCli::new();
        cli.respond_json("sectoken get", json!({"access_token": "token-1", "expires_in": 300}));
        Self {
            cli,
            backend: FakeBackend::new(),
            sockets,
            watchers: FakeWatchers::new(),
            prompter: FakePrompter::new(),
            preferences: MemoryPreferences::new(),
            output_log: Arc::new(CliOutputLog::new()),
            events: ConnectionEvents::new(),
        }
    }

    pub fn settings() -> ConnectionSettings {
        ConnectionSettings {
            readiness_timeout: Duration::from_secs(90),
            socket_connect_timeout: Duration::from_secs(30),
            log_dir: PathBuf::from("/tmp/stevedore-logs"),
            cli_path: PathBuf::from("stevectl"),
        }
    }

    pub fn services(&self) -> ConnectionServices {
        ConnectionServices {
            executor: self.cli.clone(),
            backend: self.backend.clone(),
            sockets: self.sockets.clone(),
            watchers: self.watchers.clone(),
            prompter: self.prompter.clone(),
            preferences: self.preferences.clone(),
            output_log: self.output_log.clone(),
            events: self.events.clone(),
            settings: Self::settings(),
        }
    }
}
