//! Event socket and file watcher used by the command-line front end.
//!
//! The terminal front end has no push channel of its own. Its "socket" polls
//! the instance's health endpoint and reports connect/disconnect transitions,
//! which is all the connection state machine consumes. Files are not watched.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stevedore_runtime::backend::{
    BackendApi, BackendError, Disposable, EventSocket, FileWatcherFactory, SocketConnection, SocketEvent, SocketFactory, WatcherSpec,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct HealthSocketFactory {
    backend: Arc<dyn BackendApi>,
    interval: Duration,
}

impl HealthSocketFactory {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self {
            backend,
            interval: HEALTH_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[async_trait]
impl SocketFactory for HealthSocketFactory {
    async fn connect(&self, url: &Url, namespace: Option<&str>) -> Result<SocketConnection, BackendError> {
        debug!(url = %url, namespace = ?namespace, "opening health socket");
        let (events, receiver) = mpsc::unbounded_channel();
        let socket = Arc::new(HealthSocket {
            shutdown: CancellationToken::new(),
            token: Mutex::new(None),
        });

        let backend = self.backend.clone();
        let url = url.clone();
        let interval = self.interval;
        let shutdown = socket.shutdown.clone();
        tokio::spawn(async move {
            let mut connected = false;
            loop {
                let reachable = backend.ping(&url).await;
                let event = match (&reachable, connected) {
                    (Ok(()), false) => Some(SocketEvent::Connected),
                    (Err(error), true) => Some(SocketEvent::Disconnected { reason: error.to_string() }),
                    _ => None,
                };
                connected = reachable.is_ok();
                if let Some(event) = event
                    && events.send(event).is_err()
                {
                    break;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        Ok(SocketConnection { socket, events: receiver })
    }
}

struct HealthSocket {
    shutdown: CancellationToken,
    token: Mutex<Option<String>>,
}

#[async_trait]
impl EventSocket for HealthSocket {
    async fn authenticate(&self, token: &str) -> Result<(), BackendError> {
        *self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.to_string());
        Ok(())
    }

    fn dispose(&self) {
        self.shutdown.cancel();
    }
}

#[derive(Debug, Default)]
pub struct NoopWatchers;

struct NoopWatcher;

impl Disposable for NoopWatcher {
    fn dispose(&self) {}
}

#[async_trait]
impl FileWatcherFactory for NoopWatchers {
    async fn create(&self, spec: WatcherSpec) -> Result<Box<dyn Disposable>, BackendError> {
        debug!(?spec, "file watching is not available in the terminal front end");
        Ok(Box::new(NoopWatcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use stevedore_types::{EnvironmentInfo, ProjectRecord};

    #[derive(Default)]
    struct FlakyBackend {
        down: AtomicBool,
    }

    #[async_trait]
    impl BackendApi for FlakyBackend {
        async fn ping(&self, base: &Url) -> Result<(), BackendError> {
            if self.down.load(Ordering::SeqCst) {
                Err(BackendError::transport(base.as_str(), "connection refused"))
            } else {
                Ok(())
            }
        }

        async fn is_ready(&self, _base: &Url, _token: Option<&str>) -> Result<bool, BackendError> {
            Ok(true)
        }

        async fn environment(&self, _base: &Url, _token: Option<&str>) -> Result<EnvironmentInfo, BackendError> {
            Ok(EnvironmentInfo::default())
        }

        async fn projects(&self, _base: &Url, _token: Option<&str>) -> Result<Vec<ProjectRecord>, BackendError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reports_transitions_only() {
        let backend = Arc::new(FlakyBackend::default());
        let factory = HealthSocketFactory::new(backend.clone()).with_interval(Duration::from_secs(1));
        let url = Url::parse("http://localhost:9090").unwrap();

        let SocketConnection { socket, mut events } = factory.connect(&url, None).await.unwrap();
        assert_eq!(events.recv().await, Some(SocketEvent::Connected));

        backend.down.store(true, Ordering::SeqCst);
        assert!(matches!(events.recv().await, Some(SocketEvent::Disconnected { .. })));

        backend.down.store(false, Ordering::SeqCst);
        assert_eq!(events.recv().await, Some(SocketEvent::Connected));

        socket.dispose();
        assert_eq!(events.recv().await, None);
    }
}
