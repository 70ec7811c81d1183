//! Event socket seam.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use super::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Connected,
    Disconnected { reason: String },
}

/// A live push-notification socket. Message content is not interpreted here.
#[async_trait]
pub trait EventSocket: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<(), BackendError>;

    /// Closes the socket. Emits no further events.
    fn dispose(&self);
}

/// An opened socket together with its connect/disconnect event stream.
pub struct SocketConnection {
    pub socket: Arc<dyn EventSocket>,
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

#[async_trait]
pub trait SocketFactory: Send + Sync {
    async fn connect(&self, url: &Url, namespace: Option<&str>) -> Result<SocketConnection, BackendError>;
}
