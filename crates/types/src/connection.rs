use serde::{Deserialize, Serialize};

/// State of one logical connection to a runtime instance.
///
/// `Disabled` is only ever entered by remote connections; the local connection
/// is removed from the registry instead of being disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Initializing,
    Ready,
    NetworkError,
    AuthError,
    Disabled,
}

impl ConnectionState {
    /// Whether the connection can currently be used.
    ///
    /// Derived from the variant alone; there is no separate flag to keep in sync.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionState::NetworkError | ConnectionState::AuthError)
    }

    /// Get the display text for this state.
    pub fn display(&self) -> &'static str {
        match self {
            ConnectionState::Initializing => "Connecting",
            ConnectionState::Ready => "Connected",
            ConnectionState::NetworkError => "Disconnected",
            ConnectionState::AuthError => "Authentication error",
            ConnectionState::Disabled => "Disabled",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display())
    }
}
