//! Error types for the lifecycle and connection core.
//!
//! Every enum carries a dedicated `Cancelled` variant so callers can tell "the
//! user backed out" apart from "the operation failed" with `is_cancelled()`
//! instead of comparing messages.

use stevedore_types::ConnectionState;
use stevedore_util::redact_sensitive;
use thiserror::Error;

use crate::cli::LifecycleCommandKind;
use crate::config::ConfigError;
use crate::connection::ToggleOperation;

/// Errors produced while running the runtime CLI.
#[derive(Debug, Clone, Error)]
pub enum CliError {
    /// The process was killed (user cancellation, timeout, or an external signal).
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to launch {executable}: {reason}")]
    Spawn { executable: String, reason: String },

    /// Non-zero exit, or an `error_description` in otherwise successful output.
    #[error("`{command}` failed: {message}")]
    Process {
        command: String,
        exit_code: Option<i32>,
        message: String,
        stdout: String,
        stderr: String,
        /// The message came from the CLI's own `error_description` field.
        described: bool,
    },

    /// Output that had to be JSON could not be parsed.
    #[error("`{command}` produced unreadable output: {reason}")]
    MalformedOutput { command: String, reason: String, stdout: String },
}

impl CliError {
    pub fn spawn(executable: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Spawn {
            executable: executable.into(),
            reason: reason.into(),
        }
    }

    pub fn process(
        command: impl Into<String>,
        exit_code: Option<i32>,
        message: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::Process {
            command: command.into(),
            exit_code,
            message: message.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
            described: false,
        }
    }

    /// Marks a process failure as reported through `error_description`.
    pub fn described(mut self) -> Self {
        if let CliError::Process { described, .. } = &mut self {
            *described = true;
        }
        self
    }

    /// Whether the CLI itself explained the failure (for example an auth server rejecting credentials),
    /// as opposed to a crash, a launch failure or unreadable output.
    pub fn is_described(&self) -> bool {
        matches!(self, CliError::Process { described: true, .. })
    }

    pub fn malformed(command: impl Into<String>, reason: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self::MalformedOutput {
            command: command.into(),
            reason: reason.into(),
            stdout: stdout.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CliError::Cancelled)
    }

    /// The failure message without the command prefix.
    pub fn message(&self) -> String {
        match self {
            CliError::Cancelled => "cancelled".to_string(),
            CliError::Spawn { reason, .. } => reason.clone(),
            CliError::Process { message, .. } => message.clone(),
            CliError::MalformedOutput { reason, .. } => reason.clone(),
        }
    }

    /// Full text for the output log, including everything the process printed.
    pub fn detail(&self) -> String {
        match self {
            CliError::Process { stdout, stderr, .. } => {
                format!("{self}\n--- stdout ---\n{}\n--- stderr ---\n{}", stdout.trim_end(), stderr.trim_end())
            }
            CliError::MalformedOutput { stdout, .. } => format!("{self}\n--- stdout ---\n{}", stdout.trim_end()),
            other => other.to_string(),
        }
    }

    /// One-line message suitable for a user-facing banner.
    pub fn summary(&self) -> String {
        redact_sensitive(&self.to_string())
    }
}

/// Errors from the local lifecycle state machine.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Operation cancelled")]
    Cancelled,

    /// Another lifecycle command holds the lock. Never queued.
    #[error("Cannot {requested} while {running} is in progress")]
    Busy {
        running: LifecycleCommandKind,
        requested: LifecycleCommandKind,
    },

    #[error("The container engine is not reachable. Start Docker and try again.")]
    EngineUnavailable { detail: String },

    #[error(transparent)]
    Cli(CliError),
}

impl LifecycleError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LifecycleError::Cancelled)
    }

    pub fn summary(&self) -> String {
        match self {
            LifecycleError::Cli(error) => error.summary(),
            other => other.to_string(),
        }
    }
}

impl From<CliError> for LifecycleError {
    fn from(error: CliError) -> Self {
        if error.is_cancelled() {
            LifecycleError::Cancelled
        } else {
            LifecycleError::Cli(error)
        }
    }
}

/// Errors raised while enabling, disabling or refreshing a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Operation cancelled")]
    Cancelled,

    /// The pre-flight ping failed; usually a wrong URL rather than a flaky network.
    #[error("Could not reach {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("{url} did not become ready within {timeout_secs} seconds")]
    NotReady { url: String, timeout_secs: u64 },

    #[error("Authentication for {connection} was rejected: {reason}")]
    AuthRejected { connection: String, reason: String },

    #[error("Network error talking to {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Connection {connection} is already {operation}")]
    ToggleInProgress { connection: String, operation: ToggleOperation },

    #[error("The local connection cannot be disabled; stop the local runtime instead")]
    LocalDisable,

    #[error("Connection {connection} has been removed")]
    Disposed { connection: String },

    #[error(transparent)]
    Cli(CliError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ConnectionError {
    pub fn unreachable(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn network(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn auth_rejected(connection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AuthRejected {
            connection: connection.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            ConnectionError::Cancelled => true,
            ConnectionError::Lifecycle(error) => error.is_cancelled(),
            _ => false,
        }
    }

    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, ConnectionError::AuthRejected { .. })
    }

    /// The state a connection lands in when `enable()` fails with this error.
    pub fn terminal_state(&self) -> ConnectionState {
        if self.is_auth_rejected() {
            ConnectionState::AuthError
        } else {
            ConnectionState::NetworkError
        }
    }

    pub fn summary(&self) -> String {
        redact_sensitive(&self.to_string())
    }
}

impl From<CliError> for ConnectionError {
    fn from(error: CliError) -> Self {
        if error.is_cancelled() {
            ConnectionError::Cancelled
        } else {
            ConnectionError::Cli(error)
        }
    }
}

/// Errors from the connection registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Connection not found: {id}")]
    NotFound { id: String },

    #[error("A local connection is already registered")]
    LocalAlreadyExists,

    #[error("Invalid connection URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Cli(#[from] CliError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RegistryError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            RegistryError::Cli(error) => error.is_cancelled(),
            RegistryError::Connection(error) => error.is_cancelled(),
            _ => false,
        }
    }

    pub fn summary(&self) -> String {
        redact_sensitive(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_detected_through_conversions() {
        assert!(LifecycleError::from(CliError::Cancelled).is_cancelled());
        assert!(ConnectionError::from(CliError::Cancelled).is_cancelled());
        assert!(ConnectionError::Lifecycle(LifecycleError::Cancelled).is_cancelled());

        let failed = CliError::process("install", Some(1), "boom", "", "");
        assert!(!LifecycleError::from(failed).is_cancelled());
    }

    #[test]
    fn terminal_state_separates_auth_from_network() {
        assert_eq!(ConnectionError::auth_rejected("c1", "invalid_grant").terminal_state(), ConnectionState::AuthError);
        assert_eq!(ConnectionError::unreachable("http://x", "refused").terminal_state(), ConnectionState::NetworkError);
        assert_eq!(
            ConnectionError::NotReady {
                url: "http://x".into(),
                timeout_secs: 90
            }
            .terminal_state(),
            ConnectionState::NetworkError
        );
    }

    #[test]
    fn summary_masks_credentials_but_detail_keeps_output() {
        let error = CliError::process(
            "seckeyring update",
            Some(1),
            "rejected --password hunter2",
            "{\"error_description\": \"rejected\"}",
            "trace",
        );
        assert!(!error.summary().contains("hunter2"));
        let detail = error.detail();
        assert!(detail.contains("--- stdout ---"));
        assert!(detail.contains("trace"));
    }
}
