//! Lifecycle and connection control core for Stevedore.
//!
//! This crate drives the local container runtime through its CLI (install,
//! start, stop, remove, upgrade), keeps connections to the local instance and
//! to remote instances alive, and publishes state changes to subscribers.

pub mod backend;
pub mod cli;
pub mod config;
pub mod connection;
pub mod context;
pub mod lifecycle;
pub mod logging;
pub mod slot;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, ConfigStore, EnvironmentOverrides, StevedoreConfig};
pub use connection::{Connection, ConnectionChange, ConnectionRegistry, ProjectChange};
pub use context::{AppCollaborators, AppContext};
pub use lifecycle::{LifecycleManager, StartReport};
pub use logging::CliOutputLog;
pub use types::{CliError, ConnectionError, LifecycleError, RegistryError};
