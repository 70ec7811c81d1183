//! Core types for the control core.

pub mod errors;
pub mod log;

pub use errors::{CliError, ConnectionError, LifecycleError, RegistryError};
pub use log::{LogLevel, LogSource, OutputLogEntry};
