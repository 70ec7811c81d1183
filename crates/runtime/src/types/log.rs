//! Entries recorded in the in-memory output log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of an output log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(text)
    }
}

/// Where a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSource {
    Stdout,
    Stderr,
    /// Written by stevedore itself (invocations, state transitions).
    System,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            LogSource::Stdout => "stdout",
            LogSource::Stderr => "stderr",
            LogSource::System => "system",
        };
        f.write_str(text)
    }
}

/// A single line in the output log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub source: LogSource,
    /// Log channel, e.g. `cli` or `connection:<id>`.
    pub channel: String,
    pub message: String,
}

impl OutputLogEntry {
    pub fn new(level: LogLevel, message: String, source: LogSource, channel: String) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            source,
            channel,
            message,
        }
    }
}
