//! In-memory log of everything the runtime CLI printed.
//!
//! Entries are grouped by channel (`cli` for process output, `connection:<id>`
//! for per-connection events) and kept in bounded ring buffers. The "view log"
//! action exports a channel, or all of them, to a file.

mod formatter;
mod ring_buffer;

pub use formatter::{LogFormatter, RedactionRules};
pub use ring_buffer::LogRingBuffer;

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tokio::sync::{Mutex, broadcast};

use crate::types::{LogLevel, LogSource, OutputLogEntry};

/// Channel used for CLI process output.
pub const CLI_CHANNEL: &str = "cli";

const DEFAULT_MAX_ENTRIES: usize = 2000;

/// Channel name for a connection's events.
pub fn connection_channel(connection_id: &str) -> String {
    format!("connection:{connection_id}")
}

#[derive(Debug, Error)]
pub enum LogExportError {
    #[error("Failed to write log export to {path}: {reason}")]
    Write { path: String, reason: String },
}

#[derive(Debug)]
pub struct CliOutputLog {
    buffers: Mutex<HashMap<String, LogRingBuffer>>,
    formatter: LogFormatter,
    max_entries_per_channel: usize,
    live: broadcast::Sender<OutputLogEntry>,
}

impl CliOutputLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries_per_channel: usize) -> Self {
        let (live, _) = broadcast::channel(256);
        Self {
            buffers: Mutex::new(HashMap::new()),
            formatter: LogFormatter::new(),
            max_entries_per_channel,
            live,
        }
    }

    /// Live feed of new entries. Lagging receivers skip entries; the buffers keep them.
    pub fn subscribe(&self) -> broadcast::Receiver<OutputLogEntry> {
        self.live.subscribe()
    }

    pub async fn append(&self, entry: OutputLogEntry) {
        {
            let mut buffers = self.buffers.lock().await;
            buffers
                .entry(entry.channel.clone())
                .or_insert_with(|| LogRingBuffer::new(self.max_entries_per_channel))
                .push(entry.clone());
        }
        let _ = self.live.send(entry);
    }

    pub async fn record(&self, channel: &str, level: LogLevel, source: LogSource, message: impl Into<String>) {
        self.append(OutputLogEntry::new(level, message.into(), source, channel.to_string())).await;
    }

    /// Convenience for stevedore's own notes in a channel.
    pub async fn system(&self, channel: &str, level: LogLevel, message: impl Into<String>) {
        self.record(channel, level, LogSource::System, message).await;
    }

    pub async fn entries(&self, channel: &str) -> Vec<OutputLogEntry> {
        let buffers = self.buffers.lock().await;
        buffers.get(channel).map(LogRingBuffer::all).unwrap_or_default()
    }

    pub async fn recent(&self, channel: &str, count: usize) -> Vec<OutputLogEntry> {
        let buffers = self.buffers.lock().await;
        buffers.get(channel).map(|buffer| buffer.recent(count)).unwrap_or_default()
    }

    /// Every channel's entries merged in timestamp order.
    pub async fn all_entries(&self) -> Vec<OutputLogEntry> {
        let buffers = self.buffers.lock().await;
        let mut entries: Vec<_> = buffers.values().flat_map(LogRingBuffer::all).collect();
        entries.sort_by_key(|entry| entry.timestamp);
        entries
    }

    pub async fn clear(&self, channel: &str) {
        if let Some(buffer) = self.buffers.lock().await.get_mut(channel) {
            buffer.clear();
        }
    }

    /// Writes one channel (or every channel when `channel` is `None`) to `path`.
    pub async fn export(&self, channel: Option<&str>, path: &Path, redact: bool) -> Result<usize, LogExportError> {
        let entries = match channel {
            Some(channel) => self.entries(channel).await,
            None => self.all_entries().await,
        };

        let mut content = String::new();
        for entry in &entries {
            let line = if redact {
                self.formatter.format(entry)
            } else {
                self.formatter.format_raw(entry)
            };
            content.push_str(&line);
            content.push('\n');
        }

        let write_error = |reason: String| LogExportError::Write {
            path: path.display().to_string(),
            reason,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|error| write_error(error.to_string()))?;
        }
        tokio::fs::write(path, content).await.map_err(|error| write_error(error.to_string()))?;
        Ok(entries.len())
    }
}

impl Default for CliOutputLog {
    fn default() -> Self {
        Self::new()
    }
}
