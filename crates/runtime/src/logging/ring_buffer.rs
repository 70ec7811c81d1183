//! Bounded buffer of output log entries.

use std::collections::VecDeque;

use crate::types::OutputLogEntry;

/// Keeps the newest `max_size` entries; the oldest entry is evicted first.
#[derive(Debug)]
pub struct LogRingBuffer {
    buffer: VecDeque<OutputLogEntry>,
    max_size: usize,
}

impl LogRingBuffer {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            buffer: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    pub fn push(&mut self, entry: OutputLogEntry) {
        if self.buffer.len() >= self.max_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(entry);
    }

    /// The last `count` entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<OutputLogEntry> {
        let start = self.buffer.len().saturating_sub(count);
        self.buffer.iter().skip(start).cloned().collect()
    }

    pub fn all(&self) -> Vec<OutputLogEntry> {
        self.buffer.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for LogRingBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}
