//! Formatting and redaction for output log lines.

use regex::{Captures, Regex};
use stevedore_util::redact_sensitive_with;

use crate::types::OutputLogEntry;

/// Formats output log entries, redacting secrets unless asked for the raw text.
#[derive(Debug, Default)]
pub struct LogFormatter {
    redaction_rules: RedactionRules,
}

impl LogFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redacted single-line rendering.
    pub fn format(&self, entry: &OutputLogEntry) -> String {
        format!(
            "[{}] {} {} {}: {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            entry.level,
            entry.channel,
            entry.source,
            self.redaction_rules.redact(&entry.message)
        )
    }

    /// Rendering with the message untouched.
    pub fn format_raw(&self, entry: &OutputLogEntry) -> String {
        format!(
            "[{}] {} {} {}: {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            entry.level,
            entry.channel,
            entry.source,
            entry.message
        )
    }
}

/// Regex rules applied on top of the shared credential redaction.
///
/// Each pattern's last capture group is the sensitive span; text around it is kept.
/// Patterns without a capture group replace the whole match.
#[derive(Debug)]
pub struct RedactionRules {
    patterns: Vec<Regex>,
    replacement: String,
}

impl RedactionRules {
    pub fn new() -> Self {
        let patterns = [
            // `api key: value`, `token=value`
            r"(?i)(?:api[\s_-]?key|auth[\s_-]?token|client[\s_-]?secret)\s*[:=]\s*([^\s,;]+)",
            r"(?i)basic\s+([A-Za-z0-9+/]+=*)",
            // JWTs in free text
            r"eyJ[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]*",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect();

        Self {
            patterns,
            replacement: "[REDACTED]".to_string(),
        }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut result = redact_sensitive_with(text, &self.replacement);
        for pattern in &self.patterns {
            result = pattern
                .replace_all(&result, |captures: &Captures| self.replace_last_group(captures))
                .into_owned();
        }
        result
    }

    fn replace_last_group(&self, captures: &Captures) -> String {
        let Some(full) = captures.get(0) else {
            return self.replacement.clone();
        };
        let Some(sensitive) = captures.iter().skip(1).flatten().last() else {
            return self.replacement.clone();
        };
        let start = sensitive.start() - full.start();
        let end = sensitive.end() - full.start();
        let text = full.as_str();
        format!("{}{}{}", &text[..start], self.replacement, &text[end..])
    }
}

impl Default for RedactionRules {
    fn default() -> Self {
        Self::new()
    }
}
