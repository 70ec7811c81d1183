//! Progress reporting for long-running CLI commands.

use std::sync::Arc;

use serde::Deserialize;
use stevedore_util::strip_ansi;
use tokio_util::sync::CancellationToken;

use super::catalog::{CliCommand, LifecycleCommandKind};

/// Receives progress messages for a labelled operation.
pub trait ProgressSink: Send + Sync {
    fn report(&self, label: &str, message: &str);
}

/// A cancellable progress scope attached to a single CLI invocation.
///
/// Cancelling the token kills the process if the command is cancellable.
#[derive(Clone)]
pub struct ProgressScope {
    pub label: String,
    pub sink: Arc<dyn ProgressSink>,
    pub cancellation: CancellationToken,
}

impl ProgressScope {
    pub fn new(label: impl Into<String>, sink: Arc<dyn ProgressSink>, cancellation: CancellationToken) -> Self {
        Self {
            label: label.into(),
            sink,
            cancellation,
        }
    }

    pub fn report(&self, message: &str) {
        self.sink.report(&self.label, message);
    }
}

impl std::fmt::Debug for ProgressScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressScope")
            .field("label", &self.label)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

const TAGGING_NOISE: &str = "Image Tagging Successful";

/// Turns raw output lines into progress messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressParser {
    /// Each non-empty line, with terminal escapes removed.
    Lines,
    /// Image pull events, one JSON object per line.
    ImagePull,
}

#[derive(Debug, Deserialize)]
struct PullEvent {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

impl ProgressParser {
    pub fn for_command(command: &CliCommand) -> Self {
        match command.lifecycle_kind() {
            Some(LifecycleCommandKind::Install) => ProgressParser::ImagePull,
            _ => ProgressParser::Lines,
        }
    }

    /// Returns the message to report for `line`, or `None` to stay quiet.
    pub fn parse(&self, line: &str) -> Option<String> {
        match self {
            ProgressParser::Lines => {
                let cleaned = strip_ansi(line);
                let cleaned = cleaned.trim();
                (!cleaned.is_empty()).then(|| cleaned.to_string())
            }
            ProgressParser::ImagePull => {
                let event: PullEvent = serde_json::from_str(line.trim()).ok()?;
                let status = event.status.filter(|status| !status.is_empty())?;
                if status == TAGGING_NOISE {
                    return None;
                }
                match event.id.filter(|id| !id.is_empty()) {
                    Some(id) => Some(format!("{status}:{id}")),
                    None => Some(status),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::catalog::{INSTALL, START, STATUS};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, String)>>);

    impl ProgressSink for Recorder {
        fn report(&self, label: &str, message: &str) {
            self.0.lock().unwrap().push((label.to_string(), message.to_string()));
        }
    }

    #[test]
    fn install_uses_the_image_pull_parser() {
        assert_eq!(ProgressParser::for_command(&INSTALL.as_cli()), ProgressParser::ImagePull);
        assert_eq!(ProgressParser::for_command(&START.as_cli()), ProgressParser::Lines);
        assert_eq!(ProgressParser::for_command(&STATUS), ProgressParser::Lines);
    }

    #[test]
    fn image_pull_lines_become_status_and_id() {
        let parser = ProgressParser::ImagePull;
        assert_eq!(
            parser.parse(r#"{"status":"Downloading","progressDetail":{"current":10},"id":"a1b2c3"}"#).as_deref(),
            Some("Downloading:a1b2c3")
        );
        assert_eq!(parser.parse(r#"{"status":"Pulling from stevedore/pfe"}"#).as_deref(), Some("Pulling from stevedore/pfe"));
        assert_eq!(parser.parse(r#"{"status":"Image Tagging Successful"}"#), None);
        assert_eq!(parser.parse("Error: not json"), None);
        assert_eq!(parser.parse(r#"{"progress":"[==>  ]"}"#), None);
    }

    #[test]
    fn plain_lines_are_cleaned() {
        let parser = ProgressParser::Lines;
        assert_eq!(parser.parse("\u{1b}[32mContainer started\u{1b}[0m\r").as_deref(), Some("Container started"));
        assert_eq!(parser.parse("   "), None);
    }

    #[test]
    fn scope_reports_with_its_label() {
        let recorder = Arc::new(Recorder::default());
        let scope = ProgressScope::new("Pulling 1.0.0 images", recorder.clone(), CancellationToken::new());
        scope.report("Downloading:a1");
        assert_eq!(recorder.0.lock().unwrap()[0], ("Pulling 1.0.0 images".to_string(), "Downloading:a1".to_string()));
    }
}
