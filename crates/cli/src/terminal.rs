//! Prompts, notices and progress on the terminal.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use stevedore_runtime::backend::{Notice, Prompt, Prompter};
use stevedore_runtime::cli::ProgressSink;
use tracing::warn;

/// Asks on stderr and reads the answer from stdin.
#[derive(Debug, Default)]
pub struct TerminalPrompter {
    assume_yes: bool,
}

impl TerminalPrompter {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn confirm(&self, prompt: Prompt) -> bool {
        let question = format!("{} [{}? y/N] ", prompt.message(), prompt.confirm_label());
        if self.assume_yes {
            eprintln!("{question}y");
            return true;
        }
        match read_line(question).await {
            Ok(answer) => is_affirmative(&answer),
            Err(error) => {
                warn!(error = %error, "could not read an answer, treating it as no");
                false
            }
        }
    }

    async fn notify(&self, notice: Notice) {
        match notice {
            Notice::Error { message, show_log } => {
                eprintln!("error: {message}");
                if show_log {
                    eprintln!("       re-run with --log-file <path> to save the full CLI output");
                }
            }
            Notice::Warning { message } => eprintln!("warning: {message}"),
            Notice::Info { message } => eprintln!("{message}"),
        }
    }
}

/// Prints one line per progress message.
#[derive(Debug, Default)]
pub struct TerminalProgress;

impl ProgressSink for TerminalProgress {
    fn report(&self, label: &str, message: &str) {
        eprintln!("{label}: {message}");
    }
}

/// Prints `prompt` to stderr and reads one line from stdin without blocking the runtime.
pub async fn read_line(prompt: String) -> io::Result<String> {
    tokio::task::spawn_blocking(move || {
        let mut stderr = io::stderr();
        write!(stderr, "{prompt}")?;
        stderr.flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    })
    .await
    .map_err(io::Error::other)?
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
