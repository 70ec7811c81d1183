//! Runs the runtime CLI as a child process.
//!
//! The argument vector is always `--json [--insecure] <tokens...> <args...>`.
//! Output is streamed line by line into the [`CliOutputLog`] and, when a
//! progress scope is attached, into the progress parser, while the full text
//! is buffered for interpretation once the process exits.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use stevedore_util::redact_arguments;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::catalog::CliCommand;
use super::progress::{ProgressParser, ProgressScope};
use crate::logging::{CLI_CHANNEL, CliOutputLog};
use crate::types::{CliError, LogLevel, LogSource};

/// Executes catalog commands. The seam the lifecycle and connection layers depend on.
#[async_trait]
pub trait CliExecutor: Send + Sync {
    async fn execute(&self, command: CliCommand, args: &[String], progress: Option<ProgressScope>) -> Result<CliOutput, CliError>;
}

/// Successful result of a CLI invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum CliOutput {
    Structured(Value),
    Text(String),
}

impl CliOutput {
    pub fn empty() -> Self {
        CliOutput::Structured(Value::Object(Map::new()))
    }

    /// Deserializes structured output into `T`.
    ///
    /// Output of redacted commands is never copied into the error.
    pub fn decode<T: DeserializeOwned>(self, command: &CliCommand) -> Result<T, CliError> {
        let redact = command.descriptor().redact_output;
        let keep = |text: String| if redact { String::new() } else { text };
        match self {
            CliOutput::Structured(value) => {
                let raw = value.to_string();
                serde_json::from_value(value).map_err(|error| CliError::malformed(command.display_name(), error.to_string(), keep(raw)))
            }
            CliOutput::Text(text) => serde_json::from_str(text.trim())
                .map_err(|error| CliError::malformed(command.display_name(), error.to_string(), keep(text.clone()))),
        }
    }
}

/// Builds the full argument vector for `command`.
///
/// Lifecycle commands run against the local engine and never take `--insecure`.
pub fn build_args(command: &CliCommand, args: &[String]) -> Vec<String> {
    let descriptor = command.descriptor();
    let mut argv = Vec::with_capacity(2 + descriptor.tokens.len() + args.len());
    argv.push("--json".to_string());
    if !command.is_lifecycle() {
        argv.push("--insecure".to_string());
    }
    argv.extend(descriptor.tokens.iter().map(|token| token.to_string()));
    argv.extend(args.iter().cloned());
    argv
}

/// Classifies a finished invocation.
///
/// `exit_code` is `None` when the process was killed by a signal.
pub fn interpret_exit(command: &CliCommand, exit_code: Option<i32>, stdout: String, stderr: String) -> Result<CliOutput, CliError> {
    let Some(code) = exit_code else {
        return Err(CliError::Cancelled);
    };
    let descriptor = command.descriptor();
    let name = command.display_name();
    let keep_stdout = |stdout: String| if descriptor.redact_output { String::new() } else { stdout };

    if code != 0 {
        let mut parts = Vec::new();
        let description = error_description(&stdout);
        let described = description.is_some();
        match description {
            Some(description) => parts.push(description),
            None if !descriptor.redact_output && !stdout.trim().is_empty() => parts.push(stdout.trim().to_string()),
            None => {}
        }
        if !stderr.trim().is_empty() {
            parts.push(stderr.trim().to_string());
        }
        let message = if parts.is_empty() {
            format!("exited with code {code}")
        } else {
            parts.join("\n")
        };
        let error = CliError::process(name, Some(code), message, keep_stdout(stdout), stderr);
        return Err(if described { error.described() } else { error });
    }

    if !descriptor.structured_output {
        return Ok(CliOutput::Text(stdout));
    }

    let trimmed = stdout.trim();
    // Some CLI versions print nothing (or a banner) for commands that normally return JSON.
    if trimmed.is_empty() || !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return Ok(CliOutput::empty());
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|error| CliError::malformed(&name, error.to_string(), keep_stdout(stdout.clone())))?;
    if let Some(description) = value.get("error_description") {
        let message = description.as_str().map(str::to_string).unwrap_or_else(|| description.to_string());
        return Err(CliError::process(name, Some(0), message, keep_stdout(stdout), stderr).described());
    }
    Ok(CliOutput::Structured(value))
}

fn error_description(stdout: &str) -> Option<String> {
    let value: Value = serde_json::from_str(stdout.trim()).ok()?;
    let description = value.get("error_description")?;
    Some(description.as_str().map(str::to_string).unwrap_or_else(|| description.to_string()))
}

/// [`CliExecutor`] backed by a real child process.
#[derive(Debug)]
pub struct ProcessRunner {
    executable: PathBuf,
    output_log: Arc<CliOutputLog>,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(executable: impl Into<PathBuf>, output_log: Arc<CliOutputLog>) -> Self {
        Self {
            executable: executable.into(),
            output_log,
            timeout: None,
        }
    }

    /// Kills any invocation that runs longer than `timeout`; it settles as cancelled.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn output_log(&self) -> &Arc<CliOutputLog> {
        &self.output_log
    }

    async fn run(&self, command: CliCommand, args: &[String], progress: Option<ProgressScope>) -> Result<CliOutput, CliError> {
        let descriptor = *command.descriptor();
        let name = command.display_name();
        let argv = build_args(&command, args);
        let echoed = format!("{} {}", self.executable.display(), redact_arguments(&argv).join(" "));

        info!(command = %name, "running {echoed}");
        self.output_log.system(CLI_CHANNEL, LogLevel::Info, format!("$ {echoed}")).await;

        let mut child = Command::new(&self.executable)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| CliError::spawn(self.executable.display().to_string(), error.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CliError::spawn(self.executable.display().to_string(), "stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CliError::spawn(self.executable.display().to_string(), "stderr was not captured"))?;

        let echo = (!descriptor.redact_output).then(|| self.output_log.clone());
        if descriptor.redact_output {
            self.output_log
                .system(CLI_CHANNEL, LogLevel::Info, format!("<output of `{name}` hidden>"))
                .await;
        }
        let parser = ProgressParser::for_command(&command);
        let progress_feed = progress
            .clone()
            .filter(|_| !descriptor.redact_output)
            .map(|scope| (scope, parser));

        let stdout_task = spawn_line_pump(stdout, LogSource::Stdout, echo.clone(), progress_feed.clone());
        let stderr_task = spawn_line_pump(stderr, LogSource::Stderr, echo, progress_feed);

        let cancellation = progress
            .as_ref()
            .filter(|_| descriptor.cancellable)
            .map(|scope| scope.cancellation.clone());

        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = wait_cancelled(cancellation.as_ref()) => None,
            _ = wait_deadline(self.timeout) => None,
        };

        let exit_code = match status {
            Some(Ok(status)) => status.code(),
            Some(Err(error)) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(CliError::spawn(self.executable.display().to_string(), error.to_string()));
            }
            None => {
                warn!(command = %name, "killing CLI process");
                let _ = child.start_kill();
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                self.output_log.system(CLI_CHANNEL, LogLevel::Warn, format!("`{name}` was cancelled")).await;
                return Err(CliError::Cancelled);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        debug!(command = %name, ?exit_code, "CLI process exited");

        let result = interpret_exit(&command, exit_code, stdout, stderr);
        match &result {
            Err(error) if error.is_cancelled() => {
                self.output_log.system(CLI_CHANNEL, LogLevel::Warn, format!("`{name}` was killed")).await;
            }
            Err(error) => {
                warn!(command = %name, error = %error.summary(), "CLI command failed");
                self.output_log.system(CLI_CHANNEL, LogLevel::Error, error.detail()).await;
            }
            Ok(_) => {}
        }
        result
    }
}

#[async_trait]
impl CliExecutor for ProcessRunner {
    async fn execute(&self, command: CliCommand, args: &[String], progress: Option<ProgressScope>) -> Result<CliOutput, CliError> {
        self.run(command, args, progress).await
    }
}

/// Reads `reader` to the end, forwarding each line to the log and progress sink.
fn spawn_line_pump<R>(
    reader: R,
    source: LogSource,
    echo: Option<Arc<CliOutputLog>>,
    progress: Option<(ProgressScope, ProgressParser)>,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut collected = String::new();
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(log) = &echo {
                let level = if source == LogSource::Stderr { LogLevel::Warn } else { LogLevel::Info };
                log.record(CLI_CHANNEL, level, source, line.clone()).await;
            }
            if let Some((scope, parser)) = &progress
                && let Some(message) = parser.parse(&line)
            {
                scope.report(&message);
            }
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    })
}

async fn wait_cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
