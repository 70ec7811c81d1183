//! User interaction seam.

use async_trait::async_trait;

/// A question that needs an explicit yes/no from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// A different version is running and must be stopped first.
    StopAndUpgrade { running: Vec<String>, required: String },
    /// Other versions are installed and will be removed before installing `required`.
    RemoveVersions { versions: Vec<String>, required: String },
    /// A remote connection keeps failing at the backoff ceiling.
    DisableAfterRetries { connection: String },
}

impl Prompt {
    pub fn message(&self) -> String {
        match self {
            Prompt::StopAndUpgrade { running, required } => format!(
                "Version {} of the local runtime is running, but {required} is required. Stop it and upgrade?",
                running.join(", ")
            ),
            Prompt::RemoveVersions { versions, required } => format!(
                "Installing {required} will remove the other installed versions ({}). Continue?",
                versions.join(", ")
            ),
            Prompt::DisableAfterRetries { connection } => {
                format!("Still unable to reach {connection}. Disable the connection until you re-enable it?")
            }
        }
    }

    pub fn confirm_label(&self) -> &'static str {
        match self {
            Prompt::StopAndUpgrade { .. } => "Upgrade",
            Prompt::RemoveVersions { .. } => "Remove and install",
            Prompt::DisableAfterRetries { .. } => "Disable",
        }
    }
}

/// A one-way message. Cancellations never produce one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Dismissible failure; `show_log` offers the "view log" action.
    Error { message: String, show_log: bool },
    Warning { message: String },
    Info { message: String },
}

#[async_trait]
pub trait Prompter: Send + Sync {
    async fn confirm(&self, prompt: Prompt) -> bool;

    async fn notify(&self, notice: Notice);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_versions_involved() {
        let prompt = Prompt::RemoveVersions {
            versions: vec!["0.9.0".into(), "0.9.1".into()],
            required: "1.0.0".into(),
        };
        let message = prompt.message();
        assert!(message.contains("0.9.0, 0.9.1"));
        assert!(message.contains("1.0.0"));
        assert_eq!(prompt.confirm_label(), "Remove and install");
    }
}
