use serde::{Deserialize, Serialize};

/// State of the managed local runtime instance.
///
/// Exactly one value is current at any time. Which value that is depends only
/// on which lifecycle command ran last and how it finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Started,
    Stopping,
    Installing,
    ErrorInstalling,
    ErrorStarting,
    ErrorConnecting,
    ErrorGeneric,
}

impl LifecycleState {
    /// Get the display text for this state.
    pub fn display(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "Stopped",
            LifecycleState::Starting => "Starting",
            LifecycleState::Started => "Started",
            LifecycleState::Stopping => "Stopping",
            LifecycleState::Installing => "Installing",
            LifecycleState::ErrorInstalling => "Error installing",
            LifecycleState::ErrorStarting => "Error starting",
            LifecycleState::ErrorConnecting => "Error connecting",
            LifecycleState::ErrorGeneric => "Error",
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, LifecycleState::Started)
    }

    /// A lifecycle command is running and the final state is not yet known.
    pub fn is_transitional(&self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Stopping | LifecycleState::Installing)
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            LifecycleState::ErrorInstalling | LifecycleState::ErrorStarting | LifecycleState::ErrorConnecting | LifecycleState::ErrorGeneric
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display())
    }
}
