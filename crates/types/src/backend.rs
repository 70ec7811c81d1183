//! Wire shapes returned by the backend HTTP API and by CLI subcommands.

use serde::{Deserialize, Serialize};

/// Environment document served by a runtime instance once it is ready.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Workspace directory as seen by the runtime.
    #[serde(default)]
    pub workspace_location: String,

    /// Runtime version string.
    #[serde(default)]
    pub version: String,

    /// Namespace the event socket should join, if the runtime uses one.
    #[serde(default)]
    pub socket_namespace: Option<String>,
}

/// A project as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(rename = "projectID")]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub language: Option<String>,

    /// Either "open" or "closed" when reported.
    #[serde(default)]
    pub state: Option<String>,

    #[serde(rename = "appStatus", default)]
    pub app_status: Option<String>,
}

/// A connection persisted by the runtime CLI (`connections list`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub label: String,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Response envelope of `connections list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecordList {
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
}

/// Response of the token retrieval command.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

// Never print the token itself.
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Result of the workspace `upgrade` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    #[serde(default)]
    pub migrated: Vec<String>,
    #[serde(default)]
    pub failed: Vec<FailedMigration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedMigration {
    #[serde(rename = "projectName")]
    pub project_name: String,
    #[serde(default)]
    pub error: Option<String>,
}
