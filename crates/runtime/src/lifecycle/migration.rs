//! Detection and reporting of the one-time legacy workspace migration.

use std::path::Path;

use stevedore_types::{CliStatus, FailedMigration, MigrationReport};

/// Major.minor versions whose workspaces use the old on-disk format.
pub const LEGACY_VERSION_PREFIXES: [&str; 4] = ["0.2", "0.3", "0.4", "0.5"];

/// `0.4`, `0.4.1` and `0.4.1-rc` are legacy; `0.40.0` is not.
pub fn is_legacy_version(version: &str) -> bool {
    LEGACY_VERSION_PREFIXES.iter().any(|prefix| {
        version
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.') || rest.starts_with('-'))
    })
}

/// A migration is needed when the legacy workspace exists and either nothing is
/// known about installed versions or the greatest known version is legacy.
pub fn migration_required(legacy_workspace: Option<&Path>, status: &CliStatus) -> bool {
    let Some(workspace) = legacy_workspace else {
        return false;
    };
    if !workspace.is_dir() {
        return false;
    }
    match status.latest_known_version() {
        None => true,
        Some(version) => is_legacy_version(version),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    NotRequired,
    Succeeded { migrated: Vec<String> },
    PartiallyFailed { migrated: Vec<String>, failed: Vec<FailedMigration> },
    Failed { failed: Vec<FailedMigration>, reason: Option<String> },
}

impl MigrationOutcome {
    pub fn from_report(report: MigrationReport) -> Self {
        match (report.migrated.is_empty(), report.failed.is_empty()) {
            (_, true) => MigrationOutcome::Succeeded { migrated: report.migrated },
            (false, false) => MigrationOutcome::PartiallyFailed {
                migrated: report.migrated,
                failed: report.failed,
            },
            (true, false) => MigrationOutcome::Failed {
                failed: report.failed,
                reason: None,
            },
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        MigrationOutcome::Failed {
            failed: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, MigrationOutcome::PartiallyFailed { .. } | MigrationOutcome::Failed { .. })
    }

    /// Message for the user, if the outcome is worth one.
    pub fn summary(&self) -> Option<String> {
        let names = |failed: &[FailedMigration]| failed.iter().map(|f| f.project_name.as_str()).collect::<Vec<_>>().join(", ");
        match self {
            MigrationOutcome::NotRequired => None,
            MigrationOutcome::Succeeded { migrated } if migrated.is_empty() => None,
            MigrationOutcome::Succeeded { migrated } => Some(format!("Migrated {} project(s) to the new workspace format", migrated.len())),
            MigrationOutcome::PartiallyFailed { migrated, failed } => Some(format!(
                "Migrated {} project(s); {} could not be migrated: {}",
                migrated.len(),
                failed.len(),
                names(failed)
            )),
            MigrationOutcome::Failed { failed, reason } => Some(match (failed.is_empty(), reason) {
                (false, _) => format!("Workspace migration failed for: {}", names(failed)),
                (true, Some(reason)) => format!("Workspace migration failed: {reason}"),
                (true, None) => "Workspace migration failed".to_string(),
            }),
        }
    }
}
