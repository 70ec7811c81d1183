//! Environment variables that override configuration at startup.

use std::env;

/// Selects a non-default runtime tag.
pub const VERSION_TAG_ENV: &str = "STEVEDORE_VERSION_TAG";
/// Skips the one-time verification of the CLI binary.
pub const SKIP_VERIFY_ENV: &str = "STEVEDORE_SKIP_VERIFY";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentOverrides {
    pub version_tag: Option<String>,
    pub skip_binary_verification: bool,
}

impl EnvironmentOverrides {
    pub fn from_env() -> Self {
        let version_tag = env::var(VERSION_TAG_ENV)
            .ok()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty());
        let skip_binary_verification = env::var(SKIP_VERIFY_ENV).map(|value| is_truthy(&value)).unwrap_or(false);
        Self {
            version_tag,
            skip_binary_verification,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
