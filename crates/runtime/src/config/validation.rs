//! Validation of loaded configuration.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use super::StevedoreConfig;

/// Readiness polling runs every two seconds; anything shorter never polls.
pub const MIN_READINESS_TIMEOUT_SECS: u64 = 2;

static TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag regex should compile"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("cliPath cannot be empty")]
    EmptyCliPath,

    #[error("Invalid tag '{tag}': {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("readinessTimeoutSecs must be at least 2, got {value}")]
    ReadinessTimeoutTooShort { value: u64 },
}

pub fn validate_config(config: &StevedoreConfig) -> Result<(), ValidationError> {
    if config.cli_path.trim().is_empty() {
        return Err(ValidationError::EmptyCliPath);
    }
    validate_tag(&config.default_tag)?;
    if config.readiness_timeout_secs < MIN_READINESS_TIMEOUT_SECS {
        return Err(ValidationError::ReadinessTimeoutTooShort {
            value: config.readiness_timeout_secs,
        });
    }
    debug!(tag = %config.default_tag, "validated configuration");
    Ok(())
}

/// Tags are passed straight to `--tag` and name container images.
pub fn validate_tag(tag: &str) -> Result<(), ValidationError> {
    if tag.is_empty() {
        return Err(ValidationError::InvalidTag {
            tag: tag.to_string(),
            reason: "tag cannot be empty".to_string(),
        });
    }
    if !TAG_REGEX.is_match(tag) {
        return Err(ValidationError::InvalidTag {
            tag: tag.to_string(),
            reason: "use letters, digits, '_', '.' or '-' (at most 128 characters, not starting with '.' or '-')".to_string(),
        });
    }
    Ok(())
}
