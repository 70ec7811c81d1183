//! # Text Processing Utilities
//!
//! Helpers for turning raw CLI output and argument vectors into text that is
//! safe to show to a user or write to a log: terminal escape stripping and
//! credential redaction.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Argument that is always immediately followed by a credential value.
pub const CREDENTIAL_FLAG: &str = "--password";

const REDACTED: &str = "[REDACTED]";

/// Removes ANSI/VT100 escape sequences (colors, cursor movement) from `input`.
///
/// # Example
/// ```rust
/// use stevedore_util::strip_ansi;
///
/// assert_eq!(strip_ansi("\u{1b}[32mStarted\u{1b}[0m"), "Started");
/// ```
pub fn strip_ansi(input: &str) -> String {
    static ANSI_PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07|\x1b[@-Z\\-_]").expect("valid ANSI pattern")
    });
    ANSI_PATTERN.replace_all(input, "").into_owned()
}

/// Redacts values that look like secrets in a string.
///
/// Key names are preserved so the text stays useful for debugging.
///
/// # Example
/// ```rust
/// use stevedore_util::redact_sensitive;
///
/// assert_eq!(redact_sensitive("--password hunter2"), "--password [REDACTED]");
/// assert_eq!(redact_sensitive("Authorization: Bearer abc.def"), "Authorization: Bearer [REDACTED]");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    redact_sensitive_with(input, REDACTED)
}

/// Redacts sensitive-looking values, using a custom replacement token.
///
/// Every pattern captures `(prefix)(value)`; only the value is replaced.
pub fn redact_sensitive_with(input: &str, replacement: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in redact_patterns().iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{prefix}{replacement}")
            })
            .into_owned();
    }
    redacted
}

fn redact_patterns() -> &'static Vec<Regex> {
    static PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
        [
            // `--password value` in echoed command lines
            r"(--password[= ])(\S+)",
            // Authorization headers
            r"(?i)(authorization:\s*(?:bearer|basic)\s+)([A-Za-z0-9\-._~+/]+=*)",
            r"(?i)(\bbearer\s+)([A-Za-z0-9\-._~+/]+=*)",
            // JSON token fields
            r#"(?i)("(?:access_token|refresh_token|id_token|password|secret)"\s*:\s*)("[^"]*")"#,
            // KEY=value style environment assignments
            r"(?i)(\b[A-Z0-9_]*(?:TOKEN|SECRET|PASSWORD|APIKEY|API_KEY)=)(\S+)",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("valid redaction pattern"))
        .collect()
    });
    &PATTERNS
}

/// Returns a copy of `args` with the value following [`CREDENTIAL_FLAG`] masked.
///
/// Used before an argument vector is echoed to a log.
pub fn redact_arguments(args: &[String]) -> Vec<String> {
    let mut previous_was_flag = false;
    args.iter()
        .map(|arg| {
            let masked = if previous_was_flag { REDACTED.to_string() } else { arg.clone() };
            previous_was_flag = arg == CREDENTIAL_FLAG;
            masked
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_and_cursor_sequences() {
        let raw = "\u{1b}[1m\u{1b}[34mPulling\u{1b}[0m image \u{1b}[2K\u{1b}[1Adone";
        assert_eq!(strip_ansi(raw), "Pulling image done");
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(strip_ansi("nothing to strip"), "nothing to strip");
        assert_eq!(redact_sensitive("status: started"), "status: started");
    }

    #[test]
    fn redacts_json_token_fields() {
        let raw = r#"{"access_token": "eyJhbGciOi", "expires_in": 300}"#;
        assert_eq!(redact_sensitive(raw), r#"{"access_token": [REDACTED], "expires_in": 300}"#);
    }

    #[test]
    fn redacts_env_assignments() {
        assert_eq!(redact_sensitive("KEYCLOAK_PASSWORD=abc123 MODE=dev"), "KEYCLOAK_PASSWORD=[REDACTED] MODE=dev");
    }

    #[test]
    fn masks_only_the_value_after_the_credential_flag() {
        let args: Vec<String> = ["seckeyring", "update", "--username", "dev", "--password", "s3cret", "--conid", "abc"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let masked = redact_arguments(&args);
        assert_eq!(masked[5], "[REDACTED]");
        assert_eq!(masked[3], "dev");
        assert_eq!(masked[7], "abc");
        assert!(!masked.join(" ").contains("s3cret"));
    }

    #[test]
    fn trailing_credential_flag_is_harmless() {
        let args = vec!["--password".to_string()];
        assert_eq!(redact_arguments(&args), args);
    }
}
