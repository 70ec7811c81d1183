use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// Result of the runtime CLI `status` command.
///
/// The CLI omits empty arrays (and sometimes emits `null`), so both version sets
/// deserialize to an empty set rather than being optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliStatus {
    /// Versions whose images are present locally.
    #[serde(rename = "installed-versions", default, deserialize_with = "deserialize_version_set")]
    pub installed_versions: BTreeSet<String>,

    /// Versions that are currently running.
    #[serde(rename = "started", default, deserialize_with = "deserialize_version_set")]
    pub started_versions: BTreeSet<String>,

    /// URL of the running instance, when one is started.
    #[serde(default)]
    pub url: Option<String>,
}

fn deserialize_version_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeSet<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl CliStatus {
    pub fn is_installed(&self, tag: &str) -> bool {
        self.installed_versions.contains(tag)
    }

    pub fn is_started(&self) -> bool {
        !self.started_versions.is_empty()
    }

    pub fn is_started_at(&self, tag: &str) -> bool {
        self.started_versions.contains(tag)
    }

    /// Lexicographically greatest version the CLI knows about, installed or started.
    pub fn latest_known_version(&self) -> Option<&str> {
        self.installed_versions
            .iter()
            .chain(self.started_versions.iter())
            .max()
            .map(String::as_str)
    }

    /// Installed versions other than `tag`, in sorted order.
    pub fn installed_except(&self, tag: &str) -> Vec<String> {
        self.installed_versions.iter().filter(|version| version.as_str() != tag).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_null_arrays_become_empty_sets() {
        let status: CliStatus = serde_json::from_str("{}").unwrap();
        assert!(status.installed_versions.is_empty());
        assert!(status.started_versions.is_empty());
        assert_eq!(status.url, None);

        let status: CliStatus = serde_json::from_str(r#"{"installed-versions": null, "started": null}"#).unwrap();
        assert!(status.installed_versions.is_empty());
        assert!(!status.is_started());
    }

    #[test]
    fn parses_full_status() {
        let json = r#"{
            "installed-versions": ["0.9.0", "1.0.0"],
            "started": ["1.0.0"],
            "url": "http://127.0.0.1:10000/"
        }"#;
        let status: CliStatus = serde_json::from_str(json).unwrap();
        assert!(status.is_installed("0.9.0"));
        assert!(status.is_started_at("1.0.0"));
        assert!(!status.is_started_at("0.9.0"));
        assert_eq!(status.url.as_deref(), Some("http://127.0.0.1:10000/"));
        assert_eq!(status.installed_except("1.0.0"), vec!["0.9.0".to_string()]);
    }

    #[test]
    fn latest_known_version_is_lexicographic() {
        let status: CliStatus = serde_json::from_str(r#"{"installed-versions": ["0.5.0", "0.10.0"], "started": ["0.4.1"]}"#).unwrap();
        // String ordering, not semver ordering.
        assert_eq!(status.latest_known_version(), Some("0.5.0"));
        assert_eq!(CliStatus::default().latest_known_version(), None);
    }
}
