//! Configuration surface for the sync engine.
//!
//! Settings load from YAML (`SyncSettings::load`) or construct in code
//! with [`Default`] values. Unknown provider names are tolerated at this
//! layer (binding happens in the provider registry), but unknown field
//! transform names are rejected when a field map is parsed.

use crate::error::{Error, Result};
use crate::sync::SyncDirection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Connection record for one external provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Provider machine name (e.g. `github`).
    pub provider: String,

    /// Credential, when the provider needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// API base URL override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,

    /// Project used when an element's sync state does not pin one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_project: Option<String>,
}

impl ProviderConfig {
    /// A minimal config for the named provider.
    #[must_use]
    pub fn named(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            token: None,
            api_base_url: None,
            default_project: None,
        }
    }
}

/// Engine-wide sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// Poll interval for periodic sync, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Direction used when a link does not specify one.
    #[serde(default = "default_direction")]
    pub default_direction: SyncDirection,

    /// Configured providers, keyed by machine name.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Concurrent in-flight calls allowed per provider.
    #[serde(default = "default_concurrency")]
    pub concurrency_per_provider: usize,

    /// Per-call timeout, in milliseconds. A timeout is a retryable error.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Maximum retry attempts for retryable provider failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay, doubled per attempt, in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Whether pull may create local elements for unseen remote items.
    #[serde(default = "default_true")]
    pub create_on_pull: bool,
}

fn default_poll_interval_ms() -> u64 {
    300_000
}
fn default_direction() -> SyncDirection {
    SyncDirection::Bidirectional
}
fn default_concurrency() -> usize {
    4
}
fn default_call_timeout_ms() -> u64 {
    10_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    250
}
fn default_true() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            default_direction: default_direction(),
            providers: BTreeMap::new(),
            concurrency_per_provider: default_concurrency(),
            call_timeout_ms: default_call_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            create_on_pull: default_true(),
        }
    }
}

impl SyncSettings {
    /// Loads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be read and
    /// [`Error::Config`] when it does not parse.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        serde_yaml::from_str(&raw).map_err(|err| {
            Error::Config(format!("failed to parse '{}': {err}", path.display()))
        })
    }

    /// Serializes settings to YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on serialization failure.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|err| Error::Config(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let settings = SyncSettings::default();
        assert_eq!(settings.default_direction, SyncDirection::Bidirectional);
        assert_eq!(settings.max_retries, 3);
        assert!(settings.create_on_pull);
        assert!(settings.providers.is_empty());
    }

    #[test]
    fn yaml_round_trip() {
        let mut settings = SyncSettings::default();
        settings.providers.insert(
            "github".to_string(),
            ProviderConfig {
                provider: "github".to_string(),
                token: Some("secret".to_string()),
                api_base_url: None,
                default_project: Some("acme/widgets".to_string()),
            },
        );

        let yaml = settings.to_yaml().unwrap();
        let back: SyncSettings = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.providers["github"].default_project.as_deref(), Some("acme/widgets"));
    }

    #[tokio::test]
    async fn partial_yaml_fills_defaults() {
        let yaml = "pollIntervalMs: 60000\n";
        let settings: SyncSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.poll_interval_ms, 60_000);
        assert_eq!(settings.concurrency_per_provider, 4);
    }

    #[tokio::test]
    async fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SyncSettings::load(dir.path().join("absent.yaml"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "IO");
    }
}
