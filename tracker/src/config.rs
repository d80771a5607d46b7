//! Configuration for the annotation tracker.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_anchors::DEFAULT_DELIMITER;
use tether_retag::{OpenAiChatModel, RetagConfig};
use tracing::debug;

use crate::error::Result;

/// Configuration for the annotation tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Quiet period before a burst of edits is applied.
    pub debounce_ms: u64,

    /// Buffered change notifications per subscriber.
    pub notification_capacity: usize,

    /// Where annotations are persisted.
    pub storage: StorageConfig,

    /// Retag tuning.
    pub retag: RetagSettings,

    /// Language model backend.
    pub model: ModelConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            notification_capacity: 64,
            storage: StorageConfig::default(),
            retag: RetagSettings::default(),
            model: ModelConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading tracker config from {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&content)
    }

    /// Load the per-user config file if there is one.
    pub async fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if tokio::fs::try_exists(&path).await.unwrap_or(false) => {
                Self::load(path).await
            }
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/tether/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tether").join("config.toml"))
    }

    /// Set the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = u64::try_from(debounce.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the storage configuration.
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Set the retag configuration.
    pub fn with_retag(mut self, retag: RetagSettings) -> Self {
        self.retag = retag;
        self
    }

    /// Set the model configuration.
    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Persistence backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// JSON files next to the repository.
    Json,
    /// Process memory only.
    Memory,
}

/// Configuration for annotation persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Directory under the repository root holding annotation files.
    pub directory: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Json,
            directory: "codetations".to_string(),
        }
    }
}

/// Serializable form of [`RetagConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetagSettings {
    /// Preferred snippet delimiter.
    pub delimiter: char,

    /// Upper bound for one model request.
    pub request_timeout_secs: u64,

    /// Minimum gap between model requests.
    pub request_interval_ms: u64,
}

impl Default for RetagSettings {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            request_timeout_secs: 30,
            request_interval_ms: 0,
        }
    }
}

impl From<&RetagSettings> for RetagConfig {
    fn from(settings: &RetagSettings) -> Self {
        RetagConfig::default()
            .with_delimiter(settings.delimiter)
            .with_request_timeout(Duration::from_secs(settings.request_timeout_secs))
            .with_request_interval(Duration::from_millis(settings.request_interval_ms))
    }
}

/// Configuration for the chat completion backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// API base URL.
    pub base_url: String,

    /// Model to request.
    pub model: String,

    /// API key. Takes precedence over `api_key_env`.
    pub api_key: Option<String>,

    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl ModelConfig {
    /// Build the configured backend.
    pub fn build(&self) -> OpenAiChatModel {
        let model = OpenAiChatModel::new()
            .with_base_url(&self.base_url)
            .with_model(&self.model);
        match self
            .api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
        {
            Some(key) => model.with_api_key(key),
            None => model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TrackerConfig::from_toml_str(
            r#"
            debounce_ms = 200

            [storage]
            backend = "memory"

            [retag]
            delimiter = "◆"
            request_interval_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.debounce(), Duration::from_millis(200));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.directory, "codetations");
        assert_eq!(config.model, ModelConfig::default());

        let retag = RetagConfig::from(&config.retag);
        assert_eq!(retag.delimiter, '◆');
        assert_eq!(retag.request_timeout, Duration::from_secs(30));
        assert_eq!(retag.request_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(TrackerConfig::from_toml_str("debounce_ms = \"soon\"").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[model]\nmodel = \"gpt-4o-mini\"\napi_key = \"k\"\n")
            .await
            .unwrap();

        let config = TrackerConfig::load(&path).await.unwrap();
        assert_eq!(config.model.model, "gpt-4o-mini");
        assert!(tether_retag::LanguageModel::is_available(&config.model.build()));
    }

    #[test]
    fn test_builders() {
        let config = TrackerConfig::default()
            .with_debounce(Duration::from_millis(5))
            .with_storage(StorageConfig {
                backend: StorageBackend::Memory,
                ..StorageConfig::default()
            });
        assert_eq!(config.debounce_ms, 5);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }
}
