//! Process-wide configuration
//!
//! Loaded once at startup from `sieve.toml` (with environment overrides for
//! credentials) and handed to every component as an immutable value.

use crate::types::Taxonomy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file name looked up in the working directory and `~/.config/sieve/`
pub const CONFIG_FILE_NAME: &str = "sieve.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which providers play which role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    /// Provider used for screening and for everything kept local
    pub local_provider: String,
    /// Provider preferred for non-sensitive content, when configured
    pub high_quality_provider: Option<String>,
    /// Whether requests that say nothing about external routing opt in
    pub external_by_default: bool,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            local_provider: "ollama".to_string(),
            high_quality_provider: Some("claude".to_string()),
            external_by_default: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Settings shared by the hosted providers
///
/// `model` and `endpoint` fall back to the adapter's own defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl CloudSettings {
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: None,
            endpoint: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    /// Largest response body accepted, in bytes
    pub max_bytes: usize,
    pub max_redirects: usize,
    /// Extracted text is truncated to this many characters
    pub max_chars: usize,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_bytes: 5 * 1024 * 1024,
            max_redirects: 5,
            max_chars: 8000,
            user_agent: concat!("sieve/", env!("CARGO_PKG_VERSION"), " (content digest)").to_string(),
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    /// Overall budget for fetch + screening + answering of one request
    pub request_deadline_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8090".to_string(),
            request_deadline_secs: 300,
        }
    }
}

impl ServerSettings {
    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub size: usize,
    pub concurrency: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            size: 50,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarkSettings {
    /// Explicit path to a Chromium `Bookmarks` file; probed when unset
    pub path: Option<PathBuf>,
    /// Digest categories; the built-in list when empty
    pub categories: Vec<String>,
}

impl BookmarkSettings {
    pub fn taxonomy(&self) -> Taxonomy {
        if self.categories.is_empty() {
            Taxonomy::default()
        } else {
            Taxonomy::new(self.categories.iter().map(String::as_str))
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub routing: RoutingSettings,
    pub ollama: OllamaSettings,
    pub anthropic: CloudSettings,
    pub gemini: CloudSettings,
    pub openai: CloudSettings,
    pub fetch: FetchSettings,
    pub server: ServerSettings,
    pub batch: BatchSettings,
    pub bookmarks: BookmarkSettings,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            routing: RoutingSettings::default(),
            ollama: OllamaSettings::default(),
            anthropic: CloudSettings::default(),
            gemini: CloudSettings::default(),
            openai: CloudSettings::default(),
            fetch: FetchSettings::default(),
            server: ServerSettings::default(),
            batch: BatchSettings::default(),
            bookmarks: BookmarkSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load from the first config file found, or defaults when there is none
    pub fn load() -> Result<Self, ConfigError> {
        let settings = match Self::find_config_file() {
            Some(path) => Self::read_file(&path)?,
            None => {
                tracing::debug!("no {} found, using defaults", CONFIG_FILE_NAME);
                Self::default()
            }
        };
        settings.finish()
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::read_file(path)?.finish()
    }

    /// Parse settings from TOML text without consulting the environment
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(toml::from_str(&content)?)
    }

    fn finish(mut self) -> Result<Self, ConfigError> {
        self.apply_env_overrides();
        self.validate()?;
        Ok(self)
    }

    /// Credentials and the Ollama URL may come from the environment
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.anthropic.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.gemini.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("SIEVE_OLLAMA_URL") {
            self.ollama.base_url = url;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.routing.local_provider.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "routing.local_provider must name a provider".to_string(),
            ));
        }
        if self.fetch.max_bytes == 0 || self.fetch.max_chars == 0 {
            return Err(ConfigError::Invalid(
                "fetch.max_bytes and fetch.max_chars must be positive".to_string(),
            ));
        }
        if self.batch.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "batch.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Find the config file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let local_config = PathBuf::from(CONFIG_FILE_NAME);
        if local_config.exists() {
            return Some(local_config);
        }

        let home_config = dirs::home_dir()?
            .join(".config")
            .join("sieve")
            .join(CONFIG_FILE_NAME);
        home_config.exists().then_some(home_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.routing.local_provider, "ollama");
        assert_eq!(settings.ollama.base_url, "http://localhost:11434");
        assert_eq!(settings.fetch.max_chars, 8000);
        assert!(!settings.routing.external_by_default);
        assert!(!settings.anthropic.is_configured());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
log_level = "debug"

[routing]
high_quality_provider = "gemini"
external_by_default = true

[gemini]
api_key = "g-123"
"#,
        )
        .unwrap();

        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.routing.local_provider, "ollama");
        assert_eq!(settings.routing.high_quality_provider.as_deref(), Some("gemini"));
        assert!(settings.gemini.is_configured());
        assert_eq!(settings.gemini.model, None);
        assert_eq!(settings.gemini.timeout_secs, 60);
        assert_eq!(settings.server.request_deadline_secs, 300);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = Settings::from_toml("[batch]\nconcurrency = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = Settings::from_toml("[routing]\nlocal_provider = \"\"\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_custom_categories() {
        let settings = Settings::from_toml("[bookmarks]\ncategories = [\"Rust\", \"Cooking\"]\n").unwrap();
        assert_eq!(settings.bookmarks.taxonomy().categories(), ["rust", "cooking", "other"]);

        let default = Settings::default().bookmarks.taxonomy();
        assert_eq!(default.categories(), Taxonomy::default().categories());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ollama]\nmodel = \"llama3.2:3b\"").unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.ollama.model, "llama3.2:3b");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = Settings::load_from(Path::new("/nonexistent/sieve.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
