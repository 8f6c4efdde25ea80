//! Registered providers and the roles they play

use crate::anthropic::AnthropicClient;
use crate::gemini::GeminiClient;
use crate::ollama::{OllamaClient, OllamaConfig};
use crate::openai::OpenAiClient;
use crate::provider::SharedProvider;
use core_pipeline::Settings;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("local provider '{0}' is not registered")]
    MissingLocal(String),
    #[error("provider '{0}' is designated local-only but runs remotely")]
    NotLocal(String),
    #[error("provider '{0}' cannot classify content, so it cannot screen")]
    CannotScreen(String),
    #[error("provider '{0}' is registered twice")]
    Duplicate(String),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Every usable provider, plus which one is local and which is preferred
pub struct ProviderRegistry {
    providers: BTreeMap<String, SharedProvider>,
    local: String,
    high_quality: Option<String>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .field("local", &self.local)
            .field("high_quality", &self.high_quality)
            .finish()
    }
}

impl ProviderRegistry {
    /// Validate the role assignments over an explicit provider set
    ///
    /// A high-quality provider that is not registered is dropped with a
    /// warning, the same way an unconfigured cloud backend is.
    pub fn new(
        providers: Vec<SharedProvider>,
        local: &str,
        high_quality: Option<&str>,
    ) -> Result<Self, RegistryError> {
        let mut by_name = BTreeMap::new();
        for provider in providers {
            let name = provider.name().to_string();
            if by_name.insert(name.clone(), provider).is_some() {
                return Err(RegistryError::Duplicate(name));
            }
        }

        let local_provider = by_name
            .get(local)
            .ok_or_else(|| RegistryError::MissingLocal(local.to_string()))?;
        if !local_provider.is_local() {
            return Err(RegistryError::NotLocal(local.to_string()));
        }
        if !local_provider.capabilities().classify {
            return Err(RegistryError::CannotScreen(local.to_string()));
        }

        let high_quality = match high_quality {
            Some(name) if by_name.contains_key(name) => Some(name.to_string()),
            Some(name) => {
                tracing::warn!(provider = name, "high-quality provider not configured, routing stays local");
                None
            }
            None => None,
        };

        Ok(Self {
            providers: by_name,
            local: local.to_string(),
            high_quality,
        })
    }

    /// Build adapters for everything the settings configure
    ///
    /// Ollama is always registered; each cloud backend only when its API
    /// key is present.
    pub fn from_settings(settings: &Settings) -> Result<Self, RegistryError> {
        let mut providers: Vec<SharedProvider> = vec![Arc::new(OllamaClient::new(
            OllamaConfig::from(&settings.ollama),
        )?)];
        if settings.anthropic.is_configured() {
            providers.push(Arc::new(AnthropicClient::new(&settings.anthropic)?));
        }
        if settings.gemini.is_configured() {
            providers.push(Arc::new(GeminiClient::new(&settings.gemini)?));
        }
        if settings.openai.is_configured() {
            providers.push(Arc::new(OpenAiClient::new(&settings.openai)?));
        }

        let registry = Self::new(
            providers,
            &settings.routing.local_provider,
            settings.routing.high_quality_provider.as_deref(),
        )?;
        tracing::info!(
            providers = ?registry.names(),
            local = %registry.local,
            high_quality = ?registry.high_quality,
            "provider registry ready"
        );
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&SharedProvider> {
        self.providers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// The designated local-only provider
    pub fn local(&self) -> &SharedProvider {
        // Presence is checked in `new` and the map is never mutated.
        &self.providers[&self.local]
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn high_quality(&self) -> Option<&SharedProvider> {
        self.high_quality
            .as_deref()
            .and_then(|name| self.providers.get(name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SharedProvider)> {
        self.providers.iter().map(|(k, v)| (k.as_str(), v))
    }
}
