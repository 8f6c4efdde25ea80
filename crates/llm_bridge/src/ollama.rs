//! Ollama HTTP API client

use crate::provider::{
    build_http_client, non_empty, send_json, Completion, CompletionRequest, Provider, ProviderError,
};
use async_trait::async_trait;
use core_pipeline::config::OllamaSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for Ollama client
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Name the provider is registered under (default: ollama)
    pub name: String,
    /// Base URL for Ollama API (default: http://localhost:11434)
    pub base_url: String,
    /// Model used when a request does not name one
    pub model: String,
    /// Timeout in seconds (default: 120)
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            name: OllamaClient::NAME.to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            timeout_secs: 120,
        }
    }
}

impl From<&OllamaSettings> for OllamaConfig {
    fn from(settings: &OllamaSettings) -> Self {
        Self {
            name: OllamaClient::NAME.to_string(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            timeout_secs: settings.timeout_secs,
        }
    }
}

/// Ollama API client; the local inference engine
pub struct OllamaClient {
    config: OllamaConfig,
    client: reqwest::Client,
    probe: reqwest::Client,
}

impl OllamaClient {
    pub const NAME: &'static str = "ollama";

    /// Create a new Ollama client
    pub fn new(config: OllamaConfig) -> Result<Self, reqwest::Error> {
        let client = build_http_client(Duration::from_secs(config.timeout_secs))?;
        let probe = build_http_client(Duration::from_secs(5))?;

        Ok(Self {
            config,
            client,
            probe,
        })
    }

    /// Send a chat request to Ollama
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let url = format!("{}/api/chat", self.config.base_url);
        tracing::debug!(provider = %self.config.name, model = %request.model, "sending chat request");
        send_json(&self.config.name, self.client.post(&url).json(request)).await
    }
}

#[async_trait]
impl Provider for OllamaClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let chat = ChatRequest {
            model,
            messages,
            stream: Some(false),
            format: request.wants_json().then(|| "json".to_string()),
            options: Some(ChatOptions {
                temperature: request.params.temperature,
                num_predict: request.params.max_tokens,
            }),
        };

        let response = self.chat(&chat).await?;
        let text = non_empty(&self.config.name, response.message.map(|m| m.content))?;
        Ok(Completion {
            text,
            model: response.model,
        })
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        match self.probe.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(provider = %self.config.name, error = %e, "availability probe failed");
                false
            }
        }
    }
}

/// Chat request to Ollama
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ChatOptions>,
}

/// Sampling options
#[derive(Debug, Clone, Serialize)]
pub struct ChatOptions {
    pub temperature: f32,
    pub num_predict: u32,
}

/// A chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Chat response from Ollama
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub model: String,
    pub message: Option<ChatMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OllamaClient {
        OllamaClient::new(OllamaConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            ..OllamaConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_ollama_config_default() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.name, "ollama");
    }

    #[test]
    fn test_config_from_settings_trims_slash() {
        let settings = OllamaSettings {
            base_url: "http://ollama:11434/".to_string(),
            ..OllamaSettings::default()
        };
        assert_eq!(OllamaConfig::from(&settings).base_url, "http://ollama:11434");
    }

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatRequest {
            model: "qwen2.5:7b".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "Hello".to_string(),
            }],
            stream: Some(false),
            format: None,
            options: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("qwen2.5:7b"));
        assert!(!json.contains("format"));
    }

    #[tokio::test]
    async fn test_complete_maps_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "model": "qwen2.5:7b",
                "stream": false,
                "format": "json",
                "options": {"num_predict": 64},
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "qwen2.5:7b",
                "message": {"role": "assistant", "content": "{\"ok\":true}"},
                "done": true
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let request = CompletionRequest::new("hi")
            .with_system("be brief")
            .with_max_tokens(64)
            .with_format(core_pipeline::OutputFormat::Json);
        let completion = client.complete(&request).await.unwrap();

        assert_eq!(completion.text, "{\"ok\":true}");
        assert_eq!(completion.model, "qwen2.5:7b");
        assert!(client.is_local());
    }

    #[tokio::test]
    async fn test_empty_message_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "qwen2.5:7b",
                "message": {"role": "assistant", "content": "   "},
                "done": true
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&CompletionRequest::new("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_response");
    }

    #[tokio::test]
    async fn test_server_error_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&CompletionRequest::new("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unreachable");
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        let client = OllamaClient::new(OllamaConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..OllamaConfig::default()
        })
        .unwrap();

        let err = client.complete(&CompletionRequest::new("hi")).await.unwrap_err();
        assert_eq!(err.kind(), "unreachable");
        assert!(!client.is_available().await);
    }

    #[tokio::test]
    async fn test_is_available() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
            .mount(&server)
            .await;

        assert!(client_for(&server).is_available().await);
    }
}
