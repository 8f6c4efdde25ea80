//! Anthropic Claude client

use crate::provider::{
    build_http_client, non_empty, send_json, Completion, CompletionRequest, Provider, ProviderError,
};
use async_trait::async_trait;
use core_pipeline::config::CloudSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Anthropic Messages API client
pub struct AnthropicClient {
    api_key: Option<String>,
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub const NAME: &'static str = "claude";

    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.anthropic.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "claude-sonnet-4-5-20250929";

    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(settings: &CloudSettings) -> Result<Self, reqwest::Error> {
        Ok(Self {
            api_key: settings.api_key.clone(),
            endpoint: settings
                .endpoint
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            client: build_http_client(Duration::from_secs(settings.timeout_secs))?,
        })
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::unauthorized(Self::NAME, "ANTHROPIC_API_KEY not set"))
    }
}

#[async_trait]
impl Provider for AnthropicClient {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let api_key = self.api_key()?;
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        tracing::info!(provider = Self::NAME, model = %model, "making LLM request");

        let body = MessagesRequest {
            model,
            max_tokens: request.params.max_tokens,
            temperature: request.params.temperature,
            system: request.system.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
        };

        let response: MessagesResponse = send_json(
            Self::NAME,
            self.client
                .post(format!("{}/messages", self.endpoint))
                .header("x-api-key", api_key)
                .header("anthropic-version", Self::API_VERSION)
                .json(&body),
        )
        .await?;

        let text = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        Ok(Completion {
            text: non_empty(Self::NAME, Some(text))?,
            model: response.model,
        })
    }

    async fn is_available(&self) -> bool {
        self.api_key().is_ok()
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer, key: Option<&str>) -> CloudSettings {
        CloudSettings {
            api_key: key.map(str::to_string),
            endpoint: Some(server.uri()),
            timeout_secs: 5,
            ..CloudSettings::default()
        }
    }

    #[tokio::test]
    async fn test_complete_sends_headers_and_system() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_partial_json(serde_json::json!({
                "system": "be terse",
                "max_tokens": 256,
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "claude-sonnet-4-5-20250929",
                "content": [{"type": "text", "text": "hi there"}]
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(&settings(&server, Some("sk-test"))).unwrap();
        let request = CompletionRequest::new("hello")
            .with_system("be terse")
            .with_max_tokens(256);
        let completion = client.complete(&request).await.unwrap();

        assert_eq!(completion.text, "hi there");
        assert!(!client.is_local());
        assert!(client.is_available().await);
    }

    #[tokio::test]
    async fn test_missing_key_is_unauthorized() {
        let server = MockServer::start().await;
        let client = AnthropicClient::new(&settings(&server, None)).unwrap();

        let err = client.complete(&CompletionRequest::new("hello")).await.unwrap_err();
        assert_eq!(err.kind(), "unauthorized");
        assert!(!client.is_available().await);
    }

    #[tokio::test]
    async fn test_rate_limit_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(&settings(&server, Some("sk-test"))).unwrap();
        let err = client.complete(&CompletionRequest::new("hello")).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::rate_limited("claude", Some(Duration::from_secs(30)))
        );
    }

    #[tokio::test]
    async fn test_no_text_blocks_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "claude-sonnet-4-5-20250929",
                "content": []
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(&settings(&server, Some("sk-test"))).unwrap();
        let err = client.complete(&CompletionRequest::new("hello")).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_response");
    }
}
