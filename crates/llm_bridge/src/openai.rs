//! `OpenAI` client

use crate::provider::{
    build_http_client, non_empty, send_json, Completion, CompletionRequest, Provider, ProviderError,
};
use async_trait::async_trait;
use core_pipeline::config::CloudSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `OpenAI` chat completions client
pub struct OpenAiClient {
    api_key: Option<String>,
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub const NAME: &'static str = "openai";
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";
    pub const DEFAULT_MODEL: &'static str = "gpt-4o";

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
            .ok_or_else(|| ProviderError::unauthorized(Self::NAME, "OPENAI_API_KEY not set"))
    }

    /// Reasoning models take `max_completion_tokens` and only the default temperature
    fn is_reasoning_model(model: &str) -> bool {
        model.starts_with("gpt-5") || model.starts_with("o1") || model.starts_with("o3")
    }
}

#[async_trait]
impl Provider for OpenAiClient {
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

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(system.clone()),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: Some(request.prompt.clone()),
        });

        let reasoning = Self::is_reasoning_model(&model);
        let body = ChatCompletionRequest {
            model,
            messages,
            max_tokens: (!reasoning).then_some(request.params.max_tokens),
            max_completion_tokens: reasoning.then_some(request.params.max_tokens),
            temperature: (!reasoning).then_some(request.params.temperature),
            response_format: request.wants_json().then(|| ResponseFormat {
                kind: "json_object".to_string(),
            }),
        };

        let response: ChatCompletionResponse = send_json(
            Self::NAME,
            self.client
                .post(format!("{}/chat/completions", self.endpoint))
                .bearer_auth(api_key)
                .json(&body),
        )
        .await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);
        Ok(Completion {
            text: non_empty(Self::NAME, text)?,
            model: response.model,
        })
    }

    async fn is_available(&self) -> bool {
        self.api_key().is_ok()
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, model: Option<&str>) -> OpenAiClient {
        OpenAiClient::new(&CloudSettings {
            api_key: Some("sk-openai".to_string()),
            endpoint: Some(server.uri()),
            model: model.map(str::to_string),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn reply(model: &str, content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": model,
            "choices": [{"message": {"role": "assistant", "content": content}}]
        }))
    }

    #[test]
    fn test_reasoning_model_detection() {
        assert!(OpenAiClient::is_reasoning_model("o3-mini"));
        assert!(OpenAiClient::is_reasoning_model("gpt-5"));
        assert!(!OpenAiClient::is_reasoning_model("gpt-4o"));
    }

    #[tokio::test]
    async fn test_complete_with_json_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-openai"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o",
                "max_tokens": 4096,
                "response_format": {"type": "json_object"}
            })))
            .respond_with(reply("gpt-4o", "{}"))
            .mount(&server)
            .await;

        let request = CompletionRequest::new("hi").with_format(core_pipeline::OutputFormat::Json);
        let completion = client_for(&server, None).complete(&request).await.unwrap();
        assert_eq!(completion.text, "{}");
    }

    #[tokio::test]
    async fn test_reasoning_model_uses_completion_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"max_completion_tokens": 100})))
            .respond_with(reply("o3-mini", "done"))
            .mount(&server)
            .await;

        let request = CompletionRequest::new("hi").with_max_tokens(100);
        let completion = client_for(&server, Some("o3-mini"))
            .complete(&request)
            .await
            .unwrap();
        assert_eq!(completion.text, "done");
    }

    #[tokio::test]
    async fn test_null_content_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o",
                "choices": [{"message": {"role": "assistant", "content": null}}]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server, None)
            .complete(&CompletionRequest::new("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_response");
    }
}
