//! Google Gemini client

use crate::provider::{
    build_http_client, non_empty, send_json, Completion, CompletionRequest, Provider, ProviderError,
};
use async_trait::async_trait;
use core_pipeline::config::CloudSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gemini `generateContent` client
pub struct GeminiClient {
    api_key: Option<String>,
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub const NAME: &'static str = "gemini";
    pub const DEFAULT_ENDPOINT: &'static str = "https://generativelanguage.googleapis.com/v1beta";
    pub const DEFAULT_MODEL: &'static str = "gemini-2.0-flash";

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
            .ok_or_else(|| ProviderError::unauthorized(Self::NAME, "GEMINI_API_KEY not set"))
    }
}

#[async_trait]
impl Provider for GeminiClient {
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

        let body = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            system_instruction: request.system.clone().map(|text| Content {
                role: None,
                parts: vec![Part { text }],
            }),
            generation_config: GenerationConfig {
                temperature: request.params.temperature,
                max_output_tokens: request.params.max_tokens,
                response_mime_type: request
                    .wants_json()
                    .then(|| "application/json".to_string()),
            },
        };

        let response: GenerateResponse = send_json(
            Self::NAME,
            self.client
                .post(format!("{}/models/{}:generateContent", self.endpoint, model))
                .header("x-goog-api-key", api_key)
                .json(&body),
        )
        .await?;

        let text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            });
        Ok(Completion {
            text: non_empty(Self::NAME, text)?,
            model,
        })
    }

    async fn is_available(&self) -> bool {
        self.api_key().is_ok()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new(&CloudSettings {
            api_key: Some("g-key".to_string()),
            endpoint: Some(server.uri()),
            timeout_secs: 5,
            ..CloudSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_complete_joins_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_partial_json(serde_json::json!({
                "generationConfig": {"responseMimeType": "application/json"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "{\"a\":"}, {"text": "1}"}]}}]
            })))
            .mount(&server)
            .await;

        let request = CompletionRequest::new("hi").with_format(core_pipeline::OutputFormat::Json);
        let completion = client_for(&server).complete(&request).await.unwrap();
        assert_eq!(completion.text, "{\"a\":1}");
        assert_eq!(completion.model, "gemini-2.0-flash");
    }

    #[tokio::test]
    async fn test_no_candidates_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"candidates": []})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&CompletionRequest::new("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_response");
    }

    #[tokio::test]
    async fn test_forbidden_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&CompletionRequest::new("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unauthorized");
    }
}
