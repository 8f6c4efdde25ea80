//! Provider abstraction shared by every backend
//!
//! The routing engine only ever sees `dyn Provider`: a name, whether
//! inference stays on this machine, and what the backend can do.

use async_trait::async_trait;
use core_pipeline::OutputFormat;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub type SharedProvider = Arc<dyn Provider>;

/// Tuning knobs passed through to the backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub format: OutputFormat,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 4096,
            format: OutputFormat::Text,
        }
    }
}

/// A backend-neutral completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system: Option<String>,
    /// Overrides the adapter's default model
    pub model: Option<String>,
    pub params: CompletionParams,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            model: None,
            params: CompletionParams::default(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into()).filter(|s: &String| !s.trim().is_empty());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.params.max_tokens = max_tokens;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.params.format = format;
        self
    }

    pub fn wants_json(&self) -> bool {
        self.params.format == OutputFormat::Json
    }
}

/// Generated text plus the model that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: String,
}

/// Label picked by a classification call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// One of the offered labels, or `None` when the answer named none
    pub label: Option<String>,
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub complete: bool,
    pub classify: bool,
}

impl Capabilities {
    pub const ALL: Capabilities = Capabilities {
        complete: true,
        classify: true,
    };
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider} is unreachable: {reason}")]
    Unreachable { provider: String, reason: String },
    #[error("{provider} is rate limited")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },
    #[error("{provider} returned an invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },
    #[error("{provider} rejected the request credentials: {reason}")]
    Unauthorized { provider: String, reason: String },
}

impl ProviderError {
    pub fn unreachable(provider: &str, reason: impl Into<String>) -> Self {
        ProviderError::Unreachable {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid(provider: &str, reason: impl Into<String>) -> Self {
        ProviderError::InvalidResponse {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unauthorized(provider: &str, reason: impl Into<String>) -> Self {
        ProviderError::Unauthorized {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub fn rate_limited(provider: &str, retry_after: Option<Duration>) -> Self {
        ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        }
    }

    /// Stable identifier reported to callers
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Unreachable { .. } => "unreachable",
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::InvalidResponse { .. } => "invalid_response",
            ProviderError::Unauthorized { .. } => "unauthorized",
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Unreachable { provider, .. }
            | ProviderError::RateLimited { provider, .. }
            | ProviderError::InvalidResponse { provider, .. }
            | ProviderError::Unauthorized { provider, .. } => provider,
        }
    }

    /// Map a non-success HTTP status onto the adapter taxonomy
    pub fn from_status(provider: &str, status: StatusCode, headers: &HeaderMap, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 200));
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::unauthorized(provider, detail),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = headers
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                Self::rate_limited(provider, retry_after)
            }
            s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
                Self::unreachable(provider, detail)
            }
            _ => Self::invalid(provider, detail),
        }
    }

    /// Map a transport failure onto the adapter taxonomy
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::invalid(provider, err.to_string());
        }
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connect"
        } else {
            "request"
        };
        tracing::warn!(provider, error = %err, error_kind = kind, "LLM request failed");
        Self::unreachable(provider, format!("{} error: {}", kind, err))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Uniform interface over one concrete LLM backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name the provider is registered and reported under
    fn name(&self) -> &str;

    /// True when inference never leaves the operator's own network
    fn is_local(&self) -> bool;

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    /// Generate text for the request
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;

    /// Pick one of `labels` for `content`, answering `LABEL: reason`
    async fn classify(
        &self,
        instruction: &str,
        content: &str,
        labels: &[&str],
    ) -> Result<Classification, ProviderError> {
        let prompt = format!(
            "{}\n\nAnswer on a single line as `LABEL: short reason`, where LABEL is exactly one of: {}.\n\nContent:\n{}",
            instruction.trim(),
            labels.join(", "),
            content
        );
        let request = CompletionRequest::new(prompt)
            .with_temperature(0.1)
            .with_max_tokens(128);
        let completion = self.complete(&request).await?;
        Ok(parse_classification(&completion.text, labels))
    }

    /// Cheap reachability probe used by health checks
    async fn is_available(&self) -> bool;
}

/// Read a `LABEL: reason` answer
///
/// Only a label leading the first non-empty line, as a whole word, counts.
/// Anything else, including negations such as `NOT CLEAN` or `UNCLEAN`, is
/// left unlabelled.
pub fn parse_classification(answer: &str, labels: &[&str]) -> Classification {
    let line = answer
        .lines()
        .map(|l| l.trim().trim_start_matches(|c| c == '*' || c == '`').trim())
        .find(|l| !l.is_empty())
        .unwrap_or_default();

    let leading = labels
        .iter()
        .find_map(|label| leading_label(line, label).map(|rest| (*label, rest)));

    match leading {
        Some((label, rest)) => Classification {
            label: Some(label.to_string()),
            rationale: rest
                .trim_start_matches(|c: char| matches!(c, '*' | '`' | ':' | '-') || c.is_whitespace())
                .trim_end()
                .to_string(),
        },
        None => Classification {
            label: None,
            rationale: line.to_string(),
        },
    }
}

/// Remainder of `line` after `label`, when `label` starts it as a whole word
fn leading_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = &line[label.len()..];
    match rest.chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' => None,
        _ => Some(rest),
    }
}

/// Send a request and decode a JSON body, mapping failures to [`ProviderError`]
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &str,
    request: RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, e))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, e))?;

    if !status.is_success() {
        tracing::error!(provider, status = %status, "LLM API returned error status");
        return Err(ProviderError::from_status(provider, status, &headers, &body));
    }

    serde_json::from_str(&body)
        .map_err(|e| ProviderError::invalid(provider, format!("undecodable body: {}", e)))
}

/// Reject empty completions
pub(crate) fn non_empty(provider: &str, text: Option<String>) -> Result<String, ProviderError> {
    match text {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ProviderError::invalid(provider, "empty completion")),
    }
}

/// Builds an HTTP client for LLM requests with configured timeouts
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    const LABELS: &[&str] = &["SENSITIVE", "CLEAN"];

    #[test]
    fn test_parse_leading_label() {
        let c = parse_classification("SENSITIVE: contains an account number", LABELS);
        assert_eq!(c.label.as_deref(), Some("SENSITIVE"));
        assert_eq!(c.rationale, "contains an account number");

        let c = parse_classification("\n**clean** - newsletter", LABELS);
        assert_eq!(c.label.as_deref(), Some("CLEAN"));
        assert_eq!(c.rationale, "newsletter");

        let c = parse_classification("CLEAN", LABELS);
        assert_eq!(c.label.as_deref(), Some("CLEAN"));
        assert_eq!(c.rationale, "");
    }

    #[test]
    fn test_parse_label_inside_sentence_is_ambiguous() {
        let c = parse_classification("I would call this CLEAN.", LABELS);
        assert_eq!(c.label, None);
        assert_eq!(c.rationale, "I would call this CLEAN.");
    }

    #[test]
    fn test_parse_negated_answers_are_ambiguous() {
        let answers = [
            "This is NOT clean; it includes a bank account number.",
            "UNCLEAN: contains SSN",
            "Not CLEAN: medical record",
            "CLEANLY private: diary entry",
            "SENSITIVE_DATA: password",
        ];
        for answer in answers {
            assert_eq!(parse_classification(answer, LABELS).label, None, "{answer}");
        }
    }

    #[test]
    fn test_parse_ambiguous_answer() {
        assert_eq!(parse_classification("Either SENSITIVE or CLEAN", LABELS).label, None);
        assert_eq!(parse_classification("no idea", LABELS).label, None);
        assert_eq!(parse_classification("", LABELS).label, None);
        assert_eq!(parse_classification("  \n\n", LABELS).label, None);
    }

    #[test]
    fn test_status_mapping() {
        let mut headers = HeaderMap::new();
        let e = ProviderError::from_status("claude", StatusCode::UNAUTHORIZED, &headers, "bad key");
        assert_eq!(e.kind(), "unauthorized");

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        let e = ProviderError::from_status("claude", StatusCode::TOO_MANY_REQUESTS, &headers, "");
        assert_eq!(
            e,
            ProviderError::rate_limited("claude", Some(Duration::from_secs(7)))
        );

        let e = ProviderError::from_status("claude", StatusCode::BAD_GATEWAY, &headers, "");
        assert_eq!(e.kind(), "unreachable");

        let e = ProviderError::from_status("claude", StatusCode::BAD_REQUEST, &headers, "");
        assert_eq!(e.kind(), "invalid_response");
        assert_eq!(e.provider(), "claude");
    }

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new("hi")
            .with_system("  ")
            .with_format(OutputFormat::Json)
            .with_max_tokens(10);
        assert_eq!(request.system, None);
        assert!(request.wants_json());
        assert_eq!(request.params.max_tokens, 10);
    }

    #[test]
    fn test_non_empty() {
        assert!(non_empty("p", Some("  ".to_string())).is_err());
        assert!(non_empty("p", None).is_err());
        assert_eq!(non_empty("p", Some("ok".to_string())).unwrap(), "ok");
    }
}
