//! Two-pass routing engine
//!
//! Every analysis request runs `Screening -> Deciding -> Answering`. The
//! local provider screens the content, the verdict and the caller's opt-in
//! pick the pass-2 provider, and failures get at most one fallback to the
//! local provider.

use crate::provider::{Completion, CompletionRequest, ProviderError, SharedProvider};
use crate::registry::ProviderRegistry;
use crate::screening;
use core_pipeline::{
    AnalysisRequest, AnalysisResult, Attempt, OutputFormat, RequestError, SensitivityVerdict,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;

/// Where a request is in the routing state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStage {
    Screening,
    Deciding,
    Answering,
}

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),
    #[error("provider '{0}' is not registered")]
    UnknownProvider(String),
    #[error("no provider could answer: {last}")]
    Exhausted {
        last: ProviderError,
        attempts: Vec<Attempt>,
    },
}

impl RoutingError {
    pub fn kind(&self) -> &'static str {
        match self {
            RoutingError::InvalidRequest(_) => "invalid_request",
            RoutingError::UnknownProvider(_) => "unknown_provider",
            RoutingError::Exhausted { .. } => "providers_exhausted",
        }
    }
}

/// Result of a completion that skipped screening
#[derive(Debug, Clone)]
pub struct DirectCompletion {
    pub provider: String,
    pub local: bool,
    pub completion: Completion,
}

/// Suffix added to the prompt when a provider is retried after an
/// unusable answer
const STRICT_TEXT_SUFFIX: &str =
    "\n\nRespond with the answer only. Do not add preamble, apologies, or commentary.";
const STRICT_JSON_SUFFIX: &str =
    "\n\nRespond with exactly one valid JSON object and nothing else. No markdown fences, no prose.";

pub struct RoutingEngine {
    registry: Arc<ProviderRegistry>,
}

impl RoutingEngine {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Screen, route and answer one request
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, RoutingError> {
        request.validate()?;
        let override_name = request.provider_override.as_deref().map(str::trim);
        if let Some(name) = override_name {
            if !self.registry.contains(name) {
                return Err(RoutingError::UnknownProvider(name.to_string()));
            }
        }

        let local = self.registry.local().clone();
        let verdict = screening::verdict_or_fail_closed(local.as_ref(), &request.content)
            .instrument(tracing::info_span!("route", stage = ?RouteStage::Screening))
            .await;

        let target = self.decide(&verdict, request.allow_external, override_name);
        tracing::info!(
            stage = ?RouteStage::Deciding,
            provider = %target.name(),
            sensitive = verdict.sensitive(),
            content_len = request.content.len(),
            "route selected"
        );

        let completion_request = CompletionRequest::new(request.render_prompt()).with_format(request.format);
        self.answer(target, completion_request, verdict)
            .instrument(tracing::info_span!("route", stage = ?RouteStage::Answering))
            .await
    }

    /// Pick the pass-2 provider
    ///
    /// Local unless the content is clean and the caller opted in; an
    /// override is an opt-in and beats the high-quality provider.
    fn decide(
        &self,
        verdict: &SensitivityVerdict,
        allow_external: bool,
        override_name: Option<&str>,
    ) -> SharedProvider {
        let local = self.registry.local();
        if verdict.sensitive() {
            return local.clone();
        }
        if let Some(provider) = override_name.and_then(|name| self.registry.get(name)) {
            return provider.clone();
        }
        match self.registry.high_quality() {
            Some(provider) if allow_external => provider.clone(),
            _ => local.clone(),
        }
    }

    async fn answer(
        &self,
        selected: SharedProvider,
        base: CompletionRequest,
        verdict: SensitivityVerdict,
    ) -> Result<AnalysisResult, RoutingError> {
        let local = self.registry.local().clone();
        let mut target = selected;
        let mut request = base.clone();
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut retried = false;
        let mut fallback_used = false;

        loop {
            match target.complete(&request).await {
                Ok(completion) => {
                    attempts.push(Attempt {
                        provider: target.name().to_string(),
                        local: target.is_local(),
                        outcome: "ok".to_string(),
                    });
                    let kept_local = attempts.iter().all(|a| a.local);
                    tracing::info!(
                        provider = %target.name(),
                        model = %completion.model,
                        kept_local,
                        fallback_used,
                        "request answered"
                    );
                    return Ok(AnalysisResult {
                        result: completion.text,
                        kept_local,
                        provider_used: target.name().to_string(),
                        model_used: Some(completion.model),
                        verdict,
                        fallback_used,
                        attempts,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        provider = %target.name(),
                        error = %err,
                        error_kind = err.kind(),
                        "pass-2 call failed"
                    );
                    attempts.push(Attempt {
                        provider: target.name().to_string(),
                        local: target.is_local(),
                        outcome: err.kind().to_string(),
                    });

                    match &err {
                        ProviderError::Unauthorized { .. } => {}
                        ProviderError::InvalidResponse { .. } if !retried && !fallback_used => {
                            retried = true;
                            request = stricter(&base);
                            continue;
                        }
                        _ if !fallback_used && !target.is_local() => {
                            fallback_used = true;
                            target = local.clone();
                            request = base.clone();
                            tracing::info!(provider = %target.name(), "falling back to local provider");
                            continue;
                        }
                        _ => {}
                    }
                    return Err(RoutingError::Exhausted { last: err, attempts });
                }
            }
        }
    }

    /// Call one provider directly without screening
    ///
    /// Defaults to the local provider. There is no fallback: the caller
    /// named the provider it wants.
    pub async fn complete_direct(
        &self,
        provider: Option<&str>,
        request: CompletionRequest,
    ) -> Result<DirectCompletion, RoutingError> {
        let target = match provider.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => self
                .registry
                .get(name)
                .ok_or_else(|| RoutingError::UnknownProvider(name.to_string()))?
                .clone(),
            None => self.registry.local().clone(),
        };

        match target.complete(&request).await {
            Ok(completion) => Ok(DirectCompletion {
                provider: target.name().to_string(),
                local: target.is_local(),
                completion,
            }),
            Err(err) => {
                let attempts = vec![Attempt {
                    provider: target.name().to_string(),
                    local: target.is_local(),
                    outcome: err.kind().to_string(),
                }];
                Err(RoutingError::Exhausted { last: err, attempts })
            }
        }
    }
}

fn stricter(request: &CompletionRequest) -> CompletionRequest {
    let suffix = match request.params.format {
        OutputFormat::Json => STRICT_JSON_SUFFIX,
        OutputFormat::Text => STRICT_TEXT_SUFFIX,
    };
    let mut strict = request.clone();
    strict.prompt.push_str(suffix);
    strict.params.temperature = strict.params.temperature.min(0.1);
    strict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    struct Harness {
        engine: RoutingEngine,
        local: Arc<ScriptedProvider>,
        cloud: Arc<ScriptedProvider>,
    }

    fn harness(local: ScriptedProvider, cloud: ScriptedProvider) -> Harness {
        let local = Arc::new(local);
        let cloud = Arc::new(cloud);
        let providers: Vec<SharedProvider> = vec![local.clone(), cloud.clone()];
        let registry = ProviderRegistry::new(providers, "local", Some("cloud")).unwrap();
        Harness {
            engine: RoutingEngine::new(Arc::new(registry)),
            local,
            cloud,
        }
    }

    fn unreachable(name: &str) -> ProviderError {
        ProviderError::unreachable(name, "connection refused")
    }

    #[tokio::test]
    async fn test_sensitive_content_stays_local() {
        let h = harness(
            ScriptedProvider::local("local").sensitive().then_ok("local answer"),
            ScriptedProvider::cloud("cloud").then_ok("cloud answer"),
        );
        let request = AnalysisRequest::new("SSN 123-45-6789").allow_external(true);

        let result = h.engine.analyze(&request).await.unwrap();
        assert!(result.kept_local);
        assert_eq!(result.provider_used, "local");
        assert_eq!(result.result, "local answer");
        assert!(result.verdict.sensitive());
        assert_eq!(h.cloud.call_count(), 0);
    }

    #[tokio::test]
    async fn test_sensitive_content_ignores_override() {
        let h = harness(
            ScriptedProvider::local("local").sensitive(),
            ScriptedProvider::cloud("cloud"),
        );
        let request = AnalysisRequest::new("medical record").with_override("cloud");

        let result = h.engine.analyze(&request).await.unwrap();
        assert!(result.kept_local);
        assert_eq!(result.provider_used, "local");
        assert_eq!(h.cloud.call_count(), 0);
    }

    #[tokio::test]
    async fn test_screening_unreachable_fails_closed() {
        let h = harness(
            ScriptedProvider::local("local")
                .screening(Err(unreachable("local")))
                .then_ok("local answer"),
            ScriptedProvider::cloud("cloud"),
        );
        let request = AnalysisRequest::new("anything").allow_external(true);

        let result = h.engine.analyze(&request).await.unwrap();
        assert!(result.kept_local);
        assert_eq!(result.provider_used, "local");
        assert_eq!(result.verdict.rationale(), "screening-unavailable");
        assert_eq!(h.cloud.call_count(), 0);
    }

    #[tokio::test]
    async fn test_clean_content_with_opt_in_goes_to_high_quality() {
        let h = harness(
            ScriptedProvider::local("local").clean(),
            ScriptedProvider::cloud("cloud").then_ok("cloud answer"),
        );
        let request = AnalysisRequest::new("public release notes").allow_external(true);

        let result = h.engine.analyze(&request).await.unwrap();
        assert!(!result.kept_local);
        assert_eq!(result.provider_used, "cloud");
        assert_eq!(result.model_used.as_deref(), Some("cloud-model"));
        assert_eq!(h.local.answer_calls().len(), 0);
    }

    #[tokio::test]
    async fn test_no_opt_in_stays_local() {
        let h = harness(
            ScriptedProvider::local("local").clean().then_ok("local answer"),
            ScriptedProvider::cloud("cloud"),
        );
        let result = h
            .engine
            .analyze(&AnalysisRequest::new("public release notes"))
            .await
            .unwrap();
        assert!(result.kept_local);
        assert_eq!(result.provider_used, "local");
        assert_eq!(h.cloud.call_count(), 0);
    }

    #[tokio::test]
    async fn test_override_counts_as_opt_in() {
        let h = harness(
            ScriptedProvider::local("local").clean(),
            ScriptedProvider::cloud("cloud").then_ok("cloud answer"),
        );
        let request = AnalysisRequest::new("public release notes").with_override("cloud");

        let result = h.engine.analyze(&request).await.unwrap();
        assert_eq!(result.provider_used, "cloud");
    }

    #[tokio::test]
    async fn test_unknown_override_rejected_before_screening() {
        let h = harness(ScriptedProvider::local("local"), ScriptedProvider::cloud("cloud"));
        let request = AnalysisRequest::new("text").with_override("mystery");

        let err = h.engine.analyze(&request).await.unwrap_err();
        assert!(matches!(err, RoutingError::UnknownProvider(ref name) if name == "mystery"));
        assert_eq!(err.kind(), "unknown_provider");
        assert_eq!(h.local.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let h = harness(ScriptedProvider::local("local"), ScriptedProvider::cloud("cloud"));
        let err = h.engine.analyze(&AnalysisRequest::new("  ")).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
        assert_eq!(h.local.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cloud_unreachable_falls_back_once() {
        let h = harness(
            ScriptedProvider::local("local").clean().then_ok("local answer"),
            ScriptedProvider::cloud("cloud").then_err(unreachable("cloud")),
        );
        let request = AnalysisRequest::new("public text").allow_external(true);

        let result = h.engine.analyze(&request).await.unwrap();
        assert_eq!(result.provider_used, "local");
        assert_eq!(result.result, "local answer");
        assert!(result.fallback_used);
        assert!(!result.kept_local);
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[0].outcome, "unreachable");
        assert_eq!(h.cloud.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_falls_back() {
        let h = harness(
            ScriptedProvider::local("local").clean().then_ok("local answer"),
            ScriptedProvider::cloud("cloud").then_err(ProviderError::rate_limited("cloud", None)),
        );
        let request = AnalysisRequest::new("public text").allow_external(true);

        let result = h.engine.analyze(&request).await.unwrap();
        assert_eq!(result.provider_used, "local");
        assert!(result.fallback_used);
    }

    #[tokio::test]
    async fn test_failure_after_fallback_is_terminal() {
        let h = harness(
            ScriptedProvider::local("local")
                .clean()
                .then_err(unreachable("local")),
            ScriptedProvider::cloud("cloud").then_err(unreachable("cloud")),
        );
        let request = AnalysisRequest::new("public text").allow_external(true);

        let err = h.engine.analyze(&request).await.unwrap_err();
        match err {
            RoutingError::Exhausted { last, attempts } => {
                assert_eq!(last.provider(), "local");
                assert_eq!(attempts.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.cloud.call_count(), 1);
        assert_eq!(h.local.answer_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_response_retries_with_stricter_prompt() {
        let h = harness(
            ScriptedProvider::local("local").clean(),
            ScriptedProvider::cloud("cloud")
                .then_err(ProviderError::invalid("cloud", "empty completion"))
                .then_ok("second try"),
        );
        let request = AnalysisRequest::new("public text")
            .allow_external(true)
            .with_format(OutputFormat::Json);

        let result = h.engine.analyze(&request).await.unwrap();
        assert_eq!(result.provider_used, "cloud");
        assert!(!result.fallback_used);

        let calls = h.cloud.calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].prompt.ends_with(STRICT_JSON_SUFFIX));
        assert!(calls[1].prompt.ends_with(STRICT_JSON_SUFFIX));
    }

    #[tokio::test]
    async fn test_invalid_twice_then_falls_back() {
        let h = harness(
            ScriptedProvider::local("local").clean().then_ok("local answer"),
            ScriptedProvider::cloud("cloud")
                .then_err(ProviderError::invalid("cloud", "garbage"))
                .then_err(ProviderError::invalid("cloud", "garbage")),
        );
        let request = AnalysisRequest::new("public text").allow_external(true);

        let result = h.engine.analyze(&request).await.unwrap();
        assert_eq!(result.provider_used, "local");
        assert_eq!(result.attempts.len(), 3);
        assert_eq!(h.cloud.call_count(), 2);
    }

    #[tokio::test]
    async fn test_local_invalid_retry_has_no_fallback() {
        let h = harness(
            ScriptedProvider::local("local")
                .clean()
                .then_err(ProviderError::invalid("local", "garbage"))
                .then_err(ProviderError::invalid("local", "garbage")),
            ScriptedProvider::cloud("cloud"),
        );

        let err = h
            .engine
            .analyze(&AnalysisRequest::new("public text"))
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::Exhausted { ref attempts, .. } if attempts.len() == 2));
        assert_eq!(h.cloud.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_is_terminal() {
        let h = harness(
            ScriptedProvider::local("local").clean(),
            ScriptedProvider::cloud("cloud").then_err(ProviderError::unauthorized("cloud", "bad key")),
        );
        let request = AnalysisRequest::new("public text").allow_external(true);

        let err = h.engine.analyze(&request).await.unwrap_err();
        assert!(matches!(
            err,
            RoutingError::Exhausted { last: ProviderError::Unauthorized { .. }, .. }
        ));
        assert_eq!(h.local.answer_calls().len(), 0);
    }

    #[tokio::test]
    async fn test_complete_direct_defaults_to_local() {
        let h = harness(
            ScriptedProvider::local("local").then_ok("hello"),
            ScriptedProvider::cloud("cloud"),
        );
        let direct = h
            .engine
            .complete_direct(None, CompletionRequest::new("say hello"))
            .await
            .unwrap();
        assert_eq!(direct.provider, "local");
        assert!(direct.local);
        assert_eq!(direct.completion.text, "hello");

        let err = h
            .engine
            .complete_direct(Some("mystery"), CompletionRequest::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_provider");
    }
}
