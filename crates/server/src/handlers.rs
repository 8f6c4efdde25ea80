//! Route handlers

use crate::{ApiError, AppState};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::Json;
use core_pipeline::bookmarks::{find_bookmarks_file, parse_bookmarks_file};
use core_pipeline::{
    AnalysisRequest, AnalysisResult, Attempt, BookmarkEntry, BookmarkFilter, DigestResult,
    FetchedPage, OutputFormat, SensitivityVerdict,
};
use llm_bridge::{CompletionRequest, DigestJob};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Bookmarks shown by `/bookmarks/detect`
const DETECT_SAMPLE_SIZE: usize = 5;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub local_provider: String,
    pub high_quality_provider: Option<String>,
    pub providers: BTreeMap<String, bool>,
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let registry = state.engine.registry();
    let mut providers = BTreeMap::new();
    for (name, provider) in registry.iter() {
        providers.insert(name.to_string(), provider.is_available().await);
    }
    let local_up = providers.get(registry.local_name()).copied().unwrap_or(false);

    Json(HealthResponse {
        status: if local_up { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        local_provider: registry.local_name().to_string(),
        high_quality_provider: registry.high_quality().map(|p| p.name().to_string()),
        providers,
    })
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    pub content: String,
    #[serde(default, alias = "instruction")]
    pub analysis_prompt: Option<String>,
    #[serde(default)]
    pub provider_override: Option<String>,
    #[serde(default)]
    pub category_hint: Option<String>,
    #[serde(default)]
    pub allow_external: Option<bool>,
    #[serde(default)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub request_id: String,
    pub result: String,
    pub kept_local: bool,
    pub provider_used: String,
    pub model_used: Option<String>,
    pub verdict: SensitivityVerdict,
    pub fallback_used: bool,
    pub attempts: Vec<Attempt>,
}

impl AnalyzeResponse {
    fn new(request_id: String, result: AnalysisResult) -> Self {
        Self {
            request_id,
            result: result.result,
            kept_local: result.kept_local,
            provider_used: result.provider_used,
            model_used: result.model_used,
            verdict: result.verdict,
            fallback_used: result.fallback_used,
            attempts: result.attempts,
        }
    }
}

/// POST /llm/analyze
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AnalyzeBody>, JsonRejection>,
) -> ApiResult<AnalyzeResponse> {
    let Json(body) = body?;
    let request_id = uuid::Uuid::new_v4().to_string();

    let mut request = AnalysisRequest::new(body.content)
        .allow_external(body.allow_external.unwrap_or(state.settings.routing.external_by_default))
        .with_format(body.format.unwrap_or_default());
    request.instruction = body.analysis_prompt;
    request.provider_override = body.provider_override;
    request.category_hint = body.category_hint;

    let span = tracing::info_span!("analyze", request_id = %request_id);
    let result = state
        .within_deadline(async { state.engine.analyze(&request).await.map_err(ApiError::from) })
        .instrument(span)
        .await?;
    Ok(Json(AnalyzeResponse::new(request_id, result)))
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub result: String,
    pub provider: String,
    pub model: String,
}

/// POST /llm/complete, no screening
pub async fn complete(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CompleteBody>, JsonRejection>,
) -> ApiResult<CompleteResponse> {
    let Json(body) = body?;
    if body.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("invalid_request", "prompt must not be empty"));
    }

    let mut request = CompletionRequest::new(body.prompt).with_format(body.format.unwrap_or_default());
    if let Some(system) = body.system {
        request = request.with_system(system);
    }
    if let Some(model) = body.model {
        request = request.with_model(model);
    }
    if let Some(temperature) = body.temperature {
        request = request.with_temperature(temperature);
    }
    if let Some(max_tokens) = body.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }

    let direct = state
        .within_deadline(async {
            state
                .engine
                .complete_direct(body.provider.as_deref(), request)
                .await
                .map_err(ApiError::from)
        })
        .await?;
    Ok(Json(CompleteResponse {
        result: direct.completion.text,
        provider: direct.provider,
        model: direct.completion.model,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ProviderQuery {
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProviderTestResponse {
    pub provider: String,
    pub model: String,
    pub response: String,
    pub latency_ms: u64,
}

/// GET /llm/test?provider=
pub async fn test_provider(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<ProviderTestResponse> {
    let request = CompletionRequest::new("Reply with the single word OK.")
        .with_temperature(0.0)
        .with_max_tokens(16);
    let started = Instant::now();
    let direct = state
        .within_deadline(async {
            state
                .engine
                .complete_direct(query.provider.as_deref(), request)
                .await
                .map_err(ApiError::from)
        })
        .await?;

    Ok(Json(ProviderTestResponse {
        provider: direct.provider,
        model: direct.completion.model,
        response: direct.completion.text.trim().to_string(),
        latency_ms: started.elapsed().as_millis() as u64,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FetchBody {
    pub url: String,
    #[serde(default)]
    pub max_chars: Option<usize>,
}

/// POST /content/fetch
pub async fn fetch_content(
    State(state): State<Arc<AppState>>,
    body: Result<Json<FetchBody>, JsonRejection>,
) -> ApiResult<FetchedPage> {
    let Json(body) = body?;
    let mut page = state
        .within_deadline(async { state.pages.fetch(&body.url).await.map_err(ApiError::from) })
        .await?;

    if let Some(limit) = body.max_chars.filter(|&limit| page.text.chars().count() > limit) {
        page.text = page.text.chars().take(limit).collect();
        page.word_count = page.text.split_whitespace().count();
        page.truncated = true;
    }
    Ok(Json(page))
}

fn bookmarks_path(state: &AppState) -> Option<PathBuf> {
    find_bookmarks_file(state.settings.bookmarks.path.as_deref())
}

async fn load_bookmarks(path: PathBuf) -> Result<Vec<BookmarkEntry>, ApiError> {
    tokio::task::spawn_blocking(move || parse_bookmarks_file(&path))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .map_err(ApiError::from)
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub found: bool,
    pub path: Option<String>,
    pub bookmark_count: usize,
    pub folders: Vec<String>,
    pub sample: Vec<BookmarkEntry>,
}

/// GET /bookmarks/detect
pub async fn detect_bookmarks(State(state): State<Arc<AppState>>) -> ApiResult<DetectResponse> {
    let Some(path) = bookmarks_path(&state) else {
        return Ok(Json(DetectResponse {
            found: false,
            path: None,
            bookmark_count: 0,
            folders: Vec::new(),
            sample: Vec::new(),
        }));
    };

    let entries = load_bookmarks(path.clone()).await?;
    let folders: BTreeSet<String> = entries
        .iter()
        .map(BookmarkEntry::folder)
        .filter(|f| !f.is_empty())
        .collect();

    Ok(Json(DetectResponse {
        found: true,
        path: Some(path.display().to_string()),
        bookmark_count: entries.len(),
        folders: folders.into_iter().collect(),
        sample: entries.into_iter().take(DETECT_SAMPLE_SIZE).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub since_days: Option<i64>,
    pub limit: Option<usize>,
    pub folder: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub count: usize,
    pub bookmarks: Vec<BookmarkEntry>,
}

/// GET /bookmarks/list
pub async fn list_bookmarks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ListResponse> {
    let path = bookmarks_path(&state).ok_or_else(ApiError::bookmarks_not_found)?;
    let entries = load_bookmarks(path).await?;

    let filter = BookmarkFilter {
        since: query
            .since_days
            .and_then(BookmarkFilter::since_days_ago),
        folder: query.folder,
        limit: query.limit,
    };
    let bookmarks = filter.apply(entries);
    Ok(Json(ListResponse {
        count: bookmarks.len(),
        bookmarks,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DigestBody {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub allow_external: Option<bool>,
}

impl DigestBody {
    fn job(&self, state: &AppState) -> DigestJob {
        let mut job = DigestJob::new(self.url.trim()).allow_external(
            self.allow_external
                .unwrap_or(state.settings.routing.external_by_default),
        );
        if let Some(title) = &self.title {
            job = job.with_title(title.clone());
        }
        job
    }
}

/// POST /bookmarks/digest
pub async fn digest_bookmark(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DigestBody>, JsonRejection>,
) -> ApiResult<DigestResult> {
    let Json(body) = body?;
    let job = body.job(&state);
    let digest = state
        .within_deadline(async { state.pipeline.digest(&job).await.map_err(ApiError::from) })
        .await?;
    Ok(Json(digest))
}

#[derive(Debug, Deserialize)]
pub struct IngestBody {
    #[serde(flatten)]
    pub digest: DigestBody,
    #[serde(default)]
    pub folder: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    pub folder: String,
    #[serde(flatten)]
    pub digest: DigestResult,
}

/// POST /bookmarks/ingest: fetch and distill one newly saved bookmark
pub async fn ingest_bookmark(
    State(state): State<Arc<AppState>>,
    body: Result<Json<IngestBody>, JsonRejection>,
) -> ApiResult<IngestResponse> {
    let Json(body) = body?;
    let job = body.digest.job(&state);
    tracing::info!(url = %job.url, "ingesting bookmark");

    let digest = state
        .within_deadline(async { state.pipeline.digest(&job).await.map_err(ApiError::from) })
        .await?;
    Ok(Json(IngestResponse {
        status: "ingested",
        folder: body.folder.unwrap_or_default(),
        digest,
    }))
}
