//! Bookmark distillation: fetch a page, route a digest prompt, parse the answer

use crate::router::{RoutingEngine, RoutingError};
use core_pipeline::digest::{parse_digest, DigestError, DigestSource};
use core_pipeline::fetcher::parse_http_url;
use core_pipeline::{AnalysisRequest, DigestResult, FetchError, OutputFormat, PageSource, Taxonomy};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Error, Debug)]
pub enum DistillError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Malformed(#[from] DigestError),
    #[error("digest did not finish within {}s", .0.as_secs())]
    DeadlineExceeded(Duration),
    #[error("digest task failed: {0}")]
    Task(String),
}

impl DistillError {
    pub fn kind(&self) -> &'static str {
        match self {
            DistillError::Fetch(e) => e.kind(),
            DistillError::Routing(e) => e.kind(),
            DistillError::Malformed(e) => e.kind(),
            DistillError::DeadlineExceeded(_) => "deadline_exceeded",
            DistillError::Task(_) => "task_failed",
        }
    }
}

/// One URL to digest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DigestJob {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub allow_external: bool,
}

impl DigestJob {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into()).filter(|t: &String| !t.trim().is_empty());
        self
    }

    pub fn allow_external(mut self, allow: bool) -> Self {
        self.allow_external = allow;
        self
    }
}

pub struct DistillationPipeline {
    source: Arc<dyn PageSource>,
    engine: Arc<RoutingEngine>,
    taxonomy: Taxonomy,
    job_deadline: Option<Duration>,
}

impl DistillationPipeline {
    pub fn new(source: Arc<dyn PageSource>, engine: Arc<RoutingEngine>) -> Self {
        Self {
            source,
            engine,
            taxonomy: Taxonomy::default(),
            job_deadline: None,
        }
    }

    pub fn with_taxonomy(mut self, taxonomy: Taxonomy) -> Self {
        self.taxonomy = taxonomy;
        self
    }

    /// Give up on any single batch job after `deadline`
    pub fn with_job_deadline(mut self, deadline: Duration) -> Self {
        self.job_deadline = Some(deadline);
        self
    }

    /// Fetch, screen, route and parse a single page
    ///
    /// Fetch failures are returned as-is; there is no other way to read
    /// the page.
    pub async fn digest(&self, job: &DigestJob) -> Result<DigestResult, DistillError> {
        parse_http_url(&job.url)?;
        let page = self.source.fetch(&job.url).await?;

        let title = page
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| job.title.clone().filter(|t| !t.trim().is_empty()))
            .unwrap_or_else(|| job.url.clone());
        tracing::info!(url = %job.url, words = page.word_count, truncated = page.truncated, "page fetched");

        let request = AnalysisRequest::new(screened_content(&title, &job.url, &page.text))
            .with_instruction(self.digest_instruction())
            .with_category_hint("web page")
            .allow_external(job.allow_external)
            .with_format(OutputFormat::Json);

        let analysis = self.engine.analyze(&request).await?;
        let source = DigestSource {
            url: job.url.clone(),
            title,
            word_count: page.word_count,
        };
        let mut digest = parse_digest(&analysis.result, &source, &self.taxonomy)?;
        digest.provider_used = analysis.provider_used;
        digest.kept_local = analysis.kept_local;

        tracing::info!(
            url = %digest.url,
            provider = %digest.provider_used,
            category = %digest.category,
            partial = digest.partial,
            "page digested"
        );
        Ok(digest)
    }

    /// Digest many pages with at most `concurrency` in flight
    ///
    /// Results come back in the order of `jobs`.
    pub async fn digest_batch(
        self: &Arc<Self>,
        jobs: Vec<DigestJob>,
        concurrency: usize,
    ) -> Vec<Result<DigestResult, DistillError>> {
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut set = JoinSet::new();
        let total = jobs.len();

        for (index, job) in jobs.into_iter().enumerate() {
            let pipeline = Arc::clone(self);
            let permits = Arc::clone(&permits);
            set.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => pipeline.digest_within_deadline(&job).await,
                    Err(e) => Err(DistillError::Task(e.to_string())),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<DigestResult, DistillError>>> =
            std::iter::repeat_with(|| None).take(total).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "digest task panicked"),
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(DistillError::Task("task did not complete".to_string()))))
            .collect()
    }

    async fn digest_within_deadline(&self, job: &DigestJob) -> Result<DigestResult, DistillError> {
        let Some(deadline) = self.job_deadline else {
            return self.digest(job).await;
        };
        match tokio::time::timeout(deadline, self.digest(job)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(url = %job.url, "digest deadline exceeded");
                Err(DistillError::DeadlineExceeded(deadline))
            }
        }
    }

    fn digest_instruction(&self) -> String {
        format!(
            r#"Analyze this article/page and provide a structured digest.

{{content}}

Respond in JSON:
{{
    "summary": "2-3 sentence summary of the key points",
    "key_points": ["point 1", "point 2", "point 3"],
    "category": "one of: {categories}",
    "tags": ["tag1", "tag2", "tag3"]
}}"#,
            categories = self.taxonomy.categories().join(", ")
        )
    }
}

/// Page metadata and text as one block, so screening sees everything the
/// answering provider will
fn screened_content(title: &str, url: &str, text: &str) -> String {
    let mut content = format!("Title: {title}\nURL: {url}");
    if !text.trim().is_empty() {
        content.push_str("\n\nContent:\n");
        content.push_str(text);
    }
    content
}
