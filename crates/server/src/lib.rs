//! sieve REST API
//!
//! HTTP surface over the routing engine, the content fetcher and the
//! bookmark tools. The binary in `main.rs` and the `sieve serve` command
//! both build their router here.

pub mod error;
pub mod handlers;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use core_pipeline::{ContentFetcher, PageSource, Settings};
use llm_bridge::{DistillationPipeline, ProviderRegistry, RoutingEngine};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

pub use error::ApiError;

/// Shared, immutable state behind every handler
pub struct AppState {
    pub settings: Arc<Settings>,
    pub engine: Arc<RoutingEngine>,
    pub pages: Arc<dyn PageSource>,
    pub pipeline: Arc<DistillationPipeline>,
}

impl AppState {
    pub fn new(settings: Settings, registry: ProviderRegistry, pages: Arc<dyn PageSource>) -> Self {
        let engine = Arc::new(RoutingEngine::new(Arc::new(registry)));
        let pipeline = Arc::new(
            DistillationPipeline::new(pages.clone(), engine.clone())
                .with_taxonomy(settings.bookmarks.taxonomy()),
        );
        Self {
            settings: Arc::new(settings),
            engine,
            pages,
            pipeline,
        }
    }

    /// Build real provider adapters and an HTTP fetcher from configuration
    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let registry = ProviderRegistry::from_settings(&settings).context("failed to build provider registry")?;
        let fetcher = ContentFetcher::new(&settings.fetch).context("failed to build HTTP fetcher")?;
        Ok(Self::new(settings, registry, Arc::new(fetcher)))
    }

    pub fn request_deadline(&self) -> Duration {
        self.settings.server.request_deadline()
    }

    /// Run `work` under the per-request deadline
    ///
    /// On expiry the work is dropped and nothing partial is returned.
    pub async fn within_deadline<T, F>(&self, work: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        let deadline = self.request_deadline();
        match tokio::time::timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::deadline_exceeded(deadline)),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/llm/analyze", post(handlers::analyze))
        .route("/llm/complete", post(handlers::complete))
        .route("/llm/test", get(handlers::test_provider))
        .route("/content/fetch", post(handlers::fetch_content))
        .route("/bookmarks/detect", get(handlers::detect_bookmarks))
        .route("/bookmarks/list", get(handlers::list_bookmarks))
        .route("/bookmarks/digest", post(handlers::digest_bookmark))
        .route("/bookmarks/ingest", post(handlers::ingest_bookmark))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = state.settings.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;
    Ok(())
}

/// Install the fmt subscriber; `RUST_LOG` beats the configured level
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
