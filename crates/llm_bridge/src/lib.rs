//! LLM Bridge for privacy-aware routing
//!
//! Wraps local (Ollama) and cloud (Claude, Gemini, OpenAI) backends behind
//! one [`Provider`] trait. Every analysis is screened by the local model
//! first; only clean content with an explicit opt-in leaves the machine.
//!
//! Copyright (c) 2025 Michael A Wright

pub mod anthropic;
pub mod distill;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod router;
pub mod screening;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use anthropic::AnthropicClient;
pub use distill::{DigestJob, DistillError, DistillationPipeline};
pub use gemini::GeminiClient;
pub use ollama::{OllamaClient, OllamaConfig};
pub use openai::OpenAiClient;
pub use provider::{
    Completion, CompletionRequest, Provider, ProviderError, SharedProvider,
};
pub use registry::{ProviderRegistry, RegistryError};
pub use router::{DirectCompletion, RouteStage, RoutingEngine, RoutingError};
