//! Core types for the sieve pipeline
//!
//! This module defines the request/verdict/result records that flow from
//! the HTTP surface through screening and routing, plus the bookmark and
//! digest records produced by the ingestion side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder substituted with the request content inside an instruction
pub const CONTENT_PLACEHOLDER: &str = "{content}";

/// Rationale recorded when the local screening call could not complete
pub const SCREENING_UNAVAILABLE: &str = "screening-unavailable";

/// Shape of the output requested from a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Free-form text
    #[default]
    Text,
    /// A single JSON object
    Json,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("content must not be empty")]
    EmptyContent,
    #[error("provider override must not be blank")]
    BlankOverride,
}

/// A piece of content to be screened and analyzed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// The text under analysis
    pub content: String,
    /// What to do with the content; `{content}` is substituted if present
    #[serde(default)]
    pub instruction: Option<String>,
    /// Name of a registered provider that must answer pass 2
    #[serde(default)]
    pub provider_override: Option<String>,
    /// Hint about what kind of content this is (email, article, ...)
    #[serde(default)]
    pub category_hint: Option<String>,
    /// Explicit opt-in allowing non-sensitive content to leave the machine
    #[serde(default)]
    pub allow_external: bool,
    #[serde(default)]
    pub format: OutputFormat,
}

impl AnalysisRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_override(mut self, provider: impl Into<String>) -> Self {
        self.provider_override = Some(provider.into());
        self
    }

    pub fn with_category_hint(mut self, hint: impl Into<String>) -> Self {
        self.category_hint = Some(hint.into());
        self
    }

    pub fn allow_external(mut self, allow: bool) -> Self {
        self.allow_external = allow;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Check the request invariants before any provider is contacted
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.content.trim().is_empty() {
            return Err(RequestError::EmptyContent);
        }
        if matches!(&self.provider_override, Some(name) if name.trim().is_empty()) {
            return Err(RequestError::BlankOverride);
        }
        Ok(())
    }

    /// Build the pass-2 prompt from the instruction and content
    pub fn render_prompt(&self) -> String {
        let mut prompt = match self.instruction.as_deref() {
            Some(instruction) if instruction.contains(CONTENT_PLACEHOLDER) => {
                instruction.replace(CONTENT_PLACEHOLDER, &self.content)
            }
            Some(instruction) if !instruction.trim().is_empty() => {
                format!("{}\n\nContent:\n{}", instruction.trim(), self.content)
            }
            _ => format!(
                "{}\n\nAnalyze the above content. Provide a structured JSON response.",
                self.content
            ),
        };
        if let Some(hint) = self.category_hint.as_deref() {
            prompt.push_str(&format!("\n\n(Content type: {})", hint));
        }
        prompt
    }
}

/// Outcome of the mandatory local screening call
///
/// Created once per request and never mutated; the fields are only
/// reachable through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitivityVerdict {
    sensitive: bool,
    rationale: String,
    screened_by: String,
}

impl SensitivityVerdict {
    pub fn new(sensitive: bool, rationale: impl Into<String>, screened_by: impl Into<String>) -> Self {
        Self {
            sensitive,
            rationale: rationale.into(),
            screened_by: screened_by.into(),
        }
    }

    /// Fail-closed verdict used when the screening provider did not answer
    pub fn screening_unavailable(screened_by: impl Into<String>) -> Self {
        Self::new(true, SCREENING_UNAVAILABLE, screened_by)
    }

    pub fn sensitive(&self) -> bool {
        self.sensitive
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub fn screened_by(&self) -> &str {
        &self.screened_by
    }

    pub fn is_screening_unavailable(&self) -> bool {
        self.rationale == SCREENING_UNAVAILABLE
    }
}

/// One pass-2 provider call made while answering a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub provider: String,
    pub local: bool,
    /// `ok`, or the error kind the provider failed with
    pub outcome: String,
}

/// Final answer of the routing engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub result: String,
    /// True iff no pass-2 call left the local provider
    pub kept_local: bool,
    pub provider_used: String,
    pub model_used: Option<String>,
    pub verdict: SensitivityVerdict,
    pub fallback_used: bool,
    pub attempts: Vec<Attempt>,
}

/// A bookmark flattened out of a browser export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkEntry {
    pub url: String,
    pub title: String,
    /// Folder names from the root container down, root itself excluded
    pub folder_path: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Synthetic root container this entry lives under (`bookmark_bar`, `other`, ...)
    pub root: String,
}

impl BookmarkEntry {
    /// Folder path joined with `/`; empty for root-level bookmarks
    pub fn folder(&self) -> String {
        self.folder_path.join("/")
    }
}

/// Structured digest of a single page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestResult {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub category: String,
    pub tags: Vec<String>,
    pub word_count: usize,
    pub read_time_minutes: usize,
    /// Set when only a raw summary could be recovered from the response
    pub partial: bool,
    pub provider_used: String,
    pub kept_local: bool,
}

/// Categories offered to the model when the caller supplies none
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "tech",
    "business",
    "science",
    "health",
    "politics",
    "culture",
    "tutorial",
    "reference",
    "tool",
    "other",
];

/// Catch-all category used when the model answers outside the taxonomy
pub const FALLBACK_CATEGORY: &str = "other";

/// Fixed set of category labels a digest may be filed under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    categories: Vec<String>,
}

impl Taxonomy {
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut labels: Vec<String> = Vec::new();
        for category in categories {
            let label = category.into().trim().to_lowercase();
            if !label.is_empty() && !labels.contains(&label) {
                labels.push(label);
            }
        }
        if !labels.iter().any(|c| c == FALLBACK_CATEGORY) {
            labels.push(FALLBACK_CATEGORY.to_string());
        }
        Self { categories: labels }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Map a model-provided label onto the taxonomy
    pub fn normalize(&self, label: &str) -> String {
        let label = label.trim().to_lowercase();
        if self.categories.contains(&label) {
            label
        } else {
            FALLBACK_CATEGORY.to_string()
        }
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::new(DEFAULT_CATEGORIES.iter().copied())
    }
}

/// Approximate reading time at 250 words per minute, never below one
pub fn read_time_minutes(word_count: usize) -> usize {
    (word_count / 250).max(1)
}
