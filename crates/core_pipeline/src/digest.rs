//! Digest response parsing.
//!
//! Turns a model's structured answer into a [`DigestResult`]. Models wrap
//! JSON in code fences or chatter around it, so the outermost object is
//! located first. Prose answers degrade to a summary-only digest.

use crate::types::{read_time_minutes, DigestResult, Taxonomy};
use serde::Deserialize;
use thiserror::Error;

/// Longest summary kept when falling back to raw prose
const RAW_SUMMARY_CHARS: usize = 600;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("malformed digest: {0}")]
    MalformedDigest(String),
}

impl DigestError {
    pub fn kind(&self) -> &'static str {
        "malformed_digest"
    }
}

/// Shape the model is asked to answer with
#[derive(Debug, Deserialize)]
struct RawDigest {
    summary: Option<String>,
    #[serde(default, alias = "key_takeaways")]
    key_points: Option<Vec<String>>,
    category: Option<String>,
    #[serde(default, alias = "suggested_tags")]
    tags: Option<Vec<String>>,
}

/// Where the page came from and how big it was
#[derive(Debug, Clone, Default)]
pub struct DigestSource {
    pub url: String,
    pub title: String,
    pub word_count: usize,
}

/// Strip markdown code block wrappers from a JSON response
pub fn strip_markdown_json(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    match rest.rfind("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

/// The outermost `{ ... }` span of a response, if any
fn json_object(text: &str) -> Option<&str> {
    let cleaned = strip_markdown_json(text);
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    (end > start).then(|| &cleaned[start..=end])
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Parse a digest answer, falling back to a raw summary for prose
pub fn parse_digest(
    raw: &str,
    source: &DigestSource,
    taxonomy: &Taxonomy,
) -> Result<DigestResult, DigestError> {
    let base = |summary: String, partial: bool| DigestResult {
        url: source.url.clone(),
        title: source.title.clone(),
        summary,
        key_points: Vec::new(),
        category: taxonomy.normalize(""),
        tags: Vec::new(),
        word_count: source.word_count,
        read_time_minutes: read_time_minutes(source.word_count),
        partial,
        provider_used: String::new(),
        kept_local: true,
    };

    let answer = raw.trim();
    if answer.is_empty() {
        return Err(DigestError::MalformedDigest("empty response".to_string()));
    }
    let structured = answer.starts_with('{') || answer.starts_with("```");

    let parsed = match json_object(answer).map(serde_json::from_str::<RawDigest>) {
        Some(Ok(parsed)) => parsed,
        Some(Err(e)) if structured => {
            return Err(DigestError::MalformedDigest(format!("invalid JSON: {}", e)));
        }
        None if structured => {
            return Err(DigestError::MalformedDigest("truncated JSON object".to_string()));
        }
        _ => {
            tracing::debug!(url = %source.url, "digest answer was prose, keeping raw summary");
            return Ok(base(answer.chars().take(RAW_SUMMARY_CHARS).collect(), true));
        }
    };

    let summary = parsed
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DigestError::MalformedDigest("missing summary".to_string()))?;

    match (parsed.key_points, parsed.category, parsed.tags) {
        (Some(key_points), Some(category), Some(tags)) => Ok(DigestResult {
            key_points: clean_list(key_points),
            category: taxonomy.normalize(&category),
            tags: clean_list(tags),
            ..base(summary, false)
        }),
        (key_points, category, tags) => {
            tracing::debug!(url = %source.url, "digest answer missing fields, keeping summary");
            Ok(DigestResult {
                key_points: clean_list(key_points.unwrap_or_default()),
                category: taxonomy.normalize(category.as_deref().unwrap_or_default()),
                tags: clean_list(tags.unwrap_or_default()),
                ..base(summary, true)
            })
        }
    }
}
