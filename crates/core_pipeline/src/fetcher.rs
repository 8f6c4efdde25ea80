//! Page fetching and readable-text extraction.
//!
//! Uses reqwest for fetching (bounded time, size, and redirects) and scraper
//! for a static parse of the HTML. Nothing on the page is executed.

use crate::config::FetchSettings;
use async_trait::async_trait;
use reqwest::{redirect, Client, Url};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use thiserror::Error;

/// Elements whose whole subtree is boilerplate or non-text
const SKIPPED_ELEMENTS: &[&str] = &[
    "head", "script", "style", "noscript", "template", "nav", "header", "footer", "aside",
    "form", "svg", "iframe", "button",
];

/// Elements that start a new line of extracted text
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "section", "article", "main", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5",
    "h6", "br", "tr", "table", "blockquote", "pre", "dd", "dt", "figcaption", "hr",
];

/// Containers tried, in order, before falling back to the whole document
const MAIN_SELECTORS: &[&str] = &["article", "main", "[role='main']", "body"];

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("timed out fetching {url}")]
    FetchTimeout { url: String },
    #[error("{url} answered with HTTP {status}")]
    FetchRefused { url: String, status: u16 },
    #[error("{url} is larger than the {limit} byte limit")]
    TooLarge { url: String, limit: usize },
    #[error("could not reach {url}: {reason}")]
    Unreachable { url: String, reason: String },
}

impl FetchError {
    /// Stable identifier reported to callers
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl { .. } => "invalid_url",
            FetchError::FetchTimeout { .. } => "fetch_timeout",
            FetchError::FetchRefused { .. } => "fetch_refused",
            FetchError::TooLarge { .. } => "too_large",
            FetchError::Unreachable { .. } => "fetch_unreachable",
        }
    }

    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::FetchTimeout {
                url: url.to_string(),
            }
        } else if err.is_redirect() {
            FetchError::Unreachable {
                url: url.to_string(),
                reason: "too many redirects".to_string(),
            }
        } else {
            FetchError::Unreachable {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Readable content extracted from a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedPage {
    /// The URL that was requested
    pub url: String,
    /// Where the content was finally served from, after redirects
    pub final_url: String,
    pub title: Option<String>,
    pub text: String,
    pub word_count: usize,
    pub truncated: bool,
}

/// Anything that can turn a URL into readable text
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// Accept only absolute http(s) URLs
pub fn parse_http_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url.trim()).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {}", other),
        }),
    }
}

/// HTTP-backed [`PageSource`]
#[derive(Debug, Clone)]
pub struct ContentFetcher {
    client: Client,
    max_bytes: usize,
    max_chars: usize,
}

impl ContentFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout())
            .redirect(redirect::Policy::limited(settings.max_redirects))
            .build()?;

        Ok(Self {
            client,
            max_bytes: settings.max_bytes,
            max_chars: settings.max_chars,
        })
    }

    /// Same fetcher with a different extraction cap
    pub fn with_max_chars(&self, max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            ..self.clone()
        }
    }

    async fn download(&self, url: &str) -> Result<(String, String), FetchError> {
        let parsed = parse_http_url(url)?;
        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::FetchRefused {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: self.max_bytes,
        };
        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(too_large());
        }

        let final_url = response.url().to_string();
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        Ok((final_url, String::from_utf8_lossy(&body).into_owned()))
    }
}

#[async_trait]
impl PageSource for ContentFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let (final_url, html) = self.download(url).await?;
        let mut page = extract_page(url, &html, self.max_chars);
        page.final_url = final_url;
        tracing::debug!(
            url,
            words = page.word_count,
            truncated = page.truncated,
            "fetched page"
        );
        Ok(page)
    }
}

/// Parse HTML and pull out its title and readable text
pub fn extract_page(url: &str, html: &str, max_chars: usize) -> FetchedPage {
    let document = Html::parse_document(html);
    let title = extract_title(&document);
    let full_text = extract_text(&document);

    let truncated = full_text.chars().count() > max_chars;
    let text = if truncated {
        full_text.chars().take(max_chars).collect()
    } else {
        full_text
    };
    let word_count = text.split_whitespace().count();

    FetchedPage {
        url: url.to_string(),
        final_url: url.to_string(),
        title,
        text,
        word_count,
        truncated,
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let selector = selector(css)?;
    let element = document.select(&selector).next()?;
    let text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
    (!text.is_empty()).then_some(text)
}

/// Extract the page title from <title>, og:title, or the first <h1>
fn extract_title(document: &Html) -> Option<String> {
    first_text(document, "title")
        .or_else(|| {
            let selector = selector("meta[property='og:title']")?;
            let content = document.select(&selector).next()?.value().attr("content")?;
            let content = collapse_whitespace(content);
            (!content.is_empty()).then_some(content)
        })
        .or_else(|| first_text(document, "h1"))
}

fn extract_text(document: &Html) -> String {
    for css in MAIN_SELECTORS {
        let Some(selector) = selector(css) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = readable_text(element);
            if !text.is_empty() {
                return text;
            }
        }
    }
    readable_text(document.root_element())
}

/// Pending work for the text walk
enum Frame<'a> {
    Open(ElementRef<'a>),
    Text(&'a str),
    Close,
}

/// Walk `root` with an explicit stack so nesting depth never grows the call stack
fn readable_text(root: ElementRef<'_>) -> String {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut stack = Vec::new();
    push_children(root, &mut stack);

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Text(text) => {
                for word in text.split_whitespace() {
                    if !current.is_empty() {
                        current.push(' ');
                    }
                    current.push_str(word);
                }
            }
            Frame::Close => flush_block(&mut blocks, &mut current),
            Frame::Open(element) => {
                let name = element.value().name();
                if SKIPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                if BLOCK_ELEMENTS.contains(&name) {
                    flush_block(&mut blocks, &mut current);
                    stack.push(Frame::Close);
                }
                push_children(element, &mut stack);
            }
        }
    }
    flush_block(&mut blocks, &mut current);
    blocks.join("\n")
}

/// Queue children so they pop in document order
fn push_children<'a>(element: ElementRef<'a>, stack: &mut Vec<Frame<'a>>) {
    for child in element.children().rev() {
        match child.value() {
            Node::Text(text) => stack.push(Frame::Text(&**text)),
            Node::Element(_) => {
                if let Some(child_ref) = ElementRef::wrap(child) {
                    stack.push(Frame::Open(child_ref));
                }
            }
            _ => {}
        }
    }
}

fn flush_block(blocks: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        blocks.push(std::mem::take(current));
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
