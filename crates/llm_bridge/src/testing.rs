//! Scripted providers and page sources for exercising routing without a
//! live backend

use crate::provider::{Completion, CompletionRequest, Provider, ProviderError};
use crate::screening::SCREENING_INSTRUCTION;
use async_trait::async_trait;
use core_pipeline::{FetchError, FetchedPage, PageSource};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

type Reply = Result<String, ProviderError>;

/// Provider that answers from a script and records every request
///
/// Screening prompts get `screening` when set; everything else pops the
/// script in order and then repeats `default`.
pub struct ScriptedProvider {
    name: String,
    local: bool,
    available: bool,
    screening: Option<Reply>,
    script: Mutex<VecDeque<Reply>>,
    default: Reply,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    fn new(name: &str, local: bool) -> Self {
        Self {
            name: name.to_string(),
            local,
            available: true,
            screening: None,
            script: Mutex::new(VecDeque::new()),
            default: Ok("ok".to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn local(name: &str) -> Self {
        Self::new(name, true)
    }

    pub fn cloud(name: &str) -> Self {
        Self::new(name, false)
    }

    /// Fixed answer for screening prompts
    pub fn screening(mut self, reply: Reply) -> Self {
        self.screening = Some(reply);
        self
    }

    pub fn clean(self) -> Self {
        self.screening(Ok("CLEAN: nothing personal".to_string()))
    }

    pub fn sensitive(self) -> Self {
        self.screening(Ok("SENSITIVE: contains an account number".to_string()))
    }

    pub fn then(self, reply: Reply) -> Self {
        self.lock_script().push_back(reply);
        self
    }

    pub fn then_ok(self, text: &str) -> Self {
        self.then(Ok(text.to_string()))
    }

    pub fn then_err(self, err: ProviderError) -> Self {
        self.then(Err(err))
    }

    /// Answer used once the script runs out
    pub fn otherwise(mut self, reply: Reply) -> Self {
        self.default = reply;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Every request received, in order
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    /// Requests that were not screening calls
    pub fn answer_calls(&self) -> Vec<CompletionRequest> {
        self.calls()
            .into_iter()
            .filter(|c| !is_screening(c))
            .collect()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Reply>> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn is_screening(request: &CompletionRequest) -> bool {
    request.prompt.contains(SCREENING_INSTRUCTION)
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_local(&self) -> bool {
        self.local
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        let reply = match (&self.screening, is_screening(request)) {
            (Some(reply), true) => reply.clone(),
            _ => self
                .lock_script()
                .pop_front()
                .unwrap_or_else(|| self.default.clone()),
        };
        reply.map(|text| Completion {
            text,
            model: format!("{}-model", self.name),
        })
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}

enum PageOutcome {
    Page(FetchedPage),
    Timeout,
    Refused(u16),
}

/// In-memory [`PageSource`]; unknown URLs are unreachable
#[derive(Default)]
pub struct StaticPages {
    pages: HashMap<String, PageOutcome>,
}

impl StaticPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, title: Option<&str>, text: &str) -> Self {
        let page = FetchedPage {
            url: url.to_string(),
            final_url: url.to_string(),
            title: title.map(str::to_string),
            text: text.to_string(),
            word_count: text.split_whitespace().count(),
            truncated: false,
        };
        self.pages.insert(url.to_string(), PageOutcome::Page(page));
        self
    }

    pub fn timeout(mut self, url: &str) -> Self {
        self.pages.insert(url.to_string(), PageOutcome::Timeout);
        self
    }

    pub fn refused(mut self, url: &str, status: u16) -> Self {
        self.pages.insert(url.to_string(), PageOutcome::Refused(status));
        self
    }
}

#[async_trait]
impl PageSource for StaticPages {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        core_pipeline::fetcher::parse_http_url(url)?;
        match self.pages.get(url) {
            Some(PageOutcome::Page(page)) => Ok(page.clone()),
            Some(PageOutcome::Timeout) => Err(FetchError::FetchTimeout {
                url: url.to_string(),
            }),
            Some(PageOutcome::Refused(status)) => Err(FetchError::FetchRefused {
                url: url.to_string(),
                status: *status,
            }),
            None => Err(FetchError::Unreachable {
                url: url.to_string(),
                reason: "no such page".to_string(),
            }),
        }
    }
}
