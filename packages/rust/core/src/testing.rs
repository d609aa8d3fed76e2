//! In-memory search and generation backends for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use rarecite_generation::{GeneratedText, GenerationRequest, Generator, parse_markers};
use rarecite_search::SearchBackend;
use rarecite_shared::{
    Document, QualityTier, RareCiteError, RawDocument, Result, SectionId, identity_key,
};

/// Text of `words` words.
pub fn words(n: usize) -> String {
    vec!["evidence"; n].join(" ")
}

/// A raw result with `n` words and one citation.
pub fn raw_doc(url: &str, n: usize) -> RawDocument {
    RawDocument {
        source_id: None,
        url: url.into(),
        title: Some(format!("Title of {url}")),
        text: words(n),
        citation_count: Some(1),
    }
}

/// A tier-4 document.
pub fn document(url: &str, word_count: usize, citation_count: u32) -> Document {
    let text = words(word_count);
    let key = identity_key(url, &text);
    Document {
        source_id: key.clone(),
        url: url.into(),
        title: format!("Title of {url}"),
        raw_text: text,
        word_count,
        quality_tier: QualityTier::AgencyOrDatabase,
        tier_score: 4,
        citation_count,
        identity_key: key,
    }
}

// ---------------------------------------------------------------------------
// MockSearch
// ---------------------------------------------------------------------------

/// Canned results per exact query; unknown queries get the fallback results.
#[derive(Default)]
pub struct MockSearch {
    responses: HashMap<String, Vec<RawDocument>>,
    fallback: Vec<RawDocument>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
    finished: Mutex<usize>,
}

impl MockSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, query: &str, results: Vec<RawDocument>) -> Self {
        self.responses.insert(query.to_string(), results);
        self
    }

    pub fn with_default(mut self, results: Vec<RawDocument>) -> Self {
        self.fallback = results;
        self
    }

    pub fn failing(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    pub fn panicking(mut self, query: &str) -> Self {
        self.panicking.insert(query.to_string());
        self
    }

    /// Every query sleeps this long before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Queries that ran to completion.
    pub fn finished(&self) -> usize {
        *self.finished.lock().unwrap()
    }
}

#[async_trait]
impl SearchBackend for MockSearch {
    async fn search(&self, query: &str, excluded_domains: &[String]) -> Result<Vec<RawDocument>> {
        self.calls
            .lock()
            .unwrap()
            .push((query.to_string(), excluded_domains.to_vec()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        *self.finished.lock().unwrap() += 1;

        if self.panicking.contains(query) {
            panic!("mock search panicked on {query}");
        }
        if self.failing.contains(query) {
            return Err(RareCiteError::Search(format!("HTTP 503 for {query}")));
        }
        Ok(self
            .responses
            .get(query)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

/// Returns canned text per section, or `"{title} text [1]."` by default.
#[derive(Default)]
pub struct MockGenerator {
    texts: HashMap<SectionId, String>,
    failing: HashSet<SectionId>,
    delays: HashMap<SectionId, Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, section: SectionId, text: &str) -> Self {
        self.texts.insert(section, text.to_string());
        self
    }

    pub fn failing(mut self, section: SectionId) -> Self {
        self.failing.insert(section);
        self
    }

    pub fn delayed(mut self, section: SectionId, delay: Duration) -> Self {
        self.delays.insert(section, delay);
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_for(&self, section: SectionId) -> Option<GenerationRequest> {
        self.requests().into_iter().find(|r| r.section == section)
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delays.get(&request.section) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&request.section) {
            return Err(RareCiteError::Generation("HTTP 500".into()));
        }

        let text = self
            .texts
            .get(&request.section)
            .cloned()
            .unwrap_or_else(|| format!("{} text [1].", request.section.title()));

        Ok(GeneratedText {
            citations_used: parse_markers(&text),
            text,
            model: "mock/model".into(),
            tokens_in: 10,
            tokens_out: 5,
            latency_ms: 1,
        })
    }

    fn model(&self) -> &str {
        "mock/model"
    }
}
