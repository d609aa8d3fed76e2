//! Brave-style web search backend with optional page fetching.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use rarecite_markdown::{ExtractedText, extract_text};
use rarecite_shared::{RareCiteError, RawDocument, Result, SearchConfig, read_api_key};

use crate::{SearchBackend, is_excluded, query_with_exclusions};

/// User-Agent string for search and page requests.
const USER_AGENT: &str = concat!("rarecite/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow when fetching a result page.
const MAX_REDIRECTS: usize = 5;

/// Result pages larger than this are not downloaded (5 MB).
const MAX_PAGE_SIZE: u64 = 5 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    web: Option<WebResults>,
}

#[derive(Debug, Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct WebResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    extra_snippets: Vec<String>,
}

// ---------------------------------------------------------------------------
// WebSearchBackend
// ---------------------------------------------------------------------------

/// Web search over an HTTP JSON API.
pub struct WebSearchBackend {
    client: Client,
    endpoint: String,
    api_key: String,
    results_per_query: u32,
    fetch_pages: bool,
    /// Allow fetching localhost/private IPs (for tests with mock servers).
    allow_localhost: bool,
}

impl WebSearchBackend {
    /// Build a backend from config, reading the API key from its env var.
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let api_key = read_api_key(&config.api_key_env, "Search")?;
        Self::with_api_key(config, api_key)
    }

    /// Build a backend with an explicit API key.
    pub fn with_api_key(config: &SearchConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RareCiteError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: api_key.into(),
            results_per_query: config.results_per_query,
            fetch_pages: config.fetch_pages,
            allow_localhost: false,
        })
    }

    /// Allow fetching localhost/private IPs (for integration tests).
    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    async fn query_api(&self, query: &str) -> Result<Vec<WebResult>> {
        let count = self.results_per_query.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("count", count.as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await
            .map_err(|e| RareCiteError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RareCiteError::Search(format!(
                "{}: HTTP {status}",
                self.endpoint
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| RareCiteError::Search(format!("invalid search response: {e}")))?;

        Ok(body.web.map(|w| w.results).unwrap_or_default())
    }
}

#[async_trait]
impl SearchBackend for WebSearchBackend {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str, excluded_domains: &[String]) -> Result<Vec<RawDocument>> {
        let full_query = query_with_exclusions(query, excluded_domains);
        let results: Vec<WebResult> = self
            .query_api(&full_query)
            .await?
            .into_iter()
            .filter(|r| {
                let excluded = is_excluded(&r.url, excluded_domains);
                if excluded {
                    debug!(url = %r.url, "dropping result from excluded domain");
                }
                !excluded
            })
            .take(self.results_per_query as usize)
            .collect();

        debug!(results = results.len(), "search complete");

        if !self.fetch_pages {
            return Ok(results.into_iter().map(snippet_document).collect());
        }

        let mut handles = Vec::with_capacity(results.len());
        for result in results {
            let client = self.client.clone();
            let allow_localhost = self.allow_localhost;
            handles.push(tokio::spawn(async move {
                fetch_document(&client, result, allow_localhost).await
            }));
        }

        let mut documents = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(doc) => documents.push(doc),
                Err(e) => warn!(error = %e, "page fetch task failed"),
            }
        }

        Ok(documents)
    }

    fn name(&self) -> &str {
        "web"
    }
}

// ---------------------------------------------------------------------------
// Page fetching
// ---------------------------------------------------------------------------

/// Fetch a result page; fall back to the search snippet on any failure.
async fn fetch_document(client: &Client, result: WebResult, allow_localhost: bool) -> RawDocument {
    match fetch_page_text(client, &result.url, allow_localhost).await {
        Ok(extracted) if extracted.word_count > 0 => {
            let title = non_empty(strip_tags(&result.title)).or(extracted.title);
            RawDocument {
                source_id: None,
                url: result.url,
                title,
                text: extracted.text,
                citation_count: None,
            }
        }
        Ok(_) => {
            debug!(url = %result.url, "page had no text, using snippet");
            snippet_document(result)
        }
        Err(e) => {
            warn!(url = %result.url, error = %e, "page fetch failed, using snippet");
            snippet_document(result)
        }
    }
}

async fn fetch_page_text(client: &Client, url: &str, allow_localhost: bool) -> Result<ExtractedText> {
    let parsed =
        Url::parse(url).map_err(|e| RareCiteError::validation(format!("{url}: {e}")))?;
    if !allow_localhost && is_ssrf_target(&parsed) {
        return Err(RareCiteError::validation(format!(
            "{url}: refusing to fetch private address"
        )));
    }

    let response = client
        .get(parsed.as_str())
        .send()
        .await
        .map_err(|e| RareCiteError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(RareCiteError::Network(format!("{url}: HTTP {status}")));
    }

    if let Some(len) = response.content_length() {
        if len > MAX_PAGE_SIZE {
            return Err(RareCiteError::validation(format!(
                "{url}: page too large ({len} bytes, max {MAX_PAGE_SIZE})"
            )));
        }
    }

    if let Some(content_type) = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        if !content_type.contains("html") {
            return Err(RareCiteError::parse(format!(
                "{url}: unsupported content type {content_type}"
            )));
        }
    }

    let body = read_capped(response, url, MAX_PAGE_SIZE).await?;
    extract_text(&body, url)
}

/// Read a response body chunk by chunk, failing once it exceeds `max` bytes.
/// `Content-Length` is absent on chunked responses, so the cap applies here.
async fn read_capped(mut response: reqwest::Response, url: &str, max: u64) -> Result<String> {
    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| RareCiteError::Network(format!("{url}: failed to read body: {e}")))?
    {
        if (body.len() + chunk.len()) as u64 > max {
            return Err(RareCiteError::validation(format!(
                "{url}: page too large (more than {max} bytes)"
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Build a document from the search snippet alone.
fn snippet_document(result: WebResult) -> RawDocument {
    let text = std::iter::once(&result.description)
        .chain(result.extra_snippets.iter())
        .map(|s| strip_tags(s))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    RawDocument {
        source_id: None,
        title: non_empty(strip_tags(&result.title)),
        url: result.url,
        text,
        citation_count: None,
    }
}

/// Text content of an HTML fragment (snippets carry `<strong>` highlights).
fn strip_tags(fragment: &str) -> String {
    Html::parse_fragment(fragment)
        .root_element()
        .text()
        .collect::<String>()
        .trim()
        .to_string()
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Whether a URL targets a local or private resource.
fn is_ssrf_target(url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return true;
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
