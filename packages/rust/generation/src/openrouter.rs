//! OpenAI-compatible chat completions backend (OpenRouter by default).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use rarecite_shared::{OpenRouterConfig, RareCiteError, Result, read_api_key};

use crate::markers::{enforce_citation_limit, normalize_markers};
use crate::{GeneratedText, GenerationRequest, Generator};

/// Generation requests can be slow; allow two minutes.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Sent as `X-Title` so usage is attributed on the OpenRouter dashboard.
const APP_TITLE: &str = "rarecite";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

// ---------------------------------------------------------------------------
// OpenRouterGenerator
// ---------------------------------------------------------------------------

/// Chat completions client implementing [`Generator`].
pub struct OpenRouterGenerator {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenRouterGenerator {
    /// Build a generator from config, reading the API key from its env var.
    pub fn new(config: &OpenRouterConfig) -> Result<Self> {
        let api_key = read_api_key(&config.api_key_env, "OpenRouter")?;
        Self::with_api_key(config, api_key)
    }

    /// Build a generator with an explicit API key.
    pub fn with_api_key(config: &OpenRouterConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| RareCiteError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: api_key.into(),
            model: config.default_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Override the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl Generator for OpenRouterGenerator {
    #[instrument(skip_all, fields(section = %request.section.as_str(), model = %self.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText> {
        let started = Instant::now();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", APP_TITLE)
            .json(&body)
            .send()
            .await
            .map_err(|e| RareCiteError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RareCiteError::Network(format!("failed to read completion: {e}")))?;

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            RareCiteError::Generation(format!(
                "invalid completion response (HTTP {status}): {e} (got: {})",
                text.chars().take(200).collect::<String>()
            ))
        })?;

        if let Some(err) = parsed.error {
            return Err(RareCiteError::Generation(format!(
                "HTTP {status}: {}",
                err.message
            )));
        }
        if !status.is_success() {
            return Err(RareCiteError::Generation(format!("HTTP {status}")));
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| RareCiteError::Generation("empty completion".into()))?;

        let normalized = normalize_markers(&content);
        let (text, citations_used) =
            enforce_citation_limit(&normalized, request.max_citations, request.num_documents);
        let usage = parsed.usage.unwrap_or_default();
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        debug!(
            citations = citations_used.len(),
            tokens_in = usage.prompt_tokens,
            tokens_out = usage.completion_tokens,
            latency_ms,
            "section generated"
        );

        Ok(GeneratedText {
            text,
            citations_used,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
            latency_ms,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
