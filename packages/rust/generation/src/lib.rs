//! Generation collaborator: the [`Generator`] trait and citation marker handling.
//!
//! The assembler hands a generator one prompt per section and gets back prose
//! whose citations are bracketed integers (`[1]`, `[2]`) referring to the
//! numbered documents in the prompt.

mod markers;
mod openrouter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use rarecite_shared::{Result, SectionId};

pub use markers::{enforce_citation_limit, normalize_markers, parse_markers, strip_markers};
pub use openrouter::OpenRouterGenerator;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// How citations must appear in generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationStyle {
    /// `[n]`, where `n` is the 1-based position of a document in the prompt.
    #[default]
    BracketedNumber,
}

/// One section-generation call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub section: SectionId,
    pub system_prompt: String,
    pub prompt: String,
    /// Documents numbered in the prompt; valid markers are `1..=num_documents`.
    pub num_documents: u32,
    /// Upper bound on distinct markers in the output.
    pub max_citations: u32,
    pub citation_style: CitationStyle,
}

/// Generator output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedText {
    /// Prose with bracketed markers.
    pub text: String,
    /// Distinct markers the generator reports using, in first-use order.
    pub citations_used: Vec<u32>,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub latency_ms: u64,
}

/// Produces section prose from a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText>;

    /// Model identifier, part of the generation cache key.
    fn model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Prompt helpers
// ---------------------------------------------------------------------------

/// Compute a prompt hash for cache keying.
pub fn prompt_hash(request: &GenerationRequest, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.system_prompt.as_bytes());
    hasher.update(request.prompt.as_bytes());
    hasher.update(request.max_citations.to_le_bytes());
    hasher.update(model.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Truncate content to at most `max_chars` characters, marking the cut.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((cut, _)) => {
            let truncated = &content[..cut];
            format!("{truncated}\n\n[... content truncated ...]")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            section: SectionId::Overview,
            system_prompt: "system".into(),
            prompt: prompt.into(),
            num_documents: 3,
            max_citations: 3,
            citation_style: CitationStyle::BracketedNumber,
        }
    }

    #[test]
    fn prompt_hash_deterministic() {
        let h1 = prompt_hash(&request("hello world"), "model-a");
        let h2 = prompt_hash(&request("hello world"), "model-a");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn prompt_hash_differs_by_model_and_prompt() {
        let base = prompt_hash(&request("hello"), "model-a");
        assert_ne!(base, prompt_hash(&request("hello"), "model-b"));
        assert_ne!(base, prompt_hash(&request("hello!"), "model-a"));
    }

    #[test]
    fn truncate_short_content() {
        assert_eq!(truncate_content("short text", 100), "short text");
    }

    #[test]
    fn truncate_long_content() {
        let content = "a".repeat(200);
        let result = truncate_content(&content, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(!result.starts_with(&"a".repeat(101)));
        assert!(result.contains("truncated"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let content = "α-galactosidase".repeat(10);
        let result = truncate_content(&content, 3);
        assert!(result.starts_with("α-g\n\n"));
    }
}
