//! Generation cache backed by the run database.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use rarecite_generation::{GeneratedText, GenerationRequest, Generator, prompt_hash};
use rarecite_shared::Result;
use rarecite_storage::Storage;

/// Wraps a [`Generator`], reusing stored output for identical prompts.
///
/// Cache read and write failures are logged and fall through to the inner
/// generator; they never fail a section.
pub struct CachingGenerator {
    inner: Arc<dyn Generator>,
    storage: Arc<Storage>,
}

impl CachingGenerator {
    pub fn new(inner: Arc<dyn Generator>, storage: Arc<Storage>) -> Self {
        Self { inner, storage }
    }

    async fn lookup(&self, hash: &str) -> Option<GeneratedText> {
        match self.storage.get_cached_generation(hash, self.inner.model()).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(cached) => Some(cached),
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "generation cache read failed");
                None
            }
        }
    }
}

#[async_trait]
impl Generator for CachingGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText> {
        let hash = prompt_hash(request, self.inner.model());

        if let Some(cached) = self.lookup(&hash).await {
            debug!(section = %request.section.as_str(), "generation cache hit");
            return Ok(cached);
        }

        let generated = self.inner.generate(request).await?;

        match serde_json::to_string(&generated) {
            Ok(json) => {
                if let Err(e) = self
                    .storage
                    .set_cached_generation(&hash, self.inner.model(), request.section, &json)
                    .await
                {
                    warn!(error = %e, "generation cache write failed");
                }
            }
            Err(e) => warn!(error = %e, "could not serialize generation for cache"),
        }

        Ok(generated)
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGenerator;
    use rarecite_generation::CitationStyle;
    use rarecite_shared::SectionId;
    use uuid::Uuid;

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("rarecite_test_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            section: SectionId::Outlook,
            system_prompt: "system".into(),
            prompt: prompt.into(),
            num_documents: 2,
            max_citations: 2,
            citation_style: CitationStyle::BracketedNumber,
        }
    }

    #[tokio::test]
    async fn second_identical_request_is_served_from_cache() {
        let inner = Arc::new(MockGenerator::new().with_text(SectionId::Outlook, "Varies [1]."));
        let storage = test_storage().await;
        let caching = CachingGenerator::new(inner.clone(), storage.clone());

        let first = caching.generate(&request("p")).await.unwrap();
        let second = caching.generate(&request("p")).await.unwrap();

        assert_eq!(inner.requests().len(), 1);
        assert_eq!(first.text, second.text);
        assert_eq!(second.citations_used, vec![1]);
        assert_eq!(caching.model(), "mock/model");

        caching.generate(&request("different")).await.unwrap();
        assert_eq!(inner.requests().len(), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let inner = Arc::new(MockGenerator::new().failing(SectionId::Outlook));
        let storage = test_storage().await;
        let caching = CachingGenerator::new(inner.clone(), storage);

        assert!(caching.generate(&request("p")).await.is_err());
        assert!(caching.generate(&request("p")).await.is_err());
        assert_eq!(inner.requests().len(), 2);
    }

    #[tokio::test]
    async fn unreadable_entry_falls_through() {
        let inner = Arc::new(MockGenerator::new());
        let storage = test_storage().await;
        let req = request("p");
        let hash = prompt_hash(&req, "mock/model");
        storage
            .set_cached_generation(&hash, "mock/model", SectionId::Outlook, "not json")
            .await
            .unwrap();

        let caching = CachingGenerator::new(inner.clone(), storage);
        let out = caching.generate(&req).await.unwrap();
        assert_eq!(out.text, "Outlook text [1].");
        assert_eq!(inner.requests().len(), 1);
    }
}
