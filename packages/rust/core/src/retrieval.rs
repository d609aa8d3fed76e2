//! Retrieval coordination: requirements → queries → ranked section documents.
//!
//! Every section runs on its own tokio task (bounded by a semaphore); inside a
//! section, requirements and their query templates run in registry order.
//! `retrieve_all` returns only after every section task has finished, so the
//! snapshot handed to assessment is always complete.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use rarecite_search::SearchBackend;
use rarecite_shared::{Document, Gap, Requirement, SectionId};

use crate::pipeline::ProgressReporter;
use crate::quality::QualityFilter;
use crate::registry::{SectionRegistry, SectionSpec};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one requirement's searches.
#[derive(Debug, Clone)]
pub struct RequirementResult {
    pub section: SectionId,
    pub description: String,
    pub min_sources: u32,
    /// Accepted documents, best tier first.
    pub documents: Vec<Document>,
    /// Bound queries whose search call failed.
    pub failed_queries: Vec<String>,
    /// Number of bound queries issued.
    pub queries_issued: usize,
}

impl RequirementResult {
    /// Evidence holes this requirement leaves behind.
    pub fn gaps(&self) -> Vec<Gap> {
        let mut gaps = Vec::new();
        let n = self.documents.len();

        if n == 0 {
            gaps.push(Gap {
                section: self.section,
                description: format!("no reliable sources found for {}", self.description),
            });
        } else if n < self.min_sources as usize {
            gaps.push(Gap {
                section: self.section,
                description: format!(
                    "only {n} of {} expected sources found for {}",
                    self.min_sources, self.description
                ),
            });
        }

        if !self.failed_queries.is_empty() {
            gaps.push(Gap {
                section: self.section,
                description: format!(
                    "search failed for {} of {} queries about {}",
                    self.failed_queries.len(),
                    self.queries_issued,
                    self.description
                ),
            });
        }
        gaps
    }
}

/// Ranked, deduplicated documents for one section.
#[derive(Debug, Clone)]
pub struct SectionDocumentSet {
    pub section: SectionId,
    pub documents: Vec<Document>,
}

impl SectionDocumentSet {
    pub fn empty(section: SectionId) -> Self {
        Self {
            section,
            documents: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn total_words(&self) -> usize {
        self.documents.iter().map(|d| d.word_count).sum()
    }

    pub fn total_citations(&self) -> u32 {
        self.documents.iter().map(|d| d.citation_count).sum()
    }
}

/// Spawned section tasks, aborted if `retrieve_all` is dropped before
/// collecting them.
struct SectionTasks(Vec<(SectionId, JoinHandle<(SectionDocumentSet, Vec<Gap>)>)>);

impl Drop for SectionTasks {
    fn drop(&mut self) {
        for (_, handle) in &self.0 {
            handle.abort();
        }
    }
}

/// Complete retrieval results for one disease: a set per section in schema
/// order plus the gaps found along the way.
#[derive(Debug, Clone)]
pub struct RetrievalSnapshot {
    pub disease: String,
    pub sections: Vec<SectionDocumentSet>,
    pub gaps: Vec<Gap>,
}

impl RetrievalSnapshot {
    pub fn documents(&self, section: SectionId) -> &[Document] {
        self.sections
            .iter()
            .find(|s| s.section == section)
            .map(|s| s.documents.as_slice())
            .unwrap_or_default()
    }

    /// Any section's copy of the document with this identity key.
    pub fn document(&self, identity_key: &str) -> Option<&Document> {
        self.sections
            .iter()
            .flat_map(|s| s.documents.iter())
            .find(|d| d.identity_key == identity_key)
    }

    pub fn total_documents(&self) -> usize {
        self.sections.iter().map(|s| s.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Keep the first document per identity key, in arrival order.
pub fn dedupe(documents: impl IntoIterator<Item = Document>) -> Vec<Document> {
    let mut seen = HashSet::new();
    documents
        .into_iter()
        .filter(|d| seen.insert(d.identity_key.clone()))
        .collect()
}

/// Stable sort, best tier first; arrival order breaks ties.
pub fn rank(documents: &mut [Document]) {
    documents.sort_by(|a, b| b.quality_tier.cmp(&a.quality_tier));
}

/// [`dedupe`] then [`rank`].
pub fn dedupe_and_rank(documents: impl IntoIterator<Item = Document>) -> Vec<Document> {
    let mut ranked = dedupe(documents);
    rank(&mut ranked);
    ranked
}

// ---------------------------------------------------------------------------
// RetrievalCoordinator
// ---------------------------------------------------------------------------

/// Drives the search collaborator for every requirement of the schema.
#[derive(Clone)]
pub struct RetrievalCoordinator {
    search: Arc<dyn SearchBackend>,
    filter: Arc<QualityFilter>,
    excluded_domains: Arc<[String]>,
    concurrency: usize,
}

impl RetrievalCoordinator {
    pub fn new(
        search: Arc<dyn SearchBackend>,
        filter: QualityFilter,
        excluded_domains: Vec<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            search,
            filter: Arc::new(filter),
            excluded_domains: excluded_domains.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Run every query template of one requirement and rank what survives.
    ///
    /// Empty or failed searches contribute nothing; failures are recorded.
    #[instrument(skip_all, fields(section = %requirement.section.as_str(), requirement = %requirement.description))]
    pub async fn retrieve(&self, requirement: &Requirement, disease: &str) -> RequirementResult {
        let queries = requirement.queries_for(disease);
        let mut arrived = Vec::new();
        let mut failed_queries = Vec::new();

        for query in &queries {
            match self.search.search(query, &self.excluded_domains).await {
                Ok(results) => {
                    debug!(query = %query, results = results.len(), "search returned");
                    arrived.extend(results.into_iter().map(|r| self.filter.evaluate(r)));
                }
                Err(e) => {
                    warn!(query = %query, backend = self.search.name(), error = %e, "search failed");
                    failed_queries.push(query.clone());
                }
            }
        }

        let mut documents: Vec<Document> = dedupe(arrived)
            .into_iter()
            .filter(|d| self.filter.accept(d))
            .collect();
        rank(&mut documents);

        debug!(accepted = documents.len(), failed = failed_queries.len(), "requirement retrieved");

        RequirementResult {
            section: requirement.section,
            description: requirement.description.clone(),
            min_sources: requirement.min_sources,
            documents,
            failed_queries,
            queries_issued: queries.len(),
        }
    }

    /// Retrieve one section: its requirements in order, merged into one set.
    pub async fn retrieve_section(
        &self,
        spec: &SectionSpec,
        disease: &str,
    ) -> (SectionDocumentSet, Vec<Gap>) {
        let mut merged = Vec::new();
        let mut gaps = Vec::new();

        for requirement in &spec.requirements {
            let result = self.retrieve(requirement, disease).await;
            gaps.extend(result.gaps());
            merged.extend(result.documents);
        }

        let set = SectionDocumentSet {
            section: spec.id,
            documents: dedupe_and_rank(merged),
        };
        (set, gaps)
    }

    /// Retrieve every section concurrently and wait for all of them.
    #[instrument(skip_all, fields(disease = %disease))]
    pub async fn retrieve_all(
        &self,
        registry: &SectionRegistry,
        disease: &str,
        progress: &dyn ProgressReporter,
    ) -> RetrievalSnapshot {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let total = registry.sections().len();

        let mut tasks = SectionTasks(Vec::with_capacity(total));
        for spec in registry.sections() {
            let section = spec.id;
            let coordinator = self.clone();
            let spec = spec.clone();
            let disease = disease.to_string();
            let semaphore = Arc::clone(&semaphore);

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                coordinator.retrieve_section(&spec, &disease).await
            });
            tasks.0.push((section, handle));
        }

        let mut sections = Vec::with_capacity(total);
        let mut gaps = Vec::new();

        for (done, (section, handle)) in tasks.0.iter_mut().enumerate() {
            let section = *section;
            let (set, section_gaps) = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(section = %section.as_str(), error = %e, "section retrieval task failed");
                    let gap = Gap {
                        section,
                        description: "retrieval for this section stopped unexpectedly".into(),
                    };
                    (SectionDocumentSet::empty(section), vec![gap])
                }
            };
            debug!(
                section = %section.as_str(),
                documents = set.len(),
                words = set.total_words(),
                citations = set.total_citations(),
                "section retrieved"
            );
            progress.section_retrieved(section, set.len(), done + 1, total);
            sections.push(set);
            gaps.extend(section_gaps);
        }

        let snapshot = RetrievalSnapshot {
            disease: disease.to_string(),
            sections,
            gaps,
        };
        info!(
            documents = snapshot.total_documents(),
            gaps = snapshot.gaps.len(),
            "retrieval complete"
        );
        snapshot
    }
}
