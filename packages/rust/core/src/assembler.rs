//! Article assembly: section generation, placeholders and citation renumbering.
//!
//! Sufficient sections are written by the generation collaborator from their
//! ranked documents, numbered `1..n` in the prompt. Every other section gets a
//! fixed placeholder and is listed under "What Is Not Known". Once every
//! section is final, [`renumber_citations`] maps per-section markers onto one
//! global numbering and produces the bibliography.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use rarecite_generation::{
    CitationStyle, GeneratedText, GenerationRequest, Generator, parse_markers, strip_markers,
    truncate_content,
};
use rarecite_shared::{
    AppConfig, Article, ArticleSection, Bibliography, BibliographyEntry, CitationRef, Document,
    Gap, QualityTier, SectionId, SufficiencyReport,
};

use crate::pipeline::ProgressReporter;
use crate::registry::{SectionRegistry, SectionSpec};
use crate::retrieval::RetrievalSnapshot;

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("valid regex"));

/// Instructions shared by every section prompt.
pub const SYSTEM_PROMPT: &str = "\
You write one section of a plain-language reference article about a rare disease \
for patients, families and non-specialist clinicians.

Rules:
- Use only the numbered documents provided. Do not add facts from memory.
- Cite every factual statement with the number of its document in square brackets, \
like [1] or [2][3]. Never cite a number that is not in the document list.
- Describe what sources report. Do not address the reader with advice or instructions.
- The first time you use an abbreviation, write it out in full with the abbreviation \
in parentheses, for example enzyme replacement therapy (ERT).
- If documents disagree, say so and cite each of them.
- Do not speculate beyond what a document states.
- Write Markdown paragraphs or bullet lists. Do not include a heading.";

/// Content of a section without enough evidence.
pub const INSUFFICIENT_PLACEHOLDER: &str =
    "Not enough reliable published information was found to write this section.";

/// Content of a section whose generation failed.
pub const FAILED_PLACEHOLDER: &str =
    "This section could not be written from the sources found. It will be filled in when it can be generated again.";

/// Content of a section that was still pending when the run was cancelled.
pub const CANCELLED_PLACEHOLDER: &str =
    "This section was not written because the run was cancelled.";

/// Label opening the list appended to "What Is Not Known".
pub const UNKNOWN_SECTIONS_LABEL: &str = "**Sections without enough reliable information:**";

/// Label of the evidence gap list appended to "What Is Not Known".
pub const GAPS_LABEL: &str = "**Evidence gaps found while researching this article:**";

// ---------------------------------------------------------------------------
// CancelFlag
// ---------------------------------------------------------------------------

/// Shared cancellation signal. Cloning shares the flag.
#[derive(Debug, Clone)]
pub struct CancelFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Tunables for [`assemble`].
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub disclaimer: String,
    pub max_citations_per_section: u32,
    /// Ranked documents included in a section prompt.
    pub max_prompt_documents: usize,
    /// Characters of each document's text included in the prompt.
    pub document_char_limit: usize,
    pub concurrency: usize,
}

impl AssembleOptions {
    pub const DEFAULT_MAX_PROMPT_DOCUMENTS: usize = 12;
    pub const DEFAULT_DOCUMENT_CHAR_LIMIT: usize = 6_000;

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            disclaimer: config.checks.disclaimer.clone(),
            max_citations_per_section: config.scoring.max_citations_per_section,
            max_prompt_documents: Self::DEFAULT_MAX_PROMPT_DOCUMENTS,
            document_char_limit: Self::DEFAULT_DOCUMENT_CHAR_LIMIT,
            concurrency: config.defaults.concurrency as usize,
        }
    }
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// An assembled, not yet renumbered article.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub article: Article,
    /// Sufficient sections whose generation failed.
    pub failed_sections: Vec<SectionId>,
    /// Sections that became cancellation placeholders.
    pub cancelled_sections: Vec<SectionId>,
}

impl Assembly {
    pub fn cancelled(&self) -> bool {
        !self.cancelled_sections.is_empty()
    }
}

enum SectionOutcome {
    Written(ArticleSection),
    Failed(String),
    Cancelled,
}

// ---------------------------------------------------------------------------
// Prompt building
// ---------------------------------------------------------------------------

/// Documents given to the generator for a section, best first.
pub fn prompt_documents<'a>(documents: &'a [Document], options: &AssembleOptions) -> &'a [Document] {
    &documents[..documents.len().min(options.max_prompt_documents)]
}

/// Build the generation request for one section.
pub fn build_request(
    spec: &SectionSpec,
    disease: &str,
    documents: &[Document],
    options: &AssembleOptions,
) -> GenerationRequest {
    let n = documents.len() as u32;
    let max_citations = options.max_citations_per_section.min(n);

    let mut prompt = String::new();
    let _ = writeln!(prompt, "Disease: {}", disease.trim());
    let _ = writeln!(prompt, "Section: {}", spec.id.title());
    let _ = writeln!(prompt, "\nSection instructions:\n{}", spec.instructions);

    prompt.push_str("\nCover these information needs where the documents allow:\n");
    for req in &spec.requirements {
        let cite = if req.citation_required { " (cite sources)" } else { "" };
        let _ = writeln!(prompt, "- {}{cite}", req.description);
    }

    let _ = writeln!(
        prompt,
        "\nCite at most {max_citations} different documents, using their numbers below."
    );

    prompt.push_str("\nDocuments:\n");
    for (i, doc) in documents.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "\n[{}] {} ({})\n{}\n{}",
            i + 1,
            doc.title,
            doc.quality_tier.as_str(),
            doc.url,
            truncate_content(doc.raw_text.trim(), options.document_char_limit)
        );
    }

    GenerationRequest {
        section: spec.id,
        system_prompt: SYSTEM_PROMPT.to_string(),
        prompt,
        num_documents: n,
        max_citations,
        citation_style: CitationStyle::BracketedNumber,
    }
}

/// Turn generator output into a section: strip markers outside `1..=n`,
/// then map each remaining marker to its prompt document.
fn finalize_section(
    section: SectionId,
    documents: &[Document],
    generated: GeneratedText,
) -> Option<ArticleSection> {
    let n = documents.len() as u32;
    let in_range = |m: u32| m >= 1 && m <= n;

    let stripped: BTreeSet<u32> = parse_markers(&generated.text)
        .into_iter()
        .filter(|m| !in_range(*m))
        .collect();
    let content = strip_markers(&generated.text, |m| !in_range(m))
        .trim()
        .to_string();
    if content.is_empty() {
        return None;
    }

    let markers = parse_markers(&content);
    for reported in &generated.citations_used {
        if !markers.contains(reported) {
            debug!(section = %section.as_str(), marker = reported, "reported marker not in text");
        }
    }
    if !stripped.is_empty() {
        warn!(section = %section.as_str(), markers = ?stripped, "stripped out-of-range citation markers");
    }

    let citations = markers
        .into_iter()
        .map(|m| CitationRef {
            local_marker: m,
            document_key: documents[(m - 1) as usize].identity_key.clone(),
            global_number: None,
        })
        .collect();

    Some(ArticleSection {
        section,
        title: section.title().to_string(),
        content,
        citations,
        is_placeholder: false,
        stripped_markers: stripped.into_iter().collect(),
    })
}

fn placeholder(section: SectionId, content: &str) -> ArticleSection {
    ArticleSection {
        section,
        title: section.title().to_string(),
        content: content.to_string(),
        citations: Vec::new(),
        is_placeholder: true,
        stripped_markers: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Write every section of the article.
///
/// Sufficient sections generate concurrently. Cancellation stops new calls;
/// sections already finished are kept and the rest become cancellation
/// placeholders.
#[instrument(skip_all, fields(disease = %report.disease))]
pub async fn assemble(
    report: &SufficiencyReport,
    snapshot: &RetrievalSnapshot,
    registry: &SectionRegistry,
    generator: Arc<dyn Generator>,
    options: &AssembleOptions,
    cancel: &CancelFlag,
    progress: &dyn ProgressReporter,
) -> Assembly {
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let total = SectionId::ALL.len();

    let mut pending: HashMap<SectionId, JoinHandle<SectionOutcome>> = HashMap::new();
    for spec in registry.sections() {
        if !report.is_sufficient(spec.id) {
            continue;
        }
        let documents = prompt_documents(snapshot.documents(spec.id), options).to_vec();
        let request = build_request(spec, &report.disease, &documents, options);
        let generator = Arc::clone(&generator);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let section = spec.id;

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            if cancel.is_cancelled() {
                return SectionOutcome::Cancelled;
            }
            match generator.generate(&request).await {
                Ok(generated) => match finalize_section(section, &documents, generated) {
                    Some(written) => SectionOutcome::Written(written),
                    None => SectionOutcome::Failed("empty section text".into()),
                },
                Err(e) => SectionOutcome::Failed(e.to_string()),
            }
        });
        pending.insert(section, handle);
    }

    info!(generating = pending.len(), "assembling article");

    let mut sections = Vec::with_capacity(total);
    let mut failed_sections = Vec::new();
    let mut cancelled_sections = Vec::new();

    for (done, section) in SectionId::ALL.into_iter().enumerate() {
        let written = match pending.remove(&section) {
            None => placeholder(section, INSUFFICIENT_PLACEHOLDER),
            Some(handle) => match collect(section, handle, cancel).await {
                SectionOutcome::Written(written) => written,
                SectionOutcome::Failed(reason) => {
                    warn!(section = %section.as_str(), %reason, "section generation failed");
                    failed_sections.push(section);
                    placeholder(section, FAILED_PLACEHOLDER)
                }
                SectionOutcome::Cancelled => {
                    cancelled_sections.push(section);
                    placeholder(section, CANCELLED_PLACEHOLDER)
                }
            },
        };
        progress.section_written(section, written.is_placeholder, done + 1, total);
        sections.push(written);
    }

    let unknown_sections: Vec<SectionId> = sections
        .iter()
        .filter(|s| s.is_placeholder)
        .map(|s| s.section)
        .collect();

    if let Some(what_is_not_known) = sections
        .iter_mut()
        .find(|s| s.section == SectionId::WhatIsNotKnown)
    {
        append_unknowns(&mut what_is_not_known.content, &unknown_sections, &report.gaps);
    }

    info!(
        written = total - unknown_sections.len(),
        placeholders = unknown_sections.len(),
        cancelled = cancelled_sections.len(),
        "article assembled"
    );

    Assembly {
        article: Article {
            disease: report.disease.trim().to_string(),
            disclaimer: options.disclaimer.clone(),
            sections,
            unknown_sections,
        },
        failed_sections,
        cancelled_sections,
    }
}

/// Wait for one section unless cancellation arrives first. A task that has
/// already finished is kept even after cancellation.
async fn collect(
    section: SectionId,
    mut handle: JoinHandle<SectionOutcome>,
    cancel: &CancelFlag,
) -> SectionOutcome {
    let joined = if handle.is_finished() {
        handle.await
    } else {
        tokio::select! {
            biased;
            res = &mut handle => res,
            _ = cancel.cancelled() => {
                handle.abort();
                debug!(section = %section.as_str(), "discarded in-flight section");
                return SectionOutcome::Cancelled;
            }
        }
    };

    joined.unwrap_or_else(|e| SectionOutcome::Failed(format!("generation task failed: {e}")))
}

/// Append the unknown-section and gap lists to the "What Is Not Known" text.
fn append_unknowns(content: &mut String, unknown: &[SectionId], gaps: &[Gap]) {
    let _ = write!(content, "\n\n{UNKNOWN_SECTIONS_LABEL}\n\n");
    if unknown.is_empty() {
        content.push_str("- None\n");
    }
    for section in unknown {
        let _ = writeln!(content, "- {}", section.title());
    }

    let _ = write!(content, "\n{GAPS_LABEL}\n\n");
    if gaps.is_empty() {
        content.push_str("- None\n");
    }
    for gap in gaps {
        let _ = writeln!(content, "- {}: {}", gap.section.title(), gap.description);
    }

    let trimmed = content.trim_end().len();
    content.truncate(trimmed);
}

/// The generated part of a section, without the appended unknown/gap lists.
pub fn section_prose(section: &ArticleSection) -> &str {
    match section.content.find(UNKNOWN_SECTIONS_LABEL) {
        Some(i) => section.content[..i].trim_end(),
        None => &section.content,
    }
}

// ---------------------------------------------------------------------------
// Renumbering
// ---------------------------------------------------------------------------

/// Ordered document-key → global-number index.
#[derive(Debug, Default)]
struct CitationIndex {
    order: Vec<String>,
    numbers: HashMap<String, u32>,
}

impl CitationIndex {
    fn number_for(&mut self, key: &str) -> u32 {
        if let Some(n) = self.numbers.get(key) {
            return *n;
        }
        self.order.push(key.to_string());
        let n = self.order.len() as u32;
        self.numbers.insert(key.to_string(), n);
        n
    }
}

/// Assign global citation numbers and build the bibliography.
///
/// Sections are walked in schema order and markers in text order; the first
/// sighting of a document gets the next number. Each section's text is
/// rewritten in a single pass, so the result is deterministic for identical
/// input and a document keeps one number everywhere.
pub fn renumber_citations(article: &mut Article, snapshot: &RetrievalSnapshot) -> Bibliography {
    let mut index = CitationIndex::default();
    article.sections.sort_by_key(|s| s.section.position());

    for section in &mut article.sections {
        let local_keys: HashMap<u32, &str> = section
            .citations
            .iter()
            .map(|c| (c.local_marker, c.document_key.as_str()))
            .collect();

        let mut local_to_global = HashMap::new();
        for caps in MARKER_RE.captures_iter(&section.content) {
            let Ok(local) = caps[1].parse::<u32>() else {
                continue;
            };
            if let Some(key) = local_keys.get(&local) {
                local_to_global
                    .entry(local)
                    .or_insert_with(|| index.number_for(key));
            }
        }

        let rewritten = MARKER_RE.replace_all(&section.content, |caps: &Captures| {
            caps[1]
                .parse::<u32>()
                .ok()
                .and_then(|local| local_to_global.get(&local))
                .map_or_else(|| caps[0].to_string(), |global| format!("[{global}]"))
        });
        section.content = rewritten.into_owned();

        for citation in &mut section.citations {
            citation.global_number = local_to_global.get(&citation.local_marker).copied();
        }
    }

    let entries = index
        .order
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let doc = snapshot.document(key);
            BibliographyEntry {
                number: i as u32 + 1,
                document_key: key.clone(),
                url: doc.map(|d| d.url.clone()).unwrap_or_default(),
                title: doc.map(|d| d.title.clone()).unwrap_or_default(),
                tier: doc.map_or(QualityTier::Excluded, |d| d.quality_tier),
            }
        })
        .collect();

    Bibliography { entries }
}
