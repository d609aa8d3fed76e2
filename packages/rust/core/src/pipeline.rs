//! End-to-end pipelines: disease name → retrieval → assessment → article.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, instrument, warn};

use rarecite_generation::Generator;
use rarecite_markdown::{REFERENCES_HEADING, article_headings, render_article};
use rarecite_search::SearchBackend;
use rarecite_shared::{
    AppConfig, Article, Bibliography, RareCiteError, Result, SectionId, SufficiencyReport,
};
use rarecite_storage::Storage;

use crate::assembler::{AssembleOptions, CancelFlag, assemble, renumber_citations};
use crate::cache::CachingGenerator;
use crate::checks::{QualityReport, run_checks};
use crate::quality::QualityFilter;
use crate::registry::SectionRegistry;
use crate::retrieval::{RetrievalCoordinator, RetrievalSnapshot};
use crate::sufficiency::assess;

pub const ARTICLE_FILE: &str = "article.md";
pub const REPORT_FILE: &str = "report.json";
pub const QUALITY_FILE: &str = "quality.json";

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Long-lived collaborators shared by every run.
pub struct PipelineContext {
    pub config: AppConfig,
    pub registry: SectionRegistry,
    pub search: Arc<dyn SearchBackend>,
    /// Run history and generation cache; runs are not recorded without it.
    pub storage: Option<Arc<Storage>>,
}

/// Parameters of one `write` run.
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub disease: String,
    /// Root directory; output lands in `<output_root>/<disease-slug>/`.
    pub output_root: PathBuf,
    /// Reuse stored generations for identical prompts.
    pub use_cache: bool,
}

/// Result of retrieval plus assessment.
#[derive(Debug)]
pub struct Assessment {
    pub report: SufficiencyReport,
    pub snapshot: RetrievalSnapshot,
    pub elapsed: Duration,
}

/// A written article and its companions.
#[derive(Debug)]
pub struct ComposedArticle {
    pub article: Article,
    pub bibliography: Bibliography,
    pub quality: QualityReport,
    pub markdown: String,
    pub article_path: PathBuf,
    /// Sufficient sections whose generation failed.
    pub failed_sections: Vec<SectionId>,
}

/// Outcome of a `write` run. The report is always present.
#[derive(Debug)]
pub struct ComposeOutcome {
    pub report: SufficiencyReport,
    pub article: Option<ComposedArticle>,
    pub output_dir: PathBuf,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl ComposeOutcome {
    pub fn can_compose(&self) -> bool {
        self.report.can_compose
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for UIs.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as each section's retrieval is collected, in schema order.
    fn section_retrieved(&self, section: SectionId, documents: usize, current: usize, total: usize);
    /// Called as each section is finalized, in schema order.
    fn section_written(&self, section: SectionId, placeholder: bool, current: usize, total: usize);
    /// Called when a `write` run completes.
    fn done(&self, outcome: &ComposeOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn section_retrieved(&self, _section: SectionId, _documents: usize, _current: usize, _total: usize) {}
    fn section_written(&self, _section: SectionId, _placeholder: bool, _current: usize, _total: usize) {}
    fn done(&self, _outcome: &ComposeOutcome) {}
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

/// Retrieve evidence for every section and assess it.
///
/// The run is recorded in storage when available. History writes are
/// best-effort: a failure is logged and the assessment is still returned.
#[instrument(skip_all, fields(disease = %disease))]
pub async fn assess_disease(
    ctx: &PipelineContext,
    disease: &str,
    progress: &dyn ProgressReporter,
) -> Result<Assessment> {
    let start = Instant::now();
    let disease = validate_disease(disease)?;

    info!(disease, "starting assessment");

    // --- Phase 1: Retrieval ---
    progress.phase("Retrieving evidence");
    let coordinator = RetrievalCoordinator::new(
        Arc::clone(&ctx.search),
        QualityFilter::new(&ctx.config.quality),
        ctx.config.search.excluded_domains.clone(),
        ctx.config.defaults.concurrency as usize,
    );
    let snapshot = coordinator
        .retrieve_all(&ctx.registry, disease, progress)
        .await;

    // --- Phase 2: Assessment ---
    progress.phase("Assessing evidence");
    let report = assess(&snapshot, &ctx.config.scoring);

    if let Some(storage) = &ctx.storage {
        record_run(storage, &report, &snapshot).await;
    }

    info!(
        run_id = %report.run_id,
        can_compose = report.can_compose,
        total_score = report.total_score,
        elapsed_ms = start.elapsed().as_millis(),
        "assessment pipeline complete"
    );

    Ok(Assessment {
        report,
        snapshot,
        elapsed: start.elapsed(),
    })
}

/// Run the full `write` pipeline.
///
/// 1. Retrieve and assess
/// 2. Stop with the report when the evidence cannot support an article
/// 3. Generate sections, renumber citations, run quality checks
/// 4. Render and write `article.md`, `report.json`, `quality.json`
///
/// Cancellation during retrieval returns [`RareCiteError::Cancelled`] and
/// stops the outstanding searches; once the report exists it is always
/// returned in the outcome.
#[instrument(skip_all, fields(disease = %request.disease))]
pub async fn compose_article(
    ctx: &PipelineContext,
    request: &ComposeRequest,
    generator: Arc<dyn Generator>,
    cancel: &CancelFlag,
    progress: &dyn ProgressReporter,
) -> Result<ComposeOutcome> {
    let start = Instant::now();
    let disease = validate_disease(&request.disease)?;
    let output_dir = request.output_root.join(slugify(disease));

    let Assessment {
        report, snapshot, ..
    } = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!("cancelled during retrieval");
            return Err(RareCiteError::Cancelled);
        }
        assessment = assess_disease(ctx, disease, progress) => assessment?,
    };

    std::fs::create_dir_all(&output_dir).map_err(|e| RareCiteError::io(&output_dir, e))?;
    write_json(&output_dir, REPORT_FILE, &report)?;

    if !report.can_compose || cancel.is_cancelled() {
        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!("cancelled before assembly");
        } else {
            info!(
                failed_critical = ?report.failed_critical(),
                sufficient = report.num_sufficient,
                "not enough evidence to compose an article"
            );
        }
        let outcome = ComposeOutcome {
            report,
            article: None,
            output_dir,
            cancelled,
            elapsed: start.elapsed(),
        };
        progress.done(&outcome);
        return Ok(outcome);
    }

    // --- Phase 3: Generation ---
    progress.phase("Writing sections");
    let generator: Arc<dyn Generator> = match (&ctx.storage, request.use_cache) {
        (Some(storage), true) => Arc::new(CachingGenerator::new(generator, Arc::clone(storage))),
        _ => generator,
    };
    let options = AssembleOptions::from_config(&ctx.config);
    let assembly = assemble(
        &report,
        &snapshot,
        &ctx.registry,
        generator,
        &options,
        cancel,
        progress,
    )
    .await;
    let cancelled = assembly.cancelled();
    let mut article = assembly.article;

    // --- Phase 4: Citations and checks ---
    progress.phase("Renumbering citations");
    let bibliography = renumber_citations(&mut article, &snapshot);

    progress.phase("Running quality checks");
    let quality = run_checks(&article, &bibliography, &ctx.registry, &ctx.config);

    // --- Phase 5: Output ---
    progress.phase("Writing article");
    let markdown = render_article(&article, &bibliography);
    for problem in verify_headings(&markdown) {
        warn!(%problem, "rendered article structure");
    }

    let article_path = write_atomic(&output_dir, ARTICLE_FILE, &markdown)?;
    write_json(&output_dir, QUALITY_FILE, &quality)?;

    if let Some(storage) = &ctx.storage {
        if let Err(e) = storage
            .set_article_path(&report.run_id, &article_path.to_string_lossy())
            .await
        {
            warn!(run_id = %report.run_id, error = %e, "failed to record article path");
        }
    }

    let outcome = ComposeOutcome {
        report,
        article: Some(ComposedArticle {
            article,
            bibliography,
            quality,
            markdown,
            article_path,
            failed_sections: assembly.failed_sections,
        }),
        output_dir,
        cancelled,
        elapsed: start.elapsed(),
    };

    progress.done(&outcome);

    info!(
        run_id = %outcome.report.run_id,
        output = %outcome.output_dir.display(),
        cancelled,
        elapsed_ms = outcome.elapsed.as_millis(),
        "write pipeline complete"
    );

    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Store the run and its ranked documents. Failures are logged only.
async fn record_run(
    storage: &Storage,
    report: &SufficiencyReport,
    snapshot: &RetrievalSnapshot,
) {
    if let Err(e) = storage.insert_run(report).await {
        warn!(run_id = %report.run_id, error = %e, "failed to record run");
        return;
    }
    for set in &snapshot.sections {
        if let Err(e) = storage
            .insert_run_documents(&report.run_id, set.section, &set.documents)
            .await
        {
            warn!(
                run_id = %report.run_id,
                section = %set.section.as_str(),
                error = %e,
                "failed to record run documents"
            );
        }
    }
}

fn validate_disease(disease: &str) -> Result<&str> {
    let disease = disease.trim();
    if disease.is_empty() {
        return Err(RareCiteError::validation("disease name must not be empty"));
    }
    Ok(disease)
}

/// Directory name for a disease: lowercase ASCII alphanumerics joined by `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "article".to_string()
    } else {
        slug.to_string()
    }
}

/// Compare rendered headings with the schema: every section title in order,
/// followed by the references heading.
pub fn verify_headings(markdown: &str) -> Vec<String> {
    let headings = article_headings(markdown);
    let mut problems = Vec::new();
    let mut cursor = 0;

    for id in SectionId::ALL {
        match headings[cursor..].iter().position(|h| h == id.title()) {
            Some(offset) => cursor += offset + 1,
            None => problems.push(format!("missing or out-of-order heading \"{}\"", id.title())),
        }
    }
    if headings.last().map(String::as_str) != Some(REFERENCES_HEADING) {
        problems.push(format!("last heading is not \"{REFERENCES_HEADING}\""));
    }
    problems
}

/// Write `content` to `dir/filename` via a temp file and rename.
fn write_atomic(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let target = dir.join(filename);
    let temp = dir.join(format!(".{filename}.tmp"));

    std::fs::write(&temp, content).map_err(|e| RareCiteError::io(&temp, e))?;
    std::fs::rename(&temp, &target).map_err(|e| RareCiteError::io(&target, e))?;
    Ok(target)
}

fn write_json<T: Serialize>(dir: &Path, filename: &str, value: &T) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| RareCiteError::validation(format!("failed to serialize {filename}: {e}")))?;
    write_atomic(dir, filename, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockGenerator, MockSearch, raw_doc};
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("rarecite_test_{}", Uuid::now_v7()))
    }

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("rarecite_test_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
    }

    /// Every query returns the same three good documents.
    fn rich_search() -> MockSearch {
        MockSearch::new().with_default(vec![
            raw_doc("https://rarediseases.org/fabry", 300),
            raw_doc("https://www.orpha.net/fabry", 300),
            raw_doc("https://doi.org/10.1000/fabry", 300),
        ])
    }

    fn context(search: MockSearch, storage: Option<Arc<Storage>>) -> PipelineContext {
        PipelineContext {
            config: AppConfig::default(),
            registry: SectionRegistry::builtin().unwrap(),
            search: Arc::new(search),
            storage,
        }
    }

    fn request(root: &Path) -> ComposeRequest {
        ComposeRequest {
            disease: "Fabry disease".into(),
            output_root: root.to_path_buf(),
            use_cache: true,
        }
    }

    #[tokio::test]
    async fn compose_writes_article_report_and_quality() {
        let root = temp_dir();
        let storage = test_storage().await;
        let ctx = context(rich_search(), Some(storage.clone()));
        let generator = Arc::new(MockGenerator::new());

        let outcome = compose_article(
            &ctx,
            &request(&root),
            generator.clone(),
            &CancelFlag::new(),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert!(outcome.can_compose());
        assert!(!outcome.cancelled);
        assert_eq!(outcome.report.num_sufficient, 13);
        assert_eq!(generator.requests().len(), 13);
        assert_eq!(outcome.output_dir, root.join("fabry-disease"));

        let composed = outcome.article.as_ref().unwrap();
        // Every section cites prompt document 1, the peer-reviewed source.
        assert_eq!(composed.bibliography.len(), 1);
        assert_eq!(composed.bibliography.entries[0].document_key, "doi.org/10.1000/fabry");
        assert!(composed.markdown.starts_with("# Fabry disease\n"));
        assert!(composed.markdown.contains("## References"));
        assert!(verify_headings(&composed.markdown).is_empty());
        assert_eq!(composed.quality.checks.len(), 7);

        let outlook = generator.request_for(SectionId::Outlook).unwrap();
        assert!(outlook.prompt.starts_with("Disease: Fabry disease\n"));

        let on_disk = std::fs::read_to_string(outcome.output_dir.join(ARTICLE_FILE)).unwrap();
        assert_eq!(on_disk, composed.markdown);
        let report_json = std::fs::read_to_string(outcome.output_dir.join(REPORT_FILE)).unwrap();
        let report: SufficiencyReport = serde_json::from_str(&report_json).unwrap();
        assert_eq!(report.run_id, outcome.report.run_id);
        assert!(outcome.output_dir.join(QUALITY_FILE).exists());
        assert!(!outcome.output_dir.join(".article.md.tmp").exists());

        let run = storage
            .get_run(&outcome.report.run_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert!(run.summary.article_path.is_some());
        let docs = storage
            .list_run_documents(&outcome.report.run_id.to_string())
            .await
            .unwrap();
        assert_eq!(docs.len(), 13 * 3);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn thin_evidence_returns_report_without_article() {
        let root = temp_dir();
        let ctx = context(MockSearch::new(), None);
        let generator = Arc::new(MockGenerator::new());

        let outcome = compose_article(
            &ctx,
            &request(&root),
            generator.clone(),
            &CancelFlag::new(),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert!(!outcome.can_compose());
        assert!(outcome.article.is_none());
        assert!(generator.requests().is_empty());
        assert_eq!(outcome.report.failed_critical().len(), 5);
        assert_eq!(outcome.report.missing_info.len(), 13);
        assert!(!outcome.report.gaps.is_empty());
        assert!(outcome.output_dir.join(REPORT_FILE).exists());
        assert!(!outcome.output_dir.join(ARTICLE_FILE).exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn cancelled_before_retrieval_writes_nothing() {
        let root = temp_dir();
        let ctx = context(rich_search(), None);
        let generator = Arc::new(MockGenerator::new());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = compose_article(&ctx, &request(&root), generator.clone(), &cancel, &SilentProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, RareCiteError::Cancelled));
        assert!(generator.requests().is_empty());
        assert!(!root.join("fabry-disease").join(REPORT_FILE).exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn cancel_during_retrieval_stops_the_run() {
        let root = temp_dir();
        let search = MockSearch::new()
            .with_default(vec![raw_doc("https://rarediseases.org/fabry", 300)])
            .delayed(Duration::from_secs(10));
        let ctx = context(search, None);
        let generator = Arc::new(MockGenerator::new());
        let cancel = CancelFlag::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            compose_article(&ctx, &request(&root), generator.clone(), &cancel, &SilentProgress),
        )
        .await
        .expect("cancellation should interrupt retrieval");

        assert!(matches!(result, Err(RareCiteError::Cancelled)));
        assert!(generator.requests().is_empty());
        assert!(!root.join("fabry-disease").join(REPORT_FILE).exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn compose_survives_run_history_failures() {
        let root = temp_dir();
        let db_path = std::env::temp_dir().join(format!("rarecite_test_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&db_path).await.unwrap());

        // Break the history tables behind the storage handle's back.
        let db = libsql::Builder::new_local(&db_path).build().await.unwrap();
        let conn = db.connect().unwrap();
        conn.execute("DROP TABLE run_documents", ()).await.unwrap();
        conn.execute("DROP TABLE runs", ()).await.unwrap();

        let ctx = context(rich_search(), Some(storage));
        let generator = Arc::new(MockGenerator::new());

        let outcome = compose_article(
            &ctx,
            &request(&root),
            generator.clone(),
            &CancelFlag::new(),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert!(outcome.can_compose());
        assert!(outcome.article.is_some());
        assert!(outcome.output_dir.join(REPORT_FILE).exists());
        assert!(outcome.output_dir.join(ARTICLE_FILE).exists());

        let _ = std::fs::remove_dir_all(&root);
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn second_run_reuses_cached_generations() {
        let root = temp_dir();
        let storage = test_storage().await;
        let ctx = context(rich_search(), Some(storage));
        let generator = Arc::new(MockGenerator::new());

        for _ in 0..2 {
            compose_article(
                &ctx,
                &request(&root),
                generator.clone(),
                &CancelFlag::new(),
                &SilentProgress,
            )
            .await
            .unwrap();
        }
        assert_eq!(generator.requests().len(), 13);

        let mut no_cache = request(&root);
        no_cache.use_cache = false;
        compose_article(&ctx, &no_cache, generator.clone(), &CancelFlag::new(), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(generator.requests().len(), 26);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn assess_records_run_without_article() {
        let storage = test_storage().await;
        let ctx = context(rich_search(), Some(storage.clone()));

        let assessment = assess_disease(&ctx, "  Fabry disease ", &SilentProgress)
            .await
            .unwrap();
        assert_eq!(assessment.report.disease, "Fabry disease");
        assert!(assessment.report.can_compose);
        assert_eq!(assessment.snapshot.sections.len(), 13);

        let runs = storage.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].article_path.is_none());
    }

    #[tokio::test]
    async fn empty_disease_is_rejected() {
        let ctx = context(MockSearch::new(), None);
        let err = assess_disease(&ctx, "   ", &SilentProgress).await.unwrap_err();
        assert!(matches!(err, RareCiteError::Validation { .. }));
    }

    #[test]
    fn slugify_disease_names() {
        assert_eq!(slugify("Fabry disease"), "fabry-disease");
        assert_eq!(slugify("  Ehlers–Danlos syndrome (vEDS) "), "ehlers-danlos-syndrome-veds");
        assert_eq!(slugify("22q11.2 deletion"), "22q11-2-deletion");
        assert_eq!(slugify("!!!"), "article");
    }

    #[test]
    fn verify_headings_detects_missing_and_misplaced() {
        let mut md = String::from("# X\n\n");
        for id in SectionId::ALL {
            md.push_str(&format!("## {}\n\ntext\n\n", id.title()));
        }
        md.push_str("## References\n\n1. a\n");
        assert!(verify_headings(&md).is_empty());

        let broken = md.replace("## Outlook\n", "");
        assert_eq!(
            verify_headings(&broken),
            vec!["missing or out-of-order heading \"Outlook\"".to_string()]
        );

        let no_refs = md.replace("## References", "## Sources");
        assert_eq!(verify_headings(&no_refs).len(), 1);
    }
}
