//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use rarecite_core::pipeline::{
    ComposeOutcome, ComposeRequest, PipelineContext, ProgressReporter, assess_disease,
    compose_article,
};
use rarecite_core::{CancelFlag, SectionRegistry, evaluate_article};
use rarecite_generation::OpenRouterGenerator;
use rarecite_search::WebSearchBackend;
use rarecite_shared::{
    AppConfig, RareCiteError, SectionId, SufficiencyReport, database_path, expand_home,
    init_config, load_config,
};
use rarecite_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// RareCite: cited, evidence-gated articles about rare diseases.
#[derive(Parser)]
#[command(
    name = "rarecite",
    version,
    about = "Write patient-facing rare-disease articles only when the evidence supports them.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Retrieve evidence and print the sufficiency report without writing.
    Assess {
        /// Disease name, e.g. "Fabry disease".
        disease: String,
    },

    /// Retrieve, assess, and write the article when the evidence suffices.
    Write {
        /// Disease name, e.g. "Fabry disease".
        disease: String,

        /// Output root (defaults to `defaults.output_dir`).
        #[arg(short, long)]
        out: Option<String>,

        /// Regenerate every section instead of reusing cached prose.
        #[arg(long)]
        no_cache: bool,

        /// OpenRouter model ID (defaults to `openrouter.default_model`).
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Score a rendered article against a reference article.
    Eval {
        /// Generated article (Markdown).
        article: PathBuf,

        /// Reference article (Markdown).
        #[arg(short, long)]
        reference: PathBuf,
    },

    /// Inspect or validate the section schema.
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// List recent runs.
    Runs {
        /// Maximum number of runs to show.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Reprint the report of a stored run.
    Report {
        /// Run ID as printed by `rarecite runs`.
        run_id: String,
    },

    /// Generation cache management.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Schema subcommands.
#[derive(Subcommand)]
pub(crate) enum SchemaAction {
    /// Print sections, requirements, and query templates.
    Show {
        /// Schema file (defaults to `schema.path` or the built-in schema).
        #[arg(long)]
        file: Option<String>,
    },
    /// Validate a schema file.
    Validate {
        /// Schema file (defaults to `schema.path` or the built-in schema).
        #[arg(long)]
        file: Option<String>,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Delete every cached generation.
    Clear,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "rarecite=info",
        1 => "rarecite=debug",
        _ => "rarecite=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let json = cli.json;
    match cli.command {
        Command::Assess { disease } => cmd_assess(&disease, json).await,
        Command::Write {
            disease,
            out,
            no_cache,
            model,
        } => cmd_write(&disease, out.as_deref(), no_cache, model.as_deref(), json).await,
        Command::Eval { article, reference } => cmd_eval(&article, &reference, json),
        Command::Schema { action } => match action {
            SchemaAction::Show { file } => cmd_schema_show(file.as_deref(), json),
            SchemaAction::Validate { file } => cmd_schema_validate(file.as_deref()),
        },
        Command::Runs { limit } => cmd_runs(limit, json).await,
        Command::Report { run_id } => cmd_report(&run_id, json).await,
        Command::Cache { action } => match action {
            CacheAction::Clear => cmd_cache_clear().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Pipeline commands
// ---------------------------------------------------------------------------

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = database_path(config)?;
    Ok(Arc::new(Storage::open(&path).await?))
}

async fn build_context(config: AppConfig) -> Result<PipelineContext> {
    let registry = SectionRegistry::load(&config.schema)?;
    let search = Arc::new(WebSearchBackend::new(&config.search)?);
    let storage = open_storage(&config).await?;

    Ok(PipelineContext {
        config,
        registry,
        search,
        storage: Some(storage),
    })
}

async fn cmd_assess(disease: &str, json: bool) -> Result<()> {
    let config = load_config()?;
    let ctx = build_context(config).await?;

    info!(disease, "assessing evidence");

    let reporter = CliProgress::new();
    let assessment = assess_disease(&ctx, disease, &reporter).await;
    reporter.finish();
    let assessment = assessment?;

    print_report(&assessment.report, json)?;
    if !json {
        println!("  Time:  {:.1}s", assessment.elapsed.as_secs_f64());
        println!();
    }
    Ok(())
}

async fn cmd_write(
    disease: &str,
    out: Option<&str>,
    no_cache: bool,
    model: Option<&str>,
    json: bool,
) -> Result<()> {
    // Validate both API keys before doing anything
    let config = load_config()?;
    let mut generator = OpenRouterGenerator::new(&config.openrouter)?;
    if let Some(model) = model {
        generator = generator.with_model(model);
    }
    let generator = Arc::new(generator);

    let output_root = match out {
        Some(p) => PathBuf::from(p),
        None => expand_home(&config.defaults.output_dir)?,
    };
    let ctx = build_context(config).await?;

    let request = ComposeRequest {
        disease: disease.to_string(),
        output_root,
        use_cache: !no_cache,
    };

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping");
                cancel.cancel();
            }
        });
    }

    info!(disease, no_cache, "writing article");

    let reporter = CliProgress::new();
    let outcome = compose_article(&ctx, &request, generator, &cancel, &reporter).await;
    reporter.finish();
    let outcome = outcome?;

    if json {
        print_outcome_json(&outcome)?;
    } else {
        print_report(&outcome.report, false)?;
        print_outcome(&outcome);
    }

    if outcome.cancelled {
        return Err(RareCiteError::Cancelled.into());
    }
    if !outcome.can_compose() {
        return Err(eyre!(
            "not enough reliable evidence to write about {}; see {}",
            outcome.report.disease,
            outcome.output_dir.display()
        ));
    }
    Ok(())
}

fn print_outcome(outcome: &ComposeOutcome) {
    let Some(composed) = &outcome.article else {
        println!("  No article written.");
        println!("  Report: {}", outcome.output_dir.display());
        println!();
        return;
    };

    println!("  Article written{}.", if outcome.cancelled { " (partial)" } else { "" });
    println!("  Path:       {}", composed.article_path.display());
    println!("  References: {}", composed.bibliography.len());
    if !composed.failed_sections.is_empty() {
        let failed: Vec<&str> = composed.failed_sections.iter().map(|s| s.title()).collect();
        println!("  Failed:     {}", failed.join(", "));
    }
    if composed.quality.passed() {
        println!("  Checks:     all passed");
    } else {
        println!(
            "  Checks:     {} failed ({} findings)",
            composed.quality.failed_checks().join(", "),
            composed.quality.findings_count()
        );
    }
    println!("  Time:       {:.1}s", outcome.elapsed.as_secs_f64());
    println!();
}

fn print_outcome_json(outcome: &ComposeOutcome) -> Result<()> {
    let article = outcome.article.as_ref().map(|a| {
        serde_json::json!({
            "path": a.article_path,
            "references": a.bibliography.entries,
            "failed_sections": a.failed_sections,
            "quality": a.quality,
        })
    });
    let value = serde_json::json!({
        "report": outcome.report,
        "article": article,
        "output_dir": outcome.output_dir,
        "cancelled": outcome.cancelled,
        "elapsed_ms": outcome.elapsed.as_millis() as u64,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_eval(article: &Path, reference: &Path, json: bool) -> Result<()> {
    let generated = std::fs::read_to_string(article)
        .map_err(|e| RareCiteError::io(article, e))?;
    let reference_md = std::fs::read_to_string(reference)
        .map_err(|e| RareCiteError::io(reference, e))?;

    let eval = evaluate_article(&generated, &reference_md);
    if json {
        println!("{}", serde_json::to_string_pretty(&eval)?);
        return Ok(());
    }

    println!();
    println!("  {}  vs  {}", article.display(), reference.display());
    println!();
    println!("    {:<10} {:>9} {:>9} {:>9}", "Metric", "Precision", "Recall", "F1");
    for (name, score) in [
        ("ROUGE-1", eval.rouge_1),
        ("ROUGE-2", eval.rouge_2),
        ("ROUGE-L", eval.rouge_l),
    ] {
        println!(
            "    {name:<10} {:>9.3} {:>9.3} {:>9.3}",
            score.precision, score.recall, score.f1
        );
    }
    println!();
    println!(
        "  Headings:   {}/{} exact, soft recall {:.3} ({} generated)",
        eval.headings.exact_matches,
        eval.headings.reference,
        eval.headings.soft_recall,
        eval.headings.generated
    );
    let c = &eval.citations;
    println!(
        "  Citations:  {} markers, {} distinct, {} references",
        c.markers, c.unique_markers, c.references
    );
    println!(
        "              {:.0}% resolved, {}/{} sentences cited",
        c.precision() * 100.0,
        c.cited_sentences,
        c.sentences
    );
    if !c.unresolved.is_empty() {
        println!("  Unresolved: {:?}", c.unresolved);
    }
    if !c.uncited.is_empty() {
        println!("  Uncited:    {:?}", c.uncited);
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Report rendering
// ---------------------------------------------------------------------------

fn print_report(report: &SufficiencyReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!();
    println!("  {}  (run {})", report.disease, report.run_id);
    println!();
    println!(
        "    {:<32} {:>6} {:>7} {:>7} {:>9}",
        "Section", "Score", "Sources", "Words", "Citations"
    );
    for s in &report.sections {
        let mark = if s.sufficient { "✓" } else { "✗" };
        let critical = if s.is_critical { "*" } else { " " };
        println!(
            "  {mark} {:<31}{critical} {:>6.2} {:>7} {:>7} {:>9}",
            s.section.title(),
            s.score,
            s.num_sources,
            s.word_count,
            s.num_citations
        );
    }
    println!("    (* critical)");
    println!();
    println!(
        "  Sufficient:  {}/{}   Total score: {:.2}",
        report.num_sufficient,
        SectionId::ALL.len(),
        report.total_score
    );
    println!(
        "  Can compose: {}",
        if report.can_compose { "yes" } else { "no" }
    );

    let failed = report.failed_critical();
    if !failed.is_empty() {
        let titles: Vec<&str> = failed.iter().map(|s| s.title()).collect();
        println!("  Failed critical sections: {}", titles.join(", "));
    }

    if !report.missing_info.is_empty() {
        println!();
        println!("  Missing information:");
        for m in &report.missing_info {
            let reasons: Vec<&str> = m.reasons.iter().map(|r| r.as_str()).collect();
            println!("    - {}: {}", m.section.title(), reasons.join(", "));
        }
    }
    if !report.gaps.is_empty() {
        println!();
        println!("  Evidence gaps:");
        for g in &report.gaps {
            println!("    - {}: {}", g.section.title(), g.description);
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Schema, history, and config commands
// ---------------------------------------------------------------------------

fn load_registry(file: Option<&str>, config: &AppConfig) -> Result<SectionRegistry> {
    Ok(match file {
        Some(path) => SectionRegistry::from_path(Path::new(path))?,
        None => SectionRegistry::load(&config.schema)?,
    })
}

fn cmd_schema_show(file: Option<&str>, json: bool) -> Result<()> {
    let config = load_config()?;
    let registry = load_registry(file, &config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(registry.sections())?);
        return Ok(());
    }

    println!("Schema version {}", registry.version());
    for spec in registry.sections() {
        let critical = if spec.id.is_critical() { " (critical)" } else { "" };
        println!();
        println!("## {}{critical}", spec.id.title());
        for req in &spec.requirements {
            let cited = if req.citation_required { "" } else { ", citations optional" };
            println!("  - {} [min {}{cited}]", req.description, req.min_sources);
            for q in &req.query_templates {
                println!("      {q}");
            }
        }
    }
    Ok(())
}

fn cmd_schema_validate(file: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let registry = load_registry(file, &config)?;
    println!(
        "Schema OK: version {}, {} sections, {} requirements",
        registry.version(),
        registry.sections().len(),
        registry.requirement_count()
    );
    Ok(())
}

async fn cmd_runs(limit: usize, json: bool) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let runs = storage.list_runs(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("No runs yet. Try `rarecite assess <disease>`.");
        return Ok(());
    }

    for run in &runs {
        let status = match (&run.article_path, run.can_compose) {
            (Some(_), _) => "written",
            (None, true) => "composable",
            (None, false) => "insufficient",
        };
        println!(
            "{}  {}  {:<12} {:>5.2}  {:>2}/13  {}",
            run.id,
            run.created_at.format("%Y-%m-%d %H:%M"),
            status,
            run.total_score,
            run.num_sufficient,
            run.disease
        );
    }
    Ok(())
}

async fn cmd_report(run_id: &str, json: bool) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let record = storage
        .get_run(run_id)
        .await?
        .ok_or_else(|| eyre!("no run with id '{run_id}'"))?;

    print_report(&record.report, json)?;
    if !json {
        if let Some(path) = &record.summary.article_path {
            println!("  Article: {path}");
            println!();
        }
    }
    Ok(())
}

async fn cmd_cache_clear() -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let removed = storage.clear_generation_cache().await?;
    println!("Removed {removed} cached generations.");
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn section_retrieved(&self, section: SectionId, documents: usize, current: usize, total: usize) {
        self.spinner.set_message(format!(
            "Retrieved [{current}/{total}] {} ({documents} sources)",
            section.title()
        ));
    }

    fn section_written(&self, section: SectionId, placeholder: bool, current: usize, total: usize) {
        let note = if placeholder { " (placeholder)" } else { "" };
        self.spinner.set_message(format!(
            "Written [{current}/{total}] {}{note}",
            section.title()
        ));
    }

    fn done(&self, _outcome: &ComposeOutcome) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn write_accepts_model_override() {
        let cli = Cli::try_parse_from([
            "rarecite",
            "write",
            "Fabry disease",
            "--model",
            "meta/llama-test",
            "--no-cache",
        ])
        .unwrap();
        let Command::Write { disease, model, no_cache, .. } = cli.command else {
            panic!("expected write");
        };
        assert_eq!(disease, "Fabry disease");
        assert_eq!(model.as_deref(), Some("meta/llama-test"));
        assert!(no_cache);
    }

    #[test]
    fn eval_requires_reference() {
        assert!(Cli::try_parse_from(["rarecite", "eval", "article.md"]).is_err());

        let cli =
            Cli::try_parse_from(["rarecite", "--json", "eval", "article.md", "-r", "ref.md"])
                .unwrap();
        assert!(cli.json);
        let Command::Eval { article, reference } = cli.command else {
            panic!("expected eval");
        };
        assert_eq!(article, PathBuf::from("article.md"));
        assert_eq!(reference, PathBuf::from("ref.md"));
    }

    #[test]
    fn eval_command_reads_both_files() {
        let dir = std::env::temp_dir().join(format!("rarecite_eval_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let article = dir.join("article.md");
        let reference = dir.join("reference.md");
        std::fs::write(
            &article,
            "# X\n\n## Overview\n\nRare [1].\n\n## References\n\n1. A.\n",
        )
        .unwrap();
        std::fs::write(&reference, "# X\n\n## Overview\n\nRare.\n").unwrap();

        cmd_eval(&article, &reference, true).unwrap();
        assert!(cmd_eval(&dir.join("missing.md"), &reference, true).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
