//! Application configuration for rarecite.
//!
//! User config lives at `~/.rarecite/rarecite.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RareCiteError, Result};
use crate::types::SectionId;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "rarecite.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".rarecite";

/// Default database file name inside the config directory.
const DATABASE_FILE_NAME: &str = "rarecite.db";

// ---------------------------------------------------------------------------
// Config structs (matching rarecite.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Web search backend.
    #[serde(default)]
    pub search: SearchConfig,

    /// OpenRouter generation backend.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Sufficiency thresholds and weights.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Source tier classification.
    #[serde(default)]
    pub quality: QualityConfig,

    /// Post-hoc article checks.
    #[serde(default)]
    pub checks: ChecksConfig,

    /// Section schema location.
    #[serde(default)]
    pub schema: SchemaConfig,
}

impl AppConfig {
    /// Validate every section that has cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.defaults.concurrency == 0 {
            return Err(RareCiteError::config("defaults.concurrency must be at least 1"));
        }
        self.scoring.validate()?;
        self.quality.validate()
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory articles are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Sections retrieved or generated at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Run history database. Defaults to `~/.rarecite/rarecite.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            concurrency: default_concurrency(),
            database: None,
        }
    }
}

fn default_output_dir() -> String {
    "~/rarecite-articles".into()
}
fn default_concurrency() -> u32 {
    4
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Web search API endpoint (Brave Search compatible).
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the search API key.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Results requested per query.
    #[serde(default = "default_results_per_query")]
    pub results_per_query: u32,

    /// Fetch each result page and extract its text (otherwise use snippets).
    #[serde(default = "default_true")]
    pub fetch_pages: bool,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Domains excluded at query time (general-purpose encyclopedias).
    #[serde(default = "default_excluded_domains")]
    pub excluded_domains: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_search_key_env(),
            results_per_query: default_results_per_query(),
            fetch_pages: true,
            timeout_secs: default_timeout_secs(),
            excluded_domains: default_excluded_domains(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://api.search.brave.com/res/v1/web/search".into()
}
fn default_search_key_env() -> String {
    "BRAVE_SEARCH_API_KEY".into()
}
fn default_results_per_query() -> u32 {
    5
}
fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_excluded_domains() -> Vec<String> {
    to_strings(&[
        "wikipedia.org",
        "wikimedia.org",
        "wikidoc.org",
        "britannica.com",
        "encyclopedia.com",
    ])
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for section generation.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Chat completions endpoint.
    #[serde(default = "default_openrouter_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            endpoint: default_openrouter_endpoint(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_openrouter_endpoint() -> String {
    "https://openrouter.ai/api/v1/chat/completions".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1800
}

/// `[scoring]` section: every sufficiency constant in one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Accepted documents needed for the sources gate.
    #[serde(default = "default_min_sources")]
    pub min_sources: usize,
    /// Total words needed for the words gate.
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    /// Total source citations needed for the citations gate.
    #[serde(default = "default_min_citations")]
    pub min_citations: u32,

    #[serde(default = "default_source_weight")]
    pub source_weight: f64,
    #[serde(default = "default_word_weight")]
    pub word_weight: f64,
    #[serde(default = "default_citation_weight")]
    pub citation_weight: f64,
    #[serde(default = "default_critical_weight")]
    pub critical_weight: f64,

    /// Minimum score for a section to be sufficient.
    #[serde(default = "default_section_threshold")]
    pub section_threshold: f64,
    /// Minimum number of sufficient sections to compose.
    #[serde(default = "default_min_sufficient_sections")]
    pub min_sufficient_sections: usize,
    /// Minimum sum of section scores to compose.
    #[serde(default = "default_min_total_score")]
    pub min_total_score: f64,

    /// Upper bound on distinct references per generated section.
    #[serde(default = "default_max_citations")]
    pub max_citations_per_section: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_sources: default_min_sources(),
            min_words: default_min_words(),
            min_citations: default_min_citations(),
            source_weight: default_source_weight(),
            word_weight: default_word_weight(),
            citation_weight: default_citation_weight(),
            critical_weight: default_critical_weight(),
            section_threshold: default_section_threshold(),
            min_sufficient_sections: default_min_sufficient_sections(),
            min_total_score: default_min_total_score(),
            max_citations_per_section: default_max_citations(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("source_weight", self.source_weight),
            ("word_weight", self.word_weight),
            ("citation_weight", self.citation_weight),
            ("critical_weight", self.critical_weight),
        ];
        for (name, w) in weights {
            if !(0.0..=1.0).contains(&w) {
                return Err(RareCiteError::config(format!(
                    "scoring.{name} must be within [0, 1], got {w}"
                )));
            }
        }
        if !(self.section_threshold > 0.0 && self.section_threshold <= 1.0) {
            return Err(RareCiteError::config(format!(
                "scoring.section_threshold must be within (0, 1], got {}",
                self.section_threshold
            )));
        }
        if self.min_sufficient_sections > SectionId::ALL.len() {
            return Err(RareCiteError::config(format!(
                "scoring.min_sufficient_sections cannot exceed {}",
                SectionId::ALL.len()
            )));
        }
        if self.max_citations_per_section == 0 {
            return Err(RareCiteError::config(
                "scoring.max_citations_per_section must be at least 1",
            ));
        }
        Ok(())
    }
}

fn default_min_sources() -> usize {
    3
}
fn default_min_words() -> usize {
    500
}
fn default_min_citations() -> u32 {
    2
}
fn default_source_weight() -> f64 {
    0.3
}
fn default_word_weight() -> f64 {
    0.3
}
fn default_citation_weight() -> f64 {
    0.2
}
fn default_critical_weight() -> f64 {
    0.2
}
fn default_section_threshold() -> f64 {
    0.7
}
fn default_min_sufficient_sections() -> usize {
    10
}
fn default_min_total_score() -> f64 {
    8.0
}
fn default_max_citations() -> u32 {
    8
}

/// `[quality]` section: domain rules behind the 0–5 tier scale.
///
/// Rules are host suffixes, optionally followed by a path prefix
/// (`ncbi.nlm.nih.gov/books`). The longest matching rule wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Lowest ordinal accepted into a section's document set.
    #[serde(default = "default_min_accept_tier")]
    pub min_accept_tier: u8,

    /// Ordinal 5.
    #[serde(default = "default_peer_reviewed_domains")]
    pub peer_reviewed_domains: Vec<String>,

    /// Ordinal 4.
    #[serde(default = "default_agency_domains")]
    pub agency_domains: Vec<String>,

    /// Ordinal 3.
    #[serde(default = "default_society_domains")]
    pub society_domains: Vec<String>,

    /// Ordinal 1.
    #[serde(default = "default_encyclopedic_domains")]
    pub encyclopedic_domains: Vec<String>,

    /// Ordinal 0.
    #[serde(default = "default_social_domains")]
    pub social_domains: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_accept_tier: default_min_accept_tier(),
            peer_reviewed_domains: default_peer_reviewed_domains(),
            agency_domains: default_agency_domains(),
            society_domains: default_society_domains(),
            encyclopedic_domains: default_encyclopedic_domains(),
            social_domains: default_social_domains(),
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<()> {
        // Tiers below 3 are unclassified, encyclopedic or social sources.
        if !(3..=5).contains(&self.min_accept_tier) {
            return Err(RareCiteError::config(format!(
                "quality.min_accept_tier must be within 3..=5, got {}",
                self.min_accept_tier
            )));
        }
        Ok(())
    }
}

fn default_min_accept_tier() -> u8 {
    3
}
fn default_peer_reviewed_domains() -> Vec<String> {
    to_strings(&[
        "pubmed.ncbi.nlm.nih.gov",
        "ncbi.nlm.nih.gov/pmc",
        "doi.org",
        "nejm.org",
        "thelancet.com",
        "nature.com",
        "jamanetwork.com",
        "bmj.com",
        "cochranelibrary.com",
        "academic.oup.com",
        "onlinelibrary.wiley.com",
        "sciencedirect.com",
        "link.springer.com",
        "frontiersin.org",
        "ojrd.biomedcentral.com",
        "biomedcentral.com",
        "nice.org.uk",
    ])
}
fn default_agency_domains() -> Vec<String> {
    to_strings(&[
        "nih.gov",
        "ncbi.nlm.nih.gov/books",
        "rarediseases.info.nih.gov",
        "medlineplus.gov",
        "cdc.gov",
        "fda.gov",
        "who.int",
        "ema.europa.eu",
        "orpha.net",
        "omim.org",
        "clinicaltrials.gov",
        "genome.gov",
        "nhs.uk",
    ])
}
fn default_society_domains() -> Vec<String> {
    to_strings(&[
        "rarediseases.org",
        "msdmanuals.com",
        "merckmanuals.com",
        "mayoclinic.org",
        "clevelandclinic.org",
        "mda.org",
        "parentprojectmd.org",
        "dermnetnz.org",
        "eurordis.org",
        "globalgenes.org",
    ])
}
fn default_encyclopedic_domains() -> Vec<String> {
    to_strings(&[
        "wikipedia.org",
        "wikimedia.org",
        "wikidoc.org",
        "britannica.com",
        "encyclopedia.com",
        "healthline.com",
        "webmd.com",
        "verywellhealth.com",
    ])
}
fn default_social_domains() -> Vec<String> {
    to_strings(&[
        "reddit.com",
        "quora.com",
        "facebook.com",
        "twitter.com",
        "x.com",
        "youtube.com",
        "tiktok.com",
        "instagram.com",
        "medium.com",
        "patient.info/forums",
    ])
}

/// `[checks]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksConfig {
    /// Safety note placed at the top of every article.
    #[serde(default = "default_disclaimer")]
    pub disclaimer: String,

    /// Acronyms that need no first-use definition.
    #[serde(default = "default_common_abbreviations")]
    pub common_abbreviations: Vec<String>,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            disclaimer: default_disclaimer(),
            common_abbreviations: default_common_abbreviations(),
        }
    }
}

fn default_disclaimer() -> String {
    "This article is for general information only and is not medical advice. \
     It was assembled automatically from published sources and may be incomplete. \
     Talk to a qualified healthcare professional about diagnosis and treatment."
        .into()
}
fn default_common_abbreviations() -> Vec<String> {
    to_strings(&[
        "DNA", "RNA", "US", "USA", "UK", "EU", "MRI", "CT", "ECG", "EKG", "HIV", "ICU", "IQ",
    ])
}

/// `[schema]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Path to a section schema TOML. The built-in schema is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.rarecite/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RareCiteError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.rarecite/rarecite.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the run history database path.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    match &config.defaults.database {
        Some(path) => expand_home(path),
        None => Ok(config_dir()?.join(DATABASE_FILE_NAME)),
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| RareCiteError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RareCiteError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        RareCiteError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RareCiteError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RareCiteError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RareCiteError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read an API key from the named env var, failing if it is unset or empty.
pub fn read_api_key(var_name: &str, service: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(RareCiteError::config(format!(
            "{service} API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("section_threshold"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.scoring, ScoringConfig::default());
        assert_eq!(parsed.openrouter.api_key_env, "OPENROUTER_API_KEY");
        assert_eq!(parsed.quality.min_accept_tier, 3);
    }

    #[test]
    fn scoring_defaults_match_published_thresholds() {
        let scoring = ScoringConfig::default();
        assert_eq!(scoring.min_sources, 3);
        assert_eq!(scoring.min_words, 500);
        assert_eq!(scoring.min_citations, 2);
        assert_eq!(scoring.section_threshold, 0.7);
        assert_eq!(scoring.min_sufficient_sections, 10);
        assert_eq!(scoring.min_total_score, 8.0);
    }

    #[test]
    fn partial_scoring_section_keeps_other_defaults() {
        let toml_str = r#"
[scoring]
section_threshold = 0.8
min_sufficient_sections = 11
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.scoring.section_threshold, 0.8);
        assert_eq!(config.scoring.min_sufficient_sections, 11);
        assert_eq!(config.scoring.min_words, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_scoring_rejected() {
        let mut config = AppConfig::default();
        config.scoring.min_sufficient_sections = 14;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scoring.section_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.quality.min_accept_tier = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn accept_floor_below_textbook_tier_rejected() {
        for tier in [0, 1, 2] {
            let mut config = AppConfig::default();
            config.quality.min_accept_tier = tier;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("min_accept_tier"), "tier {tier}");
        }

        let mut config = AppConfig::default();
        config.quality.min_accept_tier = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_config_from_file_validates() {
        let path = std::env::temp_dir().join(format!("rarecite-config-{}.toml", uuid::Uuid::now_v7()));
        std::fs::write(&path, "[defaults]\nconcurrency = 0\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("concurrency"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/tmp/x.db").unwrap(), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn api_key_validation() {
        // Use a unique env var name to avoid interfering with other tests
        let result = read_api_key("RARECITE_TEST_NONEXISTENT_KEY_12345", "OpenRouter");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
