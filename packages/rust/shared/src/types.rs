//! Core domain types: article schema, evidence documents, requirements.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

/// Current version of the section schema format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one article-generation attempt (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// SectionId
// ---------------------------------------------------------------------------

/// One of the 13 fixed sections of an article, declared in output order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SectionId {
    QuickFacts,
    Overview,
    WhatHappensInTheBody,
    CausesAndInheritance,
    WhoIsAffected,
    SignsAndSymptoms,
    HowItIsDiagnosed,
    TreatmentAndManagement,
    Outlook,
    LivingWithTheCondition,
    ResearchAndClinicalTrials,
    WhatIsNotKnown,
    SupportAndResources,
}

impl SectionId {
    /// Every section, in schema order.
    pub const ALL: [SectionId; 13] = [
        Self::QuickFacts,
        Self::Overview,
        Self::WhatHappensInTheBody,
        Self::CausesAndInheritance,
        Self::WhoIsAffected,
        Self::SignsAndSymptoms,
        Self::HowItIsDiagnosed,
        Self::TreatmentAndManagement,
        Self::Outlook,
        Self::LivingWithTheCondition,
        Self::ResearchAndClinicalTrials,
        Self::WhatIsNotKnown,
        Self::SupportAndResources,
    ];

    /// Heading shown in the rendered article.
    pub fn title(&self) -> &'static str {
        match self {
            Self::QuickFacts => "Quick Facts",
            Self::Overview => "Overview",
            Self::WhatHappensInTheBody => "What Happens in the Body",
            Self::CausesAndInheritance => "Causes and Inheritance",
            Self::WhoIsAffected => "Who Is Affected",
            Self::SignsAndSymptoms => "Signs and Symptoms",
            Self::HowItIsDiagnosed => "How It Is Diagnosed",
            Self::TreatmentAndManagement => "Treatment and Management",
            Self::Outlook => "Outlook",
            Self::LivingWithTheCondition => "Living With the Condition",
            Self::ResearchAndClinicalTrials => "Research and Clinical Trials",
            Self::WhatIsNotKnown => "What Is Not Known",
            Self::SupportAndResources => "Support and Resources",
        }
    }

    /// Stable snake_case key (matches the serde and schema file representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuickFacts => "quick_facts",
            Self::Overview => "overview",
            Self::WhatHappensInTheBody => "what_happens_in_the_body",
            Self::CausesAndInheritance => "causes_and_inheritance",
            Self::WhoIsAffected => "who_is_affected",
            Self::SignsAndSymptoms => "signs_and_symptoms",
            Self::HowItIsDiagnosed => "how_it_is_diagnosed",
            Self::TreatmentAndManagement => "treatment_and_management",
            Self::Outlook => "outlook",
            Self::LivingWithTheCondition => "living_with_the_condition",
            Self::ResearchAndClinicalTrials => "research_and_clinical_trials",
            Self::WhatIsNotKnown => "what_is_not_known",
            Self::SupportAndResources => "support_and_resources",
        }
    }

    /// Critical sections veto composition when insufficient.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::QuickFacts
                | Self::WhatHappensInTheBody
                | Self::SignsAndSymptoms
                | Self::HowItIsDiagnosed
                | Self::TreatmentAndManagement
        )
    }

    /// Zero-based position in the schema.
    pub fn position(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for SectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

impl std::str::FromStr for SectionId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown section id: {s}"))
    }
}

// ---------------------------------------------------------------------------
// QualityTier
// ---------------------------------------------------------------------------

/// Evidentiary trust tier of a source. Ordered from least to most trusted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    /// Ordinal 0–2: social media, forums, encyclopedias, unclassified sites.
    Excluded,
    /// Ordinal 3: textbooks, clinical references, patient and professional societies.
    TextbookOrSociety,
    /// Ordinal 4: government agencies and curated databases.
    AgencyOrDatabase,
    /// Ordinal 5: peer-reviewed literature and clinical guidelines.
    PeerReviewedOrGuideline,
}

impl QualityTier {
    /// Map a 0–5 ordinal score to a tier.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=2 => Self::Excluded,
            3 => Self::TextbookOrSociety,
            4 => Self::AgencyOrDatabase,
            _ => Self::PeerReviewedOrGuideline,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excluded => "excluded",
            Self::TextbookOrSociety => "textbook_or_society",
            Self::AgencyOrDatabase => "agency_or_database",
            Self::PeerReviewedOrGuideline => "peer_reviewed_or_guideline",
        }
    }
}

impl std::str::FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "excluded" => Ok(Self::Excluded),
            "textbook_or_society" => Ok(Self::TextbookOrSociety),
            "agency_or_database" => Ok(Self::AgencyOrDatabase),
            "peer_reviewed_or_guideline" => Ok(Self::PeerReviewedOrGuideline),
            other => Err(format!("unknown quality tier: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A search result as returned by the search collaborator, before filtering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDocument {
    /// Backend-specific identifier, if the backend provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Origin URL (may be empty for non-web sources).
    pub url: String,
    /// Result title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Extracted document text (page body, or the result snippet).
    pub text: String,
    /// Number of references the source itself cites, when the backend knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u32>,
}

/// A quality-tagged piece of evidence. Immutable once filtered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub source_id: String,
    pub url: String,
    pub title: String,
    pub raw_text: String,
    pub word_count: usize,
    pub quality_tier: QualityTier,
    /// Raw 0–5 ordinal the tier was derived from.
    pub tier_score: u8,
    pub citation_count: u32,
    /// Deduplication key, see [`identity_key`].
    pub identity_key: String,
}

/// Stable identity for deduplication: normalized URL, or a content hash
/// prefixed with `sha256:` when the URL is not a usable web address.
///
/// Normalization drops the scheme, a leading `www.`, the fragment, trailing
/// slashes and `utm_*` tracking parameters.
pub fn identity_key(url: &str, text: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(parsed)
            if matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some() =>
        {
            normalize_url(&parsed)
        }
        _ => format!("sha256:{}", content_hash(text)),
    }
}

fn normalize_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let path = url.path().trim_end_matches('/');

    let query: Vec<String> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_"))
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    let mut key = format!("{host}{path}");
    if !query.is_empty() {
        key.push('?');
        key.push_str(&query.join("&"));
    }
    key
}

/// Whether `host` is `domain` or one of its subdomains. A leading `www.` on
/// either side is ignored.
pub fn host_matches_domain(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let domain = domain.trim().to_lowercase();
    let domain = domain.strip_prefix("www.").unwrap_or(&domain);
    !domain.is_empty()
        && (host == domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.')))
}

/// SHA-256 of `content`, lowercase hex.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Requirement
// ---------------------------------------------------------------------------

/// Placeholder substituted with the disease name in query templates.
pub const DISEASE_PLACEHOLDER: &str = "{disease}";

/// One information need within a section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub section: SectionId,
    pub description: String,
    /// Search query templates containing `{disease}`, in query order.
    pub query_templates: Vec<String>,
    /// Accepted documents expected for this requirement (at least 1).
    pub min_sources: u32,
    /// Whether prose covering this requirement must carry citations.
    pub citation_required: bool,
}

impl Requirement {
    /// Bind every query template to a disease name.
    pub fn queries_for(&self, disease: &str) -> Vec<String> {
        self.query_templates
            .iter()
            .map(|t| t.replace(DISEASE_PLACEHOLDER, disease.trim()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn schema_has_thirteen_sections_in_order() {
        assert_eq!(SectionId::ALL.len(), 13);
        for (i, id) in SectionId::ALL.iter().enumerate() {
            assert_eq!(id.position(), i);
        }
        assert_eq!(SectionId::ALL[0].title(), "Quick Facts");
        assert_eq!(SectionId::ALL[11].title(), "What Is Not Known");
    }

    #[test]
    fn exactly_five_critical_sections() {
        let critical: Vec<_> = SectionId::ALL.iter().filter(|s| s.is_critical()).collect();
        assert_eq!(critical.len(), 5);
        assert!(SectionId::HowItIsDiagnosed.is_critical());
        assert!(!SectionId::Outlook.is_critical());
    }

    #[test]
    fn section_id_str_matches_serde() {
        for id in SectionId::ALL {
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
            assert_eq!(id.as_str().parse::<SectionId>().unwrap(), id);
        }
    }

    #[test]
    fn tier_from_score() {
        assert_eq!(QualityTier::from_score(0), QualityTier::Excluded);
        assert_eq!(QualityTier::from_score(2), QualityTier::Excluded);
        assert_eq!(QualityTier::from_score(3), QualityTier::TextbookOrSociety);
        assert_eq!(QualityTier::from_score(4), QualityTier::AgencyOrDatabase);
        assert_eq!(QualityTier::from_score(5), QualityTier::PeerReviewedOrGuideline);
        assert!(QualityTier::PeerReviewedOrGuideline > QualityTier::AgencyOrDatabase);
    }

    #[test]
    fn identity_key_normalizes_urls() {
        let a = identity_key("https://www.NIH.gov/health/dmd/?utm_source=x#top", "");
        let b = identity_key("http://nih.gov/health/dmd", "different text");
        assert_eq!(a, b);
        assert_eq!(a, "nih.gov/health/dmd");
    }

    #[test]
    fn identity_key_keeps_meaningful_query() {
        let key = identity_key("https://pubmed.ncbi.nlm.nih.gov/?term=dmd", "");
        assert_eq!(key, "pubmed.ncbi.nlm.nih.gov?term=dmd");
    }

    #[test]
    fn identity_key_falls_back_to_content_hash() {
        let key = identity_key("", "hello world");
        assert_eq!(
            key,
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert!(identity_key("not a url", "x").starts_with("sha256:"));
    }

    #[test]
    fn host_matching_respects_label_boundaries() {
        assert!(host_matches_domain("en.wikipedia.org", "wikipedia.org"));
        assert!(host_matches_domain("www.nih.gov", "nih.gov"));
        assert!(host_matches_domain("NIH.gov", "www.nih.gov"));
        assert!(!host_matches_domain("notnih.gov", "nih.gov"));
        assert!(!host_matches_domain("nih.gov", ""));
    }

    #[test]
    fn requirement_binds_disease() {
        let req = Requirement {
            section: SectionId::QuickFacts,
            description: "prevalence".into(),
            query_templates: vec!["{disease} prevalence".into(), "{disease} incidence".into()],
            min_sources: 1,
            citation_required: true,
        };
        assert_eq!(
            req.queries_for(" Duchenne muscular dystrophy "),
            vec![
                "Duchenne muscular dystrophy prevalence",
                "Duchenne muscular dystrophy incidence"
            ]
        );
    }
}
