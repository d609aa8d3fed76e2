//! Source quality classification.
//!
//! Each raw search result gets a 0–5 ordinal from configured domain rules:
//!
//! | score | meaning |
//! |---|---|
//! | 5 | peer-reviewed literature, clinical guidelines |
//! | 4 | government agencies, curated databases |
//! | 3 | textbooks, clinical references, societies; unknown hosts with scholarly signals |
//! | 2 | unknown hosts |
//! | 1 | encyclopedic and general reference |
//! | 0 | social media and forums |
//!
//! Documents below `min_accept_tier` are dropped.

use tracing::debug;
use url::Url;

use rarecite_markdown::{count_references, count_words, reference_signals};
use rarecite_shared::{
    Document, QualityConfig, QualityTier, RawDocument, host_matches_domain, identity_key,
};

/// Score for hosts no rule matches.
const UNKNOWN_HOST_SCORE: u8 = 2;

/// Score for unknown hosts whose text reads like a referenced article.
const SCHOLARLY_UNKNOWN_SCORE: u8 = 3;

// ---------------------------------------------------------------------------
// Domain rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct DomainRule {
    host: String,
    /// Path prefix including the leading `/`, or empty.
    path_prefix: String,
    score: u8,
}

impl DomainRule {
    fn parse(rule: &str, score: u8) -> Option<Self> {
        let rule = rule.trim().trim_start_matches("https://").trim_start_matches("http://");
        let (host, path) = match rule.find('/') {
            Some(i) => (&rule[..i], rule[i..].trim_end_matches('/')),
            None => (rule, ""),
        };
        if host.is_empty() {
            return None;
        }
        Some(Self {
            host: host.to_lowercase(),
            path_prefix: path.to_string(),
            score,
        })
    }

    fn matches(&self, host: &str, path: &str) -> bool {
        host_matches_domain(host, &self.host) && path_has_prefix(path, &self.path_prefix)
    }

    /// Longer rules are more specific.
    fn specificity(&self) -> usize {
        self.host.len() + self.path_prefix.len()
    }
}

fn path_has_prefix(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

// ---------------------------------------------------------------------------
// QualityFilter
// ---------------------------------------------------------------------------

/// Classifies raw documents into quality tiers and gates acceptance.
#[derive(Debug, Clone)]
pub struct QualityFilter {
    rules: Vec<DomainRule>,
    min_accept_tier: u8,
}

impl QualityFilter {
    pub fn new(config: &QualityConfig) -> Self {
        let tiers: [(&[String], u8); 5] = [
            (&config.peer_reviewed_domains, 5),
            (&config.agency_domains, 4),
            (&config.society_domains, 3),
            (&config.encyclopedic_domains, 1),
            (&config.social_domains, 0),
        ];

        let rules = tiers
            .iter()
            .flat_map(|(domains, score)| {
                domains.iter().filter_map(|d| DomainRule::parse(d, *score))
            })
            .collect();

        Self {
            rules,
            min_accept_tier: config.min_accept_tier,
        }
    }

    /// 0–5 ordinal for a raw document.
    pub fn tier_score(&self, raw: &RawDocument) -> u8 {
        if let Some(score) = self.rule_score(&raw.url) {
            return score;
        }
        if reference_signals(&raw.text).is_scholarly() {
            SCHOLARLY_UNKNOWN_SCORE
        } else {
            UNKNOWN_HOST_SCORE
        }
    }

    pub fn classify(&self, raw: &RawDocument) -> QualityTier {
        QualityTier::from_score(self.tier_score(raw))
    }

    /// Tag a raw document with quality metadata and its identity key.
    pub fn evaluate(&self, raw: RawDocument) -> Document {
        let tier_score = self.tier_score(&raw);
        let word_count = count_words(&raw.text);
        let citation_count = raw
            .citation_count
            .unwrap_or_else(|| count_references(&raw.text));
        let identity_key = identity_key(&raw.url, &raw.text);
        let title = raw
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| raw.url.clone());

        Document {
            source_id: raw.source_id.unwrap_or_else(|| identity_key.clone()),
            url: raw.url,
            title,
            raw_text: raw.text,
            word_count,
            quality_tier: QualityTier::from_score(tier_score),
            tier_score,
            citation_count,
            identity_key,
        }
    }

    /// Whether a tagged document clears the acceptance tier.
    pub fn accept(&self, document: &Document) -> bool {
        let accepted = document.tier_score >= self.min_accept_tier;
        if !accepted {
            debug!(
                url = %document.url,
                tier_score = document.tier_score,
                "rejected low-tier document"
            );
        }
        accepted
    }

    pub fn min_accept_tier(&self) -> u8 {
        self.min_accept_tier
    }

    /// Score of the most specific matching rule. Earlier tiers win ties.
    fn rule_score(&self, url: &str) -> Option<u8> {
        let parsed = Url::parse(url.trim()).ok()?;
        let host = parsed.host_str()?;
        let path = parsed.path();

        let mut best: Option<&DomainRule> = None;
        for rule in self.rules.iter().filter(|r| r.matches(host, path)) {
            if best.is_none_or(|b| rule.specificity() > b.specificity()) {
                best = Some(rule);
            }
        }
        best.map(|r| r.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(url: &str, text: &str) -> RawDocument {
        RawDocument {
            url: url.into(),
            title: Some("Title".into()),
            text: text.into(),
            ..Default::default()
        }
    }

    fn filter() -> QualityFilter {
        QualityFilter::new(&QualityConfig::default())
    }

    #[test]
    fn known_hosts_map_to_tiers() {
        let f = filter();
        assert_eq!(f.tier_score(&raw("https://pubmed.ncbi.nlm.nih.gov/123/", "")), 5);
        assert_eq!(f.tier_score(&raw("https://www.orpha.net/en/disease/324", "")), 4);
        assert_eq!(f.tier_score(&raw("https://rarediseases.org/rare-diseases/fabry/", "")), 3);
        assert_eq!(f.tier_score(&raw("https://en.wikipedia.org/wiki/Fabry", "")), 1);
        assert_eq!(f.tier_score(&raw("https://www.reddit.com/r/rare/", "")), 0);
        assert_eq!(
            f.classify(&raw("https://www.nejm.org/doi/full/1", "")),
            QualityTier::PeerReviewedOrGuideline
        );
    }

    #[test]
    fn longest_rule_wins() {
        let f = filter();
        // nih.gov (4) vs pubmed.ncbi.nlm.nih.gov (5)
        assert_eq!(f.tier_score(&raw("https://pubmed.ncbi.nlm.nih.gov/9/", "")), 5);
        // ncbi.nlm.nih.gov/books (4) vs ncbi.nlm.nih.gov/pmc (5)
        assert_eq!(f.tier_score(&raw("https://www.ncbi.nlm.nih.gov/books/NBK1292/", "")), 4);
        assert_eq!(f.tier_score(&raw("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC1/", "")), 5);
        // Plain ncbi.nlm.nih.gov falls back to nih.gov.
        assert_eq!(f.tier_score(&raw("https://www.ncbi.nlm.nih.gov/gene/2717", "")), 4);
    }

    #[test]
    fn path_prefix_respects_segments() {
        let f = filter();
        assert_eq!(f.tier_score(&raw("https://www.ncbi.nlm.nih.gov/bookshelf/x", "")), 4);
        assert_eq!(f.tier_score(&raw("https://patient.info/forums/discuss/1", "")), 0);
        assert_eq!(f.tier_score(&raw("https://patient.info/doctor/fabry", "")), 2);
    }

    #[test]
    fn unknown_host_scholarly_signals() {
        let f = filter();
        let scholarly = "Findings are summarized below.\n\n## References\n\n\
                         1. Smith J. doi:10.1000/xyz123\n2. PMID: 12345678\n";
        assert_eq!(f.tier_score(&raw("https://journal.example.org/a", scholarly)), 3);
        assert_eq!(f.tier_score(&raw("https://blog.example.org/a", "Just a post.")), 2);
        assert_eq!(f.tier_score(&raw("", "Snippet only.")), 2);
    }

    #[test]
    fn evaluate_tags_document() {
        let f = filter();
        let mut r = raw("https://www.orpha.net/en/disease/324?utm_source=x", "one two three [1] [2]");
        r.title = None;
        let doc = f.evaluate(r);
        assert_eq!(doc.identity_key, "orpha.net/en/disease/324");
        assert_eq!(doc.tier_score, 4);
        assert_eq!(doc.quality_tier, QualityTier::AgencyOrDatabase);
        assert_eq!(doc.word_count, 5);
        assert_eq!(doc.citation_count, 2);
        assert_eq!(doc.title, doc.url);
        assert_eq!(doc.source_id, doc.identity_key);
    }

    #[test]
    fn backend_citation_count_is_kept() {
        let mut r = raw("https://doi.org/10.1/abc", "no markers here");
        r.citation_count = Some(42);
        assert_eq!(filter().evaluate(r).citation_count, 42);
    }

    #[test]
    fn accept_uses_min_tier() {
        let f = filter();
        assert!(f.accept(&f.evaluate(raw("https://rarediseases.org/x", "t"))));
        assert!(!f.accept(&f.evaluate(raw("https://example.com/x", "t"))));
        assert!(!f.accept(&f.evaluate(raw("https://en.wikipedia.org/wiki/x", "t"))));

        let strict = QualityFilter::new(&QualityConfig {
            min_accept_tier: 5,
            ..QualityConfig::default()
        });
        assert!(!strict.accept(&strict.evaluate(raw("https://orpha.net/x", "t"))));
        assert!(strict.accept(&strict.evaluate(raw("https://doi.org/10.1/x", "t"))));
    }
}
