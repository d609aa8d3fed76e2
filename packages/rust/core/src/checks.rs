//! Advisory post-hoc checks over a finished article.
//!
//! Checks report findings; they never block delivery and never edit the text.
//! Placeholder sections and the appended unknown/gap lists are not prose and
//! are skipped.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rarecite_shared::{AppConfig, Article, ArticleSection, Bibliography, QualityTier};

use crate::assembler::section_prose;
use crate::registry::SectionRegistry;

pub const DISCLAIMER_PRESENT: &str = "disclaimer_present";
pub const CLAIMS_ATTRIBUTED: &str = "claims_attributed";
pub const NO_REJECTED_SOURCES: &str = "no_rejected_sources";
pub const NO_DIRECTIVE_LANGUAGE: &str = "no_directive_language";
pub const TERMS_DEFINED_ON_FIRST_USE: &str = "terms_defined_on_first_use";
pub const NO_CONFLICTING_NUMBERS: &str = "no_conflicting_numbers";
pub const NO_UNSOURCED_SPECULATION: &str = "no_unsourced_speculation";

/// Paragraphs at least this long are treated as making a claim.
const CLAIM_WORDS: usize = 25;

/// Characters of offending text quoted in a finding.
const EXCERPT_CHARS: usize = 60;

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d+\]").expect("valid regex"));

static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d{1,3}[.)])\s+").expect("valid regex"));

static PARAGRAPH_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("valid regex"));

static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(you should|you must|you need to|we recommend|we advise|we suggest|make sure (?:you|to)|be sure to|stop taking|start taking|do not take|don't take|avoid taking|increase your dose|reduce your dose|ask your doctor (?:for|to prescribe))\b",
    )
    .expect("valid regex")
});

static ACRONYM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][A-Za-z0-9]{1,5}\b").expect("valid regex"));

static ROMAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[IVX]+$").expect("valid regex"));

static ONE_IN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b1\s+in\s+(\d{1,3}(?:,\d{3})+|\d+)\s+([a-z]+)").expect("valid regex")
});

static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,3}(?:\.\d+)?)\s?%\s+of\s+(?:all\s+|the\s+)?([a-z]+)")
        .expect("valid regex")
});

static SENTENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?\n]+(?:[.!?]+|$)").expect("valid regex"));

static SPECULATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(it is (?:thought|believed|possible|speculated|hypothesi[sz]ed)|possibly|perhaps|presumably|probably|might be|could be|hypothes[ie]s|speculat\w*|may be (?:linked|caused|related|due))\b",
    )
    .expect("valid regex")
});

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: String,
    pub passed: bool,
    pub findings: Vec<String>,
}

impl CheckResult {
    fn new(check: &str, findings: Vec<String>) -> Self {
        Self {
            check: check.to_string(),
            passed: findings.is_empty(),
            findings,
        }
    }
}

/// All check outcomes, in battery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    pub checks: Vec<CheckResult>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check == name)
    }

    pub fn failed_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.check.as_str())
            .collect()
    }

    pub fn findings_count(&self) -> usize {
        self.checks.iter().map(|c| c.findings.len()).sum()
    }
}

/// Run the full battery.
pub fn run_checks(
    article: &Article,
    bibliography: &Bibliography,
    registry: &SectionRegistry,
    config: &AppConfig,
) -> QualityReport {
    let report = QualityReport {
        checks: vec![
            CheckResult::new(DISCLAIMER_PRESENT, check_disclaimer(article)),
            CheckResult::new(CLAIMS_ATTRIBUTED, check_claims_attributed(article, registry)),
            CheckResult::new(
                NO_REJECTED_SOURCES,
                check_rejected_sources(bibliography, config.quality.min_accept_tier),
            ),
            CheckResult::new(NO_DIRECTIVE_LANGUAGE, check_directive_language(article)),
            CheckResult::new(
                TERMS_DEFINED_ON_FIRST_USE,
                check_terms_defined(article, &config.checks.common_abbreviations),
            ),
            CheckResult::new(NO_CONFLICTING_NUMBERS, check_conflicting_numbers(article)),
            CheckResult::new(NO_UNSOURCED_SPECULATION, check_speculation(article)),
        ],
    };

    for c in report.checks.iter().filter(|c| !c.passed) {
        debug!(check = %c.check, findings = c.findings.len(), "check failed");
    }
    info!(
        passed = report.passed(),
        findings = report.findings_count(),
        "quality checks complete"
    );
    report
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Sections with generated prose, paired with that prose.
fn prose_sections(article: &Article) -> impl Iterator<Item = (&ArticleSection, &str)> {
    article
        .sections
        .iter()
        .filter(|s| !s.is_placeholder)
        .map(|s| (s, section_prose(s)))
}

fn excerpt(text: &str) -> String {
    let text = text.trim();
    let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
    if out.len() < text.len() {
        out.push('…');
    }
    out
}

/// Paragraphs, with each list item counted as its own unit.
fn claim_units(prose: &str) -> Vec<String> {
    let mut units = Vec::new();
    for paragraph in PARAGRAPH_BREAK_RE.split(prose) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() || paragraph.starts_with('#') {
            continue;
        }
        if paragraph.lines().any(|l| LIST_ITEM_RE.is_match(l)) {
            for line in paragraph.lines() {
                let item = LIST_ITEM_RE.replace(line, "");
                if !item.trim().is_empty() {
                    units.push(item.trim().to_string());
                }
            }
        } else {
            units.push(paragraph.to_string());
        }
    }
    units
}

fn is_claim(unit: &str) -> bool {
    let bare = MARKER_RE.replace_all(unit, "");
    bare.chars().any(|c| c.is_ascii_digit()) || bare.split_whitespace().count() >= CLAIM_WORDS
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

fn check_disclaimer(article: &Article) -> Vec<String> {
    if article.disclaimer.trim().is_empty() {
        vec!["the article has no disclaimer".to_string()]
    } else {
        Vec::new()
    }
}

fn check_claims_attributed(article: &Article, registry: &SectionRegistry) -> Vec<String> {
    let mut findings = Vec::new();

    for (section, prose) in prose_sections(article) {
        for unit in claim_units(prose) {
            if is_claim(&unit) && !MARKER_RE.is_match(&unit) {
                findings.push(format!(
                    "{}: uncited claim \"{}\"",
                    section.title,
                    excerpt(&unit)
                ));
            }
        }

        if section.citations.is_empty() && registry.section(section.section).citation_required() {
            findings.push(format!(
                "{}: no citations in a section that requires them",
                section.title
            ));
        }
    }

    for section in &article.sections {
        for marker in &section.stripped_markers {
            findings.push(format!(
                "{}: removed citation [{marker}] that matched no source",
                section.title
            ));
        }
    }

    findings
}

fn check_rejected_sources(bibliography: &Bibliography, min_accept_tier: u8) -> Vec<String> {
    let floor = QualityTier::from_score(min_accept_tier);
    bibliography
        .entries
        .iter()
        .filter(|e| e.tier < floor)
        .map(|e| {
            let label = if e.url.is_empty() { &e.document_key } else { &e.url };
            format!("[{}] {label} has rejected tier {}", e.number, e.tier.as_str())
        })
        .collect()
}

fn check_directive_language(article: &Article) -> Vec<String> {
    prose_sections(article)
        .flat_map(|(section, prose)| {
            DIRECTIVE_RE
                .find_iter(prose)
                .map(|m| format!("{}: directive phrase \"{}\"", section.title, m.as_str()))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn check_terms_defined(article: &Article, common: &[String]) -> Vec<String> {
    let exempt: HashSet<&str> = common.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut findings = Vec::new();

    for (section, prose) in prose_sections(article) {
        for m in ACRONYM_RE.find_iter(prose) {
            let term = m.as_str();
            if term.chars().filter(|c| c.is_ascii_uppercase()).count() < 2
                || exempt.contains(term)
                || ROMAN_RE.is_match(term)
                || !seen.insert(term.to_string())
            {
                continue;
            }

            let before = &prose[..m.start()];
            let after = &prose[m.end()..];
            let parenthesised = before.ends_with('(') && after.starts_with(')');
            let explained = after.starts_with(" (");
            if !parenthesised && !explained {
                findings.push(format!(
                    "{}: \"{term}\" is used before it is defined",
                    section.title
                ));
            }
        }
    }
    findings
}

/// Unit nouns compared without a plural `s`.
fn normalize_unit(word: &str) -> String {
    let word = word.to_lowercase();
    match word.strip_suffix('s') {
        Some(stem) if stem.len() > 2 && !stem.ends_with('s') => stem.to_string(),
        _ => word,
    }
}

fn check_conflicting_numbers(article: &Article) -> Vec<String> {
    // claim pattern → distinct values in order of appearance
    let mut claims: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut record = |key: String, value: String| {
        let values = claims.entry(key).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    };

    for (_, prose) in prose_sections(article) {
        for caps in ONE_IN_RE.captures_iter(prose) {
            let value = caps[1].replace(',', "");
            record(format!("1 in N {}", normalize_unit(&caps[2])), value);
        }
        for caps in PERCENT_RE.captures_iter(prose) {
            record(format!("P% of {}", normalize_unit(&caps[2])), caps[1].to_string());
        }
    }

    claims
        .into_iter()
        .filter(|(_, values)| values.len() > 1)
        .map(|(key, values)| format!("\"{key}\" is stated with different numbers: {}", values.join(", ")))
        .collect()
}

fn check_speculation(article: &Article) -> Vec<String> {
    let mut findings = Vec::new();
    for (section, prose) in prose_sections(article) {
        for sentence in SENTENCE_RE.find_iter(prose) {
            let sentence = sentence.as_str();
            if SPECULATION_RE.is_match(sentence) && !MARKER_RE.is_match(sentence) {
                findings.push(format!(
                    "{}: speculative sentence without a citation \"{}\"",
                    section.title,
                    excerpt(sentence)
                ));
            }
        }
    }
    findings
}
