//! Evidence sufficiency scoring and the compose/no-compose decision.
//!
//! A section's score is a weighted sum of three content gates plus a
//! criticality bonus:
//!
//! ```text
//! score = w_src·[n ≥ min_sources] + w_words·[Σ words ≥ min_words]
//!       + w_cit·[Σ citations ≥ min_citations] + w_crit·[critical]
//! ```
//!
//! capped at 1.0 and rounded to four decimals. With the default weights a
//! critical section still needs two content gates to reach 0.7.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument};

use rarecite_shared::{
    Document, MissingInfo, MissingReason, RunId, ScoringConfig, SectionId, SectionScore,
    SufficiencyReport,
};

use crate::retrieval::RetrievalSnapshot;

/// Round to four decimal places.
fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn weight(gate: bool, w: f64) -> f64 {
    if gate { w } else { 0.0 }
}

/// Score one section from its ranked documents.
pub fn score_section(
    section: SectionId,
    documents: &[Document],
    config: &ScoringConfig,
) -> SectionScore {
    let num_sources = documents.len();
    let word_count: usize = documents.iter().map(|d| d.word_count).sum();
    let num_citations: u32 = documents.iter().map(|d| d.citation_count).sum();

    let has_sources = num_sources >= config.min_sources;
    let has_words = word_count >= config.min_words;
    let has_citations = num_citations >= config.min_citations;
    let is_critical = section.is_critical();

    let raw = weight(has_sources, config.source_weight)
        + weight(has_words, config.word_weight)
        + weight(has_citations, config.citation_weight)
        + weight(is_critical, config.critical_weight);
    let score = round4(raw.clamp(0.0, 1.0));

    SectionScore {
        section,
        score,
        num_sources,
        word_count,
        num_citations,
        has_sources,
        has_words,
        has_citations,
        is_critical,
        sufficient: score >= config.section_threshold,
    }
}

/// Failed gates of an insufficient section; empty when sufficient.
pub fn missing_reasons(score: &SectionScore) -> Vec<MissingReason> {
    if score.sufficient {
        return Vec::new();
    }

    let mut reasons = Vec::new();
    if !score.has_sources {
        reasons.push(MissingReason::InsufficientSources);
    }
    if !score.has_words {
        reasons.push(MissingReason::InsufficientWords);
    }
    if !score.has_citations {
        reasons.push(MissingReason::InsufficientCitations);
    }
    if reasons.is_empty() {
        reasons.push(MissingReason::BelowThreshold);
    }
    reasons
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Aggregate verdict over all section scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub can_compose: bool,
    pub total_score: f64,
    pub num_sufficient: usize,
    /// Critical sections that are insufficient or absent, in schema order.
    pub failed_critical: Vec<SectionId>,
    pub meets_section_count: bool,
    pub meets_total_score: bool,
}

/// Apply the three composition conditions. All of them must hold:
/// every critical section sufficient, enough sufficient sections, and a
/// high enough total.
pub fn decide(scores: &[SectionScore], config: &ScoringConfig) -> Decision {
    let total_score = round4(scores.iter().map(|s| s.score).sum());
    let num_sufficient = scores.iter().filter(|s| s.sufficient).count();

    let failed_critical: Vec<SectionId> = SectionId::ALL
        .into_iter()
        .filter(|id| id.is_critical())
        .filter(|id| {
            !scores
                .iter()
                .any(|s| s.section == *id && s.sufficient)
        })
        .collect();

    let meets_section_count = num_sufficient >= config.min_sufficient_sections;
    let meets_total_score = total_score >= config.min_total_score;

    Decision {
        can_compose: failed_critical.is_empty() && meets_section_count && meets_total_score,
        total_score,
        num_sufficient,
        failed_critical,
        meets_section_count,
        meets_total_score,
    }
}

/// Score every schema section of a complete snapshot and build the report.
#[instrument(skip_all, fields(disease = %snapshot.disease))]
pub fn assess(snapshot: &RetrievalSnapshot, config: &ScoringConfig) -> SufficiencyReport {
    let sections: Vec<SectionScore> = SectionId::ALL
        .into_iter()
        .map(|id| score_section(id, snapshot.documents(id), config))
        .collect();

    for s in &sections {
        debug!(
            section = %s.section.as_str(),
            score = s.score,
            sources = s.num_sources,
            words = s.word_count,
            citations = s.num_citations,
            sufficient = s.sufficient,
            "section scored"
        );
    }

    let missing_info: Vec<MissingInfo> = sections
        .iter()
        .filter(|s| !s.sufficient)
        .map(|s| MissingInfo {
            section: s.section,
            reasons: missing_reasons(s),
        })
        .collect();

    let decision = decide(&sections, config);

    info!(
        total_score = decision.total_score,
        sufficient = decision.num_sufficient,
        can_compose = decision.can_compose,
        "assessment complete"
    );

    SufficiencyReport {
        run_id: RunId::new(),
        disease: snapshot.disease.clone(),
        sections,
        total_score: decision.total_score,
        num_sufficient: decision.num_sufficient,
        can_compose: decision.can_compose,
        missing_info,
        gaps: snapshot.gaps.clone(),
        created_at: Utc::now(),
    }
}
