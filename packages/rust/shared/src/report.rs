//! Sufficiency scores and the per-run sufficiency report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{RunId, SectionId};

/// Evidence score for one section. Derived from its document set, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionScore {
    pub section: SectionId,
    /// Weighted score in `[0, 1]`.
    pub score: f64,
    pub num_sources: usize,
    pub word_count: usize,
    pub num_citations: u32,
    pub has_sources: bool,
    pub has_words: bool,
    pub has_citations: bool,
    pub is_critical: bool,
    pub sufficient: bool,
}

/// Why a section was judged insufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    InsufficientSources,
    InsufficientWords,
    InsufficientCitations,
    /// Every gate passed but the weighted score still fell short.
    BelowThreshold,
}

impl MissingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientSources => "insufficient_sources",
            Self::InsufficientWords => "insufficient_words",
            Self::InsufficientCitations => "insufficient_citations",
            Self::BelowThreshold => "below_threshold",
        }
    }
}

impl std::fmt::Display for MissingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An insufficient section and the gates it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingInfo {
    pub section: SectionId,
    pub reasons: Vec<MissingReason>,
}

/// A cross-cutting evidence hole, independent of the scoring math.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub section: SectionId,
    pub description: String,
}

/// Snapshot of one assessment. Produced once per run, read-only downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SufficiencyReport {
    pub run_id: RunId,
    pub disease: String,
    /// One score per section, in schema order.
    pub sections: Vec<SectionScore>,
    pub total_score: f64,
    pub num_sufficient: usize,
    pub can_compose: bool,
    pub missing_info: Vec<MissingInfo>,
    pub gaps: Vec<Gap>,
    pub created_at: DateTime<Utc>,
}

impl SufficiencyReport {
    /// Score for a section, if present.
    pub fn score_for(&self, section: SectionId) -> Option<&SectionScore> {
        self.sections.iter().find(|s| s.section == section)
    }

    /// Whether a section cleared the sufficiency threshold.
    pub fn is_sufficient(&self, section: SectionId) -> bool {
        self.score_for(section).is_some_and(|s| s.sufficient)
    }

    /// Critical sections that failed, in schema order.
    pub fn failed_critical(&self) -> Vec<SectionId> {
        self.sections
            .iter()
            .filter(|s| s.is_critical && !s.sufficient)
            .map(|s| s.section)
            .collect()
    }
}
