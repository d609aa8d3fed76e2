//! Assembled article, citation references and the bibliography.

use serde::{Deserialize, Serialize};

use crate::types::{QualityTier, SectionId};

/// A citation emitted inside one section.
///
/// `local_marker` is only unique within its section until renumbering sets
/// `global_number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationRef {
    pub local_marker: u32,
    pub document_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_number: Option<u32>,
}

/// One written (or placeholder) section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleSection {
    pub section: SectionId,
    pub title: String,
    pub content: String,
    pub citations: Vec<CitationRef>,
    pub is_placeholder: bool,
    /// Out-of-range markers removed from the generated text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stripped_markers: Vec<u32>,
}

/// A complete article: one entry per schema section, always in schema order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub disease: String,
    /// Leading safety note.
    pub disclaimer: String,
    pub sections: Vec<ArticleSection>,
    /// Sections written as placeholders, in schema order.
    pub unknown_sections: Vec<SectionId>,
}

impl Article {
    pub fn section(&self, id: SectionId) -> Option<&ArticleSection> {
        self.sections.iter().find(|s| s.section == id)
    }

    pub fn section_mut(&mut self, id: SectionId) -> Option<&mut ArticleSection> {
        self.sections.iter_mut().find(|s| s.section == id)
    }
}

/// A numbered reference in the trailing bibliography.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibliographyEntry {
    pub number: u32,
    pub document_key: String,
    pub url: String,
    pub title: String,
    pub tier: QualityTier,
}

/// Bibliography ordered by global citation number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bibliography {
    pub entries: Vec<BibliographyEntry>,
}

impl Bibliography {
    pub fn number_for(&self, document_key: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.document_key == document_key)
            .map(|e| e.number)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
