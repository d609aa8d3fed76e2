//! Section requirement registry.
//!
//! The registry is a versioned TOML table listing every article section with
//! its writing instructions and information requirements. It is loaded once,
//! validated, and then only read.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use rarecite_shared::{
    CURRENT_SCHEMA_VERSION, DISEASE_PLACEHOLDER, RareCiteError, Requirement, Result,
    SchemaConfig, SectionId, expand_home,
};

/// Schema shipped with the binary.
pub const BUILTIN_SCHEMA: &str = include_str!("../schema/sections.toml");

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaFile {
    version: u32,
    #[serde(default)]
    sections: Vec<SectionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SectionEntry {
    id: SectionId,
    #[serde(default)]
    instructions: String,
    #[serde(default)]
    requirements: Vec<RequirementEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequirementEntry {
    description: String,
    queries: Vec<String>,
    min_sources: u32,
    #[serde(default = "default_citation_required")]
    citation_required: bool,
}

fn default_citation_required() -> bool {
    true
}

// ---------------------------------------------------------------------------
// SectionRegistry
// ---------------------------------------------------------------------------

/// One section's schema entry.
#[derive(Debug, Clone, Serialize)]
pub struct SectionSpec {
    pub id: SectionId,
    pub instructions: String,
    pub requirements: Vec<Requirement>,
}

impl SectionSpec {
    /// Whether any requirement of this section needs cited prose.
    pub fn citation_required(&self) -> bool {
        self.requirements.iter().any(|r| r.citation_required)
    }
}

/// Validated registry holding all 13 sections in schema order.
#[derive(Debug, Clone)]
pub struct SectionRegistry {
    version: u32,
    sections: Vec<SectionSpec>,
}

impl SectionRegistry {
    /// The embedded default schema.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_SCHEMA)
    }

    /// Load from `schema.path` when configured, else the embedded schema.
    pub fn load(config: &SchemaConfig) -> Result<Self> {
        match &config.path {
            Some(path) => Self::from_path(&expand_home(path)?),
            None => Self::builtin(),
        }
    }

    /// Read and validate a schema file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| RareCiteError::io(path, e))?;
        let registry = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "loaded section schema");
        Ok(registry)
    }

    /// Parse and validate a schema document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: SchemaFile = toml::from_str(content)
            .map_err(|e| RareCiteError::schema(format!("invalid schema TOML: {e}")))?;

        if file.version != CURRENT_SCHEMA_VERSION {
            return Err(RareCiteError::schema(format!(
                "unsupported schema version {} (expected {CURRENT_SCHEMA_VERSION})",
                file.version
            )));
        }

        let mut seen = HashSet::new();
        let mut sections = Vec::with_capacity(file.sections.len());

        for entry in file.sections {
            if !seen.insert(entry.id) {
                return Err(RareCiteError::schema(format!(
                    "section `{}` is defined more than once",
                    entry.id.as_str()
                )));
            }
            sections.push(build_section(entry)?);
        }

        let missing: Vec<&str> = SectionId::ALL
            .iter()
            .filter(|id| !seen.contains(*id))
            .map(|id| id.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(RareCiteError::schema(format!(
                "missing sections: {}",
                missing.join(", ")
            )));
        }

        sections.sort_by_key(|s| s.id.position());

        Ok(Self {
            version: file.version,
            sections,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// All sections in schema order.
    pub fn sections(&self) -> &[SectionSpec] {
        &self.sections
    }

    pub fn section(&self, id: SectionId) -> &SectionSpec {
        // Construction guarantees every section is present at its position.
        &self.sections[id.position()]
    }

    pub fn requirements(&self, id: SectionId) -> &[Requirement] {
        &self.section(id).requirements
    }

    /// Total number of requirements across all sections.
    pub fn requirement_count(&self) -> usize {
        self.sections.iter().map(|s| s.requirements.len()).sum()
    }
}

fn build_section(entry: SectionEntry) -> Result<SectionSpec> {
    let id = entry.id;
    if entry.requirements.is_empty() {
        return Err(RareCiteError::schema(format!(
            "section `{}` has no requirements",
            id.as_str()
        )));
    }

    let mut requirements = Vec::with_capacity(entry.requirements.len());
    for (i, req) in entry.requirements.into_iter().enumerate() {
        let label = format!("section `{}` requirement {}", id.as_str(), i + 1);

        if req.description.trim().is_empty() {
            return Err(RareCiteError::schema(format!("{label} has no description")));
        }
        if req.queries.is_empty() {
            return Err(RareCiteError::schema(format!("{label} has no query templates")));
        }
        if let Some(bad) = req.queries.iter().find(|q| !q.contains(DISEASE_PLACEHOLDER)) {
            return Err(RareCiteError::schema(format!(
                "{label}: query template \"{bad}\" does not contain {DISEASE_PLACEHOLDER}"
            )));
        }
        if req.min_sources == 0 {
            return Err(RareCiteError::schema(format!(
                "{label}: min_sources must be at least 1"
            )));
        }

        requirements.push(Requirement {
            section: id,
            description: req.description.trim().to_string(),
            query_templates: req.queries,
            min_sources: req.min_sources,
            citation_required: req.citation_required,
        });
    }

    Ok(SectionSpec {
        id,
        instructions: entry.instructions.trim().to_string(),
        requirements,
    })
}
