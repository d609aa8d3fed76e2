//! Shared types, error model, and configuration for rarecite.
//!
//! This crate is the foundation depended on by all other rarecite crates.
//! It provides:
//! - [`RareCiteError`]: the unified error type
//! - Domain types ([`SectionId`], [`Document`], [`Requirement`], [`SufficiencyReport`], [`Article`])
//! - Configuration ([`AppConfig`], [`ScoringConfig`], config loading)

pub mod article;
pub mod config;
pub mod error;
pub mod report;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use article::{Article, ArticleSection, Bibliography, BibliographyEntry, CitationRef};
pub use config::{
    AppConfig, ChecksConfig, DefaultsConfig, OpenRouterConfig, QualityConfig, SchemaConfig,
    ScoringConfig, SearchConfig, config_dir, config_file_path, database_path, expand_home,
    init_config, load_config, load_config_from, read_api_key,
};
pub use error::{RareCiteError, Result};
pub use report::{Gap, MissingInfo, MissingReason, SectionScore, SufficiencyReport};
pub use types::{
    CURRENT_SCHEMA_VERSION, DISEASE_PLACEHOLDER, Document, QualityTier, RawDocument, Requirement,
    RunId, SectionId, content_hash, host_matches_domain, identity_key,
};
