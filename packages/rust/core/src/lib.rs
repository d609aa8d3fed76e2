//! Core pipeline orchestration and domain logic for RareCite.
//!
//! This crate ties together the section registry, evidence retrieval,
//! sufficiency assessment, and article assembly into end-to-end workflows
//! (`assess_disease`, `compose_article`).

pub mod assembler;
pub mod cache;
pub mod checks;
pub mod eval;
pub mod pipeline;
pub mod quality;
pub mod registry;
pub mod retrieval;
pub mod sufficiency;

#[cfg(test)]
mod testing;

pub use assembler::CancelFlag;
pub use checks::QualityReport;
pub use eval::{ArticleEvaluation, evaluate_article};
pub use pipeline::{
    Assessment, ComposeOutcome, ComposeRequest, ComposedArticle, PipelineContext,
    ProgressReporter, SilentProgress, assess_disease, compose_article,
};
pub use registry::SectionRegistry;
