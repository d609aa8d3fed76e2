//! Error types for rarecite.
//!
//! Library crates use [`RareCiteError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Search and generation failures are usually absorbed by the pipeline and
//! recorded as gaps; only infrastructure errors reach the caller.

use std::path::PathBuf;

/// Top-level error type for all rarecite operations.
#[derive(Debug, thiserror::Error)]
pub enum RareCiteError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Section schema is malformed or incomplete.
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Network/HTTP error talking to a collaborator.
    #[error("network error: {0}")]
    Network(String),

    /// Search backend returned an error or an unreadable response.
    #[error("search error: {0}")]
    Search(String),

    /// Generation backend error (API, response parsing, citation contract).
    #[error("generation error: {0}")]
    Generation(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The run was cancelled before it could finish.
    #[error("cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RareCiteError>;

impl RareCiteError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a schema error from any displayable message.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = RareCiteError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = RareCiteError::schema("section `outlook` has no requirements");
        assert!(err.to_string().starts_with("schema error:"));
        assert!(err.to_string().contains("outlook"));
    }
}
