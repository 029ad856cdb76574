//! Error types for Skillsmith.
//!
//! Library crates use [`SkillsmithError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Skillsmith operations.
#[derive(Debug, thiserror::Error)]
pub enum SkillsmithError {
    /// Configuration loading or validation error. Always fatal, raised
    /// before any source is processed.
    #[error("config error: {message}")]
    Config { message: String },

    /// A raw extract file could not be parsed at all.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Reasoning collaborator error surfaced outside the assisted strategy
    /// (bridge spawn failures, cache plumbing).
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (broken invariant, schema mismatch, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// JSON serialization of an output record tree failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SkillsmithError>;

impl SkillsmithError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
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

impl From<serde_json::Error> for SkillsmithError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
