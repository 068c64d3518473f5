//! Error types for building and reading GIS item databases.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GisError>;

#[derive(Debug, Error)]
pub enum GisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid database format: {0}")]
    InvalidFormat(String),

    #[error("schema mismatch: expected '{expected}', found '{found}'")]
    SchemaMismatch { expected: String, found: String },

    #[error("duplicate item name '{0}'")]
    DuplicateName(String),

    #[error("no items to write")]
    NoItems,

    #[error("database too large: {0}")]
    TooLarge(String),

    /// Structural damage detected while reading, e.g. a key-map probe that
    /// never terminates. Distinct from a key simply not being present.
    #[error("database corrupted: {0}")]
    Corrupted(String),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GisError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        GisError::InvalidFormat(msg.into())
    }

    pub(crate) fn corrupted(msg: impl Into<String>) -> Self {
        GisError::Corrupted(msg.into())
    }
}
