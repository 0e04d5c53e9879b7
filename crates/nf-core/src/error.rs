//! Error types for nufit

use thiserror::Error;

/// nufit error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Syntax error in a configuration source
    #[error("{source_name}:{line}: {message}")]
    Parse {
        /// File path or other label of the source text.
        source_name: String,
        /// 1-based line number (0 when not attributable to a line).
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// Unresolvable `${section:key}` reference
    #[error("Reference error: {0}")]
    Reference(String),

    /// Unknown or incompatible physical unit
    #[error("Unit error: {0}")]
    Unit(String),

    /// Resource file or directory could not be located
    #[error("Resource not found: {0}")]
    Resource(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Build a [`Error::Parse`] from its parts.
    pub fn parse(source_name: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Error::Parse { source_name: source_name.into(), line, message: message.into() }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
