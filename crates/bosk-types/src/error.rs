use thiserror::Error;

/// Errors produced while parsing or manipulating paths and identifiers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid path syntax in {path:?}: {reason}")]
    InvalidSyntax { path: String, reason: String },

    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("path {path} has {expected} parameters but {actual} values were supplied")]
    ParameterCount {
        path: String,
        expected: usize,
        actual: usize,
    },

    #[error("cannot truncate {path} by {count} segments")]
    TruncateBeyondRoot { path: String, count: usize },
}

/// Convenience alias for path operations.
pub type Result<T> = std::result::Result<T, PathError>;
