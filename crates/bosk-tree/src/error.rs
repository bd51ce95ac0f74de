use bosk_types::PathError;
use thiserror::Error;

/// Errors raised while compiling paths or navigating a state tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
    /// The path does not name a chain of navigable fields and entries.
    #[error("malformed path {path}: {reason}")]
    MalformedPath { path: String, reason: String },

    /// The requested value type does not match the schema at the path.
    #[error("type mismatch at {path}: expected {expected}, schema has {actual}")]
    TypeMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// The path is well-formed but nothing is currently there.
    #[error("nonexistent entry: {path}")]
    NonexistentEntry { path: String },

    /// The operation is not permitted on this part of the tree.
    #[error("illegal operation on {path}: {reason}")]
    IllegalOperation { path: String, reason: String },

    /// A node does not have the shape the schema requires.
    #[error("invalid node at {path}: {reason}")]
    InvalidNode { path: String, reason: String },

    /// A node could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The schema definition itself is inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error(transparent)]
    Path(#[from] PathError),
}

impl TreeError {
    pub(crate) fn malformed(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::MalformedPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn nonexistent(path: impl ToString) -> Self {
        Self::NonexistentEntry {
            path: path.to_string(),
        }
    }

    pub(crate) fn illegal(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::IllegalOperation {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidNode {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for [`TreeError::NonexistentEntry`].
    pub fn is_nonexistent(&self) -> bool {
        matches!(self, Self::NonexistentEntry { .. })
    }
}

/// Convenience alias used throughout the tree crate.
pub type Result<T> = std::result::Result<T, TreeError>;
