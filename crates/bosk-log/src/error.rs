use std::io;

use bosk_core::DriverError;
use bosk_tree::TreeError;

use crate::manifest::Manifest;

/// Errors produced by the replicated log and its backends.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// I/O error in a file-backed log.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Encoding or decoding of a record or state document failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// CRC integrity check failed for a log frame.
    #[error("CRC integrity check failed at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    /// A compare-and-swap found a different revision than expected.
    #[error("revision conflict: expected {expected:?}, found {actual:?}")]
    RevisionConflict {
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// The stored manifest cannot be reconciled with this process's.
    #[error("manifest mismatch: stored {stored:?}, preferred {preferred:?}")]
    ManifestMismatch { stored: Manifest, preferred: Manifest },

    /// Records before `position` were compacted away; reload the state
    /// document and resume from its position.
    #[error("log compacted past position {requested} (first retained: {first})")]
    Compacted { requested: u64, first: u64 },

    /// The backend is unreachable or refused the call. Retryable.
    #[error("backend unavailable: {0}")]
    Backend(String),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl LogError {
    /// Whether waiting and trying again could help.
    pub fn is_transient(&self) -> bool {
        matches!(self, LogError::Backend(_) | LogError::Io(_))
    }
}

impl From<bincode::Error> for LogError {
    fn from(e: bincode::Error) -> Self {
        LogError::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for LogError {
    fn from(e: serde_json::Error) -> Self {
        LogError::Codec(e.to_string())
    }
}

impl From<LogError> for DriverError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::ManifestMismatch { .. } => {
                DriverError::unsupported_initialization(e.to_string())
            }
            LogError::Tree(e) => DriverError::Tree(e),
            other => DriverError::FlushFailure(other.to_string()),
        }
    }
}

/// Convenience alias used throughout the log crate.
pub type LogResult<T> = std::result::Result<T, LogError>;
