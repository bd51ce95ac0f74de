use bosk_tree::TreeError;
use bosk_types::PathError;

/// Errors produced by drivers in the update pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    /// This driver cannot supply an initial root. A forwarding driver moves
    /// on to its next downstream; `suppressed` collects the reasons given by
    /// the ones that already declined.
    #[error("unsupported initialization: {reason}")]
    UnsupportedInitialization {
        reason: String,
        suppressed: Vec<String>,
    },

    /// The driver refuses this kind of call, e.g. writes to a read-only chain.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Convergence cannot currently be guaranteed. The caller decides whether
    /// to retry or abort; the submitted updates may still apply later.
    #[error("flush failed: {0}")]
    FlushFailure(String),

    /// The driver has been closed.
    #[error("driver is shut down")]
    Shutdown,

    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl DriverError {
    pub fn unsupported_initialization(reason: impl Into<String>) -> Self {
        Self::UnsupportedInitialization {
            reason: reason.into(),
            suppressed: Vec::new(),
        }
    }
}

/// Errors surfaced by the state container and references.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BoskError {
    /// The reference is well-formed but nothing is there in the snapshot.
    #[error("nonexistent reference: {path}")]
    NonexistentReference { path: String },

    /// A reference was resolved on a thread with no read context for its bosk.
    #[error("no read context is open for {path}")]
    OutsideReadContext { path: String },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl From<PathError> for BoskError {
    fn from(e: PathError) -> Self {
        BoskError::Tree(TreeError::Path(e))
    }
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, BoskError>;

/// Result alias for driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;
