//! Storage behind the replicated log.

mod file;
mod memory;

pub use file::{FileLog, FileLogConfig, SyncMode};
pub use memory::InMemoryLog;

use tokio::sync::watch;
use uuid::Uuid;

use crate::error::LogResult;
use crate::manifest::{Manifest, StateDocument};
use crate::record::{LogRecord, RecordBody};

/// A durable, append-only, totally ordered record store shared by every
/// replica of one dataset, plus two small documents kept beside it: the
/// manifest and the latest state snapshot.
///
/// All implementations must satisfy these invariants:
/// - Sequence numbers are assigned by `append`, dense, and strictly
///   increasing; every reader sees records in sequence order.
/// - `replace_state` is a compare-and-swap on the document revision.
/// - `upgrade` replaces the manifest and state document together or not at
///   all, and only if the stored manifest is still `expected`.
/// - Records before the first retained position are gone: reading from an
///   earlier position fails with [`crate::LogError::Compacted`].
/// - Transient unavailability is reported as [`crate::LogError::Backend`] or
///   [`crate::LogError::Io`], so callers can retry.
pub trait LogBackend: Send + Sync {
    /// The stored manifest, if one has been written.
    fn manifest(&self) -> LogResult<Option<Manifest>>;

    /// Store `manifest` unless one is already stored. Returns whichever is
    /// stored afterwards.
    fn initialize_manifest(&self, manifest: &Manifest) -> LogResult<Manifest>;

    /// The latest state snapshot, if any.
    fn state(&self) -> LogResult<Option<StateDocument>>;

    /// Replace the state document if its revision is `expected_revision`
    /// (`None`: only if there is none yet).
    fn replace_state(&self, expected_revision: Option<u64>, doc: &StateDocument) -> LogResult<()>;

    /// Atomically switch to `manifest`, rewriting the state document as
    /// `state` when given.
    fn upgrade(&self, expected: &Manifest, manifest: &Manifest, state: Option<&StateDocument>) -> LogResult<()>;

    /// Append one record. Returns its sequence number.
    fn append(&self, correlation: Uuid, body: RecordBody) -> LogResult<u64>;

    /// Every retained record with `seq >= position`, in order.
    fn read_from(&self, position: u64) -> LogResult<Vec<LogRecord>>;

    /// The sequence number the next append will get.
    fn head(&self) -> LogResult<u64>;

    /// Drop records before `position`. Callers only do this once a state
    /// document at or past `position` is stored.
    fn discard_before(&self, position: u64) -> LogResult<()>;

    /// Change feed: the receiver sees the head move on every append.
    fn watch(&self) -> watch::Receiver<u64>;
}
