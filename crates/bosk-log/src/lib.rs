//! Replicated-log driver for bosk.
//!
//! Several processes keep identical state trees by funnelling every update
//! through one shared, totally ordered log. Each process runs a
//! [`ReplicatedLogDriver`] in front of its local driver: submissions go to
//! the log, and a background subscription applies the log in order.
//!
//! Beside the records, a backend stores a [`Manifest`] naming the format of
//! its [`StateDocument`], a snapshot of the tree at some log position.
//! Late joiners start from the snapshot; periodic compaction replaces it and
//! drops the records it covers.
//!
//! # Key Types
//!
//! - [`ReplicatedLogDriver`] -- the driver and its factory
//! - [`LogBackend`] -- storage contract, with [`InMemoryLog`] and [`FileLog`]
//! - [`LogDriverSettings`] -- retry, flush, and compaction tuning
//! - [`StatusReport`] -- how one replica compares with the log

pub mod backend;
pub mod driver;
pub mod error;
pub mod manifest;
pub mod record;
pub mod settings;
pub mod status;

#[cfg(test)]
mod testing;

pub use backend::{FileLog, FileLogConfig, InMemoryLog, LogBackend, SyncMode};
pub use driver::{DriverSlot, ReplicatedLogDriver};
pub use error::{LogError, LogResult};
pub use manifest::{FormatUpgrader, Manifest, StateDocument, StateFormat, MANIFEST_VERSION};
pub use record::{LogRecord, RecordBody};
pub use settings::LogDriverSettings;
pub use status::{ManifestStatus, StateStatus, StatusReport};
