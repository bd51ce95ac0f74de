use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::error::{LogError, LogResult};
use crate::manifest::{Manifest, StateDocument};
use crate::record::{LogRecord, RecordBody};

use super::LogBackend;

#[derive(Default)]
struct Stored {
    manifest: Option<Manifest>,
    state: Option<StateDocument>,
    /// Sequence number of `records[0]`.
    first: u64,
    records: VecDeque<LogRecord>,
}

impl Stored {
    fn head(&self) -> u64 {
        self.first + self.records.len() as u64
    }
}

/// In-memory log shared by every replica in one process.
///
/// Intended for tests and embedding. [`InMemoryLog::fail_next`] makes the
/// next calls report the backend as unavailable, for exercising retries.
pub struct InMemoryLog {
    stored: Mutex<Stored>,
    head: watch::Sender<u64>,
    failures: AtomicU32,
}

impl InMemoryLog {
    pub fn new() -> Self {
        let (head, _) = watch::channel(0);
        Self {
            stored: Mutex::new(Stored::default()),
            head,
            failures: AtomicU32::new(0),
        }
    }

    /// Make the next `count` backend calls fail with [`LogError::Backend`].
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.stored.lock().expect("log lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn available(&self) -> LogResult<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(LogError::Backend("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBackend for InMemoryLog {
    fn manifest(&self) -> LogResult<Option<Manifest>> {
        self.available()?;
        Ok(self.stored.lock().expect("log lock poisoned").manifest.clone())
    }

    fn initialize_manifest(&self, manifest: &Manifest) -> LogResult<Manifest> {
        self.available()?;
        let mut stored = self.stored.lock().expect("log lock poisoned");
        Ok(stored.manifest.get_or_insert_with(|| manifest.clone()).clone())
    }

    fn state(&self) -> LogResult<Option<StateDocument>> {
        self.available()?;
        Ok(self.stored.lock().expect("log lock poisoned").state.clone())
    }

    fn replace_state(&self, expected_revision: Option<u64>, doc: &StateDocument) -> LogResult<()> {
        self.available()?;
        let mut stored = self.stored.lock().expect("log lock poisoned");
        let actual = stored.state.as_ref().map(|s| s.revision);
        if actual != expected_revision {
            return Err(LogError::RevisionConflict {
                expected: expected_revision,
                actual,
            });
        }
        stored.state = Some(doc.clone());
        Ok(())
    }

    fn upgrade(&self, expected: &Manifest, manifest: &Manifest, state: Option<&StateDocument>) -> LogResult<()> {
        self.available()?;
        let mut stored = self.stored.lock().expect("log lock poisoned");
        if stored.manifest.as_ref() != Some(expected) {
            return Err(LogError::ManifestMismatch {
                stored: stored.manifest.clone().unwrap_or_else(|| expected.clone()),
                preferred: manifest.clone(),
            });
        }
        stored.manifest = Some(manifest.clone());
        if let Some(state) = state {
            stored.state = Some(state.clone());
        }
        Ok(())
    }

    fn append(&self, correlation: Uuid, body: RecordBody) -> LogResult<u64> {
        self.available()?;
        let mut stored = self.stored.lock().expect("log lock poisoned");
        let seq = stored.head();
        stored.records.push_back(LogRecord {
            seq,
            correlation,
            body,
        });
        drop(stored);
        self.head.send_replace(seq + 1);
        debug!(seq, %correlation, "log append");
        Ok(seq)
    }

    fn read_from(&self, position: u64) -> LogResult<Vec<LogRecord>> {
        self.available()?;
        let stored = self.stored.lock().expect("log lock poisoned");
        if position < stored.first {
            return Err(LogError::Compacted {
                requested: position,
                first: stored.first,
            });
        }
        let skip = (position - stored.first) as usize;
        Ok(stored.records.iter().skip(skip).cloned().collect())
    }

    fn head(&self) -> LogResult<u64> {
        self.available()?;
        Ok(self.stored.lock().expect("log lock poisoned").head())
    }

    fn discard_before(&self, position: u64) -> LogResult<()> {
        self.available()?;
        let mut stored = self.stored.lock().expect("log lock poisoned");
        let position = position.min(stored.head());
        while stored.first < position {
            stored.records.pop_front();
            stored.first += 1;
        }
        Ok(())
    }

    fn watch(&self) -> watch::Receiver<u64> {
        self.head.subscribe()
    }
}

impl std::fmt::Debug for InMemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stored = self.stored.lock().expect("log lock poisoned");
        f.debug_struct("InMemoryLog")
            .field("first", &stored.first)
            .field("head", &stored.head())
            .finish()
    }
}
