//! The replicated-log driver.
//!
//! Every process attached to one [`LogBackend`] runs its own bosk behind a
//! [`ReplicatedLogDriver`]. Submissions are appended to the shared log and
//! nothing else; a background subscription reads the log in order and
//! hands each update to the local driver, so every replica applies the same
//! updates in the same order.
//!
//! Startup:
//! 1. Reconcile the stored manifest with the preferred one, upgrading the
//!    stored state document's format if they differ only in format.
//! 2. Load the state document (or store the downstream's initial root as
//!    the first one) and start the subscription at its position.
//!
//! `flush` appends a barrier record and waits until the subscription has
//! applied it, then flushes downstream.

use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{JoinHandle, ThreadId};

use bosk_core::{factory, BoskDriver, BoskInfo, DriverError, DriverFactory, DriverResult, Update};
use bosk_tree::{difference, Node};
use bosk_types::Path;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::LogBackend;
use crate::error::{LogError, LogResult};
use crate::manifest::{FormatUpgrader, Manifest, StateDocument};
use crate::record::{LogRecord, RecordBody};
use crate::settings::LogDriverSettings;
use crate::status::{ManifestStatus, StateStatus, StatusReport};

#[derive(Default)]
struct Progress {
    /// Sequence number of the next record to apply.
    position: u64,
    applied_since_snapshot: u64,
    closed: bool,
}

/// A snapshot with the log suffix folded in.
struct Replayed {
    revision: u64,
    /// Position of the snapshot the replay started from.
    position: u64,
    root: Node,
}

struct Shared {
    info: BoskInfo,
    backend: Arc<dyn LogBackend>,
    downstream: Arc<dyn BoskDriver>,
    settings: LogDriverSettings,
    manifest: Manifest,
    progress: Mutex<Progress>,
    advanced: Condvar,
    /// Held by the subscription while it hands one record downstream and
    /// advances past it, so the local root and the position move together.
    applying: Mutex<()>,
    agent_thread: OnceLock<ThreadId>,
}

/// Keeps a bosk in step with every other bosk on the same log.
pub struct ReplicatedLogDriver {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    agent: Mutex<Option<JoinHandle<()>>>,
}

/// Gives access to the driver a factory built, e.g. for [`ReplicatedLogDriver::status`].
#[derive(Clone, Default)]
pub struct DriverSlot(Arc<OnceLock<Arc<ReplicatedLogDriver>>>);

impl DriverSlot {
    pub fn get(&self) -> Option<Arc<ReplicatedLogDriver>> {
        self.0.get().cloned()
    }
}

impl ReplicatedLogDriver {
    /// Reconcile manifests and build the driver. The subscription starts
    /// when the bosk asks for its initial root.
    pub fn open(
        info: &BoskInfo,
        downstream: Arc<dyn BoskDriver>,
        backend: Arc<dyn LogBackend>,
        settings: LogDriverSettings,
    ) -> DriverResult<Arc<Self>> {
        let manifest = negotiate(backend.as_ref(), &settings)?;
        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Self {
            shared: Arc::new(Shared {
                info: info.clone(),
                backend,
                downstream,
                settings,
                manifest,
                progress: Mutex::new(Progress::default()),
                advanced: Condvar::new(),
                applying: Mutex::new(()),
                agent_thread: OnceLock::new(),
            }),
            shutdown,
            agent: Mutex::new(None),
        }))
    }

    pub fn factory(backend: Arc<dyn LogBackend>, settings: LogDriverSettings) -> DriverFactory {
        Self::factory_with_slot(backend, settings).0
    }

    /// Like [`ReplicatedLogDriver::factory`], also returning a slot that
    /// holds the driver once the bosk is built.
    pub fn factory_with_slot(
        backend: Arc<dyn LogBackend>,
        settings: LogDriverSettings,
    ) -> (DriverFactory, DriverSlot) {
        let slot = DriverSlot::default();
        let filled = slot.clone();
        let f = factory(move |info, downstream| {
            let driver = ReplicatedLogDriver::open(info, downstream, backend.clone(), settings.clone())?;
            let _ = filled.0.set(driver.clone());
            Ok(driver)
        });
        (f, slot)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.shared.manifest
    }

    /// Sequence number of the next record this replica will apply.
    pub fn position(&self) -> u64 {
        self.shared.position()
    }

    /// Compare the stored manifest and the log's state with this replica's.
    ///
    /// Flushes first, so the local state covers at least everything
    /// submitted before the call. Failures are reported in the `error`
    /// field rather than returned.
    pub fn status(&self) -> StatusReport {
        let shared = &self.shared;
        let mut errors = Vec::new();
        let actual = shared.backend.manifest().unwrap_or_else(|e| {
            errors.push(e.to_string());
            None
        });
        if let Err(e) = self.flush() {
            errors.push(e.to_string());
        }
        let (position, local) = {
            let _applying = shared.applying.lock().expect("applying lock poisoned");
            if let Err(e) = shared.downstream.flush() {
                errors.push(e.to_string());
            }
            (shared.position(), shared.info.current_root())
        };
        let difference = match shared.replay(position) {
            Ok(replayed) => difference(&replayed.root, &local),
            Err(e) => {
                errors.push(e.to_string());
                bosk_tree::Difference::NoDifference
            }
        };
        StatusReport {
            error: (!errors.is_empty()).then(|| errors.join("; ")),
            manifest: ManifestStatus {
                expected: shared.manifest.clone(),
                actual,
            },
            state: StateStatus { difference },
        }
    }

    fn start_agent(&self) {
        let mut agent = self.agent.lock().expect("agent lock poisoned");
        if agent.is_some() {
            return;
        }
        let shared = self.shared.clone();
        let shutdown = self.shutdown.subscribe();
        let spawned = std::thread::Builder::new()
            .name(format!("bosk-log-{}", shared.info.name()))
            .spawn(move || run_agent(shared, shutdown));
        match spawned {
            Ok(handle) => *agent = Some(handle),
            Err(e) => error!(bosk = %self.shared.info.name(), error = %e, "cannot start log subscription"),
        }
    }

    fn on_agent_thread(&self) -> bool {
        self.shared.agent_thread.get() == Some(&std::thread::current().id())
    }
}

impl BoskDriver for ReplicatedLogDriver {
    fn initial_root(&self) -> DriverResult<Node> {
        let shared = &self.shared;
        let doc = match retry(&shared.settings, "read state", || shared.backend.state())? {
            Some(doc) => doc,
            None => {
                let root = shared.downstream.initial_root()?;
                let head = retry(&shared.settings, "read head", || shared.backend.head())?;
                let doc = StateDocument::encode(&root, shared.manifest.format, 1, head)?;
                match shared.backend.replace_state(None, &doc) {
                    Ok(()) => {
                        info!(bosk = %shared.info.name(), position = head, "stored initial state");
                        doc
                    }
                    // Another replica got there first; use theirs.
                    Err(LogError::RevisionConflict { .. }) => shared
                        .backend
                        .state()?
                        .ok_or_else(|| DriverError::FlushFailure("state document vanished".into()))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };
        let root = shared.info.schema().polyfill(&doc.decode()?);
        shared.progress.lock().expect("progress lock poisoned").position = doc.position;
        debug!(bosk = %shared.info.name(), position = doc.position, revision = doc.revision, "initial root loaded from log");
        self.start_agent();
        Ok(root)
    }

    fn submit(&self, update: Update) -> DriverResult<()> {
        let shared = &self.shared;
        if shared.progress.lock().expect("progress lock poisoned").closed {
            return Err(DriverError::Shutdown);
        }
        let correlation = Uuid::now_v7();
        let target = update.target().clone();
        let body = RecordBody::Update(update);
        let seq = retry(&shared.settings, "append update", || {
            shared.backend.append(correlation, body.clone())
        })?;
        debug!(bosk = %shared.info.name(), seq, %correlation, target = %target, "update appended");
        Ok(())
    }

    fn flush(&self) -> DriverResult<()> {
        let shared = &self.shared;
        // The subscription can't wait for itself; everything it has read is
        // already handed downstream.
        if self.on_agent_thread() {
            return shared.downstream.flush();
        }
        let correlation = Uuid::now_v7();
        let barrier = retry(&shared.settings, "append barrier", || {
            shared.backend.append(correlation, RecordBody::Barrier)
        })?;
        let timeout = shared.settings.flush_timeout();
        let progress = shared.progress.lock().expect("progress lock poisoned");
        let (progress, wait) = shared
            .advanced
            .wait_timeout_while(progress, timeout, |p| p.position <= barrier && !p.closed)
            .expect("progress lock poisoned");
        if progress.closed {
            return Err(DriverError::Shutdown);
        }
        if wait.timed_out() {
            return Err(DriverError::FlushFailure(format!(
                "barrier {barrier} ({correlation}) not observed within {timeout:?}"
            )));
        }
        drop(progress);
        shared.downstream.flush()
    }

    fn close(&self) {
        {
            let mut progress = self.shared.progress.lock().expect("progress lock poisoned");
            if progress.closed {
                return;
            }
            progress.closed = true;
        }
        self.shared.advanced.notify_all();
        self.shutdown.send_replace(true);
        let agent = self.agent.lock().expect("agent lock poisoned").take();
        if let Some(agent) = agent {
            if agent.thread().id() != std::thread::current().id() && agent.join().is_err() {
                warn!(bosk = %self.shared.info.name(), "log subscription panicked");
            }
        }
        info!(bosk = %self.shared.info.name(), "replicated log driver closed");
        self.shared.downstream.close();
    }
}

impl Drop for ReplicatedLogDriver {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl Shared {
    fn position(&self) -> u64 {
        self.progress.lock().expect("progress lock poisoned").position
    }

    /// Apply everything past our position.
    fn catch_up(&self) -> LogResult<()> {
        let position = self.position();
        let records = match retry(&self.settings, "read log", || self.backend.read_from(position)) {
            Err(LogError::Compacted { first, .. }) => {
                warn!(bosk = %self.info.name(), position, first, "fell behind compaction; reloading snapshot");
                return self.reload();
            }
            other => other?,
        };
        for record in records {
            if record.seq >= position {
                self.apply(record);
            }
        }
        self.maybe_compact();
        Ok(())
    }

    fn apply(&self, record: LogRecord) {
        let _applying = self.applying.lock().expect("applying lock poisoned");
        match record.body {
            RecordBody::Update(update) => {
                debug!(bosk = %self.info.name(), seq = record.seq, correlation = %record.correlation, "applying replicated update");
                if let Err(e) = self.downstream.submit(update) {
                    warn!(bosk = %self.info.name(), seq = record.seq, error = %e, "replicated update dropped");
                }
            }
            RecordBody::Barrier => {
                debug!(bosk = %self.info.name(), seq = record.seq, correlation = %record.correlation, "barrier observed");
            }
        }
        let mut progress = self.progress.lock().expect("progress lock poisoned");
        progress.position = record.seq + 1;
        progress.applied_since_snapshot += 1;
        drop(progress);
        self.advanced.notify_all();
    }

    /// Replace the whole local tree with the stored snapshot.
    fn reload(&self) -> LogResult<()> {
        let doc = retry(&self.settings, "read state", || self.backend.state())?
            .ok_or_else(|| LogError::Backend("log is compacted but has no state document".into()))?;
        let root = self.info.schema().polyfill(&doc.decode()?);
        let _applying = self.applying.lock().expect("applying lock poisoned");
        if let Err(e) = self.downstream.submit(Update::replacement(Path::root(), root)) {
            warn!(bosk = %self.info.name(), error = %e, "snapshot reload dropped");
        }
        let mut progress = self.progress.lock().expect("progress lock poisoned");
        progress.position = doc.position;
        progress.applied_since_snapshot = 0;
        drop(progress);
        self.advanced.notify_all();
        Ok(())
    }

    /// The tree the log describes up to (not including) `until`: the stored
    /// snapshot with later updates folded in. A snapshot already past
    /// `until` is returned as is.
    fn replay(&self, until: u64) -> LogResult<Replayed> {
        let doc = retry(&self.settings, "read state", || self.backend.state())?
            .ok_or_else(|| LogError::Backend("no state document".into()))?;
        let compiler = self.info.compiler();
        let mut root = self.info.schema().polyfill(&doc.decode()?);
        let records = retry(&self.settings, "read log", || self.backend.read_from(doc.position))?;
        for record in records.into_iter().filter(|r| r.seq < until) {
            if let RecordBody::Update(update) = record.body {
                match update.op.apply(compiler, &root) {
                    Ok(Some(next)) => root = next,
                    Ok(None) => {}
                    Err(e) => debug!(seq = record.seq, error = %e, "replay skipped failing update"),
                }
            }
        }
        Ok(Replayed {
            revision: doc.revision,
            position: doc.position,
            root,
        })
    }

    fn maybe_compact(&self) {
        let interval = self.settings.compaction_interval;
        let (position, due) = {
            let progress = self.progress.lock().expect("progress lock poisoned");
            (progress.position, interval > 0 && progress.applied_since_snapshot >= interval)
        };
        if !due {
            return;
        }
        match self.compact(position) {
            Ok(()) => info!(bosk = %self.info.name(), position, "log compacted"),
            Err(LogError::RevisionConflict { .. }) => {
                debug!(bosk = %self.info.name(), position, "another replica compacted first");
            }
            Err(e) => {
                warn!(bosk = %self.info.name(), position, error = %e, "compaction failed");
                return;
            }
        }
        self.progress.lock().expect("progress lock poisoned").applied_since_snapshot = 0;
    }

    fn compact(&self, position: u64) -> LogResult<()> {
        let replayed = self.replay(position)?;
        if position <= replayed.position {
            debug!(bosk = %self.info.name(), position, stored = replayed.position, "snapshot already covers position");
            return Ok(());
        }
        let doc = StateDocument::encode(&replayed.root, self.manifest.format, replayed.revision + 1, position)?;
        self.backend.replace_state(Some(replayed.revision), &doc)?;
        self.backend.discard_before(position)
    }
}

fn run_agent(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let _ = shared.agent_thread.set(std::thread::current().id());
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(bosk = %shared.info.name(), error = %e, "cannot build subscription runtime");
            return;
        }
    };
    let mut feed = shared.backend.watch();
    runtime.block_on(async move {
        info!(bosk = %shared.info.name(), position = shared.position(), "log subscription started");
        while !*shutdown.borrow() {
            feed.borrow_and_update();
            if let Err(e) = shared.catch_up() {
                warn!(bosk = %shared.info.name(), error = %e, "log subscription failed; resubscribing");
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(shared.settings.backoff(shared.settings.max_retries)) => {}
                }
                continue;
            }
            tokio::select! {
                _ = feed.changed() => {}
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(shared.settings.poll_interval()) => {}
            }
        }
        debug!(bosk = %shared.info.name(), "log subscription stopped");
    });
}

/// Negotiate the manifest, upgrading stored state when only its format
/// differs from ours.
fn negotiate(backend: &dyn LogBackend, settings: &LogDriverSettings) -> LogResult<Manifest> {
    let preferred = Manifest::new(settings.preferred_format);
    let stored = retry(settings, "initialize manifest", || backend.initialize_manifest(&preferred))?;
    if stored == preferred {
        return Ok(preferred);
    }
    let upgrader = FormatUpgrader::new(preferred.clone());
    if !upgrader.can_upgrade(&stored) {
        return Err(LogError::ManifestMismatch { stored, preferred });
    }
    let state = retry(settings, "read state", || backend.state())?;
    let upgraded = state
        .as_ref()
        .map(|doc| upgrader.upgrade_from(&stored, doc))
        .transpose()?;
    match backend.upgrade(&stored, &preferred, upgraded.as_ref()) {
        Ok(()) => {
            info!(from = %stored.format, to = %preferred.format, "log state format upgraded");
            Ok(preferred)
        }
        // Someone else changed the manifest meanwhile; fine if they agree.
        Err(LogError::ManifestMismatch { .. })
            if matches!(backend.manifest(), Ok(Some(ref now)) if *now == preferred) =>
        {
            Ok(preferred)
        }
        Err(e) => Err(e),
    }
}

/// Run `op`, retrying transient failures with growing backoff.
fn retry<T>(settings: &LogDriverSettings, what: &str, mut op: impl FnMut() -> LogResult<T>) -> LogResult<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_transient() && attempt < settings.max_retries => {
                let delay = settings.backoff(attempt);
                warn!(what, attempt, delay_ms = delay.as_millis() as u64, error = %e, "log backend call failed; retrying");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) if e.is_transient() => {
                error!(what, attempts = attempt + 1, error = %e, "log backend retries exhausted");
                return Err(e);
            }
            other => return other,
        }
    }
}
