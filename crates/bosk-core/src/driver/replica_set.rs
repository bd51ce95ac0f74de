use std::sync::{Arc, Mutex};

use bosk_tree::Node;
use bosk_types::Identifier;
use tracing::{debug, info};

use crate::bosk::BoskInfo;
use crate::error::{DriverError, DriverResult};
use crate::update::Update;

use super::{factory, BoskDriver, DriverFactory};

struct Replica {
    info: BoskInfo,
    downstream: Arc<dyn BoskDriver>,
}

/// Keeps several bosks in one process in lockstep.
///
/// Every bosk built with [`ReplicaSet::driver_factory`] joins the set. An
/// update submitted to any member is forwarded to the local driver of every
/// member, and a member that joins later starts from the state of the first
/// running member instead of its own default root.
#[derive(Clone, Default)]
pub struct ReplicaSet {
    replicas: Arc<Mutex<Vec<Replica>>>,
}

impl ReplicaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver_factory(&self) -> DriverFactory {
        let replicas = self.replicas.clone();
        factory(move |info, downstream| {
            replicas
                .lock()
                .expect("replica set lock poisoned")
                .push(Replica {
                    info: info.clone(),
                    downstream: downstream.clone(),
                });
            info!(bosk = %info.name(), instance = %info.instance_id(), "joined replica set");
            Ok(Arc::new(ReplicaDriver {
                instance: info.instance_id().clone(),
                downstream,
                replicas: replicas.clone(),
            }))
        })
    }

    /// Number of bosks currently in the set.
    pub fn len(&self) -> usize {
        self.replicas.lock().expect("replica set lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct ReplicaDriver {
    instance: Identifier,
    downstream: Arc<dyn BoskDriver>,
    replicas: Arc<Mutex<Vec<Replica>>>,
}

impl ReplicaDriver {
    fn downstreams(&self) -> Vec<Arc<dyn BoskDriver>> {
        self.replicas
            .lock()
            .expect("replica set lock poisoned")
            .iter()
            .map(|r| r.downstream.clone())
            .collect()
    }
}

impl BoskDriver for ReplicaDriver {
    fn initial_root(&self) -> DriverResult<Node> {
        let existing = self
            .replicas
            .lock()
            .expect("replica set lock poisoned")
            .iter()
            .find(|r| r.info.instance_id() != &self.instance && r.info.container().is_started())
            .map(|r| r.info.current_root());
        match existing {
            Some(root) => {
                debug!(instance = %self.instance, "initial root copied from running replica");
                Ok((*root).clone())
            }
            None => self.downstream.initial_root(),
        }
    }

    fn submit(&self, update: Update) -> DriverResult<()> {
        let downstreams = self.downstreams();
        if downstreams.is_empty() {
            return Err(DriverError::Shutdown);
        }
        for downstream in downstreams {
            downstream.submit(update.clone())?;
        }
        Ok(())
    }

    fn flush(&self) -> DriverResult<()> {
        for downstream in self.downstreams() {
            downstream.flush()?;
        }
        Ok(())
    }

    fn close(&self) {
        self.replicas
            .lock()
            .expect("replica set lock poisoned")
            .retain(|r| r.info.instance_id() != &self.instance);
        self.downstream.close();
    }
}
