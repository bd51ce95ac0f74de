use std::sync::Arc;

use bosk_tree::Node;

use crate::error::{DriverError, DriverResult};
use crate::update::Update;

use super::{factory, BoskDriver, DriverFactory};

/// Rejects every submission. Initialization and flushes pass through.
pub struct ReadOnlyDriver {
    downstream: Arc<dyn BoskDriver>,
}

impl ReadOnlyDriver {
    pub fn new(downstream: Arc<dyn BoskDriver>) -> Self {
        Self { downstream }
    }

    pub fn factory() -> DriverFactory {
        factory(|_, downstream| Ok(Arc::new(ReadOnlyDriver::new(downstream))))
    }
}

impl BoskDriver for ReadOnlyDriver {
    fn initial_root(&self) -> DriverResult<Node> {
        self.downstream.initial_root()
    }

    fn submit(&self, update: Update) -> DriverResult<()> {
        Err(DriverError::UnsupportedOperation(format!(
            "{} of {} on a read-only bosk",
            update.op.name(),
            update.target()
        )))
    }

    fn flush(&self) -> DriverResult<()> {
        self.downstream.flush()
    }

    fn close(&self) {
        self.downstream.close();
    }
}
