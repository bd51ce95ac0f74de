use std::sync::Arc;

use bosk_tree::Node;

use crate::bosk::{DefaultRootFn, StateContainer};
use crate::error::{DriverError, DriverResult};
use crate::update::Update;

use super::BoskDriver;

/// The terminal driver: applies updates to its bosk's state container.
pub struct LocalDriver {
    container: Arc<StateContainer>,
    default_root: Option<DefaultRootFn>,
}

impl LocalDriver {
    pub(crate) fn new(container: Arc<StateContainer>, default_root: Option<DefaultRootFn>) -> Self {
        Self {
            container,
            default_root,
        }
    }
}

impl BoskDriver for LocalDriver {
    fn initial_root(&self) -> DriverResult<Node> {
        match &self.default_root {
            Some(f) => Ok(f(self.container.schema())),
            None => Err(DriverError::unsupported_initialization(
                "no default root function was supplied",
            )),
        }
    }

    fn submit(&self, update: Update) -> DriverResult<()> {
        self.container.submit(update);
        Ok(())
    }

    fn flush(&self) -> DriverResult<()> {
        self.container.wait_idle();
        Ok(())
    }
}
