//! The update pipeline.
//!
//! Every stage implements [`BoskDriver`]. A chain is built by nesting: each
//! decorator owns its downstream driver, and the innermost driver is always
//! the bosk's [`LocalDriver`], which applies updates to the state container.
//! [`DriverFactory`] values are how applications plug stages in, and
//! [`DriverStack`] composes them.

mod asynchronous;
mod buffering;
mod forwarding;
mod jitter;
mod local;
mod read_only;
mod replica_set;

use std::sync::Arc;

use bosk_tree::{Node, StateValue};
use bosk_types::Identifier;

pub use asynchronous::AsyncDriver;
pub use buffering::BufferingDriver;
pub use forwarding::ForwardingDriver;
pub use jitter::{JitterConfig, JitterDriver};
pub use local::LocalDriver;
pub use read_only::ReadOnlyDriver;
pub use replica_set::ReplicaSet;

use crate::bosk::BoskInfo;
use crate::error::{DriverResult, Result};
use crate::reference::Reference;
use crate::update::{Update, UpdateOp};

/// One stage of the update pipeline.
pub trait BoskDriver: Send + Sync {
    /// Produce the bosk's first root, or fail with
    /// [`crate::DriverError::UnsupportedInitialization`] so an enclosing
    /// driver can try elsewhere.
    fn initial_root(&self) -> DriverResult<Node>;

    /// Hand `update` on without waiting for it to apply. Order relative to
    /// other submissions on the same chain is preserved.
    fn submit(&self, update: Update) -> DriverResult<()>;

    /// Block until every update submitted so far through this driver has
    /// been applied to the local state.
    fn flush(&self) -> DriverResult<()>;

    /// Stop any background work. Further calls may fail with
    /// [`crate::DriverError::Shutdown`].
    fn close(&self) {}
}

/// Builds one driver given the bosk and the driver it should forward to.
pub type DriverFactory =
    Arc<dyn Fn(&BoskInfo, Arc<dyn BoskDriver>) -> DriverResult<Arc<dyn BoskDriver>> + Send + Sync>;

/// Wrap a closure as a [`DriverFactory`].
pub fn factory<F>(f: F) -> DriverFactory
where
    F: Fn(&BoskInfo, Arc<dyn BoskDriver>) -> DriverResult<Arc<dyn BoskDriver>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Composition of driver factories.
pub struct DriverStack;

impl DriverStack {
    /// Just the local driver.
    pub fn local() -> DriverFactory {
        factory(|_, downstream| Ok(downstream))
    }

    /// Compose `factories`, first one outermost.
    pub fn of(factories: impl IntoIterator<Item = DriverFactory>) -> DriverFactory {
        let factories: Vec<DriverFactory> = factories.into_iter().collect();
        factory(move |info, downstream| {
            factories
                .iter()
                .rev()
                .try_fold(downstream, |downstream, f| f(info, downstream))
        })
    }
}

/// Typed front end to a bosk's driver chain.
///
/// The typed submit methods check what can be checked without the current
/// state and fail synchronously: unbound parameters, values that don't fit
/// the schema, entity ids that disagree with their key, and deletion of
/// required fields. Everything else is decided when the update applies.
#[derive(Clone)]
pub struct DriverHandle {
    driver: Arc<dyn BoskDriver>,
}

impl DriverHandle {
    pub(crate) fn new(driver: Arc<dyn BoskDriver>) -> Self {
        Self { driver }
    }

    pub fn submit_replacement<T: StateValue>(&self, target: &Reference<T>, value: &T) -> Result<()> {
        let value = value.to_node();
        target.compiled().check_value(&value)?;
        self.submit(Update::new(UpdateOp::Replacement {
            target: target.path().clone(),
            value,
        }))
    }

    pub fn submit_conditional_replacement<T: StateValue>(
        &self,
        target: &Reference<T>,
        value: &T,
        precondition: &Reference<Identifier>,
        required: &Identifier,
    ) -> Result<()> {
        let value = value.to_node();
        target.compiled().check_value(&value)?;
        self.submit(Update::new(UpdateOp::ConditionalReplacement {
            target: target.path().clone(),
            value,
            precondition: concrete(precondition)?,
            required: required.clone(),
        }))
    }

    pub fn submit_initialization<T: StateValue>(&self, target: &Reference<T>, value: &T) -> Result<()> {
        let value = value.to_node();
        target.compiled().check_value(&value)?;
        self.submit(Update::new(UpdateOp::Initialization {
            target: target.path().clone(),
            value,
        }))
    }

    pub fn submit_deletion<T: StateValue>(&self, target: &Reference<T>) -> Result<()> {
        target.compiled().check_deletable()?;
        self.submit(Update::new(UpdateOp::Deletion {
            target: target.path().clone(),
        }))
    }

    pub fn submit_conditional_deletion<T: StateValue>(
        &self,
        target: &Reference<T>,
        precondition: &Reference<Identifier>,
        required: &Identifier,
    ) -> Result<()> {
        target.compiled().check_deletable()?;
        self.submit(Update::new(UpdateOp::ConditionalDeletion {
            target: target.path().clone(),
            precondition: concrete(precondition)?,
            required: required.clone(),
        }))
    }

    /// Submit a prepared update as is.
    pub fn submit(&self, update: Update) -> Result<()> {
        Ok(self.driver.submit(update)?)
    }

    /// Wait until everything submitted so far is applied locally.
    pub fn flush(&self) -> Result<()> {
        Ok(self.driver.flush()?)
    }

    pub fn driver(&self) -> &Arc<dyn BoskDriver> {
        &self.driver
    }
}

fn concrete(reference: &Reference<Identifier>) -> Result<bosk_types::Path> {
    if reference.is_parameterized() {
        return Err(bosk_tree::TreeError::MalformedPath {
            path: reference.path().to_string(),
            reason: "precondition has unbound parameters".into(),
        }
        .into());
    }
    Ok(reference.path().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::sync::Mutex;

    /// Records the order in which factories wrap each other.
    fn tagging(tag: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> DriverFactory {
        factory(move |_, downstream| {
            log.lock().unwrap().push(tag);
            Ok(downstream)
        })
    }

    #[test]
    fn stack_builds_innermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = DriverStack::of([tagging("outer", log.clone()), tagging("inner", log.clone())]);
        let _bosk = testing::bosk_with(stack);
        assert_eq!(*log.lock().unwrap(), vec!["inner", "outer"]);
    }
}
