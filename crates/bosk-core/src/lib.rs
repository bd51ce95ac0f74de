//! The bosk state container.
//!
//! A [`Bosk`] holds one immutable state tree and a pipeline of drivers that
//! carries updates to it. Reads go through typed [`Reference`]s resolved
//! against the snapshot pinned by the current thread's [`ReadContext`];
//! writes are [`Update`]s submitted through a [`DriverHandle`] and applied
//! one at a time, after which registered hooks run.
//!
//! # Key Types
//!
//! - [`Bosk`] / [`BoskBuilder`] -- the container and how to assemble it
//! - [`Reference`] -- typed handle to a location in the tree
//! - [`ReadContext`] -- per-thread snapshot pin
//! - [`BoskDriver`] / [`DriverFactory`] / [`DriverStack`] -- the update pipeline
//! - [`Update`] / [`UpdateOp`] -- what flows through it

pub mod bosk;
pub mod driver;
pub mod error;
mod hooks;
pub mod read_context;
pub mod reference;
pub mod update;

#[cfg(test)]
mod testing;

pub use bosk::{Bosk, BoskBuilder, BoskInfo, DefaultRootFn};
pub use driver::{
    factory, AsyncDriver, BoskDriver, BufferingDriver, DriverFactory, DriverHandle, DriverStack,
    ForwardingDriver, JitterConfig, JitterDriver, LocalDriver, ReadOnlyDriver, ReplicaSet,
};
pub use error::{BoskError, DriverError, DriverResult, Result};
pub use read_context::ReadContext;
pub use reference::Reference;
pub use update::{Update, UpdateOp};
