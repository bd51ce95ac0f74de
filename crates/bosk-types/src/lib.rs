//! Foundation types for bosk.
//!
//! This crate provides the addressing primitives shared by every other bosk
//! crate. None of these types know anything about a particular state tree;
//! they are plain immutable values.
//!
//! # Key Types
//!
//! - [`Identifier`] -- Opaque key naming an entity within its container
//! - [`Path`] / [`Segment`] -- Ordered sequence of segments, some of which may be parameters
//! - [`DiagnosticContext`] -- Opaque attribute map propagated alongside updates

pub mod diagnostics;
pub mod error;
pub mod identifier;
pub mod path;

pub use diagnostics::{DiagnosticContext, DiagnosticScope};
pub use error::PathError;
pub use identifier::Identifier;
pub use path::{Path, Segment};
