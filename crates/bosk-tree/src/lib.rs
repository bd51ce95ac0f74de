//! State tree model for bosk.
//!
//! A state tree is an immutable [`Node`] whose shape is described by an
//! explicit [`Schema`]. Trees are never modified in place: every change
//! produces a new root that shares untouched subtrees with the old one.
//!
//! # Key Types
//!
//! - [`Catalog`], [`Listing`], [`SideTable`] -- persistent, insertion-ordered containers
//! - [`Node`] / [`StructNode`] -- the dynamic value model
//! - [`Schema`] / [`StructDef`] / [`FieldType`] -- the schema registry
//! - [`StateValue`] / [`Kind`] -- typed views over nodes
//! - [`PathCompiler`] / [`CompiledPath`] -- cached get/with/without accessors
//! - [`Difference`] -- where two trees first disagree
//!
//! # Design Rules
//!
//! 1. A path either compiles against a schema or fails with `MalformedPath`;
//!    a compiled path never fails with a schema error at runtime.
//! 2. "Well-formed but absent" is always `NonexistentEntry`, never a null.
//! 3. Listings and side tables refer to catalog entries by id only; ids whose
//!    entity is gone are dangling and read as absent.

pub mod compiler;
pub mod containers;
pub mod diff;
pub mod error;
pub mod node;
pub mod schema;
pub mod value;

pub use compiler::{CompiledPath, PathCompiler};
pub use containers::{Catalog, Entity, Listing, SideTable};
pub use diff::{difference, Difference};
pub use error::{Result, TreeError};
pub use node::{Node, StructNode};
pub use schema::{FieldDef, FieldType, Presence, Schema, SchemaBuilder, StructDef};
pub use value::{Kind, StateValue};
