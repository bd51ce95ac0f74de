//! Persistent, structurally-shared collections used as tree nodes.

pub mod catalog;
pub mod listing;
pub mod side_table;

pub use catalog::{Catalog, Entity};
pub use listing::Listing;
pub use side_table::SideTable;
