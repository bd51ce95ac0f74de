use std::sync::Arc;

use bosk_types::{Identifier, Path};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::catalog::Catalog;

/// An immutable ordered set of identifiers denoting membership in the
/// [`Catalog`] found at `domain`.
///
/// A listing never owns or copies entity values. An id whose entity has been
/// removed from the domain catalog stays listed but is "dangling": it is
/// enumerable through [`Listing::ids`] and absent through [`Listing::values_in`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Listing {
    domain: Path,
    ids: Arc<IndexSet<Identifier>>,
}

impl Listing {
    /// An empty listing over the catalog at `domain`.
    pub fn empty(domain: Path) -> Self {
        Self {
            domain,
            ids: Arc::new(IndexSet::new()),
        }
    }

    /// A listing containing `ids`, in order.
    pub fn of(domain: Path, ids: impl IntoIterator<Item = Identifier>) -> Self {
        Self {
            domain,
            ids: Arc::new(ids.into_iter().collect()),
        }
    }

    /// Path of the catalog this listing refers into.
    pub fn domain(&self) -> &Path {
        &self.domain
    }

    /// Number of listed ids, dangling ones included.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns `true` if `id` is listed, whether or not it dangles.
    pub fn contains(&self, id: &Identifier) -> bool {
        self.ids.contains(id)
    }

    /// Listed ids in order, dangling ones included.
    pub fn ids(&self) -> impl Iterator<Item = &Identifier> {
        self.ids.iter()
    }

    /// Add `id` at the end. A no-op if already listed.
    pub fn with_id(&self, id: Identifier) -> Self {
        if self.ids.contains(&id) {
            return self.clone();
        }
        let mut ids = (*self.ids).clone();
        ids.insert(id);
        Self {
            domain: self.domain.clone(),
            ids: Arc::new(ids),
        }
    }

    /// Remove `id`. A no-op if not listed.
    pub fn without_id(&self, id: &Identifier) -> Self {
        if !self.ids.contains(id) {
            return self.clone();
        }
        let mut ids = (*self.ids).clone();
        ids.shift_remove(id);
        Self {
            domain: self.domain.clone(),
            ids: Arc::new(ids),
        }
    }

    /// Returns `true` if `id` is listed but missing from `catalog`.
    pub fn is_dangling<E>(&self, id: &Identifier, catalog: &Catalog<E>) -> bool {
        self.contains(id) && !catalog.contains(id)
    }

    /// The listed entities that currently exist in `catalog`, in listing order.
    pub fn values_in<'a, E>(&'a self, catalog: &'a Catalog<E>) -> impl Iterator<Item = &'a E> + 'a {
        self.ids.iter().filter_map(move |id| catalog.get(id))
    }
}

impl PartialEq for Listing {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain && self.ids.iter().eq(other.ids.iter())
    }
}

impl Eq for Listing {}
