use std::sync::Arc;

use bosk_types::{Identifier, Path};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::catalog::Catalog;

/// An immutable mapping from the identifiers of entities in the [`Catalog`]
/// at `domain` to arbitrary values.
///
/// Like a [`Listing`](super::listing::Listing), a side table refers to
/// entities by id only. A key whose entity no longer exists dangles.
#[derive(Debug, Serialize, Deserialize)]
pub struct SideTable<V> {
    domain: Path,
    entries: Arc<IndexMap<Identifier, Arc<V>>>,
}

impl<V> Clone for SideTable<V> {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<V> SideTable<V> {
    /// A table keyed by entities of the catalog at `domain`, with no entries.
    pub fn empty(domain: Path) -> Self {
        Self {
            domain,
            entries: Arc::new(IndexMap::new()),
        }
    }

    /// A table over `domain` holding `entries` in iteration order.
    pub fn of(domain: Path, entries: impl IntoIterator<Item = (Identifier, V)>) -> Self {
        Self {
            domain,
            entries: Arc::new(entries.into_iter().map(|(k, v)| (k, Arc::new(v))).collect()),
        }
    }

    /// Path of the catalog whose ids key this table.
    pub fn domain(&self) -> &Path {
        &self.domain
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Identifier) -> Option<&V> {
        self.entries.get(key).map(Arc::as_ref)
    }

    pub fn contains_key(&self, key: &Identifier) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Identifier> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &V)> {
        self.entries.iter().map(|(k, v)| (k, v.as_ref()))
    }

    /// Insert or replace the value for `key`.
    pub fn with(&self, key: Identifier, value: V) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(key, Arc::new(value));
        Self {
            domain: self.domain.clone(),
            entries: Arc::new(entries),
        }
    }

    /// Remove `key`. A no-op if absent.
    pub fn without(&self, key: &Identifier) -> Self {
        if !self.entries.contains_key(key) {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        entries.shift_remove(key);
        Self {
            domain: self.domain.clone(),
            entries: Arc::new(entries),
        }
    }

    /// Returns `true` if `key` has a value but no entity in `catalog`.
    pub fn is_dangling<E>(&self, key: &Identifier, catalog: &Catalog<E>) -> bool {
        self.contains_key(key) && !catalog.contains(key)
    }

    /// `(entity, value)` pairs for keys that currently exist in `catalog`.
    pub fn value_entries_in<'a, E>(
        &'a self,
        catalog: &'a Catalog<E>,
    ) -> impl Iterator<Item = (&'a E, &'a V)> + 'a {
        self.entries
            .iter()
            .filter_map(move |(k, v)| catalog.get(k).map(|e| (e, v.as_ref())))
    }

    /// Build a new table by converting every value.
    pub fn map<T>(&self, mut f: impl FnMut(&V) -> T) -> SideTable<T> {
        let entries = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), Arc::new(f(v))))
            .collect();
        SideTable {
            domain: self.domain.clone(),
            entries: Arc::new(entries),
        }
    }

    /// Like [`SideTable::map`], stopping at the first error.
    pub fn try_map<F, T, Err>(&self, mut f: F) -> Result<SideTable<T>, Err>
    where
        F: FnMut(&V) -> Result<T, Err>,
    {
        let mut entries = IndexMap::with_capacity(self.entries.len());
        for (k, v) in self.entries.iter() {
            entries.insert(k.clone(), Arc::new(f(v)?));
        }
        Ok(SideTable {
            domain: self.domain.clone(),
            entries: Arc::new(entries),
        })
    }
}

impl<V: PartialEq> PartialEq for SideTable<V> {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain
            && self.len() == other.len()
            && self.iter().eq(other.iter())
    }
}

impl<V: Eq> Eq for SideTable<V> {}
