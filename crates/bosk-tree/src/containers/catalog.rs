use std::sync::Arc;

use bosk_types::Identifier;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Anything that can live in a [`Catalog`]: a value that knows its own id.
pub trait Entity {
    fn id(&self) -> &Identifier;
}

/// An immutable, insertion-ordered mapping from [`Identifier`] to entity.
///
/// Every key equals the identifier of its value. Modifying operations return
/// a new catalog; unchanged entries are shared with the original through
/// `Arc`s, so copies are proportional to the number of entries, never to the
/// size of the entities.
#[derive(Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog<E> {
    entries: Arc<IndexMap<Identifier, Arc<E>>>,
}

impl<E> Clone for Catalog<E> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<E> Catalog<E> {
    /// An empty catalog.
    pub fn empty() -> Self {
        Self {
            entries: Arc::new(IndexMap::new()),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry.
    pub fn get(&self, id: &Identifier) -> Option<&E> {
        self.entries.get(id).map(Arc::as_ref)
    }

    /// Returns `true` if `id` is present.
    pub fn contains(&self, id: &Identifier) -> bool {
        self.entries.contains_key(id)
    }

    /// Identifiers in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &Identifier> {
        self.entries.keys()
    }

    /// Entities in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &E> {
        self.entries.values().map(Arc::as_ref)
    }

    /// `(id, entity)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &E)> {
        self.entries.iter().map(|(k, v)| (k, v.as_ref()))
    }

    /// Insert or replace the entry stored under `id`.
    ///
    /// The caller guarantees `id` is the entity's own identifier. A replaced
    /// entry keeps its position; a new entry goes last.
    pub fn with_entry(&self, id: Identifier, entity: E) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(id, Arc::new(entity));
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Remove `id`, preserving the order of the remaining entries.
    ///
    /// Returns an identical catalog if `id` is absent.
    pub fn without(&self, id: &Identifier) -> Self {
        if !self.entries.contains_key(id) {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        entries.shift_remove(id);
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Build a new catalog by converting every entity.
    pub fn map<T>(&self, mut f: impl FnMut(&E) -> T) -> Catalog<T> {
        let entries = self
            .entries
            .iter()
            .map(|(id, entity)| (id.clone(), Arc::new(f(entity))))
            .collect();
        Catalog {
            entries: Arc::new(entries),
        }
    }

    /// Like [`Catalog::map`], stopping at the first error.
    pub fn try_map<F, T, Err>(&self, mut f: F) -> Result<Catalog<T>, Err>
    where
        F: FnMut(&E) -> Result<T, Err>,
    {
        let mut entries = IndexMap::with_capacity(self.entries.len());
        for (id, entity) in self.entries.iter() {
            entries.insert(id.clone(), Arc::new(f(entity)?));
        }
        Ok(Catalog {
            entries: Arc::new(entries),
        })
    }

    /// Returns `true` if both catalogs share the same storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl<E: Entity> Catalog<E> {
    /// Build a catalog from entities, in order. Later duplicates replace
    /// earlier ones.
    pub fn of(entities: impl IntoIterator<Item = E>) -> Self {
        let entries = entities
            .into_iter()
            .map(|e| (e.id().clone(), Arc::new(e)))
            .collect();
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Insert or replace an entity under its own id.
    pub fn with(&self, entity: E) -> Self {
        self.with_entry(entity.id().clone(), entity)
    }
}

/// Order-sensitive: two catalogs with the same entries in a different order
/// are different trees.
impl<E: PartialEq> PartialEq for Catalog<E> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.len() == other.len() && self.iter().eq(other.iter()))
    }
}

impl<E: Eq> Eq for Catalog<E> {}

impl<E> Default for Catalog<E> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct Target {
        id: Identifier,
        label: String,
    }

    impl Entity for Target {
        fn id(&self) -> &Identifier {
            &self.id
        }
    }

    fn target(id: &str) -> Target {
        Target {
            id: id.into(),
            label: format!("label {id}"),
        }
    }

    #[test]
    fn insertion_order_is_preserved() {
        let catalog = Catalog::of([target("c"), target("a"), target("b")]);
        let ids: Vec<_> = catalog.ids().map(Identifier::as_str).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn with_returns_new_catalog() {
        let before = Catalog::of([target("a")]);
        let after = before.with(target("b"));
        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
        assert!(after.contains(&"b".into()));
        assert!(!before.contains(&"b".into()));
    }

    #[test]
    fn replacement_keeps_position() {
        let catalog = Catalog::of([target("a"), target("b")]);
        let replaced = catalog.with(Target {
            id: "a".into(),
            label: "new".into(),
        });
        let ids: Vec<_> = replaced.ids().map(Identifier::as_str).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(replaced.get(&"a".into()).unwrap().label, "new");
    }

    #[test]
    fn without_is_idempotent() {
        let catalog = Catalog::of([target("a"), target("b"), target("c")]);
        let once = catalog.without(&"b".into());
        let twice = once.without(&"b".into());
        assert_eq!(once, twice);
        assert!(once.ptr_eq(&twice));
        let ids: Vec<_> = once.ids().map(Identifier::as_str).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn unchanged_entries_are_shared() {
        let before = Catalog::of([target("a")]);
        let after = before.with(target("b"));
        let a_before = before.entries.get(&Identifier::from("a")).unwrap();
        let a_after = after.entries.get(&Identifier::from("a")).unwrap();
        assert!(Arc::ptr_eq(a_before, a_after));
    }

    #[test]
    fn serde_preserves_order() {
        let catalog = Catalog::of([target("z"), target("a")]);
        let json = serde_json::to_string(&catalog).unwrap();
        let back: Catalog<Target> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, catalog);
        let ids: Vec<_> = back.ids().map(Identifier::as_str).collect();
        assert_eq!(ids, vec!["z", "a"]);
    }
}
