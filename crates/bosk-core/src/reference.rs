//! Typed, stable handles to locations in a bosk's state tree.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use bosk_tree::{CompiledPath, Node, PathCompiler, StateValue, TreeError};
use bosk_types::{Identifier, Path, Segment};

use crate::error::{BoskError, Result};
use crate::read_context::ReadContext;

/// A typed location in one bosk's tree.
///
/// References carry no snapshot state: the same reference resolves to
/// whatever the calling thread's [`ReadContext`] pins, and may be absent in
/// one snapshot and present in the next. Two references are equal when they
/// have the same root type and path.
pub struct Reference<T> {
    bosk_id: u64,
    compiler: Arc<PathCompiler>,
    compiled: Arc<CompiledPath>,
    _value: PhantomData<fn() -> T>,
}

impl<T: StateValue> Reference<T> {
    /// Compile `path` for `T`.
    pub(crate) fn new(bosk_id: u64, compiler: Arc<PathCompiler>, path: &Path) -> Result<Self> {
        let compiled = compiler.compile_as(path, &T::kind())?;
        Ok(Self {
            bosk_id,
            compiler,
            compiled,
            _value: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        self.compiled.path()
    }

    pub(crate) fn compiled(&self) -> &Arc<CompiledPath> {
        &self.compiled
    }

    /// The value in the thread's current read context.
    ///
    /// Fails with [`BoskError::NonexistentReference`] if nothing is there and
    /// [`BoskError::OutsideReadContext`] if no context is open.
    pub fn value(&self) -> Result<T> {
        let root = self.bound_root()?;
        self.value_at(&root)
    }

    /// Like [`Reference::value`], with absence reported as `None`.
    pub fn value_if_exists(&self) -> Result<Option<T>> {
        absent_as_none(self.value())
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(self.value_if_exists()?.is_some())
    }

    /// The value in an explicitly supplied context.
    pub fn value_in(&self, context: &ReadContext) -> Result<T> {
        if context.bosk_id() != self.bosk_id {
            return Err(self.outside());
        }
        self.value_at(context.root())
    }

    pub fn value_if_exists_in(&self, context: &ReadContext) -> Result<Option<T>> {
        absent_as_none(self.value_in(context))
    }

    pub fn exists_in(&self, context: &ReadContext) -> Result<bool> {
        Ok(self.value_if_exists_in(context)?.is_some())
    }

    /// The value at this location in an arbitrary root of the same schema.
    pub fn value_at(&self, root: &Node) -> Result<T> {
        match self.compiled.get(root) {
            Ok(node) => Ok(T::from_node(node)?),
            Err(TreeError::NonexistentEntry { path }) => {
                Err(BoskError::NonexistentReference { path })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A reference one segment deeper.
    pub fn then<U: StateValue>(&self, segment: impl Into<Segment>) -> Result<Reference<U>> {
        Reference::new(self.bosk_id, self.compiler.clone(), &self.path().then(segment))
    }

    /// A reference `levels` segments closer to the root.
    pub fn truncated_by<U: StateValue>(&self, levels: usize) -> Result<Reference<U>> {
        Reference::new(
            self.bosk_id,
            self.compiler.clone(),
            &self.path().truncated_by(levels)?,
        )
    }

    /// The nearest strict ancestor whose location holds a `U`.
    pub fn enclosing<U: StateValue>(&self) -> Result<Reference<U>> {
        let kind = U::kind();
        let mut candidate = self.path().parent();
        while let Some(path) = candidate {
            let compiled = self.compiler.compile(&path)?;
            if compiled.check_kind(&kind).is_ok() {
                return Reference::new(self.bosk_id, self.compiler.clone(), &path);
            }
            candidate = path.parent();
        }
        Err(TreeError::TypeMismatch {
            path: self.path().to_string(),
            expected: format!("an enclosing {kind}"),
            actual: "none".into(),
        }
        .into())
    }

    /// Replace parameters left to right with `ids`.
    pub fn bound_to(&self, ids: &[Identifier]) -> Result<Self> {
        Reference::new(self.bosk_id, self.compiler.clone(), &self.path().bound_to(ids)?)
    }

    /// Bind this reference's parameters using the identifiers `concrete`
    /// has at the same positions. `concrete` must match this path.
    pub fn bound_by(&self, concrete: &Path) -> Result<Self> {
        let ids = concrete.parameter_values(self.path()).ok_or_else(|| {
            TreeError::MalformedPath {
                path: concrete.to_string(),
                reason: format!("does not match {}", self.path()),
            }
        })?;
        self.bound_to(&ids)
    }

    pub fn is_parameterized(&self) -> bool {
        self.path().is_parameterized()
    }

    /// The same location, read untyped.
    pub fn as_node(&self) -> Reference<Node> {
        Reference {
            bosk_id: self.bosk_id,
            compiler: self.compiler.clone(),
            compiled: self.compiled.clone(),
            _value: PhantomData,
        }
    }

    fn bound_root(&self) -> Result<Arc<Node>> {
        ReadContext::bound(self.bosk_id).ok_or_else(|| self.outside())
    }

    fn outside(&self) -> BoskError {
        BoskError::OutsideReadContext {
            path: self.path().to_string(),
        }
    }
}

fn absent_as_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(BoskError::NonexistentReference { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

impl<T> Clone for Reference<T> {
    fn clone(&self) -> Self {
        Self {
            bosk_id: self.bosk_id,
            compiler: self.compiler.clone(),
            compiled: self.compiled.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> PartialEq for Reference<T> {
    fn eq(&self, other: &Self) -> bool {
        self.compiler.schema().root_type() == other.compiler.schema().root_type()
            && self.compiled.path() == other.compiled.path()
    }
}

impl<T> Eq for Reference<T> {}

impl<T> Hash for Reference<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.compiler.schema().root_type().hash(state);
        self.compiled.path().hash(state);
    }
}

impl<T> fmt::Debug for Reference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({})", self.compiled.path())
    }
}

impl<T> fmt::Display for Reference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.compiled.path(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Target};
    use bosk_tree::Catalog;

    #[test]
    fn navigation_keeps_the_bosk() {
        let bosk = testing::bosk(&["a"]);
        let targets = bosk.reference_to::<Catalog<Target>>("/targets").unwrap();
        let a = targets.then::<Target>("a").unwrap();
        let label = a.then::<String>("label").unwrap();
        assert_eq!(label.path().to_string(), "/targets/a/label");
        assert_eq!(label.enclosing::<Target>().unwrap(), a);
        assert_eq!(label.truncated_by::<Catalog<Target>>(2).unwrap(), targets);

        let _ctx = bosk.read_context();
        assert_eq!(label.value().unwrap(), "a");
        assert_eq!(a.as_node().value().unwrap(), Target::new("a").to_node());
    }

    #[test]
    fn parameters_bind_left_to_right() {
        let bosk = testing::bosk(&["a"]);
        let scope = bosk.reference_to::<String>("/targets/-t-/label").unwrap();
        assert!(scope.is_parameterized());
        let bound = scope.bound_to(&["a".into()]).unwrap();
        assert!(!bound.is_parameterized());
        let by_path = scope
            .bound_by(&Path::parse("/targets/a/label").unwrap())
            .unwrap();
        assert_eq!(bound, by_path);
        assert!(scope.bound_by(&Path::parse("/name").unwrap()).is_err());
    }

    #[test]
    fn absence_is_not_an_error_for_exists() {
        let bosk = testing::bosk(&[]);
        let ghost = bosk.reference_to::<Target>("/targets/ghost").unwrap();
        let motd = bosk.reference_to::<String>("/motd").unwrap();
        let _ctx = bosk.read_context();
        assert!(!ghost.exists().unwrap());
        assert_eq!(motd.value_if_exists().unwrap(), None);
        assert!(matches!(
            ghost.value(),
            Err(BoskError::NonexistentReference { .. })
        ));
    }

    #[test]
    fn contexts_are_per_bosk() {
        let one = testing::bosk(&[]);
        let two = testing::bosk(&[]);
        let name = one.reference_to::<String>("/name").unwrap();
        let other = two.read_context();
        assert!(matches!(
            name.value_in(&other),
            Err(BoskError::OutsideReadContext { .. })
        ));
        assert!(matches!(
            name.value(),
            Err(BoskError::OutsideReadContext { .. })
        ));
    }

    #[test]
    fn equal_paths_are_equal_references() {
        let one = testing::bosk(&[]);
        let two = testing::bosk(&[]);
        let a = one.reference_to::<String>("/name").unwrap();
        let b = two.reference_to::<String>("/name").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "/name");
    }
}
