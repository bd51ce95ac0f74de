//! The path compiler.
//!
//! [`PathCompiler::compile`] resolves a [`Path`] against a [`Schema`] once,
//! producing a [`CompiledPath`]: a list of navigation steps plus the schema
//! type found at the end. The compiled path then serves `get`, `with`, and
//! `without` against any tree of that schema without consulting the schema
//! again. Compiled paths are cached per compiler, and there is one compiler
//! per schema.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bosk_types::{Identifier, Path, Segment};
use tracing::debug;

use crate::error::{Result, TreeError};
use crate::node::Node;
use crate::schema::{FieldType, Schema};
use crate::value::Kind;

/// Compiles and caches accessors for one schema.
#[derive(Debug)]
pub struct PathCompiler {
    schema: Arc<Schema>,
    cache: RwLock<HashMap<Path, Arc<CompiledPath>>>,
}

impl PathCompiler {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Compile `path`, or return the cached result of an earlier compilation.
    ///
    /// Fails with [`TreeError::MalformedPath`] if a segment does not name a
    /// field or container entry.
    pub fn compile(&self, path: &Path) -> Result<Arc<CompiledPath>> {
        if let Some(hit) = self
            .cache
            .read()
            .expect("path cache lock poisoned")
            .get(path)
        {
            return Ok(hit.clone());
        }

        debug!(path = %path, "compiling path");
        let compiled = Arc::new(self.build(path)?);
        let mut cache = self.cache.write().expect("path cache lock poisoned");
        Ok(cache.entry(path.clone()).or_insert(compiled).clone())
    }

    /// Compile `path` and check that values of `kind` belong there.
    ///
    /// Fails with [`TreeError::TypeMismatch`] if they do not.
    pub fn compile_as(&self, path: &Path, kind: &Kind) -> Result<Arc<CompiledPath>> {
        let compiled = self.compile(path)?;
        compiled.check_kind(kind)?;
        Ok(compiled)
    }

    /// Number of cached compilations.
    pub fn cached(&self) -> usize {
        self.cache.read().expect("path cache lock poisoned").len()
    }

    fn build(&self, path: &Path) -> Result<CompiledPath> {
        let mut steps = Vec::with_capacity(path.len());
        let mut ty = self.schema.root_field_type();
        for (i, segment) in path.segments().iter().enumerate() {
            let (step, next) = match &ty {
                FieldType::Struct(type_name) => {
                    let Segment::Name(field) = segment else {
                        return Err(TreeError::malformed(
                            path,
                            format!("parameter at segment {i} where a field of {type_name} is expected"),
                        ));
                    };
                    let def = self.schema.require_struct(type_name)?;
                    let field_def = def.get(field).ok_or_else(|| {
                        TreeError::malformed(path, format!("{type_name} has no field {field:?}"))
                    })?;
                    let step = Step::Field {
                        name: field.clone(),
                        deletable: field_def.presence.is_deletable(),
                    };
                    (step, field_def.ty.clone())
                }
                FieldType::Catalog(entity) => (
                    Step::Entry {
                        key: segment.clone(),
                        container: Container::Catalog,
                    },
                    FieldType::Struct(entity.clone()),
                ),
                FieldType::Listing { domain } => {
                    if i + 1 != path.len() {
                        return Err(TreeError::malformed(
                            path,
                            "a listing entry must be the last segment",
                        ));
                    }
                    let domain = self.compile(domain)?;
                    let FieldType::Catalog(entity) = domain.target_type() else {
                        return Err(TreeError::malformed(path, "listing domain is not a catalog"));
                    };
                    let entity = FieldType::Struct(entity.clone());
                    let step = Step::Entry {
                        key: segment.clone(),
                        container: Container::Listing { domain },
                    };
                    (step, entity)
                }
                FieldType::SideTable { domain, value } => {
                    let domain = self.compile(domain)?;
                    let step = Step::Entry {
                        key: segment.clone(),
                        container: Container::SideTable { domain },
                    };
                    (step, (**value).clone())
                }
                other => {
                    return Err(TreeError::malformed(
                        path,
                        format!("cannot navigate into a {other} at segment {i}"),
                    ))
                }
            };
            if let Step::Entry {
                key: Segment::Name(name),
                ..
            } = &step
            {
                Identifier::new(name.as_str())?;
            }
            steps.push(step);
            ty = next;
        }

        Ok(CompiledPath {
            path: path.clone(),
            schema: self.schema.clone(),
            steps,
            target: ty,
        })
    }
}

#[derive(Debug)]
enum Container {
    Catalog,
    Listing { domain: Arc<CompiledPath> },
    SideTable { domain: Arc<CompiledPath> },
}

#[derive(Debug)]
enum Step {
    Field { name: String, deletable: bool },
    Entry { key: Segment, container: Container },
}

/// An executable accessor for one path.
#[derive(Debug)]
pub struct CompiledPath {
    path: Path,
    schema: Arc<Schema>,
    steps: Vec<Step>,
    target: FieldType,
}

impl CompiledPath {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The schema type at the end of the path.
    pub fn target_type(&self) -> &FieldType {
        &self.target
    }

    pub fn check_kind(&self, kind: &Kind) -> Result<()> {
        if kind.accepts(&self.target) {
            Ok(())
        } else {
            Err(TreeError::TypeMismatch {
                path: self.path.to_string(),
                expected: kind.to_string(),
                actual: self.target.to_string(),
            })
        }
    }

    /// The node at this path.
    ///
    /// An absent optional field, a missing entry, and a dangling listing or
    /// side table id all yield [`TreeError::NonexistentEntry`]. A listing
    /// entry resolves to the entity in the listing's domain catalog.
    pub fn get<'a>(&self, root: &'a Node) -> Result<&'a Node> {
        self.require_bound()?;
        let mut node = root;
        for step in &self.steps {
            node = match step {
                Step::Field { name, .. } => node
                    .as_struct()
                    .map_err(|e| self.relocate(e))?
                    .get(name)
                    .ok_or_else(|| self.nonexistent())?,
                Step::Entry { key, container } => {
                    let id = entry_id(key);
                    match container {
                        Container::Catalog => node
                            .as_catalog()
                            .map_err(|e| self.relocate(e))?
                            .get(&id)
                            .ok_or_else(|| self.nonexistent())?,
                        Container::Listing { domain } => {
                            let listing = node.as_listing().map_err(|e| self.relocate(e))?;
                            if !listing.contains(&id) {
                                return Err(self.nonexistent());
                            }
                            self.domain_catalog(domain, root)?
                                .get(&id)
                                .ok_or_else(|| self.nonexistent())?
                        }
                        Container::SideTable { domain } => {
                            let table = node.as_side_table().map_err(|e| self.relocate(e))?;
                            let value = table.get(&id).ok_or_else(|| self.nonexistent())?;
                            if !self.domain_catalog(domain, root)?.contains(&id) {
                                return Err(self.nonexistent());
                            }
                            value
                        }
                    }
                }
            };
        }
        Ok(node)
    }

    /// Returns `true` if [`CompiledPath::get`] would succeed.
    pub fn exists(&self, root: &Node) -> bool {
        self.get(root).is_ok()
    }

    /// A new root with `value` stored at this path.
    ///
    /// `value` is validated against the schema first. A catalog entry must
    /// carry its key as its id. Writing a listing entry adds the id to the
    /// listing; the entity itself is not copied. Every ancestor must exist.
    pub fn with(&self, root: &Node, value: Node) -> Result<Node> {
        self.check_value(&value)?;
        self.replace(root, 0, value)
    }

    /// Check everything [`CompiledPath::with`] checks that doesn't depend on
    /// the tree: the path is concrete, `value` fits the schema, and an
    /// entity written to a catalog or listing entry carries that entry's id.
    pub fn check_value(&self, value: &Node) -> Result<()> {
        self.require_bound()?;
        self.schema.validate_at(&self.target, value, &self.path)?;
        if let Some(Step::Entry { key, container }) = self.steps.last() {
            if !matches!(container, Container::SideTable { .. })
                && value.entity_id() != Some(&entry_id(key))
            {
                return Err(TreeError::illegal(
                    &self.path,
                    "entity id does not match its entry key",
                ));
            }
        }
        Ok(())
    }

    /// Check that [`CompiledPath::without`] is permitted here.
    pub fn check_deletable(&self) -> Result<()> {
        self.require_bound()?;
        match self.steps.last() {
            None => Err(TreeError::illegal(&self.path, "cannot delete the root")),
            Some(Step::Field {
                name,
                deletable: false,
            }) => Err(TreeError::illegal(
                &self.path,
                format!("field {name:?} is required"),
            )),
            Some(_) => Ok(()),
        }
    }

    fn replace(&self, node: &Node, depth: usize, value: Node) -> Result<Node> {
        let Some(step) = self.steps.get(depth) else {
            return Ok(value);
        };
        let last = depth + 1 == self.steps.len();
        match step {
            Step::Field { name, .. } => {
                let s = node.as_struct().map_err(|e| self.relocate(e))?;
                let child = if last {
                    value
                } else {
                    let current = s.get(name).ok_or_else(|| self.nonexistent())?;
                    self.replace(current, depth + 1, value)?
                };
                Ok(Node::Struct(s.with(name.clone(), child)))
            }
            Step::Entry { key, container } => {
                let id = entry_id(key);
                match container {
                    Container::Catalog => {
                        let catalog = node.as_catalog().map_err(|e| self.relocate(e))?;
                        let child = if last {
                            value
                        } else {
                            let current = catalog.get(&id).ok_or_else(|| self.nonexistent())?;
                            self.replace(current, depth + 1, value)?
                        };
                        Ok(Node::Catalog(catalog.with_entry(id, child)))
                    }
                    Container::Listing { .. } => {
                        let listing = node.as_listing().map_err(|e| self.relocate(e))?;
                        Ok(Node::Listing(listing.with_id(id)))
                    }
                    Container::SideTable { .. } => {
                        let table = node.as_side_table().map_err(|e| self.relocate(e))?;
                        let child = if last {
                            value
                        } else {
                            let current = table.get(&id).ok_or_else(|| self.nonexistent())?;
                            self.replace(current, depth + 1, value)?
                        };
                        Ok(Node::SideTable(table.with(id, child)))
                    }
                }
            }
        }
    }

    /// A new root with nothing at this path.
    ///
    /// Deleting the root or a required field is an
    /// [`TreeError::IllegalOperation`]. Deleting something already absent,
    /// or under a missing ancestor, returns the root unchanged.
    pub fn without(&self, root: &Node) -> Result<Node> {
        self.check_deletable()?;
        Ok(self.remove(root, 0)?.unwrap_or_else(|| root.clone()))
    }

    /// `Ok(None)` means nothing changed.
    fn remove(&self, node: &Node, depth: usize) -> Result<Option<Node>> {
        let last = depth + 1 == self.steps.len();
        match &self.steps[depth] {
            Step::Field { name, .. } => {
                let s = node.as_struct().map_err(|e| self.relocate(e))?;
                let Some(current) = s.get(name) else {
                    return Ok(None);
                };
                if last {
                    return Ok(Some(Node::Struct(s.without(name))));
                }
                Ok(self
                    .remove(current, depth + 1)?
                    .map(|child| Node::Struct(s.with(name.clone(), child))))
            }
            Step::Entry { key, container } => {
                let id = entry_id(key);
                match container {
                    Container::Catalog => {
                        let catalog = node.as_catalog().map_err(|e| self.relocate(e))?;
                        let Some(current) = catalog.get(&id) else {
                            return Ok(None);
                        };
                        if last {
                            return Ok(Some(Node::Catalog(catalog.without(&id))));
                        }
                        Ok(self
                            .remove(current, depth + 1)?
                            .map(|child| Node::Catalog(catalog.with_entry(id, child))))
                    }
                    Container::Listing { .. } => {
                        let listing = node.as_listing().map_err(|e| self.relocate(e))?;
                        if !listing.contains(&id) {
                            return Ok(None);
                        }
                        Ok(Some(Node::Listing(listing.without_id(&id))))
                    }
                    Container::SideTable { .. } => {
                        let table = node.as_side_table().map_err(|e| self.relocate(e))?;
                        let Some(current) = table.get(&id) else {
                            return Ok(None);
                        };
                        if last {
                            return Ok(Some(Node::SideTable(table.without(&id))));
                        }
                        Ok(self
                            .remove(current, depth + 1)?
                            .map(|child| Node::SideTable(table.with(id, child))))
                    }
                }
            }
        }
    }

    /// Every concrete path in `root` that matches this (possibly
    /// parameterized) path, in container order.
    ///
    /// Listing and side table ids are included even when dangling.
    pub fn enumerate(&self, root: &Node) -> Vec<Path> {
        let mut found = Vec::new();
        self.collect(root, 0, Path::root(), &mut found);
        found
    }

    fn collect(&self, node: &Node, depth: usize, prefix: Path, found: &mut Vec<Path>) {
        let Some(step) = self.steps.get(depth) else {
            found.push(prefix);
            return;
        };
        match step {
            Step::Field { name, .. } => {
                if let Some(child) = node.as_struct().ok().and_then(|s| s.get(name)) {
                    self.collect(child, depth + 1, prefix.then(name.as_str()), found);
                }
            }
            Step::Entry { key, container } => {
                let children: Vec<(&Identifier, Option<&Node>)> = match (container, node) {
                    (Container::Catalog, Node::Catalog(c)) => {
                        c.iter().map(|(id, n)| (id, Some(n))).collect()
                    }
                    (Container::Listing { .. }, Node::Listing(l)) => {
                        l.ids().map(|id| (id, None)).collect()
                    }
                    (Container::SideTable { .. }, Node::SideTable(t)) => {
                        t.iter().map(|(id, n)| (id, Some(n))).collect()
                    }
                    _ => return,
                };
                for (id, child) in children {
                    let wanted = match key {
                        Segment::Parameter(_) => true,
                        Segment::Name(name) => name == id.as_str(),
                    };
                    if !wanted {
                        continue;
                    }
                    let next = prefix.then(id);
                    match child {
                        Some(child) => self.collect(child, depth + 1, next, found),
                        None => found.push(next),
                    }
                }
            }
        }
    }

    fn domain_catalog<'a>(
        &self,
        domain: &CompiledPath,
        root: &'a Node,
    ) -> Result<&'a crate::containers::Catalog<Node>> {
        let node = domain.get(root).map_err(|e| match e {
            TreeError::NonexistentEntry { .. } => self.nonexistent(),
            other => other,
        })?;
        node.as_catalog().map_err(|e| self.relocate(e))
    }

    fn require_bound(&self) -> Result<()> {
        if self.path.is_parameterized() {
            return Err(TreeError::malformed(
                &self.path,
                "path has unbound parameters",
            ));
        }
        Ok(())
    }

    fn nonexistent(&self) -> TreeError {
        TreeError::nonexistent(&self.path)
    }

    /// Attach this path to a shape error raised by a node accessor.
    fn relocate(&self, error: TreeError) -> TreeError {
        match error {
            TreeError::InvalidNode { reason, .. } => TreeError::invalid(&self.path, reason),
            other => other,
        }
    }
}

/// The identifier named by an entry segment. Parameters never reach here:
/// callers check [`CompiledPath::require_bound`] first.
fn entry_id(key: &Segment) -> Identifier {
    match key {
        Segment::Name(name) | Segment::Parameter(name) => Identifier::from(name.as_str()),
    }
}
