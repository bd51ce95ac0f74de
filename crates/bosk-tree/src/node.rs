//! The dynamic value model of a state tree.
//!
//! Every snapshot is a [`Node`]. Nodes are immutable: modifying operations
//! return new nodes that share unchanged children with the original. The
//! schema (see [`crate::schema`]) says which shapes are legal where; a node
//! on its own carries no type names.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bosk_types::{Identifier, Path};
use serde::{Deserialize, Serialize};

use crate::containers::{Catalog, Listing, SideTable};
use crate::error::{Result, TreeError};

/// A value anywhere in the state tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Bool(bool),
    Int(i64),
    Str(String),
    Id(Identifier),
    /// A stored reference to another location in the same tree.
    Ref(Path),
    Struct(StructNode),
    Catalog(Catalog<Node>),
    Listing(Listing),
    SideTable(SideTable<Node>),
}

impl Node {
    /// Short name of this node's shape, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Bool(_) => "bool",
            Node::Int(_) => "int",
            Node::Str(_) => "string",
            Node::Id(_) => "identifier",
            Node::Ref(_) => "reference",
            Node::Struct(_) => "struct",
            Node::Catalog(_) => "catalog",
            Node::Listing(_) => "listing",
            Node::SideTable(_) => "side table",
        }
    }

    /// Returns `true` for leaf values (everything but structs and containers).
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Node::Bool(_) | Node::Int(_) | Node::Str(_) | Node::Id(_) | Node::Ref(_)
        )
    }

    /// The boolean in a `Bool` node; a shape error otherwise.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Node::Bool(b) => Ok(*b),
            other => Err(other.shape_error("bool")),
        }
    }

    /// The integer in an `Int` node.
    pub fn as_int(&self) -> Result<i64> {
        match self {
            Node::Int(i) => Ok(*i),
            other => Err(other.shape_error("int")),
        }
    }

    /// The text of a `Str` node.
    pub fn as_str(&self) -> Result<&str> {
        match self {
            Node::Str(s) => Ok(s),
            other => Err(other.shape_error("string")),
        }
    }

    /// The identifier in an `Id` node.
    pub fn as_id(&self) -> Result<&Identifier> {
        match self {
            Node::Id(id) => Ok(id),
            other => Err(other.shape_error("identifier")),
        }
    }

    /// The target path of a stored reference.
    pub fn as_ref_path(&self) -> Result<&Path> {
        match self {
            Node::Ref(p) => Ok(p),
            other => Err(other.shape_error("reference")),
        }
    }

    /// The fields of a `Struct` node.
    pub fn as_struct(&self) -> Result<&StructNode> {
        match self {
            Node::Struct(s) => Ok(s),
            other => Err(other.shape_error("struct")),
        }
    }

    /// The entries of a `Catalog` node.
    pub fn as_catalog(&self) -> Result<&Catalog<Node>> {
        match self {
            Node::Catalog(c) => Ok(c),
            other => Err(other.shape_error("catalog")),
        }
    }

    /// The ids of a `Listing` node.
    pub fn as_listing(&self) -> Result<&Listing> {
        match self {
            Node::Listing(l) => Ok(l),
            other => Err(other.shape_error("listing")),
        }
    }

    /// The entries of a `SideTable` node.
    pub fn as_side_table(&self) -> Result<&SideTable<Node>> {
        match self {
            Node::SideTable(t) => Ok(t),
            other => Err(other.shape_error("side table")),
        }
    }

    /// The value of this struct's `id` field, if it has one.
    pub fn entity_id(&self) -> Option<&Identifier> {
        match self {
            Node::Struct(s) => match s.get("id") {
                Some(Node::Id(id)) => Some(id),
                _ => None,
            },
            _ => None,
        }
    }

    /// Build a catalog of entity nodes, keyed by their `id` fields.
    pub fn catalog_of(entities: impl IntoIterator<Item = Node>) -> Result<Catalog<Node>> {
        let mut catalog = Catalog::empty();
        for entity in entities {
            let id = entity.entity_id().cloned().ok_or_else(|| TreeError::InvalidNode {
                path: "?".into(),
                reason: "catalog entry has no id field".into(),
            })?;
            catalog = catalog.with_entry(id, entity);
        }
        Ok(catalog)
    }

    fn shape_error(&self, expected: &str) -> TreeError {
        TreeError::InvalidNode {
            path: "?".into(),
            reason: format!("expected {expected}, found {}", self.kind_name()),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Bool(b) => write!(f, "{b}"),
            Node::Int(i) => write!(f, "{i}"),
            Node::Str(s) => write!(f, "{s:?}"),
            Node::Id(id) => write!(f, "#{id}"),
            Node::Ref(p) => write!(f, "&{p}"),
            Node::Struct(s) => write!(f, "struct({} fields)", s.len()),
            Node::Catalog(c) => write!(f, "catalog({} entries)", c.len()),
            Node::Listing(l) => write!(f, "listing({} ids)", l.len()),
            Node::SideTable(t) => write!(f, "side table({} entries)", t.len()),
        }
    }
}

/// A record node: a set of named fields.
///
/// Absent optional fields are simply not in the map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructNode {
    fields: Arc<BTreeMap<String, Node>>,
}

impl StructNode {
    /// A struct with no fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field assignment.
    pub fn with(&self, name: impl Into<String>, value: impl Into<Node>) -> Self {
        let mut fields = (*self.fields).clone();
        fields.insert(name.into(), value.into());
        Self {
            fields: Arc::new(fields),
        }
    }

    /// Remove a field. Returns an identical struct if it was absent.
    pub fn without(&self, name: &str) -> Self {
        if !self.fields.contains_key(name) {
            return self.clone();
        }
        let mut fields = (*self.fields).clone();
        fields.remove(name);
        Self {
            fields: Arc::new(fields),
        }
    }

    /// The field called `name`, if present.
    pub fn get(&self, name: &str) -> Option<&Node> {
        self.fields.get(name)
    }

    /// Like [`StructNode::get`] but absence is an error.
    pub fn require(&self, name: &str) -> Result<&Node> {
        self.fields.get(name).ok_or_else(|| TreeError::InvalidNode {
            path: "?".into(),
            reason: format!("missing field {name:?}"),
        })
    }

    /// Whether the field called `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of present fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if no field is present.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields ordered by name.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Wrap as a [`Node::Struct`].
    pub fn into_node(self) -> Node {
        Node::Struct(self)
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Bool(b)
    }
}

impl From<i64> for Node {
    fn from(i: i64) -> Self {
        Node::Int(i)
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::Str(s.to_owned())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::Str(s)
    }
}

impl From<Identifier> for Node {
    fn from(id: Identifier) -> Self {
        Node::Id(id)
    }
}

impl From<StructNode> for Node {
    fn from(s: StructNode) -> Self {
        Node::Struct(s)
    }
}

impl From<Catalog<Node>> for Node {
    fn from(c: Catalog<Node>) -> Self {
        Node::Catalog(c)
    }
}

impl From<Listing> for Node {
    fn from(l: Listing) -> Self {
        Node::Listing(l)
    }
}

impl From<SideTable<Node>> for Node {
    fn from(t: SideTable<Node>) -> Self {
        Node::SideTable(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str) -> Node {
        StructNode::new()
            .with("id", Identifier::from(id))
            .with("label", id)
            .into_node()
    }

    #[test]
    fn struct_builder_is_persistent() {
        let a = StructNode::new().with("x", 1i64);
        let b = a.with("y", 2i64);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 2);
        assert_eq!(b.without("y"), a);
    }

    #[test]
    fn accessors_report_shape_errors() {
        assert_eq!(Node::Int(4).as_int().unwrap(), 4);
        let err = Node::Int(4).as_str().unwrap_err();
        assert!(matches!(err, TreeError::InvalidNode { .. }));
    }

    #[test]
    fn entity_id_comes_from_id_field() {
        assert_eq!(target("world").entity_id(), Some(&Identifier::from("world")));
        assert_eq!(Node::Int(1).entity_id(), None);
        let catalog = Node::catalog_of([target("a"), target("b")]).unwrap();
        assert!(catalog.contains(&"b".into()));
        assert!(Node::catalog_of([Node::Int(1)]).is_err());
    }

    #[test]
    fn serde_round_trips_through_json_and_bincode() {
        let root = StructNode::new()
            .with("targets", Node::catalog_of([target("a")]).unwrap())
            .with(
                "picked",
                Listing::of(Path::parse("/targets").unwrap(), [Identifier::from("a")]),
            )
            .with("home", Node::Ref(Path::parse("/targets/a").unwrap()))
            .into_node();

        let json = serde_json::to_string(&root).unwrap();
        assert_eq!(serde_json::from_str::<Node>(&json).unwrap(), root);

        let bytes = bincode::serialize(&root).unwrap();
        assert_eq!(bincode::deserialize::<Node>(&bytes).unwrap(), root);
    }
}
