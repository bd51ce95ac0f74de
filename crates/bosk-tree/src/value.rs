//! Typed views over [`Node`]s.
//!
//! [`StateValue`] connects a Rust type to the dynamic node model, and
//! declares the [`Kind`] of schema location it may be read from. The path
//! compiler uses the kind to reject typed access at the wrong location with
//! [`TreeError::TypeMismatch`].

use std::fmt;

use bosk_types::{Identifier, Path};

use crate::containers::{Catalog, Entity, Listing, SideTable};
use crate::error::{Result, TreeError};
use crate::node::Node;
use crate::schema::FieldType;

/// The shape a typed reader expects at a location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Untyped access; matches every location.
    Any,
    Bool,
    Int,
    Str,
    Identifier,
    Reference,
    /// A struct of the named schema type.
    Struct(&'static str),
    Catalog(Box<Kind>),
    Listing,
    SideTable(Box<Kind>),
}

impl Kind {
    /// Returns `true` if values of this kind may be read from and written to
    /// a location of type `ty`.
    pub fn accepts(&self, ty: &FieldType) -> bool {
        match (self, ty) {
            (Kind::Any, _) => true,
            (Kind::Bool, FieldType::Bool)
            | (Kind::Int, FieldType::Int)
            | (Kind::Str, FieldType::Str)
            | (Kind::Identifier, FieldType::Identifier)
            | (Kind::Reference, FieldType::Reference(_))
            | (Kind::Listing, FieldType::Listing { .. }) => true,
            (Kind::Struct(name), FieldType::Struct(other)) => name == other,
            (Kind::Catalog(entry), FieldType::Catalog(entity)) => {
                entry.accepts(&FieldType::Struct(entity.clone()))
            }
            (Kind::SideTable(value_kind), FieldType::SideTable { value, .. }) => {
                value_kind.accepts(value)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Any => write!(f, "any"),
            Kind::Bool => write!(f, "bool"),
            Kind::Int => write!(f, "int"),
            Kind::Str => write!(f, "string"),
            Kind::Identifier => write!(f, "identifier"),
            Kind::Reference => write!(f, "reference"),
            Kind::Struct(name) => write!(f, "{name}"),
            Kind::Catalog(entry) => write!(f, "catalog<{entry}>"),
            Kind::Listing => write!(f, "listing"),
            Kind::SideTable(value) => write!(f, "side table<{value}>"),
        }
    }
}

/// A Rust type that can be stored in the state tree.
///
/// Application structs implement this by hand, usually with the
/// [`crate::StructNode`] builder in `to_node` and [`crate::StructNode::require`]
/// in `from_node`.
pub trait StateValue: Clone + Send + Sync + 'static {
    fn kind() -> Kind;

    fn to_node(&self) -> Node;

    fn from_node(node: &Node) -> Result<Self>;
}

impl StateValue for Node {
    fn kind() -> Kind {
        Kind::Any
    }

    fn to_node(&self) -> Node {
        self.clone()
    }

    fn from_node(node: &Node) -> Result<Self> {
        Ok(node.clone())
    }
}

impl StateValue for bool {
    fn kind() -> Kind {
        Kind::Bool
    }

    fn to_node(&self) -> Node {
        Node::Bool(*self)
    }

    fn from_node(node: &Node) -> Result<Self> {
        node.as_bool()
    }
}

impl StateValue for i64 {
    fn kind() -> Kind {
        Kind::Int
    }

    fn to_node(&self) -> Node {
        Node::Int(*self)
    }

    fn from_node(node: &Node) -> Result<Self> {
        node.as_int()
    }
}

impl StateValue for String {
    fn kind() -> Kind {
        Kind::Str
    }

    fn to_node(&self) -> Node {
        Node::Str(self.clone())
    }

    fn from_node(node: &Node) -> Result<Self> {
        node.as_str().map(str::to_owned)
    }
}

impl StateValue for Identifier {
    fn kind() -> Kind {
        Kind::Identifier
    }

    fn to_node(&self) -> Node {
        Node::Id(self.clone())
    }

    fn from_node(node: &Node) -> Result<Self> {
        node.as_id().cloned()
    }
}

/// Stored references are plain paths in the tree.
impl StateValue for Path {
    fn kind() -> Kind {
        Kind::Reference
    }

    fn to_node(&self) -> Node {
        Node::Ref(self.clone())
    }

    fn from_node(node: &Node) -> Result<Self> {
        node.as_ref_path().cloned()
    }
}

impl StateValue for Listing {
    fn kind() -> Kind {
        Kind::Listing
    }

    fn to_node(&self) -> Node {
        Node::Listing(self.clone())
    }

    fn from_node(node: &Node) -> Result<Self> {
        node.as_listing().cloned()
    }
}

impl<E: StateValue + Entity> StateValue for Catalog<E> {
    fn kind() -> Kind {
        Kind::Catalog(Box::new(E::kind()))
    }

    fn to_node(&self) -> Node {
        Node::Catalog(self.map(E::to_node))
    }

    fn from_node(node: &Node) -> Result<Self> {
        let catalog = node.as_catalog()?;
        let typed = catalog.try_map(E::from_node)?;
        if let Some((key, entity)) = typed.iter().find(|(key, entity)| entity.id() != *key) {
            return Err(TreeError::invalid(
                key,
                format!("catalog key does not match entity id {}", entity.id()),
            ));
        }
        Ok(typed)
    }
}

impl<V: StateValue> StateValue for SideTable<V> {
    fn kind() -> Kind {
        Kind::SideTable(Box::new(V::kind()))
    }

    fn to_node(&self) -> Node {
        Node::SideTable(self.map(V::to_node))
    }

    fn from_node(node: &Node) -> Result<Self> {
        node.as_side_table()?.try_map(V::from_node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::StructNode;

    #[derive(Clone, Debug, PartialEq)]
    struct Target {
        id: Identifier,
        label: String,
    }

    impl Entity for Target {
        fn id(&self) -> &Identifier {
            &self.id
        }
    }

    impl StateValue for Target {
        fn kind() -> Kind {
            Kind::Struct("Target")
        }

        fn to_node(&self) -> Node {
            StructNode::new()
                .with("id", self.id.clone())
                .with("label", self.label.clone())
                .into_node()
        }

        fn from_node(node: &Node) -> Result<Self> {
            let s = node.as_struct()?;
            Ok(Self {
                id: s.require("id")?.as_id()?.clone(),
                label: s.require("label")?.as_str()?.to_owned(),
            })
        }
    }

    #[test]
    fn kinds_match_field_types() {
        assert!(i64::kind().accepts(&FieldType::Int));
        assert!(!i64::kind().accepts(&FieldType::Str));
        assert!(Node::kind().accepts(&FieldType::catalog("Target")));
        assert!(Catalog::<Target>::kind().accepts(&FieldType::catalog("Target")));
        assert!(!Catalog::<Target>::kind().accepts(&FieldType::catalog("Other")));
        assert!(SideTable::<i64>::kind().accepts(&FieldType::side_table("/t", FieldType::Int)));
    }

    #[test]
    fn typed_catalog_converts_both_ways() {
        let catalog = Catalog::of([
            Target { id: "a".into(), label: "A".into() },
            Target { id: "b".into(), label: "B".into() },
        ]);
        let node = catalog.to_node();
        assert_eq!(node.as_catalog().unwrap().len(), 2);
        assert_eq!(Catalog::<Target>::from_node(&node).unwrap(), catalog);
    }

    #[test]
    fn typed_catalog_rejects_mismatched_keys() {
        let entity = Target { id: "a".into(), label: "A".into() };
        let node = Node::Catalog(Catalog::empty().with_entry("b".into(), entity.to_node()));
        assert!(Catalog::<Target>::from_node(&node).is_err());
    }

    #[test]
    fn primitive_conversion_reports_wrong_shapes() {
        assert_eq!(String::from_node(&Node::from("x")).unwrap(), "x");
        assert!(bool::from_node(&Node::Int(1)).is_err());
    }
}
