//! Shared fixtures for this crate's tests.

use std::sync::Arc;

use bosk_tree::{
    Entity, FieldType, Kind, Listing, Node, PathCompiler, Schema, SideTable, StateValue, StructDef,
    StructNode,
};
use bosk_types::{Identifier, Path};

use crate::driver::DriverFactory;
use crate::Bosk;

pub fn schema() -> Arc<Schema> {
    Schema::builder("Root")
        .define(
            StructDef::new("Root")
                .field("name", FieldType::Str)
                .field("targets", FieldType::catalog("Target"))
                .field("picked", FieldType::listing("/targets"))
                .field("scores", FieldType::side_table("/targets", FieldType::Int))
                .optional("motd", FieldType::Str),
        )
        .define(
            StructDef::new("Target")
                .field("id", FieldType::Identifier)
                .field("label", FieldType::Str)
                .polyfill("weight", FieldType::Int, 1i64),
        )
        .build()
        .unwrap()
}

pub fn compiler() -> Arc<PathCompiler> {
    Arc::new(PathCompiler::new(schema()))
}

pub fn root_with(ids: &[&str]) -> Node {
    let targets = Node::catalog_of(ids.iter().map(|id| Target::new(id).to_node())).unwrap();
    let domain = Path::parse("/targets").unwrap();
    StructNode::new()
        .with("name", "test")
        .with("targets", targets)
        .with("picked", Listing::empty(domain.clone()))
        .with("scores", SideTable::<Node>::empty(domain))
        .into_node()
}

/// A bosk over [`schema`] whose default root holds `ids`.
pub fn bosk(ids: &[&str]) -> Bosk {
    let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
    Bosk::builder("test", schema())
        .default_root(move |_| root_with(&ids.iter().map(String::as_str).collect::<Vec<_>>()))
        .build()
        .unwrap()
}

/// An empty-catalog bosk with `factory` in front of the local driver.
pub fn bosk_with(factory: DriverFactory) -> Bosk {
    Bosk::builder("test", schema())
        .default_root(|_| root_with(&[]))
        .driver(factory)
        .build()
        .unwrap()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub id: Identifier,
    pub label: String,
    pub weight: i64,
}

impl Target {
    pub fn new(id: &str) -> Self {
        Self {
            id: Identifier::from(id),
            label: id.to_string(),
            weight: 1,
        }
    }
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
            .with("weight", self.weight)
            .into_node()
    }

    fn from_node(node: &Node) -> bosk_tree::Result<Self> {
        let fields = node.as_struct()?;
        Ok(Self {
            id: fields.require("id")?.as_id()?.clone(),
            label: fields.require("label")?.as_str()?.to_string(),
            weight: fields.require("weight")?.as_int()?,
        })
    }
}
