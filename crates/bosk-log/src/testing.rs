//! Shared fixtures for this crate's tests.

use std::sync::Arc;

use bosk_core::Bosk;
use bosk_tree::{FieldType, Node, Schema, StructDef, StructNode};
use bosk_types::Path;

use crate::backend::LogBackend;
use crate::driver::ReplicatedLogDriver;
use crate::settings::LogDriverSettings;

pub fn schema() -> Arc<Schema> {
    Schema::builder("Root")
        .define(
            StructDef::new("Root")
                .field("name", FieldType::Str)
                .field("targets", FieldType::catalog("Target")),
        )
        .define(
            StructDef::new("Target")
                .field("id", FieldType::Identifier)
                .field("label", FieldType::Str),
        )
        .build()
        .unwrap()
}

pub fn target(id: &str) -> Node {
    StructNode::new()
        .with("id", bosk_types::Identifier::from(id))
        .with("label", id)
        .into_node()
}

pub fn root_with(ids: &[&str]) -> Node {
    StructNode::new()
        .with("name", "test")
        .with("targets", Node::catalog_of(ids.iter().map(|id| target(id))).unwrap())
        .into_node()
}

/// A bosk on `log`. `ids` seed the root only if the log has no state yet.
pub fn bosk_on(log: Arc<dyn LogBackend>, settings: LogDriverSettings, ids: &[&str]) -> Bosk {
    let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
    Bosk::builder("test", schema())
        .default_root(move |_| root_with(&ids.iter().map(String::as_str).collect::<Vec<_>>()))
        .driver(ReplicatedLogDriver::factory(log, settings))
        .build()
        .unwrap()
}

pub fn put(bosk: &Bosk, id: &str) {
    let path = Path::parse(&format!("/targets/{id}")).unwrap();
    let target = bosk.reference::<Node>(&path).unwrap();
    bosk.driver().submit_replacement(&target, &self::target(id)).unwrap();
}

pub fn rename(bosk: &Bosk, name: &str) {
    let field = bosk.reference_to::<String>("/name").unwrap();
    bosk.driver().submit_replacement(&field, &name.to_string()).unwrap();
}

pub fn name(bosk: &Bosk) -> String {
    let root = bosk.info().current_root();
    root.as_struct().unwrap().require("name").unwrap().as_str().unwrap().to_string()
}

pub fn ids(bosk: &Bosk) -> Vec<String> {
    let root = bosk.info().current_root();
    let targets = root.as_struct().unwrap().require("targets").unwrap().as_catalog().unwrap();
    targets.ids().map(|id| id.to_string()).collect()
}
