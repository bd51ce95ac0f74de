//! Explicit schema registry.
//!
//! A [`Schema`] maps struct type names to their field definitions and names
//! one of them as the root type. The path compiler, the validator, and the
//! polyfill pass all consume this registry; nothing is discovered at runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bosk_types::Path;
use serde::{Deserialize, Serialize};

use crate::compiler::PathCompiler;
use crate::error::{Result, TreeError};
use crate::node::{Node, StructNode};

/// The declared type of a field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Bool,
    Int,
    Str,
    Identifier,
    /// A stored reference whose target has the given type.
    Reference(Box<FieldType>),
    /// A nested struct of the named type.
    Struct(String),
    /// A catalog of entities of the named struct type.
    Catalog(String),
    /// Ids of entities in the catalog at `domain`.
    Listing { domain: Path },
    /// Values keyed by ids of entities in the catalog at `domain`.
    SideTable { domain: Path, value: Box<FieldType> },
}

impl FieldType {
    /// A stored reference to a location of type `target`.
    pub fn reference(target: FieldType) -> Self {
        FieldType::Reference(Box::new(target))
    }

    /// A nested struct of the named type.
    pub fn structure(name: impl Into<String>) -> Self {
        FieldType::Struct(name.into())
    }

    /// A catalog of the named entity type.
    pub fn catalog(entity: impl Into<String>) -> Self {
        FieldType::Catalog(entity.into())
    }

    /// Panics if `domain` is not a valid path literal.
    pub fn listing(domain: &str) -> Self {
        FieldType::Listing {
            domain: Path::parse(domain).expect("listing domain must be a valid path"),
        }
    }

    /// Panics if `domain` is not a valid path literal.
    pub fn side_table(domain: &str, value: FieldType) -> Self {
        FieldType::SideTable {
            domain: Path::parse(domain).expect("side table domain must be a valid path"),
            value: Box::new(value),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Bool => write!(f, "bool"),
            FieldType::Int => write!(f, "int"),
            FieldType::Str => write!(f, "string"),
            FieldType::Identifier => write!(f, "identifier"),
            FieldType::Reference(t) => write!(f, "reference<{t}>"),
            FieldType::Struct(n) => write!(f, "{n}"),
            FieldType::Catalog(n) => write!(f, "catalog<{n}>"),
            FieldType::Listing { domain } => write!(f, "listing<{domain}>"),
            FieldType::SideTable { domain, value } => write!(f, "side table<{domain}, {value}>"),
        }
    }
}

/// Whether a field must be present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presence {
    /// Always present; cannot be deleted.
    Required,
    /// May be absent; deleting it is allowed.
    Optional,
    /// Required, but older data may omit it: the given default is filled in
    /// when such data is loaded.
    Polyfill(Node),
}

impl Presence {
    /// Only optional fields may be deleted.
    pub fn is_deletable(&self) -> bool {
        matches!(self, Presence::Optional)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub presence: Presence,
}

/// Definition of one struct type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructDef {
    name: String,
    fields: Vec<FieldDef>,
}

impl StructDef {
    /// An empty definition for the struct type `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a required field.
    pub fn field(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.push(name, ty, Presence::Required)
    }

    /// Add an optional (deletable) field.
    pub fn optional(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.push(name, ty, Presence::Optional)
    }

    /// Add a required field that older data may lack.
    pub fn polyfill(self, name: impl Into<String>, ty: FieldType, default: impl Into<Node>) -> Self {
        self.push(name, ty, Presence::Polyfill(default.into()))
    }

    fn push(mut self, name: impl Into<String>, ty: FieldType, presence: Presence) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty,
            presence,
        });
        self
    }

    /// The struct type's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field definitions in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// The definition of field `name`, if declared.
    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Entities are structs with a required `id: Identifier` field.
    pub fn is_entity(&self) -> bool {
        matches!(
            self.get("id"),
            Some(FieldDef {
                ty: FieldType::Identifier,
                presence: Presence::Required,
                ..
            })
        )
    }
}

/// Collects struct definitions before validating them as a whole.
#[derive(Debug)]
pub struct SchemaBuilder {
    root: String,
    types: BTreeMap<String, StructDef>,
}

impl SchemaBuilder {
    /// Register a struct type. A later definition with the same name
    /// replaces the earlier one.
    pub fn define(mut self, def: StructDef) -> Self {
        self.types.insert(def.name.clone(), def);
        self
    }

    /// Check every cross-reference and return the finished schema.
    pub fn build(self) -> Result<Arc<Schema>> {
        if !self.types.contains_key(&self.root) {
            return Err(TreeError::InvalidSchema(format!(
                "root type {} is not defined",
                self.root
            )));
        }
        let schema = Arc::new(Schema {
            root: self.root,
            types: self.types,
        });

        for def in schema.types.values() {
            for field in &def.fields {
                schema.check_field_type(def, field, &field.ty)?;
            }
        }

        // Listing and side table domains must name catalogs.
        let compiler = PathCompiler::new(schema.clone());
        for def in schema.types.values() {
            for field in &def.fields {
                let domain = match &field.ty {
                    FieldType::Listing { domain } | FieldType::SideTable { domain, .. } => domain,
                    _ => continue,
                };
                if domain.is_parameterized() {
                    return Err(TreeError::InvalidSchema(format!(
                        "{}.{}: domain {domain} must not have parameters",
                        def.name, field.name
                    )));
                }
                let target = compiler.compile(domain).map_err(|e| {
                    TreeError::InvalidSchema(format!("{}.{}: {e}", def.name, field.name))
                })?;
                if !matches!(target.target_type(), FieldType::Catalog(_)) {
                    return Err(TreeError::InvalidSchema(format!(
                        "{}.{}: domain {domain} is not a catalog",
                        def.name, field.name
                    )));
                }
            }
        }

        for def in schema.types.values() {
            for field in &def.fields {
                if let Presence::Polyfill(default) = &field.presence {
                    schema
                        .validate_at(&field.ty, default, &Path::root().then(field.name.as_str()))
                        .map_err(|e| {
                            TreeError::InvalidSchema(format!(
                                "{}.{}: bad polyfill: {e}",
                                def.name, field.name
                            ))
                        })?;
                }
            }
        }
        Ok(schema)
    }
}

/// A validated registry of struct types with a designated root.
#[derive(Debug, PartialEq, Eq)]
pub struct Schema {
    root: String,
    types: BTreeMap<String, StructDef>,
}

impl Schema {
    /// Start a schema whose root is the struct type `root`.
    pub fn builder(root: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            root: root.into(),
            types: BTreeMap::new(),
        }
    }

    /// Name of the root struct type.
    pub fn root_type(&self) -> &str {
        &self.root
    }

    /// The root as a field type.
    pub fn root_field_type(&self) -> FieldType {
        FieldType::Struct(self.root.clone())
    }

    /// The definition of struct type `name`.
    pub fn struct_def(&self, name: &str) -> Option<&StructDef> {
        self.types.get(name)
    }

    pub(crate) fn require_struct(&self, name: &str) -> Result<&StructDef> {
        self.types
            .get(name)
            .ok_or_else(|| TreeError::InvalidSchema(format!("type {name} is not defined")))
    }

    fn check_field_type(&self, owner: &StructDef, field: &FieldDef, ty: &FieldType) -> Result<()> {
        let bad = |reason: String| {
            Err(TreeError::InvalidSchema(format!(
                "{}.{}: {reason}",
                owner.name, field.name
            )))
        };
        match ty {
            FieldType::Struct(name) if !self.types.contains_key(name) => {
                bad(format!("unknown type {name}"))
            }
            FieldType::Catalog(name) => match self.types.get(name) {
                None => bad(format!("unknown type {name}")),
                Some(def) if !def.is_entity() => {
                    bad(format!("catalog entry type {name} has no required id field"))
                }
                Some(_) => Ok(()),
            },
            FieldType::Reference(target) => self.check_field_type(owner, field, target),
            FieldType::SideTable { value, .. } => self.check_field_type(owner, field, value),
            _ => Ok(()),
        }
    }

    /// Check an entire tree against the root type.
    pub fn validate(&self, root: &Node) -> Result<()> {
        self.validate_at(&self.root_field_type(), root, &Path::root())
    }

    /// Check that `node` is a legal value of type `ty`. `path` is used only
    /// for error messages.
    pub fn validate_at(&self, ty: &FieldType, node: &Node, path: &Path) -> Result<()> {
        let mismatch = || TreeError::invalid(path, format!("expected {ty}, found {}", node.kind_name()));
        match (ty, node) {
            (FieldType::Bool, Node::Bool(_))
            | (FieldType::Int, Node::Int(_))
            | (FieldType::Str, Node::Str(_))
            | (FieldType::Identifier, Node::Id(_))
            | (FieldType::Reference(_), Node::Ref(_)) => Ok(()),
            (FieldType::Struct(name), Node::Struct(s)) => self.validate_struct(name, s, path),
            (FieldType::Catalog(name), Node::Catalog(catalog)) => {
                let entry_type = FieldType::Struct(name.clone());
                for (id, entry) in catalog.iter() {
                    let entry_path = path.then(id);
                    self.validate_at(&entry_type, entry, &entry_path)?;
                    if entry.entity_id() != Some(id) {
                        return Err(TreeError::invalid(
                            entry_path,
                            "catalog key does not match the entity's id",
                        ));
                    }
                }
                Ok(())
            }
            (FieldType::Listing { domain }, Node::Listing(listing)) => {
                if listing.domain() != domain {
                    return Err(TreeError::invalid(
                        path,
                        format!("listing domain {} should be {domain}", listing.domain()),
                    ));
                }
                Ok(())
            }
            (FieldType::SideTable { domain, value }, Node::SideTable(table)) => {
                if table.domain() != domain {
                    return Err(TreeError::invalid(
                        path,
                        format!("side table domain {} should be {domain}", table.domain()),
                    ));
                }
                for (key, v) in table.iter() {
                    self.validate_at(value, v, &path.then(key))?;
                }
                Ok(())
            }
            _ => Err(mismatch()),
        }
    }

    fn validate_struct(&self, name: &str, node: &StructNode, path: &Path) -> Result<()> {
        let def = self.require_struct(name)?;
        for field in &def.fields {
            match node.get(&field.name) {
                Some(value) => self.validate_at(&field.ty, value, &path.then(field.name.as_str()))?,
                None if field.presence.is_deletable() => {}
                None => {
                    return Err(TreeError::invalid(
                        path,
                        format!("{name} is missing required field {:?}", field.name),
                    ))
                }
            }
        }
        for (field_name, _) in node.fields() {
            if def.get(field_name).is_none() {
                return Err(TreeError::invalid(
                    path,
                    format!("{name} has no field {field_name:?}"),
                ));
            }
        }
        Ok(())
    }

    /// Fill in every missing polyfilled field, anywhere in the tree.
    ///
    /// Subtrees that need no changes are shared with the input.
    pub fn polyfill(&self, root: &Node) -> Node {
        self.polyfill_at(&self.root_field_type(), root)
            .unwrap_or_else(|| root.clone())
    }

    fn polyfill_at(&self, ty: &FieldType, node: &Node) -> Option<Node> {
        match (ty, node) {
            (FieldType::Struct(name), Node::Struct(s)) => {
                let def = self.types.get(name)?;
                let mut result: Option<StructNode> = None;
                for field in &def.fields {
                    let current = result.as_ref().unwrap_or(s);
                    let replacement = match (current.get(&field.name), &field.presence) {
                        (Some(child), _) => self.polyfill_at(&field.ty, child),
                        (None, Presence::Polyfill(default)) => Some(default.clone()),
                        (None, _) => None,
                    };
                    if let Some(new_child) = replacement {
                        result = Some(current.with(field.name.clone(), new_child));
                    }
                }
                result.map(Node::Struct)
            }
            (FieldType::Catalog(name), Node::Catalog(catalog)) => {
                let entry_type = FieldType::Struct(name.clone());
                let mut result = None;
                for (id, entry) in catalog.iter() {
                    if let Some(new_entry) = self.polyfill_at(&entry_type, entry) {
                        let base: &crate::containers::Catalog<Node> =
                            result.as_ref().unwrap_or(catalog);
                        result = Some(base.with_entry(id.clone(), new_entry));
                    }
                }
                result.map(Node::Catalog)
            }
            (FieldType::SideTable { value, .. }, Node::SideTable(table)) => {
                let mut result = None;
                for (key, v) in table.iter() {
                    if let Some(new_value) = self.polyfill_at(value, v) {
                        let base: &crate::containers::SideTable<Node> =
                            result.as_ref().unwrap_or(table);
                        result = Some(base.with(key.clone(), new_value));
                    }
                }
                result.map(Node::SideTable)
            }
            _ => None,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::containers::Listing;
    use bosk_types::Identifier;

    #[test]
    fn fixture_root_is_valid() {
        let schema = schema();
        schema.validate(&root_with(&["a", "b"])).unwrap();
    }

    #[test]
    fn unknown_types_are_rejected() {
        let err = Schema::builder("Root")
            .define(StructDef::new("Root").field("child", FieldType::structure("Missing")))
            .build()
            .unwrap_err();
        assert!(matches!(err, TreeError::InvalidSchema(_)));
    }

    #[test]
    fn catalog_entries_must_be_entities() {
        let err = Schema::builder("Root")
            .define(StructDef::new("Root").field("things", FieldType::catalog("Thing")))
            .define(StructDef::new("Thing").field("label", FieldType::Str))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no required id field"));
    }

    #[test]
    fn listing_domain_must_be_a_catalog() {
        let err = Schema::builder("Root")
            .define(
                StructDef::new("Root")
                    .field("name", FieldType::Str)
                    .field("picked", FieldType::listing("/name")),
            )
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("is not a catalog"));
    }

    #[test]
    fn missing_required_field_is_invalid() {
        let schema = schema();
        let root = root_with(&[]);
        let broken = root.as_struct().unwrap().without("name").into_node();
        let err = schema.validate(&broken).unwrap_err();
        assert!(matches!(err, TreeError::InvalidNode { .. }));
    }

    #[test]
    fn mismatched_catalog_key_is_invalid() {
        let schema = schema();
        let root = root_with(&[]);
        let targets = Node::catalog_of([]).unwrap().with_entry(Identifier::from("x"), target("y"));
        let broken = root.as_struct().unwrap().with("targets", targets).into_node();
        let err = schema.validate(&broken).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn listing_with_wrong_domain_is_invalid() {
        let schema = schema();
        let root = root_with(&[]);
        let wrong = Listing::empty(Path::parse("/elsewhere").unwrap());
        let broken = root.as_struct().unwrap().with("picked", wrong).into_node();
        assert!(schema.validate(&broken).is_err());
    }

    #[test]
    fn polyfill_fills_missing_fields_inside_catalogs() {
        let schema = schema();
        let old_target = StructNode::new()
            .with("id", Identifier::from("a"))
            .with("label", "old")
            .into_node();
        let root = root_with(&[]);
        let targets = Node::catalog_of([old_target]).unwrap();
        let old_root = root.as_struct().unwrap().with("targets", targets).into_node();
        assert!(schema.validate(&old_root).is_err());

        let filled = schema.polyfill(&old_root);
        schema.validate(&filled).unwrap();
        let weight = filled.as_struct().unwrap().get("targets").unwrap().as_catalog().unwrap()
            .get(&"a".into()).unwrap().as_struct().unwrap().get("weight").cloned();
        assert_eq!(weight, Some(Node::Int(1)));
    }

    #[test]
    fn polyfill_shares_untouched_trees() {
        let schema = schema();
        let root = root_with(&["a"]);
        assert_eq!(schema.polyfill(&root), root);
    }
}
