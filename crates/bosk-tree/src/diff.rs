//! Structural comparison of two state trees.
//!
//! Used for operational status reports: "does the state I hold agree with
//! the state the log describes, and if not, where do they first disagree?"

use bosk_types::Path;
use serde::{Deserialize, Serialize};

use crate::node::Node;

/// How many example differences a [`Difference::MultipleDifferences`] keeps.
pub const MAX_EXAMPLES: usize = 5;

/// The first disagreement between an expected and an actual tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Difference {
    NoDifference,
    /// Present in the expected tree, absent in the actual one.
    NodeMissing { path: Path },
    /// Present in the actual tree, absent in the expected one.
    UnexpectedNode { path: Path },
    /// The same location holds different values that can't be broken down
    /// further: unequal primitives, listings, differently-ordered entries,
    /// or nodes of different shapes.
    PrimitiveDifference { path: Path },
    /// Several children of `path` differ.
    MultipleDifferences { path: Path, examples: Vec<Difference> },
}

impl Difference {
    pub fn is_none(&self) -> bool {
        matches!(self, Difference::NoDifference)
    }
}

/// Compare `actual` against `expected`.
pub fn difference(expected: &Node, actual: &Node) -> Difference {
    difference_at(&Path::root(), expected, actual)
}

fn difference_at(path: &Path, expected: &Node, actual: &Node) -> Difference {
    if expected == actual {
        return Difference::NoDifference;
    }

    let children = match (expected, actual) {
        (Node::Struct(e), Node::Struct(a)) => {
            let mut found = Vec::new();
            for (name, e_child) in e.fields() {
                let child_path = path.then(name);
                match a.get(name) {
                    Some(a_child) => found.push(difference_at(&child_path, e_child, a_child)),
                    None => found.push(Difference::NodeMissing { path: child_path }),
                }
            }
            for (name, _) in a.fields() {
                if !e.contains(name) {
                    found.push(Difference::UnexpectedNode {
                        path: path.then(name),
                    });
                }
            }
            found
        }
        (Node::Catalog(e), Node::Catalog(a)) => keyed(
            path,
            e.iter().collect(),
            a.iter().collect(),
            |id| a.get(id),
            |id| e.contains(id),
        ),
        (Node::SideTable(e), Node::SideTable(a)) if e.domain() == a.domain() => keyed(
            path,
            e.iter().collect(),
            a.iter().collect(),
            |id| a.get(id),
            |id| e.contains_key(id),
        ),
        _ => return Difference::PrimitiveDifference { path: path.clone() },
    };

    let mut differences: Vec<Difference> =
        children.into_iter().filter(|d| !d.is_none()).collect();
    match differences.len() {
        // Same children, different order.
        0 => Difference::PrimitiveDifference { path: path.clone() },
        1 => differences.remove(0),
        _ => {
            differences.truncate(MAX_EXAMPLES);
            Difference::MultipleDifferences {
                path: path.clone(),
                examples: differences,
            }
        }
    }
}

fn keyed<'a>(
    path: &Path,
    expected: Vec<(&'a bosk_types::Identifier, &'a Node)>,
    actual: Vec<(&'a bosk_types::Identifier, &'a Node)>,
    actual_get: impl Fn(&bosk_types::Identifier) -> Option<&'a Node>,
    expected_contains: impl Fn(&bosk_types::Identifier) -> bool,
) -> Vec<Difference> {
    let mut found = Vec::new();
    for (id, e_child) in expected {
        let child_path = path.then(id);
        match actual_get(id) {
            Some(a_child) => found.push(difference_at(&child_path, e_child, a_child)),
            None => found.push(Difference::NodeMissing { path: child_path }),
        }
    }
    for (id, _) in actual {
        if !expected_contains(id) {
            found.push(Difference::UnexpectedNode {
                path: path.then(id),
            });
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::StructNode;
    use crate::schema::fixtures::{root_with, target};

    fn path(text: &str) -> Path {
        Path::parse(text).unwrap()
    }

    fn with_field(node: &Node, name: &str, value: impl Into<Node>) -> Node {
        node.as_struct().unwrap().with(name, value).into_node()
    }

    #[test]
    fn equal_trees_have_no_difference() {
        let root = root_with(&["a"]);
        assert_eq!(difference(&root, &root.clone()), Difference::NoDifference);
    }

    #[test]
    fn missing_and_unexpected_entries() {
        let expected = root_with(&["a", "b"]);
        let actual = root_with(&["a"]);
        assert_eq!(
            difference(&expected, &actual),
            Difference::NodeMissing { path: path("/targets/b") }
        );
        assert_eq!(
            difference(&actual, &expected),
            Difference::UnexpectedNode { path: path("/targets/b") }
        );
    }

    #[test]
    fn primitive_values_differ() {
        let expected = root_with(&["a"]);
        let actual = with_field(&expected, "name", "other");
        assert_eq!(
            difference(&expected, &actual),
            Difference::PrimitiveDifference { path: path("/name") }
        );
    }

    #[test]
    fn several_differences_are_grouped() {
        let expected = root_with(&["a"]);
        let actual = with_field(&with_field(&expected, "name", "other"), "motd", "hi");
        match difference(&expected, &actual) {
            Difference::MultipleDifferences { path: p, examples } => {
                assert!(p.is_root());
                assert_eq!(examples.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reordering_is_a_difference() {
        let expected = root_with(&["a", "b"]);
        let actual = root_with(&["b", "a"]);
        assert_eq!(
            difference(&expected, &actual),
            Difference::PrimitiveDifference { path: path("/targets") }
        );
    }

    #[test]
    fn nested_entity_change_is_located() {
        let expected = root_with(&["a"]);
        let changed = target("a").as_struct().unwrap().with("label", "x");
        let targets = Node::catalog_of([StructNode::into_node(changed)]).unwrap();
        let actual = with_field(&expected, "targets", targets);
        assert_eq!(
            difference(&expected, &actual),
            Difference::PrimitiveDifference { path: path("/targets/a/label") }
        );
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(Difference::NodeMissing { path: path("/x") }).unwrap();
        assert_eq!(json["kind"], "node_missing");
        assert_eq!(json["path"], "/x");
    }
}
