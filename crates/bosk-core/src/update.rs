//! Updates: the only way the state tree changes.

use bosk_tree::{CompiledPath, Node, PathCompiler, StateValue};
use bosk_types::{diagnostics, DiagnosticContext, Identifier, Path};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What an update does. Targets are concrete paths in the bosk's schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOp {
    /// Store `value` at `target`.
    Replacement { target: Path, value: Node },
    /// Like `Replacement`, applied only if `precondition` currently holds
    /// `required`.
    ConditionalReplacement {
        target: Path,
        value: Node,
        precondition: Path,
        required: Identifier,
    },
    /// Store `value` at `target` only if nothing is there yet.
    Initialization { target: Path, value: Node },
    /// Remove whatever is at `target`.
    Deletion { target: Path },
    /// Like `Deletion`, applied only if `precondition` currently holds
    /// `required`.
    ConditionalDeletion {
        target: Path,
        precondition: Path,
        required: Identifier,
    },
}

impl UpdateOp {
    pub fn target(&self) -> &Path {
        match self {
            UpdateOp::Replacement { target, .. }
            | UpdateOp::ConditionalReplacement { target, .. }
            | UpdateOp::Initialization { target, .. }
            | UpdateOp::Deletion { target }
            | UpdateOp::ConditionalDeletion { target, .. } => target,
        }
    }

    /// The precondition and the identifier it must hold, for conditional ops.
    pub fn precondition(&self) -> Option<(&Path, &Identifier)> {
        match self {
            UpdateOp::ConditionalReplacement {
                precondition,
                required,
                ..
            }
            | UpdateOp::ConditionalDeletion {
                precondition,
                required,
                ..
            } => Some((precondition, required)),
            _ => None,
        }
    }

    /// The root that results from applying this operation to `root`, or
    /// `None` if it changes nothing.
    ///
    /// Unmet preconditions, initialization of something already present,
    /// and replacement under a missing ancestor are all `Ok(None)`.
    pub fn apply(&self, compiler: &PathCompiler, root: &Node) -> bosk_tree::Result<Option<Node>> {
        let target = compiler.compile(self.target())?;
        if let Some((precondition, required)) = self.precondition() {
            if !precondition_holds(compiler, root, precondition, required)? {
                debug!(precondition = %precondition, required = %required, "precondition not met");
                return Ok(None);
            }
        }
        match self {
            UpdateOp::Replacement { value, .. } | UpdateOp::ConditionalReplacement { value, .. } => {
                replace(&target, root, value)
            }
            UpdateOp::Initialization { value, .. } => {
                if target.exists(root) {
                    return Ok(None);
                }
                replace(&target, root, value)
            }
            UpdateOp::Deletion { .. } | UpdateOp::ConditionalDeletion { .. } => {
                let after = target.without(root)?;
                Ok((after != *root).then_some(after))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UpdateOp::Replacement { .. } => "replacement",
            UpdateOp::ConditionalReplacement { .. } => "conditional replacement",
            UpdateOp::Initialization { .. } => "initialization",
            UpdateOp::Deletion { .. } => "deletion",
            UpdateOp::ConditionalDeletion { .. } => "conditional deletion",
        }
    }
}

fn precondition_holds(
    compiler: &PathCompiler,
    root: &Node,
    precondition: &Path,
    required: &Identifier,
) -> bosk_tree::Result<bool> {
    let compiled = compiler.compile_as(precondition, &Identifier::kind())?;
    match compiled.get(root) {
        Ok(node) => Ok(node.as_id()? == required),
        Err(e) if e.is_nonexistent() => Ok(false),
        Err(e) => Err(e),
    }
}

fn replace(target: &CompiledPath, root: &Node, value: &Node) -> bosk_tree::Result<Option<Node>> {
    match target.with(root, value.clone()) {
        Ok(after) => Ok(Some(after)),
        Err(e) if e.is_nonexistent() => {
            debug!(target = %target.path(), "ancestor missing; replacement ignored");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// An operation plus the diagnostic context of the thread that submitted it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub op: UpdateOp,
    pub diagnostics: DiagnosticContext,
}

impl Update {
    /// Wrap `op`, capturing the calling thread's diagnostic context.
    pub fn new(op: UpdateOp) -> Self {
        Self {
            op,
            diagnostics: diagnostics::current(),
        }
    }

    pub fn replacement(target: Path, value: Node) -> Self {
        Self::new(UpdateOp::Replacement { target, value })
    }

    pub fn initialization(target: Path, value: Node) -> Self {
        Self::new(UpdateOp::Initialization { target, value })
    }

    pub fn deletion(target: Path) -> Self {
        Self::new(UpdateOp::Deletion { target })
    }

    pub fn target(&self) -> &Path {
        self.op.target()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_submitting_thread_diagnostics() {
        let _scope = diagnostics::with_attribute("request", "r9");
        let update = Update::deletion(Path::parse("/targets/a").unwrap());
        assert_eq!(update.diagnostics.get("request"), Some("r9"));
        assert_eq!(update.target(), &Path::parse("/targets/a").unwrap());
    }

    #[test]
    fn encodes_with_json_and_bincode() {
        let update = Update::new(UpdateOp::ConditionalReplacement {
            target: Path::parse("/name").unwrap(),
            value: Node::from("x"),
            precondition: Path::parse("/owner").unwrap(),
            required: Identifier::from("me"),
        });
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(serde_json::from_str::<Update>(&json).unwrap(), update);
        let bytes = bincode::serialize(&update).unwrap();
        assert_eq!(bincode::deserialize::<Update>(&bytes).unwrap(), update);
    }

    #[test]
    fn apply_reports_no_change() {
        let compiler = crate::testing::compiler();
        let root = crate::testing::root_with(&["a"]);
        let delete_missing = UpdateOp::Deletion {
            target: Path::parse("/targets/zz").unwrap(),
        };
        assert_eq!(delete_missing.apply(&compiler, &root).unwrap(), None);

        let orphan = UpdateOp::Replacement {
            target: Path::parse("/targets/zz/label").unwrap(),
            value: Node::from("x"),
        };
        assert_eq!(orphan.apply(&compiler, &root).unwrap(), None);

        let rename = UpdateOp::Replacement {
            target: Path::parse("/name").unwrap(),
            value: Node::from("renamed"),
        };
        let after = rename.apply(&compiler, &root).unwrap().unwrap();
        assert_eq!(after.as_struct().unwrap().require("name").unwrap(), &Node::from("renamed"));
    }
}
