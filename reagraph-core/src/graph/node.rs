//! Graph Nodes
//!
//! A [`GraphNode`] is a node definition bound to a [`Scope`] and a
//! [`ContextPath`]. Equal definitions bound in different scopes or contexts
//! are distinct graph nodes with distinct cache entries and execution
//! contexts; [`GraphKey`] is the identity used for both.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::kind::{NodeKind, Operation, OperationName, Outcome, RunError};
use crate::node::{FieldType, NodeDefinition, NodeId, Shape, Value};
use crate::scope::{Scope, ScopeId};

/// One ambient value on a context path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextFrame {
    pub key: String,
    pub value: NodeDefinition,
}

/// Position of a node in the evaluated tree, carrying ambient values such as
/// path parameters. Immutable; pushing a frame returns a new path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ContextPath {
    frames: Arc<Vec<ContextFrame>>,
}

impl ContextPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn with(&self, key: impl Into<String>, value: NodeDefinition) -> Self {
        let mut frames = (*self.frames).clone();
        frames.push(ContextFrame {
            key: key.into(),
            value,
        });
        Self {
            frames: Arc::new(frames),
        }
    }

    /// Nearest value bound under `key`.
    pub fn lookup(&self, key: &str) -> Option<&NodeDefinition> {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.key == key)
            .map(|frame| &frame.value)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Identity of a graph node: scope, context path and definition id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphKey {
    pub scope: ScopeId,
    pub context: ContextPath,
    pub id: NodeId,
}

/// A node definition instantiated within a scope and context path.
#[derive(Clone)]
pub struct GraphNode {
    definition: NodeDefinition,
    scope: Scope,
    context: ContextPath,
}

impl GraphNode {
    pub fn new(definition: NodeDefinition, scope: Scope, context: ContextPath) -> Self {
        Self {
            definition,
            scope,
            context,
        }
    }

    pub fn definition(&self) -> &NodeDefinition {
        &self.definition
    }

    pub fn kind(&self) -> &NodeKind {
        self.definition.kind()
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn context(&self) -> &ContextPath {
        &self.context
    }

    pub fn key(&self) -> GraphKey {
        GraphKey {
            scope: self.scope.id(),
            context: self.context.clone(),
            id: self.definition.id().clone(),
        }
    }

    /// Bind another definition into this node's scope and context.
    pub fn bind(&self, definition: NodeDefinition) -> GraphNode {
        GraphNode::new(definition, self.scope.clone(), self.context.clone())
    }

    /// Bind `definition` under this node's context extended with a frame.
    pub fn bind_with(&self, definition: NodeDefinition, key: &str, value: NodeDefinition) -> GraphNode {
        GraphNode::new(definition, self.scope.clone(), self.context.with(key, value))
    }
}

impl PartialEq for GraphNode {
    fn eq(&self, other: &Self) -> bool {
        self.scope.id() == other.scope.id()
            && self.context == other.context
            && self.definition == other.definition
    }
}

impl Eq for GraphNode {}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", self.definition.id())
            .field("scope", &self.scope.id())
            .field("context_depth", &self.context.depth())
            .finish()
    }
}

pub const PROVIDE: &str = "provide";

/// `provide { key, value, target }`: evaluates to `target` with `value`
/// bound under `key` on its context path.
pub fn provide_kind() -> &'static NodeKind {
    static KIND: OnceLock<NodeKind> = OnceLock::new();
    KIND.get_or_init(|| {
        NodeKind::builder(PROVIDE)
            .shape(
                Shape::empty()
                    .required("key", FieldType::String)
                    .required("value", FieldType::Node)
                    .required("target", FieldType::Node),
            )
            .operation(
                OperationName::Evaluate,
                Operation::new(|args| {
                    let node = args.node().definition();
                    let (Some(key), Some(value), Some(target)) = (
                        node.get("key").and_then(Value::as_str),
                        node.node("value"),
                        node.node("target"),
                    ) else {
                        return Err(RunError::message("Invalid provide node"));
                    };
                    Ok(Outcome::Node(args.node().bind_with(target.clone(), key, value.clone())))
                }),
            )
            .build()
    })
}

/// Build a `provide` definition.
pub fn provide(key: &str, value: NodeDefinition, target: NodeDefinition) -> NodeDefinition {
    NodeDefinition::new_unchecked(
        provide_kind().clone(),
        crate::props! { "key" => key, "value" => value, "target" => target },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::sentinel;

    #[test]
    fn context_lookup_prefers_nearest_frame() {
        let path = ContextPath::root()
            .with("id", sentinel::value(1))
            .with("other", sentinel::value(2))
            .with("id", sentinel::value(3));
        assert_eq!(path.lookup("id"), Some(&sentinel::value(3)));
        assert_eq!(path.lookup("other"), Some(&sentinel::value(2)));
        assert!(path.lookup("missing").is_none());
        assert_eq!(path.depth(), 3);
    }

    #[test]
    fn equal_definitions_in_different_scopes_are_distinct() {
        let root = Scope::root();
        let child = root.child();
        let a = GraphNode::new(sentinel::value(1), root.clone(), ContextPath::root());
        let b = GraphNode::new(sentinel::value(1), child, ContextPath::root());
        let c = GraphNode::new(sentinel::value(1), root, ContextPath::root());
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), c.key());
    }

    #[test]
    fn equal_definitions_in_different_contexts_are_distinct() {
        let scope = Scope::root();
        let a = GraphNode::new(sentinel::value(1), scope.clone(), ContextPath::root());
        let b = GraphNode::new(
            sentinel::value(1),
            scope,
            ContextPath::root().with("k", sentinel::nil()),
        );
        assert_ne!(a.key(), b.key());
    }
}
