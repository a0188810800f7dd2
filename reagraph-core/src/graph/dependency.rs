//! Dependencies
//!
//! A [`Dependency`] names a target and a readiness [`Condition`]. The
//! resolver keeps evaluating the target until the condition holds, a flag
//! says to accept the sentinel it reached, or the chain bottoms out without
//! satisfying the condition.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::node::GraphNode;
use crate::kind::{NodeKind, OperationName, Request};
use crate::node::{sentinel, FieldType, NodeDefinition};

pub type Dependencies = SmallVec<[Dependency; 4]>;

type PredicateFn = Arc<dyn Fn(&NodeDefinition) -> bool + Send + Sync>;
type MessageFn = Arc<dyn Fn(&NodeDefinition) -> String + Send + Sync>;

/// Readiness predicate plus the message used when it can never hold.
#[derive(Clone)]
pub struct Condition {
    predicate: PredicateFn,
    message: MessageFn,
}

impl Condition {
    pub fn new<P, M>(predicate: P, message: M) -> Self
    where
        P: Fn(&NodeDefinition) -> bool + Send + Sync + 'static,
        M: Fn(&NodeDefinition) -> String + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            message: Arc::new(message),
        }
    }

    /// Fully evaluated: the node has no evaluate handler and is not one of
    /// the `pending`, `error` or `nil` sentinels.
    pub fn data() -> Self {
        Self::new(
            |node| {
                !node.kind().has_operation(OperationName::Evaluate)
                    && !sentinel::is_pending(node)
                    && !sentinel::is_error(node)
                    && !sentinel::is_nil(node)
            },
            |node| format!("Expected data, received {}", sentinel::describe(node)),
        )
    }

    /// The first node reached, without evaluating it.
    pub fn any() -> Self {
        Self::new(|_| true, |_| String::new())
    }

    /// A node of the given kind.
    pub fn kind(kind: &NodeKind) -> Self {
        let expected = kind.name().to_string();
        let label = expected.clone();
        Self::new(
            move |node| node.kind_name() == expected,
            move |node| format!("Expected <{}>, received {}", label, sentinel::describe(node)),
        )
    }

    /// A `value` node whose payload has the given type.
    pub fn value(ty: FieldType) -> Self {
        Self::new(
            move |node| sentinel::is_value(node) && node.get("value").is_some_and(|v| ty.accepts(v)),
            move |node| format!("Expected value<{}>, received {}", ty, sentinel::describe(node)),
        )
    }

    pub fn test(&self, node: &NodeDefinition) -> bool {
        (self.predicate)(node)
    }

    pub fn error_message(&self, node: &NodeDefinition) -> String {
        (self.message)(node)
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::data()
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Condition")
    }
}

/// What a dependency points at.
#[derive(Debug, Clone)]
pub enum DependencyTarget {
    /// Bound into the requesting node's scope and context.
    Definition(NodeDefinition),
    /// Used as is.
    Node(GraphNode),
    /// Resolve the inner dependency first, then treat its value as the target.
    Nested(Box<Dependency>),
}

impl From<NodeDefinition> for DependencyTarget {
    fn from(definition: NodeDefinition) -> Self {
        DependencyTarget::Definition(definition)
    }
}

impl From<GraphNode> for DependencyTarget {
    fn from(node: GraphNode) -> Self {
        DependencyTarget::Node(node)
    }
}

impl From<Dependency> for DependencyTarget {
    fn from(dependency: Dependency) -> Self {
        DependencyTarget::Nested(Box::new(dependency))
    }
}

/// A gated reference to another node.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub(crate) target: DependencyTarget,
    pub(crate) until: Condition,
    pub(crate) request: Option<Request>,
    pub(crate) once: bool,
    pub(crate) accept_nil: bool,
    pub(crate) allow_errors: bool,
    pub(crate) allow_pending: bool,
}

impl Dependency {
    /// Depend on `target`, waiting until it is fully evaluated data.
    pub fn on(target: impl Into<DependencyTarget>) -> Self {
        Self {
            target: target.into(),
            until: Condition::data(),
            request: None,
            once: false,
            accept_nil: false,
            allow_errors: false,
            allow_pending: false,
        }
    }

    pub fn until(mut self, condition: Condition) -> Self {
        self.until = condition;
        self
    }

    /// Start with this request instead of `evaluate`.
    pub fn with_request(mut self, request: Request) -> Self {
        self.request = Some(request);
        self
    }

    /// Resolve once per subscription; later upstream changes do not re-run
    /// the combinator.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn accept_nil(mut self) -> Self {
        self.accept_nil = true;
        self
    }

    pub fn allow_errors(mut self) -> Self {
        self.allow_errors = true;
        self
    }

    pub fn allow_pending(mut self) -> Self {
        self.allow_pending = true;
        self
    }

    pub fn is_once(&self) -> bool {
        self.once
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_condition_checks_payload_type() {
        let condition = Condition::value(FieldType::String);
        assert!(condition.test(&sentinel::value("hi")));
        assert!(!condition.test(&sentinel::value(1)));
        assert!(!condition.test(&sentinel::nil()));
        assert_eq!(
            condition.error_message(&sentinel::value(1)),
            "Expected value<string>, received value<int>"
        );
    }

    #[test]
    fn data_condition_accepts_static_nodes() {
        assert!(Condition::data().test(&sentinel::value(1)));
        assert!(Condition::data().test(&sentinel::ok()));
        assert!(!Condition::data().test(&sentinel::nil()));
        assert!(!Condition::data().test(&sentinel::pending()));
    }

    #[test]
    fn kind_condition_names_expected_kind() {
        let condition = Condition::kind(sentinel::ok_kind());
        assert!(condition.test(&sentinel::ok()));
        assert_eq!(
            condition.error_message(&sentinel::nil()),
            "Expected <ok>, received <nil>"
        );
    }

    #[test]
    fn builder_flags_default_off() {
        let dep = Dependency::on(sentinel::value(1));
        assert!(!dep.once && !dep.accept_nil && !dep.allow_errors && !dep.allow_pending);
        let dep = dep.once().accept_nil().allow_errors().allow_pending();
        assert!(dep.once && dep.accept_nil && dep.allow_errors && dep.allow_pending);
    }
}
