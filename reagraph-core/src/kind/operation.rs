//! Operations
//!
//! An operation is a named capability a node kind implements. Names form a
//! closed set ([`OperationName`]); each kind holds a lookup table from name
//! to [`Operation`], and asking a kind for an operation it does not declare
//! is a typed [`EngineError::UnsupportedOperation`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::error::{EngineError, ValidationError};
use crate::graph::{Dependencies, GraphNode};
use crate::node::{sentinel, NodeDefinition};
use crate::reactive::RunArgs;

/// The closed set of operation names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationName {
    Evaluate,
    Call,
    Get,
    Set,
    Reset,
    Push,
    Pop,
    Contains,
    Emit,
}

impl OperationName {
    pub const ALL: [OperationName; 9] = [
        OperationName::Evaluate,
        OperationName::Call,
        OperationName::Get,
        OperationName::Set,
        OperationName::Reset,
        OperationName::Push,
        OperationName::Pop,
        OperationName::Contains,
        OperationName::Emit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationName::Evaluate => "evaluate",
            OperationName::Call => "call",
            OperationName::Get => "get",
            OperationName::Set => "set",
            OperationName::Reset => "reset",
            OperationName::Push => "push",
            OperationName::Pop => "pop",
            OperationName::Contains => "contains",
            OperationName::Emit => "emit",
        }
    }

    /// Operations with externally observable side effects. These are never
    /// memoised, whatever their `cacheable` flag says.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            OperationName::Call
                | OperationName::Set
                | OperationName::Reset
                | OperationName::Push
                | OperationName::Pop
                | OperationName::Emit
        )
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationName {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| EngineError::UnknownOperation(s.to_string()))
    }
}

/// An invocation of an operation, optionally with a payload (the value
/// submitted to `set`, the item given to `push`, ...).
///
/// Requests are part of the cache key, so they hash by payload identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
    operation: OperationName,
    payload: Option<NodeDefinition>,
}

impl Request {
    pub fn new(operation: OperationName, payload: Option<NodeDefinition>) -> Self {
        Self { operation, payload }
    }

    pub fn evaluate() -> Self {
        Self::new(OperationName::Evaluate, None)
    }

    pub fn call() -> Self {
        Self::new(OperationName::Call, None)
    }

    pub fn get() -> Self {
        Self::new(OperationName::Get, None)
    }

    pub fn set(value: NodeDefinition) -> Self {
        Self::new(OperationName::Set, Some(value))
    }

    pub fn reset() -> Self {
        Self::new(OperationName::Reset, None)
    }

    pub fn operation(&self) -> OperationName {
        self.operation
    }

    pub fn payload(&self) -> Option<&NodeDefinition> {
        self.payload.as_ref()
    }
}

/// Forwarding of an operation to another graph node.
#[derive(Debug, Clone)]
pub struct GraphAction {
    pub target: GraphNode,
    pub request: Request,
}

impl GraphAction {
    pub fn new(target: GraphNode, request: Request) -> Self {
        Self { target, request }
    }
}

/// What a `run` handler produces.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A plain definition; the engine rebinds it into the invoking node's
    /// scope and context.
    Definition(NodeDefinition),
    /// An already-bound graph node, returned unchanged.
    Node(GraphNode),
    /// Forward an operation to another node.
    Action(GraphAction),
}

impl From<NodeDefinition> for Outcome {
    fn from(definition: NodeDefinition) -> Self {
        Outcome::Definition(definition)
    }
}

impl From<GraphNode> for Outcome {
    fn from(node: GraphNode) -> Self {
        Outcome::Node(node)
    }
}

impl From<GraphAction> for Outcome {
    fn from(action: GraphAction) -> Self {
        Outcome::Action(action)
    }
}

/// Failure of a `run` handler.
///
/// The engine converts this into an `error` sentinel attributed to the
/// originating node. A handler that already holds an `error` sentinel returns
/// [`RunError::Sentinel`] and it passes through unchanged.
#[derive(Error, Debug, Clone)]
pub enum RunError {
    #[error("{0}")]
    Message(String),

    #[error("{}", sentinel::error_message(.0).unwrap_or("error"))]
    Sentinel(NodeDefinition),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl RunError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Convert into an `error` sentinel attributed to `source`.
    pub(crate) fn into_sentinel(self, source: &NodeDefinition) -> NodeDefinition {
        match self {
            RunError::Sentinel(node) if sentinel::is_error(&node) => node,
            other => sentinel::error_at(source.id(), other.to_string()),
        }
    }
}

impl From<String> for RunError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for RunError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

impl From<EngineError> for RunError {
    fn from(err: EngineError) -> Self {
        Self::Message(err.to_string())
    }
}

pub type RunFn = Arc<dyn Fn(&RunArgs<'_>) -> Result<Outcome, RunError> + Send + Sync>;
pub type DependenciesFn = Arc<dyn Fn(&NodeDefinition, &Request) -> Dependencies + Send + Sync>;
pub type ContextDependenciesFn = Arc<dyn Fn(&NodeDefinition, &Request) -> Vec<String> + Send + Sync>;

/// A named capability of a node kind.
#[derive(Clone)]
pub struct Operation {
    cacheable: bool,
    dependencies: Option<DependenciesFn>,
    context_dependencies: Option<ContextDependenciesFn>,
    run: RunFn,
}

impl Operation {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&RunArgs<'_>) -> Result<Outcome, RunError> + Send + Sync + 'static,
    {
        Self {
            cacheable: true,
            dependencies: None,
            context_dependencies: None,
            run: Arc::new(run),
        }
    }

    /// Always recompute, for operations whose effect must happen on every read.
    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Graph dependencies resolved before `run` is invoked.
    pub fn with_dependencies<F>(mut self, dependencies: F) -> Self
    where
        F: Fn(&NodeDefinition, &Request) -> Dependencies + Send + Sync + 'static,
    {
        self.dependencies = Some(Arc::new(dependencies));
        self
    }

    /// Ambient context keys looked up on the node's context path.
    pub fn with_context<F>(mut self, keys: F) -> Self
    where
        F: Fn(&NodeDefinition, &Request) -> Vec<String> + Send + Sync + 'static,
    {
        self.context_dependencies = Some(Arc::new(keys));
        self
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    pub(crate) fn dependencies(&self, node: &NodeDefinition, request: &Request) -> Dependencies {
        match &self.dependencies {
            Some(f) => f(node, request),
            None => Dependencies::new(),
        }
    }

    pub(crate) fn context_keys(&self, node: &NodeDefinition, request: &Request) -> Vec<String> {
        match &self.context_dependencies {
            Some(f) => f(node, request),
            None => Vec::new(),
        }
    }

    pub(crate) fn run(&self, args: &RunArgs<'_>) -> Result<Outcome, RunError> {
        (self.run)(args)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("cacheable", &self.cacheable)
            .field("has_dependencies", &self.dependencies.is_some())
            .field("has_context", &self.context_dependencies.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_round_trip_through_strings() {
        for op in OperationName::ALL {
            assert_eq!(op.as_str().parse::<OperationName>().unwrap(), op);
        }
    }

    #[test]
    fn unknown_operation_names_are_rejected() {
        let err = "frobnicate".parse::<OperationName>().unwrap_err();
        assert_eq!(err, EngineError::UnknownOperation("frobnicate".to_string()));
    }

    #[test]
    fn mutations_are_flagged() {
        assert!(OperationName::Set.is_mutation());
        assert!(!OperationName::Evaluate.is_mutation());
        assert!(!OperationName::Get.is_mutation());
    }

    #[test]
    fn run_errors_become_attributed_error_sentinels() {
        let source = sentinel::value(1);
        let node = RunError::message("bad input").into_sentinel(&source);
        assert_eq!(sentinel::error_message(&node), Some("bad input"));
        assert_eq!(
            node.get("source").and_then(crate::node::Value::as_str),
            Some(source.id().as_str())
        );
    }

    #[test]
    fn error_sentinels_pass_through_unchanged() {
        let original = sentinel::error("upstream failed");
        let node = RunError::Sentinel(original.clone()).into_sentinel(&sentinel::value(1));
        assert_eq!(node, original);
    }
}
