//! Node kinds.
//!
//! A [`NodeKind`] describes a category of node: its property shape, an
//! optional internal state (shape + initial-state factory), its operation
//! table and lifecycle hooks. Three classes fall out of that description:
//!
//! - *static* kinds declare no operations at all; their nodes are data
//! - *stateless* kinds declare operations but no state
//! - *stateful* kinds declare state, which is seeded into the node's
//!   execution context the first time a graph node of the kind is touched

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::operation::{Operation, OperationName};
use super::registry;
use crate::error::EngineError;
use crate::node::{Properties, Shape, Value};
use crate::reactive::NodeContext;

pub type InitialStateFn = Arc<dyn Fn(&Properties) -> Value + Send + Sync>;
pub type HookFn = Arc<dyn Fn(&NodeContext<'_>) + Send + Sync>;
pub type SerializeFn = Arc<dyn Fn(&Properties) -> serde_json::Value + Send + Sync>;
pub type DeserializeFn =
    Arc<dyn Fn(&serde_json::Value) -> Result<Properties, EngineError> + Send + Sync>;

/// Internal state declaration of a stateful kind.
#[derive(Clone)]
pub struct StateSpec {
    pub(crate) shape: Option<Shape>,
    pub(crate) initial: InitialStateFn,
}

/// Lifecycle hooks. Only honoured for stateful kinds.
#[derive(Clone, Default)]
pub struct Lifecycle {
    pub(crate) on_subscribe: Option<HookFn>,
    pub(crate) on_unsubscribe: Option<HookFn>,
    pub(crate) on_update: Option<HookFn>,
    pub(crate) on_invalidate: Option<HookFn>,
}

/// Custom serialization pair for a kind's payload.
#[derive(Clone)]
pub struct Codec {
    pub(crate) serialize: SerializeFn,
    pub(crate) deserialize: DeserializeFn,
}

struct KindInner {
    name: String,
    shape: Shape,
    state: Option<StateSpec>,
    operations: HashMap<OperationName, Operation>,
    lifecycle: Lifecycle,
    codec: Option<Codec>,
}

/// A registered category of node.
///
/// Kinds compare by name: the name is the registry key and the prefix of
/// every node id.
#[derive(Clone)]
pub struct NodeKind(Arc<KindInner>);

impl NodeKind {
    pub fn builder(name: impl Into<String>) -> KindBuilder {
        KindBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn shape(&self) -> &Shape {
        &self.0.shape
    }

    pub fn state(&self) -> Option<&StateSpec> {
        self.0.state.as_ref()
    }

    pub fn is_stateful(&self) -> bool {
        self.0.state.is_some()
    }

    /// No operations at all: nodes of this kind are plain data.
    pub fn is_static(&self) -> bool {
        self.0.operations.is_empty()
    }

    pub fn has_operation(&self, name: OperationName) -> bool {
        self.0.operations.contains_key(&name)
    }

    pub fn operation(&self, name: OperationName) -> Result<&Operation, EngineError> {
        self.0
            .operations
            .get(&name)
            .ok_or_else(|| EngineError::unsupported(self.name(), name.as_str()))
    }

    pub fn operation_names(&self) -> Vec<OperationName> {
        let mut names: Vec<_> = self.0.operations.keys().copied().collect();
        names.sort();
        names
    }

    pub(crate) fn lifecycle(&self) -> &Lifecycle {
        &self.0.lifecycle
    }

    pub(crate) fn codec(&self) -> Option<&Codec> {
        self.0.codec.as_ref()
    }

    /// Seed state for a fresh execution context.
    pub(crate) fn initial_state(&self, properties: &Properties) -> Option<Value> {
        self.0.state.as_ref().map(|spec| (spec.initial)(properties))
    }

    /// Check a candidate state against the declared state shape, if any.
    pub(crate) fn validate_state(&self, state: &Value) -> Result<(), EngineError> {
        let Some(StateSpec {
            shape: Some(shape), ..
        }) = &self.0.state
        else {
            return Ok(());
        };
        match state {
            Value::Map(map) => Ok(shape.validate(self.name(), map)?),
            other => Err(crate::error::ValidationError::InvalidState {
                kind: self.name().to_string(),
                reason: format!("expected map, received {}", other.type_name()),
            }
            .into()),
        }
    }
}

impl PartialEq for NodeKind {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
    }
}

impl Eq for NodeKind {}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeKind")
            .field("name", &self.0.name)
            .field("stateful", &self.is_stateful())
            .field("operations", &self.operation_names())
            .finish()
    }
}

/// Builder for [`NodeKind`].
pub struct KindBuilder {
    name: String,
    shape: Shape,
    state: Option<StateSpec>,
    operations: HashMap<OperationName, Operation>,
    lifecycle: Lifecycle,
    codec: Option<Codec>,
}

impl KindBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: Shape::empty(),
            state: None,
            operations: HashMap::new(),
            lifecycle: Lifecycle::default(),
            codec: None,
        }
    }

    pub fn shape(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    /// Make the kind stateful, seeding each node's state with `initial`.
    pub fn state<F>(mut self, initial: F) -> Self
    where
        F: Fn(&Properties) -> Value + Send + Sync + 'static,
    {
        let shape = self.state.take().and_then(|spec| spec.shape);
        self.state = Some(StateSpec {
            shape,
            initial: Arc::new(initial),
        });
        self
    }

    /// Declared shape of a map-valued state. Requires [`KindBuilder::state`].
    pub fn state_shape(mut self, shape: Shape) -> Self {
        if let Some(spec) = self.state.as_mut() {
            spec.shape = Some(shape);
        }
        self
    }

    pub fn operation(mut self, name: OperationName, operation: Operation) -> Self {
        self.operations.insert(name, operation);
        self
    }

    pub fn on_subscribe<F>(mut self, hook: F) -> Self
    where
        F: Fn(&NodeContext<'_>) + Send + Sync + 'static,
    {
        self.lifecycle.on_subscribe = Some(Arc::new(hook));
        self
    }

    pub fn on_unsubscribe<F>(mut self, hook: F) -> Self
    where
        F: Fn(&NodeContext<'_>) + Send + Sync + 'static,
    {
        self.lifecycle.on_unsubscribe = Some(Arc::new(hook));
        self
    }

    pub fn on_update<F>(mut self, hook: F) -> Self
    where
        F: Fn(&NodeContext<'_>) + Send + Sync + 'static,
    {
        self.lifecycle.on_update = Some(Arc::new(hook));
        self
    }

    pub fn on_invalidate<F>(mut self, hook: F) -> Self
    where
        F: Fn(&NodeContext<'_>) + Send + Sync + 'static,
    {
        self.lifecycle.on_invalidate = Some(Arc::new(hook));
        self
    }

    /// Replace the structural serialization of this kind's payload.
    pub fn codec<S, D>(mut self, serialize: S, deserialize: D) -> Self
    where
        S: Fn(&Properties) -> serde_json::Value + Send + Sync + 'static,
        D: Fn(&serde_json::Value) -> Result<Properties, EngineError> + Send + Sync + 'static,
    {
        self.codec = Some(Codec {
            serialize: Arc::new(serialize),
            deserialize: Arc::new(deserialize),
        });
        self
    }

    /// Build the kind without registering it.
    pub fn build(self) -> NodeKind {
        NodeKind(Arc::new(KindInner {
            name: self.name,
            shape: self.shape,
            state: self.state,
            operations: self.operations,
            lifecycle: self.lifecycle,
            codec: self.codec,
        }))
    }

    /// Build the kind and register it in the process-wide registry.
    pub fn define(self) -> NodeKind {
        let kind = self.build();
        registry::register(kind.clone());
        kind
    }
}

/// Define and register a kind, in one call.
pub fn define(name: impl Into<String>, configure: impl FnOnce(KindBuilder) -> KindBuilder) -> NodeKind {
    configure(NodeKind::builder(name)).define()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Outcome;
    use crate::node::{sentinel, FieldType};
    use crate::props;

    #[test]
    fn classifies_static_stateless_and_stateful_kinds() {
        let marker = NodeKind::builder("marker").build();
        assert!(marker.is_static());
        assert!(!marker.is_stateful());

        let double = NodeKind::builder("double")
            .operation(
                OperationName::Evaluate,
                Operation::new(|_| Ok(Outcome::Definition(sentinel::nil()))),
            )
            .build();
        assert!(!double.is_static());
        assert!(!double.is_stateful());

        let counter = NodeKind::builder("counter").state(|_| Value::Int(0)).build();
        assert!(counter.is_stateful());
        assert_eq!(counter.initial_state(&props! {}), Some(Value::Int(0)));
    }

    #[test]
    fn unknown_operations_are_typed_errors() {
        let marker = NodeKind::builder("marker").build();
        let err = marker.operation(OperationName::Set).unwrap_err();
        assert_eq!(err, EngineError::unsupported("marker", "set"));
    }

    #[test]
    fn state_shape_is_checked() {
        let kind = NodeKind::builder("form")
            .state(|_| Value::Map(props! { "dirty" => false }))
            .state_shape(Shape::empty().required("dirty", FieldType::Bool))
            .build();
        assert!(kind.validate_state(&Value::Map(props! { "dirty" => true })).is_ok());
        assert!(kind.validate_state(&Value::Int(3)).is_err());
        assert!(kind
            .validate_state(&Value::Map(props! { "dirty" => "yes" }))
            .is_err());
    }
}
