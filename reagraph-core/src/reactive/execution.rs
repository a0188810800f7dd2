//! Handler-facing views of an execution context.
//!
//! [`NodeContext`] is what lifecycle hooks see; [`RunArgs`] is what operation
//! handlers see (a node context plus the request, the resolved dependency
//! values, the resolved context values and the state snapshot).
//! [`ContextHandle`] escapes the handler: it lets background work write state
//! after the handler has returned.

use std::fmt;
use std::ops::Deref;

use super::runtime::{Runtime, WeakRuntime};
use crate::graph::{Dependencies, GraphNode};
use crate::kind::{Request, RunError};
use crate::node::{NodeDefinition, Properties, Value};
use crate::scope::Scope;

/// A node's execution context as seen from inside the engine.
pub struct NodeContext<'a> {
    runtime: &'a Runtime,
    node: &'a GraphNode,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(runtime: &'a Runtime, node: &'a GraphNode) -> Self {
        Self { runtime, node }
    }

    pub fn node(&self) -> &GraphNode {
        self.node
    }

    pub fn definition(&self) -> &NodeDefinition {
        self.node.definition()
    }

    pub fn scope(&self) -> &Scope {
        self.node.scope()
    }

    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    /// Current state. The read is tracked: whatever is being computed now
    /// is invalidated when this state changes.
    pub fn get_state(&self) -> Option<Value> {
        self.runtime.read_state(self.node)
    }

    /// Replace the state with `update(current)`. Returns false if the new
    /// state is structurally equal to the old one (or was rejected).
    pub fn set_state<F>(&self, update: F) -> bool
    where
        F: FnOnce(&Value) -> Value,
    {
        self.runtime.write_state(self.node, update)
    }

    /// Shallow-merge `partial` into a map-valued state.
    pub fn merge_state(&self, partial: Properties) -> bool {
        self.set_state(|current| {
            let mut merged = current.as_map().cloned().unwrap_or_default();
            merged.extend(partial);
            Value::Map(merged)
        })
    }

    pub fn get_data<T>(&self, name: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.scope().store().get_data(&self.node.key(), name)
    }

    pub fn set_data<T>(&self, name: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        let previous = self.scope().store().set_data(&self.node.key(), name, Box::new(value));
        drop(previous);
    }

    pub fn take_data<T>(&self, name: &str) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.scope()
            .store()
            .take_data(&self.node.key(), name)
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    /// Keep this node's context alive beyond its subscriptions.
    pub fn retain(&self) {
        self.runtime.retain(self.node);
    }

    /// Undo a [`NodeContext::retain`]; the context is disposed when nothing
    /// references it any more.
    pub fn release(&self) {
        self.runtime.relinquish(self.node);
    }

    /// A handle for writing state after the handler returns.
    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            runtime: self.runtime.downgrade(),
            node: self.node.clone(),
        }
    }

    /// Resolve `dependencies` relative to this node and combine the results.
    ///
    /// Pending and error dependencies short-circuit: `combine` is not called.
    pub fn resolve<F>(&self, dependencies: Dependencies, combine: F) -> NodeDefinition
    where
        F: FnOnce(&[NodeDefinition]) -> Result<NodeDefinition, RunError>,
    {
        self.runtime.resolve_in(self.node, dependencies, combine)
    }

    /// Perform `request` on `definition` bound into this node's scope and
    /// context, following the result until it is data.
    pub fn perform(&self, definition: NodeDefinition, request: Request) -> NodeDefinition {
        self.runtime.perform(&self.node.bind(definition), request)
    }

    /// Evaluate `definition` bound into this node's scope and context.
    pub fn evaluate(&self, definition: NodeDefinition) -> NodeDefinition {
        self.perform(definition, Request::evaluate())
    }

    /// Emit an event on this node's scope bus.
    pub fn emit(&self, event: &NodeDefinition) {
        self.scope().events().emit(event);
    }
}

impl fmt::Debug for NodeContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext").field("node", self.node).finish()
    }
}

/// Arguments of an operation handler.
pub struct RunArgs<'a> {
    ctx: NodeContext<'a>,
    request: &'a Request,
    dependencies: &'a [NodeDefinition],
    context: &'a [Option<NodeDefinition>],
    state: Option<Value>,
}

impl<'a> RunArgs<'a> {
    pub(crate) fn new(
        ctx: NodeContext<'a>,
        request: &'a Request,
        dependencies: &'a [NodeDefinition],
        context: &'a [Option<NodeDefinition>],
        state: Option<Value>,
    ) -> Self {
        Self {
            ctx,
            request,
            dependencies,
            context,
            state,
        }
    }

    pub fn request(&self) -> &Request {
        self.request
    }

    /// The request payload, if any.
    pub fn payload(&self) -> Option<&NodeDefinition> {
        self.request.payload()
    }

    /// Resolved dependency values, in declaration order.
    pub fn dependencies(&self) -> &[NodeDefinition] {
        self.dependencies
    }

    pub fn dependency(&self, index: usize) -> Option<&NodeDefinition> {
        self.dependencies.get(index)
    }

    /// Context values, in the order of the operation's context keys.
    pub fn context_values(&self) -> &[Option<NodeDefinition>] {
        self.context
    }

    /// State snapshot taken before the handler ran.
    pub fn state(&self) -> Option<&Value> {
        self.state.as_ref()
    }
}

impl<'a> Deref for RunArgs<'a> {
    type Target = NodeContext<'a>;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

/// Out-of-band access to a node's state.
///
/// Writes through a handle are committed as their own transaction. Once the
/// node's context has been disposed, or the runtime dropped, writes are
/// discarded.
#[derive(Clone)]
pub struct ContextHandle {
    runtime: WeakRuntime,
    node: GraphNode,
}

impl ContextHandle {
    pub fn node(&self) -> &GraphNode {
        &self.node
    }

    pub fn is_live(&self) -> bool {
        self.runtime.upgrade().is_some() && self.node.scope().store().contains(&self.node.key())
    }

    /// Current state, without tracking.
    pub fn get_state(&self) -> Option<Value> {
        self.node.scope().store().state(&self.node.key()).flatten()
    }

    pub fn set_state<F>(&self, update: F) -> bool
    where
        F: FnOnce(&Value) -> Value,
    {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.write_existing_state(&self.node, update),
            None => {
                tracing::warn!(node = %self.node.definition().id(), "state write after runtime shutdown dropped");
                false
            }
        }
    }

    /// Mark async work as outstanding. The context is not disposed before the
    /// returned guard is dropped.
    pub fn hold(&self) -> Option<AsyncHold> {
        let runtime = self.runtime.upgrade()?;
        runtime.hold(&self.node).then(|| AsyncHold {
            runtime: self.runtime.clone(),
            node: self.node.clone(),
        })
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle").field("node", &self.node).finish()
    }
}

/// Outstanding async work on a node. Dropping it completes the work.
#[must_use = "dropping the hold completes the async work immediately"]
pub struct AsyncHold {
    runtime: WeakRuntime,
    node: GraphNode,
}

impl Drop for AsyncHold {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unhold(&self.node);
        }
    }
}

impl fmt::Debug for AsyncHold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncHold").field("node", &self.node).finish()
    }
}
