//! Scopes
//!
//! A scope is a unit of isolation: it owns exactly one [`Store`] (execution
//! contexts of the graph nodes bound into it) and one [`EventBus`]. The
//! engine creates a root scope; the built-in `scope { target }` kind creates
//! nested scopes, which are torn down when the last reference to them goes.

mod events;

pub use events::{EventBus, ListenerGuard, ListenerId, Redispatch};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crate::kind::{NodeKind, Operation, OperationName, Outcome, RunError};
use crate::node::{FieldType, NodeDefinition, Shape, Value};
use crate::reactive::Store;

/// Unique identifier for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

struct ScopeInner {
    id: ScopeId,
    store: Store,
    events: EventBus,
    parent: Option<Weak<ScopeInner>>,
    closed: AtomicBool,
}

/// Isolation boundary owning one store and one event bus.
#[derive(Clone)]
pub struct Scope(Arc<ScopeInner>);

impl Scope {
    pub fn root() -> Self {
        Self(Arc::new(ScopeInner {
            id: ScopeId::new(),
            store: Store::new(),
            events: EventBus::new(),
            parent: None,
            closed: AtomicBool::new(false),
        }))
    }

    /// Create a nested scope. It receives this scope's events only as
    /// allowed by this scope's bus [`Redispatch`] policy.
    pub fn child(&self) -> Scope {
        let child = Self(Arc::new(ScopeInner {
            id: ScopeId::new(),
            store: Store::new(),
            events: EventBus::new(),
            parent: Some(Arc::downgrade(&self.0)),
            closed: AtomicBool::new(false),
        }));
        self.0.events.adopt(&child.0.events);
        tracing::debug!(parent = self.id().raw(), child = child.id().raw(), "created nested scope");
        child
    }

    pub fn id(&self) -> ScopeId {
        self.0.id
    }

    pub fn store(&self) -> &Store {
        &self.0.store
    }

    pub fn events(&self) -> &EventBus {
        &self.0.events
    }

    pub fn parent(&self) -> Option<Scope> {
        self.0.parent.as_ref().and_then(Weak::upgrade).map(Scope)
    }

    pub fn set_redispatch(&self, redispatch: Redispatch) {
        self.0.events.set_redispatch(redispatch);
    }

    /// True once this scope, or any scope above it, has been torn down.
    /// Nothing bound into a closed scope can be reached again.
    pub fn is_closed(&self) -> bool {
        if self.0.closed.load(Ordering::Acquire) {
            return true;
        }
        match &self.0.parent {
            Some(parent) => parent.upgrade().map_or(true, |parent| Scope(parent).is_closed()),
            None => false,
        }
    }

    pub(crate) fn close(&self) {
        if !self.0.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(scope = self.id().raw(), "closed nested scope");
        }
    }
}

/// A nested scope held by the `scope` node that created it. The scope closes
/// when the node's execution context drops it.
struct OwnedScope(Scope);

impl Drop for OwnedScope {
    fn drop(&mut self) {
        self.0.close();
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Scope {}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.0.id)
            .field("has_parent", &self.0.parent.is_some())
            .finish()
    }
}

pub const SCOPE: &str = "scope";
const CHILD_SCOPE_DATA: &str = "scope";

/// `scope { target }`: evaluates `target` inside a nested scope owned by the
/// scope node. The nested scope lives in the node's ephemeral data, so it is
/// torn down together with the node's execution context.
pub fn scope_kind() -> &'static NodeKind {
    static KIND: OnceLock<NodeKind> = OnceLock::new();
    KIND.get_or_init(|| {
        NodeKind::builder(SCOPE)
            .shape(Shape::empty().required("target", FieldType::Node))
            .state(|_| Value::Null)
            .operation(
                OperationName::Evaluate,
                Operation::new(|args| {
                    let Some(target) = args.node().definition().node("target") else {
                        return Err(RunError::message("Invalid scope node"));
                    };
                    let child = match args.get_data::<Arc<OwnedScope>>(CHILD_SCOPE_DATA) {
                        Some(existing) => existing.0.clone(),
                        None => {
                            let created = args.node().scope().child();
                            args.set_data(CHILD_SCOPE_DATA, Arc::new(OwnedScope(created.clone())));
                            created
                        }
                    };
                    Ok(Outcome::Node(crate::graph::GraphNode::new(
                        target.clone(),
                        child,
                        args.node().context().clone(),
                    )))
                }),
            )
            .build()
    })
}

/// Build a `scope` definition.
pub fn scope(target: NodeDefinition) -> NodeDefinition {
    NodeDefinition::new_unchecked(scope_kind().clone(), crate::props! { "target" => target })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::sentinel;
    use crate::props;
    use crate::reactive::Runtime;
    use parking_lot::Mutex;

    #[test]
    fn child_scopes_know_their_parent() {
        let root = Scope::root();
        let child = root.child();
        assert_ne!(root.id(), child.id());
        assert_eq!(child.parent(), Some(root.clone()));
        assert!(root.parent().is_none());
    }

    #[test]
    fn parent_link_is_weak() {
        let child = {
            let root = Scope::root();
            root.child()
        };
        assert!(child.parent().is_none());
    }

    #[test]
    fn collected_scope_nodes_free_their_nested_scope() {
        let captured: Arc<Mutex<Option<Scope>>> = Arc::new(Mutex::new(None));
        let slot = captured.clone();
        let capture = NodeKind::builder("scope_test_capture")
            .operation(
                OperationName::Evaluate,
                Operation::new(move |args| {
                    *slot.lock() = Some(args.scope().clone());
                    Ok(sentinel::ok().into())
                }),
            )
            .build();
        let target = NodeDefinition::create(&capture, props! {}).unwrap();

        let runtime = Runtime::new();
        assert!(sentinel::is_ok(&runtime.evaluate(&runtime.node(scope(target)))));
        let child = captured.lock().take().unwrap();
        assert_ne!(&child, runtime.root_scope());
        assert!(!child.is_closed());
        let weak = Arc::downgrade(&child.0);
        drop(child);

        assert_eq!(runtime.gc(runtime.root_scope()), 1);
        assert_eq!(runtime.cache_len(), 0);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn scopes_below_a_closed_scope_are_closed() {
        let root = Scope::root();
        let child = root.child();
        let grandchild = child.child();
        child.close();
        assert!(grandchild.is_closed());
        assert!(!root.is_closed());
    }
}
