//! Event Bus
//!
//! Each scope owns one bus. `emit` delivers synchronously to every listener
//! registered on the same bus, then forwards the event to child scopes
//! according to the bus's [`Redispatch`] policy. Events never travel from a
//! child scope to its parent.
//!
//! Events are node definitions, so they are pure data like everything else
//! flowing through the graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::node::NodeDefinition;

type ListenerFn = Arc<dyn Fn(&NodeDefinition) + Send + Sync>;
type FilterFn = Arc<dyn Fn(&NodeDefinition) -> Option<NodeDefinition> + Send + Sync>;

/// Which events a bus forwards to its child scopes.
#[derive(Clone, Default)]
pub enum Redispatch {
    /// Forward nothing.
    #[default]
    None,
    /// Forward everything.
    All,
    /// Forward the returned event, or nothing on `None`.
    Filter(FilterFn),
}

impl Redispatch {
    pub fn filter<F>(f: F) -> Self
    where
        F: Fn(&NodeDefinition) -> Option<NodeDefinition> + Send + Sync + 'static,
    {
        Redispatch::Filter(Arc::new(f))
    }

    fn apply(&self, event: &NodeDefinition) -> Option<NodeDefinition> {
        match self {
            Redispatch::None => None,
            Redispatch::All => Some(event.clone()),
            Redispatch::Filter(f) => f(event),
        }
    }
}

impl fmt::Debug for Redispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Redispatch::None => f.write_str("Redispatch::None"),
            Redispatch::All => f.write_str("Redispatch::All"),
            Redispatch::Filter(_) => f.write_str("Redispatch::Filter"),
        }
    }
}

/// Unique identifier for a listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct BusInner {
    listeners: RwLock<IndexMap<ListenerId, ListenerFn>>,
    children: Mutex<Vec<Weak<BusInner>>>,
    redispatch: RwLock<Redispatch>,
}

impl BusInner {
    fn deliver(&self, event: &NodeDefinition) {
        // Release the lock before invoking listeners; they may listen or emit.
        let listeners: Vec<ListenerFn> = self.listeners.read().values().cloned().collect();
        for listener in listeners {
            listener(event);
        }

        let forwarded = self.redispatch.read().apply(event);
        if let Some(forwarded) = forwarded {
            let children: Vec<Arc<BusInner>> = {
                let mut children = self.children.lock();
                children.retain(|child| child.strong_count() > 0);
                children.iter().filter_map(Weak::upgrade).collect()
            };
            for child in children {
                child.deliver(&forwarded);
            }
        }
    }
}

/// Scope-local publish/subscribe channel.
#[derive(Clone)]
pub struct EventBus(Arc<BusInner>);

impl EventBus {
    pub fn new() -> Self {
        Self(Arc::new(BusInner {
            listeners: RwLock::new(IndexMap::new()),
            children: Mutex::new(Vec::new()),
            redispatch: RwLock::new(Redispatch::None),
        }))
    }

    /// Deliver `event` to this scope's listeners and, per the redispatch
    /// policy, to child scopes.
    pub fn emit(&self, event: &NodeDefinition) {
        tracing::trace!(event = %event.id(), "emit");
        self.0.deliver(event);
    }

    /// Register a listener. It stays registered until the returned guard is
    /// dropped or [`ListenerGuard::unsubscribe`] is called.
    pub fn listen<F>(&self, handler: F) -> ListenerGuard
    where
        F: Fn(&NodeDefinition) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.0.listeners.write().insert(id, Arc::new(handler));
        ListenerGuard {
            bus: Arc::downgrade(&self.0),
            id: Some(id),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.0.listeners.read().len()
    }

    pub fn set_redispatch(&self, redispatch: Redispatch) {
        *self.0.redispatch.write() = redispatch;
    }

    pub(crate) fn adopt(&self, child: &EventBus) {
        self.0.children.lock().push(Arc::downgrade(&child.0));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("redispatch", &*self.0.redispatch.read())
            .finish()
    }
}

/// Registration handle returned by [`EventBus::listen`].
///
/// Dropping the guard unregisters the listener.
#[must_use = "dropping the guard unregisters the listener"]
pub struct ListenerGuard {
    bus: Weak<BusInner>,
    id: Option<ListenerId>,
}

impl ListenerGuard {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let (Some(id), Some(bus)) = (self.id.take(), self.bus.upgrade()) {
            bus.listeners.write().shift_remove(&id);
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGuard").field("id", &self.id).finish()
    }
}
