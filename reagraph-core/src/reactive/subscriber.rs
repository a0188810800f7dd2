//! Subscriber types for the reactive system.
//!
//! A Subscriber is a long-lived observation of one graph node under one
//! request. It remembers the last result delivered to its listener, the state
//! reads that result depended on, and the stateful nodes it currently keeps
//! alive.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use super::context::ReadSet;
use crate::graph::{GraphKey, GraphNode};
use crate::kind::Request;
use crate::node::NodeDefinition;

/// Unique identifier for a subscriber.
///
/// Uses an atomic counter to ensure uniqueness across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

pub type ListenerFn = Arc<dyn Fn(&NodeDefinition) + Send + Sync>;

/// Memo key of a `once` dependency: who asked, for what, at which position.
/// `request` is `None` for dependencies resolved directly by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct OnceKey {
    pub origin: GraphKey,
    pub request: Option<Request>,
    pub index: usize,
}

/// A subscription to a graph node.
pub(crate) struct Subscriber {
    pub node: GraphNode,
    pub request: Request,
    listener: ListenerFn,
    /// Last result delivered to the listener.
    pub last: Option<NodeDefinition>,
    /// Reads of the last refresh.
    pub reads: ReadSet,
    /// Stateful nodes this subscription holds a reference on.
    pub retained: IndexMap<GraphKey, GraphNode>,
    /// Resolved `once` dependencies.
    pub once: HashMap<OnceKey, GraphNode>,
}

impl Subscriber {
    pub fn new(node: GraphNode, request: Request, listener: ListenerFn) -> Self {
        Self {
            node,
            request,
            listener,
            last: None,
            reads: ReadSet::new(),
            retained: IndexMap::new(),
            once: HashMap::new(),
        }
    }

    pub fn listener(&self) -> ListenerFn {
        self.listener.clone()
    }

    /// Does the last refresh depend on any of `changed`?
    pub fn is_affected_by<'a>(&self, mut changed: impl Iterator<Item = &'a GraphKey>) -> bool {
        changed.any(|key| self.reads.contains(key))
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("node", &self.node)
            .field("request", &self.request.operation())
            .field("reads", &self.reads.len())
            .field("retained", &self.retained.len())
            .finish()
    }
}
