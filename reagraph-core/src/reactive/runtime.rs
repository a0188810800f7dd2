//! Reactive Runtime
//!
//! The runtime is the central coordinator. It dispatches requests to node
//! kinds, memoises results, owns subscriptions and commits state changes.
//!
//! # How It Works
//!
//! 1. A request on a graph node is dispatched to the operation its kind
//!    declares. Dependencies are resolved first; the handler's result is
//!    followed until it is data.
//!
//! 2. Every dispatch runs inside a tracking frame. State reads record the
//!    version they observed, and the frame's reads are stored alongside the
//!    memoised result. A memoised result is reused while all of its reads
//!    are still current.
//!
//! 3. State writes are collected into a transaction. When the outermost
//!    transaction ends, the runtime:
//!    a. Fires `on_update` on active nodes whose own state changed
//!    b. Fires `on_invalidate` on active nodes whose memoised results read a
//!       changed state
//!    c. Re-evaluates the subscriptions that read a changed state, diffs
//!       what they keep alive, and calls their listeners if the result
//!       changed
//!    d. Repeats while listeners and hooks keep writing, up to a bounded
//!       number of rounds
//!
//! # Thread Safety
//!
//! All shared state sits behind `parking_lot` mutexes that are never held
//! while user code runs. Tracking frames and the set of requests in flight
//! are thread-local, so concurrent evaluations on different threads track
//! independently and never mistake each other for a cycle.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::context::{ReactiveContext, ReadSet, TrackedRead};
use super::execution::{NodeContext, RunArgs};
use super::store::{Disposal, StateWrite};
use super::subscriber::{OnceKey, Subscriber, SubscriberId};
use crate::config::RuntimeConfig;
use crate::contract;
use crate::graph::{ContextPath, GraphKey, GraphNode};
use crate::kind::{GraphAction, HookFn, Lifecycle, Operation, OperationName, Outcome, Request};
use crate::node::{sentinel, NodeDefinition, Value};
use crate::scope::Scope;

thread_local! {
    static IN_FLIGHT: RefCell<HashSet<(usize, CacheKey)>> = RefCell::new(HashSet::new());
}

/// Memoisation key: which node, asked what.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    pub node: GraphKey,
    pub request: Request,
}

impl CacheKey {
    pub fn new(node: &GraphNode, request: &Request) -> Self {
        Self {
            node: node.key(),
            request: request.clone(),
        }
    }
}

/// Result of one dispatch, before it is followed any further.
#[derive(Debug, Clone)]
pub(crate) enum Dispatched {
    Node(GraphNode),
    Action(GraphAction),
}

struct CacheEntry {
    node: GraphNode,
    result: Dispatched,
    reads: ReadSet,
}

impl CacheEntry {
    /// Whether the entry can still be hit: its reads are current and nothing
    /// it refers to sits in a closed scope.
    fn is_live(&self) -> bool {
        let result_scope = match &self.result {
            Dispatched::Node(node) => node.scope(),
            Dispatched::Action(action) => action.target.scope(),
        };
        !self.node.scope().is_closed() && !result_scope.is_closed() && self.reads.is_current()
    }
}

#[derive(Default)]
struct Transaction {
    depth: usize,
    flushing: bool,
    changed: IndexMap<GraphKey, GraphNode>,
}

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    root: Scope,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
    subscribers: Mutex<IndexMap<SubscriberId, Subscriber>>,
    transaction: Mutex<Transaction>,
}

/// The graph runtime.
///
/// Cloning is cheap; clones share everything.
#[derive(Clone)]
pub struct Runtime(Arc<RuntimeInner>);

/// Non-owning reference to a [`Runtime`].
#[derive(Clone)]
pub struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(Runtime)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        debug!(?config, "runtime created");
        Self(Arc::new(RuntimeInner {
            config,
            root: Scope::root(),
            cache: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(IndexMap::new()),
            transaction: Mutex::new(Transaction::default()),
        }))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.0.config
    }

    pub fn root_scope(&self) -> &Scope {
        &self.0.root
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Arc::downgrade(&self.0))
    }

    /// Bind `definition` into the root scope at the root context.
    pub fn node(&self, definition: NodeDefinition) -> GraphNode {
        GraphNode::new(definition, self.0.root.clone(), ContextPath::root())
    }

    /// Evaluate `node` down to data.
    pub fn evaluate(&self, node: &GraphNode) -> NodeDefinition {
        self.perform(node, Request::evaluate())
    }

    /// Perform `request` on `node` and follow the result down to data.
    ///
    /// State changes made along the way are committed when the call returns.
    pub fn perform(&self, node: &GraphNode, request: Request) -> NodeDefinition {
        self.batch(|| {
            self.chain(node.clone(), Some(request), &|_| false)
                .definition()
                .clone()
        })
    }

    pub fn get(&self, node: &GraphNode) -> NodeDefinition {
        self.perform(node, Request::get())
    }

    /// Submit `value` to `node`. On success the result is `value` itself.
    pub fn set(&self, node: &GraphNode, value: NodeDefinition) -> NodeDefinition {
        self.perform(node, Request::set(value))
    }

    pub fn reset(&self, node: &GraphNode) -> NodeDefinition {
        self.perform(node, Request::reset())
    }

    /// Observe the result of `request` on `node`.
    ///
    /// `listener` is called with the current result right away and then
    /// every time the result changes. The nodes the result depends on are
    /// kept alive until the returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, node: &GraphNode, request: Request, listener: F) -> Subscription
    where
        F: Fn(&NodeDefinition) + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        self.0
            .subscribers
            .lock()
            .insert(id, Subscriber::new(node.clone(), request, Arc::new(listener)));
        debug!(subscriber = ?id, node = %node.definition().id(), "subscribed");
        self.batch(|| self.refresh(id));
        Subscription {
            runtime: self.downgrade(),
            id: Some(id),
        }
    }

    /// Run `f` as one transaction: state changes made inside are committed,
    /// and subscribers notified, once `f` returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _transaction = TransactionGuard::enter(self);
        f()
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.subscribers.lock().len()
    }

    pub fn cache_len(&self) -> usize {
        self.0.cache.lock().len()
    }

    /// Dispose the idle execution contexts of `scope` and drop memoised
    /// results that can no longer be hit, including everything bound into
    /// nested scopes that were torn down. Returns the number of contexts
    /// disposed.
    pub fn gc(&self, scope: &Scope) -> usize {
        let swept = scope.store().sweep();
        let disposed = swept.len();
        drop(swept);
        let evicted = self.evict();
        debug!(scope = scope.id().raw(), disposed, evicted, "garbage collected");
        disposed
    }

    /// Drop dead cache entries. They are released after the cache lock, since
    /// dropping one may tear down a scope.
    fn evict(&self) -> usize {
        let evicted: Vec<CacheEntry> = {
            let mut cache = self.0.cache.lock();
            let dead: Vec<CacheKey> = cache
                .iter()
                .filter(|(_, entry)| !entry.is_live())
                .map(|(key, _)| key.clone())
                .collect();
            dead.iter().filter_map(|key| cache.remove(key)).collect()
        };
        evicted.len()
    }

    fn remember(&self, key: CacheKey, entry: CacheEntry) {
        let limit = self.0.config.max_cache_entries;
        if self.0.cache.lock().len() >= limit {
            let evicted = self.evict();
            let cleared = {
                let mut cache = self.0.cache.lock();
                if cache.len() >= limit {
                    std::mem::take(&mut *cache)
                } else {
                    HashMap::new()
                }
            };
            if cleared.is_empty() {
                trace!(evicted, "cache pruned");
            } else {
                warn!(limit, evicted, cleared = cleared.len(), "cache full of live entries, cleared");
            }
        }
        let replaced = self.0.cache.lock().insert(key, entry);
        drop(replaced);
    }

    /// Dispatch one request to the operation `node`'s kind declares.
    pub(crate) fn dispatch(&self, node: &GraphNode, request: &Request) -> Dispatched {
        let definition = node.definition();
        let operation = match definition.kind().operation(request.operation()) {
            Ok(operation) => operation,
            Err(err) => {
                debug!(node = %definition.id(), error = %err, "unsupported request");
                return Dispatched::Node(node.bind(sentinel::error_at(definition.id(), err.to_string())));
            }
        };

        let key = CacheKey::new(node, request);
        let cacheable = self.0.config.cache_enabled
            && operation.is_cacheable()
            && !request.operation().is_mutation();
        if cacheable {
            if let Some((result, reads)) = self.cached(&key) {
                trace!(node = %definition.id(), operation = %request.operation(), "cache hit");
                ReactiveContext::merge(&reads);
                return result;
            }
        }

        if !self.enter_in_flight(&key) {
            warn!(node = %definition.id(), operation = %request.operation(), "cycle detected");
            return Dispatched::Node(node.bind(sentinel::error_at(
                definition.id(),
                format!(
                    "Cycle detected: {} re-entered while performing {}",
                    definition.id(),
                    request.operation()
                ),
            )));
        }
        let _in_flight = InFlight {
            runtime: self,
            key: key.clone(),
        };

        let frame = ReactiveContext::enter(None);
        let result = self.run_operation(node, request, operation);
        let reads = frame.finish();
        ReactiveContext::merge(&reads);

        if cacheable {
            self.remember(
                key,
                CacheEntry {
                    node: node.clone(),
                    result: result.clone(),
                    reads,
                },
            );
        }
        result
    }

    /// Requests being performed on this thread, per runtime. A request that
    /// re-enters itself on the same thread is a cycle; the same request on
    /// another thread is not.
    fn enter_in_flight(&self, key: &CacheKey) -> bool {
        let runtime = Arc::as_ptr(&self.0) as usize;
        IN_FLIGHT.with(|set| set.borrow_mut().insert((runtime, key.clone())))
    }

    fn cached(&self, key: &CacheKey) -> Option<(Dispatched, ReadSet)> {
        let (result, reads) = {
            let cache = self.0.cache.lock();
            let entry = cache.get(key)?;
            (entry.result.clone(), entry.reads.clone())
        };
        reads.is_current().then_some((result, reads))
    }

    fn run_operation(&self, node: &GraphNode, request: &Request, operation: &Operation) -> Dispatched {
        let definition = node.definition();
        let state = self.read_state(node);

        let dependencies = operation.dependencies(definition, request);
        let values = match self.resolve_dependencies(node, Some(request), &dependencies) {
            Ok(values) => values,
            Err(short_circuit) => return Dispatched::Node(node.bind(short_circuit)),
        };
        let context: Vec<Option<NodeDefinition>> = operation
            .context_keys(definition, request)
            .iter()
            .map(|key| node.context().lookup(key).cloned())
            .collect();

        let args = RunArgs::new(NodeContext::new(self, node), request, &values, &context, state);
        let outcome = operation.run(&args).unwrap_or_else(|err| {
            debug!(node = %definition.id(), operation = %request.operation(), error = %err, "operation failed");
            Outcome::Definition(err.into_sentinel(definition))
        });
        let result = match outcome {
            Outcome::Definition(value) => Dispatched::Node(node.bind(value)),
            Outcome::Node(value) => Dispatched::Node(value),
            Outcome::Action(action) => Dispatched::Action(action),
        };

        match request.operation() {
            OperationName::Set => Dispatched::Node(contract::settle_set(self, node, request, result)),
            OperationName::Reset => Dispatched::Node(contract::settle_reset(self, result)),
            _ => result,
        }
    }

    fn seed(node: &GraphNode) -> Option<Value> {
        node.kind().initial_state(node.definition().properties())
    }

    /// Tracked state read. `None` for stateless kinds.
    pub(crate) fn read_state(&self, node: &GraphNode) -> Option<Value> {
        if !node.kind().is_stateful() {
            return None;
        }
        let key = node.key();
        let (state, version) = node.scope().store().ensure_state(&key, || Self::seed(node));
        ReactiveContext::track(
            key,
            TrackedRead {
                node: node.clone(),
                version,
            },
        );
        state
    }

    pub(crate) fn write_state<F>(&self, node: &GraphNode, update: F) -> bool
    where
        F: FnOnce(&Value) -> Value,
    {
        let (current, _) = node
            .scope()
            .store()
            .ensure_state(&node.key(), || Self::seed(node));
        self.commit_state(node, current, update)
    }

    /// Write to a context that must still exist. Writes to disposed contexts
    /// are dropped.
    pub(crate) fn write_existing_state<F>(&self, node: &GraphNode, update: F) -> bool
    where
        F: FnOnce(&Value) -> Value,
    {
        match node.scope().store().state(&node.key()) {
            Some(current) => self.commit_state(node, current, update),
            None => {
                warn!(node = %node.definition().id(), "state write to disposed context dropped");
                false
            }
        }
    }

    fn commit_state<F>(&self, node: &GraphNode, current: Option<Value>, update: F) -> bool
    where
        F: FnOnce(&Value) -> Value,
    {
        let next = update(current.as_ref().unwrap_or(&Value::Null));
        if let Err(err) = node.kind().validate_state(&next) {
            warn!(node = %node.definition().id(), error = %err, "state write rejected");
            return false;
        }
        let key = node.key();
        match node.scope().store().replace_state(&key, next) {
            StateWrite::Changed(version) => {
                trace!(node = %node.definition().id(), version, "state changed");
                self.batch(|| {
                    self.0.transaction.lock().changed.insert(key, node.clone());
                });
                true
            }
            StateWrite::Unchanged => false,
            StateWrite::Missing => {
                warn!(node = %node.definition().id(), "state write to disposed context dropped");
                false
            }
        }
    }

    /// Take a reference on `node`'s context without activating it.
    pub(crate) fn retain(&self, node: &GraphNode) {
        node.scope().store().retain(&node.key(), || Self::seed(node));
    }

    /// Take a subscription reference; the first one activates the node.
    fn acquire(&self, node: &GraphNode) {
        let key = node.key();
        let store = node.scope().store();
        store.retain(&key, || Self::seed(node));
        if store.set_active(&key, true) {
            trace!(node = %node.definition().id(), "activated");
            self.fire(node, |hooks| hooks.on_subscribe.as_ref());
        }
    }

    /// Drop a reference; the last one deactivates and disposes the node.
    pub(crate) fn relinquish(&self, node: &GraphNode) {
        let key = node.key();
        let store = node.scope().store();
        match store.release(&key) {
            Some(0) => {}
            Some(_) => return,
            None => {
                warn!(node = %node.definition().id(), "release without a matching retain ignored");
                return;
            }
        }
        if store.set_active(&key, false) {
            trace!(node = %node.definition().id(), "deactivated");
            self.fire(node, |hooks| hooks.on_unsubscribe.as_ref());
        }
        self.dispose(node);
    }

    fn dispose(&self, node: &GraphNode) {
        match node.scope().store().dispose_if_idle(&node.key()) {
            Disposal::Disposed(context) => {
                debug!(node = %node.definition().id(), "execution context disposed");
                drop(context);
            }
            Disposal::Deferred => {
                debug!(node = %node.definition().id(), "disposal deferred until async work completes");
            }
            Disposal::Kept => {}
        }
    }

    pub(crate) fn hold(&self, node: &GraphNode) -> bool {
        node.scope().store().hold(&node.key())
    }

    pub(crate) fn unhold(&self, node: &GraphNode) {
        if node.scope().store().unhold(&node.key()) {
            self.dispose(node);
        }
    }

    /// Run a lifecycle hook in an isolated frame.
    fn fire(&self, node: &GraphNode, select: impl Fn(&Lifecycle) -> Option<&HookFn>) {
        let Some(hook) = select(node.kind().lifecycle()).cloned() else {
            return;
        };
        let _frame = ReactiveContext::enter(None);
        self.batch(|| hook(&NodeContext::new(self, node)));
    }

    pub(crate) fn once_value(&self, id: SubscriberId, key: &OnceKey) -> Option<GraphNode> {
        self.0
            .subscribers
            .lock()
            .get(&id)
            .and_then(|subscriber| subscriber.once.get(key).cloned())
    }

    pub(crate) fn remember_once(&self, id: SubscriberId, key: OnceKey, node: GraphNode) {
        if let Some(subscriber) = self.0.subscribers.lock().get_mut(&id) {
            subscriber.once.insert(key, node);
        }
    }

    fn flush(&self) {
        {
            let mut transaction = self.0.transaction.lock();
            if transaction.flushing {
                return;
            }
            transaction.flushing = true;
        }
        let _flushing = FlushGuard { runtime: self };

        for round in 1..=self.0.config.max_notify_rounds {
            let changed: Vec<GraphNode> = self
                .0
                .transaction
                .lock()
                .changed
                .drain(..)
                .map(|(_, node)| node)
                .collect();
            if changed.is_empty() {
                return;
            }
            debug!(round, changed = changed.len(), "committing state changes");
            self.notify(&changed);
        }

        let remaining = self.0.transaction.lock().changed.len();
        if remaining > 0 {
            warn!(
                rounds = self.0.config.max_notify_rounds,
                remaining, "notification rounds exhausted, deferring remaining changes"
            );
        }
    }

    fn notify(&self, changed: &[GraphNode]) {
        let keys: HashSet<GraphKey> = changed.iter().map(GraphNode::key).collect();

        for node in changed {
            if node.scope().store().is_active(&node.key()) {
                self.fire(node, |hooks| hooks.on_update.as_ref());
            }
        }

        let invalidated: Vec<GraphNode> = {
            let mut owners: IndexMap<GraphKey, GraphNode> = IndexMap::new();
            self.0.cache.lock().retain(|key, entry| {
                if !entry.reads.keys().any(|read| keys.contains(read)) {
                    return true;
                }
                if !keys.contains(&key.node) && entry.node.kind().is_stateful() {
                    owners
                        .entry(key.node.clone())
                        .or_insert_with(|| entry.node.clone());
                }
                false
            });
            owners.into_values().collect()
        };
        for node in &invalidated {
            if node.scope().store().is_active(&node.key()) {
                self.fire(node, |hooks| hooks.on_invalidate.as_ref());
            }
        }

        let affected: Vec<SubscriberId> = self
            .0
            .subscribers
            .lock()
            .iter()
            .filter(|(_, subscriber)| subscriber.is_affected_by(keys.iter()))
            .map(|(id, _)| *id)
            .collect();
        for id in affected {
            self.refresh(id);
        }
    }

    /// Re-evaluate a subscription, update what it keeps alive and notify its
    /// listener if the result changed.
    fn refresh(&self, id: SubscriberId) {
        let Some((node, request)) = self
            .0
            .subscribers
            .lock()
            .get(&id)
            .map(|subscriber| (subscriber.node.clone(), subscriber.request.clone()))
        else {
            return;
        };

        let frame = ReactiveContext::enter(Some(id));
        let result = self.chain(node, Some(request), &|_| false);
        let reads = frame.finish();
        let value = result.definition().clone();

        let (listener, changed, added, removed) = {
            let mut subscribers = self.0.subscribers.lock();
            let Some(subscriber) = subscribers.get_mut(&id) else {
                return;
            };
            let retained: IndexMap<GraphKey, GraphNode> =
                reads.nodes().map(|node| (node.key(), node.clone())).collect();
            let added: Vec<GraphNode> = retained
                .iter()
                .filter(|(key, _)| !subscriber.retained.contains_key(*key))
                .map(|(_, node)| node.clone())
                .collect();
            let removed: Vec<GraphNode> = subscriber
                .retained
                .iter()
                .filter(|(key, _)| !retained.contains_key(*key))
                .map(|(_, node)| node.clone())
                .collect();
            subscriber.retained = retained;
            subscriber.reads = reads;
            let changed = subscriber.last.as_ref() != Some(&value);
            if changed {
                subscriber.last = Some(value.clone());
            }
            (subscriber.listener(), changed, added, removed)
        };

        for node in &added {
            self.acquire(node);
        }
        for node in &removed {
            self.relinquish(node);
        }
        if changed {
            trace!(subscriber = ?id, value = %value.id(), "notifying subscriber");
            listener(&value);
        }
    }

    fn unsubscribe(&self, id: SubscriberId) {
        let Some(subscriber) = self.0.subscribers.lock().shift_remove(&id) else {
            return;
        };
        debug!(subscriber = ?id, node = %subscriber.node.definition().id(), "unsubscribed");
        self.batch(|| {
            for node in subscriber.retained.values() {
                self.relinquish(node);
            }
        });
    }

    fn last_value(&self, id: SubscriberId) -> Option<NodeDefinition> {
        self.0
            .subscribers
            .lock()
            .get(&id)
            .and_then(|subscriber| subscriber.last.clone())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.0.config)
            .field("root", &self.0.root)
            .field("subscribers", &self.subscriber_count())
            .field("cached", &self.cache_len())
            .finish()
    }
}

/// Nesting level of [`Runtime::batch`]; the outermost level commits.
struct TransactionGuard<'a> {
    runtime: &'a Runtime,
}

impl<'a> TransactionGuard<'a> {
    fn enter(runtime: &'a Runtime) -> Self {
        runtime.0.transaction.lock().depth += 1;
        Self { runtime }
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        let commit = {
            let mut transaction = self.runtime.0.transaction.lock();
            transaction.depth -= 1;
            transaction.depth == 0 && !transaction.flushing && !transaction.changed.is_empty()
        };
        if commit && !std::thread::panicking() {
            self.runtime.flush();
        }
    }
}

struct FlushGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.runtime.0.transaction.lock().flushing = false;
    }
}

struct InFlight<'a> {
    runtime: &'a Runtime,
    key: CacheKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let runtime = Arc::as_ptr(&self.runtime.0) as usize;
        IN_FLIGHT.with(|set| set.borrow_mut().remove(&(runtime, self.key.clone())));
    }
}

/// Handle to a subscription.
///
/// Dropping this handle unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    runtime: WeakRuntime,
    id: Option<SubscriberId>,
}

impl Subscription {
    pub fn id(&self) -> Option<SubscriberId> {
        self.id
    }

    /// The last result delivered to the listener.
    pub fn current(&self) -> Option<NodeDefinition> {
        let runtime = self.runtime.upgrade()?;
        runtime.last_value(self.id?)
    }

    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let (Some(id), Some(runtime)) = (self.id.take(), self.runtime.upgrade()) {
            runtime.unsubscribe(id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
