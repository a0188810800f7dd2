//! Execution Contexts
//!
//! Every graph node that has been touched gets an [`ExecutionContext`] in the
//! store of its scope. The context holds the node's internal state (for
//! stateful kinds), a free-form ephemeral data map, a reference count and a
//! count of outstanding async holds.
//!
//! # Versions
//!
//! Every state change stamps the context with a fresh revision taken from a
//! process-wide counter. Readers record the version they observed; a cached
//! result is valid while all of its recorded versions are still current.
//! A disposed context has no version, so reads of it are never current.
//!
//! State writes compare the structural hash of the new state with the old
//! one. Writing an equal value is a no-op: no new version, no notification.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::graph::GraphKey;
use crate::node::{hash_value, Digest, Value};

pub(crate) type DataValue = Box<dyn Any + Send + Sync>;

fn next_revision() -> u64 {
    static REVISION: AtomicU64 = AtomicU64::new(1);
    REVISION.fetch_add(1, Ordering::Relaxed)
}

/// Per graph node runtime record.
pub struct ExecutionContext {
    state: Option<Value>,
    state_hash: Option<Digest>,
    version: u64,
    data: HashMap<String, DataValue>,
    ref_count: usize,
    pending: usize,
    active: bool,
    /// A release reached zero while async work was outstanding.
    deferred: bool,
}

impl ExecutionContext {
    fn new(state: Option<Value>) -> Self {
        let state_hash = state.as_ref().map(hash_value);
        Self {
            state,
            state_hash,
            version: next_revision(),
            data: HashMap::new(),
            ref_count: 0,
            pending: 0,
            active: false,
            deferred: false,
        }
    }

    pub fn state(&self) -> Option<&Value> {
        self.state.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn is_idle(&self) -> bool {
        self.ref_count == 0 && self.pending == 0
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("state", &self.state)
            .field("version", &self.version)
            .field("data", &self.data.keys().collect::<Vec<_>>())
            .field("ref_count", &self.ref_count)
            .field("pending", &self.pending)
            .field("active", &self.active)
            .finish()
    }
}

/// Result of a state write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StateWrite {
    /// The context no longer exists.
    Missing,
    /// Structurally equal to the current state.
    Unchanged,
    Changed(u64),
}

/// Result of a disposal attempt.
pub(crate) enum Disposal {
    Disposed(ExecutionContext),
    /// Async work is outstanding; disposal happens when it completes.
    Deferred,
    /// Still referenced, or already gone.
    Kept,
}

/// The execution contexts of one scope.
#[derive(Default)]
pub struct Store {
    contexts: Mutex<HashMap<GraphKey, ExecutionContext>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }

    pub fn contains(&self, key: &GraphKey) -> bool {
        self.contexts.lock().contains_key(key)
    }

    pub fn version(&self, key: &GraphKey) -> Option<u64> {
        self.contexts.lock().get(key).map(|ctx| ctx.version)
    }

    pub fn ref_count(&self, key: &GraphKey) -> Option<usize> {
        self.contexts.lock().get(key).map(|ctx| ctx.ref_count)
    }

    pub fn is_active(&self, key: &GraphKey) -> bool {
        self.contexts.lock().get(key).is_some_and(|ctx| ctx.active)
    }

    /// Lock the contexts with the context at `key` present, creating it from
    /// `seed` if needed. `seed` runs without the lock held.
    fn seeded<F>(&self, key: &GraphKey, seed: F) -> MutexGuard<'_, HashMap<GraphKey, ExecutionContext>>
    where
        F: FnOnce() -> Option<Value>,
    {
        let mut seed = Some(seed);
        let mut initial = None;
        loop {
            let mut contexts = self.contexts.lock();
            if !contexts.contains_key(key) {
                if let Some(state) = initial.take() {
                    contexts.insert(key.clone(), ExecutionContext::new(state));
                }
            }
            if contexts.contains_key(key) {
                return contexts;
            }
            drop(contexts);
            if let Some(seed) = seed.take() {
                initial = Some(seed());
            }
        }
    }

    /// Current state and version, creating the context from `seed` if it does
    /// not exist yet.
    pub(crate) fn ensure_state<F>(&self, key: &GraphKey, seed: F) -> (Option<Value>, u64)
    where
        F: FnOnce() -> Option<Value>,
    {
        let contexts = self.seeded(key, seed);
        let ctx = &contexts[key];
        (ctx.state.clone(), ctx.version)
    }

    /// Current state of an existing context.
    pub(crate) fn state(&self, key: &GraphKey) -> Option<Option<Value>> {
        self.contexts.lock().get(key).map(|ctx| ctx.state.clone())
    }

    pub(crate) fn replace_state(&self, key: &GraphKey, state: Value) -> StateWrite {
        let hash = hash_value(&state);
        let mut contexts = self.contexts.lock();
        let Some(ctx) = contexts.get_mut(key) else {
            return StateWrite::Missing;
        };
        if ctx.state_hash == Some(hash) {
            return StateWrite::Unchanged;
        }
        ctx.state = Some(state);
        ctx.state_hash = Some(hash);
        ctx.version = next_revision();
        StateWrite::Changed(ctx.version)
    }

    pub(crate) fn get_data<T>(&self, key: &GraphKey, name: &str) -> Option<T>
    where
        T: Clone + 'static,
    {
        self.contexts
            .lock()
            .get(key)
            .and_then(|ctx| ctx.data.get(name))
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Store `value` under `name`, creating a stateless context if needed.
    /// Returns the previous value so the caller drops it outside the lock.
    pub(crate) fn set_data(&self, key: &GraphKey, name: &str, value: DataValue) -> Option<DataValue> {
        let mut contexts = self.contexts.lock();
        let ctx = contexts
            .entry(key.clone())
            .or_insert_with(|| ExecutionContext::new(None));
        ctx.data.insert(name.to_string(), value)
    }

    pub(crate) fn take_data(&self, key: &GraphKey, name: &str) -> Option<DataValue> {
        self.contexts
            .lock()
            .get_mut(key)
            .and_then(|ctx| ctx.data.remove(name))
    }

    /// Increment the reference count, creating the context from `seed` if
    /// needed. Returns the new count.
    pub(crate) fn retain<F>(&self, key: &GraphKey, seed: F) -> usize
    where
        F: FnOnce() -> Option<Value>,
    {
        let mut contexts = self.seeded(key, seed);
        let Some(ctx) = contexts.get_mut(key) else {
            return 0;
        };
        ctx.ref_count += 1;
        ctx.deferred = false;
        ctx.ref_count
    }

    /// Decrement the reference count. Returns the new count, or `None` if the
    /// context does not exist or holds no reference.
    pub(crate) fn release(&self, key: &GraphKey) -> Option<usize> {
        let mut contexts = self.contexts.lock();
        let ctx = contexts.get_mut(key)?;
        if ctx.ref_count == 0 {
            return None;
        }
        ctx.ref_count -= 1;
        Some(ctx.ref_count)
    }

    /// Flip the active flag. Returns true if it changed.
    pub(crate) fn set_active(&self, key: &GraphKey, active: bool) -> bool {
        let mut contexts = self.contexts.lock();
        match contexts.get_mut(key) {
            Some(ctx) if ctx.active != active => {
                ctx.active = active;
                true
            }
            _ => false,
        }
    }

    /// Register outstanding async work. False if the context is gone.
    pub(crate) fn hold(&self, key: &GraphKey) -> bool {
        match self.contexts.lock().get_mut(key) {
            Some(ctx) => {
                ctx.pending += 1;
                true
            }
            None => false,
        }
    }

    /// Complete async work. Returns true if a deferred disposal is now due.
    pub(crate) fn unhold(&self, key: &GraphKey) -> bool {
        match self.contexts.lock().get_mut(key) {
            Some(ctx) => {
                ctx.pending = ctx.pending.saturating_sub(1);
                ctx.deferred && ctx.is_idle()
            }
            None => false,
        }
    }

    /// Remove the context if nothing references it and no async work is
    /// outstanding. The removed context is handed back so its data is dropped
    /// outside the lock.
    pub(crate) fn dispose_if_idle(&self, key: &GraphKey) -> Disposal {
        let mut contexts = self.contexts.lock();
        match contexts.get_mut(key) {
            Some(ctx) if ctx.ref_count > 0 => Disposal::Kept,
            Some(ctx) if ctx.pending > 0 => {
                ctx.deferred = true;
                Disposal::Deferred
            }
            Some(_) => contexts.remove(key).map_or(Disposal::Kept, Disposal::Disposed),
            None => Disposal::Kept,
        }
    }

    /// Remove every idle context.
    pub(crate) fn sweep(&self) -> Vec<(GraphKey, ExecutionContext)> {
        let mut contexts = self.contexts.lock();
        let idle: Vec<GraphKey> = contexts
            .iter()
            .filter(|(_, ctx)| ctx.is_idle())
            .map(|(key, _)| key.clone())
            .collect();
        idle.into_iter()
            .filter_map(|key| contexts.remove(&key).map(|ctx| (key, ctx)))
            .collect()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("contexts", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ContextPath, GraphNode};
    use crate::node::sentinel;
    use crate::scope::Scope;

    fn key(n: i64) -> GraphKey {
        GraphNode::new(sentinel::value(n), Scope::root(), ContextPath::root()).key()
    }

    #[test]
    fn seeds_once_and_keeps_version() {
        let store = Store::new();
        let k = key(1);
        let (state, v1) = store.ensure_state(&k, || Some(Value::Int(0)));
        assert_eq!(state, Some(Value::Int(0)));
        let (state, v2) = store.ensure_state(&k, || Some(Value::Int(99)));
        assert_eq!(state, Some(Value::Int(0)));
        assert_eq!(v1, v2);
    }

    #[test]
    fn equal_writes_are_no_ops() {
        let store = Store::new();
        let k = key(1);
        let (_, v1) = store.ensure_state(&k, || Some(Value::Int(0)));

        assert_eq!(store.replace_state(&k, Value::Int(0)), StateWrite::Unchanged);
        assert_eq!(store.version(&k), Some(v1));

        let StateWrite::Changed(v2) = store.replace_state(&k, Value::Int(1)) else {
            panic!("expected a change");
        };
        assert!(v2 > v1);
        assert_eq!(store.version(&k), Some(v2));
    }

    #[test]
    fn writes_to_missing_contexts_are_reported() {
        let store = Store::new();
        assert_eq!(store.replace_state(&key(1), Value::Int(1)), StateWrite::Missing);
    }

    #[test]
    fn data_is_typed() {
        let store = Store::new();
        let k = key(1);
        store.set_data(&k, "count", Box::new(3_u32));
        assert_eq!(store.get_data::<u32>(&k, "count"), Some(3));
        assert_eq!(store.get_data::<String>(&k, "count"), None);
        assert!(store.take_data(&k, "count").is_some());
        assert_eq!(store.get_data::<u32>(&k, "count"), None);
    }

    #[test]
    fn disposal_waits_for_references_and_holds() {
        let store = Store::new();
        let k = key(1);
        assert_eq!(store.retain(&k, || None), 1);
        assert!(matches!(store.dispose_if_idle(&k), Disposal::Kept));

        assert!(store.hold(&k));
        assert_eq!(store.release(&k), Some(0));
        assert!(matches!(store.dispose_if_idle(&k), Disposal::Deferred));
        assert!(store.contains(&k));

        assert!(store.unhold(&k));
        assert!(matches!(store.dispose_if_idle(&k), Disposal::Disposed(_)));
        assert!(!store.contains(&k));
        assert_eq!(store.version(&k), None);
    }

    #[test]
    fn seeds_may_read_the_store() {
        let store = Store::new();
        let (first, second) = (key(1), key(2));
        store.ensure_state(&first, || Some(Value::Int(1)));
        let (state, _) = store.ensure_state(&second, || Some(Value::from(store.len())));
        assert_eq!(state, Some(Value::Int(1)));
        assert_eq!(store.retain(&key(3), || Some(Value::from(store.len()))), 1);
    }

    #[test]
    fn unbalanced_release_is_refused() {
        let store = Store::new();
        let k = key(1);
        store.ensure_state(&k, || None);
        assert_eq!(store.release(&k), None);
        assert_eq!(store.ref_count(&k), Some(0));
        assert_eq!(store.release(&key(2)), None);
    }

    #[test]
    fn sweep_removes_only_idle_contexts() {
        let store = Store::new();
        let (busy, idle) = (key(1), key(2));
        store.retain(&busy, || None);
        store.ensure_state(&idle, || None);
        let swept = store.sweep();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].0, idle);
        assert!(store.contains(&busy));
    }
}
