//! Reactive Context
//!
//! The reactive context tracks which computation is currently running and
//! which execution-context states it has read. This enables automatic
//! dependency tracking: when an operation handler reads a node's state, the
//! read is recorded in the innermost frame together with the state version
//! it observed.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. The engine enters a frame around
//! every operation dispatch and every subscription refresh, and folds the
//! collected [`ReadSet`] into the enclosing frame when the dispatch
//! completes, so an outer computation depends on everything its inner
//! computations read. A cache entry stays valid as long as every version in
//! its read set is still current.

use std::cell::RefCell;

use indexmap::IndexMap;

use super::subscriber::SubscriberId;
use crate::graph::{GraphKey, GraphNode};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// A state read: the node whose state was read and the version observed.
#[derive(Debug, Clone)]
pub struct TrackedRead {
    pub node: GraphNode,
    pub version: u64,
}

/// The set of state reads a computation depends on.
#[derive(Debug, Clone, Default)]
pub struct ReadSet {
    reads: IndexMap<GraphKey, TrackedRead>,
}

impl ReadSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read. The first observed version of a key wins, so a
    /// computation that read a state and then wrote it is stale afterwards.
    pub fn insert(&mut self, key: GraphKey, read: TrackedRead) {
        self.reads.entry(key).or_insert(read);
    }

    pub fn extend(&mut self, other: &ReadSet) {
        for (key, read) in &other.reads {
            self.insert(key.clone(), read.clone());
        }
    }

    pub fn contains(&self, key: &GraphKey) -> bool {
        self.reads.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &GraphKey> {
        self.reads.keys()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.reads.values().map(|read| &read.node)
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    /// True while every recorded version is still the current one.
    pub fn is_current(&self) -> bool {
        self.reads
            .iter()
            .all(|(key, read)| read.node.scope().store().version(key) == Some(read.version))
    }
}

/// An entry in the reactive context stack.
#[derive(Debug)]
struct ContextEntry {
    /// The subscription this computation runs on behalf of, if any.
    subscriber: Option<SubscriberId>,
    /// Reads collected during this computation.
    reads: ReadSet,
}

/// Guard that pops the frame when finished or dropped.
///
/// This keeps the stack balanced even if a handler panics.
pub struct ReactiveContext {
    depth: usize,
    finished: bool,
}

impl ReactiveContext {
    /// Enter a new frame. With `None`, the frame inherits the enclosing
    /// frame's subscriber.
    pub fn enter(subscriber: Option<SubscriberId>) -> Self {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let subscriber = subscriber.or_else(|| stack.last().and_then(|e| e.subscriber));
            stack.push(ContextEntry {
                subscriber,
                reads: ReadSet::new(),
            });
            stack.len()
        });
        Self {
            depth,
            finished: false,
        }
    }

    /// Pop the frame and return what it read.
    pub fn finish(mut self) -> ReadSet {
        self.finished = true;
        self.pop()
    }

    fn pop(&self) -> ReadSet {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "ReactiveContext mismatch: expected depth {}, got {}",
                self.depth,
                stack.len()
            );
            stack.pop().map(|entry| entry.reads).unwrap_or_default()
        })
    }

    /// Check if there is an active frame.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The subscription the current computation runs for, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.subscriber))
    }

    /// Record a state read in the innermost frame.
    pub fn track(key: GraphKey, read: TrackedRead) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                entry.reads.insert(key, read);
            }
        });
    }

    /// Fold a finished computation's reads into the innermost frame.
    pub fn merge(reads: &ReadSet) {
        if reads.is_empty() {
            return;
        }
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                entry.reads.extend(reads);
            }
        });
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}
