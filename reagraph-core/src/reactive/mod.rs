//! Reactive Runtime
//!
//! This module implements the runtime half of the graph: execution contexts,
//! dependency tracking, memoisation and subscriptions.
//!
//! # Concepts
//!
//! ## Execution contexts
//!
//! Every graph node that has been touched owns an execution context in its
//! scope's [`Store`]. Stateful kinds keep their internal state there; any
//! kind may keep ephemeral data there. Contexts are reference counted by the
//! subscriptions that depend on them and disposed when the last one goes.
//!
//! ## Tracking
//!
//! Reads of a node's state inside an operation handler are recorded in a
//! thread-local [`ReactiveContext`] frame together with the version they
//! observed. Memoised results carry their reads and stay valid while every
//! read is still current.
//!
//! ## Subscriptions
//!
//! A [`Subscription`] observes the result of one request on one node. When a
//! committed transaction changes a state the subscription read, it is
//! re-evaluated and its listener is called if the result changed.
//!
//! # Implementation Notes
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos. Here the
//! tracked unit is an execution context rather than a signal, and the
//! tracked computation is an operation dispatch.

mod context;
mod execution;
mod runtime;
mod store;
mod subscriber;

pub use context::{ReactiveContext, ReadSet, TrackedRead};
pub use execution::{AsyncHold, ContextHandle, NodeContext, RunArgs};
pub use runtime::{Runtime, Subscription, WeakRuntime};
pub use store::{ExecutionContext, Store};
pub use subscriber::{ListenerFn, SubscriberId};

pub(crate) use runtime::Dispatched;
pub(crate) use subscriber::OnceKey;
