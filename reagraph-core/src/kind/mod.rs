//! Node Kinds
//!
//! This module implements node kind declaration and the operation dispatch
//! table. A kind is declared once with [`define`] (or [`NodeKind::builder`])
//! and registered by name; the engine dispatches requests to the kind's
//! [`Operation`]s.
//!
//! # Concepts
//!
//! ## Operations
//!
//! Each operation declares its graph dependencies, optional ambient context
//! keys, whether its result may be memoised, and a `run` handler. The handler
//! receives the node, the request, the resolved dependency values, the
//! resolved context values and (for stateful kinds) the current state, and
//! produces an [`Outcome`].
//!
//! ## Registry
//!
//! The registry is process-wide state used only for name-based lookups
//! (serialization round-trips and `is` tests). See [`registry`].

mod define;
mod operation;
pub mod registry;

pub use define::{define, Codec, HookFn, KindBuilder, Lifecycle, NodeKind, StateSpec};
pub use operation::{GraphAction, Operation, OperationName, Outcome, Request, RunError};
