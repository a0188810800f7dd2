//! Reagraph Core
//!
//! This crate provides a reactive, lazily evaluated dependency-graph
//! runtime. Programs are trees of immutable, content-addressed node
//! definitions; the runtime evaluates them on demand, memoises results,
//! tracks which internal states each result read, and pushes changes to
//! subscribers when those states change.
//!
//! It implements:
//!
//! - Content-addressed node definitions with declared property shapes
//! - A registry of node kinds and their operations
//! - Dependency resolution with readiness conditions and sentinel handling
//! - Per-node execution contexts with state, ref counting and lifecycle hooks
//! - Scopes with isolated stores and event buses
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `node`: Definitions, property values, shapes, hashing and sentinels
//! - `kind`: Node kinds, operations and the kind registry
//! - `graph`: Graph nodes, context paths, dependencies and resolution
//! - `reactive`: Execution contexts, tracking, subscriptions and the runtime
//! - `scope`: Scopes and their event buses
//! - `action`: Multi-step actions built on awaited requests
//! - `serialize`: Tagged JSON and MessagePack forms of definition trees
//!
//! # Example
//!
//! ```rust,ignore
//! use reagraph_core::{define, props, sentinel, Dependency, FieldType, NodeDefinition, Operation, OperationName, Runtime, Shape};
//!
//! // A kind whose evaluate adds its two operands
//! let add = define("add", |kind| {
//!     kind.shape(Shape::empty().required("left", FieldType::Node).required("right", FieldType::Node))
//!         .operation(
//!             OperationName::Evaluate,
//!             Operation::new(|args| {
//!                 let total: i64 = args.dependencies().iter().filter_map(|v| sentinel::unwrap_value(v)?.as_i64()).sum();
//!                 Ok(sentinel::value(total).into())
//!             })
//!             .with_dependencies(|node, _| {
//!                 ["left", "right"].iter().filter_map(|name| node.node(name).cloned()).map(Dependency::on).collect()
//!             }),
//!         )
//! });
//!
//! let runtime = Runtime::new();
//! let sum = NodeDefinition::create(&add, props! { "left" => sentinel::value(5), "right" => sentinel::value(3) })?;
//! assert_eq!(runtime.evaluate(&runtime.node(sum)), sentinel::value(8));
//! ```

pub mod action;
pub mod config;
mod contract;
pub mod error;
pub mod graph;
pub mod kind;
pub mod node;
pub mod reactive;
pub mod scope;
pub mod serialize;

pub use action::{ActionKind, Step};
pub use config::RuntimeConfig;
pub use error::{EngineError, Result, ValidationError};
pub use graph::{provide, Condition, ContextPath, Dependencies, Dependency, DependencyTarget, GraphKey, GraphNode};
pub use kind::{define, GraphAction, NodeKind, Operation, OperationName, Outcome, Request, RunError};
pub use node::{create, sentinel, FieldType, NodeDefinition, NodeId, Properties, Shape, Value};
pub use reactive::{ContextHandle, NodeContext, RunArgs, Runtime, Subscription};
pub use scope::{scope, EventBus, Redispatch, Scope};
