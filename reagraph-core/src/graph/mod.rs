//! Dependency Graph
//!
//! This module binds node definitions into the graph and resolves the
//! dependencies between them.
//!
//! # Overview
//!
//! - A [`GraphNode`] is a definition bound to a scope and a context path.
//!   The same definition bound in two scopes is two graph nodes.
//! - A [`Dependency`] is a gated edge: the resolver evaluates the target
//!   until its [`Condition`] holds, treating `pending`, `error` and `nil`
//!   according to the dependency's flags.
//!
//! # Design Decisions
//!
//! 1. The graph is implicit. Edges are discovered by resolving dependencies
//!    and recorded as state reads, not stored as an adjacency structure.
//!
//! 2. Resolution is iterative. Long evaluation chains do not grow the stack,
//!    and a step budget bounds runaway chains.
//!
//! 3. Identity is `(scope, context path, node id)`, so memoised results and
//!    execution contexts never leak between scopes.

mod dependency;
mod node;
mod resolver;

pub use dependency::{Condition, Dependencies, Dependency, DependencyTarget};
pub use node::{provide, provide_kind, ContextFrame, ContextPath, GraphKey, GraphNode, PROVIDE};
