//! Dependency resolution.
//!
//! Resolution follows a chain of results: evaluate a node, and if the result
//! is itself evaluable, evaluate that, until a stop condition holds or the
//! chain reaches data. The loop is iterative; a per-chain visited set catches
//! a node that evaluates back to itself, and the runtime's in-flight set
//! catches a node whose dependencies lead back to it.

use std::collections::HashSet;

use tracing::{trace, warn};

use super::dependency::{Dependencies, Dependency, DependencyTarget};
use super::node::{GraphKey, GraphNode};
use crate::kind::{OperationName, Request, RunError};
use crate::node::{sentinel, NodeDefinition};
use crate::reactive::{Dispatched, OnceKey, ReactiveContext, Runtime};

/// Outcome of resolving one dependency.
#[derive(Debug, Clone)]
pub(crate) enum Resolution {
    Ready(GraphNode),
    Pending(NodeDefinition),
    Failed(NodeDefinition),
}

impl Runtime {
    /// Follow results from `start` until `stop` holds or data is reached.
    ///
    /// With `first`, that request is dispatched on `start` before anything
    /// is checked; otherwise `start` itself is tested first. Results that
    /// are not yet data are followed with `evaluate`.
    pub(crate) fn chain(
        &self,
        start: GraphNode,
        first: Option<Request>,
        stop: &dyn Fn(&NodeDefinition) -> bool,
    ) -> GraphNode {
        let mut visited: HashSet<(GraphKey, Request)> = HashSet::new();
        let mut current = start;
        let mut request = match first {
            Some(request) => request,
            None => {
                if stop(current.definition()) || is_data(&current) {
                    return current;
                }
                Request::evaluate()
            }
        };

        for _ in 0..self.config().max_resolution_steps {
            if request.operation() == OperationName::Evaluate && is_data(&current) {
                return current;
            }
            if !visited.insert((current.key(), request.clone())) {
                warn!(node = %current.definition().id(), "cycle detected while resolving");
                let id = current.definition().id().clone();
                return current.bind(sentinel::error_at(
                    &id,
                    format!("Cycle detected: {id} resolves to itself"),
                ));
            }
            match self.dispatch(&current, &request) {
                Dispatched::Node(next) => {
                    trace!(from = %current.definition().id(), to = %next.definition().id(), "resolved");
                    if stop(next.definition()) || is_data(&next) {
                        return next;
                    }
                    current = next;
                    request = Request::evaluate();
                }
                Dispatched::Action(action) => {
                    trace!(
                        from = %current.definition().id(),
                        to = %action.target.definition().id(),
                        operation = %action.request.operation(),
                        "forwarded"
                    );
                    current = action.target;
                    request = action.request;
                }
            }
        }

        let limit = self.config().max_resolution_steps;
        warn!(node = %current.definition().id(), limit, "resolution step limit exceeded");
        let id = current.definition().id().clone();
        current.bind(sentinel::error_at(
            &id,
            format!("Exceeded {limit} resolution steps while resolving {id}"),
        ))
    }

    /// Resolve one dependency relative to `origin`.
    pub(crate) fn resolve_dependency(&self, origin: &GraphNode, dependency: &Dependency) -> Resolution {
        let start = match &dependency.target {
            DependencyTarget::Definition(definition) => origin.bind(definition.clone()),
            DependencyTarget::Node(node) => node.clone(),
            DependencyTarget::Nested(inner) => match self.resolve_dependency(origin, inner) {
                Resolution::Ready(node) => node,
                unresolved => return unresolved,
            },
        };

        let until = &dependency.until;
        let stop = |definition: &NodeDefinition| {
            sentinel::is_pending(definition)
                || sentinel::is_error(definition)
                || sentinel::is_nil(definition)
                || until.test(definition)
        };
        let reached = self.chain(start, dependency.request.clone(), &stop);
        self.classify(origin, dependency, reached)
    }

    fn classify(&self, origin: &GraphNode, dependency: &Dependency, reached: GraphNode) -> Resolution {
        let definition = reached.definition();
        if sentinel::is_pending(definition) {
            return if dependency.allow_pending {
                Resolution::Ready(reached)
            } else {
                Resolution::Pending(definition.clone())
            };
        }
        if sentinel::is_error(definition) {
            return if dependency.allow_errors {
                Resolution::Ready(reached)
            } else {
                Resolution::Failed(definition.clone())
            };
        }
        if sentinel::is_nil(definition) && dependency.accept_nil {
            return Resolution::Ready(reached);
        }
        if dependency.until.test(definition) {
            return Resolution::Ready(reached);
        }
        Resolution::Failed(sentinel::error_at(
            origin.definition().id(),
            dependency.until.error_message(definition),
        ))
    }

    /// Resolve `dependencies` in order.
    ///
    /// Every dependency is resolved, so all of them are tracked, but the
    /// first failure returns immediately. If none failed and some are
    /// pending, the first pending sentinel is returned.
    pub(crate) fn resolve_dependencies(
        &self,
        origin: &GraphNode,
        request: Option<&Request>,
        dependencies: &Dependencies,
    ) -> Result<Vec<NodeDefinition>, NodeDefinition> {
        let mut values = Vec::with_capacity(dependencies.len());
        let mut pending = None;
        for (index, dependency) in dependencies.iter().enumerate() {
            let resolution = if dependency.once {
                let key = OnceKey {
                    origin: origin.key(),
                    request: request.cloned(),
                    index,
                };
                self.resolve_once(origin, dependency, key)
            } else {
                self.resolve_dependency(origin, dependency)
            };
            match resolution {
                Resolution::Ready(node) => values.push(node.definition().clone()),
                Resolution::Pending(sentinel) => {
                    values.push(sentinel.clone());
                    pending.get_or_insert(sentinel);
                }
                Resolution::Failed(error) => return Err(error),
            }
        }
        match pending {
            Some(sentinel) => Err(sentinel),
            None => Ok(values),
        }
    }

    /// Resolve a `once` dependency. Within a subscription the first settled
    /// value is memoised; a settled value's reads are not tracked.
    fn resolve_once(&self, origin: &GraphNode, dependency: &Dependency, key: OnceKey) -> Resolution {
        let subscriber = ReactiveContext::current_subscriber();
        if let Some(node) = subscriber.and_then(|id| self.once_value(id, &key)) {
            return Resolution::Ready(node);
        }

        let frame = ReactiveContext::enter(None);
        let resolution = self.resolve_dependency(origin, dependency);
        let reads = frame.finish();
        match &resolution {
            Resolution::Ready(node) => {
                if let Some(id) = subscriber {
                    self.remember_once(id, key, node.clone());
                }
            }
            Resolution::Pending(_) | Resolution::Failed(_) => ReactiveContext::merge(&reads),
        }
        resolution
    }

    /// Resolve `dependencies` relative to `origin` and combine their values.
    ///
    /// Pending and failed dependencies short-circuit: `combine` is not called
    /// and the sentinel is returned instead.
    pub fn resolve_in<F>(&self, origin: &GraphNode, dependencies: Dependencies, combine: F) -> NodeDefinition
    where
        F: FnOnce(&[NodeDefinition]) -> Result<NodeDefinition, RunError>,
    {
        match self.resolve_dependencies(origin, None, &dependencies) {
            Ok(values) => combine(&values).unwrap_or_else(|err| err.into_sentinel(origin.definition())),
            Err(short_circuit) => short_circuit,
        }
    }
}

/// No evaluate handler: the node is already data.
fn is_data(node: &GraphNode) -> bool {
    !node.kind().has_operation(OperationName::Evaluate)
}
