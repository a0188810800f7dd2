//! Result contracts of the `set` and `reset` operations.
//!
//! A `set` handler acknowledges with `ok`; the caller then receives the value
//! it submitted, so `set(x)` reads back as `x`. A `reset` handler's result is
//! followed and returned as is. Both may answer `error` or `pending`, which
//! pass through unchanged.

use crate::graph::GraphNode;
use crate::kind::{OperationName, Request};
use crate::node::{sentinel, NodeDefinition};
use crate::reactive::{Dispatched, Runtime};

fn is_acknowledgement(definition: &NodeDefinition) -> bool {
    sentinel::is_ok(definition) || sentinel::is_error(definition) || sentinel::is_pending(definition)
}

/// Follow a handler result until it acknowledges.
fn settle(runtime: &Runtime, result: Dispatched) -> GraphNode {
    match result {
        Dispatched::Node(node) => runtime.chain(node, None, &is_acknowledgement),
        Dispatched::Action(action) => runtime.chain(action.target, Some(action.request), &is_acknowledgement),
    }
}

pub(crate) fn settle_set(runtime: &Runtime, node: &GraphNode, request: &Request, result: Dispatched) -> GraphNode {
    let id = node.definition().id();
    let Some(payload) = request.payload() else {
        return node.bind(sentinel::error_at(id, "Invalid set() request: missing value"));
    };
    // A set forwarded to another node's set already reads back as the payload.
    let forwarded = matches!(&result, Dispatched::Action(action) if action.request.operation() == OperationName::Set);
    let settled = settle(runtime, result);
    let definition = settled.definition();
    if sentinel::is_ok(definition) || (forwarded && definition == payload) {
        node.bind(payload.clone())
    } else if sentinel::is_error(definition) || sentinel::is_pending(definition) {
        settled
    } else {
        node.bind(sentinel::error_at(
            id,
            format!("Invalid set() result: expected <ok>, received {}", sentinel::describe(definition)),
        ))
    }
}

pub(crate) fn settle_reset(runtime: &Runtime, result: Dispatched) -> GraphNode {
    settle(runtime, result)
}
