//! Sentinel nodes.
//!
//! Control states are ordinary node definitions of well-known static kinds
//! rather than Rust errors:
//!
//! - `pending`: the computation is not ready yet
//! - `error { message, source?, cause? }`: a recoverable in-graph failure
//! - `ok`: success acknowledgement with no payload
//! - `done { value }`: terminal marker wrapping a final value
//! - `nil`: explicit absence
//!
//! The `value { value }` kind is the generic data carrier most other kinds
//! eventually evaluate to.

use std::sync::OnceLock;

use super::definition::NodeDefinition;
use super::shape::{FieldType, Shape};
use super::value::{Properties, Value};
use crate::kind::NodeKind;
use crate::props;

pub const PENDING: &str = "pending";
pub const ERROR: &str = "error";
pub const OK: &str = "ok";
pub const DONE: &str = "done";
pub const NIL: &str = "nil";
pub const VALUE: &str = "value";

macro_rules! builtin_kind {
    ($fn_name:ident, $name:expr, $shape:expr) => {
        pub fn $fn_name() -> &'static NodeKind {
            static KIND: OnceLock<NodeKind> = OnceLock::new();
            KIND.get_or_init(|| NodeKind::builder($name).shape($shape).build())
        }
    };
}

builtin_kind!(pending_kind, PENDING, Shape::empty());
builtin_kind!(ok_kind, OK, Shape::empty());
builtin_kind!(nil_kind, NIL, Shape::empty());
builtin_kind!(
    error_kind,
    ERROR,
    Shape::empty()
        .required("message", FieldType::String)
        .optional("source", FieldType::String)
        .optional("cause", FieldType::Node)
);
builtin_kind!(done_kind, DONE, Shape::empty().required("value", FieldType::Any));
builtin_kind!(value_kind, VALUE, Shape::empty().required("value", FieldType::Any));

/// All sentinel and data kinds, for registry seeding.
pub(crate) fn kinds() -> Vec<NodeKind> {
    vec![
        pending_kind().clone(),
        ok_kind().clone(),
        nil_kind().clone(),
        error_kind().clone(),
        done_kind().clone(),
        value_kind().clone(),
    ]
}

pub fn pending() -> NodeDefinition {
    static NODE: OnceLock<NodeDefinition> = OnceLock::new();
    NODE.get_or_init(|| NodeDefinition::new_unchecked(pending_kind().clone(), Properties::new()))
        .clone()
}

pub fn ok() -> NodeDefinition {
    static NODE: OnceLock<NodeDefinition> = OnceLock::new();
    NODE.get_or_init(|| NodeDefinition::new_unchecked(ok_kind().clone(), Properties::new()))
        .clone()
}

pub fn nil() -> NodeDefinition {
    static NODE: OnceLock<NodeDefinition> = OnceLock::new();
    NODE.get_or_init(|| NodeDefinition::new_unchecked(nil_kind().clone(), Properties::new()))
        .clone()
}

pub fn error(message: impl Into<String>) -> NodeDefinition {
    NodeDefinition::new_unchecked(
        error_kind().clone(),
        props! { "message" => message.into() },
    )
}

/// An error attributed to the node that produced it.
pub fn error_at(source: &super::NodeId, message: impl Into<String>) -> NodeDefinition {
    NodeDefinition::new_unchecked(
        error_kind().clone(),
        props! { "message" => message.into(), "source" => source.as_str() },
    )
}

/// An error wrapping an underlying cause node.
pub fn error_caused_by(message: impl Into<String>, cause: NodeDefinition) -> NodeDefinition {
    NodeDefinition::new_unchecked(
        error_kind().clone(),
        props! { "message" => message.into(), "cause" => cause },
    )
}

pub fn done(value: impl Into<Value>) -> NodeDefinition {
    NodeDefinition::new_unchecked(done_kind().clone(), props! { "value" => value.into() })
}

pub fn value(value: impl Into<Value>) -> NodeDefinition {
    NodeDefinition::new_unchecked(value_kind().clone(), props! { "value" => value.into() })
}

pub fn is_pending(node: &NodeDefinition) -> bool {
    node.kind_name() == PENDING
}

pub fn is_error(node: &NodeDefinition) -> bool {
    node.kind_name() == ERROR
}

pub fn is_ok(node: &NodeDefinition) -> bool {
    node.kind_name() == OK
}

pub fn is_done(node: &NodeDefinition) -> bool {
    node.kind_name() == DONE
}

pub fn is_nil(node: &NodeDefinition) -> bool {
    node.kind_name() == NIL
}

pub fn is_value(node: &NodeDefinition) -> bool {
    node.kind_name() == VALUE
}

/// Any of the five control sentinels.
pub fn is_sentinel(node: &NodeDefinition) -> bool {
    is_pending(node) || is_error(node) || is_ok(node) || is_done(node) || is_nil(node)
}

/// The message carried by an `error` node.
pub fn error_message(node: &NodeDefinition) -> Option<&str> {
    if is_error(node) {
        node.get("message").and_then(Value::as_str)
    } else {
        None
    }
}

/// The payload of a `value` or `done` node.
pub fn unwrap_value(node: &NodeDefinition) -> Option<&Value> {
    if is_value(node) || is_done(node) {
        node.get("value")
    } else {
        None
    }
}

/// Render a node for "expected X, received Y" messages.
pub fn describe(node: &NodeDefinition) -> String {
    match unwrap_value(node) {
        Some(Value::Node(inner)) => format!("{}({})", node.kind_name(), describe(inner)),
        Some(inner) => format!("{}<{}>", node.kind_name(), inner.type_name()),
        None => match error_message(node) {
            Some(message) => format!("error(\"{}\")", message),
            None => format!("<{}>", node.kind_name()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_have_fixed_identity() {
        assert_eq!(pending().id(), pending().id());
        assert_eq!(ok(), ok());
        assert_ne!(ok().id(), nil().id());
    }

    #[test]
    fn predicates_match_their_kind() {
        assert!(is_pending(&pending()));
        assert!(is_error(&error("boom")));
        assert!(is_ok(&ok()));
        assert!(is_nil(&nil()));
        assert!(is_done(&done(1)));
        assert!(!is_sentinel(&value(1)));
    }

    #[test]
    fn errors_carry_their_source() {
        let source = value(1);
        let err = error_at(source.id(), "nope");
        assert_eq!(error_message(&err), Some("nope"));
        assert_eq!(err.get("source").and_then(Value::as_str), Some(source.id().as_str()));
    }

    #[test]
    fn describe_names_kind_and_payload_type() {
        assert_eq!(describe(&value("x")), "value<string>");
        assert_eq!(describe(&pending()), "<pending>");
        assert_eq!(describe(&error("bad")), "error(\"bad\")");
    }
}
