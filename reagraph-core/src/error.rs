//! Error types for Reagraph.
//!
//! Two families live here. [`ValidationError`] is raised when a node
//! definition is built from malformed properties; it is a programming error
//! and is never represented inside the graph. [`EngineError`] covers typed
//! engine failures at the API boundary. Failures that happen while the graph
//! is being evaluated are *not* Rust errors: they are `error` sentinel
//! definitions that flow through the graph like any other value.

use thiserror::Error;

use crate::node::FieldType;

/// A node definition's properties do not match its kind's declared shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid {kind} properties: missing required field \"{field}\"")]
    MissingField { kind: String, field: String },

    #[error("invalid {kind} properties: unexpected field \"{field}\"")]
    UnexpectedField { kind: String, field: String },

    #[error("invalid {kind} properties: field \"{field}\": expected {expected}, received {received}")]
    TypeMismatch {
        kind: String,
        field: String,
        expected: FieldType,
        received: &'static str,
    },

    #[error("invalid {kind} state: {reason}")]
    InvalidState { kind: String, reason: String },
}

/// Typed engine failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("unsupported operation: {kind} nodes do not implement \"{operation}\"")]
    UnsupportedOperation { kind: String, operation: String },

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("unknown node kind: {0}")]
    UnknownKind(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn unsupported(kind: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            kind: kind.into(),
            operation: operation.into(),
        }
    }

    pub fn serialization(message: impl ToString) -> Self {
        Self::Serialization(message.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}

impl From<rmp_serde::encode::Error> for EngineError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::serialization(err)
    }
}

impl From<rmp_serde::decode::Error> for EngineError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::serialization(err)
    }
}
