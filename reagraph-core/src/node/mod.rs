//! Node Definitions
//!
//! This module implements the pure-data side of the engine: property values,
//! declared property shapes, structural hashing and the content-addressed
//! [`NodeDefinition`] record built by the factory.
//!
//! # Identity
//!
//! A definition's id is `"{kind}:{digest}"` where the digest is a structural
//! hash of its properties. Definitions carry no runtime linkage; they are
//! bound to a scope only when the engine turns them into graph nodes.

mod definition;
mod hash;
mod shape;
mod value;
pub mod sentinel;

pub use definition::{create, NodeDefinition, NodeId};
pub use hash::{hash_properties, hash_value, Digest, StructuralHasher};
pub use shape::{FieldType, Shape};
pub use value::{Properties, Value};
