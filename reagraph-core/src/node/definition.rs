//! Node definitions.
//!
//! A [`NodeDefinition`] is an immutable `{ kind, properties, id }` record.
//! The id is derived from the kind name and the structural hash of the
//! properties, so equal definitions built independently share one identity
//! (and therefore one cache entry in the engine).

use std::fmt;
use std::sync::Arc;

use super::hash::hash_properties;
use super::value::{Properties, Value};
use crate::error::ValidationError;
use crate::kind::NodeKind;

/// Number of digest bytes rendered into a node id.
const ID_DIGEST_BYTES: usize = 16;

/// Content-addressed identifier of a node definition.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The kind-name prefix of the id.
    pub fn kind_name(&self) -> &str {
        self.0.rsplit_once(':').map(|(kind, _)| kind).unwrap_or(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct DefinitionInner {
    kind: NodeKind,
    properties: Properties,
    id: NodeId,
}

/// An immutable, content-addressed description of a node.
///
/// Cloning is cheap. Equality and hashing go through the id.
#[derive(Clone)]
pub struct NodeDefinition(Arc<DefinitionInner>);

impl NodeDefinition {
    /// Validate `properties` against `kind`'s shape and build a definition.
    pub fn create(kind: &NodeKind, properties: Properties) -> Result<Self, ValidationError> {
        kind.shape().validate(kind.name(), &properties)?;
        Ok(Self::new_unchecked(kind.clone(), properties))
    }

    /// Build a definition whose properties are known to be valid.
    pub(crate) fn new_unchecked(kind: NodeKind, properties: Properties) -> Self {
        let digest = hash_properties(&properties);
        let id = NodeId(Arc::from(format!(
            "{}:{}",
            kind.name(),
            digest.short_hex(ID_DIGEST_BYTES)
        )));
        Self(Arc::new(DefinitionInner {
            kind,
            properties,
            id,
        }))
    }

    pub fn id(&self) -> &NodeId {
        &self.0.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.0.kind
    }

    pub fn kind_name(&self) -> &str {
        self.0.kind.name()
    }

    pub fn properties(&self) -> &Properties {
        &self.0.properties
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.properties.get(name)
    }

    /// Convenience accessor for a nested node property.
    pub fn node(&self, name: &str) -> Option<&NodeDefinition> {
        self.get(name).and_then(Value::as_node)
    }

    /// Type test against a kind.
    pub fn is(&self, kind: &NodeKind) -> bool {
        self.0.kind.name() == kind.name()
    }
}

impl PartialEq for NodeDefinition {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.id == other.0.id
    }
}

impl Eq for NodeDefinition {}

impl std::hash::Hash for NodeDefinition {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tuple = f.debug_struct(self.kind_name());
        for (key, value) in self.properties() {
            tuple.field(key, value);
        }
        tuple.finish()
    }
}

/// Free-standing factory, equivalent to [`NodeDefinition::create`].
pub fn create(kind: &NodeKind, properties: Properties) -> Result<NodeDefinition, ValidationError> {
    NodeDefinition::create(kind, properties)
}
