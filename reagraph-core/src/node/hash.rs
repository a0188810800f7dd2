//! Structural hashing.
//!
//! Node identity is content addressed: two definitions of the same kind with
//! structurally equal properties must hash equally. The hash is computed over
//! a tagged canonical encoding fed into blake3:
//!
//! - maps are hashed with their keys sorted, so insertion order is irrelevant
//! - lists are length-prefixed and hashed in order
//! - floats hash by bit pattern, with `-0.0` folded onto `0.0`
//! - nested nodes contribute their (already structural) id
//!
//! The same hash gates state writes in the store: a write whose new state
//! hashes equal to the old one is a no-op.

use std::fmt;

use indexmap::IndexMap;

use super::value::Value;

/// A 256-bit structural digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex of the first `bytes` bytes.
    pub fn short_hex(&self, bytes: usize) -> String {
        self.0
            .iter()
            .take(bytes.min(32))
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short_hex(8))
    }
}

/// Incremental structural hasher.
pub struct StructuralHasher(blake3::Hasher);

impl StructuralHasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    fn tag(&mut self, tag: u8) {
        self.0.update(&[tag]);
    }

    fn len(&mut self, len: usize) {
        self.0.update(&(len as u64).to_le_bytes());
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.len(bytes.len());
        self.0.update(bytes);
    }

    pub fn write_str(&mut self, s: &str) {
        self.tag(b's');
        self.bytes(s.as_bytes());
    }

    pub fn write_value(&mut self, value: &Value) {
        match value {
            Value::Null => self.tag(b'0'),
            Value::Bool(b) => {
                self.tag(b'b');
                self.0.update(&[*b as u8]);
            }
            Value::Int(i) => {
                self.tag(b'i');
                self.0.update(&i.to_le_bytes());
            }
            Value::Float(f) => {
                self.tag(b'f');
                let canonical = if *f == 0.0 { 0.0f64 } else { *f };
                self.0.update(&canonical.to_bits().to_le_bytes());
            }
            Value::String(s) => self.write_str(s),
            Value::List(items) => {
                self.tag(b'l');
                self.len(items.len());
                for item in items {
                    self.write_value(item);
                }
            }
            Value::Map(map) => self.write_map(map),
            Value::Node(node) => {
                self.tag(b'n');
                self.bytes(node.id().as_str().as_bytes());
            }
        }
    }

    pub fn write_map(&mut self, map: &IndexMap<String, Value>) {
        self.tag(b'm');
        self.len(map.len());
        let mut entries: Vec<_> = map.iter().collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (key, value) in entries {
            self.write_str(key);
            self.write_value(value);
        }
    }

    pub fn finish(self) -> Digest {
        Digest(*self.0.finalize().as_bytes())
    }
}

impl Default for StructuralHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash a single value.
pub fn hash_value(value: &Value) -> Digest {
    let mut hasher = StructuralHasher::new();
    hasher.write_value(value);
    hasher.finish()
}

/// Hash a property bag (order independent).
pub fn hash_properties(properties: &IndexMap<String, Value>) -> Digest {
    let mut hasher = StructuralHasher::new();
    hasher.write_map(properties);
    hasher.finish()
}
