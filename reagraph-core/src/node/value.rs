//! Property values.
//!
//! Node definitions are pure data. Their properties are a bag of [`Value`]s,
//! which may themselves contain further node definitions; this is how a tree
//! of definitions is described.

use indexmap::IndexMap;

use super::definition::NodeDefinition;

/// An insertion-ordered property bag.
///
/// Equality and hashing of property bags ignore key order.
pub type Properties = IndexMap<String, Value>;

/// A single property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    Node(NodeDefinition),
}

impl Value {
    /// Short type name used in "expected X, received Y" messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Node(_) => "node",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeDefinition> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<NodeDefinition> for Value {
    fn from(value: NodeDefinition) -> Self {
        Value::Node(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Build a [`Properties`] bag.
///
/// ```rust,ignore
/// let props = props! { "left" => 1, "right" => 2 };
/// ```
#[macro_export]
macro_rules! props {
    () => {
        $crate::node::Properties::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut properties = $crate::node::Properties::new();
        $(properties.insert(($key).to_string(), $crate::node::Value::from($value));)+
        properties
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_views_widen_ints() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(2.5).as_i64(), None);
    }

    #[test]
    fn props_macro_preserves_insertion_order() {
        let props = props! { "b" => 1, "a" => "x" };
        let keys: Vec<_> = props.keys().cloned().collect();
        assert_eq!(keys, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(props["a"], Value::String("x".to_string()));
    }

    #[test]
    fn property_bag_equality_ignores_order() {
        let left = props! { "a" => 1, "b" => 2 };
        let right = props! { "b" => 2, "a" => 1 };
        assert_eq!(left, right);
    }
}
