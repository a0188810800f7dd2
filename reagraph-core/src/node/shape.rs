//! Property shapes.
//!
//! Every node kind declares the shape of its property bag. The factory checks
//! properties against it before a definition is created.

use std::fmt;

use super::value::{Properties, Value};
use crate::error::ValidationError;

/// The type a field must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Any,
    Bool,
    Int,
    Float,
    /// Int or float.
    Number,
    String,
    List,
    Map,
    Node,
}

impl FieldType {
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Any, _) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Int, Value::Int(_)) => true,
            (FieldType::Float, Value::Float(_)) => true,
            (FieldType::Number, Value::Int(_) | Value::Float(_)) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::List, Value::List(_)) => true,
            (FieldType::Map, Value::Map(_)) => true,
            (FieldType::Node, Value::Node(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Any => "any",
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Number => "number",
            FieldType::String => "string",
            FieldType::List => "list",
            FieldType::Map => "map",
            FieldType::Node => "node",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    name: String,
    ty: FieldType,
    required: bool,
}

/// Declared shape of a property bag.
///
/// Shapes are closed by default: unknown fields are rejected unless
/// [`Shape::open`] is called. Optional fields accept `Null`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shape {
    fields: Vec<Field>,
    open: bool,
}

impl Shape {
    /// A shape with no fields.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(Field {
            name: name.into(),
            ty,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(Field {
            name: name.into(),
            ty,
            required: false,
        });
        self
    }

    /// Accept fields that are not declared.
    pub fn open(mut self) -> Self {
        self.open = true;
        self
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Check `properties` against this shape.
    pub fn validate(&self, kind: &str, properties: &Properties) -> Result<(), ValidationError> {
        for field in &self.fields {
            match properties.get(&field.name) {
                None | Some(Value::Null) if field.required && field.ty != FieldType::Any => {
                    return Err(ValidationError::MissingField {
                        kind: kind.to_string(),
                        field: field.name.clone(),
                    });
                }
                None if field.required => {
                    return Err(ValidationError::MissingField {
                        kind: kind.to_string(),
                        field: field.name.clone(),
                    });
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.ty.accepts(value) => {
                    return Err(ValidationError::TypeMismatch {
                        kind: kind.to_string(),
                        field: field.name.clone(),
                        expected: field.ty,
                        received: value.type_name(),
                    });
                }
                Some(_) => {}
            }
        }

        if !self.open {
            if let Some(unknown) = properties
                .keys()
                .find(|key| !self.fields.iter().any(|f| &f.name == *key))
            {
                return Err(ValidationError::UnexpectedField {
                    kind: kind.to_string(),
                    field: unknown.clone(),
                });
            }
        }

        Ok(())
    }
}
