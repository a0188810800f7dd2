//! Serialization of definition trees.
//!
//! A definition serializes to a tagged JSON object: its properties plus a
//! `"$type"` field naming its kind. Nested definitions nest as tagged
//! objects; objects without a `"$type"` field are plain maps. Kinds found
//! in the registry are turned back into definitions, and their properties
//! are validated again on the way in.
//!
//! A kind may declare a [`Codec`](crate::kind::Codec) to replace the
//! structural payload encoding. A codec payload that is not a JSON object is
//! stored under `"$value"`.
//!
//! The MessagePack form is the same tree encoded with `rmp-serde`.

use serde_json::{Map, Number, Value as Json};

use crate::error::{EngineError, Result};
use crate::kind::registry;
use crate::node::{NodeDefinition, Properties, Value};

pub const TYPE_TAG: &str = "$type";
pub const VALUE_TAG: &str = "$value";

/// Serialize `definition` into a tagged JSON tree.
pub fn to_tagged(definition: &NodeDefinition) -> Result<Json> {
    let mut object = Map::new();
    object.insert(TYPE_TAG.to_string(), Json::String(definition.kind_name().to_string()));
    match definition.kind().codec() {
        Some(codec) => match (codec.serialize)(definition.properties()) {
            Json::Object(payload) => object.extend(payload),
            other => {
                object.insert(VALUE_TAG.to_string(), other);
            }
        },
        None => {
            for (name, value) in definition.properties() {
                object.insert(name.clone(), value_to_json(value)?);
            }
        }
    }
    Ok(Json::Object(object))
}

/// Rebuild a definition from a tagged JSON tree.
pub fn from_tagged(json: &Json) -> Result<NodeDefinition> {
    let Json::Object(object) = json else {
        return Err(EngineError::serialization(format!(
            "expected a tagged object, received {}",
            json_type(json)
        )));
    };
    let Some(Json::String(name)) = object.get(TYPE_TAG) else {
        return Err(EngineError::serialization(format!("missing \"{TYPE_TAG}\" tag")));
    };
    let kind = registry::lookup(name).ok_or_else(|| EngineError::UnknownKind(name.clone()))?;

    let mut payload = object.clone();
    payload.remove(TYPE_TAG);
    let properties = match kind.codec() {
        Some(codec) => {
            let payload = match payload.remove(VALUE_TAG) {
                Some(value) if payload.is_empty() => value,
                Some(value) => {
                    payload.insert(VALUE_TAG.to_string(), value);
                    Json::Object(payload)
                }
                None => Json::Object(payload),
            };
            (codec.deserialize)(&payload)?
        }
        None => payload
            .iter()
            .map(|(name, value)| Ok((name.clone(), value_from_json(value)?)))
            .collect::<Result<Properties>>()?,
    };
    Ok(NodeDefinition::create(&kind, properties)?)
}

pub fn to_json_string(definition: &NodeDefinition) -> Result<String> {
    Ok(serde_json::to_string(&to_tagged(definition)?)?)
}

pub fn from_json_str(json: &str) -> Result<NodeDefinition> {
    from_tagged(&serde_json::from_str(json)?)
}

pub fn to_msgpack(definition: &NodeDefinition) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(&to_tagged(definition)?)?)
}

pub fn from_msgpack(bytes: &[u8]) -> Result<NodeDefinition> {
    let json: Json = rmp_serde::from_slice(bytes)?;
    from_tagged(&json)
}

pub fn value_to_json(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::Number((*n).into()),
        Value::Float(f) => Json::Number(
            Number::from_f64(*f)
                .ok_or_else(|| EngineError::serialization(format!("{f} has no JSON representation")))?,
        ),
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect::<Result<_>>()?),
        Value::Map(map) => Json::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), value_to_json(v)?)))
                .collect::<Result<_>>()?,
        ),
        Value::Node(node) => to_tagged(node)?,
    })
}

pub fn value_from_json(json: &Json) -> Result<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(value_from_json).collect::<Result<_>>()?),
        Json::Object(object) if object.contains_key(TYPE_TAG) => Value::Node(from_tagged(json)?),
        Json::Object(object) => Value::Map(
            object
                .iter()
                .map(|(k, v)| Ok((k.clone(), value_from_json(v)?)))
                .collect::<Result<_>>()?,
        ),
    })
}

fn json_type(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
