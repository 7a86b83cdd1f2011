//! Property write translation.
//!
//! Inbound property payloads come from a UI that sends most values as
//! strings. Each value is first parsed into a tagged [`PropValue`], then each
//! key is mapped onto a typed [`MapProperty`] write. This is the inverse of
//! the map normalizer for the mutable subset of fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Number, Value};

use crate::graph::{Location, MapProperty, Protocol};

/// Routing fields that address a map inside a property payload.
pub const ROUTING_KEYS: [&str; 3] = ["src", "srcs", "dst"];

/// Derived fields the normalizer computes; writing them back is meaningless.
const DERIVED_KEYS: [&str; 4] = ["id", "key", "status", "num_maps"];

/// A parsed inbound property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Bool(bool),
    Absent,
    Number(Number),
    Text(String),
    Array(Vec<Value>),
    Object(JsonMap<String, Value>),
}

impl PropValue {
    /// Parse a JSON value, coercing string tokens.
    ///
    /// `true`/`t` and `false`/`f` (any case) become booleans, `null`/`Null`
    /// becomes [`PropValue::Absent`]; any other string passes through unchanged.
    pub fn parse(value: &Value) -> Self {
        match value {
            Value::Null => PropValue::Absent,
            Value::Bool(b) => PropValue::Bool(*b),
            Value::Number(n) => PropValue::Number(n.clone()),
            Value::String(s) => Self::parse_token(s),
            Value::Array(items) => PropValue::Array(items.clone()),
            Value::Object(map) => PropValue::Object(map.clone()),
        }
    }

    /// Parse a single string token.
    pub fn parse_token(token: &str) -> Self {
        if token.eq_ignore_ascii_case("true") || token.eq_ignore_ascii_case("t") {
            PropValue::Bool(true)
        } else if token.eq_ignore_ascii_case("false") || token.eq_ignore_ascii_case("f") {
            PropValue::Bool(false)
        } else if token == "null" || token == "Null" {
            PropValue::Absent
        } else {
            PropValue::Text(token.to_string())
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert back to JSON; `Absent` becomes `None`.
    pub fn into_json(self) -> Option<Value> {
        match self {
            PropValue::Absent => None,
            PropValue::Bool(b) => Some(Value::Bool(b)),
            PropValue::Number(n) => Some(Value::Number(n)),
            PropValue::Text(s) => Some(Value::String(s)),
            PropValue::Array(items) => Some(Value::Array(items)),
            PropValue::Object(map) => Some(Value::Object(map)),
        }
    }
}

/// Translate one payload entry into a typed map write.
///
/// Returns `None` when the key is a routing or derived field, or when the
/// value is not acceptable for a typed key (non-boolean `muted`, unknown
/// `protocol` token, ...). Such entries are ignored.
pub fn translate(key: &str, value: &Value) -> Option<MapProperty> {
    if ROUTING_KEYS.contains(&key) || DERIVED_KEYS.contains(&key) {
        return None;
    }

    let parsed = PropValue::parse(value);
    match key {
        "expr" => match parsed {
            PropValue::Text(expr) => Some(MapProperty::Expression(Some(expr))),
            PropValue::Absent => Some(MapProperty::Expression(None)),
            _ => None,
        },
        "muted" => parsed.as_bool().map(MapProperty::Muted),
        "protocol" => parsed
            .as_text()
            .and_then(Protocol::from_token)
            .map(MapProperty::Protocol),
        "process_loc" => parsed
            .as_text()
            .and_then(Location::from_token)
            .map(MapProperty::ProcessLocation),
        _ => match slot_key(key) {
            Some((location, field)) => translate_slot(location, field, parsed),
            None => Some(MapProperty::Extension(key.to_string(), parsed)),
        },
    }
}

/// Split `src_min`, `dst_calibrating`, ... into slot and field.
fn slot_key(key: &str) -> Option<(Location, &str)> {
    let (prefix, field) = key.split_once('_')?;
    let location = Location::from_token(prefix)?;
    matches!(field, "min" | "max" | "calibrating").then_some((location, field))
}

/// A slot key never falls back to an extension, even with a rejected value.
fn translate_slot(location: Location, field: &str, value: PropValue) -> Option<MapProperty> {
    match field {
        "min" => Some(MapProperty::SlotMin(location, value.into_json())),
        "max" => Some(MapProperty::SlotMax(location, value.into_json())),
        _ => value
            .as_bool()
            .map(|calib| MapProperty::SlotCalibrating(location, calib)),
    }
}

/// Translate a whole payload, preserving payload order.
pub fn translate_all(payload: &JsonMap<String, Value>) -> Vec<MapProperty> {
    payload
        .iter()
        .filter_map(|(key, value)| {
            let property = translate(key, value);
            if property.is_none() && !ROUTING_KEYS.contains(&key.as_str()) {
                tracing::debug!("Ignoring map property {}={}", key, value);
            }
            property
        })
        .collect()
}
