//! Tagged document values
//!
//! The document store transmits every field as a single-key object naming its
//! type (`{"stringValue": "x"}`, `{"mapValue": {"fields": {...}}}` and so on).
//! [`FsValue`] is that encoding as a Rust enum; conversion to and from plain
//! JSON is provided for payloads whose shape is only known at runtime.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Field map of a document or a nested map value
pub type Fields = BTreeMap<String, FsValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum FsValue {
    Null,
    String(String),
    /// Transmitted as a decimal string
    Integer(i64),
    Double(f64),
    Boolean(bool),
    /// RFC 3339 timestamp
    Timestamp(String),
    Map(Fields),
    Array(Vec<FsValue>),
}

impl FsValue {
    /// Convert an arbitrary JSON value; integral numbers become integers
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else {
                    let f = n.as_f64().unwrap_or(0.0);
                    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                        Self::Integer(f as i64)
                    } else {
                        Self::Double(f)
                    }
                }
            }
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::Array(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Plain JSON view; timestamps become strings
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::String(s) | Self::Timestamp(s) => Value::String(s.clone()),
            Self::Integer(i) => json!(i),
            Self::Double(f) => json!(f),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Map(fields) => Value::Object(fields_to_json(fields)),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// Tagged wire representation
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Null => json!({ "nullValue": null }),
            Self::String(s) => json!({ "stringValue": s }),
            Self::Integer(i) => json!({ "integerValue": i.to_string() }),
            Self::Double(f) => json!({ "doubleValue": f }),
            Self::Boolean(b) => json!({ "booleanValue": b }),
            Self::Timestamp(t) => json!({ "timestampValue": t }),
            Self::Map(fields) => {
                let wire: Map<String, Value> =
                    fields.iter().map(|(k, v)| (k.clone(), v.to_wire())).collect();
                json!({ "mapValue": { "fields": wire } })
            }
            Self::Array(items) => {
                let values: Vec<Value> = items.iter().map(Self::to_wire).collect();
                json!({ "arrayValue": { "values": values } })
            }
        }
    }

    /// Parse a tagged wire value; `None` for unknown tags
    pub fn from_wire(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        if obj.contains_key("nullValue") {
            return Some(Self::Null);
        }
        if let Some(s) = obj.get("stringValue") {
            return s.as_str().map(|s| Self::String(s.to_string()));
        }
        if let Some(i) = obj.get("integerValue") {
            return match i {
                Value::String(s) => s.trim().parse().ok().map(Self::Integer),
                Value::Number(n) => n.as_i64().map(Self::Integer),
                _ => None,
            };
        }
        if let Some(d) = obj.get("doubleValue") {
            return match d {
                Value::Number(n) => n.as_f64().map(Self::Double),
                // Non-finite doubles arrive as strings
                Value::String(s) => s.parse().ok().map(Self::Double),
                _ => None,
            };
        }
        if let Some(b) = obj.get("booleanValue") {
            return b.as_bool().map(Self::Boolean);
        }
        if let Some(t) = obj.get("timestampValue") {
            return t.as_str().map(|t| Self::Timestamp(t.to_string()));
        }
        if let Some(m) = obj.get("mapValue") {
            return Some(Self::Map(fields_from_wire(m.get("fields"))));
        }
        if let Some(a) = obj.get("arrayValue") {
            let values = a
                .get("values")
                .and_then(Value::as_array)
                .map(|vs| vs.iter().filter_map(Self::from_wire).collect())
                .unwrap_or_default();
            return Some(Self::Array(values));
        }
        None
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Timestamp(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Double(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            Self::Map(fields) => Some(fields),
            _ => None,
        }
    }
}

impl From<&str> for FsValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FsValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for FsValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for FsValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl<T: Into<FsValue>> From<Option<T>> for FsValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

impl Serialize for FsValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FsValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_wire(&value).ok_or_else(|| D::Error::custom("unsupported document value"))
    }
}

/// Decode a wire `fields` object, skipping values with unknown tags
pub fn fields_from_wire(fields: Option<&Value>) -> Fields {
    fields
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| FsValue::from_wire(v).map(|v| (k.clone(), v)))
                .collect()
        })
        .unwrap_or_default()
}

/// Encode a field map for the wire
pub fn fields_to_wire(fields: &Fields) -> Value {
    Value::Object(fields.iter().map(|(k, v)| (k.clone(), v.to_wire())).collect())
}

/// Plain JSON object of a field map
pub fn fields_to_json(fields: &Fields) -> Map<String, Value> {
    fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}
