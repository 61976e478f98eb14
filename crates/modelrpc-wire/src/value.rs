//! Wire values
//!
//! The in-memory shape of compiled messages: typed scalars, well-known temporal
//! values, repeated and map fields, and nested messages with named fields.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat};
use serde_json::{Map, Value};

use crate::error::ConvertError;

/// One wire field value
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Uint64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Enum number
    Enum(i32),
    Timestamp(prost_types::Timestamp),
    Duration(prost_types::Duration),
    List(Vec<WireValue>),
    /// Map entries in insertion order
    Map(Vec<(WireValue, WireValue)>),
    Message(WireMessage),
}

impl WireValue {
    /// Short name of the variant, for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            WireValue::Bool(_) => "bool",
            WireValue::Int32(_) => "int32",
            WireValue::Int64(_) => "int64",
            WireValue::Uint32(_) => "uint32",
            WireValue::Uint64(_) => "uint64",
            WireValue::Float(_) => "float",
            WireValue::Double(_) => "double",
            WireValue::String(_) => "string",
            WireValue::Bytes(_) => "bytes",
            WireValue::Enum(_) => "enum",
            WireValue::Timestamp(_) => "timestamp",
            WireValue::Duration(_) => "duration",
            WireValue::List(_) => "list",
            WireValue::Map(_) => "map",
            WireValue::Message(_) => "message",
        }
    }

    pub fn as_message(&self) -> Option<&WireMessage> {
        match self {
            WireValue::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn into_message(self) -> Result<WireMessage, ConvertError> {
        match self {
            WireValue::Message(message) => Ok(message),
            other => Err(ConvertError::type_mismatch("message", other.kind_name())),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// JSON rendering along the lines of the proto3 JSON mapping
    ///
    /// 64-bit integers become strings, bytes become base64 and temporal values
    /// use their RFC 3339 / seconds forms. Enums stay numeric since the value
    /// carries no member names.
    pub fn to_json(&self) -> Value {
        match self {
            WireValue::Bool(b) => Value::Bool(*b),
            WireValue::Int32(i) => Value::from(*i),
            WireValue::Int64(i) => Value::String(i.to_string()),
            WireValue::Uint32(u) => Value::from(*u),
            WireValue::Uint64(u) => Value::String(u.to_string()),
            WireValue::Float(f) => Value::from(f64::from(*f)),
            WireValue::Double(d) => Value::from(*d),
            WireValue::String(s) => Value::String(s.clone()),
            WireValue::Bytes(b) => Value::String(STANDARD.encode(b)),
            WireValue::Enum(e) => Value::from(*e),
            WireValue::Timestamp(ts) => {
                match DateTime::from_timestamp(ts.seconds, ts.nanos.max(0) as u32) {
                    Some(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                    None => Value::Null,
                }
            }
            WireValue::Duration(d) => {
                let fraction = if d.nanos == 0 {
                    String::new()
                } else {
                    format!(".{:09}", d.nanos.unsigned_abs())
                };
                let sign = if d.seconds == 0 && d.nanos < 0 { "-" } else { "" };
                Value::String(format!("{}{}{}s", sign, d.seconds, fraction))
            }
            WireValue::List(items) => Value::Array(items.iter().map(WireValue::to_json).collect()),
            WireValue::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let key = match key.to_json() {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    map.insert(key, value.to_json());
                }
                Value::Object(map)
            }
            WireValue::Message(message) => message.to_json(),
        }
    }
}

/// A message value: its wire type name and the fields that are set
///
/// Unset fields, including oneofs with no populated alternative, are simply absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WireMessage {
    type_name: String,
    fields: Vec<(String, WireValue)>,
}

impl WireMessage {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: impl Into<String>, value: WireValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Set a field, replacing any previous value
    pub fn set(&mut self, name: impl Into<String>, value: WireValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&WireValue> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn fields(&self) -> &[(String, WireValue)] {
        &self.fields
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        Value::Object(map)
    }
}
