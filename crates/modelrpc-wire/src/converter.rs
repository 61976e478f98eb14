//! Converter trees
//!
//! A [`Converter`] mirrors the classification of one type and translates in both
//! directions between the native form (the `serde_json::Value` a data model
//! serializes to) and [`WireValue`]. Record converters share an [`Arc<RecordPlan>`]
//! whose fields are filled in after the plan is memoized, so recursive records
//! resolve to the same plan instead of recursing forever.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, SecondsFormat, Utc};
use modelrpc_schema::{Catalog, EnumSpec, MessageItem, Scalar, TypeRef, wire_identifier};
use serde_json::{Map, Value, json};

use crate::Result;
use crate::error::ConvertError;
use crate::value::{WireMessage, WireValue};

// Bounds default-value synthesis for self-referencing records
const MAX_DEFAULT_DEPTH: usize = 32;

/// Largest `nanos` a `google.protobuf.Timestamp` may carry
const MAX_NANOS: u32 = 999_999_999;

/// Constructs concrete messages from named field values
///
/// This is the compiled-binding side of conversion: a binding may refuse types
/// or fields it does not know.
pub trait MessageFactory: Send + Sync {
    fn new_message(&self, type_name: &str, fields: Vec<(String, WireValue)>) -> Result<WireMessage>;
}

/// Builds messages without checking them against any schema
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFactory;

impl MessageFactory for PlainFactory {
    fn new_message(&self, type_name: &str, fields: Vec<(String, WireValue)>) -> Result<WireMessage> {
        let mut message = WireMessage::new(type_name);
        for (name, value) in fields {
            message.set(name, value);
        }
        Ok(message)
    }
}

/// Bidirectional converter for one type
#[derive(Debug, Clone)]
pub enum Converter {
    Scalar(Scalar),
    Enum(Arc<EnumSpec>),
    Instant,
    Duration,
    Sequence(Box<Converter>),
    Map(Scalar, Box<Converter>),
    Record(Arc<RecordPlan>),
}

/// Field layout of one record
pub struct RecordPlan {
    name: String,
    fields: OnceLock<Vec<FieldPlan>>,
}

impl RecordPlan {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> &[FieldPlan] {
        self.fields.get().map(Vec::as_slice).unwrap_or_default()
    }

    fn has_native_field(&self, name: &str) -> bool {
        self.fields().iter().any(|f| f.name() == name)
    }

    fn has_wire_field(&self, name: &str) -> bool {
        self.fields().iter().any(|field| match field {
            FieldPlan::Single { name: n, .. } => n == name,
            FieldPlan::OneOf { alternatives, .. } => alternatives.iter().any(|(n, _)| n == name),
        })
    }
}

impl fmt::Debug for RecordPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordPlan")
            .field("name", &self.name)
            .field("fields", &self.fields().len())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum FieldPlan {
    Single {
        name: String,
        converter: Converter,
        nullable: bool,
    },
    OneOf {
        name: String,
        alternatives: Vec<(String, Converter)>,
        nullable: bool,
    },
}

impl FieldPlan {
    fn name(&self) -> &str {
        match self {
            FieldPlan::Single { name, .. } | FieldPlan::OneOf { name, .. } => name,
        }
    }
}

/// Builds converters against one catalog, sharing record plans between calls
pub(crate) struct ConverterBuilder<'a> {
    catalog: &'a Catalog,
    plans: HashMap<String, Arc<RecordPlan>>,
}

impl<'a> ConverterBuilder<'a> {
    pub(crate) fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            plans: HashMap::new(),
        }
    }

    pub(crate) fn build(&mut self, ty: &TypeRef) -> Result<Converter> {
        match ty {
            TypeRef::Primitive(scalar) => Ok(Converter::Scalar(*scalar)),
            TypeRef::Enum(name) => {
                let wire_name = wire_identifier(name);
                let spec = self
                    .catalog
                    .enumeration(&wire_name)
                    .ok_or(ConvertError::UnknownType(wire_name))?;
                Ok(Converter::Enum(Arc::new(spec.clone())))
            }
            TypeRef::Instant => Ok(Converter::Instant),
            TypeRef::Duration => Ok(Converter::Duration),
            TypeRef::Sequence(inner) => Ok(Converter::Sequence(Box::new(self.build(inner)?))),
            TypeRef::Map(key, value) => match **key {
                TypeRef::Primitive(scalar) if scalar.is_valid_map_key() => {
                    Ok(Converter::Map(scalar, Box::new(self.build(value)?)))
                }
                _ => Err(ConvertError::Unsupported(ty.to_string())),
            },
            TypeRef::Record(name) => self.record(name),
            TypeRef::Union(_) | TypeRef::Unsupported(_) => {
                Err(ConvertError::Unsupported(ty.to_string()))
            }
        }
    }

    fn record(&mut self, name: &str) -> Result<Converter> {
        let wire_name = wire_identifier(name);
        if let Some(plan) = self.plans.get(&wire_name) {
            return Ok(Converter::Record(plan.clone()));
        }

        let catalog = self.catalog;
        let message = catalog
            .message(&wire_name)
            .ok_or_else(|| ConvertError::UnknownType(wire_name.clone()))?;
        let plan = Arc::new(RecordPlan {
            name: wire_name.clone(),
            fields: OnceLock::new(),
        });
        self.plans.insert(wire_name, plan.clone());

        let mut fields = Vec::with_capacity(message.items.len());
        for item in &message.items {
            let field = match item {
                MessageItem::Field(field) => FieldPlan::Single {
                    name: field.name.clone(),
                    converter: self.build(field.wire_type())?,
                    nullable: field.is_nullable(),
                },
                MessageItem::OneOf(oneof) => FieldPlan::OneOf {
                    name: oneof.name.clone(),
                    alternatives: oneof
                        .alternatives
                        .iter()
                        .map(|alt| Ok((alt.name.clone(), self.build(&alt.ty)?)))
                        .collect::<Result<Vec<_>>>()?,
                    nullable: oneof.nullable,
                },
            };
            fields.push(field);
        }
        // Only this builder holds the fresh plan, so the cell is still empty
        let _ = plan.fields.set(fields);
        Ok(Converter::Record(plan))
    }
}

impl Converter {
    /// Name of the wire type, for error messages
    pub fn wire_name(&self) -> String {
        match self {
            Converter::Scalar(scalar) => scalar.wire_name().to_string(),
            Converter::Enum(spec) => spec.name.clone(),
            Converter::Instant => modelrpc_schema::TIMESTAMP_TYPE.to_string(),
            Converter::Duration => modelrpc_schema::DURATION_TYPE.to_string(),
            Converter::Sequence(inner) => format!("repeated {}", inner.wire_name()),
            Converter::Map(key, value) => format!("map<{}, {}>", key, value.wire_name()),
            Converter::Record(plan) => plan.name.clone(),
        }
    }

    /// Native to wire
    pub fn to_wire(&self, value: &Value, factory: &dyn MessageFactory) -> Result<WireValue> {
        match self {
            Converter::Scalar(scalar) => scalar_to_wire(*scalar, value),
            Converter::Enum(spec) => {
                let member = value
                    .as_str()
                    .ok_or_else(|| self.mismatch_native(value))?;
                let number = spec
                    .value_of(member)
                    .ok_or_else(|| ConvertError::UnknownEnumMember {
                        enumeration: spec.name.clone(),
                        member: member.to_string(),
                    })?;
                Ok(WireValue::Enum(number))
            }
            Converter::Instant => {
                let text = value
                    .as_str()
                    .ok_or_else(|| self.mismatch_native(value))?;
                let instant = DateTime::parse_from_rfc3339(text)
                    .map_err(|e| ConvertError::InvalidTimestamp(format!("{}: {}", text, e)))?;
                // Leap seconds carry nanos past one second; Timestamp.nanos stops short of it
                let nanos = i32::try_from(instant.timestamp_subsec_nanos().min(MAX_NANOS))
                    .map_err(|_| ConvertError::InvalidTimestamp(text.to_string()))?;
                Ok(WireValue::Timestamp(prost_types::Timestamp {
                    seconds: instant.timestamp(),
                    nanos,
                }))
            }
            Converter::Duration => {
                let (secs, nanos) =
                    duration_parts(value).ok_or_else(|| self.mismatch_native(value))?;
                Ok(WireValue::Duration(prost_types::Duration {
                    seconds: i64::try_from(secs)
                        .map_err(|_| ConvertError::out_of_range(secs, "google.protobuf.Duration"))?,
                    nanos: i32::try_from(nanos)
                        .map_err(|_| ConvertError::out_of_range(nanos, "google.protobuf.Duration"))?,
                }))
            }
            Converter::Sequence(inner) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| self.mismatch_native(value))?;
                let items = items
                    .iter()
                    .map(|item| inner.to_wire(item, factory))
                    .collect::<Result<Vec<_>>>()?;
                Ok(WireValue::List(items))
            }
            Converter::Map(key, inner) => {
                let entries = value
                    .as_object()
                    .ok_or_else(|| self.mismatch_native(value))?;
                let entries = entries
                    .iter()
                    .map(|(k, v)| Ok((key_to_wire(*key, k)?, inner.to_wire(v, factory)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(WireValue::Map(entries))
            }
            Converter::Record(plan) => record_to_wire(plan, value, factory),
        }
    }

    /// Wire to native
    pub fn from_wire(&self, value: &WireValue) -> Result<Value> {
        match (self, value) {
            (Converter::Scalar(scalar), value) => scalar_from_wire(*scalar, value),
            (Converter::Enum(spec), WireValue::Enum(number)) => spec
                .name_of(*number)
                .map(|name| Value::String(name.to_string()))
                .ok_or_else(|| ConvertError::UnknownEnumValue {
                    enumeration: spec.name.clone(),
                    value: *number,
                }),
            (Converter::Instant, WireValue::Timestamp(ts)) => {
                let instant = u32::try_from(ts.nanos)
                    .ok()
                    .filter(|&nanos| nanos <= MAX_NANOS)
                    .and_then(|nanos| DateTime::<Utc>::from_timestamp(ts.seconds, nanos))
                    .ok_or_else(|| {
                        ConvertError::InvalidTimestamp(format!("{}s {}ns", ts.seconds, ts.nanos))
                    })?;
                Ok(Value::String(
                    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                ))
            }
            (Converter::Duration, WireValue::Duration(d)) => {
                let secs = u64::try_from(d.seconds)
                    .map_err(|_| ConvertError::out_of_range(d.seconds, "std::time::Duration"))?;
                let nanos = u32::try_from(d.nanos)
                    .map_err(|_| ConvertError::out_of_range(d.nanos, "std::time::Duration"))?;
                Ok(json!({ "secs": secs, "nanos": nanos }))
            }
            (Converter::Sequence(inner), WireValue::List(items)) => items
                .iter()
                .map(|item| inner.from_wire(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            (Converter::Map(_, inner), WireValue::Map(entries)) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key_from_wire(key)?, inner.from_wire(value)?);
                }
                Ok(Value::Object(map))
            }
            (Converter::Record(plan), WireValue::Message(message)) => {
                record_from_wire(plan, message)
            }
            (converter, value) => Err(ConvertError::type_mismatch(
                converter.wire_name(),
                value.kind_name(),
            )),
        }
    }

    /// Whether a native value has the runtime shape of this type
    ///
    /// Used to pick the oneof alternative for a union value.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Converter::Scalar(scalar) => scalar_matches(*scalar, value),
            Converter::Enum(spec) => value.as_str().is_some_and(|m| spec.value_of(m).is_some()),
            Converter::Instant => value
                .as_str()
                .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
            Converter::Duration => duration_parts(value).is_some(),
            Converter::Sequence(inner) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| inner.matches(item))),
            Converter::Map(key, inner) => value.as_object().is_some_and(|entries| {
                entries
                    .iter()
                    .all(|(k, v)| key_to_wire(*key, k).is_ok() && inner.matches(v))
            }),
            Converter::Record(plan) => record_matches(plan, value),
        }
    }

    /// Native value of an unset field
    pub fn default_native(&self) -> Value {
        self.default_native_at(0)
    }

    fn default_native_at(&self, depth: usize) -> Value {
        match self {
            Converter::Scalar(scalar) => match scalar {
                Scalar::Bool => Value::Bool(false),
                Scalar::Int32 | Scalar::Int64 | Scalar::Uint32 | Scalar::Uint64 => json!(0),
                Scalar::Float | Scalar::Double => json!(0.0),
                Scalar::String => Value::String(String::new()),
                Scalar::Bytes => Value::Array(Vec::new()),
            },
            Converter::Enum(spec) => spec
                .name_of(0)
                .map(|name| Value::String(name.to_string()))
                .unwrap_or(Value::Null),
            Converter::Instant => Value::String("1970-01-01T00:00:00Z".to_string()),
            Converter::Duration => json!({ "secs": 0, "nanos": 0 }),
            Converter::Sequence(_) => Value::Array(Vec::new()),
            Converter::Map(_, _) => Value::Object(Map::new()),
            Converter::Record(_) if depth >= MAX_DEFAULT_DEPTH => Value::Null,
            Converter::Record(plan) => {
                let mut object = Map::new();
                for field in plan.fields() {
                    let value = match field {
                        FieldPlan::Single { nullable: true, .. }
                        | FieldPlan::OneOf { nullable: true, .. } => Value::Null,
                        FieldPlan::Single { converter, .. } => converter.default_native_at(depth + 1),
                        FieldPlan::OneOf { alternatives, .. } => alternatives
                            .first()
                            .map(|(_, c)| c.default_native_at(depth + 1))
                            .unwrap_or(Value::Null),
                    };
                    object.insert(field.name().to_string(), value);
                }
                Value::Object(object)
            }
        }
    }

    fn mismatch_native(&self, value: &Value) -> ConvertError {
        ConvertError::type_mismatch(self.wire_name(), json_kind(value))
    }
}

fn record_to_wire(plan: &RecordPlan, value: &Value, factory: &dyn MessageFactory) -> Result<WireValue> {
    let object = value
        .as_object()
        .ok_or_else(|| ConvertError::type_mismatch(plan.name.clone(), json_kind(value)))?;
    if let Some(unknown) = object.keys().find(|key| !plan.has_native_field(key)) {
        return Err(ConvertError::UnknownField {
            message: plan.name.clone(),
            field: unknown.clone(),
        });
    }

    let mut fields = Vec::with_capacity(plan.fields().len());
    for field in plan.fields() {
        match field {
            FieldPlan::Single {
                name,
                converter,
                nullable,
            } => match object.get(name) {
                None => {}
                Some(Value::Null) if *nullable => {}
                Some(native) => fields.push((name.clone(), converter.to_wire(native, factory)?)),
            },
            FieldPlan::OneOf {
                name,
                alternatives,
                nullable,
            } => {
                let native = object.get(name).unwrap_or(&Value::Null);
                if native.is_null() && *nullable {
                    continue;
                }
                let (alternative, converter) = alternatives
                    .iter()
                    .find(|(_, converter)| converter.matches(native))
                    .ok_or_else(|| ConvertError::NoMatchingAlternative {
                        field: format!("{}.{}", plan.name, name),
                    })?;
                fields.push((alternative.clone(), converter.to_wire(native, factory)?));
            }
        }
    }
    factory.new_message(&plan.name, fields).map(WireValue::Message)
}

fn record_from_wire(plan: &RecordPlan, message: &WireMessage) -> Result<Value> {
    if message.type_name() != plan.name {
        return Err(ConvertError::type_mismatch(
            plan.name.clone(),
            message.type_name().to_string(),
        ));
    }
    if let Some((unknown, _)) = message
        .fields()
        .iter()
        .find(|(name, _)| !plan.has_wire_field(name))
    {
        return Err(ConvertError::UnknownField {
            message: plan.name.clone(),
            field: unknown.clone(),
        });
    }

    let mut object = Map::new();
    for field in plan.fields() {
        let native = match field {
            FieldPlan::Single {
                name,
                converter,
                nullable,
            } => match message.get(name) {
                Some(wire) => converter.from_wire(wire)?,
                None if *nullable => Value::Null,
                None => converter.default_native(),
            },
            FieldPlan::OneOf {
                name,
                alternatives,
                nullable,
            } => {
                let populated = alternatives
                    .iter()
                    .find_map(|(alt, converter)| message.get(alt).map(|wire| (converter, wire)));
                match populated {
                    Some((converter, wire)) => converter.from_wire(wire)?,
                    None if *nullable => Value::Null,
                    None => {
                        return Err(ConvertError::NoMatchingAlternative {
                            field: format!("{}.{}", plan.name, name),
                        });
                    }
                }
            }
        };
        object.insert(field.name().to_string(), native);
    }
    Ok(Value::Object(object))
}

fn record_matches(plan: &RecordPlan, value: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    if object.keys().any(|key| !plan.has_native_field(key)) {
        return false;
    }
    plan.fields().iter().all(|field| match (field, object.get(field.name())) {
        (FieldPlan::Single { nullable, .. }, None) => *nullable,
        (FieldPlan::Single { nullable: true, .. }, Some(Value::Null)) => true,
        (FieldPlan::Single { converter, .. }, Some(native)) => converter.matches(native),
        (FieldPlan::OneOf { nullable, .. }, None | Some(Value::Null)) => *nullable,
        (FieldPlan::OneOf { alternatives, .. }, Some(native)) => {
            alternatives.iter().any(|(_, c)| c.matches(native))
        }
    })
}

fn scalar_to_wire(scalar: Scalar, value: &Value) -> Result<WireValue> {
    let mismatch = || ConvertError::type_mismatch(scalar.wire_name(), json_kind(value));
    let wire = match scalar {
        Scalar::Bool => WireValue::Bool(value.as_bool().ok_or_else(mismatch)?),
        Scalar::Int32 => {
            let n = value.as_i64().ok_or_else(mismatch)?;
            WireValue::Int32(i32::try_from(n).map_err(|_| ConvertError::out_of_range(n, "int32"))?)
        }
        Scalar::Int64 => WireValue::Int64(value.as_i64().ok_or_else(mismatch)?),
        Scalar::Uint32 => {
            let n = value.as_u64().ok_or_else(mismatch)?;
            WireValue::Uint32(u32::try_from(n).map_err(|_| ConvertError::out_of_range(n, "uint32"))?)
        }
        Scalar::Uint64 => WireValue::Uint64(value.as_u64().ok_or_else(mismatch)?),
        Scalar::Float => WireValue::Float(value.as_f64().ok_or_else(mismatch)? as f32),
        Scalar::Double => WireValue::Double(value.as_f64().ok_or_else(mismatch)?),
        Scalar::String => WireValue::String(value.as_str().ok_or_else(mismatch)?.to_string()),
        Scalar::Bytes => {
            let items = value.as_array().ok_or_else(mismatch)?;
            let bytes = items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(mismatch)
                })
                .collect::<Result<Vec<u8>>>()?;
            WireValue::Bytes(bytes)
        }
    };
    Ok(wire)
}

fn scalar_from_wire(scalar: Scalar, value: &WireValue) -> Result<Value> {
    let native = match (scalar, value) {
        (Scalar::Bool, WireValue::Bool(b)) => Value::Bool(*b),
        (Scalar::Int32, WireValue::Int32(n)) => Value::from(*n),
        (Scalar::Int64, WireValue::Int64(n)) => Value::from(*n),
        (Scalar::Uint32, WireValue::Uint32(n)) => Value::from(*n),
        (Scalar::Uint64, WireValue::Uint64(n)) => Value::from(*n),
        (Scalar::Float, WireValue::Float(f)) => Value::from(f64::from(*f)),
        (Scalar::Double, WireValue::Double(d)) => Value::from(*d),
        (Scalar::String, WireValue::String(s)) => Value::String(s.clone()),
        (Scalar::Bytes, WireValue::Bytes(b)) => {
            Value::Array(b.iter().map(|byte| Value::from(*byte)).collect())
        }
        (scalar, other) => {
            return Err(ConvertError::type_mismatch(
                scalar.wire_name(),
                other.kind_name(),
            ));
        }
    };
    Ok(native)
}

fn scalar_matches(scalar: Scalar, value: &Value) -> bool {
    match scalar {
        Scalar::Bool => value.is_boolean(),
        Scalar::Int32 => value.as_i64().is_some_and(|n| i32::try_from(n).is_ok()),
        Scalar::Int64 => value.is_i64(),
        Scalar::Uint32 => value.as_u64().is_some_and(|n| u32::try_from(n).is_ok()),
        Scalar::Uint64 => value.is_u64(),
        Scalar::Float | Scalar::Double => value.is_f64(),
        Scalar::String => value.is_string(),
        Scalar::Bytes => value.as_array().is_some_and(|items| {
            items
                .iter()
                .all(|b| b.as_u64().is_some_and(|b| b <= u64::from(u8::MAX)))
        }),
    }
}

fn key_to_wire(scalar: Scalar, key: &str) -> Result<WireValue> {
    let invalid = || ConvertError::type_mismatch(format!("{} map key", scalar), format!("'{}'", key));
    let wire = match scalar {
        Scalar::String => WireValue::String(key.to_string()),
        Scalar::Bool => WireValue::Bool(key.parse().map_err(|_| invalid())?),
        Scalar::Int32 => WireValue::Int32(key.parse().map_err(|_| invalid())?),
        Scalar::Int64 => WireValue::Int64(key.parse().map_err(|_| invalid())?),
        Scalar::Uint32 => WireValue::Uint32(key.parse().map_err(|_| invalid())?),
        Scalar::Uint64 => WireValue::Uint64(key.parse().map_err(|_| invalid())?),
        Scalar::Float | Scalar::Double | Scalar::Bytes => {
            return Err(ConvertError::Unsupported(format!("{} map key", scalar)));
        }
    };
    Ok(wire)
}

fn key_from_wire(key: &WireValue) -> Result<String> {
    match key {
        WireValue::String(s) => Ok(s.clone()),
        WireValue::Bool(b) => Ok(b.to_string()),
        WireValue::Int32(n) => Ok(n.to_string()),
        WireValue::Int64(n) => Ok(n.to_string()),
        WireValue::Uint32(n) => Ok(n.to_string()),
        WireValue::Uint64(n) => Ok(n.to_string()),
        other => Err(ConvertError::type_mismatch("map key", other.kind_name())),
    }
}

/// `std::time::Duration` serializes as `{"secs": u64, "nanos": u32}`
fn duration_parts(value: &Value) -> Option<(u64, u64)> {
    let object = value.as_object()?;
    if object.len() != 2 {
        return None;
    }
    let secs = object.get("secs")?.as_u64()?;
    let nanos = object.get("nanos")?.as_u64()?;
    Some((secs, nanos))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
