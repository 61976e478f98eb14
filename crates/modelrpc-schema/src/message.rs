//! Message and enum synthesis
//!
//! [`synthesize_message`] turns one record definition into a [`MessageSpec`]:
//! fields in declaration order, numbered by a single running counter starting at 1.
//! A union field becomes a oneof whose alternatives each take the next number.

use std::fmt;

use serde_json::{Map, Value};

use crate::classify::{TypeGraph, enum_members};
use crate::types::{Scalar, TypeRef, UnionRef};
use crate::{Result, SchemaError};

/// Documentation-only constraint surfaced from the data model
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Minimum(f64),
    Maximum(f64),
    ExclusiveMinimum(f64),
    ExclusiveMaximum(f64),
    MultipleOf(f64),
    MinLength(u64),
    MaxLength(u64),
    MinItems(u64),
    MaxItems(u64),
    Pattern(String),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Minimum(v) => write!(f, ">= {}", v),
            Constraint::Maximum(v) => write!(f, "<= {}", v),
            Constraint::ExclusiveMinimum(v) => write!(f, "> {}", v),
            Constraint::ExclusiveMaximum(v) => write!(f, "< {}", v),
            Constraint::MultipleOf(v) => write!(f, "multiple of {}", v),
            Constraint::MinLength(v) => write!(f, "min length {}", v),
            Constraint::MaxLength(v) => write!(f, "max length {}", v),
            Constraint::MinItems(v) => write!(f, "min items {}", v),
            Constraint::MaxItems(v) => write!(f, "max items {}", v),
            Constraint::Pattern(p) => write!(f, "pattern {}", p),
        }
    }
}

/// One numbered field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    /// Native type; `Option<T>` fields keep their union form
    pub ty: TypeRef,
    pub number: u32,
    /// Rendered with the proto3 `optional` label
    pub optional: bool,
    pub description: Option<String>,
    pub constraints: Vec<Constraint>,
}

impl FieldSpec {
    /// Type carried on the wire, with any `Option` wrapper removed
    pub fn wire_type(&self) -> &TypeRef {
        match &self.ty {
            TypeRef::Union(union) if union.is_optional() => &union.members[0],
            other => other,
        }
    }

    /// True when the native field accepts absence
    pub fn is_nullable(&self) -> bool {
        matches!(&self.ty, TypeRef::Union(union) if union.is_optional())
    }

    /// Declaration form, e.g. `repeated string tags = 3`
    pub fn declaration(&self) -> String {
        let type_name = self.wire_type().wire_type_name().unwrap_or_default();
        let label = if self.optional { "optional " } else { "" };
        format!("{}{} {} = {}", label, type_name, self.name, self.number)
    }
}

/// A union field rendered as a oneof group
#[derive(Debug, Clone, PartialEq)]
pub struct OneOfSpec {
    pub name: String,
    /// One field per flattened union member, in member order
    pub alternatives: Vec<FieldSpec>,
    /// The native field may also be absent
    pub nullable: bool,
    pub description: Option<String>,
    pub constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageItem {
    Field(FieldSpec),
    OneOf(OneOfSpec),
}

impl MessageItem {
    /// Native field name this item was synthesized from
    pub fn name(&self) -> &str {
        match self {
            MessageItem::Field(field) => &field.name,
            MessageItem::OneOf(oneof) => &oneof.name,
        }
    }
}

/// Schema form of one record type
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSpec {
    pub name: String,
    pub description: Option<String>,
    pub items: Vec<MessageItem>,
}

impl MessageSpec {
    /// Every numbered field, oneof alternatives included, in number order
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.items.iter().flat_map(|item| match item {
            MessageItem::Field(field) => std::slice::from_ref(field).iter(),
            MessageItem::OneOf(oneof) => oneof.alternatives.iter(),
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    pub value: i32,
    pub description: Option<String>,
}

/// Schema form of one native enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSpec {
    pub name: String,
    pub description: Option<String>,
    pub members: Vec<EnumMember>,
}

impl EnumSpec {
    pub fn value_of(&self, member: &str) -> Option<i32> {
        self.members.iter().find(|m| m.name == member).map(|m| m.value)
    }

    pub fn name_of(&self, value: i32) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.value == value)
            .map(|m| m.name.as_str())
    }
}

/// Identifier-safe form of a definition name
pub fn wire_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Synthesize the message for record `name`
///
/// Returns the message and every enum or record it references, in field order,
/// that the caller has not seen yet according to `is_known`.
pub fn synthesize_message(
    graph: &TypeGraph,
    name: &str,
    is_known: &dyn Fn(&TypeRef) -> bool,
) -> Result<(MessageSpec, Vec<TypeRef>)> {
    let definition = graph
        .definition(name)
        .ok_or_else(|| SchemaError::UnknownType(name.to_string()))?;
    let properties = definition
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let message_name = wire_identifier(name);
    let mut items = Vec::with_capacity(properties.len());
    let mut referenced: Vec<TypeRef> = Vec::new();
    let mut next_number = 1u32;

    for (field_name, field_schema) in &properties {
        let ty = graph.classify(field_schema);
        let field_schema = field_schema.as_object().cloned().unwrap_or_default();
        let description = describe(&field_schema);
        let constraints = constraints_of(&field_schema, &ty);
        let unsupported = |reason: String| SchemaError::UnsupportedField {
            message: message_name.clone(),
            field: field_name.clone(),
            reason,
        };

        let item = match &ty {
            TypeRef::Union(union) if !union.is_optional() => {
                let oneof = synthesize_oneof(
                    &message_name,
                    field_name,
                    union,
                    &mut next_number,
                    description,
                    constraints,
                )?;
                MessageItem::OneOf(oneof)
            }
            TypeRef::Union(union) => {
                let member = &union.members[0];
                check_field_type(member).map_err(unsupported)?;
                // Collections carry no presence on the wire, absent and empty coincide
                let field = FieldSpec {
                    name: field_name.clone(),
                    ty: ty.clone(),
                    number: next_number,
                    optional: member.is_singular(),
                    description,
                    constraints,
                };
                next_number += 1;
                MessageItem::Field(field)
            }
            other => {
                check_field_type(other).map_err(unsupported)?;
                let field = FieldSpec {
                    name: field_name.clone(),
                    ty: other.clone(),
                    number: next_number,
                    optional: false,
                    description,
                    constraints,
                };
                next_number += 1;
                MessageItem::Field(field)
            }
        };

        ty.walk(&mut |nested| {
            if matches!(nested, TypeRef::Enum(_) | TypeRef::Record(_))
                && !is_known(nested)
                && !referenced.contains(nested)
            {
                referenced.push(nested.clone());
            }
        });
        items.push(item);
    }

    let message = MessageSpec {
        name: message_name,
        description: describe(definition),
        items,
    };
    Ok((message, referenced))
}

/// Synthesize the enum for enumeration `name`, members numbered from 0
pub fn synthesize_enum(graph: &TypeGraph, name: &str) -> Result<EnumSpec> {
    let definition = graph
        .definition(name)
        .ok_or_else(|| SchemaError::UnknownType(name.to_string()))?;
    let members = enum_members(definition)
        .ok_or_else(|| SchemaError::UnsupportedType(format!("'{}' is not an enumeration", name)))?;

    let members = members
        .into_iter()
        .enumerate()
        .map(|(value, (member, description))| {
            let value = i32::try_from(value).map_err(|_| {
                SchemaError::UnsupportedType(format!("enumeration '{}' is too large", name))
            })?;
            Ok(EnumMember {
                name: wire_identifier(&member),
                value,
                description,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(EnumSpec {
        name: wire_identifier(name),
        description: describe(definition),
        members,
    })
}

fn synthesize_oneof(
    message: &str,
    field_name: &str,
    union: &UnionRef,
    next_number: &mut u32,
    description: Option<String>,
    constraints: Vec<Constraint>,
) -> Result<OneOfSpec> {
    if union.members.is_empty() {
        return Err(SchemaError::UnsupportedField {
            message: message.to_string(),
            field: field_name.to_string(),
            reason: "union has no members".to_string(),
        });
    }

    let mut alternatives: Vec<FieldSpec> = Vec::with_capacity(union.members.len());
    for member in &union.members {
        if !member.is_singular() {
            return Err(SchemaError::UnsupportedField {
                message: message.to_string(),
                field: field_name.to_string(),
                reason: format!("{} cannot be a oneof alternative", member),
            });
        }
        let type_name = member.wire_type_name().unwrap_or_default();
        let alternative = format!("{}_{}", field_name, type_name.replace('.', "_"));
        if alternatives.iter().any(|a| a.name == alternative) {
            return Err(SchemaError::OneOfCollision {
                message: message.to_string(),
                field: field_name.to_string(),
                alternative,
            });
        }
        alternatives.push(FieldSpec {
            name: alternative,
            ty: member.clone(),
            number: *next_number,
            optional: false,
            description: None,
            constraints: Vec::new(),
        });
        *next_number += 1;
    }

    Ok(OneOfSpec {
        name: field_name.to_string(),
        alternatives,
        nullable: union.nullable,
        description,
        constraints,
    })
}

/// Reason a non-union type cannot be a field, if any
fn check_field_type(ty: &TypeRef) -> std::result::Result<(), String> {
    match ty {
        TypeRef::Unsupported(reason) => Err(reason.clone()),
        TypeRef::Sequence(inner) if !inner.is_singular() => {
            Err(format!("sequence of {} has no wire equivalent", inner))
        }
        TypeRef::Map(key, _) if !matches!(**key, TypeRef::Primitive(s) if s.is_valid_map_key()) => {
            Err(format!("map key {} has no wire equivalent", key))
        }
        TypeRef::Map(_, value) if !value.is_singular() => {
            Err(format!("map value {} has no wire equivalent", value))
        }
        TypeRef::Union(_) => Err("nested union".to_string()),
        _ => Ok(()),
    }
}

/// Title and description joined the way doc comments were written
fn describe(schema: &Map<String, Value>) -> Option<String> {
    let title = schema.get("title").and_then(Value::as_str);
    let description = schema.get("description").and_then(Value::as_str);
    match (title, description) {
        (Some(title), Some(description)) => Some(format!("{}\n\n{}", title, description)),
        (Some(text), None) | (None, Some(text)) => Some(text.to_string()),
        (None, None) => None,
    }
}

fn constraints_of(schema: &Map<String, Value>, ty: &TypeRef) -> Vec<Constraint> {
    let number = |key: &str| schema.get(key).and_then(Value::as_f64);
    let count = |key: &str| schema.get(key).and_then(Value::as_u64);
    let (implied_min, implied_max) = implied_bounds(ty, schema);

    let mut constraints = Vec::new();
    if let Some(v) = number("minimum").filter(|v| Some(*v) != implied_min) {
        constraints.push(Constraint::Minimum(v));
    }
    if let Some(v) = number("maximum").filter(|v| Some(*v) != implied_max) {
        constraints.push(Constraint::Maximum(v));
    }
    if let Some(v) = number("exclusiveMinimum") {
        constraints.push(Constraint::ExclusiveMinimum(v));
    }
    if let Some(v) = number("exclusiveMaximum") {
        constraints.push(Constraint::ExclusiveMaximum(v));
    }
    if let Some(v) = number("multipleOf") {
        constraints.push(Constraint::MultipleOf(v));
    }
    if let Some(v) = count("minLength") {
        constraints.push(Constraint::MinLength(v));
    }
    if let Some(v) = count("maxLength") {
        constraints.push(Constraint::MaxLength(v));
    }
    if let Some(v) = count("minItems") {
        constraints.push(Constraint::MinItems(v));
    }
    if let Some(v) = count("maxItems") {
        constraints.push(Constraint::MaxItems(v));
    }
    if let Some(p) = schema.get("pattern").and_then(Value::as_str) {
        constraints.push(Constraint::Pattern(p.to_string()));
    }
    constraints
}

/// Bounds that merely restate the native integer width
fn implied_bounds(ty: &TypeRef, schema: &Map<String, Value>) -> (Option<f64>, Option<f64>) {
    let scalar = match ty {
        TypeRef::Primitive(scalar) => *scalar,
        TypeRef::Union(union) if union.is_optional() => match union.members[0] {
            TypeRef::Primitive(scalar) => scalar,
            _ => return (None, None),
        },
        _ => return (None, None),
    };
    if !scalar.is_integral() {
        return (None, None);
    }
    match schema.get("format").and_then(Value::as_str) {
        Some("int8") => (Some(i8::MIN as f64), Some(i8::MAX as f64)),
        Some("int16") => (Some(i16::MIN as f64), Some(i16::MAX as f64)),
        Some("uint8") => (Some(0.0), Some(u8::MAX as f64)),
        Some("uint16") => (Some(0.0), Some(u16::MAX as f64)),
        Some(f) if f.starts_with("uint") => (Some(0.0), None),
        _ if scalar == Scalar::Uint32 || scalar == Scalar::Uint64 => (Some(0.0), None),
        _ => (None, None),
    }
}
