//! Type classification
//!
//! Native data models describe themselves through `schemars::JsonSchema`. The
//! [`TypeGraph`] collects those descriptions (draft 2020-12, named types under
//! `$defs`) and [`TypeGraph::classify`] maps any schema node onto a [`TypeRef`].
//!
//! Classification never fails: shapes with no wire equivalent come back as
//! [`TypeRef::Unsupported`] and the caller decides whether that is fatal.

use std::fmt;

use schemars::generate::SchemaSettings;
use schemars::{JsonSchema, SchemaGenerator};
use serde_json::{Map, Value};

use crate::types::{Scalar, TypeRef};

/// Collected native type descriptions
pub struct TypeGraph {
    generator: SchemaGenerator,
}

impl TypeGraph {
    pub fn new() -> Self {
        Self {
            generator: SchemaSettings::draft2020_12().into_generator(),
        }
    }

    /// Register `T` (and everything it references) and return its classification
    pub fn add<T: JsonSchema>(&mut self) -> TypeRef {
        let schema = self.generator.subschema_for::<T>();
        self.classify(schema.as_value())
    }

    /// All named definitions collected so far, keyed by definition name
    pub fn definitions(&self) -> &Map<String, Value> {
        self.generator.definitions()
    }

    /// Look up one named definition
    pub fn definition(&self, name: &str) -> Option<&Map<String, Value>> {
        self.definitions().get(name).and_then(Value::as_object)
    }

    /// Classify a schema node against this graph's definitions
    pub fn classify(&self, schema: &Value) -> TypeRef {
        classify(schema, self.definitions())
    }
}

impl Default for TypeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeGraph")
            .field("definitions", &self.definitions().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Classify a schema node, resolving `$ref`s through `definitions`
///
/// First match wins: enumeration, instant, duration, sequence, map, union,
/// record, primitive.
pub fn classify(schema: &Value, definitions: &Map<String, Value>) -> TypeRef {
    Classifier { definitions }.classify(schema, None)
}

/// Extract the definition name from a `$ref` pointer
pub fn definition_name(reference: &str) -> Option<String> {
    reference
        .strip_prefix("#/$defs/")
        .or_else(|| reference.strip_prefix("#/definitions/"))
        .map(|name| name.replace("~1", "/").replace("~0", "~"))
}

/// Member names (and their descriptions) if the schema is a plain enumeration
pub fn enum_members(schema: &Map<String, Value>) -> Option<Vec<(String, Option<String>)>> {
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        return values
            .iter()
            .map(|v| v.as_str().map(|s| (s.to_string(), None)))
            .collect();
    }

    let variants = schema
        .get("oneOf")
        .or_else(|| schema.get("anyOf"))
        .and_then(Value::as_array)?;
    if variants.is_empty() {
        return None;
    }
    variants
        .iter()
        .map(|variant| {
            let variant = variant.as_object()?;
            let name = match variant.get("const") {
                Some(Value::String(name)) => name.clone(),
                _ => match variant.get("enum").and_then(Value::as_array)?.as_slice() {
                    [Value::String(name)] => name.clone(),
                    _ => return None,
                },
            };
            let description = variant
                .get("description")
                .and_then(Value::as_str)
                .map(String::from);
            Some((name, description))
        })
        .collect()
}

struct Classifier<'a> {
    definitions: &'a Map<String, Value>,
}

impl Classifier<'_> {
    fn classify(&self, schema: &Value, name: Option<&str>) -> TypeRef {
        let obj = match schema {
            Value::Object(obj) => obj,
            Value::Bool(_) => {
                return TypeRef::Unsupported("schema accepts any value".to_string());
            }
            other => return TypeRef::Unsupported(format!("malformed schema node: {}", other)),
        };

        if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            let Some(def_name) = definition_name(reference) else {
                return TypeRef::Unsupported(format!("unresolvable reference '{}'", reference));
            };
            let Some(definition) = self.definitions.get(&def_name) else {
                return TypeRef::Unsupported(format!("undefined type '{}'", def_name));
            };
            return self.classify(definition, Some(&def_name));
        }

        // A lone allOf wraps a reference so that siblings such as descriptions can ride along
        if let Some([single]) = obj.get("allOf").and_then(Value::as_array).map(Vec::as_slice) {
            return self.classify(single, name);
        }

        if enum_members(obj).is_some() {
            return match name {
                Some(name) => TypeRef::Enum(name.to_string()),
                None => TypeRef::Unsupported("anonymous enumeration".to_string()),
            };
        }

        let types = schema_types(obj);
        let single_type = match types.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        };

        if single_type == Some("string")
            && obj.get("format").and_then(Value::as_str) == Some("date-time")
        {
            return TypeRef::Instant;
        }

        if types.len() <= 1 && is_duration_shape(obj, self.definitions) {
            return TypeRef::Duration;
        }

        if single_type == Some("array") {
            return self.classify_array(obj);
        }

        if single_type == Some("object") && !obj.contains_key("properties") {
            if let Some(values) = obj.get("additionalProperties").filter(|v| v.is_object()) {
                let key = self.map_key(obj, None);
                return TypeRef::Map(Box::new(key), Box::new(self.classify(values, None)));
            }
            // Integer-keyed maps: {"patternProperties": {"^\\d+$": V}, "additionalProperties": false}
            if let Some(patterns) = obj.get("patternProperties").and_then(Value::as_object)
                && let [(pattern, values)] = patterns.iter().collect::<Vec<_>>().as_slice()
            {
                let key = self.map_key(obj, Some(pattern.as_str()));
                return TypeRef::Map(Box::new(key), Box::new(self.classify(values, None)));
            }
        }

        if let Some(variants) = obj
            .get("anyOf")
            .or_else(|| obj.get("oneOf"))
            .and_then(Value::as_array)
        {
            let mut nullable = false;
            let mut members = Vec::new();
            for variant in variants {
                if is_null_schema(variant) {
                    nullable = true;
                } else {
                    members.push(self.classify(variant, None));
                }
            }
            return TypeRef::union(members, nullable);
        }

        if types.len() > 1 {
            let nullable = types.iter().any(|t| t == "null");
            let members = types
                .iter()
                .filter(|t| t.as_str() != "null")
                .map(|t| {
                    let mut narrowed = obj.clone();
                    narrowed.insert("type".to_string(), Value::String(t.clone()));
                    self.classify(&Value::Object(narrowed), name)
                })
                .collect::<Vec<_>>();
            return TypeRef::union(members, nullable);
        }

        if single_type == Some("object") || (single_type.is_none() && obj.contains_key("properties")) {
            return match name {
                Some(name) => TypeRef::Record(name.to_string()),
                None => TypeRef::Unsupported("anonymous record".to_string()),
            };
        }

        match single_type.and_then(|t| scalar_for(t, obj.get("format").and_then(Value::as_str))) {
            Some(scalar) => TypeRef::Primitive(scalar),
            None => TypeRef::Unsupported(match single_type {
                Some(t) => format!("no wire type for '{}'", t),
                None => "schema has no type".to_string(),
            }),
        }
    }

    fn map_key(&self, obj: &Map<String, Value>, pattern: Option<&str>) -> TypeRef {
        let declared = obj
            .get("propertyNames")
            .map(|keys| self.classify(keys, None))
            .filter(|key| matches!(key, TypeRef::Primitive(s) if s.is_integral()));
        if let Some(key) = declared {
            return key;
        }
        match pattern {
            Some(p) if p.contains("\\d") && p.contains('-') => TypeRef::Primitive(Scalar::Int64),
            Some(p) if p.contains("\\d") => TypeRef::Primitive(Scalar::Uint64),
            _ => TypeRef::Primitive(Scalar::String),
        }
    }

    fn classify_array(&self, obj: &Map<String, Value>) -> TypeRef {
        if obj.contains_key("prefixItems") {
            return TypeRef::Unsupported("tuples have no wire equivalent".to_string());
        }
        let Some(items) = obj.get("items") else {
            return TypeRef::Unsupported("array without item type".to_string());
        };
        if let Some(items_obj) = items.as_object()
            && items_obj.get("type").and_then(Value::as_str) == Some("integer")
            && items_obj.get("format").and_then(Value::as_str) == Some("uint8")
        {
            return TypeRef::Primitive(Scalar::Bytes);
        }
        TypeRef::Sequence(Box::new(self.classify(items, None)))
    }
}

fn schema_types(obj: &Map<String, Value>) -> Vec<String> {
    match obj.get("type") {
        Some(Value::String(t)) => vec![t.clone()],
        Some(Value::Array(ts)) => ts
            .iter()
            .filter_map(|t| t.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

fn is_null_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("null")
        || schema.get("const").is_some_and(Value::is_null)
}

/// `std::time::Duration` serializes as `{secs, nanos}`
fn is_duration_shape(obj: &Map<String, Value>, definitions: &Map<String, Value>) -> bool {
    let Some(properties) = obj.get("properties").and_then(Value::as_object) else {
        return false;
    };
    if properties.len() != 2 {
        return false;
    }
    let integral = |key: &str| {
        let Some(prop) = properties.get(key) else {
            return false;
        };
        matches!(
            classify(prop, definitions),
            TypeRef::Primitive(scalar) if scalar.is_integral()
        )
    };
    integral("secs") && integral("nanos")
}

fn scalar_for(schema_type: &str, format: Option<&str>) -> Option<Scalar> {
    match schema_type {
        "boolean" => Some(Scalar::Bool),
        "string" => Some(Scalar::String),
        "integer" => Some(match format {
            Some("int8" | "int16" | "int32") => Scalar::Int32,
            Some("uint8" | "uint16" | "uint32") => Scalar::Uint32,
            Some("uint64" | "uint" | "uint128") => Scalar::Uint64,
            _ => Scalar::Int64,
        }),
        "number" => Some(match format {
            Some("float") => Scalar::Float,
            _ => Scalar::Double,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_primitive_formats() {
        let empty = Map::new();
        let cases = [
            (json!({"type": "integer", "format": "int32"}), Scalar::Int32),
            (json!({"type": "integer", "format": "uint16", "minimum": 0}), Scalar::Uint32),
            (json!({"type": "integer", "format": "uint64", "minimum": 0}), Scalar::Uint64),
            (json!({"type": "integer"}), Scalar::Int64),
            (json!({"type": "number", "format": "float"}), Scalar::Float),
            (json!({"type": "number", "format": "double"}), Scalar::Double),
            (json!({"type": "boolean"}), Scalar::Bool),
            (json!({"type": "string"}), Scalar::String),
        ];
        for (schema, expected) in cases {
            assert_eq!(classify(&schema, &empty), TypeRef::Primitive(expected), "{}", schema);
        }
    }

    #[test]
    fn test_enum_wins_over_primitive() {
        let definitions = defs(json!({
            "Color": {"type": "string", "enum": ["Red", "Green"]},
        }));
        let ty = classify(&json!({"$ref": "#/$defs/Color"}), &definitions);
        assert_eq!(ty, TypeRef::Enum("Color".to_string()));
    }

    #[test]
    fn test_documented_enum_variants() {
        let definitions = defs(json!({
            "Level": {"oneOf": [
                {"type": "string", "const": "Low", "description": "Lowest"},
                {"type": "string", "const": "High"},
            ]},
        }));
        let ty = classify(&json!({"$ref": "#/$defs/Level"}), &definitions);
        assert_eq!(ty, TypeRef::Enum("Level".to_string()));

        let members = enum_members(definitions["Level"].as_object().unwrap()).unwrap();
        assert_eq!(members[0], ("Low".to_string(), Some("Lowest".to_string())));
    }

    #[test]
    fn test_temporal_shapes() {
        let definitions = defs(json!({
            "Duration": {
                "type": "object",
                "properties": {
                    "secs": {"type": "integer", "format": "uint64", "minimum": 0},
                    "nanos": {"type": "integer", "format": "uint32", "minimum": 0},
                },
                "required": ["secs", "nanos"],
            },
        }));
        let instant = json!({"type": "string", "format": "date-time"});
        assert_eq!(classify(&instant, &definitions), TypeRef::Instant);
        let duration = json!({"$ref": "#/$defs/Duration"});
        assert_eq!(classify(&duration, &definitions), TypeRef::Duration);
    }

    #[test]
    fn test_nullable_type_array_is_union() {
        let empty = Map::new();
        let ty = classify(&json!({"type": ["integer", "null"], "format": "int32"}), &empty);
        assert_eq!(
            ty,
            TypeRef::union([TypeRef::Primitive(Scalar::Int32)], true)
        );
    }

    #[test]
    fn test_any_of_with_reference_and_null() {
        let definitions = defs(json!({
            "User": {"type": "object", "properties": {"name": {"type": "string"}}},
        }));
        let ty = classify(
            &json!({"anyOf": [{"$ref": "#/$defs/User"}, {"type": "null"}]}),
            &definitions,
        );
        assert_eq!(ty, TypeRef::union([TypeRef::Record("User".into())], true));
    }

    #[test]
    fn test_collections() {
        let empty = Map::new();
        let bytes = json!({"type": "array", "items": {"type": "integer", "format": "uint8"}});
        assert_eq!(classify(&bytes, &empty), TypeRef::Primitive(Scalar::Bytes));

        let map = json!({"type": "object", "additionalProperties": {"type": "number"}});
        assert_eq!(
            classify(&map, &empty),
            TypeRef::Map(
                Box::new(TypeRef::Primitive(Scalar::String)),
                Box::new(TypeRef::Primitive(Scalar::Double)),
            )
        );

        let keyed = json!({
            "type": "object",
            "patternProperties": {"^\\d+$": {"type": "string"}},
            "additionalProperties": false,
        });
        assert_eq!(
            classify(&keyed, &empty),
            TypeRef::Map(
                Box::new(TypeRef::Primitive(Scalar::Uint64)),
                Box::new(TypeRef::Primitive(Scalar::String)),
            )
        );

        let tuple = json!({"type": "array", "prefixItems": [{"type": "string"}]});
        assert_eq!(classify(&tuple, &empty).kind(), crate::TypeKind::Unsupported);
    }

    #[test]
    fn test_anonymous_record_is_unsupported() {
        let empty = Map::new();
        let inline = json!({"type": "object", "properties": {"a": {"type": "string"}}});
        assert!(matches!(classify(&inline, &empty), TypeRef::Unsupported(_)));
    }

    #[test]
    fn test_definition_name_unescapes_pointer() {
        assert_eq!(definition_name("#/$defs/a~1b").as_deref(), Some("a/b"));
        assert_eq!(definition_name("#/definitions/User").as_deref(), Some("User"));
        assert_eq!(definition_name("other.json"), None);
    }
}
