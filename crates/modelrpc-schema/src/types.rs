//! Native type references
//!
//! A [`TypeRef`] is the classified form of one native type: what kind of value it is
//! and, for composite kinds, the nested references it is built from.

use std::fmt;

/// Scalar wire types understood by the schema grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scalar {
    Bool,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Float,
    Double,
    String,
    Bytes,
}

impl Scalar {
    /// Name of the scalar in the schema grammar
    pub fn wire_name(&self) -> &'static str {
        match self {
            Scalar::Bool => "bool",
            Scalar::Int32 => "int32",
            Scalar::Int64 => "int64",
            Scalar::Uint32 => "uint32",
            Scalar::Uint64 => "uint64",
            Scalar::Float => "float",
            Scalar::Double => "double",
            Scalar::String => "string",
            Scalar::Bytes => "bytes",
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Scalar::Int32 | Scalar::Int64 | Scalar::Uint32 | Scalar::Uint64
        )
    }

    /// Scalars that may be used as map keys
    pub fn is_valid_map_key(&self) -> bool {
        self.is_integral() || matches!(self, Scalar::Bool | Scalar::String)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Coarse category of a [`TypeRef`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Primitive,
    Enum,
    Instant,
    Duration,
    Sequence,
    Map,
    Union,
    Record,
    Unsupported,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeKind::Primitive => "primitive",
            TypeKind::Enum => "enum",
            TypeKind::Instant => "instant",
            TypeKind::Duration => "duration",
            TypeKind::Sequence => "sequence",
            TypeKind::Map => "map",
            TypeKind::Union => "union",
            TypeKind::Record => "record",
            TypeKind::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

/// Flattened union members
///
/// `members` never contains another union and never contains the absent value;
/// absence is recorded by `nullable`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnionRef {
    pub members: Vec<TypeRef>,
    pub nullable: bool,
}

impl UnionRef {
    /// True for the `Option<T>` shape: exactly one member plus absence
    pub fn is_optional(&self) -> bool {
        self.nullable && self.members.len() == 1
    }
}

/// Classified native type
///
/// Records and enums are referenced by their definition name, which is their
/// identity for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Primitive(Scalar),
    Enum(String),
    Instant,
    Duration,
    Sequence(Box<TypeRef>),
    Map(Box<TypeRef>, Box<TypeRef>),
    Union(UnionRef),
    Record(String),
    Unsupported(String),
}

impl TypeRef {
    pub fn kind(&self) -> TypeKind {
        match self {
            TypeRef::Primitive(_) => TypeKind::Primitive,
            TypeRef::Enum(_) => TypeKind::Enum,
            TypeRef::Instant => TypeKind::Instant,
            TypeRef::Duration => TypeKind::Duration,
            TypeRef::Sequence(_) => TypeKind::Sequence,
            TypeRef::Map(_, _) => TypeKind::Map,
            TypeRef::Union(_) => TypeKind::Union,
            TypeRef::Record(_) => TypeKind::Record,
            TypeRef::Unsupported(_) => TypeKind::Unsupported,
        }
    }

    /// Build a union, flattening nested unions
    ///
    /// Repeated members are kept so that colliding alternatives surface when the
    /// oneof is synthesized. Only nullability is merged.
    pub fn union(members: impl IntoIterator<Item = TypeRef>, nullable: bool) -> TypeRef {
        let mut flat = UnionRef {
            members: Vec::new(),
            nullable,
        };
        for member in members {
            match member {
                TypeRef::Union(inner) => {
                    flat.nullable |= inner.nullable;
                    flat.members.extend(inner.members);
                }
                other => flat.members.push(other),
            }
        }
        TypeRef::Union(flat)
    }

    /// Record name if this is a record reference
    pub fn record_name(&self) -> Option<&str> {
        match self {
            TypeRef::Record(name) => Some(name),
            _ => None,
        }
    }

    /// True for kinds that can stand alone as a singular field, list element or map value
    pub fn is_singular(&self) -> bool {
        matches!(
            self,
            TypeRef::Primitive(_)
                | TypeRef::Enum(_)
                | TypeRef::Instant
                | TypeRef::Duration
                | TypeRef::Record(_)
        )
    }

    /// Name of the type as it appears in a field declaration
    ///
    /// Unions have no single declaration name and yield `None`, as do unsupported types.
    pub fn wire_type_name(&self) -> Option<String> {
        match self {
            TypeRef::Primitive(scalar) => Some(scalar.wire_name().to_string()),
            TypeRef::Enum(name) | TypeRef::Record(name) => {
                Some(crate::message::wire_identifier(name))
            }
            TypeRef::Instant => Some(crate::TIMESTAMP_TYPE.to_string()),
            TypeRef::Duration => Some(crate::DURATION_TYPE.to_string()),
            TypeRef::Sequence(inner) => inner
                .wire_type_name()
                .map(|name| format!("repeated {}", name)),
            TypeRef::Map(key, value) => {
                let key = key.wire_type_name()?;
                let value = value.wire_type_name()?;
                Some(format!("map<{}, {}>", key, value))
            }
            TypeRef::Union(_) | TypeRef::Unsupported(_) => None,
        }
    }

    /// Visit every nested reference, depth first, including `self`
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a TypeRef)) {
        visit(self);
        match self {
            TypeRef::Sequence(inner) => inner.walk(visit),
            TypeRef::Map(key, value) => {
                key.walk(visit);
                value.walk(visit);
            }
            TypeRef::Union(union) => {
                for member in &union.members {
                    member.walk(visit);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Primitive(scalar) => write!(f, "{}", scalar),
            TypeRef::Enum(name) => write!(f, "enum {}", name),
            TypeRef::Instant => f.write_str("instant"),
            TypeRef::Duration => f.write_str("duration"),
            TypeRef::Sequence(inner) => write!(f, "sequence<{}>", inner),
            TypeRef::Map(key, value) => write!(f, "map<{}, {}>", key, value),
            TypeRef::Union(union) => {
                f.write_str("union<")?;
                for (i, member) in union.members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{}", member)?;
                }
                if union.nullable {
                    f.write_str(" | null")?;
                }
                f.write_str(">")
            }
            TypeRef::Record(name) => write!(f, "record {}", name),
            TypeRef::Unsupported(reason) => write!(f, "unsupported ({})", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_flattens_nested_unions() {
        let inner = TypeRef::union(
            [TypeRef::Primitive(Scalar::Int32), TypeRef::Primitive(Scalar::String)],
            true,
        );
        let outer = TypeRef::union([inner, TypeRef::Primitive(Scalar::Bool)], false);

        let TypeRef::Union(union) = outer else {
            panic!("Expected union");
        };
        assert_eq!(union.members.len(), 3);
        assert!(union.nullable);
        assert!(union.members.iter().all(|m| m.kind() != TypeKind::Union));
    }

    #[test]
    fn test_union_keeps_repeated_members() {
        let union = TypeRef::union(
            [
                TypeRef::Primitive(Scalar::Int32),
                TypeRef::union([TypeRef::Primitive(Scalar::Int32)], true),
            ],
            false,
        );
        let TypeRef::Union(union) = union else {
            panic!("Expected union");
        };
        assert_eq!(union.members.len(), 2);
        assert!(union.nullable);
    }

    #[test]
    fn test_optional_shape() {
        let TypeRef::Union(union) = TypeRef::union([TypeRef::Instant], true) else {
            panic!("Expected union");
        };
        assert!(union.is_optional());
    }

    #[test]
    fn test_wire_type_names() {
        let list = TypeRef::Sequence(Box::new(TypeRef::Record("User".into())));
        assert_eq!(list.wire_type_name().as_deref(), Some("repeated User"));

        let map = TypeRef::Map(
            Box::new(TypeRef::Primitive(Scalar::String)),
            Box::new(TypeRef::Duration),
        );
        assert_eq!(
            map.wire_type_name().as_deref(),
            Some("map<string, google.protobuf.Duration>")
        );
        assert_eq!(TypeRef::union([TypeRef::Instant], true).wire_type_name(), None);
    }
}
