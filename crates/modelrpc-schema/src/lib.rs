//! # Schema synthesis
//!
//! Derives a proto3 schema document from serde/schemars data models.
//!
//! - [`classify`] maps JSON Schema nodes onto [`TypeRef`]s
//! - [`message`] turns one record into a numbered [`MessageSpec`]
//! - [`document`] walks a service's method signatures and renders the document
//!
//! ```rust,ignore
//! use modelrpc_schema::SchemaDocumentBuilder;
//!
//! let document = SchemaDocumentBuilder::new("GreeterService")
//!     .rpc::<HelloRequest, HelloReply>("SayHello")
//!     .build()?;
//! println!("{}", document);
//! ```

pub mod classify;
pub mod document;
pub mod message;
pub mod types;

pub use classify::{TypeGraph, classify, definition_name, enum_members};
pub use document::{
    Catalog, Definition, DocumentSummary, RpcSpec, SchemaDocument, SchemaDocumentBuilder,
    ServiceSpec, default_package,
};
pub use message::{
    Constraint, EnumMember, EnumSpec, FieldSpec, MessageItem, MessageSpec, OneOfSpec,
    synthesize_enum, synthesize_message, wire_identifier,
};
pub use types::{Scalar, TypeKind, TypeRef, UnionRef};

/// Wire name of the well-known instant type
pub const TIMESTAMP_TYPE: &str = "google.protobuf.Timestamp";

/// Wire name of the well-known duration type
pub const DURATION_TYPE: &str = "google.protobuf.Duration";

/// Result type for schema synthesis
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Errors raised while synthesizing a schema document
///
/// All of them are definition mistakes and surface before anything is served.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Field '{field}' of '{message}' is not supported: {reason}")]
    UnsupportedField {
        message: String,
        field: String,
        reason: String,
    },

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Oneof '{field}' of '{message}' has two alternatives named '{alternative}'")]
    OneOfCollision {
        message: String,
        field: String,
        alternative: String,
    },

    #[error("Unknown type '{0}'")]
    UnknownType(String),

    #[error("Method signatures must use record types, got {0}")]
    NonRecordType(String),

    #[error("Method '{0}' is declared more than once")]
    DuplicateMethod(String),
}

impl SchemaError {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::UnsupportedType(reason.into())
    }

    /// True for the errors that mean a native type has no wire form
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            SchemaError::UnsupportedField { .. }
                | SchemaError::UnsupportedType(_)
                | SchemaError::OneOfCollision { .. }
        )
    }
}
