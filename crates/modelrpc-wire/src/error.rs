use thiserror::Error;

/// Errors raised while converting between native and wire values
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvertError {
    #[error("Expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("No alternative of '{field}' matches the value")]
    NoMatchingAlternative { field: String },

    #[error("Enum '{enumeration}' has no value {value}")]
    UnknownEnumValue { enumeration: String, value: i32 },

    #[error("Enum '{enumeration}' has no member '{member}'")]
    UnknownEnumMember { enumeration: String, member: String },

    #[error("Value {value} does not fit in {target}")]
    OutOfRange { value: String, target: String },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unknown message type '{0}'")]
    UnknownType(String),

    #[error("Message '{message}' has no field '{field}'")]
    UnknownField { message: String, field: String },

    #[error("No converter for {0}")]
    Unsupported(String),

    #[error("Failed to serialize native value: {0}")]
    Serialize(String),

    /// The data-model layer rejected the value
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl ConvertError {
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn out_of_range(value: impl ToString, target: impl Into<String>) -> Self {
        Self::OutOfRange {
            value: value.to_string(),
            target: target.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True when the failure came from native validation rather than conversion
    pub fn is_validation(&self) -> bool {
        matches!(self, ConvertError::Validation(_))
    }
}

impl From<serde_json::Error> for ConvertError {
    fn from(err: serde_json::Error) -> Self {
        ConvertError::Validation(err.to_string())
    }
}
