//! Error types
//!
//! [`FrameworkError`] covers everything that stops a service from being built or
//! mounted. [`CallError`] covers one failed call and maps onto a [`Status`].

use modelrpc_schema::SchemaError;
use modelrpc_wire::ConvertError;
use thiserror::Error;

use crate::status::{Code, Status};

/// Result type for building and mounting services
pub type Result<T> = std::result::Result<T, FrameworkError>;

/// Boxed error returned by user handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Construction-time failures; none of them are recoverable per call
#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Schema compiler failed: {0}")]
    Compiler(String),

    #[error("Invalid method '{method}': {reason}")]
    Arity { method: String, reason: String },

    #[error("Binding error: {0}")]
    Binding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameworkError {
    pub fn arity(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Arity {
            method: method.into(),
            reason: reason.into(),
        }
    }

    pub fn compiler(message: impl Into<String>) -> Self {
        Self::Compiler(message.into())
    }

    pub fn binding(message: impl Into<String>) -> Self {
        Self::Binding(message.into())
    }
}

/// Per-call failures, caught at the handler boundary
#[derive(Debug, Error)]
pub enum CallError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conversion failed: {0}")]
    Conversion(ConvertError),

    #[error("{0}")]
    Internal(String),

    #[error("Method '{0}' not found")]
    MethodNotFound(String),

    #[error("Call cancelled")]
    Cancelled,

    /// A handler chose its own status
    #[error(transparent)]
    Status(Status),
}

impl CallError {
    /// Classify an error returned by user code
    pub fn from_user(err: BoxError) -> Self {
        match err.downcast::<Status>() {
            Ok(status) => CallError::Status(*status),
            Err(err) => CallError::Internal(err.to_string()),
        }
    }

    /// Errors caused by the caller rather than the service
    pub fn is_client_error(&self) -> bool {
        match self {
            CallError::Validation(_) | CallError::MethodNotFound(_) | CallError::Cancelled => true,
            CallError::Status(status) => !matches!(
                status.code(),
                Code::Internal | Code::Unknown | Code::DataLoss
            ),
            CallError::Conversion(_) | CallError::Internal(_) => false,
        }
    }

    pub fn to_status(&self) -> Status {
        match self {
            CallError::Validation(message) => Status::invalid_argument(message.clone()),
            CallError::Conversion(err) => Status::internal(err.to_string()),
            CallError::Internal(message) => Status::internal(message.clone()),
            CallError::MethodNotFound(method) => {
                Status::unimplemented(format!("Method '{}' not found", method))
            }
            CallError::Cancelled => Status::cancelled("Call cancelled"),
            CallError::Status(status) => status.clone(),
        }
    }
}

impl From<ConvertError> for CallError {
    fn from(err: ConvertError) -> Self {
        match err {
            ConvertError::Validation(message) => CallError::Validation(message),
            other => CallError::Conversion(other),
        }
    }
}
