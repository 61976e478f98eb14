//! # Wire conversion
//!
//! Bidirectional conversion between native data models and wire messages.
//!
//! Native values travel as the `serde_json::Value` their `Serialize` impl produces;
//! a [`Converter`] built from the synthesized schema turns that into a
//! [`WireValue`] and back. The [`ConverterRegistry`] memoizes converters per type.

pub mod converter;
pub mod error;
pub mod registry;
pub mod value;

pub use converter::{Converter, MessageFactory, PlainFactory, RecordPlan};
pub use error::ConvertError;
pub use registry::ConverterRegistry;
pub use value::{WireMessage, WireValue};

/// Result type for conversions
pub type Result<T> = std::result::Result<T, ConvertError>;

/// A type that can cross the wire: serializable, deserializable and self-describing
pub trait Model: serde::Serialize + serde::de::DeserializeOwned + schemars::JsonSchema + Send + 'static {}

impl<T> Model for T where
    T: serde::Serialize + serde::de::DeserializeOwned + schemars::JsonSchema + Send + 'static
{
}
