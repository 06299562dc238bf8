//! Body serialization.
//!
//! Message bodies are stored as text. A [`Serializer`] turns structured
//! payloads into that text and back. [`JsonSerializer`] is used unless the
//! [`Config`](crate::Config) is given another one.

use crate::error::SerializationError;
use serde_json::Value;

/// Pluggable conversion between structured payloads and stored body text
pub trait Serializer: Send + Sync {
    /// Encode a payload as body text
    fn serialize(&self, value: &Value) -> Result<String, SerializationError>;

    /// Decode body text into a payload
    fn deserialize(&self, data: &str) -> Result<Value, SerializationError>;
}

/// JSON body encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<String, SerializationError> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize(&self, data: &str) -> Result<Value, SerializationError> {
        Ok(serde_json::from_str(data)?)
    }
}

#[cfg(test)]
#[path = "serializer_tests.rs"]
mod tests;
