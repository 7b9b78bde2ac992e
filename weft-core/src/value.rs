//! Payload value type for channel and task traffic.
//!
//! Channels are payload-opaque beyond the length prefix; both endpoints
//! agree on this self-describing JSON encoding.

use crate::error::{Result, WeftError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A dynamic value carried through channels and task arguments.
///
/// Wraps `serde_json::Value`; the byte form is the UTF-8 JSON text of the
/// wrapped value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Value(pub JsonValue);

impl Value {
    /// Create a null value.
    #[must_use]
    pub fn null() -> Self {
        Self(JsonValue::Null)
    }

    /// Create a boolean value.
    #[must_use]
    pub fn bool(v: bool) -> Self {
        Self(JsonValue::Bool(v))
    }

    /// Create an integer value.
    #[must_use]
    pub fn int(v: i64) -> Self {
        Self(JsonValue::Number(v.into()))
    }

    /// Create a floating-point value. Non-finite floats become null.
    #[must_use]
    pub fn float(v: f64) -> Self {
        Self(serde_json::Number::from_f64(v).map_or(JsonValue::Null, JsonValue::Number))
    }

    /// Create a string value.
    #[must_use]
    pub fn string(v: impl Into<String>) -> Self {
        Self(JsonValue::String(v.into()))
    }

    /// Decode a value from its byte form. Empty input decodes to null.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::null());
        }
        serde_json::from_slice(bytes)
            .map(Self)
            .map_err(|e| WeftError::Deserialization {
                cause: e.to_string(),
            })
    }

    /// Encode the value to its byte form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.0).map_err(|e| WeftError::Serialization {
            cause: e.to_string(),
        })
    }

    /// Check if the value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// View as an integer if the value is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.0.as_i64()
    }

    /// View as a float if the value is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.0.as_f64()
    }

    /// View as a string slice if the value is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    /// View as a boolean if the value is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        self.0.as_bool()
    }

    /// Access the inner `serde_json::Value`.
    #[must_use]
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert into the inner `serde_json::Value`.
    #[must_use]
    pub fn into_inner(self) -> JsonValue {
        self.0
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::null()
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Self(v)
    }
}

impl From<Value> for JsonValue {
    fn from(v: Value) -> Self {
        v.0
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::string(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::bool(v)
    }
}
