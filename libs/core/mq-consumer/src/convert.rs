//! Message payload conversion
//!
//! A `MessageConverter` turns opaque payload bytes into the value a
//! handler's payload parameter receives. Converters are stateless and
//! shared read-only across all workers of a listener.

use crate::args::ArgValue;
use crate::error::ConsumeError;

/// Deserializes a raw payload into a handler argument value.
///
/// Pure and side-effect free. A failed conversion marks the message as a
/// poison message: the invocation is classified fatal and the message is
/// dead-lettered without consuming retry budget.
pub trait MessageConverter: Send + Sync {
    /// Convert payload bytes into an argument value.
    fn convert(&self, payload: &[u8]) -> Result<ArgValue, ConsumeError>;

    /// Get the converter name for logging.
    fn name(&self) -> &'static str;
}

/// Converter for JSON payloads. The default for new bindings.
pub struct JsonMessageConverter;

impl MessageConverter for JsonMessageConverter {
    fn convert(&self, payload: &[u8]) -> Result<ArgValue, ConsumeError> {
        let value = serde_json::from_slice(payload)
            .map_err(|e| ConsumeError::Conversion(format!("invalid JSON payload: {e}")))?;
        Ok(ArgValue::Json(value))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Converter for plain UTF-8 text payloads.
pub struct Utf8MessageConverter;

impl MessageConverter for Utf8MessageConverter {
    fn convert(&self, payload: &[u8]) -> Result<ArgValue, ConsumeError> {
        let text = String::from_utf8(payload.to_vec())
            .map_err(|e| ConsumeError::Conversion(format!("payload is not valid UTF-8: {e}")))?;
        Ok(ArgValue::Text(text))
    }

    fn name(&self) -> &'static str {
        "utf8"
    }
}
