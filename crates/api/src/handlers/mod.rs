pub mod events;
pub mod executions;
pub mod integrations;
pub mod templates;
pub mod webhooks;
pub mod workflows;

use serde_json::{json, Value};

use crate::error::ApiError;

/// Decode a JSON body into `T`, reporting failures as 400 rather than axum's 422.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// An absent or `null` trigger payload becomes `{}`.
pub(crate) fn payload_or_empty(body: Option<Value>) -> Value {
    match body {
        Some(Value::Null) | None => json!({}),
        Some(value) => value,
    }
}
