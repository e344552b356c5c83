//! Request-body validation for the proxy endpoints.
//!
//! Callers (the no-code platform in particular) send numbers and ids either as
//! JSON numbers or as strings, so the field deserializers accept both. Bodies
//! are parsed leniently first so authentication can run before validation.

use bytes::Bytes;
use common_http_errors::ApiError;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{0}")]
    MissingFields(&'static str),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::bad_request("missing_fields", err.to_string())
    }
}

/// Parses a JSON body, treating an empty or unparseable body as `{}`.
pub fn lenient_json(body: &Bytes) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(Map::new()),
    }
}

/// Deserializes a body already read with [`lenient_json`]. Any shape error is
/// reported as the endpoint's missing-fields message.
pub fn parse_body<T: DeserializeOwned>(value: Value, message: &'static str) -> Result<T, ValidationError> {
    serde_json::from_value(value).map_err(|_| ValidationError::MissingFields(message))
}

pub fn flexible_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|value| value.fract() == 0.0)
                    .map(|value| value as i64)
            })
            .map(Some)
            .ok_or_else(|| D::Error::custom("expected an integer")),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => text.trim().parse::<i64>().map(Some).map_err(D::Error::custom),
        Some(other) => Err(D::Error::custom(format!("expected an integer, got {other}"))),
    }
}

pub fn flexible_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(other) => Err(D::Error::custom(format!("expected a string, got {other}"))),
    }
}

/// `Some` only for strictly positive values.
pub fn positive(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v > 0)
}
