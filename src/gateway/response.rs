//! Response normalization
//!
//! Turns a raw status/body pair into either a JSON value or a typed
//! [`ApiError`] carrying status, message and field errors.

use std::time::Duration;

use serde_json::Value;

use super::transport::RawResponse;
use crate::error::{ApiError, FieldError};

/// Default wait when a 429 carries no `Retry-After`
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

pub fn normalize(raw: RawResponse) -> Result<Value, ApiError> {
    match raw.status {
        200..=299 => {
            if raw.body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&raw.body).map_err(|e| {
                ApiError::InvalidResponse(format!("Failed to parse response: {}", e))
            })
        }
        429 => Err(ApiError::RateLimited(Duration::from_secs(
            raw.retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        ))),
        status => {
            let parsed: Option<Value> = serde_json::from_str(&raw.body).ok();
            let message = parsed
                .as_ref()
                .and_then(extract_message)
                .unwrap_or_else(|| fallback_message(status, &raw.body));
            let field_errors = parsed.as_ref().map(extract_field_errors).unwrap_or_default();

            Err(ApiError::Service {
                status,
                message,
                field_errors,
            })
        }
    }
}

fn extract_message(body: &Value) -> Option<String> {
    ["message", "error", "detail"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn fallback_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() || body.len() > 200 {
        format!("HTTP {}", status)
    } else {
        body.to_string()
    }
}

/// Accepts `{"errors": {"field": ["msg", ..]}}` or
/// `{"errors": [{"field": "..", "message": ".."}]}`
fn extract_field_errors(body: &Value) -> Vec<FieldError> {
    match body.get("errors") {
        Some(Value::Object(map)) => map
            .iter()
            .flat_map(|(field, messages)| {
                let messages: Vec<String> = match messages {
                    Value::Array(items) => items
                        .iter()
                        .filter_map(|m| m.as_str().map(str::to_string))
                        .collect(),
                    Value::String(s) => vec![s.clone()],
                    _ => vec![],
                };
                messages.into_iter().map(move |message| FieldError {
                    field: field.clone(),
                    message,
                })
            })
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                Some(FieldError {
                    field: item.get("field")?.as_str()?.to_string(),
                    message: item
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("invalid")
                        .to_string(),
                })
            })
            .collect(),
        _ => vec![],
    }
}
