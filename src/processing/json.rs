//! Shared parsing of model output that must be a single JSON object.

use serde_json::{Map, Value};

/// Parse `raw` as one JSON object.
///
/// A single surrounding Markdown code fence (```` ```json ... ``` ````) is stripped first; any
/// other prose around the object is rejected.
pub(crate) fn parse_json_object(raw: &str) -> Result<Map<String, Value>, String> {
    let body = strip_code_fence(raw.trim());
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(format!("expected a JSON object, got {}", kind_of(&other))),
        Err(error) => Err(format!("invalid JSON: {error}")),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop the info string (`json`) on the opening fence line.
    match body.split_once('\n') {
        Some((_, inner)) => inner.trim(),
        None => body.trim(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
