//! Input validation for task creation
//!
//! Checks the required fields of a create request and bounds the size and shape of
//! the client config bag before it is parsed or persisted.

use crate::error::{Result, TaskforgeError};
use crate::models::CreateTaskRequest;
use serde_json::Value;

/// Maximum allowed size for a serialized config bag (1MB)
const MAX_JSON_SIZE_BYTES: usize = 1024 * 1024;

/// Maximum nesting depth for JSON objects/arrays
const MAX_JSON_DEPTH: usize = 10;

/// Maximum number of keys in a JSON object
const MAX_JSON_KEYS: usize = 1000;

/// Maximum number of elements in a JSON array. Id lists can be long.
const MAX_JSON_ARRAY_LEN: usize = 50_000;

/// Maximum string length for JSON string values
const MAX_JSON_STRING_LENGTH: usize = 10_000;

const MAX_NAME_LENGTH: usize = 255;

/// Matches the `task_type` column width
const MAX_TYPE_LENGTH: usize = 64;

/// Validates a JSON payload for size and structure constraints
pub fn validate_json_input(value: &Value) -> Result<()> {
    let serialized = serde_json::to_string(value)
        .map_err(|e| TaskforgeError::Validation(format!("Invalid JSON structure: {e}")))?;

    if serialized.len() > MAX_JSON_SIZE_BYTES {
        return Err(TaskforgeError::Validation(format!(
            "JSON payload too large: {} bytes (max: {MAX_JSON_SIZE_BYTES})",
            serialized.len()
        )));
    }

    validate_json_depth(value, 0)
}

fn validate_json_depth(value: &Value, current_depth: usize) -> Result<()> {
    if current_depth > MAX_JSON_DEPTH {
        return Err(TaskforgeError::Validation(format!(
            "JSON nesting too deep: {current_depth} (max: {MAX_JSON_DEPTH})"
        )));
    }

    match value {
        Value::Object(map) => {
            if map.len() > MAX_JSON_KEYS {
                return Err(TaskforgeError::Validation(format!(
                    "Too many JSON keys: {} (max: {MAX_JSON_KEYS})",
                    map.len()
                )));
            }
            for (key, val) in map {
                if key.len() > MAX_JSON_STRING_LENGTH {
                    return Err(TaskforgeError::Validation(format!(
                        "JSON key too long: {} chars (max: {MAX_JSON_STRING_LENGTH})",
                        key.len()
                    )));
                }
                validate_json_depth(val, current_depth + 1)?;
            }
        }
        Value::Array(arr) => {
            if arr.len() > MAX_JSON_ARRAY_LEN {
                return Err(TaskforgeError::Validation(format!(
                    "JSON array too large: {} items (max: {MAX_JSON_ARRAY_LEN})",
                    arr.len()
                )));
            }
            for item in arr {
                validate_json_depth(item, current_depth + 1)?;
            }
        }
        Value::String(s) if s.len() > MAX_JSON_STRING_LENGTH => {
            return Err(TaskforgeError::Validation(format!(
                "JSON string too long: {} chars (max: {MAX_JSON_STRING_LENGTH})",
                s.len()
            )));
        }
        _ => {}
    }

    Ok(())
}

/// Validates the required fields of a create request and returns its config bag.
pub fn validate_create_request(request: &CreateTaskRequest) -> Result<&Value> {
    if request.task_type.trim().is_empty() {
        return Err(TaskforgeError::Validation("type is required".to_string()));
    }

    let type_length = request.task_type.chars().count();
    if type_length > MAX_TYPE_LENGTH {
        return Err(TaskforgeError::Validation(format!(
            "type too long: {type_length} chars (max: {MAX_TYPE_LENGTH})"
        )));
    }

    if let Some(name) = &request.name {
        if name.len() > MAX_NAME_LENGTH {
            return Err(TaskforgeError::Validation(format!(
                "name too long: {} chars (max: {MAX_NAME_LENGTH})",
                name.len()
            )));
        }
    }

    let config = match &request.config {
        None | Some(Value::Null) => {
            return Err(TaskforgeError::Validation("config is required".to_string()))
        }
        Some(config) => config,
    };

    if !config.is_object() {
        return Err(TaskforgeError::Validation(
            "config must be a JSON object".to_string(),
        ));
    }

    validate_json_input(config)?;
    Ok(config)
}
