// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request validation for the daemon API.

/// Validates incoming API requests before processing.
pub struct RequestValidator;

/// Maximum allowed length for an artifact or kind name.
const MAX_NAME_LENGTH: usize = 512;

/// Maximum nesting depth accepted for an artifact `data`/patch payload.
const MAX_DEPTH: usize = 32;

/// Maximum serialized size accepted for an artifact `data`/patch payload.
const MAX_SIZE_BYTES: usize = 5_000_000;

impl RequestValidator {
    /// Validate a workspace id: non-empty, no path separators (it is used
    /// to key the artifact store and must not escape its namespace).
    pub fn validate_workspace_id(id: &str) -> Result<(), String> {
        if id.is_empty() {
            return Err("workspace id must not be empty".into());
        }
        if id.contains('/') || id.contains("..") {
            return Err(format!("invalid workspace id: {id}"));
        }
        Ok(())
    }

    /// Validate an artifact `kind` or `name` field.
    pub fn validate_name(field: &str, value: &str) -> Result<(), String> {
        if value.is_empty() {
            return Err(format!("{field} must not be empty"));
        }
        if value.len() > MAX_NAME_LENGTH {
            return Err(format!("{field} exceeds maximum length of {MAX_NAME_LENGTH} characters"));
        }
        if value.trim().is_empty() {
            return Err(format!("{field} must contain non-whitespace characters"));
        }
        Ok(())
    }

    /// Validate an artifact `data` or patch document body: it must not nest
    /// or grow beyond what a legacy mainframe document realistically needs,
    /// defending the store against pathological request bodies.
    pub fn validate_json_payload(value: &serde_json::Value) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let size = serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(usize::MAX);
        if size > MAX_SIZE_BYTES {
            errors.push(format!("payload exceeds maximum size of {MAX_SIZE_BYTES} bytes (got {size})"));
        }

        let depth = json_depth(value);
        if depth > MAX_DEPTH {
            errors.push(format!("payload nesting depth {depth} exceeds maximum of {MAX_DEPTH}"));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}
