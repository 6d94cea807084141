// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON-RPC 2.0 newline-framed wire protocol spoken between the MCP Invoker
//! and both HTTP and persistent STDIO tool servers.
//!
//! The wire format is deliberately small: every request is
//! `{"jsonrpc":"2.0","id":<uuid>,"method":<tool>,"params":<args>}` on its own
//! line, and every response is either `{"jsonrpc":"2.0","id":..,"result":..}`
//! or `{"jsonrpc":"2.0","id":..,"error":{"code":..,"message":..}}`. Requests
//! and responses are correlated by `id`, not by arrival order, since a
//! persistent STDIO server may interleave concurrent calls.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod pending;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Protocol version advertised in request/response framing, bumped only on
/// a breaking wire change.
pub const PROTOCOL_VERSION: &str = "2.0";

/// A JSON-RPC request: one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id, unique per in-flight call.
    pub id: Uuid,
    /// Tool name as exposed by the MCP server.
    pub method: String,
    /// Tool arguments, already sanitized and interpolated by the caller.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RpcRequest {
    /// Build a request with a freshly generated id.
    #[must_use]
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self { jsonrpc: PROTOCOL_VERSION.to_string(), id: Uuid::new_v4(), method: method.into(), params }
    }
}

/// A structured JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// JSON-RPC error code (implementation-defined beyond the reserved range).
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured error data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A JSON-RPC response: either a successful result or a structured error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id, matching the originating request.
    pub id: Uuid,
    /// Successful tool output, present iff `error` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Structured error, present iff `result` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Build a successful response for `id`.
    #[must_use]
    pub fn ok(id: Uuid, result: serde_json::Value) -> Self {
        Self { jsonrpc: PROTOCOL_VERSION.to_string(), id, result: Some(result), error: None }
    }

    /// Build an error response for `id`.
    #[must_use]
    pub fn err(id: Uuid, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError { code, message: message.into(), data: None }),
        }
    }

    /// Whether this response represents a successful call.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Errors arising from JSON-RPC framing or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON serialization or deserialization failure.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O error (stream read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A decoded response's `id` did not match any pending request.
    #[error("response id {0} has no pending request")]
    UnknownResponseId(Uuid),

    /// A line was neither a well-formed request nor a well-formed response.
    #[error("malformed wire message: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_protocol_version() {
        let req = RpcRequest::new("parse_tree", serde_json::json!({"path": "x.cbl"}));
        assert_eq!(req.jsonrpc, "2.0");
    }

    #[test]
    fn response_ok_has_no_error() {
        let resp = RpcResponse::ok(Uuid::new_v4(), serde_json::json!({"ok": true}));
        assert!(resp.is_ok());
    }

    #[test]
    fn response_err_has_no_result() {
        let resp = RpcResponse::err(Uuid::new_v4(), -32000, "tool failed");
        assert!(!resp.is_ok());
        assert!(resp.result.is_none());
    }
}
