// SPDX-License-Identifier: MIT OR Apache-2.0
//! MCP Invoker (§4.5): dispatches tool calls over either a JSON-over-HTTP or
//! persistent STDIO transport, after sanitizing and interpolating arguments
//! and, where the tool declares an input schema, restricting them to its
//! declared property names.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod args;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod registry;
pub mod retry;
pub mod stdio;

use std::collections::BTreeMap;
use std::time::Duration;

use cam_core::IntegrationSnapshot;
use cam_error::CamError;
use reqwest::Client;
use serde_json::Value;
use uuid::Uuid;

pub use args::{apply_allow_list, interpolate, sanitize_args};
pub use health::{HealthCheck, HealthMonitor, HealthReport, HealthStatus};
pub use http::invoke_http;
pub use lifecycle::{LifecycleError, LifecycleManager, LifecycleState, LifecycleTransition};
pub use registry::ToolSchemaIndex;
pub use retry::{compute_delay, is_retryable, retry_async, RetryConfig, RetryMetadata, RetryOutcome};
pub use stdio::StdioProcess;

/// Prepare a tool call's arguments for dispatch: strip orchestrator-only
/// keys, interpolate `${name}`/`${name:-default}` placeholders, then (if
/// `allowed_keys` is non-empty) restrict to the tool's declared input
/// schema properties.
#[must_use]
pub fn prepare_args(raw_args: &Value, vars: &BTreeMap<String, String>, allowed_keys: &[String]) -> Value {
    let sanitized = sanitize_args(raw_args);
    let interpolated = interpolate(&sanitized, vars);
    apply_allow_list(interpolated, allowed_keys)
}

/// Call `tool_name` over HTTP, preparing its arguments first.
pub async fn call_http(
    client: &Client,
    snapshot: &IntegrationSnapshot,
    tool_name: &str,
    raw_args: &Value,
    vars: &BTreeMap<String, String>,
    allowed_keys: &[String],
    correlation_id: Uuid,
    resolved_auth: &BTreeMap<String, String>,
) -> Result<Value, CamError> {
    let args = prepare_args(raw_args, vars, allowed_keys);
    invoke_http(client, snapshot, tool_name, args, correlation_id, resolved_auth).await
}

/// Call `tool_name` against an already-spawned persistent STDIO process,
/// preparing its arguments first.
pub async fn call_stdio(
    process: &StdioProcess,
    tool_name: &str,
    raw_args: &Value,
    vars: &BTreeMap<String, String>,
    allowed_keys: &[String],
    timeout: Duration,
) -> Result<Value, CamError> {
    let args = prepare_args(raw_args, vars, allowed_keys);
    process.call(tool_name, args, timeout).await
}
