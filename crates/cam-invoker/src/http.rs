// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP transport for the MCP Invoker (§4.5): `POST {base_url}{tool_path}`
//! with a `{"method": tool, "params": args}` body, static headers, resolved
//! auth, and a correlation id threaded through as `X-Correlation-Id`.

use std::collections::BTreeMap;
use std::time::Duration;

use cam_core::IntegrationSnapshot;
use cam_error::{CamError, ErrorCode};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// Path appended to an HTTP integration's `base_url` for every tool call.
const INVOKE_PATH: &str = "/invoke";

/// Call `tool_name` over HTTP against the integration described by
/// `snapshot`, which must be [`IntegrationSnapshot::Http`].
///
/// `resolved_auth` maps each of the snapshot's `auth` alias names to its
/// resolved secret value; the first resolved value is sent as a bearer
/// token. Returns [`ErrorCode::TransportTimeout`], [`ErrorCode::ToolError`],
/// or [`ErrorCode::ConnectFailure`] on failure.
pub async fn invoke_http(
    client: &Client,
    snapshot: &IntegrationSnapshot,
    tool_name: &str,
    args: Value,
    correlation_id: Uuid,
    resolved_auth: &BTreeMap<String, String>,
) -> Result<Value, CamError> {
    let IntegrationSnapshot::Http { base_url, headers, auth, timeout, .. } = snapshot else {
        return Err(CamError::new(ErrorCode::Internal, "invoke_http called with a non-http integration snapshot"));
    };

    let url = format!("{}{}", base_url.trim_end_matches('/'), INVOKE_PATH);
    let mut request = client
        .post(&url)
        .timeout(*timeout)
        .header("X-Correlation-Id", correlation_id.to_string())
        .json(&serde_json::json!({ "method": tool_name, "params": args }));

    for (name, value) in headers {
        request = request.header(name, value);
    }

    if let Some(token) = auth.iter().find_map(|a| resolved_auth.get(&a.alias)) {
        request = request.bearer_auth(token);
    }

    debug!(target: "cam.invoker.http", url = %url, tool = %tool_name, "dispatching tool call");

    let response = request.send().await.map_err(|e| classify_reqwest_error(e, &url))?;
    let status = response.status();
    let body: Value = response.json().await.map_err(|e| {
        CamError::new(ErrorCode::ToolError, format!("non-JSON response body: {e}")).with_context("url", &url)
    })?;

    if !status.is_success() {
        return Err(tool_error_from_body(status.as_u16(), &body));
    }

    if let Some(error) = body.get("error") {
        return Err(tool_error_from_rpc_error(error));
    }

    Ok(body.get("result").cloned().unwrap_or(body))
}

fn classify_reqwest_error(err: reqwest::Error, url: &str) -> CamError {
    if err.is_timeout() {
        CamError::new(ErrorCode::TransportTimeout, format!("tool call to {url} timed out")).with_source(err)
    } else if err.is_connect() {
        CamError::new(ErrorCode::ConnectFailure, format!("failed to connect to {url}")).with_source(err)
    } else {
        CamError::new(ErrorCode::ToolError, err.to_string()).with_source(err)
    }
}

fn tool_error_from_body(status: u16, body: &Value) -> CamError {
    let message = body
        .get("message")
        .or_else(|| body.get("detail"))
        .and_then(Value::as_str)
        .unwrap_or("tool call failed")
        .to_string();
    CamError::new(ErrorCode::ToolError, message).with_context("http_status", status)
}

fn tool_error_from_rpc_error(error: &Value) -> CamError {
    let message = error.get("message").and_then(Value::as_str).unwrap_or("tool error").to_string();
    let mut err = CamError::new(ErrorCode::ToolError, message);
    if let Some(code) = error.get("code") {
        err = err.with_context("rpc_code", code.clone());
    }
    if let Some(data) = error.get("data") {
        err = err.with_context("rpc_data", data.clone());
    }
    err
}

/// Default timeout applied when an HTTP integration snapshot omits one.
#[must_use]
pub fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http_snapshot(base_url: String) -> IntegrationSnapshot {
        IntegrationSnapshot::Http {
            base_url,
            headers: BTreeMap::new(),
            auth: vec![],
            timeout: Duration::from_secs(5),
            retry: cam_core::RetryPolicy { max_retries: 0, backoff_base_ms: 10 },
        }
    }

    #[tokio::test]
    async fn successful_call_returns_result_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invoke"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": {"ok": true}})))
            .mount(&server)
            .await;

        let client = Client::new();
        let snapshot = http_snapshot(server.uri());
        let result = invoke_http(
            &client,
            &snapshot,
            "parse_tree",
            serde_json::json!({"path": "x.cbl"}),
            Uuid::new_v4(),
            &BTreeMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn rpc_error_field_becomes_tool_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invoke"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": {"code": -32000, "message": "unparseable COBOL"}
            })))
            .mount(&server)
            .await;

        let client = Client::new();
        let snapshot = http_snapshot(server.uri());
        let err = invoke_http(&client, &snapshot, "parse_tree", serde_json::json!({}), Uuid::new_v4(), &BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolError);
        assert!(err.message.contains("unparseable"));
    }

    #[tokio::test]
    async fn non_2xx_status_becomes_tool_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invoke"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({"detail": "boom"})))
            .mount(&server)
            .await;

        let client = Client::new();
        let snapshot = http_snapshot(server.uri());
        let err = invoke_http(&client, &snapshot, "parse_tree", serde_json::json!({}), Uuid::new_v4(), &BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolError);
        assert_eq!(err.context["http_status"], 500);
    }

    #[test]
    fn invoke_http_rejects_stdio_snapshot() {
        let snapshot = IntegrationSnapshot::Stdio {
            command: "x".into(),
            args: vec![],
            cwd: None,
            env: BTreeMap::new(),
            env_aliases: BTreeMap::new(),
            readiness_regex: None,
            kill_timeout: Duration::from_secs(1),
            restart_on_exit: false,
        };
        let rt = tokio::runtime::Runtime::new().unwrap();
        let err = rt
            .block_on(invoke_http(&Client::new(), &snapshot, "x", serde_json::json!({}), Uuid::new_v4(), &BTreeMap::new()))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }
}
