// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persistent STDIO transport for the MCP Invoker (§4.5): one long-lived
//! JSON-RPC 2.0 child process per integration snapshot, with readiness
//! detection and graceful-then-forced shutdown.

use std::process::Stdio;
use std::time::Duration;

use cam_core::IntegrationSnapshot;
use cam_error::{CamError, ErrorCode};
use cam_protocol::codec::{decode_response, encode_request};
use cam_protocol::pending::PendingTable;
use cam_protocol::RpcRequest;
use regex::Regex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long [`StdioProcess::spawn`] waits for the first readiness-matching
/// line before giving up.
const READINESS_TIMEOUT: Duration = Duration::from_secs(10);

/// A spawned, persistent MCP server speaking newline-delimited JSON-RPC over
/// stdin/stdout.
pub struct StdioProcess {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: std::sync::Arc<PendingTable>,
    reader_task: JoinHandle<()>,
    kill_timeout: Duration,
}

impl StdioProcess {
    /// Spawn the child process described by `snapshot`, forward its stderr
    /// to logs, and (if a `readiness_regex` is declared) block until a
    /// matching stdout line appears.
    pub async fn spawn(snapshot: &IntegrationSnapshot) -> Result<Self, CamError> {
        let IntegrationSnapshot::Stdio { command, args, cwd, env, env_aliases: _, readiness_regex, kill_timeout, .. } =
            snapshot
        else {
            return Err(CamError::new(ErrorCode::Internal, "StdioProcess::spawn called with a non-stdio integration snapshot"));
        };

        let mut cmd = Command::new(command);
        cmd.args(args).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in env {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| CamError::new(ErrorCode::ConnectFailure, format!("failed to spawn {command}")).with_source(e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CamError::new(ErrorCode::ConnectFailure, "child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CamError::new(ErrorCode::ConnectFailure, "child stdout unavailable"))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match r.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let s = line.trim_end();
                            if !s.is_empty() {
                                warn!(target: "cam.invoker.stdio.stderr", "{s}");
                            }
                        }
                    }
                }
            });
        }

        let mut stdout = BufReader::new(stdout);

        if let Some(pattern) = readiness_regex {
            let re = Regex::new(pattern)
                .map_err(|e| CamError::new(ErrorCode::ConfigInvalid, format!("invalid readiness_regex: {e}")))?;
            let wait_for_ready = async {
                let mut line = String::new();
                loop {
                    line.clear();
                    let n = stdout
                        .read_line(&mut line)
                        .await
                        .map_err(|e| CamError::new(ErrorCode::ConnectFailure, "failed reading readiness line").with_source(e))?;
                    if n == 0 {
                        return Err(CamError::new(ErrorCode::ProcessExited, "process exited before signalling readiness"));
                    }
                    if re.is_match(line.trim_end()) {
                        return Ok(());
                    }
                }
            };
            tokio::time::timeout(READINESS_TIMEOUT, wait_for_ready).await.map_err(|_| {
                CamError::new(ErrorCode::ConnectFailure, "timed out waiting for readiness")
            })??;
        }

        let pending = std::sync::Arc::new(PendingTable::new());
        let pending_reader = pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut line = String::new();
            loop {
                line.clear();
                match stdout.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let trimmed = line.trim_end();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match decode_response(trimmed) {
                            Ok(resp) => {
                                if pending_reader.resolve(resp).is_err() {
                                    debug!(target: "cam.invoker.stdio", "response for unknown/expired request id");
                                }
                            }
                            Err(e) => warn!(target: "cam.invoker.stdio", error = %e, "malformed response line"),
                        }
                    }
                }
            }
        });

        Ok(Self { child: Mutex::new(child), stdin: Mutex::new(stdin), pending, reader_task, kill_timeout: *kill_timeout })
    }

    /// Call `method` with `params`, waiting up to `timeout` for a reply.
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, CamError> {
        let req = RpcRequest::new(method, params);
        let rx = self.pending.register(req.id);
        let line = encode_request(&req).map_err(|e| CamError::new(ErrorCode::Internal, "failed to encode request").with_source(e))?;

        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| CamError::new(ErrorCode::ProcessExited, "failed writing to child stdin").with_source(e))?;
            stdin.flush().await.map_err(|e| CamError::new(ErrorCode::ProcessExited, "failed flushing child stdin").with_source(e))?;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) if resp.is_ok() => Ok(resp.result.unwrap_or(Value::Null)),
            Ok(Ok(resp)) => {
                let err = resp.error.expect("!resp.is_ok() implies error is Some");
                let mut camerr = CamError::new(ErrorCode::ToolError, err.message).with_context("rpc_code", err.code);
                if let Some(data) = err.data {
                    camerr = camerr.with_context("rpc_data", data);
                }
                Err(camerr)
            }
            Ok(Err(_)) => Err(CamError::new(ErrorCode::ProcessExited, "process exited before replying")),
            Err(_) => {
                self.pending.cancel(req.id);
                Err(CamError::new(ErrorCode::TransportTimeout, format!("tool call '{method}' timed out")))
            }
        }
    }

    /// Close stdin and wait up to `kill_timeout` for graceful exit, then
    /// SIGKILL. Always succeeds; shutdown is best-effort cleanup.
    pub async fn shutdown(self) {
        self.reader_task.abort();
        {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }
        let mut child = self.child.lock().await;
        match tokio::time::timeout(self.kill_timeout, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }
    }

    /// Number of tool calls currently awaiting a reply.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn stdio_snapshot(command: &str, args: Vec<String>) -> IntegrationSnapshot {
        IntegrationSnapshot::Stdio {
            command: command.to_string(),
            args,
            cwd: None,
            env: BTreeMap::new(),
            env_aliases: BTreeMap::new(),
            readiness_regex: None,
            kill_timeout: Duration::from_secs(2),
            restart_on_exit: false,
        }
    }

    // `cat` echoes nothing useful as a JSON-RPC peer, but is enough to prove
    // spawn/shutdown lifecycle without depending on a real MCP binary.
    #[tokio::test]
    async fn spawn_and_shutdown_without_readiness_regex() {
        let snapshot = stdio_snapshot("cat", vec![]);
        let process = StdioProcess::spawn(&snapshot).await.unwrap();
        assert_eq!(process.in_flight(), 0);
        process.shutdown().await;
    }

    #[tokio::test]
    async fn call_times_out_when_no_reply_arrives() {
        let snapshot = stdio_snapshot("cat", vec![]);
        let process = StdioProcess::spawn(&snapshot).await.unwrap();
        let err = process.call("parse_tree", serde_json::json!({}), Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportTimeout);
        process.shutdown().await;
    }

    #[tokio::test]
    async fn readiness_regex_rejects_processes_that_exit_before_matching() {
        let snapshot = stdio_snapshot("true", vec![]);
        let snapshot = match snapshot {
            IntegrationSnapshot::Stdio { command, args, cwd, env, env_aliases, kill_timeout, restart_on_exit, .. } => {
                IntegrationSnapshot::Stdio {
                    command,
                    args,
                    cwd,
                    env,
                    env_aliases,
                    readiness_regex: Some("^ready$".to_string()),
                    kill_timeout,
                    restart_on_exit,
                }
            }
            other => other,
        };
        let err = StdioProcess::spawn(&snapshot).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ProcessExited);
    }
}
