// SPDX-License-Identifier: MIT OR Apache-2.0
//! Library-level command implementations behind the `cam` CLI's
//! subcommands: REST calls against a running daemon for registry/store
//! inspection and run control, plus an in-process playbook runner for
//! `run start`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use cam_core::{CapabilityPack, Kind};
use cam_registry::KindRegistry;
use cam_runtime::{Orchestrator, PackCatalog, RunEvent, RunHandle, RunStore};
use cam_store::ArtifactStore;
use futures::StreamExt;
use serde_json::Value;

// ── Pure helpers (no network, no filesystem beyond what's passed in) ────

/// Rewrite an `http(s)://` base URL into its `ws(s)://` equivalent for the
/// run-watch websocket endpoint.
#[must_use]
pub fn ws_url(base_url: &str, run_id: &str) -> String {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{base_url}")
    };
    format!("{}/runs/{run_id}/watch", ws_base.trim_end_matches('/'))
}

/// Parse a `key=value` pair from `--param`/`--env`-style flags.
pub fn parse_key_value(raw: &str) -> Result<(String, String)> {
    let (k, v) = raw.split_once('=').with_context(|| format!("expected key=value, got '{raw}'"))?;
    if k.is_empty() {
        bail!("empty key in '{raw}'");
    }
    Ok((k.to_string(), v.to_string()))
}

/// Load a list of [`Kind`] definitions from a JSON file (an array of kinds).
pub fn load_kinds_file(path: &Path) -> Result<Vec<Kind>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading kinds file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing kinds file {}", path.display()))
}

/// Load a [`CapabilityPack`] definition from a JSON file.
pub fn load_pack_file(path: &Path) -> Result<CapabilityPack> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading pack file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing pack file {}", path.display()))
}

/// Load the JSON inputs body for `run start`, defaulting to `{}` if absent.
pub fn load_inputs(path: Option<&Path>) -> Result<Value> {
    match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).with_context(|| format!("reading inputs file {}", p.display()))?;
            serde_json::from_str(&content).with_context(|| format!("parsing inputs file {}", p.display()))
        }
        None => Ok(Value::Object(Default::default())),
    }
}

// ── Remote (REST/websocket client) commands ─────────────────────────────

/// `GET /registry/kinds`.
pub async fn registry_kinds(client: &reqwest::Client, base_url: &str) -> Result<Vec<Kind>> {
    let url = format!("{}/registry/kinds", base_url.trim_end_matches('/'));
    let resp = client.get(&url).send().await.with_context(|| format!("GET {url}"))?;
    check_status(&resp, &url)?;
    resp.json().await.with_context(|| format!("decoding response from {url}"))
}

/// `POST /registry/validate`.
pub async fn registry_validate(client: &reqwest::Client, base_url: &str, kind: &str, data: Value) -> Result<Value> {
    let url = format!("{}/registry/validate", base_url.trim_end_matches('/'));
    let resp = client
        .post(&url)
        .json(&serde_json::json!({"kind": kind, "data": data}))
        .send()
        .await
        .with_context(|| format!("POST {url}"))?;
    check_status(&resp, &url)?;
    resp.json().await.with_context(|| format!("decoding response from {url}"))
}

/// `GET /artifact/{workspace}/{artifact_id}`.
pub async fn store_get_artifact(client: &reqwest::Client, base_url: &str, workspace: &str, artifact_id: &str) -> Result<Value> {
    let url = format!("{}/artifact/{workspace}/{artifact_id}", base_url.trim_end_matches('/'));
    let resp = client.get(&url).send().await.with_context(|| format!("GET {url}"))?;
    check_status(&resp, &url)?;
    resp.json().await.with_context(|| format!("decoding response from {url}"))
}

/// `GET /artifact/{workspace}/deltas?run_id=&include_ids=`.
pub async fn store_deltas(
    client: &reqwest::Client,
    base_url: &str,
    workspace: &str,
    run_id: &str,
    include_ids: bool,
) -> Result<Value> {
    let url = format!("{}/artifact/{workspace}/deltas", base_url.trim_end_matches('/'));
    let resp = client
        .get(&url)
        .query(&[("run_id", run_id), ("include_ids", if include_ids { "true" } else { "false" })])
        .send()
        .await
        .with_context(|| format!("GET {url}"))?;
    check_status(&resp, &url)?;
    resp.json().await.with_context(|| format!("decoding response from {url}"))
}

/// `POST /runs/{run_id}/cancel`.
pub async fn run_cancel(client: &reqwest::Client, base_url: &str, run_id: &str) -> Result<()> {
    let url = format!("{}/runs/{run_id}/cancel", base_url.trim_end_matches('/'));
    let resp = client.post(&url).send().await.with_context(|| format!("POST {url}"))?;
    check_status(&resp, &url)?;
    Ok(())
}

/// Connect to `GET /runs/{run_id}/watch` and invoke `on_event` for each
/// [`RunEvent`] until the socket closes.
pub async fn run_watch(base_url: &str, run_id: &str, mut on_event: impl FnMut(RunEvent)) -> Result<()> {
    let url = ws_url(base_url, run_id);
    let (stream, _) = tokio_tungstenite::connect_async(&url).await.with_context(|| format!("connecting to {url}"))?;
    let (_write, mut read) = stream.split();
    while let Some(msg) = read.next().await {
        let msg = msg.with_context(|| format!("reading from {url}"))?;
        if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
            let event: RunEvent = serde_json::from_str(&text).with_context(|| format!("decoding event: {text}"))?;
            on_event(event);
        }
    }
    Ok(())
}

fn check_status(resp: &reqwest::Response, url: &str) -> Result<()> {
    if resp.status().is_success() {
        Ok(())
    } else {
        bail!("{url} returned {}", resp.status())
    }
}

// ── In-process playbook runner ("run start") ────────────────────────────

/// Collaborating in-memory components the CLI wires up for `run start`,
/// analogous to what `cam-daemon`'s `main.rs` wires for the HTTP surface,
/// minus the AMQP publisher (a one-shot local run has no durable consumer).
pub struct LocalRuntime {
    /// The orchestrator driving the run.
    pub orchestrator: Arc<Orchestrator>,
}

impl LocalRuntime {
    /// Build a fresh in-memory orchestrator, publish `pack`, register every
    /// kind in `kinds`, and create the workspace's parent document.
    pub async fn bootstrap(kinds: Vec<Kind>, pack: CapabilityPack, workspace_id: &str) -> Result<Self> {
        let kind_registry = Arc::new(KindRegistry::new());
        for kind in kinds {
            kind_registry.upsert_kind(kind).await;
        }

        let store = Arc::new(ArtifactStore::new());
        store
            .create_parent_doc(workspace_id.to_string(), Value::Object(Default::default()), None)
            .await
            .with_context(|| format!("creating workspace '{workspace_id}'"))?;

        let packs = Arc::new(PackCatalog::new());
        packs.publish(pack).await;

        let runs = Arc::new(RunStore::new());
        let orchestrator = Arc::new(Orchestrator::new(packs, kind_registry, store, runs));
        Ok(Self { orchestrator })
    }

    /// Resolve `pack_key`/`playbook_id` against `workspace_id` and spawn the
    /// run, returning the handle to stream events from and join on.
    pub async fn start_run(
        &self,
        workspace_id: String,
        pack_key: String,
        playbook_id: String,
        inputs: Value,
        strategy: cam_core::RunStrategy,
        options: cam_core::RunOptions,
    ) -> Result<RunHandle> {
        self.orchestrator
            .start_run(workspace_id, pack_key, None, playbook_id, inputs, strategy, options)
            .await
            .context("starting run")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_rewrites_http_scheme() {
        assert_eq!(ws_url("http://localhost:8088", "run_1"), "ws://localhost:8088/runs/run_1/watch");
    }

    #[test]
    fn ws_url_rewrites_https_scheme() {
        assert_eq!(ws_url("https://cam.example.com", "run_1"), "wss://cam.example.com/runs/run_1/watch");
    }

    #[test]
    fn ws_url_strips_trailing_slash() {
        assert_eq!(ws_url("http://localhost:8088/", "run_1"), "ws://localhost:8088/runs/run_1/watch");
    }

    #[test]
    fn parse_key_value_splits_on_first_equals() {
        let (k, v) = parse_key_value("model=gpt-4=preview").unwrap();
        assert_eq!(k, "model");
        assert_eq!(v, "gpt-4=preview");
    }

    #[test]
    fn parse_key_value_rejects_missing_equals() {
        assert!(parse_key_value("no-equals-sign").is_err());
    }

    #[test]
    fn parse_key_value_rejects_empty_key() {
        assert!(parse_key_value("=value").is_err());
    }

    #[test]
    fn load_inputs_defaults_to_empty_object_when_absent() {
        let inputs = load_inputs(None).unwrap();
        assert_eq!(inputs, serde_json::json!({}));
    }

    #[test]
    fn load_inputs_reads_and_parses_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inputs.json");
        std::fs::write(&path, r#"{"source_ref": "s3://bucket/key"}"#).unwrap();
        let inputs = load_inputs(Some(&path)).unwrap();
        assert_eq!(inputs["source_ref"], "s3://bucket/key");
    }

    #[test]
    fn load_kinds_file_parses_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kinds.json");
        std::fs::write(
            &path,
            r#"[{
                "id": "cam.cobol.copybook",
                "category": "mainframe",
                "status": "active",
                "aliases": [],
                "latest_schema_version": "1.0.0",
                "schema_versions": []
            }]"#,
        )
        .unwrap();
        let kinds = load_kinds_file(&path).unwrap();
        assert_eq!(kinds.len(), 1);
        assert_eq!(kinds[0].id, "cam.cobol.copybook");
    }

    #[test]
    fn load_kinds_file_missing_file_errors() {
        let err = load_kinds_file(Path::new("/no/such/kinds.json")).unwrap_err();
        assert!(err.to_string().contains("reading kinds file"));
    }

    #[tokio::test]
    async fn local_runtime_bootstrap_creates_workspace() {
        let kinds = vec![];
        let pack = CapabilityPack {
            key: "pk".into(),
            version: "1.0.0".into(),
            capability_ids: vec![],
            capabilities: vec![],
            tools: Default::default(),
            playbooks: vec![],
            updated_at: chrono::Utc::now(),
        };
        let runtime = LocalRuntime::bootstrap(kinds, pack, "ws_1").await.unwrap();
        let runs = runtime.orchestrator.runs().list().await;
        assert!(runs.is_empty());
    }
}
