// SPDX-License-Identifier: MIT OR Apache-2.0
//! Binary-level integration tests for the `cam` CLI.

use std::net::SocketAddr;
use std::sync::Arc;

use assert_cmd::Command;
use cam_daemon::{AppState, build_app};
use cam_registry::KindRegistry;
use cam_runtime::{Orchestrator, PackCatalog, RunStore};
use cam_store::ArtifactStore;
use chrono::Utc;
use predicates::str::contains;

fn cam() -> Command {
    Command::cargo_bin("cam").expect("binary `cam` should be built")
}

async fn test_state() -> Arc<AppState> {
    let kinds = Arc::new(KindRegistry::new());
    let store = Arc::new(ArtifactStore::new());
    let packs = Arc::new(PackCatalog::new());
    let runs = Arc::new(RunStore::new());
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&packs), Arc::clone(&kinds), Arc::clone(&store), runs));
    Arc::new(AppState { kinds, store, packs, orchestrator, started_at: Utc::now() })
}

async fn spawn_server() -> SocketAddr {
    let app = build_app(test_state().await);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// ── Help & version ──────────────────────────────────────────────────

#[test]
fn help_flag_prints_usage() {
    cam().arg("--help")
        .assert()
        .success()
        .stdout(contains("registry"))
        .stdout(contains("store"))
        .stdout(contains("run"))
        .stdout(contains("daemon"));
}

#[test]
fn version_flag_prints_version() {
    cam().arg("--version").assert().success().stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_subcommand_is_a_usage_error() {
    cam().assert().failure().code(2);
}

// ── registry / store against a live daemon ──────────────────────────

#[tokio::test]
async fn registry_kinds_lists_empty_registry() {
    let addr = spawn_server().await;
    cam()
        .args(["--daemon-url", &format!("http://{addr}"), "--format", "json", "registry", "kinds"])
        .assert()
        .success()
        .stdout(contains("[]"));
}

#[tokio::test]
async fn store_get_unknown_artifact_fails_with_runtime_exit_code() {
    let addr = spawn_server().await;
    cam()
        .args([
            "--daemon-url",
            &format!("http://{addr}"),
            "store",
            "get",
            "--workspace",
            "ws_missing",
            "--artifact",
            "art_missing",
        ])
        .assert()
        .failure()
        .code(2);
}

#[tokio::test]
async fn run_cancel_unknown_run_fails_with_runtime_exit_code() {
    let addr = spawn_server().await;
    cam()
        .args(["--daemon-url", &format!("http://{addr}"), "run", "cancel", "--run-id", "run_missing"])
        .assert()
        .failure()
        .code(2);
}

// ── run start, fully in-process (no daemon needed) ──────────────────

#[test]
fn run_start_executes_a_minimal_playbook() {
    let dir = tempfile::tempdir().unwrap();
    let kinds_path = dir.path().join("kinds.json");
    let pack_path = dir.path().join("pack.json");

    std::fs::write(&kinds_path, "[]").unwrap();

    std::fs::write(
        &pack_path,
        r#"{
            "key": "demo-pack",
            "version": "1.0.0",
            "capability_ids": [],
            "capabilities": [],
            "tools": {},
            "playbooks": [{
                "id": "noop",
                "name": "No-op",
                "steps": [],
                "edges": []
            }],
            "updated_at": "2026-01-01T00:00:00Z"
        }"#,
    )
    .unwrap();

    cam()
        .args([
            "--format",
            "json",
            "run",
            "start",
            "--workspace",
            "ws_demo",
            "--kinds-file",
            kinds_path.to_str().unwrap(),
            "--pack-file",
            pack_path.to_str().unwrap(),
            "--playbook",
            "noop",
        ])
        .assert()
        .success()
        .stdout(contains("\"status\":\"completed\""));
}

#[test]
fn run_start_missing_pack_file_is_a_runtime_error() {
    cam()
        .args([
            "run",
            "start",
            "--workspace",
            "ws_demo",
            "--kinds-file",
            "/no/such/kinds.json",
            "--pack-file",
            "/no/such/pack.json",
            "--playbook",
            "noop",
        ])
        .assert()
        .failure()
        .code(2);
}
