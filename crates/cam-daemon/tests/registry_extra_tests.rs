// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for the batch upsert, kind adaptation, and prompt
//! selection endpoints that round out the §6.1/§6.2 REST surface.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use cam_core::{AdditionalPropsPolicy, IdentityRule, Kind, KindStatus, PromptSpec, PromptVariant, SchemaVersionEntry};
use cam_daemon::{AppState, build_app};
use cam_registry::KindRegistry;
use cam_runtime::{Orchestrator, PackCatalog, RunStore};
use cam_store::ArtifactStore;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

fn copybook_kind() -> Kind {
    Kind {
        id: "cam.cobol.copybook".into(),
        category: "mainframe".into(),
        status: KindStatus::Active,
        aliases: Default::default(),
        latest_schema_version: "1.0.0".into(),
        schema_versions: vec![SchemaVersionEntry {
            version: "1.0.0".into(),
            json_schema: json!({
                "type": "object",
                "properties": {"program": {"type": "string"}},
                "required": ["program"],
                "additionalProperties": true,
            }),
            additional_props_policy: AdditionalPropsPolicy::Allow,
            identity: IdentityRule::Single { path: "program".into() },
            adapters: vec![cam_core::AdapterStep::Defaults { path: "reviewed".into(), value: json!(false) }],
            migrators: vec![],
            diagram_recipes: vec![],
            depends_on: Default::default(),
            prompt: Some(PromptSpec {
                system: "You extract COBOL copybooks.".into(),
                user_template: Some("Extract: {{source}}".into()),
                strict_json: true,
                prompt_rev: 1,
                variants: vec![PromptVariant {
                    when: std::collections::BTreeMap::from([("style".to_string(), "terse".to_string())]),
                    system: Some("Be terse.".into()),
                    user_template: None,
                }],
            }),
        }],
    }
}

async fn test_app() -> (axum::Router, Arc<ArtifactStore>) {
    let kinds = Arc::new(KindRegistry::new());
    kinds.upsert_kind(copybook_kind()).await;

    let store = Arc::new(ArtifactStore::new());
    store.create_parent_doc("ws_billing", json!({}), None).await.unwrap();

    let packs = Arc::new(PackCatalog::new());
    let runs = Arc::new(RunStore::new());
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&packs), Arc::clone(&kinds), Arc::clone(&store), runs));

    let state = Arc::new(AppState { kinds, store: Arc::clone(&store), packs, orchestrator, started_at: Utc::now() });
    (build_app(state), store)
}

async fn request(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(v) => Body::from(serde_json::to_vec(&v).unwrap()),
        None => Body::empty(),
    };
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

#[tokio::test]
async fn upsert_batch_mixes_inserts_and_failures() {
    let (app, _store) = test_app().await;
    let req = json!({
        "items": [
            {
                "kind": "cam.cobol.copybook",
                "name": "CUST-REC",
                "data": {"program": "CUST-REC"},
                "provenance": {"run_id": "run_1", "playbook_id": "pb_1"},
            },
            {
                "kind": "cam.unknown.thing",
                "name": "bad",
                "data": {},
                "provenance": {"run_id": "run_1", "playbook_id": "pb_1"},
            },
        ],
    });
    let (status, body) = request(app, "POST", "/artifact/ws_billing/upsert-batch", Some(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["insert"], 1);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn adapt_kind_applies_default_step() {
    let (app, _store) = test_app().await;
    let req = json!({"program": "CUST-REC"});
    let (status, body) = request(app, "POST", "/registry/kinds/cam.cobol.copybook/adapt", Some(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reviewed"], false);
    assert_eq!(body["program"], "CUST-REC");
}

#[tokio::test]
async fn kind_prompt_falls_back_to_base_without_selectors() {
    let (app, _store) = test_app().await;
    let (status, body) = request(app, "GET", "/registry/kinds/cam.cobol.copybook/prompt", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["system"], "You extract COBOL copybooks.");
    assert_eq!(body["strict_json"], true);
}

#[tokio::test]
async fn kind_prompt_selects_variant_from_query_selectors() {
    let (app, _store) = test_app().await;
    let (status, body) = request(app, "GET", "/registry/kinds/cam.cobol.copybook/prompt?style=terse", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["system"], "Be terse.");
}
