// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for the Kind & Capability Registry REST surface (§6.2)
//! and the ambient `GET /health` endpoint.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use cam_core::{AdditionalPropsPolicy, CapabilityPack, IdentityRule, Kind, KindStatus, Playbook, SchemaVersionEntry};
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
        aliases: std::collections::BTreeSet::from(["copybook".to_string()]),
        latest_schema_version: "1.0.0".into(),
        schema_versions: vec![SchemaVersionEntry {
            version: "1.0.0".into(),
            json_schema: json!({"type": "object", "properties": {"program": {"type": "string"}}, "required": ["program"]}),
            additional_props_policy: AdditionalPropsPolicy::Allow,
            identity: IdentityRule::Single { path: "program".into() },
            adapters: vec![],
            migrators: vec![],
            diagram_recipes: vec![],
            depends_on: Default::default(),
            prompt: None,
        }],
    }
}

async fn test_app() -> (axum::Router, Arc<PackCatalog>) {
    let kinds = Arc::new(KindRegistry::new());
    kinds.upsert_kind(copybook_kind()).await;

    let store = Arc::new(ArtifactStore::new());
    let packs = Arc::new(PackCatalog::new());
    let runs = Arc::new(RunStore::new());
    let orchestrator =
        Arc::new(Orchestrator::new(Arc::clone(&packs), Arc::clone(&kinds), Arc::clone(&store), runs));

    let state = Arc::new(AppState { kinds, store, packs: Arc::clone(&packs), orchestrator, started_at: Utc::now() });
    (build_app(state), packs)
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
async fn health_reports_ok_and_contract_version() {
    let (app, _packs) = test_app().await;
    let (status, body) = request(app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["contract_version"], cam_core::CONTRACT_VERSION);
}

#[tokio::test]
async fn list_kinds_returns_active_kind() {
    let (app, _packs) = test_app().await;
    let (status, body) = request(app, "GET", "/registry/kinds", None).await;
    assert_eq!(status, StatusCode::OK);
    let kinds = body.as_array().unwrap();
    assert_eq!(kinds.len(), 1);
    assert_eq!(kinds[0]["id"], "cam.cobol.copybook");
}

#[tokio::test]
async fn get_kind_resolves_by_alias() {
    let (app, _packs) = test_app().await;
    let (status, body) = request(app, "GET", "/registry/kinds/copybook", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "cam.cobol.copybook");
}

#[tokio::test]
async fn get_unknown_kind_returns_404() {
    let (app, _packs) = test_app().await;
    let (status, _) = request(app, "GET", "/registry/kinds/cam.nonexistent", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn validate_valid_data_reports_valid_true() {
    let (app, _packs) = test_app().await;
    let req = json!({"kind": "cam.cobol.copybook", "data": {"program": "CUST-REC"}});
    let (status, body) = request(app, "POST", "/registry/validate", Some(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
}

#[tokio::test]
async fn validate_invalid_data_reports_valid_false() {
    let (app, _packs) = test_app().await;
    let req = json!({"kind": "cam.cobol.copybook", "data": {}});
    let (status, body) = request(app, "POST", "/registry/validate", Some(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn kinds_exist_reports_per_id_booleans() {
    let (app, _packs) = test_app().await;
    let req = json!({"ids": ["cam.cobol.copybook", "cam.nonexistent"]});
    let (status, body) = request(app, "POST", "/registry/kinds/exists", Some(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cam.cobol.copybook"], true);
    assert_eq!(body["cam.nonexistent"], false);
}

#[tokio::test]
async fn registry_meta_reports_a_version_and_etag() {
    let (app, _packs) = test_app().await;
    let (status, body) = request(app, "GET", "/registry/meta", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["registry_version"].as_u64().unwrap() >= 1);
    assert!(body["etag"].as_str().is_some());
}

fn demo_pack() -> CapabilityPack {
    CapabilityPack {
        key: "cobol-migration".into(),
        version: "1.0.0".into(),
        capability_ids: vec![],
        capabilities: vec![],
        tools: Default::default(),
        playbooks: vec![Playbook {
            id: "extract-copybooks".into(),
            name: "Extract Copybooks".into(),
            steps: vec![],
            edges: vec![],
            produces: vec!["cam.cobol.copybook".into()],
        }],
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn publish_and_get_capability_pack_roundtrips() {
    let (app, _packs) = test_app().await;
    let pack = demo_pack();
    let (status, _) =
        request(app.clone(), "PUT", "/capability/pack/cobol-migration/1.0.0", Some(serde_json::to_value(&pack).unwrap()))
            .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(app, "GET", "/capability/pack/cobol-migration/1.0.0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "cobol-migration");
}

#[tokio::test]
async fn get_unpublished_pack_returns_404() {
    let (app, _packs) = test_app().await;
    let (status, _) = request(app, "GET", "/capability/pack/does-not-exist/1.0.0", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn resolve_plan_returns_a_plan_id() {
    let (app, packs) = test_app().await;
    packs.publish(demo_pack()).await;

    let req = json!({
        "pack_key": "cobol-migration",
        "playbook_id": "extract-copybooks",
        "workspace_id": "ws_billing",
    });
    let (status, body) = request(app, "POST", "/capability/resolve", Some(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["plan_id"].as_str().unwrap().starts_with("pln_"));
    assert_eq!(body["artifacts_contract"].as_array().unwrap(), &vec![json!("cam.cobol.copybook")]);
}

#[tokio::test]
async fn resolve_plan_with_unknown_playbook_returns_404() {
    let (app, packs) = test_app().await;
    packs.publish(demo_pack()).await;

    let req = json!({
        "pack_key": "cobol-migration",
        "playbook_id": "no-such-playbook",
        "workspace_id": "ws_billing",
    });
    let (status, _) = request(app, "POST", "/capability/resolve", Some(req)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_pack_then_duplicate_create_conflicts() {
    let (app, _packs) = test_app().await;
    let pack = demo_pack();
    let body = serde_json::to_value(&pack).unwrap();

    let (status, _) = request(app.clone(), "POST", "/capability/pack/cobol-migration/1.0.0", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = request(app, "POST", "/capability/pack/cobol-migration/1.0.0", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn delete_pack_then_get_returns_404() {
    let (app, packs) = test_app().await;
    packs.publish(demo_pack()).await;

    let (status, _) = request(app.clone(), "DELETE", "/capability/pack/cobol-migration/1.0.0", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = request(app, "GET", "/capability/pack/cobol-migration/1.0.0", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_playbooks_returns_published_playbooks() {
    let (app, packs) = test_app().await;
    packs.publish(demo_pack()).await;

    let (status, body) = request(app, "GET", "/capability/pack/cobol-migration/1.0.0/playbooks", None).await;
    assert_eq!(status, StatusCode::OK);
    let playbooks = body.as_array().unwrap();
    assert_eq!(playbooks.len(), 1);
    assert_eq!(playbooks[0]["id"], "extract-copybooks");
}

#[tokio::test]
async fn get_playbook_by_id_roundtrips() {
    let (app, packs) = test_app().await;
    packs.publish(demo_pack()).await;

    let (status, body) =
        request(app, "GET", "/capability/pack/cobol-migration/1.0.0/playbooks/extract-copybooks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Extract Copybooks");
}

#[tokio::test]
async fn get_unknown_playbook_returns_404() {
    let (app, packs) = test_app().await;
    packs.publish(demo_pack()).await;

    let (status, _) =
        request(app, "GET", "/capability/pack/cobol-migration/1.0.0/playbooks/no-such-playbook", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reorder_playbooks_persists_new_order() {
    let (app, packs) = test_app().await;
    let mut pack = demo_pack();
    pack.playbooks.push(Playbook {
        id: "load-staging".into(),
        name: "Load Staging".into(),
        steps: vec![],
        edges: vec![],
        produces: vec![],
    });
    packs.publish(pack).await;

    let req = json!({"order": ["load-staging"]});
    let (status, body) =
        request(app, "POST", "/capability/pack/cobol-migration/1.0.0/playbooks/reorder", Some(req)).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["playbooks"].as_array().unwrap().iter().map(|p| p["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["load-staging", "extract-copybooks"]);
}

#[tokio::test]
async fn list_capabilities_returns_published_capabilities() {
    let (app, packs) = test_app().await;
    packs.publish(demo_pack()).await;

    let (status, body) = request(app, "GET", "/capability/pack/cobol-migration/1.0.0/capabilities", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);
}
