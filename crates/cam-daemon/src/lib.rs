// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! HTTP control-plane for the capability-driven learning platform: the
//! Artifact Store and Kind/Capability Registry REST surfaces (§6.1/§6.2),
//! plus a websocket feed of live `RunEvent`s for a started run.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path as AxPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use cam_capability::plan::resolve_plan;
use cam_core::CapabilityPack;
use cam_error::CamError;
use cam_registry::KindRegistry;
use cam_runtime::{Orchestrator, PackCatalog};
use cam_store::{ArtifactStore, UpsertOp, UpsertPayload};

pub mod middleware;
pub mod validation;
pub mod versioning;

use validation::RequestValidator;

fn bad_request(reasons: impl IntoIterator<Item = String>) -> ApiError {
    let reasons: Vec<String> = reasons.into_iter().collect();
    ApiError(CamError::new(cam_error::ErrorCode::InvalidParams, reasons.join("; ")))
}

/// Shared daemon state handed to every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// Kind registry (schema catalog, validation, adapters/migrators).
    pub kinds: Arc<KindRegistry>,
    /// Artifact store (per-workspace aggregates).
    pub store: Arc<ArtifactStore>,
    /// Published capability packs.
    pub packs: Arc<PackCatalog>,
    /// Run Orchestrator, used to resolve plans and watch started runs.
    pub orchestrator: Arc<Orchestrator>,
    /// Process start time, for `GET /health`'s `uptime_seconds`.
    pub started_at: chrono::DateTime<Utc>,
}

/// A thin `IntoResponse` wrapper around [`CamError`], rendering the `{detail:
/// ...}` body the error taxonomy already defines (§7) at its stable HTTP
/// status.
pub struct ApiError(pub CamError);

impl From<CamError> for ApiError {
    fn from(err: CamError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.detail_body())).into_response()
    }
}

/// Build the Axum router with every route this daemon serves.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        // -- Artifact store (§6.1) -------------------------------------------
        .route("/artifact/{workspace}", post(cmd_upsert_artifact).get(cmd_list_artifacts))
        .route("/artifact/{workspace}/upsert-batch", post(cmd_upsert_batch))
        .route("/artifact/{workspace}/parent", get(cmd_get_parent))
        .route("/artifact/{workspace}/deltas", get(cmd_get_deltas))
        .route(
            "/artifact/{workspace}/{artifact_id}",
            get(cmd_get_artifact).put(cmd_replace_artifact).delete(cmd_delete_artifact),
        )
        .route("/artifact/{workspace}/{artifact_id}/patch", post(cmd_patch_artifact))
        .route("/artifact/{workspace}/{artifact_id}/history", get(cmd_artifact_history))
        .route(
            "/artifact/{workspace}/baseline-inputs",
            post(cmd_set_baseline).patch(cmd_merge_baseline),
        )
        // -- Kind registry (§6.2) --------------------------------------------
        .route("/registry/kinds", get(cmd_list_kinds))
        .route("/registry/kinds/{id}", get(cmd_get_kind))
        .route("/registry/kinds/{id}/prompt", get(cmd_kind_prompt))
        .route("/registry/kinds/{id}/adapt", post(cmd_adapt_kind))
        .route("/registry/validate", post(cmd_validate_kind_data))
        .route("/registry/kinds/exists", post(cmd_kinds_exist))
        .route("/registry/meta", get(cmd_registry_meta))
        // -- Capability registry (§6.2) --------------------------------------
        .route(
            "/capability/pack/{key}/{version}",
            post(cmd_create_pack).get(cmd_get_pack).put(cmd_publish_pack).delete(cmd_delete_pack),
        )
        .route("/capability/pack/{key}/{version}/playbooks", get(cmd_list_playbooks))
        .route("/capability/pack/{key}/{version}/playbooks/reorder", post(cmd_reorder_playbooks))
        .route("/capability/pack/{key}/{version}/playbooks/{playbook_id}", get(cmd_get_playbook))
        .route("/capability/pack/{key}/{version}/capabilities", get(cmd_list_capabilities))
        .route("/capability/resolve", post(cmd_resolve_plan))
        // -- Live run progress (expansion: watch/cancel a started run) -------
        .route("/runs/{run_id}/watch", get(cmd_watch_run))
        .route("/runs/{run_id}/cancel", post(cmd_cancel_run))
        .with_state(state)
}

async fn cmd_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0) as u64;
    Json(json!({
        "status": "ok",
        "contract_version": cam_core::CONTRACT_VERSION,
        "uptime_seconds": uptime,
        "time": Utc::now().to_rfc3339(),
    }))
}

// ---------------------------------------------------------------------------
// Artifact store
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UpsertArtifactRequest {
    kind: String,
    name: String,
    data: serde_json::Value,
    #[serde(default)]
    diagrams: Option<Vec<cam_core::DiagramInstruction>>,
    #[serde(default)]
    natural_key: Option<String>,
    #[serde(default)]
    provenance: cam_core::Provenance,
}

async fn cmd_upsert_artifact(
    AxPath(workspace): AxPath<String>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpsertArtifactRequest>,
) -> Result<Response, ApiError> {
    RequestValidator::validate_workspace_id(&workspace).map_err(|e| bad_request([e]))?;
    RequestValidator::validate_name("kind", &req.kind).map_err(|e| bad_request([e]))?;
    RequestValidator::validate_name("name", &req.name).map_err(|e| bad_request([e]))?;
    RequestValidator::validate_json_payload(&req.data).map_err(bad_request)?;
    state.kinds.validate_data(&req.kind, &req.data, None).await?;

    let run_id = req.provenance.run_id.clone();
    let payload = UpsertPayload {
        kind: req.kind,
        name: req.name,
        data: req.data,
        natural_key: req.natural_key,
        diagrams: req.diagrams,
        provenance: req.provenance,
    };
    let (artifact, op) = state.store.upsert_artifact(&workspace, payload, &run_id).await?;

    let status = if op == UpsertOp::Insert { StatusCode::CREATED } else { StatusCode::OK };
    let op_header = match op {
        UpsertOp::Insert => "insert",
        UpsertOp::Update => "update",
        UpsertOp::Noop => "noop",
    };

    let mut resp = (status, Json(artifact.clone())).into_response();
    let headers = resp.headers_mut();
    headers.insert("etag", artifact.version.to_string().parse().unwrap());
    headers.insert("x-op", op_header.parse().unwrap());
    Ok(resp)
}

#[derive(Debug, Deserialize)]
struct UpsertBatchRequest {
    items: Vec<UpsertArtifactRequest>,
}

#[derive(Debug, Default, Serialize)]
struct UpsertBatchCounts {
    insert: usize,
    update: usize,
    noop: usize,
    failed: usize,
}

async fn cmd_upsert_batch(
    AxPath(workspace): AxPath<String>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpsertBatchRequest>,
) -> Json<serde_json::Value> {
    let mut counts = UpsertBatchCounts::default();
    let mut results = Vec::with_capacity(req.items.len());

    for item in req.items {
        let run_id = item.provenance.run_id.clone();
        let outcome = async {
            state.kinds.validate_data(&item.kind, &item.data, None).await?;
            let payload = UpsertPayload {
                kind: item.kind,
                name: item.name,
                data: item.data,
                natural_key: item.natural_key,
                diagrams: item.diagrams,
                provenance: item.provenance,
            };
            state.store.upsert_artifact(&workspace, payload, &run_id).await
        }
        .await;

        match outcome {
            Ok((artifact, op)) => {
                match op {
                    UpsertOp::Insert => counts.insert += 1,
                    UpsertOp::Update => counts.update += 1,
                    UpsertOp::Noop => counts.noop += 1,
                }
                results.push(json!({"artifact_id": artifact.artifact_id, "op": format!("{op:?}").to_lowercase()}));
            }
            Err(err) => {
                counts.failed += 1;
                let err: CamError = err;
                results.push(json!({"error": err.detail_body()}));
            }
        }
    }

    Json(json!({
        "insert": counts.insert,
        "update": counts.update,
        "noop": counts.noop,
        "failed": counts.failed,
        "results": results,
    }))
}

#[derive(Debug, Deserialize)]
struct ListArtifactsQuery {
    kind: Option<String>,
    name_prefix: Option<String>,
    #[serde(default)]
    include_deleted: bool,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn cmd_list_artifacts(
    AxPath(workspace): AxPath<String>,
    Query(q): Query<ListArtifactsQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<cam_core::Artifact>>, ApiError> {
    let limit = q.limit.unwrap_or(50).min(200);
    let offset = q.offset.unwrap_or(0);
    let items = state
        .store
        .list_artifacts(&workspace, q.kind.as_deref(), q.name_prefix.as_deref(), q.include_deleted, limit, offset)
        .await?;
    Ok(Json(items))
}

async fn cmd_get_parent(
    AxPath(workspace): AxPath<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<cam_core::WorkspaceAggregate>, ApiError> {
    Ok(Json(state.store.get_parent_doc(&workspace).await?))
}

#[derive(Debug, Deserialize)]
struct DeltasQuery {
    run_id: String,
    #[serde(default)]
    include_ids: bool,
}

async fn cmd_get_deltas(
    AxPath(workspace): AxPath<String>,
    Query(q): Query<DeltasQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<cam_store::RunDeltaResult>, ApiError> {
    Ok(Json(state.store.compute_run_deltas(&workspace, &q.run_id, q.include_ids).await?))
}

async fn cmd_get_artifact(
    AxPath((workspace, artifact_id)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<cam_core::Artifact>, ApiError> {
    Ok(Json(state.store.get_artifact(&workspace, &artifact_id).await?))
}

#[derive(Debug, Deserialize)]
struct ReplaceArtifactRequest {
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    diagrams: Option<Vec<cam_core::DiagramInstruction>>,
    #[serde(default)]
    provenance: cam_core::Provenance,
    #[serde(default)]
    expected_version: Option<u64>,
}

async fn cmd_replace_artifact(
    AxPath((workspace, artifact_id)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReplaceArtifactRequest>,
) -> Result<Json<cam_core::Artifact>, ApiError> {
    let artifact = state
        .store
        .replace_artifact(&workspace, &artifact_id, req.data, req.diagrams, req.provenance, req.expected_version)
        .await?;
    Ok(Json(artifact))
}

async fn cmd_delete_artifact(
    AxPath((workspace, artifact_id)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.store.soft_delete_artifact(&workspace, &artifact_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct PatchArtifactRequest {
    patch: serde_json::Value,
    #[serde(default)]
    provenance: cam_core::Provenance,
}

async fn cmd_patch_artifact(
    AxPath((workspace, artifact_id)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<PatchArtifactRequest>,
) -> Result<Json<cam_core::Artifact>, ApiError> {
    RequestValidator::validate_json_payload(&req.patch).map_err(bad_request)?;
    Ok(Json(state.store.patch_artifact(&workspace, &artifact_id, req.patch, req.provenance).await?))
}

async fn cmd_artifact_history(
    AxPath((workspace, artifact_id)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<cam_store::PatchRecord>>, ApiError> {
    Ok(Json(state.store.list_patches(&workspace, &artifact_id).await?))
}

#[derive(Debug, Deserialize)]
struct BaselineRequest {
    data: serde_json::Value,
    #[serde(default)]
    if_absent_only: bool,
    #[serde(default)]
    expected_version: Option<u64>,
}

async fn cmd_set_baseline(
    AxPath(workspace): AxPath<String>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<BaselineRequest>,
) -> Result<Json<cam_core::InputsBaseline>, ApiError> {
    Ok(Json(
        state
            .store
            .set_inputs_baseline(&workspace, req.data, req.if_absent_only, req.expected_version)
            .await?,
    ))
}

async fn cmd_merge_baseline(
    AxPath(workspace): AxPath<String>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<BaselineRequest>,
) -> Result<Json<cam_core::InputsBaseline>, ApiError> {
    Ok(Json(state.store.merge_inputs_baseline(&workspace, req.data).await?))
}

// ---------------------------------------------------------------------------
// Kind registry
// ---------------------------------------------------------------------------

async fn cmd_list_kinds(State(state): State<Arc<AppState>>) -> Json<Vec<cam_core::Kind>> {
    Json(state.kinds.active_kinds().await)
}

async fn cmd_get_kind(
    AxPath(id): AxPath<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<cam_core::Kind>, ApiError> {
    Ok(Json(state.kinds.resolve_kind(&id).await?))
}

#[derive(Debug, Deserialize)]
struct PromptQuery {
    #[serde(default)]
    version: Option<String>,
    #[serde(flatten)]
    selectors: std::collections::BTreeMap<String, String>,
}

async fn cmd_kind_prompt(
    AxPath(id): AxPath<String>,
    Query(q): Query<PromptQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<cam_registry::SelectedPrompt>, ApiError> {
    let mut selectors = q.selectors;
    selectors.remove("version");
    let _ = q.version;
    Ok(Json(state.kinds.select_prompt_for(&id, &selectors).await?))
}

async fn cmd_adapt_kind(
    AxPath(id): AxPath<String>,
    State(state): State<Arc<AppState>>,
    Json(data): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(state.kinds.adapt(&id, &data, None).await?))
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    kind: String,
    data: serde_json::Value,
    #[serde(default)]
    version: Option<String>,
}

async fn cmd_validate_kind_data(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> Json<serde_json::Value> {
    match state.kinds.validate_data(&req.kind, &req.data, req.version.as_deref()).await {
        Ok(()) => Json(json!({"valid": true})),
        Err(err) => Json(json!({"valid": false, "error": err.detail_body()})),
    }
}

#[derive(Debug, Deserialize)]
struct KindsExistRequest {
    ids: Vec<String>,
}

async fn cmd_kinds_exist(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KindsExistRequest>,
) -> Json<serde_json::Value> {
    let mut out = serde_json::Map::new();
    for id in req.ids {
        let exists = state.kinds.resolve_kind(&id).await.is_ok();
        out.insert(id, json!(exists));
    }
    Json(serde_json::Value::Object(out))
}

async fn cmd_registry_meta(State(state): State<Arc<AppState>>) -> Json<cam_core::RegistryMeta> {
    Json(state.kinds.meta().await)
}

// ---------------------------------------------------------------------------
// Capability registry
// ---------------------------------------------------------------------------

async fn cmd_publish_pack(
    AxPath((_key, _version)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(pack): Json<CapabilityPack>,
) -> StatusCode {
    state.packs.publish(pack).await;
    StatusCode::OK
}

async fn cmd_get_pack(
    AxPath((key, version)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<CapabilityPack>, ApiError> {
    let pack = state.packs.get(&key, Some(&version)).await?;
    Ok(Json((*pack).clone()))
}

async fn cmd_create_pack(
    AxPath((_key, _version)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(pack): Json<CapabilityPack>,
) -> Result<StatusCode, ApiError> {
    state.packs.create(pack).await?;
    Ok(StatusCode::CREATED)
}

async fn cmd_delete_pack(
    AxPath((key, version)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> StatusCode {
    if state.packs.remove(&key, &version).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn cmd_list_playbooks(
    AxPath((key, version)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<cam_core::Playbook>>, ApiError> {
    let pack = state.packs.get(&key, Some(&version)).await?;
    Ok(Json(pack.playbooks.clone()))
}

async fn cmd_get_playbook(
    AxPath((key, version, playbook_id)): AxPath<(String, String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<cam_core::Playbook>, ApiError> {
    let pack = state.packs.get(&key, Some(&version)).await?;
    pack.playbooks
        .iter()
        .find(|p| p.id == playbook_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| {
            ApiError(
                CamError::new(cam_error::ErrorCode::PlaybookNotFound, "unknown playbook id")
                    .with_context("key", key)
                    .with_context("version", version)
                    .with_context("playbook_id", playbook_id),
            )
        })
}

#[derive(Debug, Deserialize)]
struct ReorderPlaybooksRequest {
    order: Vec<String>,
}

async fn cmd_reorder_playbooks(
    AxPath((key, version)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReorderPlaybooksRequest>,
) -> Result<Json<CapabilityPack>, ApiError> {
    let pack = state.packs.reorder_playbooks(&key, &version, &req.order).await?;
    Ok(Json((*pack).clone()))
}

async fn cmd_list_capabilities(
    AxPath((key, version)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<cam_core::Capability>>, ApiError> {
    let pack = state.packs.get(&key, Some(&version)).await?;
    Ok(Json(pack.capabilities.clone()))
}

#[derive(Debug, Deserialize)]
struct ResolvePlanRequest {
    pack_key: String,
    #[serde(default)]
    pack_version: Option<String>,
    playbook_id: String,
    workspace_id: String,
}

async fn cmd_resolve_plan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResolvePlanRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pack = state.packs.get(&req.pack_key, req.pack_version.as_deref()).await?;
    let plan = resolve_plan(&pack, &req.playbook_id, &req.workspace_id)?;
    Ok(Json(json!({
        "plan_id": plan.plan_id,
        "pack_key": plan.pack_key,
        "pack_version": plan.pack_version,
        "playbook_id": plan.playbook_id,
        "workspace_id": plan.workspace_id,
        "artifacts_contract": plan.artifacts_contract,
        "unmet_requirements": plan.unmet_requirements,
    })))
}

// ---------------------------------------------------------------------------
// Live run progress
// ---------------------------------------------------------------------------

async fn cmd_watch_run(
    AxPath(run_id): AxPath<String>,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    state.orchestrator.runs().get(&run_id).await?;
    Ok(ws.on_upgrade(move |socket| watch_run_socket(socket, run_id, state)))
}

async fn watch_run_socket(mut socket: WebSocket, run_id: String, state: Arc<AppState>) {
    let mut sub = state.orchestrator.subscribe_to_run(&run_id);
    while let Some(event) = sub.recv().await {
        let Ok(text) = serde_json::to_string(&event) else { continue };
        if socket.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
    info!(run_id = %run_id, "watch socket closed");
}

async fn cmd_cancel_run(
    AxPath(run_id): AxPath<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.cancel_run(&run_id).await?;
    Ok(StatusCode::ACCEPTED)
}
