//! Artifact store: per-workspace aggregate documents with an embedded
//! artifact list, idempotent versioned upsert keyed by natural key, RFC 6902
//! patch history, inputs-baseline bookkeeping, and run-delta computation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{BTreeMap, HashMap};

use cam_core::{
    fallback_natural_key, fingerprint, Artifact, DiagramInstruction, InputsBaseline, Lineage,
    Provenance, WorkspaceAggregate,
};
use cam_error::{CamError, ErrorCode};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

/// Outcome classification of an [`ArtifactStore::upsert_artifact`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOp {
    /// No live artifact existed for this natural key; one was created at version 1.
    Insert,
    /// A live artifact existed and its content (data or diagrams) changed.
    Update,
    /// A live artifact existed and nothing changed; only bookkeeping was touched.
    Noop,
}

/// Input to [`ArtifactStore::upsert_artifact`].
#[derive(Debug, Clone)]
pub struct UpsertPayload {
    /// Kind id of the artifact.
    pub kind: String,
    /// Human-readable name.
    pub name: String,
    /// Schema-conformant payload.
    pub data: Value,
    /// Natural key override; defaults to `kind:name` lowercased when absent.
    pub natural_key: Option<String>,
    /// Rendered diagrams, if any.
    pub diagrams: Option<Vec<DiagramInstruction>>,
    /// Provenance of the producing run/step.
    pub provenance: Provenance,
}

/// A recorded RFC 6902 patch applied to an artifact.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PatchRecord {
    /// Artifact the patch was applied to.
    pub artifact_id: String,
    /// Version before the patch.
    pub from_version: u64,
    /// Version after the patch.
    pub to_version: u64,
    /// The RFC 6902 patch document itself.
    pub patch: Value,
    /// Provenance recorded for this patch.
    pub provenance: Provenance,
    /// When the patch was recorded.
    pub applied_at: chrono::DateTime<Utc>,
}

/// Per-kind classification of artifacts against a run, per §4.2's delta
/// semantics (`new`/`updated`/`unchanged`/`retired`/`deleted`).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunDeltaBucket {
    /// Count of artifacts in this bucket.
    pub count: usize,
    /// Artifact ids in this bucket, present only when `include_ids` was set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
}

/// Result of [`ArtifactStore::compute_run_deltas`]: one bucket set per kind.
pub type RunDeltaResult = BTreeMap<String, BTreeMap<&'static str, RunDeltaBucket>>;

struct WorkspaceCell {
    aggregate: WorkspaceAggregate,
    patches: HashMap<String, Vec<PatchRecord>>,
}

/// The artifact store: an in-process, `Arc`-shareable map of workspace
/// aggregates, each behind its own lock so that writes to one workspace
/// never block reads of another. Writes within a workspace are serialized
/// by that workspace's write lock, which also satisfies the narrower
/// per-`(workspace_id, natural_key)` contract required by §4.2 (a coarser
/// but strictly sufficient implementation choice).
#[derive(Default)]
pub struct ArtifactStore {
    workspaces: RwLock<HashMap<String, RwLock<WorkspaceCell>>>,
}

impl ArtifactStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new workspace aggregate document.
    pub async fn create_parent_doc(
        &self,
        workspace_id: impl Into<String>,
        workspace_snapshot: Value,
        inputs_baseline: Option<Value>,
    ) -> Result<WorkspaceAggregate, CamError> {
        let workspace_id = workspace_id.into();
        let mut aggregate = WorkspaceAggregate::new(workspace_id.clone(), workspace_snapshot);
        if let Some(data) = inputs_baseline {
            let fp = fingerprint(&data)?;
            aggregate.inputs_baseline = Some(InputsBaseline { data, fingerprint: fp, version: 1 });
        }

        let mut workspaces = self.workspaces.write().await;
        if workspaces.contains_key(&workspace_id) {
            return Err(CamError::new(ErrorCode::Conflict, "workspace already exists")
                .with_context("workspace_id", workspace_id));
        }
        let snapshot = aggregate.clone();
        workspaces.insert(
            workspace_id,
            RwLock::new(WorkspaceCell { aggregate, patches: HashMap::new() }),
        );
        Ok(snapshot)
    }

    /// Fetch a workspace aggregate document.
    pub async fn get_parent_doc(&self, workspace_id: &str) -> Result<WorkspaceAggregate, CamError> {
        let workspaces = self.workspaces.read().await;
        let cell = workspaces
            .get(workspace_id)
            .ok_or_else(|| not_found_workspace(workspace_id))?;
        Ok(cell.read().await.aggregate.clone())
    }

    /// Delete a workspace aggregate document entirely (not a soft-delete).
    pub async fn delete_parent_doc(&self, workspace_id: &str) -> Result<(), CamError> {
        let mut workspaces = self.workspaces.write().await;
        workspaces
            .remove(workspace_id)
            .map(|_| ())
            .ok_or_else(|| not_found_workspace(workspace_id))
    }

    /// Fetch a single artifact by id, live or soft-deleted.
    pub async fn get_artifact(&self, workspace_id: &str, artifact_id: &str) -> Result<Artifact, CamError> {
        let workspaces = self.workspaces.read().await;
        let cell = workspaces
            .get(workspace_id)
            .ok_or_else(|| not_found_workspace(workspace_id))?;
        let guard = cell.read().await;
        guard.aggregate.find_by_id(artifact_id).cloned().ok_or_else(|| not_found_artifact(artifact_id))
    }

    /// List artifacts in a workspace, filtered and paginated per §6.1's
    /// `GET /artifact/{workspace}` query parameters. Results are sorted by
    /// `updated_at desc, artifact_id asc`, matching the REST surface's
    /// documented list ordering.
    pub async fn list_artifacts(
        &self,
        workspace_id: &str,
        kind: Option<&str>,
        name_prefix: Option<&str>,
        include_deleted: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Artifact>, CamError> {
        let workspaces = self.workspaces.read().await;
        let cell = workspaces
            .get(workspace_id)
            .ok_or_else(|| not_found_workspace(workspace_id))?;
        let guard = cell.read().await;

        let mut matched: Vec<Artifact> = guard
            .aggregate
            .artifacts
            .iter()
            .filter(|a| include_deleted || a.is_live())
            .filter(|a| kind.is_none_or(|k| a.kind == k))
            .filter(|a| name_prefix.is_none_or(|p| a.name.starts_with(p)))
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.artifact_id.cmp(&b.artifact_id)));
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    /// Replace the denormalized `workspace` snapshot without touching artifacts.
    pub async fn refresh_workspace_snapshot(
        &self,
        workspace_id: &str,
        snapshot: Value,
    ) -> Result<(), CamError> {
        let workspaces = self.workspaces.read().await;
        let cell = workspaces
            .get(workspace_id)
            .ok_or_else(|| not_found_workspace(workspace_id))?;
        let mut guard = cell.write().await;
        guard.aggregate.workspace = snapshot;
        guard.aggregate.updated_at = Utc::now();
        Ok(())
    }

    /// The authoritative upsert algorithm (§4.2): resolve natural key,
    /// compute content fingerprints, insert/update/noop against the live
    /// artifact for that key.
    pub async fn upsert_artifact(
        &self,
        workspace_id: &str,
        payload: UpsertPayload,
        run_id: &str,
    ) -> Result<(Artifact, UpsertOp), CamError> {
        let workspaces = self.workspaces.read().await;
        let cell = workspaces
            .get(workspace_id)
            .ok_or_else(|| not_found_workspace(workspace_id))?;
        let mut guard = cell.write().await;

        let natural_key = payload
            .natural_key
            .clone()
            .unwrap_or_else(|| fallback_natural_key(&payload.kind, &payload.name));
        let data_fp = fingerprint(&payload.data)?;
        let diag_fp = match &payload.diagrams {
            Some(d) if !d.is_empty() => Some(fingerprint(d)?),
            _ => None,
        };
        let now = Utc::now();

        if let Some(existing) = guard.aggregate.find_live_by_natural_key_mut(&natural_key) {
            if existing.fingerprint == data_fp && existing.diagram_fingerprint == diag_fp {
                existing.lineage.last_seen_run_id = run_id.to_string();
                existing.updated_at = now;
                let snapshot = existing.clone();
                return Ok((snapshot, UpsertOp::Noop));
            }
            existing.data = payload.data;
            existing.fingerprint = data_fp;
            if let Some(diagrams) = payload.diagrams {
                existing.diagrams = diagrams;
            }
            existing.diagram_fingerprint = diag_fp;
            existing.version += 1;
            existing.lineage.last_seen_run_id = run_id.to_string();
            existing.provenance = payload.provenance;
            existing.updated_at = now;
            let snapshot = existing.clone();
            return Ok((snapshot, UpsertOp::Update));
        }

        let artifact = Artifact {
            artifact_id: format!("art_{}", uuid::Uuid::new_v4().simple()),
            kind: payload.kind,
            name: payload.name,
            natural_key,
            data: payload.data,
            fingerprint: data_fp,
            diagrams: payload.diagrams.unwrap_or_default(),
            diagram_fingerprint: diag_fp,
            version: 1,
            lineage: Lineage {
                first_seen_run_id: run_id.to_string(),
                last_seen_run_id: run_id.to_string(),
                supersedes: vec![],
                superseded_by: None,
            },
            provenance: payload.provenance,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        guard.aggregate.artifacts.push(artifact.clone());
        Ok((artifact, UpsertOp::Insert))
    }

    /// Unconditional replacement of an artifact's content, bumping version.
    /// `expected_version`, when set, enforces `If-Match` semantics.
    pub async fn replace_artifact(
        &self,
        workspace_id: &str,
        artifact_id: &str,
        new_data: Option<Value>,
        new_diagrams: Option<Vec<DiagramInstruction>>,
        provenance: Provenance,
        expected_version: Option<u64>,
    ) -> Result<Artifact, CamError> {
        let workspaces = self.workspaces.read().await;
        let cell = workspaces
            .get(workspace_id)
            .ok_or_else(|| not_found_workspace(workspace_id))?;
        let mut guard = cell.write().await;
        let artifact = guard
            .aggregate
            .artifacts
            .iter_mut()
            .find(|a| a.artifact_id == artifact_id)
            .ok_or_else(|| not_found_artifact(artifact_id))?;

        if let Some(expected) = expected_version {
            if artifact.version != expected {
                return Err(CamError::new(
                    ErrorCode::PreconditionFailed,
                    "artifact version does not match If-Match",
                )
                .with_context("expected", expected)
                .with_context("actual", artifact.version));
            }
        }

        if let Some(data) = new_data {
            artifact.fingerprint = fingerprint(&data)?;
            artifact.data = data;
        }
        if let Some(diagrams) = new_diagrams {
            artifact.diagram_fingerprint = if diagrams.is_empty() {
                None
            } else {
                Some(fingerprint(&diagrams)?)
            };
            artifact.diagrams = diagrams;
        }
        artifact.provenance = provenance;
        artifact.version += 1;
        artifact.updated_at = Utc::now();
        Ok(artifact.clone())
    }

    /// Soft-delete an artifact; idempotent when already deleted.
    pub async fn soft_delete_artifact(
        &self,
        workspace_id: &str,
        artifact_id: &str,
    ) -> Result<Artifact, CamError> {
        let workspaces = self.workspaces.read().await;
        let cell = workspaces
            .get(workspace_id)
            .ok_or_else(|| not_found_workspace(workspace_id))?;
        let mut guard = cell.write().await;
        let artifact = guard
            .aggregate
            .artifacts
            .iter_mut()
            .find(|a| a.artifact_id == artifact_id)
            .ok_or_else(|| not_found_artifact(artifact_id))?;
        if artifact.deleted_at.is_none() {
            let now = Utc::now();
            artifact.deleted_at = Some(now);
            artifact.updated_at = now;
        }
        Ok(artifact.clone())
    }

    /// Apply an RFC 6902 patch to an artifact's `data`, then record the
    /// before/after version in the patch history.
    pub async fn patch_artifact(
        &self,
        workspace_id: &str,
        artifact_id: &str,
        patch: Value,
        provenance: Provenance,
    ) -> Result<Artifact, CamError> {
        let parsed: json_patch::Patch = serde_json::from_value(patch.clone()).map_err(|e| {
            CamError::new(ErrorCode::InvalidParams, "malformed json patch document")
                .with_source(e)
        })?;

        let workspaces = self.workspaces.read().await;
        let cell = workspaces
            .get(workspace_id)
            .ok_or_else(|| not_found_workspace(workspace_id))?;
        let mut guard = cell.write().await;
        let from_version;
        let to_version;
        {
            let artifact = guard
                .aggregate
                .artifacts
                .iter_mut()
                .find(|a| a.artifact_id == artifact_id)
                .ok_or_else(|| not_found_artifact(artifact_id))?;

            let mut patched = artifact.data.clone();
            json_patch::patch(&mut patched, &parsed).map_err(|e| {
                CamError::new(ErrorCode::InvalidParams, "json patch application failed")
                    .with_context("artifact_id", artifact_id)
                    .with_source(e)
            })?;

            from_version = artifact.version;
            artifact.fingerprint = fingerprint(&patched)?;
            artifact.data = patched;
            artifact.version += 1;
            artifact.provenance = provenance.clone();
            artifact.updated_at = Utc::now();
            to_version = artifact.version;
        }

        guard.patches.entry(artifact_id.to_string()).or_default().push(PatchRecord {
            artifact_id: artifact_id.to_string(),
            from_version,
            to_version,
            patch,
            provenance,
            applied_at: Utc::now(),
        });

        Ok(guard
            .aggregate
            .find_by_id(artifact_id)
            .expect("just wrote this artifact")
            .clone())
    }

    /// List recorded patches for an artifact, oldest first.
    pub async fn list_patches(
        &self,
        workspace_id: &str,
        artifact_id: &str,
    ) -> Result<Vec<PatchRecord>, CamError> {
        let workspaces = self.workspaces.read().await;
        let cell = workspaces
            .get(workspace_id)
            .ok_or_else(|| not_found_workspace(workspace_id))?;
        let guard = cell.read().await;
        Ok(guard.patches.get(artifact_id).cloned().unwrap_or_default())
    }

    /// Set the workspace's inputs baseline. `if_absent_only` makes this a
    /// no-op when a baseline already exists; `expected_version` enforces
    /// `If-Match` semantics against the current baseline version.
    pub async fn set_inputs_baseline(
        &self,
        workspace_id: &str,
        new_inputs: Value,
        if_absent_only: bool,
        expected_version: Option<u64>,
    ) -> Result<InputsBaseline, CamError> {
        let workspaces = self.workspaces.read().await;
        let cell = workspaces
            .get(workspace_id)
            .ok_or_else(|| not_found_workspace(workspace_id))?;
        let mut guard = cell.write().await;

        if if_absent_only {
            if let Some(existing) = &guard.aggregate.inputs_baseline {
                return Ok(existing.clone());
            }
        }
        if let Some(expected) = expected_version {
            let actual = guard.aggregate.inputs_baseline.as_ref().map(|b| b.version).unwrap_or(0);
            if actual != expected {
                return Err(CamError::new(
                    ErrorCode::PreconditionFailed,
                    "inputs baseline version does not match If-Match",
                )
                .with_context("expected", expected)
                .with_context("actual", actual));
            }
        }

        let next_version = guard.aggregate.inputs_baseline.as_ref().map_or(1, |b| b.version + 1);
        let baseline = InputsBaseline {
            fingerprint: fingerprint(&new_inputs)?,
            data: new_inputs,
            version: next_version,
        };
        guard.aggregate.inputs_baseline = Some(baseline.clone());
        guard.aggregate.updated_at = Utc::now();
        Ok(baseline)
    }

    /// Shallow-merge `patch` into the current baseline's `data` object,
    /// bumping the baseline version. Top-level keys in `patch` overwrite;
    /// everything else is preserved.
    pub async fn merge_inputs_baseline(
        &self,
        workspace_id: &str,
        patch: Value,
    ) -> Result<InputsBaseline, CamError> {
        let workspaces = self.workspaces.read().await;
        let cell = workspaces
            .get(workspace_id)
            .ok_or_else(|| not_found_workspace(workspace_id))?;
        let mut guard = cell.write().await;

        let mut merged = guard
            .aggregate
            .inputs_baseline
            .as_ref()
            .map(|b| b.data.clone())
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        if let (Value::Object(dst), Value::Object(src)) = (&mut merged, &patch) {
            for (k, v) in src {
                dst.insert(k.clone(), v.clone());
            }
        }

        let next_version = guard.aggregate.inputs_baseline.as_ref().map_or(1, |b| b.version + 1);
        let baseline =
            InputsBaseline { fingerprint: fingerprint(&merged)?, data: merged, version: next_version };
        guard.aggregate.inputs_baseline = Some(baseline.clone());
        guard.aggregate.updated_at = Utc::now();
        Ok(baseline)
    }

    /// Classify every artifact against `run_id` into `new`/`updated`/
    /// `unchanged`/`retired`/`deleted` buckets, one set per kind (§4.2).
    pub async fn compute_run_deltas(
        &self,
        workspace_id: &str,
        run_id: &str,
        include_ids: bool,
    ) -> Result<RunDeltaResult, CamError> {
        let workspaces = self.workspaces.read().await;
        let cell = workspaces
            .get(workspace_id)
            .ok_or_else(|| not_found_workspace(workspace_id))?;
        let guard = cell.read().await;

        let mut result: RunDeltaResult = BTreeMap::new();
        for artifact in &guard.aggregate.artifacts {
            let bucket_key: &'static str = if !artifact.is_live() {
                "deleted"
            } else if artifact.lineage.first_seen_run_id == run_id {
                "new"
            } else if artifact.provenance.run_id == run_id {
                "updated"
            } else if artifact.lineage.last_seen_run_id == run_id {
                "unchanged"
            } else {
                "retired"
            };

            let by_kind = result.entry(artifact.kind.clone()).or_default();
            let bucket = by_kind.entry(bucket_key).or_default();
            bucket.count += 1;
            if include_ids {
                bucket.ids.get_or_insert_with(Vec::new).push(artifact.artifact_id.clone());
            }
        }
        Ok(result)
    }
}

fn not_found_workspace(workspace_id: &str) -> CamError {
    CamError::new(ErrorCode::NotFound, "workspace not found").with_context("workspace_id", workspace_id)
}

fn not_found_artifact(artifact_id: &str) -> CamError {
    CamError::new(ErrorCode::NotFound, "artifact not found").with_context("artifact_id", artifact_id)
}
