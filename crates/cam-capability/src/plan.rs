//! The plan resolver: turns a `(pack, playbook, workspace)` triple into a
//! concrete, validated [`ExecutionPlan`] the Run Orchestrator executes.

use std::collections::{BTreeMap, HashSet};

use cam_core::{CapabilityPack, Edge, Playbook, StepKind};
use cam_error::{CamError, ErrorCode};
use sha1::{Digest, Sha1};

/// A resolved ordering edge in the step DAG (explicit or linear-fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEdge {
    /// Upstream step index.
    pub from: usize,
    /// Downstream step index.
    pub to: usize,
}

/// The fully materialized execution plan for one playbook run.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// `"pln_" + sha1(pack.key:version:playbook:workspace:pack.updated_at)[:16]`.
    pub plan_id: String,
    /// Pack key this plan was resolved from.
    pub pack_key: String,
    /// Pack version this plan was resolved from.
    pub pack_version: String,
    /// Playbook id this plan executes.
    pub playbook_id: String,
    /// Workspace this plan targets.
    pub workspace_id: String,
    /// Step ordering edges, explicit or synthesized linear fallback.
    pub edges: Vec<ResolvedEdge>,
    /// Union of every step's `emits` plus the playbook's declared `produces`.
    pub artifacts_contract: Vec<String>,
    /// Per-step kinds required but not emitted by any prior step (soft surface,
    /// not enforced by the resolver itself).
    pub unmet_requirements: BTreeMap<String, Vec<String>>,
}

fn compute_plan_id(
    pack_key: &str,
    pack_version: &str,
    playbook_id: &str,
    workspace_id: &str,
    updated_at: chrono::DateTime<chrono::Utc>,
) -> String {
    let input = format!("{pack_key}:{pack_version}:{playbook_id}:{workspace_id}:{updated_at}");
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let hex = format!("{digest:x}");
    format!("pln_{}", &hex[..16])
}

/// Synthesize a linear fallback `s_i -> s_{i+1}` ordering when `playbook.edges`
/// is empty, otherwise return the declared edges as-is.
fn resolve_edges(playbook: &Playbook) -> Vec<ResolvedEdge> {
    if !playbook.edges.is_empty() {
        return playbook.edges.iter().map(|e: &Edge| ResolvedEdge { from: e.from, to: e.to }).collect();
    }
    (0..playbook.steps.len().saturating_sub(1))
        .map(|i| ResolvedEdge { from: i, to: i + 1 })
        .collect()
}

fn artifacts_contract(playbook: &Playbook) -> Vec<String> {
    let mut set: HashSet<String> = playbook.produces.iter().cloned().collect();
    for step in &playbook.steps {
        set.extend(step.emits.iter().cloned());
    }
    let mut out: Vec<String> = set.into_iter().collect();
    out.sort();
    out
}

fn unmet_requirements(playbook: &Playbook) -> BTreeMap<String, Vec<String>> {
    let mut emitted_so_far: HashSet<String> = HashSet::new();
    let mut out = BTreeMap::new();
    for step in &playbook.steps {
        let unmet: Vec<String> = step
            .requires_kinds
            .iter()
            .filter(|k| !emitted_so_far.contains(*k))
            .cloned()
            .collect();
        if !unmet.is_empty() {
            out.insert(step.id.clone(), unmet);
        }
        emitted_so_far.extend(step.emits.iter().cloned());
    }
    out
}

/// Resolve `playbook_id` within `pack` into an [`ExecutionPlan`] for
/// `workspace_id`. For each `tool_call` step, validates `params` against the
/// bound tool's `input_schema` when declared.
pub fn resolve_plan(
    pack: &CapabilityPack,
    playbook_id: &str,
    workspace_id: &str,
) -> Result<ExecutionPlan, CamError> {
    let playbook = pack.playbook(playbook_id).ok_or_else(|| {
        CamError::new(ErrorCode::PlaybookNotFound, format!("unknown playbook: {playbook_id}"))
            .with_context("pack_key", pack.key.clone())
    })?;

    for step in &playbook.steps {
        if let StepKind::ToolCall { binding, .. } = &step.kind {
            if let (Some(schema), Some(params)) = (&binding.input_schema, step.params.as_object()) {
                let params = serde_json::Value::Object(params.clone());
                if let Ok(validator) = jsonschema::validator_for(schema) {
                    if let Some(first) = validator.iter_errors(&params).next() {
                        return Err(CamError::new(ErrorCode::SchemaViolation, first.to_string())
                            .with_context("step_id", step.id.clone())
                            .with_context("tool_key", binding.tool_key.clone()));
                    }
                }
            }
        }
    }

    let plan_id =
        compute_plan_id(&pack.key, &pack.version, playbook_id, workspace_id, pack.updated_at);

    Ok(ExecutionPlan {
        plan_id,
        pack_key: pack.key.clone(),
        pack_version: pack.version.clone(),
        playbook_id: playbook_id.to_string(),
        workspace_id: workspace_id.to_string(),
        edges: resolve_edges(playbook),
        artifacts_contract: artifacts_contract(playbook),
        unmet_requirements: unmet_requirements(playbook),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cam_core::{OnMissing, Step};
    use std::collections::BTreeMap as Map;

    fn pack() -> CapabilityPack {
        CapabilityPack {
            key: "cobol-ingest".to_string(),
            version: "1.0.0".to_string(),
            capability_ids: vec!["cap_1".to_string()],
            capabilities: vec![],
            tools: Map::new(),
            playbooks: vec![Playbook {
                id: "pb_1".to_string(),
                name: "Ingest".to_string(),
                steps: vec![
                    Step {
                        id: "s1".to_string(),
                        kind: StepKind::Capability {
                            capability_id: "cap_1".to_string(),
                            integration: None,
                            llm_config: None,
                            tool_calls: vec![],
                        },
                        emits: vec!["cam.cobol.program".to_string()],
                        requires_kinds: vec![],
                        depends_on_steps: vec![],
                        on_missing: OnMissing::Warn,
                        params: serde_json::json!({}),
                        runtime: None,
                    },
                    Step {
                        id: "s2".to_string(),
                        kind: StepKind::Capability {
                            capability_id: "cap_1".to_string(),
                            integration: None,
                            llm_config: None,
                            tool_calls: vec![],
                        },
                        emits: vec!["cam.cobol.copybook".to_string()],
                        requires_kinds: vec!["cam.cobol.program".to_string(), "cam.jcl.job".to_string()],
                        depends_on_steps: vec![],
                        on_missing: OnMissing::Warn,
                        params: serde_json::json!({}),
                        runtime: None,
                    },
                ],
                edges: vec![],
                produces: vec!["cam.cobol.program".to_string()],
            }],
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn resolve_unknown_playbook_errors() {
        let err = resolve_plan(&pack(), "missing", "ws_1").unwrap_err();
        assert_eq!(err.code, ErrorCode::PlaybookNotFound);
    }

    #[test]
    fn plan_id_is_deterministic_for_same_inputs() {
        let p = pack();
        let a = resolve_plan(&p, "pb_1", "ws_1").unwrap();
        let b = resolve_plan(&p, "pb_1", "ws_1").unwrap();
        assert_eq!(a.plan_id, b.plan_id);
        assert!(a.plan_id.starts_with("pln_"));
    }

    #[test]
    fn plan_id_changes_with_workspace() {
        let p = pack();
        let a = resolve_plan(&p, "pb_1", "ws_1").unwrap();
        let b = resolve_plan(&p, "pb_1", "ws_2").unwrap();
        assert_ne!(a.plan_id, b.plan_id);
    }

    #[test]
    fn linear_fallback_used_when_no_explicit_edges() {
        let plan = resolve_plan(&pack(), "pb_1", "ws_1").unwrap();
        assert_eq!(plan.edges, vec![ResolvedEdge { from: 0, to: 1 }]);
    }

    #[test]
    fn artifacts_contract_unions_emits_and_produces() {
        let plan = resolve_plan(&pack(), "pb_1", "ws_1").unwrap();
        assert!(plan.artifacts_contract.contains(&"cam.cobol.program".to_string()));
        assert!(plan.artifacts_contract.contains(&"cam.cobol.copybook".to_string()));
    }

    #[test]
    fn unmet_requirements_excludes_kinds_emitted_earlier() {
        let plan = resolve_plan(&pack(), "pb_1", "ws_1").unwrap();
        let unmet = &plan.unmet_requirements["s2"];
        assert_eq!(unmet, &vec!["cam.jcl.job".to_string()]);
    }
}
