//! Write-time validation for capability packs: referential integrity between
//! steps, capability ids, tool keys, and local step dependencies.

use std::collections::HashSet;

use cam_core::{CapabilityPack, StepKind};
use cam_error::{CamError, ErrorCode};

/// Validate a pack's internal referential integrity before it is published.
/// Does not call out to the kind registry; callers are expected to also
/// check `produces_kinds`/`requires_kinds` against it separately via
/// `kinds/exists`.
pub fn validate_pack(pack: &CapabilityPack) -> Result<(), CamError> {
    let capability_ids: HashSet<&str> = pack.capability_ids.iter().map(String::as_str).collect();
    let tool_keys: HashSet<&str> = pack.tools.keys().map(String::as_str).collect();

    for playbook in &pack.playbooks {
        let step_ids: HashSet<&str> = playbook.steps.iter().map(|s| s.id.as_str()).collect();
        if step_ids.len() != playbook.steps.len() {
            return Err(CamError::new(ErrorCode::Conflict, "duplicate step id in playbook")
                .with_context("pack_key", pack.key.clone())
                .with_context("playbook_id", playbook.id.clone()));
        }

        for step in &playbook.steps {
            match &step.kind {
                StepKind::Capability { capability_id, .. } => {
                    if !capability_ids.contains(capability_id.as_str()) {
                        return Err(CamError::new(
                            ErrorCode::UnknownCapability,
                            format!("step references unknown capability: {capability_id}"),
                        )
                        .with_context("pack_key", pack.key.clone())
                        .with_context("step_id", step.id.clone()));
                    }
                }
                StepKind::ToolCall { tool_key, .. } => {
                    if !tool_keys.contains(tool_key.as_str()) {
                        return Err(CamError::new(
                            ErrorCode::ToolUnknown,
                            format!("step references unknown tool: {tool_key}"),
                        )
                        .with_context("pack_key", pack.key.clone())
                        .with_context("step_id", step.id.clone()));
                    }
                }
            }

            let mut seen = HashSet::new();
            for dep in &step.depends_on_steps {
                if !step_ids.contains(dep.as_str()) {
                    return Err(CamError::new(
                        ErrorCode::InvalidParams,
                        format!("step depends on unknown step id: {dep}"),
                    )
                    .with_context("pack_key", pack.key.clone())
                    .with_context("step_id", step.id.clone()));
                }
                if !seen.insert(dep.as_str()) {
                    return Err(CamError::new(
                        ErrorCode::InvalidParams,
                        format!("duplicate depends_on_steps entry: {dep}"),
                    )
                    .with_context("step_id", step.id.clone()));
                }
            }
        }

        for edge in &playbook.edges {
            if edge.from >= playbook.steps.len() || edge.to >= playbook.steps.len() {
                return Err(CamError::new(ErrorCode::InvalidParams, "edge references out-of-range step index")
                    .with_context("playbook_id", playbook.id.clone()));
            }
        }
    }

    Ok(())
}
