//! Capability registry validation and the plan resolver: turns capability
//! packs into validated, addressable playbooks and materializes concrete
//! execution plans for the Run Orchestrator.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod plan;
pub mod validate;

pub use plan::{resolve_plan, ExecutionPlan, ResolvedEdge};
pub use validate::validate_pack;

use std::collections::HashSet;

use cam_core::Capability;
use cam_error::{CamError, ErrorCode};

/// Validate that every kind a capability declares in `produces_kinds` or
/// `requires_kinds` exists, per a bulk `kinds/exists` check supplied by the
/// caller (typically backed by `cam-registry`'s `resolve_kind`).
pub fn validate_capability_kinds(
    capability: &Capability,
    known_kinds: &HashSet<String>,
) -> Result<(), CamError> {
    for kind in capability.produces_kinds.iter().chain(capability.requires_kinds.iter()) {
        if !known_kinds.contains(kind) {
            return Err(CamError::new(ErrorCode::UnknownKind, format!("unknown kind: {kind}"))
                .with_context("capability_id", capability.id.clone())
                .with_context("kind", kind.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_capability_with_unknown_produced_kind() {
        let cap = Capability {
            id: "cap_1".to_string(),
            name: "Parse".to_string(),
            produces_kinds: vec!["cam.unknown.kind".to_string()],
            requires_kinds: vec![],
        };
        let known = HashSet::from(["cam.cobol.program".to_string()]);
        let err = validate_capability_kinds(&cap, &known).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownKind);
    }

    #[test]
    fn accepts_capability_with_known_kinds() {
        let cap = Capability {
            id: "cap_1".to_string(),
            name: "Parse".to_string(),
            produces_kinds: vec!["cam.cobol.program".to_string()],
            requires_kinds: vec![],
        };
        let known = HashSet::from(["cam.cobol.program".to_string()]);
        assert!(validate_capability_kinds(&cap, &known).is_ok());
    }
}
