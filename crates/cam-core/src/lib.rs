//! Stable contract types shared by every component of the platform: kinds,
//! artifacts, workspace aggregates, runs, and the read-only capability pack
//! model. Nothing in this crate talks to storage, HTTP, or a process; it only
//! defines shapes and the canonicalization rules used to fingerprint them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod kind;
pub mod artifact;
pub mod workspace;
pub mod run;
pub mod pack;

pub use artifact::{Artifact, DiagramInstruction, Lineage, Provenance};
pub use kind::{
    AdapterStep, DependsOn, DiagramRecipe, IdentityRule, Kind, KindStatus, PromptSpec,
    PromptVariant, RegistryMeta, SchemaVersionEntry,
};
pub use pack::{
    AuthRef, Capability, CapabilityPack, Edge, IntegrationSnapshot, OnMissing, Playbook,
    RetryPolicy, Step, StepKind,
};
pub use run::{
    DeltaBuckets, ProducedArtifacts, Run, RunOptions, RunStatus, RunStrategy, RunSummary,
    StepAudit, ToolCallAudit,
};
pub use workspace::{InputsBaseline, WorkspaceAggregate};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Contract version this crate implements; bump on any breaking shape change.
pub const CONTRACT_VERSION: &str = "1.0.0";

/// Default cap on context artifacts pulled in per kind when preparing a step.
pub const DEFAULT_CONTEXT_CAP_PER_KIND: usize = 25;

/// Default bound on migration hops before giving up with `MigrationStalled`.
pub const DEFAULT_MIGRATION_HOP_LIMIT: usize = 50;

/// Serialize `value` to a canonical JSON string: object keys sorted, no
/// insignificant whitespace. `serde_json::Map` is BTreeMap-backed unless the
/// `preserve_order` feature is enabled anywhere in the dependency graph, so a
/// plain round-trip through `Value` is sufficient to get deterministic key
/// order.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, cam_error::CamError> {
    let v = serde_json::to_value(value).map_err(|e| {
        cam_error::CamError::new(cam_error::ErrorCode::Internal, "failed to serialize value")
            .with_source(e)
    })?;
    serde_json::to_string(&v).map_err(|e| {
        cam_error::CamError::new(cam_error::ErrorCode::Internal, "failed to encode canonical json")
            .with_source(e)
    })
}

/// Hex-encoded SHA-256 digest of raw bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// `fingerprint = sha256(canonical_json(data))`, per the data model's
/// identity rules for artifacts and diagrams alike.
pub fn fingerprint<T: Serialize>(data: &T) -> Result<String, cam_error::CamError> {
    let canon = canonical_json(data)?;
    Ok(sha256_hex(canon.as_bytes()))
}

/// Lowercased `kind:name` fallback identity when a kind declares no identity
/// rule, or the declared rule's paths are absent from `data`.
#[must_use]
pub fn fallback_natural_key(kind: &str, name: &str) -> String {
    format!("{kind}:{name}").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": 2});
        let s = canonical_json(&a).unwrap();
        assert_eq!(s, r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonical_json_is_stable_across_field_order() {
        let a = json!({"name": "x", "kind": "y"});
        let b = json!({"kind": "y", "name": "x"});
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let a = json!({"value": 1});
        let b = json!({"value": 2});
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = json!({"value": 1, "nested": {"z": 1, "a": 2}});
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&a).unwrap());
    }

    #[test]
    fn sha256_hex_matches_known_digest() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
    }

    #[test]
    fn fallback_natural_key_lowercases() {
        assert_eq!(fallback_natural_key("Cam.Cobol.Program", "MyProg"), "cam.cobol.program:myprog");
    }
}
