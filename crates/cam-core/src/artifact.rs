//! The artifact record embedded in a workspace aggregate, along with its
//! lineage and provenance metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A rendering instruction attached to an artifact: the recipe used and the
/// Mermaid text it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramInstruction {
    /// Recipe id this diagram was rendered from.
    pub id: String,
    /// View name, mirrored from the recipe.
    pub view: String,
    /// Diagram language, normally `mermaid`.
    pub language: String,
    /// Rendered diagram body (possibly chunked upstream; this is one chunk).
    pub instructions: String,
}

/// Where an artifact came from: which run, playbook, and (if applicable)
/// model produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Run that last touched this artifact.
    pub run_id: String,
    /// Playbook executed by that run.
    pub playbook_id: String,
    /// Model identifier, present for LLM-produced artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Playbook step id that produced this artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Capability pack key, if produced via a pack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_key: Option<String>,
    /// Capability pack version, if produced via a pack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_version: Option<String>,
    /// Fingerprint of the inputs baseline in effect when this was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs_fingerprint: Option<String>,
    /// Human author, for manually authored or edited artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Agent identifier, for agent-authored artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Free-text reason, typically set on manual overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Source repository this artifact was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repo: Option<String>,
    /// Source ref (branch or tag) the run checked out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    /// Source commit SHA the run checked out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_commit: Option<String>,
}

/// Tracks an artifact's identity continuity across runs and supersession.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    /// Run that first produced this natural key.
    pub first_seen_run_id: String,
    /// Most recent run that observed this natural key, whether or not it changed.
    pub last_seen_run_id: String,
    /// Artifact ids this one explicitly supersedes.
    #[serde(default)]
    pub supersedes: Vec<String>,
    /// Artifact id that superseded this one, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
}

/// A single produced artifact, embedded in its workspace aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Opaque identifier, stable across versions, new on each natural-key re-insert.
    pub artifact_id: String,
    /// Kind id this artifact conforms to.
    pub kind: String,
    /// Human-readable name, participates in the fallback identity rule.
    pub name: String,
    /// Computed natural key within its workspace.
    pub natural_key: String,
    /// Schema-conformant payload.
    pub data: serde_json::Value,
    /// `sha256(canonical_json(data))`.
    pub fingerprint: String,
    /// Rendered diagrams, if any were generated for this artifact.
    #[serde(default)]
    pub diagrams: Vec<DiagramInstruction>,
    /// `sha256(canonical_json(diagrams))`, present only when `diagrams` is non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_fingerprint: Option<String>,
    /// Monotonically increasing version, starts at 1, bumps on content changes.
    pub version: u64,
    /// Lineage across runs and supersession.
    pub lineage: Lineage,
    /// Provenance of the producing run.
    pub provenance: Provenance,
    /// Insert timestamp.
    pub created_at: DateTime<Utc>,
    /// Last content-bearing or touch timestamp.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete tombstone timestamp; `None` while live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Artifact {
    /// True while this artifact has not been soft-deleted.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}
