//! The workspace aggregate: the per-workspace document that embeds the full
//! artifact list and the inputs baseline runs diff against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;

/// The frozen set of raw inputs (source repos, uploaded documents, manual
/// supplements) a workspace's runs are measured against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputsBaseline {
    /// Arbitrary baseline payload; shape is owned by the capability packs
    /// that interpret it (source repo refs, upload manifests, etc).
    #[serde(default)]
    pub data: serde_json::Value,
    /// `sha256(canonical_json(data))`.
    pub fingerprint: String,
    /// Monotonically increasing version, bumped on every baseline change.
    pub version: u64,
}

/// The per-workspace aggregate document: a denormalized workspace snapshot,
/// its embedded artifact list, and baseline bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceAggregate {
    /// Unique workspace identifier.
    pub workspace_id: String,
    /// Denormalized workspace snapshot (name, owner, repo refs, ...), owned
    /// by the caller; stored opaquely here.
    pub workspace: serde_json::Value,
    /// All artifacts ever produced for this workspace, including soft-deleted ones.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// Current inputs baseline, if one has been set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs_baseline: Option<InputsBaseline>,
    /// Most recent run whose output was promoted into this workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_promoted_run_id: Option<String>,
    /// Creation timestamp of the aggregate document.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp of the aggregate document.
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceAggregate {
    /// Construct an empty aggregate for a freshly created workspace.
    #[must_use]
    pub fn new(workspace_id: impl Into<String>, workspace_snapshot: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            workspace_id: workspace_id.into(),
            workspace: workspace_snapshot,
            artifacts: Vec::new(),
            inputs_baseline: None,
            last_promoted_run_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The live (non-deleted) artifact matching `natural_key`, if any.
    #[must_use]
    pub fn find_live_by_natural_key(&self, natural_key: &str) -> Option<&Artifact> {
        self.artifacts
            .iter()
            .find(|a| a.is_live() && a.natural_key == natural_key)
    }

    /// Mutable access to the live artifact matching `natural_key`, if any.
    pub fn find_live_by_natural_key_mut(&mut self, natural_key: &str) -> Option<&mut Artifact> {
        self.artifacts
            .iter_mut()
            .find(|a| a.is_live() && a.natural_key == natural_key)
    }

    /// The artifact matching `artifact_id`, live or not.
    #[must_use]
    pub fn find_by_id(&self, artifact_id: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.artifact_id == artifact_id)
    }

    /// All live artifacts of a given kind.
    pub fn live_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Artifact> {
        self.artifacts.iter().filter(move |a| a.is_live() && a.kind == kind)
    }
}
