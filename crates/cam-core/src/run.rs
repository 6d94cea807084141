//! Run records: the state machine, per-step audit trail, and delta buckets
//! produced by a single orchestrator execution.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet started.
    Created,
    /// Actively executing its playbook.
    Running,
    /// Finished all steps without a hard failure.
    Completed,
    /// Stopped due to a hard step failure.
    Failed,
    /// Stopped by cancellation (operator or signal).
    Aborted,
}

impl RunStatus {
    /// True once the run has reached a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Aborted)
    }
}

/// Whether a run computes deltas against the full workspace baseline or just
/// incrementally against the prior run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStrategy {
    /// Upsert the full produced set into the Artifact Store on completion.
    Baseline,
    /// Compute deltas only; caller decides whether/how to promote them.
    Delta,
}

/// Caller-supplied run behavior overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Continue a step past a partial `emits` shortfall instead of failing it.
    #[serde(default)]
    pub allow_partial_step_failures: bool,
    /// Per-tool-call timeout override, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_timeout_sec: Option<u64>,
    /// Per-tool-call retry count override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_retries: Option<u32>,
    /// Restrict execution to this subset of step ids, in declared order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_steps: Option<Vec<String>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            allow_partial_step_failures: false,
            tool_timeout_sec: None,
            tool_retries: None,
            only_steps: None,
        }
    }
}

/// A validated artifact produced during a run, before it is merged into the
/// workspace aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEnvelope {
    /// Kind id the artifact conforms to.
    pub kind: String,
    /// Schema version it was validated against.
    pub schema_version: String,
    /// Computed natural key / identity.
    pub identity: String,
    /// Schema-conformant payload.
    pub data: serde_json::Value,
    /// Provenance of the producing step.
    pub provenance: crate::artifact::Provenance,
}

/// Outcome of a single tool invocation within a step, for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallAudit {
    /// Tool name as declared in the integration snapshot.
    pub tool: String,
    /// Wall-clock duration of the call.
    pub duration_ms: u64,
    /// Number of artifacts this call contributed.
    pub produced_count: usize,
    /// Error message, present only on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The audit record for one executed playbook step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAudit {
    /// Step id from the playbook.
    pub step_id: String,
    /// Capability id this step executed, if in capability mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
    /// Execution mode: `tool_call`, `capability`, or `llm`.
    pub mode: String,
    /// Redacted preview of the inputs passed into the step.
    pub inputs_preview: serde_json::Value,
    /// Per-tool-call outcomes for this step.
    #[serde(default)]
    pub calls: Vec<ToolCallAudit>,
}

/// Artifacts produced by a run, grouped by kind.
pub type ProducedArtifacts = BTreeMap<String, Vec<ArtifactEnvelope>>;

/// Classification of one kind's artifacts against the workspace baseline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltaBuckets {
    /// Natural keys newly produced this run with no prior baseline artifact.
    #[serde(default)]
    pub added: Vec<String>,
    /// Natural keys whose content changed from the baseline.
    #[serde(default)]
    pub changed: Vec<String>,
    /// Natural keys produced again with identical content.
    #[serde(default)]
    pub unchanged: Vec<String>,
    /// Natural keys present in the baseline but not reproduced this run.
    #[serde(default)]
    pub removed: Vec<String>,
}

impl DeltaBuckets {
    /// Total number of natural keys classified across all buckets.
    #[must_use]
    pub fn total(&self) -> usize {
        self.added.len() + self.changed.len() + self.unchanged.len() + self.removed.len()
    }
}

/// Timing and log summary of a completed or aborted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// When the run transitioned out of `created`.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in seconds, set once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
    /// Human-readable log lines accumulated during execution.
    #[serde(default)]
    pub logs: Vec<String>,
}

/// A single orchestrated execution of a playbook against a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier.
    pub run_id: String,
    /// Workspace this run executes against.
    pub workspace_id: String,
    /// Capability pack key this run's playbook was resolved from.
    pub pack_id: String,
    /// Playbook id executed.
    pub playbook_id: String,
    /// Baseline or delta execution strategy.
    pub strategy: RunStrategy,
    /// Raw inputs passed to this run (source refs, manual supplements, ...).
    pub inputs: serde_json::Value,
    /// `sha256(canonical_json(inputs))`.
    pub input_fingerprint: String,
    /// Behavior overrides for this run.
    #[serde(default)]
    pub options: RunOptions,
    /// Current lifecycle state.
    pub status: RunStatus,
    /// Artifacts produced this run, grouped by kind.
    #[serde(default)]
    pub produced: ProducedArtifacts,
    /// Diff buckets per kind against the workspace baseline.
    #[serde(default)]
    pub diffs_by_kind: BTreeMap<String, DeltaBuckets>,
    /// Per-step execution audit trail, in execution order.
    #[serde(default)]
    pub audit: Vec<StepAudit>,
    /// Free-text run notes rendered as markdown, including the counts footer.
    #[serde(default)]
    pub notes_md: String,
    /// Timing and log summary.
    pub run_summary: RunSummary,
}

impl Run {
    /// Total count of artifacts produced across all kinds.
    #[must_use]
    pub fn produced_count(&self) -> usize {
        self.produced.values().map(Vec::len).sum()
    }

    /// True if every declared kind's diff buckets fully account for its
    /// produced and baseline artifacts (a basic self-consistency check, not
    /// a cross-run invariant).
    #[must_use]
    pub fn has_diffs(&self) -> bool {
        !self.diffs_by_kind.is_empty()
    }
}

/// Convenience alias kept for call sites that only care about the produced
/// artifact list, independent of the surrounding run.
pub type ProducedKindMap = ProducedArtifacts;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run() -> Run {
        Run {
            run_id: "run_1".to_string(),
            workspace_id: "ws_1".to_string(),
            pack_id: "pack_1".to_string(),
            playbook_id: "pb_1".to_string(),
            strategy: RunStrategy::Baseline,
            inputs: serde_json::json!({}),
            input_fingerprint: "fp".to_string(),
            options: RunOptions::default(),
            status: RunStatus::Created,
            produced: BTreeMap::new(),
            diffs_by_kind: BTreeMap::new(),
            audit: vec![],
            notes_md: String::new(),
            run_summary: RunSummary {
                started_at: Utc::now(),
                completed_at: None,
                duration_s: None,
                logs: vec![],
            },
        }
    }

    #[test]
    fn run_status_terminal_states() {
        assert!(!RunStatus::Created.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Aborted.is_terminal());
    }

    #[test]
    fn produced_count_sums_across_kinds() {
        let mut run = sample_run();
        run.produced.insert(
            "cam.cobol.program".to_string(),
            vec![ArtifactEnvelope {
                kind: "cam.cobol.program".to_string(),
                schema_version: "1.0.0".to_string(),
                identity: "cam.cobol.program:payroll01".to_string(),
                data: serde_json::json!({}),
                provenance: crate::artifact::Provenance::default(),
            }],
        );
        assert_eq!(run.produced_count(), 1);
    }

    #[test]
    fn delta_buckets_total_counts_everything() {
        let mut buckets = DeltaBuckets::default();
        buckets.added.push("a".to_string());
        buckets.changed.push("b".to_string());
        buckets.unchanged.push("c".to_string());
        buckets.removed.push("d".to_string());
        assert_eq!(buckets.total(), 4);
    }

    #[test]
    fn run_options_default_disallows_partial_failures() {
        assert!(!RunOptions::default().allow_partial_step_failures);
    }
}
