//! Read-only capability pack types: capabilities, integrations, playbooks,
//! and the steps/edges that make up a playbook's step DAG. These are
//! authored and published by the capability registry; core only defines
//! their shape.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do when a step's `requires_kinds` are not satisfied by prior
/// steps in the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnMissing {
    /// Hard stop the run.
    Fail,
    /// Drop the step, continue the run.
    Skip,
    /// Run the step anyway, record a warning.
    Warn,
}

/// A reference to a named secret/credential resolved out-of-band (e.g. from
/// an environment alias or secret store); never holds the raw value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRef {
    /// Alias name the runtime resolves at invocation time.
    pub alias: String,
}

/// Retry policy attached to an HTTP integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial call.
    pub max_retries: u32,
    /// Base delay in milliseconds; backoff is `base * 2^n`.
    pub backoff_base_ms: u64,
}

/// A connector's transport-specific configuration, embedded into capability
/// snapshots at publish time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum IntegrationSnapshot {
    /// A JSON-over-HTTP MCP server.
    Http {
        /// Base URL the invoker prefixes tool paths onto.
        base_url: String,
        /// Static headers sent with every request.
        #[serde(default)]
        headers: BTreeMap<String, String>,
        /// Auth alias refs resolved into header/query values at call time.
        #[serde(default)]
        auth: Vec<AuthRef>,
        /// Per-call timeout.
        #[serde(with = "duration_secs")]
        timeout: Duration,
        /// Retry policy for transient failures.
        retry: RetryPolicy,
    },
    /// A persistent STDIO JSON-RPC MCP server.
    Stdio {
        /// Executable to launch.
        command: String,
        /// Arguments passed to the executable.
        #[serde(default)]
        args: Vec<String>,
        /// Working directory for the child process.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        /// Literal environment variables set on the child.
        #[serde(default)]
        env: BTreeMap<String, String>,
        /// Environment variables resolved from auth aliases.
        #[serde(default)]
        env_aliases: BTreeMap<String, String>,
        /// Regex matched against stdout/stderr to detect readiness.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        readiness_regex: Option<String>,
        /// Grace period after closing stdin before SIGKILL.
        #[serde(with = "duration_secs")]
        kill_timeout: Duration,
        /// Whether to relaunch the child if it exits unexpectedly.
        #[serde(default)]
        restart_on_exit: bool,
    },
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// A single call to a named tool bound to an integration, used by both
/// `tool_call` steps and capability-backed `tool_calls`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolBinding {
    /// Tool key as declared in `pack.tools`.
    pub tool_key: String,
    /// Tool name as exposed by the MCP server.
    pub tool_name: String,
    /// JSON Schema the tool's `params` must satisfy, if declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    /// Resolved integration for this call; absent until resolve time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<IntegrationSnapshot>,
}

/// The execution mode of a playbook step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Invoke a capability, optionally bound to an integration or LLM config.
    Capability {
        /// Capability id, must exist in `pack.capability_ids`.
        capability_id: String,
        /// Integration snapshot bound to this capability, if tool-backed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        integration: Option<IntegrationSnapshot>,
        /// LLM configuration, if this capability is model-backed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        llm_config: Option<serde_json::Value>,
        /// Tool calls bound to this capability in MCP mode.
        #[serde(default)]
        tool_calls: Vec<ToolBinding>,
    },
    /// Invoke a single named tool directly.
    ToolCall {
        /// Tool key, must exist in `pack.tools`.
        tool_key: String,
        /// Resolved binding for the call.
        binding: ToolBinding,
    },
}

/// One node in a playbook's step DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step id, unique within the playbook.
    pub id: String,
    /// Execution mode.
    #[serde(flatten)]
    pub kind: StepKind,
    /// Kinds this step may produce.
    #[serde(default)]
    pub emits: Vec<String>,
    /// Kinds this step expects to already be present from prior steps.
    #[serde(default)]
    pub requires_kinds: Vec<String>,
    /// Step ids that must execute before this one.
    #[serde(default)]
    pub depends_on_steps: Vec<String>,
    /// Behavior when `requires_kinds` are unmet.
    #[serde(default = "default_on_missing")]
    pub on_missing: OnMissing,
    /// Free-form parameters passed into context preparation and tool calls.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Optional per-step runtime overrides (timeout/retries), frozen as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<serde_json::Value>,
}

fn default_on_missing() -> OnMissing {
    OnMissing::Warn
}

/// An explicit ordering edge between two steps, used in place of the linear
/// fallback when a playbook's DAG is non-linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Upstream step id.
    pub from: usize,
    /// Downstream step id that depends on `from`.
    pub to: usize,
}

/// A capability, frozen into a pack snapshot at publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Globally addressable capability id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Kinds this capability can produce.
    #[serde(default)]
    pub produces_kinds: Vec<String>,
    /// Kinds this capability expects as input.
    #[serde(default)]
    pub requires_kinds: Vec<String>,
}

/// A named sequence of steps producing a declared set of kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    /// Playbook id, unique within its pack.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Steps in declaration order (not necessarily execution order).
    pub steps: Vec<Step>,
    /// Explicit ordering edges; empty means the linear fallback applies.
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Kinds this playbook is declared to produce overall.
    #[serde(default)]
    pub produces: Vec<String>,
}

/// A versioned, publishable bundle of capabilities, tools, and playbooks.
/// Read-only from the orchestrator's perspective: packs are authored and
/// validated by the capability registry, then consumed as frozen snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityPack {
    /// Pack key, unique among packs (paired with `version`).
    pub key: String,
    /// Pack version (semver).
    pub version: String,
    /// Capability ids this pack declares as available.
    #[serde(default)]
    pub capability_ids: Vec<String>,
    /// Frozen capability snapshots as of publish time.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Tool bindings keyed by `tool_key`, available to `tool_call` steps.
    #[serde(default)]
    pub tools: BTreeMap<String, ToolBinding>,
    /// Playbooks this pack exposes.
    #[serde(default)]
    pub playbooks: Vec<Playbook>,
    /// Timestamp of this pack version's publication, used in plan id derivation.
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl CapabilityPack {
    /// The playbook matching `playbook_id`, if present.
    #[must_use]
    pub fn playbook(&self, playbook_id: &str) -> Option<&Playbook> {
        self.playbooks.iter().find(|p| p.id == playbook_id)
    }
}
