// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run Orchestrator (§4.4): resolves a capability pack's playbook into an
//! [`cam_capability::ExecutionPlan`] and drives it step by step — preparing
//! context, invoking tools or LLM-backed capabilities, validating and
//! diagramming produced data, gating on missing `emits`, and upserting into
//! the Artifact Store — while streaming [`RunEvent`]s to live subscribers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Renders a kind's diagram recipes into Mermaid instructions.
pub mod diagram;
/// Broadcast-based event bus for decoupled event distribution.
pub mod bus;
/// Cancellation primitives for runtime runs.
pub mod cancel;
/// Lifecycle hooks for runtime extensibility.
pub mod hooks;
/// Observability primitives: tracing spans and runtime observer.
pub mod observe;
/// In-memory catalog of published capability packs.
pub mod registry;
/// Retry policies shared with the MCP Invoker.
pub mod retry;
/// In-memory persistence of run records.
pub mod store;
/// Telemetry and metrics collection.
pub mod telemetry;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use cam_capability::{resolve_plan, ExecutionPlan, ResolvedEdge};
use cam_core::pack::ToolBinding;
use cam_core::run::ArtifactEnvelope;
use cam_core::{
    fallback_natural_key, fingerprint, CapabilityPack, DeltaBuckets, DiagramInstruction,
    IdentityRule, IntegrationSnapshot, OnMissing, Provenance, Run, RunOptions, RunStatus,
    RunStrategy, RunSummary, Step, StepAudit, StepKind, ToolCallAudit,
};
use cam_error::{CamError, ErrorCode};
use cam_invoker::{RetryConfig, StdioProcess};
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

pub use bus::{EventBus, EventBusStats, EventSubscription, FilteredSubscription};
pub use cancel::{CancellableRun, CancellationReason, CancellationToken};
pub use hooks::{HookRegistry, LifecycleHook, LoggingHook, MetricsHook, ValidationHook};
pub use observe::{ObservabilitySummary, RuntimeObserver, Span, SpanStatus, TraceCollector};
pub use registry::PackCatalog;
pub use store::{RunStore, SharedRunStore};
pub use telemetry::{MetricsSnapshot, RunMetrics};

/// Default capacity of a run's in-process event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// RunEvent
// ---------------------------------------------------------------------------

/// A single lifecycle or progress event emitted while a run executes,
/// broadcast to the [`EventBus`] and streamed to the caller of
/// [`Orchestrator::start_run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Run this event belongs to.
    pub run_id: String,
    /// When the event was emitted.
    pub ts: chrono::DateTime<Utc>,
    /// The event payload.
    #[serde(flatten)]
    pub kind: RunEventKind,
}

/// The distinct moments an [`Orchestrator`] reports during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEventKind {
    /// The run transitioned from `created` to `running`.
    RunStarted,
    /// A step began executing.
    StepStarted {
        /// Step id from the playbook.
        step_id: String,
    },
    /// A step finished executing (regardless of whether it produced anything).
    StepCompleted {
        /// Step id from the playbook.
        step_id: String,
        /// Number of artifacts validated and upserted from this step.
        produced_count: usize,
    },
    /// A step raised a hard failure, aborting the run.
    StepFailed {
        /// Step id from the playbook.
        step_id: String,
        /// Human-readable error message.
        error: String,
    },
    /// One artifact was validated and upserted into the workspace.
    ArtifactProduced {
        /// Kind id of the produced artifact.
        kind: String,
        /// Computed natural key / identity.
        identity: String,
    },
    /// The run reached a terminal state.
    RunCompleted {
        /// Final status (`Completed`, `Failed`, or `Aborted`).
        status: RunStatus,
    },
    /// The run failed before reaching a step boundary (e.g. plan resolution).
    RunFailed {
        /// Human-readable error message.
        error: String,
    },
}

// ---------------------------------------------------------------------------
// RuntimeError
// ---------------------------------------------------------------------------

/// Errors raised while starting or executing a run.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The run was cancelled before reaching a terminal state.
    #[error("run cancelled")]
    Cancelled,
    /// A step raised a hard failure and `allow_partial_step_failures` did not
    /// cover it.
    #[error("step {step_id} failed: {source}")]
    StepFailed {
        /// The step that failed.
        step_id: String,
        /// Underlying cause.
        #[source]
        source: CamError,
    },
    /// A step's `on_missing: fail` requirement, or a non-partial `emits`
    /// shortfall, was not satisfied.
    #[error("step {step_id} gate failed, missing kinds: {missing:?}")]
    GateFailed {
        /// The step whose gate failed.
        step_id: String,
        /// Kinds that were required/expected but not produced.
        missing: Vec<String>,
    },
    /// A registered [`LifecycleHook`] rejected the run before it started.
    #[error("lifecycle hook rejected run: {0}")]
    HookRejected(String),
    /// Any other upstream failure (unknown pack, unknown workspace, plan
    /// resolution, ...).
    #[error(transparent)]
    Upstream(#[from] CamError),
}

impl RuntimeError {
    /// Map this error onto the platform's stable [`ErrorCode`] taxonomy.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RuntimeError::Cancelled => ErrorCode::RunCancelled,
            RuntimeError::StepFailed { source, .. } => source.code,
            RuntimeError::GateFailed { .. } => ErrorCode::StepGateFailed,
            RuntimeError::HookRejected(_) => ErrorCode::InvalidParams,
            RuntimeError::Upstream(e) => e.code,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// The Run Orchestrator: holds shared handles to every collaborating
/// component and drives runs to completion.
///
/// Cheaply cloneable — every field is either an `Arc`, a `reqwest::Client`
/// (itself an `Arc`-backed handle), or the broadcast-based [`EventBus`].
/// Cloning and moving it into a spawned task is the intended way to run a
/// playbook in the background while the constructing handle keeps its own
/// copy to serve other requests.
#[derive(Clone)]
pub struct Orchestrator {
    packs: Arc<PackCatalog>,
    kinds: Arc<cam_registry::KindRegistry>,
    store: Arc<cam_store::ArtifactStore>,
    runs: Arc<RunStore>,
    client: Client,
    bus: EventBus,
    hooks: Arc<RwLock<HookRegistry>>,
    metrics: Arc<RunMetrics>,
    publisher: Option<Arc<cam_events::EventPublisher>>,
    cancel_tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl Orchestrator {
    /// Build an orchestrator from its collaborating components.
    #[must_use]
    pub fn new(
        packs: Arc<PackCatalog>,
        kinds: Arc<cam_registry::KindRegistry>,
        store: Arc<cam_store::ArtifactStore>,
        runs: Arc<RunStore>,
    ) -> Self {
        let mut hooks = HookRegistry::new();
        let metrics = Arc::new(RunMetrics::new());
        hooks.register(Box::new(ValidationHook));
        hooks.register(Box::new(LoggingHook));
        hooks.register(Box::new(MetricsHook::new(Arc::clone(&metrics))));
        Self {
            packs,
            kinds,
            store,
            runs,
            client: Client::new(),
            bus: EventBus::new(),
            hooks: Arc::new(RwLock::new(hooks)),
            metrics,
            publisher: None,
            cancel_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Attach an [`cam_events::EventPublisher`] so run/artifact lifecycle
    /// events are also durably published to the AMQP exchange.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<cam_events::EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Register an additional lifecycle hook.
    pub async fn register_hook(&self, hook: Box<dyn LifecycleHook + Send + Sync>) {
        self.hooks.write().await.register(hook);
    }

    /// Subscribe to the in-process event bus (all runs).
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    /// Subscribe to the in-process event bus, filtered to a single run.
    #[must_use]
    pub fn subscribe_to_run(&self, run_id: impl Into<String>) -> FilteredSubscription {
        let run_id = run_id.into();
        self.bus.subscribe_filtered(Box::new(move |ev: &RunEvent| ev.run_id == run_id))
    }

    /// Point-in-time metrics snapshot across every run this orchestrator has
    /// executed.
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Shared run record store.
    #[must_use]
    pub fn runs(&self) -> &RunStore {
        &self.runs
    }

    /// Request cancellation of an in-flight run by id.
    ///
    /// Takes effect at the next step boundary, same as calling `cancel()` on
    /// the `RunHandle` returned by [`Self::start_run`] directly. Returns
    /// `NotFound` if the run has already finished or never existed — its
    /// token is removed from the registry as soon as it completes.
    ///
    /// # Errors
    ///
    /// Returns `CamError` with `ErrorCode::NotFound` if no in-flight run
    /// with this id is tracked.
    pub async fn cancel_run(&self, run_id: &str) -> Result<(), CamError> {
        let tokens = self.cancel_tokens.read().await;
        match tokens.get(run_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(CamError::new(ErrorCode::NotFound, "run is not in flight")
                .with_context("run_id", run_id)),
        }
    }

    /// Resolve a pack/playbook/workspace triple and spawn its execution,
    /// returning a handle the caller can await, stream events from, or
    /// cancel.
    ///
    /// # Errors
    ///
    /// Returns before spawning if the pack, playbook, or workspace is
    /// unknown, plan resolution fails (e.g. a `tool_call` step's `params`
    /// violate its bound schema), or a registered hook rejects the run.
    pub async fn start_run(
        &self,
        workspace_id: String,
        pack_key: String,
        pack_version: Option<String>,
        playbook_id: String,
        inputs: Value,
        strategy: RunStrategy,
        options: RunOptions,
    ) -> Result<RunHandle, RuntimeError> {
        let pack = self.packs.get(&pack_key, pack_version.as_deref()).await?;
        let plan = resolve_plan(&pack, &playbook_id, &workspace_id)?;
        self.store.get_parent_doc(&workspace_id).await?;

        let input_fingerprint = fingerprint(&inputs).unwrap_or_default();
        let run_id = format!("run_{}", Uuid::new_v4().simple());
        let run = Run {
            run_id: run_id.clone(),
            workspace_id,
            pack_id: pack.key.clone(),
            playbook_id,
            strategy,
            inputs,
            input_fingerprint,
            options,
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
        };

        for result in self.hooks.read().await.fire_run_start(&run) {
            if let Err(e) = result {
                return Err(RuntimeError::HookRejected(e.to_string()));
            }
        }

        self.runs.save(run.clone()).await;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        self.cancel_tokens.write().await.insert(run_id.clone(), cancel.clone());
        let orchestrator = self.clone();
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            orchestrator.drive(run, plan, pack, tx, task_cancel).await
        });

        Ok(RunHandle { run_id, events: ReceiverStream::new(rx), cancel, join })
    }

    async fn emit(&self, tx: &mpsc::Sender<RunEvent>, run_id: &str, kind: RunEventKind) {
        let event = RunEvent { run_id: run_id.to_string(), ts: Utc::now(), kind };
        for result in self.hooks.read().await.fire_event(&event) {
            if let Err(e) = result {
                tracing::debug!(target: "cam.runtime", error = %e, "hook rejected event, ignoring");
            }
        }
        self.bus.publish(event.clone());
        let _ = tx.send(event).await;
    }

    /// Drive one run's playbook to completion. Runs entirely inside the
    /// spawned task owned by the [`RunHandle`] returned from `start_run`.
    async fn drive(
        self,
        mut run: Run,
        plan: ExecutionPlan,
        pack: Arc<CapabilityPack>,
        tx: mpsc::Sender<RunEvent>,
        cancel: CancellationToken,
    ) -> Result<Run, RuntimeError> {
        let start = Instant::now();
        run.status = RunStatus::Running;
        self.runs.save(run.clone()).await;
        self.emit(&tx, &run.run_id, RunEventKind::RunStarted).await;

        let mut diagrams: HashMap<(String, String), Vec<DiagramInstruction>> = HashMap::new();
        let outcome = self.execute_steps(&mut run, &plan, &pack, &tx, &cancel, &mut diagrams).await;

        let (status, failure) = match outcome {
            Ok(()) if cancel.is_cancelled() => (RunStatus::Aborted, Some(RuntimeError::Cancelled)),
            Ok(()) => (RunStatus::Completed, None),
            Err(e) => (RunStatus::Failed, Some(e)),
        };
        run.status = status;

        if let Err(e) = self.finalize(&mut run, &plan, &pack, &diagrams).await {
            tracing::warn!(target: "cam.runtime", run_id = %run.run_id, error = %e, "finalize upsert failed");
            run.run_summary.logs.push(format!("finalize error: {e}"));
        }

        let duration_s = start.elapsed().as_secs_f64();
        run.run_summary.completed_at = Some(Utc::now());
        run.run_summary.duration_s = Some(duration_s);
        run.notes_md = render_notes(&run);
        self.runs.save(run.clone()).await;
        self.cancel_tokens.write().await.remove(&run.run_id);

        for result in self.hooks.read().await.fire_run_complete(&run) {
            if let Err(e) = result {
                tracing::debug!(target: "cam.runtime", error = %e, "hook rejected run completion");
            }
        }

        self.emit(&tx, &run.run_id, RunEventKind::RunCompleted { status: run.status }).await;

        if let Some(publisher) = &self.publisher {
            let event = cam_events::run_lifecycle_event(run_status_event_name(status), &run.run_id, &run.workspace_id);
            publisher.publish(&event).await;
        }

        match failure {
            Some(err) => {
                self.hooks.read().await.fire_error(&err);
                self.emit(&tx, &run.run_id, RunEventKind::RunFailed { error: err.to_string() }).await;
                Err(err)
            }
            None => Ok(run),
        }
    }

    /// Execute every step in topological order, accumulating produced
    /// artifacts and per-step audit records directly onto `run`. Diagrams
    /// rendered along the way are stashed in `diagrams`, keyed by
    /// `(kind, identity)`, for the finalize pass to pick up.
    async fn execute_steps(
        &self,
        run: &mut Run,
        plan: &ExecutionPlan,
        pack: &CapabilityPack,
        tx: &mpsc::Sender<RunEvent>,
        cancel: &CancellationToken,
        diagrams: &mut HashMap<(String, String), Vec<DiagramInstruction>>,
    ) -> Result<(), RuntimeError> {
        let Some(playbook) = pack.playbook(&run.playbook_id) else {
            return Err(RuntimeError::Upstream(
                CamError::new(ErrorCode::PlaybookNotFound, "playbook vanished from pack between plan and execution")
                    .with_context("playbook_id", run.playbook_id.clone()),
            ));
        };

        let order = topological_order(playbook.steps.len(), &plan.edges);
        let retry_config = run
            .options
            .tool_retries
            .map(|max_retries| RetryConfig { max_retries, ..RetryConfig::default() })
            .unwrap_or_default();
        let retry_config = match run.options.tool_timeout_sec {
            Some(secs) => RetryConfig { overall_timeout: std::time::Duration::from_secs(secs), ..retry_config },
            None => retry_config,
        };

        for index in order {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let Some(step) = playbook.steps.get(index) else { continue };

            if let Some(only) = &run.options.only_steps {
                if !only.contains(&step.id) {
                    continue;
                }
            }

            if let Some(missing) = plan.unmet_requirements.get(&step.id) {
                match step.on_missing {
                    OnMissing::Fail => {
                        return Err(RuntimeError::GateFailed { step_id: step.id.clone(), missing: missing.clone() });
                    }
                    OnMissing::Skip => {
                        run.run_summary
                            .logs
                            .push(format!("step {} skipped: missing {:?}", step.id, missing));
                        continue;
                    }
                    OnMissing::Warn => {
                        run.run_summary
                            .logs
                            .push(format!("step {} proceeding despite missing {:?}", step.id, missing));
                    }
                }
            }

            self.emit(tx, &run.run_id, RunEventKind::StepStarted { step_id: step.id.clone() }).await;

            match self
                .execute_step(run, step, pack, &retry_config, diagrams)
                .await
            {
                Ok(produced_count) => {
                    self.emit(
                        tx,
                        &run.run_id,
                        RunEventKind::StepCompleted { step_id: step.id.clone(), produced_count },
                    )
                    .await;
                }
                Err(err) => {
                    self.emit(
                        tx,
                        &run.run_id,
                        RunEventKind::StepFailed { step_id: step.id.clone(), error: err.to_string() },
                    )
                    .await;
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    /// Execute a single step: build context, invoke its tool(s)/LLM config,
    /// validate+diagram every produced item per `emits` kind, and gate on a
    /// non-partial `emits` shortfall. Returns the number of artifacts
    /// produced by this step.
    async fn execute_step(
        &self,
        run: &mut Run,
        step: &Step,
        pack: &CapabilityPack,
        retry_config: &RetryConfig,
        diagrams: &mut HashMap<(String, String), Vec<DiagramInstruction>>,
    ) -> Result<usize, RuntimeError> {
        let context = prepare_context(
            &self.kinds,
            &self.store,
            &run.workspace_id,
            &run.produced,
            &step.requires_kinds,
            &step.emits,
        )
        .await;
        let vars = build_vars(&run.run_id, &run.workspace_id);
        let raw_args = build_raw_args(&step.params, &context);

        let mode = match &step.kind {
            StepKind::ToolCall { .. } => "tool_call",
            StepKind::Capability { llm_config: Some(_), tool_calls, .. } if tool_calls.is_empty() => "llm",
            StepKind::Capability { .. } => "capability",
        };
        let mut step_audit = StepAudit {
            step_id: step.id.clone(),
            capability_id: None,
            mode: mode.to_string(),
            inputs_preview: step.params.clone(),
            calls: vec![],
        };

        let output = match &step.kind {
            StepKind::ToolCall { binding, .. } => {
                let (result, audit) = invoke_binding(&self.client, binding, &raw_args, &vars, retry_config).await;
                step_audit.calls.push(audit);
                result.map_err(|source| RuntimeError::StepFailed { step_id: step.id.clone(), source })?
            }
            StepKind::Capability { capability_id, integration, llm_config, tool_calls } => {
                step_audit.capability_id = Some(capability_id.clone());
                if !tool_calls.is_empty() {
                    let mut merged = serde_json::Map::new();
                    for binding in tool_calls {
                        let mut resolved = binding.clone();
                        if resolved.integration.is_none() {
                            resolved.integration = integration.clone();
                        }
                        let (result, audit) =
                            invoke_binding(&self.client, &resolved, &raw_args, &vars, retry_config).await;
                        step_audit.calls.push(audit);
                        let value = result.map_err(|source| RuntimeError::StepFailed { step_id: step.id.clone(), source })?;
                        merged.insert(resolved.tool_key.clone(), value);
                    }
                    Value::Object(merged)
                } else if let Some(llm_config) = llm_config {
                    let start = Instant::now();
                    let result = invoke_llm(&self.kinds, step, llm_config, &context).await;
                    step_audit.calls.push(ToolCallAudit {
                        tool: format!("llm:{capability_id}"),
                        duration_ms: start.elapsed().as_millis() as u64,
                        produced_count: 0,
                        error: result.as_ref().err().map(ToString::to_string),
                    });
                    result.map_err(|source| RuntimeError::StepFailed { step_id: step.id.clone(), source })?
                } else {
                    Value::Object(serde_json::Map::new())
                }
            }
        };

        let items_by_kind = split_by_kind(&step.emits, &output);
        let mut produced_kinds: HashSet<String> = HashSet::new();
        let mut produced_count = 0usize;

        for kind in &step.emits {
            let items = items_by_kind.get(kind).cloned().unwrap_or_default();
            if items.is_empty() {
                continue;
            }
            let entry = self
                .kinds
                .get_schema_version(kind, None)
                .await
                .map_err(|source| RuntimeError::StepFailed { step_id: step.id.clone(), source })?;
            let recipes = self
                .kinds
                .diagram_recipes(kind, Some(&entry.version))
                .await
                .unwrap_or_default();

            for item in items {
                if let Err(source) = self.kinds.validate_data(kind, &item, Some(&entry.version)).await {
                    if run.options.allow_partial_step_failures {
                        run.run_summary.logs.push(format!(
                            "step {} produced an item of kind {kind} that failed validation: {source}",
                            step.id
                        ));
                        continue;
                    }
                    return Err(RuntimeError::StepFailed { step_id: step.id.clone(), source });
                }

                let name = derive_name(&item).unwrap_or_default();
                let identity = compute_identity(&entry.identity, &item, &name, kind);

                let rendered = diagram::render_diagrams(kind, &recipes, &item);
                diagrams.insert((kind.clone(), identity.clone()), rendered);

                let envelope = ArtifactEnvelope {
                    kind: kind.clone(),
                    schema_version: entry.version.clone(),
                    identity: identity.clone(),
                    data: item,
                    provenance: Provenance {
                        run_id: run.run_id.clone(),
                        playbook_id: run.playbook_id.clone(),
                        step: Some(step.id.clone()),
                        pack_key: Some(pack.key.clone()),
                        pack_version: Some(pack.version.clone()),
                        inputs_fingerprint: Some(run.input_fingerprint.clone()),
                        ..Provenance::default()
                    },
                };

                run.produced.entry(kind.clone()).or_default().push(envelope);
                produced_kinds.insert(kind.clone());
                produced_count += 1;
            }
        }

        if let Some(last_call) = step_audit.calls.last_mut() {
            last_call.produced_count = produced_count;
        }

        let missing: Vec<String> = step
            .emits
            .iter()
            .filter(|k| !produced_kinds.contains(*k))
            .cloned()
            .collect();
        if !missing.is_empty() && !run.options.allow_partial_step_failures {
            run.audit.push(step_audit);
            return Err(RuntimeError::GateFailed { step_id: step.id.clone(), missing });
        }
        if !missing.is_empty() {
            run.run_summary
                .logs
                .push(format!("step {} did not produce {:?}, continuing (partial failures allowed)", step.id, missing));
        }

        run.audit.push(step_audit);
        Ok(produced_count)
    }

    /// Upsert every produced artifact into the workspace, fill in
    /// `run.diffs_by_kind`, and publish artifact-produced events. Runs
    /// identically for both [`RunStrategy::Baseline`] and
    /// [`RunStrategy::Delta`]: `upsert_artifact` is itself idempotent, so a
    /// Delta run simply re-asserts unchanged content as a no-op.
    async fn finalize(
        &self,
        run: &mut Run,
        plan: &ExecutionPlan,
        pack: &CapabilityPack,
        diagrams: &HashMap<(String, String), Vec<DiagramInstruction>>,
    ) -> Result<(), CamError> {
        let mut buckets: BTreeMap<String, DeltaBuckets> = BTreeMap::new();
        let mut seen_keys: HashMap<String, HashSet<String>> = HashMap::new();

        for (kind, envelopes) in &run.produced {
            let bucket = buckets.entry(kind.clone()).or_default();
            for envelope in envelopes {
                let name = derive_name(&envelope.data).unwrap_or_else(|| envelope.identity.clone());
                let payload = cam_store::UpsertPayload {
                    kind: envelope.kind.clone(),
                    name,
                    data: envelope.data.clone(),
                    natural_key: Some(envelope.identity.clone()),
                    diagrams: diagrams.get(&(kind.clone(), envelope.identity.clone())).cloned(),
                    provenance: envelope.provenance.clone(),
                };
                let (_, op) = self.store.upsert_artifact(&run.workspace_id, payload, &run.run_id).await?;
                match op {
                    cam_store::UpsertOp::Insert => bucket.added.push(envelope.identity.clone()),
                    cam_store::UpsertOp::Update => bucket.changed.push(envelope.identity.clone()),
                    cam_store::UpsertOp::Noop => bucket.unchanged.push(envelope.identity.clone()),
                }
                seen_keys.entry(kind.clone()).or_default().insert(envelope.identity.clone());

                if let Some(publisher) = &self.publisher {
                    let event = cam_events::artifact_event("produced", &run.workspace_id, envelope);
                    publisher.publish(&event).await;
                }
            }
        }

        for kind in &plan.artifacts_contract {
            if let Ok(doc) = self.store.get_parent_doc(&run.workspace_id).await {
                let produced_this_run = seen_keys.get(kind).cloned().unwrap_or_default();
                let removed: Vec<String> = doc
                    .live_of_kind(kind)
                    .filter(|a| a.lineage.last_seen_run_id != run.run_id && !produced_this_run.contains(&a.natural_key))
                    .map(|a| a.natural_key.clone())
                    .collect();
                if !removed.is_empty() {
                    buckets.entry(kind.clone()).or_default().removed = removed;
                }
            }
        }

        run.diffs_by_kind = buckets;
        let _ = pack;
        Ok(())
    }
}

fn run_status_event_name(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Aborted => "aborted",
        RunStatus::Running => "running",
        RunStatus::Created => "created",
    }
}

fn render_notes(run: &Run) -> String {
    let mut notes = format!(
        "# Run {}\n\nPlaybook `{}` against workspace `{}`.\n\n",
        run.run_id, run.playbook_id, run.workspace_id
    );
    for line in &run.run_summary.logs {
        notes.push_str("- ");
        notes.push_str(line);
        notes.push('\n');
    }
    notes.push_str(&format!(
        "\n**Produced:** {} artifacts across {} kinds.\n",
        run.produced_count(),
        run.produced.len()
    ));
    notes
}

// ---------------------------------------------------------------------------
// RunHandle
// ---------------------------------------------------------------------------

/// A handle to an in-flight run: a live [`RunEvent`] stream, a cancellation
/// switch, and the background task's eventual result.
pub struct RunHandle {
    /// The run's unique identifier.
    pub run_id: String,
    /// Stream of lifecycle/progress events for this run.
    pub events: ReceiverStream<RunEvent>,
    /// Cancel the run's execution; takes effect at the next step boundary.
    cancel: CancellationToken,
    /// Join the background task to obtain the final [`Run`] record.
    join: JoinHandle<Result<Run, RuntimeError>>,
}

impl RunHandle {
    /// Request cancellation. The run finishes its current step, then stops
    /// and is recorded with [`RunStatus::Aborted`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Await the run to completion and return its final record.
    ///
    /// # Errors
    ///
    /// Returns the [`RuntimeError`] that aborted the run, or
    /// [`RuntimeError::Upstream`] wrapping an [`ErrorCode::Internal`] error
    /// if the background task itself panicked.
    pub async fn join(self) -> Result<Run, RuntimeError> {
        self.join.await.unwrap_or_else(|e| {
            Err(RuntimeError::Upstream(
                CamError::new(ErrorCode::Internal, "run task panicked").with_context("detail", e.to_string()),
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// Free-function helpers
// ---------------------------------------------------------------------------

/// Compute a step execution order from its plan's edges via Kahn's
/// algorithm, falling back to declaration order if the edges contain a
/// cycle (which `resolve_plan` should never produce, but a defensive
/// fallback beats a silently-dropped step).
fn topological_order(step_count: usize, edges: &[ResolvedEdge]) -> Vec<usize> {
    let mut indegree = vec![0usize; step_count];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); step_count];
    for edge in edges {
        if edge.from < step_count && edge.to < step_count {
            adjacency[edge.from].push(edge.to);
            indegree[edge.to] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..step_count).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(step_count);
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &next in &adjacency[node] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() == step_count {
        order
    } else {
        (0..step_count).collect()
    }
}

/// Gather up to [`cam_core::DEFAULT_CONTEXT_CAP_PER_KIND`] items per
/// context kind: artifacts already produced earlier in this run, falling
/// back to the workspace's current live artifacts of that kind when none
/// have been produced yet.
///
/// The context kind set is the union of `requires_kinds` and, for every
/// kind in `emits`, that kind's registered `depends_on.hard`/`depends_on.soft`
/// — a step's declared dependency kinds feed context assembly even when
/// they aren't separately listed in `requires_kinds`.
async fn prepare_context(
    kinds: &cam_registry::KindRegistry,
    store: &cam_store::ArtifactStore,
    workspace_id: &str,
    produced: &cam_core::ProducedArtifacts,
    requires_kinds: &[String],
    emits: &[String],
) -> BTreeMap<String, Vec<Value>> {
    let mut wanted: BTreeSet<String> = requires_kinds.iter().cloned().collect();
    for kind in emits {
        if let Ok(schema) = kinds.get_schema_version(kind, None).await {
            wanted.extend(schema.depends_on.hard.iter().cloned());
            wanted.extend(schema.depends_on.soft.iter().cloned());
        }
    }

    let mut context = BTreeMap::new();
    for kind in &wanted {
        let mut items: Vec<Value> = produced
            .get(kind)
            .map(|envelopes| envelopes.iter().map(|e| e.data.clone()).collect())
            .unwrap_or_default();

        if items.is_empty() {
            if let Ok(doc) = store.get_parent_doc(workspace_id).await {
                items = doc
                    .live_of_kind(kind)
                    .take(cam_core::DEFAULT_CONTEXT_CAP_PER_KIND)
                    .map(|a| a.data.clone())
                    .collect();
            }
        } else {
            items.truncate(cam_core::DEFAULT_CONTEXT_CAP_PER_KIND);
        }

        context.insert(kind.clone(), items);
    }
    context
}

fn build_vars(run_id: &str, workspace_id: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("run_id".to_string(), run_id.to_string());
    vars.insert("workspace_id".to_string(), workspace_id.to_string());
    vars
}

fn build_raw_args(params: &Value, context: &BTreeMap<String, Vec<Value>>) -> Value {
    let mut obj = params.as_object().cloned().unwrap_or_default();
    obj.insert("context".to_string(), serde_json::to_value(context).unwrap_or(Value::Null));
    Value::Object(obj)
}

fn schema_property_names(schema: Option<&Value>) -> Vec<String> {
    schema
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}

/// Split a step's raw output into per-kind item lists. A single-kind step
/// treats the whole output as that kind's items (array or singleton); a
/// multi-kind step expects an object keyed by kind id.
fn split_by_kind(emits: &[String], output: &Value) -> HashMap<String, Vec<Value>> {
    let mut out = HashMap::new();
    if let [only] = emits {
        out.insert(only.clone(), normalize_items(output));
        return out;
    }
    if let Some(obj) = output.as_object() {
        for kind in emits {
            if let Some(value) = obj.get(kind) {
                out.insert(kind.clone(), normalize_items(value));
            }
        }
    }
    out
}

fn normalize_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => vec![],
        other => vec![other.clone()],
    }
}

fn derive_name(data: &Value) -> Option<String> {
    data.get("name").and_then(Value::as_str).map(str::to_string)
}

/// Compute an artifact's natural key from its kind's [`IdentityRule`],
/// falling back to `kind:name` when a required path is absent from `data`.
fn compute_identity(rule: &IdentityRule, data: &Value, name: &str, kind: &str) -> String {
    match rule {
        IdentityRule::Single { path } => cam_registry::dsl::get_path(data, path)
            .map(value_to_key_part)
            .unwrap_or_else(|| fallback_natural_key(kind, name)),
        IdentityRule::Composite { paths } => {
            let mut parts = Vec::with_capacity(paths.len() + 1);
            for path in paths {
                match cam_registry::dsl::get_path(data, path) {
                    Some(value) => parts.push(value_to_key_part(value)),
                    None => return fallback_natural_key(kind, name),
                }
            }
            parts.push(name.to_lowercase());
            parts.join(":").to_lowercase()
        }
    }
}

fn value_to_key_part(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    }
}

/// Invoke a tool binding, applying retry policy at the transport layer and
/// always returning a [`ToolCallAudit`] (even on failure) alongside the
/// result.
async fn invoke_binding(
    client: &Client,
    binding: &ToolBinding,
    raw_args: &Value,
    vars: &BTreeMap<String, String>,
    retry_config: &RetryConfig,
) -> (Result<Value, CamError>, ToolCallAudit) {
    let start = Instant::now();
    let result = invoke_binding_inner(client, binding, raw_args, vars, retry_config).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    let audit = ToolCallAudit {
        tool: binding.tool_name.clone(),
        duration_ms,
        produced_count: 0,
        error: result.as_ref().err().map(ToString::to_string),
    };
    (result, audit)
}

async fn invoke_binding_inner(
    client: &Client,
    binding: &ToolBinding,
    raw_args: &Value,
    vars: &BTreeMap<String, String>,
    retry_config: &RetryConfig,
) -> Result<Value, CamError> {
    let integration = binding.integration.as_ref().ok_or_else(|| {
        CamError::new(ErrorCode::Internal, "tool binding missing resolved integration")
            .with_context("tool_key", binding.tool_key.clone())
    })?;
    let allowed_keys = schema_property_names(binding.input_schema.as_ref());

    match integration {
        IntegrationSnapshot::Http { .. } => {
            let outcome = cam_invoker::retry_async(
                retry_config,
                || async {
                    cam_invoker::call_http(
                        client,
                        integration,
                        &binding.tool_name,
                        raw_args,
                        vars,
                        &allowed_keys,
                        Uuid::new_v4(),
                        &BTreeMap::new(),
                    )
                    .await
                },
                cam_invoker::is_retryable,
            )
            .await?;
            Ok(outcome.value)
        }
        IntegrationSnapshot::Stdio { .. } => {
            let process = StdioProcess::spawn(integration).await?;
            let timeout = retry_config.overall_timeout;
            let outcome = cam_invoker::retry_async(
                retry_config,
                || async {
                    cam_invoker::call_stdio(&process, &binding.tool_name, raw_args, vars, &allowed_keys, timeout).await
                },
                cam_invoker::is_retryable,
            )
            .await;
            process.shutdown().await;
            Ok(outcome?.value)
        }
    }
}

/// Invoke an LLM-backed capability step: resolve its prompt via the kind's
/// registered prompt material, post to the endpoint named in `llm_config`,
/// and retry once if the response is not valid JSON (strict-JSON kinds
/// only get one reparse attempt, per the platform's prompt contract).
async fn invoke_llm(
    kinds: &cam_registry::KindRegistry,
    step: &Step,
    llm_config: &Value,
    context: &BTreeMap<String, Vec<Value>>,
) -> Result<Value, CamError> {
    let target_kind = step.emits.first().ok_or_else(|| {
        CamError::new(ErrorCode::Internal, "llm-backed step declares no emits kind")
            .with_context("step_id", step.id.clone())
    })?;

    let selectors: BTreeMap<String, String> = llm_config
        .get("selectors")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let prompt = kinds.select_prompt_for(target_kind, &selectors).await?;

    let endpoint = llm_config.get("endpoint").and_then(Value::as_str).ok_or_else(|| {
        CamError::new(ErrorCode::ConfigInvalid, "llm_config missing endpoint")
            .with_context("step_id", step.id.clone())
    })?;

    let body = serde_json::json!({
        "system": prompt.system,
        "user": render_user_prompt(prompt.user_template.as_deref(), context),
        "strict_json": prompt.strict_json,
    });

    let client = Client::new();
    let mut last_parse_error = None;
    for attempt in 0..2 {
        let response = client.post(endpoint).json(&body).send().await.map_err(|e| {
            CamError::new(ErrorCode::TransportTimeout, "llm provider call failed").with_source(e)
        })?;
        match response.json::<Value>().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_parse_error = Some(
                    CamError::new(ErrorCode::SchemaViolation, "llm response was not valid json")
                        .with_context("attempt", attempt)
                        .with_source(e),
                );
            }
        }
    }
    Err(last_parse_error.unwrap_or_else(|| CamError::new(ErrorCode::SchemaViolation, "llm response was not valid json")))
}

fn render_user_prompt(template: Option<&str>, context: &BTreeMap<String, Vec<Value>>) -> String {
    let context_json = serde_json::to_string(context).unwrap_or_default();
    match template {
        Some(t) => t.replace("{{context}}", &context_json),
        None => context_json,
    }
}
