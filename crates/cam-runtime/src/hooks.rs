// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle hooks for runtime extensibility.
//!
//! Register [`LifecycleHook`] implementations with a [`HookRegistry`] to
//! observe and react to a run's lifecycle (start, event, complete, error)
//! without modifying the core orchestrator loop.

use cam_core::Run;
use std::sync::Arc;

use crate::telemetry::RunMetrics;
use crate::{RunEvent, RuntimeError};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Extension point called at well-defined moments in a run's lifecycle.
///
/// All methods have default no-op implementations so hooks only need to
/// override the callbacks they care about.
pub trait LifecycleHook {
    /// Called before plan execution begins.
    ///
    /// # Errors
    ///
    /// Returning an error signals that the hook considers the run invalid;
    /// the registry collects all such results for the caller to inspect.
    fn on_run_start(&self, _run: &Run) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    /// Called for every [`RunEvent`] emitted during the run.
    ///
    /// # Errors
    ///
    /// An error here is informational, the orchestrator does not abort the run.
    fn on_event(&self, _event: &RunEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    /// Called once the [`Run`] reaches a terminal state.
    ///
    /// # Errors
    ///
    /// An error here is informational.
    fn on_run_complete(&self, _run: &Run) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    /// Called when the orchestrator encounters a [`RuntimeError`].
    fn on_error(&self, _error: &RuntimeError) {}

    /// Human-readable name for this hook (used in logging / diagnostics).
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered collection of [`LifecycleHook`]s that fires them in registration order.
pub struct HookRegistry {
    hooks: Vec<Box<dyn LifecycleHook + Send + Sync>>,
}

impl HookRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Append a hook. Hooks fire in the order they are registered.
    pub fn register(&mut self, hook: Box<dyn LifecycleHook + Send + Sync>) {
        self.hooks.push(hook);
    }

    /// Fire [`LifecycleHook::on_run_start`] on every registered hook.
    pub fn fire_run_start(&self, run: &Run) -> Vec<Result<(), Box<dyn std::error::Error + Send + Sync>>> {
        self.hooks.iter().map(|h| h.on_run_start(run)).collect()
    }

    /// Fire [`LifecycleHook::on_event`] on every registered hook.
    pub fn fire_event(&self, event: &RunEvent) -> Vec<Result<(), Box<dyn std::error::Error + Send + Sync>>> {
        self.hooks.iter().map(|h| h.on_event(event)).collect()
    }

    /// Fire [`LifecycleHook::on_run_complete`] on every registered hook.
    pub fn fire_run_complete(&self, run: &Run) -> Vec<Result<(), Box<dyn std::error::Error + Send + Sync>>> {
        self.hooks.iter().map(|h| h.on_run_complete(run)).collect()
    }

    /// Fire [`LifecycleHook::on_error`] on every registered hook.
    pub fn fire_error(&self, error: &RuntimeError) {
        for h in &self.hooks {
            h.on_error(error);
        }
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Names of all registered hooks, in registration order.
    #[must_use]
    pub fn hook_names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Built-in: LoggingHook
// ---------------------------------------------------------------------------

/// Logs lifecycle transitions via the `tracing` crate.
pub struct LoggingHook;

impl LifecycleHook for LoggingHook {
    fn on_run_start(&self, run: &Run) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(
            target: "cam.hooks",
            run_id = %run.run_id,
            workspace_id = %run.workspace_id,
            playbook_id = %run.playbook_id,
            "run starting"
        );
        Ok(())
    }

    fn on_event(&self, event: &RunEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::debug!(target: "cam.hooks", ?event, "run event");
        Ok(())
    }

    fn on_run_complete(&self, run: &Run) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(
            target: "cam.hooks",
            run_id = %run.run_id,
            status = ?run.status,
            duration_s = run.run_summary.duration_s,
            produced = run.produced_count(),
            "run complete"
        );
        Ok(())
    }

    fn on_error(&self, error: &RuntimeError) {
        tracing::error!(target: "cam.hooks", %error, "runtime error");
    }

    fn name(&self) -> &str {
        "logging"
    }
}

// ---------------------------------------------------------------------------
// Built-in: MetricsHook
// ---------------------------------------------------------------------------

/// Updates a shared [`RunMetrics`] collector on lifecycle events.
pub struct MetricsHook {
    metrics: Arc<RunMetrics>,
}

impl MetricsHook {
    /// Create a new metrics hook backed by the given collector.
    #[must_use]
    pub fn new(metrics: Arc<RunMetrics>) -> Self {
        Self { metrics }
    }

    /// Return a reference to the underlying metrics.
    #[must_use]
    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }
}

impl LifecycleHook for MetricsHook {
    fn on_run_complete(&self, run: &Run) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let success = matches!(run.status, cam_core::RunStatus::Completed);
        let duration_ms = run.run_summary.duration_s.map_or(0, |s| (s * 1000.0).round() as u64);
        self.metrics.record_run(duration_ms, success, run.audit.len() as u64);
        Ok(())
    }

    fn name(&self) -> &str {
        "metrics"
    }
}

// ---------------------------------------------------------------------------
// Built-in: ValidationHook
// ---------------------------------------------------------------------------

/// Validates a [`Run`] before execution starts.
///
/// Current checks:
/// - `workspace_id` must not be empty
/// - `playbook_id` must not be empty
pub struct ValidationHook;

impl LifecycleHook for ValidationHook {
    fn on_run_start(&self, run: &Run) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if run.workspace_id.trim().is_empty() {
            return Err("run workspace_id must not be empty".into());
        }
        if run.playbook_id.trim().is_empty() {
            return Err("run playbook_id must not be empty".into());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "validation"
    }
}
