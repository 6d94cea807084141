// SPDX-License-Identifier: MIT OR Apache-2.0
//! Output formatting utilities for the `cam` CLI.

use std::fmt;
use std::str::FromStr;

use cam_core::Kind;
use cam_runtime::RunEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Supported output formats for CLI display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Compact JSON (single line).
    Json,
    /// Pretty-printed JSON.
    JsonPretty,
    /// Human-readable multi-line text.
    Text,
    /// Key-value aligned table.
    Table,
    /// Single-line summary.
    Compact,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Json => "json",
            Self::JsonPretty => "json-pretty",
            Self::Text => "text",
            Self::Table => "table",
            Self::Compact => "compact",
        };
        f.write_str(s)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "json-pretty" | "json_pretty" | "jsonpretty" => Ok(Self::JsonPretty),
            "text" => Ok(Self::Text),
            "table" => Ok(Self::Table),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Formats the CLI's REST-client and orchestrator output types.
#[derive(Debug, Clone)]
pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    /// Create a new formatter with the given output format.
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Format an arbitrary JSON value, as returned by a daemon REST call.
    #[must_use]
    pub fn format_value(&self, value: &Value) -> String {
        match &self.format {
            OutputFormat::Json => serde_json::to_string(value).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(value).unwrap_or_default(),
            OutputFormat::Text | OutputFormat::Table => format_value_table(value),
            OutputFormat::Compact => format_value_compact(value),
        }
    }

    /// Format a list of [`Kind`]s, as returned from `GET /registry/kinds`.
    #[must_use]
    pub fn format_kinds(&self, kinds: &[Kind]) -> String {
        match &self.format {
            OutputFormat::Json => serde_json::to_string(kinds).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(kinds).unwrap_or_default(),
            OutputFormat::Compact => kinds.iter().map(|k| k.id.clone()).collect::<Vec<_>>().join(", "),
            OutputFormat::Text | OutputFormat::Table => kinds
                .iter()
                .map(|k| format!("{:<32} {:<16} {}", k.id, k.category, kind_status_str(k.status)))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Format a live [`RunEvent`] streamed from `run watch`/`run start`.
    #[must_use]
    pub fn format_run_event(&self, event: &RunEvent) -> String {
        match &self.format {
            OutputFormat::Json => serde_json::to_string(event).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(event).unwrap_or_default(),
            OutputFormat::Text | OutputFormat::Table => {
                let ts = event.ts.format("%H:%M:%S%.3f");
                format!("[{ts}] {run_id} {brief}", run_id = event.run_id, brief = run_event_brief(event))
            }
            OutputFormat::Compact => run_event_brief(event),
        }
    }

    /// Format an error message according to the configured output format.
    #[must_use]
    pub fn format_error(&self, err: &str) -> String {
        match &self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => serde_json::json!({"error": err}).to_string(),
            OutputFormat::Text => format!("Error: {err}"),
            OutputFormat::Table => format!("error  {err}"),
            OutputFormat::Compact => format!("[error] {err}"),
        }
    }
}

fn kind_status_str(status: cam_core::KindStatus) -> &'static str {
    match status {
        cam_core::KindStatus::Active => "active",
        cam_core::KindStatus::Deprecated => "deprecated",
    }
}

fn run_event_brief(event: &RunEvent) -> String {
    use cam_runtime::RunEventKind::*;
    match &event.kind {
        RunStarted => "run_started".to_string(),
        StepStarted { step_id } => format!("step_started {step_id}"),
        StepCompleted { step_id, produced_count } => {
            format!("step_completed {step_id} produced={produced_count}")
        }
        StepFailed { step_id, error } => format!("step_failed {step_id}: {error}"),
        ArtifactProduced { kind, .. } => format!("artifact_produced {kind}"),
        RunCompleted { status } => format!("run_completed {status:?}"),
        RunFailed { error } => format!("run_failed: {error}"),
    }
}

fn format_value_table(value: &Value) -> String {
    match value.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| format!("{:<20} {}", k, compact_scalar(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        None => compact_scalar(value),
    }
}

fn format_value_compact(value: &Value) -> String {
    match value.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| format!("{k}={}", compact_scalar(v)))
            .collect::<Vec<_>>()
            .join(" "),
        None => compact_scalar(value),
    }
}

fn compact_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
