// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory persistence of [`Run`] records, keyed by `run_id`.

use std::collections::BTreeMap;
use std::sync::Arc;

use cam_core::Run;
use cam_error::{CamError, ErrorCode};
use tokio::sync::RwLock;

/// `Arc`-shareable store of run records, indexed by `run_id`.
#[derive(Default)]
pub struct RunStore {
    runs: RwLock<BTreeMap<String, Run>>,
}

impl RunStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a run record.
    pub async fn save(&self, run: Run) {
        self.runs.write().await.insert(run.run_id.clone(), run);
    }

    /// Fetch a run by id.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::NotFound`] if no run with this id has been saved.
    pub async fn get(&self, run_id: &str) -> Result<Run, CamError> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| CamError::new(ErrorCode::NotFound, "unknown run").with_context("run_id", run_id))
    }

    /// List every run id, sorted.
    pub async fn list(&self) -> Vec<String> {
        self.runs.read().await.keys().cloned().collect()
    }

    /// List runs for a given workspace, most-recently-started first.
    pub async fn list_for_workspace(&self, workspace_id: &str) -> Vec<Run> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.workspace_id == workspace_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.run_summary.started_at.cmp(&a.run_summary.started_at));
        runs
    }

    /// Remove a run record. Returns `true` if it existed.
    pub async fn remove(&self, run_id: &str) -> bool {
        self.runs.write().await.remove(run_id).is_some()
    }
}

/// Convenience alias for an `Arc`-wrapped store, the shape every orchestrator
/// holds.
pub type SharedRunStore = Arc<RunStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use cam_core::{RunOptions, RunStatus, RunStrategy, RunSummary};
    use chrono::Utc;
    use std::collections::BTreeMap as Map;

    fn sample_run(run_id: &str, workspace_id: &str) -> Run {
        Run {
            run_id: run_id.to_string(),
            workspace_id: workspace_id.to_string(),
            pack_id: "cobol-ingest".to_string(),
            playbook_id: "full-ingest".to_string(),
            strategy: RunStrategy::Baseline,
            inputs: serde_json::json!({}),
            input_fingerprint: "fp".to_string(),
            options: RunOptions::default(),
            status: RunStatus::Created,
            produced: Map::new(),
            diffs_by_kind: Map::new(),
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

    #[tokio::test]
    async fn save_then_get_roundtrips() {
        let store = RunStore::new();
        store.save(sample_run("run_1", "ws_1")).await;
        let got = store.get("run_1").await.unwrap();
        assert_eq!(got.workspace_id, "ws_1");
    }

    #[tokio::test]
    async fn get_missing_run_errors_not_found() {
        let store = RunStore::new();
        let err = store.get("missing").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn list_for_workspace_filters_and_orders_newest_first() {
        let store = RunStore::new();
        let mut older = sample_run("run_1", "ws_1");
        older.run_summary.started_at = Utc::now() - chrono::Duration::seconds(60);
        store.save(older).await;
        store.save(sample_run("run_2", "ws_1")).await;
        store.save(sample_run("run_3", "ws_2")).await;

        let runs = store.list_for_workspace("ws_1").await;
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "run_2");
    }

    #[tokio::test]
    async fn remove_drops_the_run() {
        let store = RunStore::new();
        store.save(sample_run("run_1", "ws_1")).await;
        assert!(store.remove("run_1").await);
        assert!(store.get("run_1").await.is_err());
        assert!(!store.remove("run_1").await);
    }

    #[tokio::test]
    async fn list_returns_all_ids() {
        let store = RunStore::new();
        store.save(sample_run("run_1", "ws_1")).await;
        store.save(sample_run("run_2", "ws_1")).await;
        let mut ids = store.list().await;
        ids.sort();
        assert_eq!(ids, vec!["run_1".to_string(), "run_2".to_string()]);
    }
}
