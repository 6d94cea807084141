// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory catalog of published capability packs, keyed by `(key, version)`.

use std::collections::HashMap;
use std::sync::Arc;

use cam_core::CapabilityPack;
use cam_error::{CamError, ErrorCode};
use tokio::sync::RwLock;

/// A typed, `Arc`-shareable registry of published [`CapabilityPack`]s.
#[derive(Default)]
pub struct PackCatalog {
    packs: RwLock<HashMap<(String, String), Arc<CapabilityPack>>>,
    latest: RwLock<HashMap<String, String>>,
}

impl PackCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a pack version, replacing any prior publication of the same
    /// `(key, version)` pair and becoming the new `latest` for its key.
    pub async fn publish(&self, pack: CapabilityPack) {
        let key = pack.key.clone();
        let version = pack.version.clone();
        self.packs.write().await.insert((key.clone(), version.clone()), Arc::new(pack));
        self.latest.write().await.insert(key, version);
    }

    /// Publish a pack only if `(key, version)` isn't already published;
    /// errors with `Conflict` otherwise. Distinct from [`PackCatalog::publish`]'s
    /// upsert-or-replace semantics — this backs the REST surface's `POST`
    /// (create) verb, `publish` backs `PUT` (replace).
    pub async fn create(&self, pack: CapabilityPack) -> Result<(), CamError> {
        let key = pack.key.clone();
        let version = pack.version.clone();
        if self.packs.read().await.contains_key(&(key.clone(), version.clone())) {
            return Err(CamError::new(ErrorCode::Conflict, "capability pack already published")
                .with_context("key", key)
                .with_context("version", version));
        }
        self.publish(pack).await;
        Ok(())
    }

    /// Reorder a published pack's playbooks to match `order` (a full or
    /// partial list of playbook ids); ids not listed keep their relative
    /// order, appended after the ones explicitly ordered. Republishes the
    /// pack with a fresh `updated_at`.
    pub async fn reorder_playbooks(
        &self,
        key: &str,
        version: &str,
        order: &[String],
    ) -> Result<Arc<CapabilityPack>, CamError> {
        let current = self.get(key, Some(version)).await?;
        for id in order {
            if !current.playbooks.iter().any(|p| &p.id == id) {
                return Err(CamError::new(ErrorCode::PlaybookNotFound, format!("unknown playbook id: {id}"))
                    .with_context("key", key)
                    .with_context("version", version));
            }
        }

        let mut reordered = Vec::with_capacity(current.playbooks.len());
        for id in order {
            if let Some(p) = current.playbooks.iter().find(|p| &p.id == id) {
                reordered.push(p.clone());
            }
        }
        for p in &current.playbooks {
            if !order.contains(&p.id) {
                reordered.push(p.clone());
            }
        }

        let mut updated = (*current).clone();
        updated.playbooks = reordered;
        updated.updated_at = chrono::Utc::now();
        self.publish(updated.clone()).await;
        Ok(Arc::new(updated))
    }

    /// Fetch a specific pack version, or the latest published version when
    /// `version` is `None`.
    pub async fn get(&self, key: &str, version: Option<&str>) -> Result<Arc<CapabilityPack>, CamError> {
        let version = match version {
            Some(v) => v.to_string(),
            None => self
                .latest
                .read()
                .await
                .get(key)
                .cloned()
                .ok_or_else(|| not_found(key, None))?,
        };
        self.packs
            .read()
            .await
            .get(&(key.to_string(), version.clone()))
            .cloned()
            .ok_or_else(|| not_found(key, Some(&version)))
    }

    /// List every published `(key, version)` pair, sorted.
    pub async fn list(&self) -> Vec<(String, String)> {
        let mut out: Vec<_> = self.packs.read().await.keys().cloned().collect();
        out.sort();
        out
    }

    /// Remove a specific pack version. No-op if `latest` pointed at it; the
    /// caller is responsible for republishing a new latest if needed.
    pub async fn remove(&self, key: &str, version: &str) -> bool {
        self.packs.write().await.remove(&(key.to_string(), version.to_string())).is_some()
    }
}

fn not_found(key: &str, version: Option<&str>) -> CamError {
    let err = CamError::new(ErrorCode::UnknownPack, "unknown capability pack").with_context("key", key);
    match version {
        Some(v) => err.with_context("version", v),
        None => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(key: &str, version: &str) -> CapabilityPack {
        CapabilityPack {
            key: key.to_string(),
            version: version.to_string(),
            capability_ids: vec![],
            capabilities: vec![],
            tools: Default::default(),
            playbooks: vec![],
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_latest_after_two_publishes() {
        let catalog = PackCatalog::new();
        catalog.publish(pack("cobol-ingest", "1.0.0")).await;
        catalog.publish(pack("cobol-ingest", "1.1.0")).await;
        let latest = catalog.get("cobol-ingest", None).await.unwrap();
        assert_eq!(latest.version, "1.1.0");
    }

    #[tokio::test]
    async fn get_specific_version_still_resolvable() {
        let catalog = PackCatalog::new();
        catalog.publish(pack("cobol-ingest", "1.0.0")).await;
        catalog.publish(pack("cobol-ingest", "1.1.0")).await;
        let old = catalog.get("cobol-ingest", Some("1.0.0")).await.unwrap();
        assert_eq!(old.version, "1.0.0");
    }

    fn playbook(id: &str, name: &str) -> cam_core::Playbook {
        cam_core::Playbook { id: id.to_string(), name: name.to_string(), steps: vec![], edges: vec![], produces: vec![] }
    }

    #[tokio::test]
    async fn create_errors_on_duplicate_key_version() {
        let catalog = PackCatalog::new();
        catalog.create(pack("cobol-ingest", "1.0.0")).await.unwrap();
        let err = catalog.create(pack("cobol-ingest", "1.0.0")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn reorder_playbooks_moves_listed_ids_first() {
        let catalog = PackCatalog::new();
        let mut p = pack("cobol-ingest", "1.0.0");
        p.playbooks = vec![playbook("a", "A"), playbook("b", "B"), playbook("c", "C")];
        catalog.publish(p).await;

        let reordered = catalog
            .reorder_playbooks("cobol-ingest", "1.0.0", &["c".to_string(), "a".to_string()])
            .await
            .unwrap();

        let ids: Vec<&str> = reordered.playbooks.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn reorder_playbooks_unknown_id_errors() {
        let catalog = PackCatalog::new();
        let mut p = pack("cobol-ingest", "1.0.0");
        p.playbooks = vec![playbook("a", "A")];
        catalog.publish(p).await;

        let err = catalog
            .reorder_playbooks("cobol-ingest", "1.0.0", &["missing".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PlaybookNotFound);
    }

    #[tokio::test]
    async fn unknown_key_errors() {
        let catalog = PackCatalog::new();
        let err = catalog.get("missing", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownPack);
    }

    #[tokio::test]
    async fn list_is_sorted() {
        let catalog = PackCatalog::new();
        catalog.publish(pack("b-pack", "1.0.0")).await;
        catalog.publish(pack("a-pack", "1.0.0")).await;
        let keys: Vec<_> = catalog.list().await.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a-pack".to_string(), "b-pack".to_string()]);
    }
}
