//! Kind registry: storage of kind catalog entries, schema validation,
//! adapter/migrator DSL execution, diagram recipe lookup, prompt selection,
//! and a dynamic OpenAPI discriminated union over active kinds.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod dsl;
pub mod openapi;
pub mod prompt;
pub mod validator;

use std::collections::{BTreeMap, HashMap};

use cam_core::{Kind, KindStatus, RegistryMeta, SchemaVersionEntry};
use cam_error::{CamError, ErrorCode};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

pub use prompt::{select_prompt, SelectedPrompt};
pub use validator::ValidatorCache;

const MIGRATION_HOP_LIMIT: usize = cam_core::DEFAULT_MIGRATION_HOP_LIMIT;

struct Catalog {
    kinds: HashMap<String, Kind>,
    alias_index: HashMap<String, String>,
    meta: RegistryMeta,
}

impl Catalog {
    fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
            alias_index: HashMap::new(),
            meta: RegistryMeta {
                etag: compute_etag(0),
                registry_version: 0,
                updated_at: Utc::now(),
            },
        }
    }

    fn bump(&mut self) {
        self.meta.registry_version += 1;
        self.meta.updated_at = Utc::now();
        self.meta.etag = compute_etag(self.meta.registry_version);
    }
}

fn compute_etag(version: u64) -> String {
    #[derive(serde::Serialize)]
    struct EtagInput {
        v: u64,
        t: chrono::DateTime<chrono::Utc>,
    }
    cam_core::fingerprint(&EtagInput { v: version, t: Utc::now() }).unwrap_or_default()
}

/// Result of a migration walk: the transformed data and whether the target
/// version was actually reached.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    /// Data after applying every migration hop that could be found.
    pub data: Value,
    /// Schema version the walk actually stopped at.
    pub reached_version: String,
    /// Whether `reached_version` equals the requested target.
    pub reached_target: bool,
}

/// The in-process kind registry: an `Arc`-shareable store of kind catalog
/// entries plus a compiled-validator cache.
pub struct KindRegistry {
    catalog: RwLock<Catalog>,
    validators: ValidatorCache,
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KindRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { catalog: RwLock::new(Catalog::empty()), validators: ValidatorCache::new() }
    }

    /// Current registry meta (etag, version, last update).
    pub async fn meta(&self) -> RegistryMeta {
        self.catalog.read().await.meta.clone()
    }

    /// Insert or replace a kind wholesale, bumping the registry version and
    /// clearing the validator cache.
    pub async fn upsert_kind(&self, kind: Kind) {
        let mut cat = self.catalog.write().await;
        for alias in &kind.aliases {
            cat.alias_index.insert(alias.clone(), kind.id.clone());
        }
        cat.kinds.insert(kind.id.clone(), kind);
        cat.bump();
        drop(cat);
        self.validators.clear().await;
    }

    /// Apply an RFC 6902 JSON Patch to an existing kind in place, bumping
    /// the registry version and clearing the validator cache, same as
    /// [`KindRegistry::upsert_kind`]. The patch must not change `id`.
    pub async fn patch_kind(&self, id: &str, patch: Value) -> Result<Kind, CamError> {
        let parsed: json_patch::Patch = serde_json::from_value(patch).map_err(|e| {
            CamError::new(ErrorCode::InvalidParams, "malformed json patch document").with_source(e)
        })?;

        let mut cat = self.catalog.write().await;
        let existing = cat.kinds.get(id).ok_or_else(|| {
            CamError::new(ErrorCode::UnknownKind, format!("unknown kind: {id}")).with_context("id", id)
        })?;

        let mut value = serde_json::to_value(existing)
            .map_err(|e| CamError::new(ErrorCode::Internal, "failed to serialize kind").with_source(e))?;
        json_patch::patch(&mut value, &parsed).map_err(|e| {
            CamError::new(ErrorCode::InvalidParams, "json patch application failed")
                .with_context("id", id)
                .with_source(e)
        })?;
        let patched: Kind = serde_json::from_value(value).map_err(|e| {
            CamError::new(ErrorCode::InvalidParams, "patched kind failed to deserialize")
                .with_context("id", id)
                .with_source(e)
        })?;
        if patched.id != id {
            return Err(CamError::new(ErrorCode::InvalidParams, "patch must not change a kind's id")
                .with_context("id", id)
                .with_context("patched_id", patched.id));
        }

        for alias in &patched.aliases {
            cat.alias_index.insert(alias.clone(), patched.id.clone());
        }
        cat.kinds.insert(patched.id.clone(), patched.clone());
        cat.bump();
        drop(cat);
        self.validators.clear().await;
        Ok(patched)
    }

    /// Remove a kind by id, returning it if it existed.
    pub async fn remove_kind(&self, id: &str) -> Option<Kind> {
        let mut cat = self.catalog.write().await;
        let removed = cat.kinds.remove(id);
        if removed.is_some() {
            cat.alias_index.retain(|_, target| target != id);
            cat.bump();
        }
        drop(cat);
        if removed.is_some() {
            self.validators.clear().await;
        }
        removed
    }

    /// Resolve a kind by id, falling back to alias lookup.
    pub async fn resolve_kind(&self, id_or_alias: &str) -> Result<Kind, CamError> {
        let cat = self.catalog.read().await;
        if let Some(k) = cat.kinds.get(id_or_alias) {
            return Ok(k.clone());
        }
        if let Some(target) = cat.alias_index.get(id_or_alias) {
            if let Some(k) = cat.kinds.get(target) {
                return Ok(k.clone());
            }
        }
        Err(CamError::new(ErrorCode::UnknownKind, format!("unknown kind: {id_or_alias}"))
            .with_context("id_or_alias", id_or_alias))
    }

    /// Fetch a specific schema version (or `latest_schema_version` if `version` is `None`).
    pub async fn get_schema_version(
        &self,
        kind_id: &str,
        version: Option<&str>,
    ) -> Result<SchemaVersionEntry, CamError> {
        let kind = self.resolve_kind(kind_id).await?;
        let wanted = version.unwrap_or(&kind.latest_schema_version);
        kind.version(wanted).cloned().ok_or_else(|| {
            CamError::new(ErrorCode::UnknownKind, format!("unknown schema version: {wanted}"))
                .with_context("kind", kind.id.clone())
                .with_context("version", wanted)
        })
    }

    /// Validate `data` against the kind's schema (latest, unless `version` given).
    pub async fn validate_data(
        &self,
        kind_id: &str,
        data: &Value,
        version: Option<&str>,
    ) -> Result<(), CamError> {
        let entry = self.get_schema_version(kind_id, version).await?;
        self.validators
            .validate(kind_id, &entry.version, &entry.json_schema, data)
            .await
    }

    /// Apply the kind's registered adapters to a deep copy of `data`.
    pub async fn adapt(
        &self,
        kind_id: &str,
        data: &Value,
        version: Option<&str>,
    ) -> Result<Value, CamError> {
        let entry = self.get_schema_version(kind_id, version).await?;
        Ok(dsl::apply_steps(data, &entry.adapters))
    }

    /// Walk `migrators[from=cur]` from `from_version` towards `to_version`
    /// (or `latest_schema_version` if unset), bounded by
    /// [`MIGRATION_HOP_LIMIT`]. Stops at the first missing hop and returns a
    /// partial result rather than erroring, so callers can decide whether a
    /// partial migration is acceptable.
    pub async fn migrate(
        &self,
        kind_id: &str,
        data: &Value,
        from_version: &str,
        to_version: Option<&str>,
    ) -> Result<MigrationOutcome, CamError> {
        let kind = self.resolve_kind(kind_id).await?;
        let target = to_version.unwrap_or(&kind.latest_schema_version).to_string();

        let mut current = data.clone();
        let mut current_version = from_version.to_string();
        let mut hops = 0usize;

        while current_version != target && hops < MIGRATION_HOP_LIMIT {
            let Some(entry) = kind.version(&current_version) else { break };
            let Some(step) = entry.migrators.iter().find(|m| m.from_version == current_version)
            else {
                break;
            };
            current = dsl::apply_steps(&current, &step.steps);
            current_version = step.to_version.clone();
            hops += 1;
        }

        Ok(MigrationOutcome {
            data: current,
            reached_target: current_version == target,
            reached_version: current_version,
        })
    }

    /// List a schema version's diagram recipes.
    pub async fn diagram_recipes(
        &self,
        kind_id: &str,
        version: Option<&str>,
    ) -> Result<Vec<cam_core::DiagramRecipe>, CamError> {
        Ok(self.get_schema_version(kind_id, version).await?.diagram_recipes)
    }

    /// Fetch a single diagram recipe by id.
    pub async fn diagram_recipe(
        &self,
        kind_id: &str,
        version: Option<&str>,
        recipe_id: &str,
    ) -> Result<cam_core::DiagramRecipe, CamError> {
        let recipes = self.diagram_recipes(kind_id, version).await?;
        recipes.into_iter().find(|r| r.id == recipe_id).ok_or_else(|| {
            CamError::new(ErrorCode::UnknownKind, format!("unknown diagram recipe: {recipe_id}"))
                .with_context("kind", kind_id)
                .with_context("recipe_id", recipe_id)
        })
    }

    /// Select the effective prompt for `(kind, latest_version)` given selectors.
    pub async fn select_prompt_for(
        &self,
        kind_id: &str,
        selectors: &BTreeMap<String, String>,
    ) -> Result<SelectedPrompt, CamError> {
        let entry = self.get_schema_version(kind_id, None).await?;
        let spec = entry.prompt.ok_or_else(|| {
            CamError::new(ErrorCode::UnknownKind, "kind has no prompt material")
                .with_context("kind", kind_id)
        })?;
        Ok(select_prompt(&spec, selectors))
    }

    /// All kinds currently marked `active`, sorted by id.
    pub async fn active_kinds(&self) -> Vec<Kind> {
        let cat = self.catalog.read().await;
        let mut out: Vec<Kind> = cat
            .kinds
            .values()
            .filter(|k| k.status == KindStatus::Active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}
