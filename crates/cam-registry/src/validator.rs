//! Compiled-schema cache. Validators are expensive to build, so they are
//! cached by `kind@version#sha256(schema)` and invalidated wholesale when the
//! registry ETag changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cam_error::{CamError, ErrorCode};
use jsonschema::Validator;
use serde_json::Value;
use tokio::sync::RwLock;

fn cache_key(kind: &str, version: &str, schema: &Value) -> String {
    let schema_hash = cam_core::fingerprint(schema).unwrap_or_default();
    format!("{kind}@{version}#{schema_hash}")
}

/// A cache of compiled JSON Schema validators, keyed by kind/version/schema
/// content. Degrades to a permissive no-op validator (logging once) if a
/// schema fails to compile, so a single malformed kind never takes down
/// validation for the rest of the registry.
#[derive(Default)]
pub struct ValidatorCache {
    entries: RwLock<HashMap<String, Arc<Validator>>>,
    degraded_warned: AtomicBool,
}

impl ValidatorCache {
    /// Construct an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached validator. Called on registry ETag change.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of validators currently cached.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Compile (or fetch from cache) the validator for `schema`, then
    /// validate `data` against it.
    pub async fn validate(
        &self,
        kind: &str,
        version: &str,
        schema: &Value,
        data: &Value,
    ) -> Result<(), CamError> {
        let key = cache_key(kind, version, schema);
        if let Some(v) = self.entries.read().await.get(&key) {
            return Self::run(v, data);
        }

        let compiled = match jsonschema::validator_for(schema) {
            Ok(v) => Arc::new(v),
            Err(e) => {
                if !self.degraded_warned.swap(true, Ordering::SeqCst) {
                    tracing::warn!(
                        kind,
                        version,
                        error = %e,
                        "schema failed to compile; degrading to no-op validation for this key"
                    );
                }
                return Ok(());
            }
        };
        self.entries.write().await.insert(key, compiled.clone());
        Self::run(&compiled, data)
    }

    fn run(validator: &Validator, data: &Value) -> Result<(), CamError> {
        if let Some(first) = validator.iter_errors(data).next() {
            let pointer = first.instance_path.to_string();
            return Err(CamError::new(ErrorCode::SchemaValidation, first.to_string())
                .with_context("instance_path", pointer));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn program_schema() -> Value {
        json!({
            "type": "object",
            "properties": {"program_id": {"type": "string"}},
            "required": ["program_id"],
            "additionalProperties": false
        })
    }

    #[tokio::test]
    async fn validates_conformant_data() {
        let cache = ValidatorCache::new();
        let res = cache
            .validate("cam.cobol.program", "1.0.0", &program_schema(), &json!({"program_id": "P1"}))
            .await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn rejects_non_conformant_data_with_pointer() {
        let cache = ValidatorCache::new();
        let res = cache
            .validate("cam.cobol.program", "1.0.0", &program_schema(), &json!({"extra": 1}))
            .await;
        let err = res.unwrap_err();
        assert_eq!(err.code, ErrorCode::SchemaValidation);
    }

    #[tokio::test]
    async fn caches_compiled_validator_across_calls() {
        let cache = ValidatorCache::new();
        let schema = program_schema();
        cache.validate("k", "1.0.0", &schema, &json!({"program_id": "A"})).await.unwrap();
        assert_eq!(cache.len().await, 1);
        cache.validate("k", "1.0.0", &schema, &json!({"program_id": "B"})).await.unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn distinct_schemas_get_distinct_cache_entries() {
        let cache = ValidatorCache::new();
        cache.validate("k", "1.0.0", &program_schema(), &json!({"program_id": "A"})).await.unwrap();
        cache.validate("k", "2.0.0", &json!({"type": "object"}), &json!({})).await.unwrap();
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn clear_empties_cache() {
        let cache = ValidatorCache::new();
        cache.validate("k", "1.0.0", &program_schema(), &json!({"program_id": "A"})).await.unwrap();
        cache.clear().await;
        assert_eq!(cache.len().await, 0);
    }
}
