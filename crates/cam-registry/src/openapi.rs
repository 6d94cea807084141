//! Dynamic OpenAPI typing: compile a discriminated union of envelope models,
//! one per active kind, so generated clients see `{kind: "cam.cobol.program",
//! data: <that kind's JSON Schema>}` rather than an opaque blob.

use cam_core::Kind;
use serde_json::{json, Value};

/// A compiled discriminated union over the currently active kinds.
#[derive(Debug, Clone)]
pub struct ArtifactEnvelopeUnion {
    /// Registry version this union was compiled from; callers recompile on
    /// ETag change (hot-swap is allowed, not required).
    pub registry_version: u64,
    /// The `oneOf` schema, one branch per active kind.
    pub schema: Value,
}

/// Compile the union schema for `kinds` (expected to already be filtered to
/// `active` status), stamped with `registry_version`.
#[must_use]
pub fn compile_union(kinds: &[Kind], registry_version: u64) -> ArtifactEnvelopeUnion {
    let branches: Vec<Value> = kinds
        .iter()
        .filter_map(|k| {
            let data_schema = k.latest()?.json_schema.clone();
            Some(json!({
                "type": "object",
                "properties": {
                    "kind": {"const": k.id},
                    "data": data_schema,
                },
                "required": ["kind", "data"],
            }))
        })
        .collect();

    ArtifactEnvelopeUnion {
        registry_version,
        schema: json!({
            "oneOf": branches,
            "discriminator": {"propertyName": "kind"},
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cam_core::{AdditionalPropsPolicy, IdentityRule, KindStatus, SchemaVersionEntry};
    use std::collections::BTreeSet;

    fn kind(id: &str) -> Kind {
        Kind {
            id: id.to_string(),
            category: "test".to_string(),
            status: KindStatus::Active,
            aliases: BTreeSet::new(),
            latest_schema_version: "1.0.0".to_string(),
            schema_versions: vec![SchemaVersionEntry {
                version: "1.0.0".to_string(),
                json_schema: json!({"type": "object"}),
                additional_props_policy: AdditionalPropsPolicy::Allow,
                identity: IdentityRule::Single { path: "name".to_string() },
                adapters: vec![],
                migrators: vec![],
                diagram_recipes: vec![],
                depends_on: cam_core::DependsOn::default(),
                prompt: None,
            }],
        }
    }

    #[test]
    fn compiles_one_branch_per_kind() {
        let union = compile_union(&[kind("a"), kind("b")], 3);
        assert_eq!(union.schema["oneOf"].as_array().unwrap().len(), 2);
        assert_eq!(union.registry_version, 3);
    }

    #[test]
    fn branch_discriminates_on_kind_const() {
        let union = compile_union(&[kind("cam.cobol.program")], 1);
        let branch = &union.schema["oneOf"][0];
        assert_eq!(branch["properties"]["kind"]["const"], "cam.cobol.program");
    }

    #[test]
    fn empty_kind_list_yields_empty_union() {
        let union = compile_union(&[], 0);
        assert!(union.schema["oneOf"].as_array().unwrap().is_empty());
    }
}
