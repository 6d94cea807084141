//! The kind catalog: schema-versioned artifact types, their identity rules,
//! migration/adapter DSL, diagram recipes, and prompt selection data.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a kind in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindStatus {
    /// Resolvable and eligible for new production.
    Active,
    /// Resolvable for reads/migration but should not be produced by new runs.
    Deprecated,
}

/// Whether a schema version rejects unknown top-level properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdditionalPropsPolicy {
    /// `additionalProperties: false` is enforced.
    Forbid,
    /// Unknown properties pass through validation untouched.
    Allow,
}

/// How an artifact's natural key is computed from its `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum IdentityRule {
    /// Concatenate the values at these dotted paths (in order) plus `name`.
    Composite { paths: Vec<String> },
    /// A single dotted path into `data` supplies the key.
    Single { path: String },
}

/// One step of an adapter or migrator DSL program, applied over a dotted
/// path into a deep copy of `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum AdapterStep {
    /// Move the value at `from` to `to`, removing `from`.
    Move { from: String, to: String },
    /// Set `path` to a literal value, overwriting if present.
    Set { path: String, value: serde_json::Value },
    /// Set `path` to `value` only if it is currently absent.
    Defaults { path: String, value: serde_json::Value },
    /// Remove the value at `path` if present.
    Delete { path: String },
}

/// A migrator program for one `from_version -> to_version` hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratorStep {
    /// Source schema version this program starts from.
    pub from_version: String,
    /// Destination schema version this program produces.
    pub to_version: String,
    /// The DSL program applied to walk `from_version` data to `to_version`.
    pub steps: Vec<AdapterStep>,
}

/// A renderable Mermaid recipe attached to a schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramRecipe {
    /// Stable recipe identifier, unique within the kind.
    pub id: String,
    /// Logical view this recipe renders (e.g. `flow`, `structure`).
    pub view: String,
    /// Diagram language; always `mermaid` in this platform.
    #[serde(default = "default_language")]
    pub language: String,
    /// Renderer-specific hints (e.g. direction, theme) passed through as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renderer_hints: Option<serde_json::Value>,
}

fn default_language() -> String {
    "mermaid".to_string()
}

/// Declared dependencies of a kind on other kinds, used to size context
/// windows and order adapter passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependsOn {
    /// Kinds that must be present for this kind to be meaningfully produced.
    #[serde(default)]
    pub hard: Vec<String>,
    /// Kinds that enrich context but are not required.
    #[serde(default)]
    pub soft: Vec<String>,
    /// Free-text hint surfaced to prompt assembly about why these deps exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_hint: Option<String>,
}

/// A single prompt variant, selected when its `when` selectors all match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptVariant {
    /// Case-insensitive selector match required to pick this variant.
    #[serde(default)]
    pub when: BTreeMap<String, String>,
    /// Overrides the base system prompt when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Overrides the base user template when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_template: Option<String>,
}

/// Prompt material attached to a schema version for LLM-backed steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSpec {
    /// Base system prompt.
    pub system: String,
    /// Base user prompt template, if this kind is ever produced via LLM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_template: Option<String>,
    /// Whether the model is required to emit strict JSON.
    #[serde(default = "default_strict_json")]
    pub strict_json: bool,
    /// Selector-gated overrides of the base prompt.
    #[serde(default)]
    pub variants: Vec<PromptVariant>,
    /// Revision marker for prompt material, bumped on any prompt edit.
    pub prompt_rev: u32,
}

fn default_strict_json() -> bool {
    true
}

/// One schema version of a kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaVersionEntry {
    /// Semver string for this version.
    pub version: String,
    /// Draft 2020-12 JSON Schema for `data`.
    pub json_schema: serde_json::Value,
    /// Whether unknown top-level properties are rejected.
    pub additional_props_policy: AdditionalPropsPolicy,
    /// How to compute the natural key for artifacts of this version.
    pub identity: IdentityRule,
    /// Forward-normalization steps applied after ingestion.
    #[serde(default)]
    pub adapters: Vec<AdapterStep>,
    /// Version-to-version migration programs, keyed by source version.
    #[serde(default)]
    pub migrators: Vec<MigratorStep>,
    /// Mermaid recipes available for artifacts of this version.
    #[serde(default)]
    pub diagram_recipes: Vec<DiagramRecipe>,
    /// Declared relationships to other kinds.
    #[serde(default)]
    pub depends_on: DependsOn,
    /// Prompt material, present when this kind may be produced by an LLM step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptSpec>,
}

/// Registry-level bookkeeping updated on every mutating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryMeta {
    /// Content hash over `(registry_version, updated_at)`, recomputed on every mutation.
    pub etag: String,
    /// Monotonically increasing counter bumped by any kind mutation.
    pub registry_version: u64,
    /// Timestamp of the most recent mutation.
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A versioned artifact type known to the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kind {
    /// Dotted identifier, e.g. `cam.cobol.program`.
    pub id: String,
    /// Grouping label used for browsing and diagram layout.
    pub category: String,
    /// Whether this kind may be targeted by new runs.
    pub status: KindStatus,
    /// Alternate ids that resolve to this kind.
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    /// Version string of `schema_versions` treated as current by default.
    pub latest_schema_version: String,
    /// All schema versions ever published for this kind.
    pub schema_versions: Vec<SchemaVersionEntry>,
}

impl Kind {
    /// The schema version entry matching `latest_schema_version`, if present.
    #[must_use]
    pub fn latest(&self) -> Option<&SchemaVersionEntry> {
        self.schema_versions
            .iter()
            .find(|v| v.version == self.latest_schema_version)
    }

    /// The schema version entry matching `version`, if present.
    #[must_use]
    pub fn version(&self, version: &str) -> Option<&SchemaVersionEntry> {
        self.schema_versions.iter().find(|v| v.version == version)
    }

    /// True if `candidate` resolves to this kind, either as its `id` or one
    /// of its `aliases`.
    #[must_use]
    pub fn resolves(&self, candidate: &str) -> bool {
        self.id == candidate || self.aliases.contains(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_kind() -> Kind {
        Kind {
            id: "cam.cobol.program".to_string(),
            category: "cobol".to_string(),
            status: KindStatus::Active,
            aliases: BTreeSet::from(["cam.cobol.prog".to_string()]),
            latest_schema_version: "1.1.0".to_string(),
            schema_versions: vec![
                SchemaVersionEntry {
                    version: "1.0.0".to_string(),
                    json_schema: serde_json::json!({"type": "object"}),
                    additional_props_policy: AdditionalPropsPolicy::Forbid,
                    identity: IdentityRule::Single { path: "program_id".to_string() },
                    adapters: vec![],
                    migrators: vec![],
                    diagram_recipes: vec![],
                    depends_on: DependsOn::default(),
                    prompt: None,
                },
                SchemaVersionEntry {
                    version: "1.1.0".to_string(),
                    json_schema: serde_json::json!({"type": "object"}),
                    additional_props_policy: AdditionalPropsPolicy::Forbid,
                    identity: IdentityRule::Single { path: "program_id".to_string() },
                    adapters: vec![],
                    migrators: vec![MigratorStep {
                        from_version: "1.0.0".to_string(),
                        to_version: "1.1.0".to_string(),
                        steps: vec![AdapterStep::Defaults {
                            path: "paragraphs".to_string(),
                            value: serde_json::json!([]),
                        }],
                    }],
                    diagram_recipes: vec![],
                    depends_on: DependsOn::default(),
                    prompt: None,
                },
            ],
        }
    }

    #[test]
    fn resolves_by_id_or_alias() {
        let k = sample_kind();
        assert!(k.resolves("cam.cobol.program"));
        assert!(k.resolves("cam.cobol.prog"));
        assert!(!k.resolves("cam.jcl.job"));
    }

    #[test]
    fn latest_returns_matching_entry() {
        let k = sample_kind();
        assert_eq!(k.latest().unwrap().version, "1.1.0");
    }

    #[test]
    fn version_lookup_misses_return_none() {
        let k = sample_kind();
        assert!(k.version("9.9.9").is_none());
    }

    #[test]
    fn prompt_spec_defaults_strict_json_true() {
        let v: PromptSpec = serde_json::from_value(serde_json::json!({
            "system": "be precise",
            "prompt_rev": 1
        }))
        .unwrap();
        assert!(v.strict_json);
    }

    #[test]
    fn diagram_recipe_defaults_to_mermaid() {
        let r: DiagramRecipe = serde_json::from_value(serde_json::json!({
            "id": "flow",
            "view": "flow"
        }))
        .unwrap();
        assert_eq!(r.language, "mermaid");
    }
}
