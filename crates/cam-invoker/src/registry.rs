// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tool schema index — resolves a bound tool's declared `input_schema`
//! property names, used to allow-list call arguments before dispatch (§4.5).

use std::collections::BTreeMap;

use cam_core::ToolBinding;

/// Indexes a pack's tool bindings by `tool_key` for allow-list lookups.
#[derive(Debug, Clone, Default)]
pub struct ToolSchemaIndex {
    tools: BTreeMap<String, Vec<String>>,
}

impl ToolSchemaIndex {
    /// Build an index from a pack's tool table, extracting each binding's
    /// `input_schema.properties` key names (if declared).
    pub fn from_bindings<'a>(bindings: impl IntoIterator<Item = &'a ToolBinding>) -> Self {
        let mut tools = BTreeMap::new();
        for binding in bindings {
            let allowed = binding
                .input_schema
                .as_ref()
                .and_then(|s| s.get("properties"))
                .and_then(|p| p.as_object())
                .map(|props| props.keys().cloned().collect())
                .unwrap_or_default();
            tools.insert(binding.tool_key.clone(), allowed);
        }
        Self { tools }
    }

    /// Allowed top-level argument keys for `tool_key`, or an empty slice if
    /// the tool declared no schema (meaning: no restriction).
    #[must_use]
    pub fn allowed_keys(&self, tool_key: &str) -> &[String] {
        self.tools.get(tool_key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `tool_key` is present in this index.
    #[must_use]
    pub fn contains(&self, tool_key: &str) -> bool {
        self.tools.contains_key(tool_key)
    }

    /// Number of tools indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the index holds no tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(tool_key: &str, schema: Option<serde_json::Value>) -> ToolBinding {
        ToolBinding {
            tool_key: tool_key.to_string(),
            tool_name: tool_key.to_string(),
            input_schema: schema,
            integration: None,
        }
    }

    #[test]
    fn extracts_property_names_from_schema() {
        let b = binding(
            "parse",
            Some(serde_json::json!({"type": "object", "properties": {"path": {}, "root": {}}})),
        );
        let index = ToolSchemaIndex::from_bindings(&[b]);
        let mut keys = index.allowed_keys("parse").to_vec();
        keys.sort();
        assert_eq!(keys, vec!["path".to_string(), "root".to_string()]);
    }

    #[test]
    fn missing_schema_yields_empty_allow_list() {
        let b = binding("parse", None);
        let index = ToolSchemaIndex::from_bindings(&[b]);
        assert!(index.allowed_keys("parse").is_empty());
    }

    #[test]
    fn unknown_tool_key_yields_empty_slice() {
        let index = ToolSchemaIndex::default();
        assert!(index.allowed_keys("nope").is_empty());
        assert!(!index.contains("nope"));
    }
}
