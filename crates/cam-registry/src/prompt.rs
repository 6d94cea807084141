//! Prompt variant selection: pick the first variant whose `when` selectors
//! all match case-insensitively, falling back to the base prompt.

use std::collections::BTreeMap;

use cam_core::PromptSpec;
use serde::Serialize;

/// The effective system/user prompt after variant selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedPrompt {
    /// Effective system prompt.
    pub system: String,
    /// Effective user template, if the base or selected variant set one.
    pub user_template: Option<String>,
    /// Whether strict JSON output is required.
    pub strict_json: bool,
}

/// Select the effective prompt for `spec` given caller-provided `selectors`
/// (e.g. `{"paradigm": "procedural", "style": "terse"}`).
#[must_use]
pub fn select_prompt(spec: &PromptSpec, selectors: &BTreeMap<String, String>) -> SelectedPrompt {
    for variant in &spec.variants {
        if matches(&variant.when, selectors) {
            return SelectedPrompt {
                system: variant.system.clone().unwrap_or_else(|| spec.system.clone()),
                user_template: variant
                    .user_template
                    .clone()
                    .or_else(|| spec.user_template.clone()),
                strict_json: spec.strict_json,
            };
        }
    }
    SelectedPrompt {
        system: spec.system.clone(),
        user_template: spec.user_template.clone(),
        strict_json: spec.strict_json,
    }
}

fn matches(when: &BTreeMap<String, String>, selectors: &BTreeMap<String, String>) -> bool {
    if when.is_empty() {
        return false;
    }
    when.iter().all(|(k, v)| {
        selectors
            .get(k)
            .is_some_and(|s| s.eq_ignore_ascii_case(v))
    })
}
