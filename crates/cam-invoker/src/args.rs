// SPDX-License-Identifier: MIT OR Apache-2.0
//! Argument sanitization and `${name}` interpolation applied to every tool
//! call before it crosses the wire (§4.5).

use std::collections::BTreeMap;

use serde_json::Value;

/// Keys stripped from top-level tool arguments before dispatch: these carry
/// orchestrator bookkeeping, not tool input.
const STRIPPED_KEYS: &[&str] = &["inputs", "context", "correlation_id", "correlationId", "__metadata__"];

/// Remove orchestrator-only keys from a tool call's top-level arguments.
///
/// Non-object values pass through unchanged.
#[must_use]
pub fn sanitize_args(args: &Value) -> Value {
    match args {
        Value::Object(map) => {
            let cleaned: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !STRIPPED_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(cleaned)
        }
        other => other.clone(),
    }
}

/// Restrict `args` to only the keys declared in `allowed`, if non-empty. An
/// empty allow-list means "no restriction" (the tool declared no schema).
#[must_use]
pub fn apply_allow_list(args: Value, allowed: &[String]) -> Value {
    if allowed.is_empty() {
        return args;
    }
    match args {
        Value::Object(map) => {
            Value::Object(map.into_iter().filter(|(k, _)| allowed.contains(k)).collect())
        }
        other => other,
    }
}

/// Interpolate `${name}` and `${name:-default}` placeholders in every string
/// leaf of `value`, recursively, using `vars` for lookups. An unset
/// placeholder with no default resolves to the empty string.
#[must_use]
pub fn interpolate(value: &Value, vars: &BTreeMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_str(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate(v, vars)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), interpolate(v, vars))).collect())
        }
        other => other.clone(),
    }
}

fn interpolate_str(input: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        let rest = &input[i..];
        if rest.starts_with("${") {
            if let Some(end) = rest[2..].find('}') {
                let inner = &rest[2..2 + end];
                let (name, default) = match inner.split_once(":-") {
                    Some((n, d)) => (n, Some(d)),
                    None => (inner, None),
                };
                match vars.get(name) {
                    Some(v) => out.push_str(v),
                    None => {
                        if let Some(d) = default {
                            out.push_str(d);
                        }
                    }
                }
                i += 2 + end + 1;
                continue;
            }
        }
        let ch = rest.chars().next().expect("i < input.len()");
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}
