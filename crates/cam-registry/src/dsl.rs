//! The adapter/migrator DSL engine: a tiny interpreter for `{move, set,
//! defaults, delete}` programs over dotted paths into a JSON value.

use cam_core::AdapterStep;
use serde_json::Value;

/// Split a dotted path into its segments. Empty segments (leading/trailing/
/// doubled dots) are rejected by returning `None`, since they would produce
/// ambiguous inserts.
fn segments(path: &str) -> Option<Vec<&str>> {
    if path.is_empty() {
        return None;
    }
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(parts)
}

/// Read the value at `path`, or `None` if any segment is absent.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for seg in segments(path)? {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur)
}

/// Write `value` at `path`, creating intermediate objects as needed.
/// Silently no-ops on a malformed (empty-segment) path.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let Some(segs) = segments(path) else { return };
    let mut cur = root;
    for seg in &segs[..segs.len() - 1] {
        if !cur.is_object() {
            *cur = Value::Object(serde_json::Map::new());
        }
        cur = cur
            .as_object_mut()
            .expect("just ensured object")
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    if !cur.is_object() {
        *cur = Value::Object(serde_json::Map::new());
    }
    cur.as_object_mut()
        .expect("just ensured object")
        .insert(segs[segs.len() - 1].to_string(), value);
}

/// Remove the value at `path`, returning it if it was present.
pub fn delete_path(root: &mut Value, path: &str) -> Option<Value> {
    let segs = segments(path)?;
    let mut cur = root;
    for seg in &segs[..segs.len() - 1] {
        cur = cur.as_object_mut()?.get_mut(*seg)?;
    }
    cur.as_object_mut()?.remove(segs[segs.len() - 1])
}

/// Apply one DSL step to `data` in place.
pub fn apply_step(data: &mut Value, step: &AdapterStep) {
    match step {
        AdapterStep::Move { from, to } => {
            if let Some(v) = delete_path(data, from) {
                set_path(data, to, v);
            }
        }
        AdapterStep::Set { path, value } => {
            set_path(data, path, value.clone());
        }
        AdapterStep::Defaults { path, value } => {
            if get_path(data, path).is_none() {
                set_path(data, path, value.clone());
            }
        }
        AdapterStep::Delete { path } => {
            delete_path(data, path);
        }
    }
}

/// Apply a full DSL program over a deep copy of `data`, returning the
/// transformed value. The input is never mutated.
#[must_use]
pub fn apply_steps(data: &Value, steps: &[AdapterStep]) -> Value {
    let mut out = data.clone();
    for step in steps {
        apply_step(&mut out, step);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_creates_intermediate_objects() {
        let mut v = json!({});
        set_path(&mut v, "a.b.c", json!(1));
        assert_eq!(v, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn get_path_returns_none_on_missing_segment() {
        let v = json!({"a": {"b": 1}});
        assert!(get_path(&v, "a.x").is_none());
        assert!(get_path(&v, "a.b.c").is_none());
    }

    #[test]
    fn delete_path_removes_and_returns_value() {
        let mut v = json!({"a": {"b": 1}});
        let removed = delete_path(&mut v, "a.b");
        assert_eq!(removed, Some(json!(1)));
        assert_eq!(v, json!({"a": {}}));
    }

    #[test]
    fn move_relocates_value() {
        let mut data = json!({"old_field": "x"});
        apply_step(&mut data, &AdapterStep::Move {
            from: "old_field".to_string(),
            to: "new_field".to_string(),
        });
        assert_eq!(data, json!({"new_field": "x"}));
    }

    #[test]
    fn move_of_absent_field_is_noop() {
        let mut data = json!({});
        apply_step(&mut data, &AdapterStep::Move {
            from: "missing".to_string(),
            to: "target".to_string(),
        });
        assert_eq!(data, json!({}));
    }

    #[test]
    fn defaults_does_not_overwrite_existing() {
        let mut data = json!({"paragraphs": ["p1"]});
        apply_step(&mut data, &AdapterStep::Defaults {
            path: "paragraphs".to_string(),
            value: json!([]),
        });
        assert_eq!(data, json!({"paragraphs": ["p1"]}));
    }

    #[test]
    fn defaults_sets_when_absent() {
        let mut data = json!({});
        apply_step(&mut data, &AdapterStep::Defaults {
            path: "paragraphs".to_string(),
            value: json!([]),
        });
        assert_eq!(data, json!({"paragraphs": []}));
    }

    #[test]
    fn apply_steps_does_not_mutate_input() {
        let data = json!({"a": 1});
        let out = apply_steps(&data, &[AdapterStep::Set { path: "b".to_string(), value: json!(2) }]);
        assert_eq!(data, json!({"a": 1}));
        assert_eq!(out, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn malformed_path_is_ignored() {
        let mut data = json!({});
        set_path(&mut data, "", json!(1));
        set_path(&mut data, "a..b", json!(1));
        assert_eq!(data, json!({}));
    }
}
