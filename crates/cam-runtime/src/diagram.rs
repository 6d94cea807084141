// SPDX-License-Identifier: MIT OR Apache-2.0
//! Renders a kind's [`DiagramRecipe`]s into Mermaid [`DiagramInstruction`]s
//! for one produced artifact.
//!
//! Rendering is deterministic: each instruction opens with a directive
//! comment recording the kind, recipe id, and a fingerprint of the source
//! data, so re-running a step against unchanged data produces byte-identical
//! output and `diagram_fingerprint` can participate in upsert noop checks.
//! Large bodies are split into `{id}-part-{n}` chunks sized to an
//! approximate token budget; `mindmap` views are additionally sanitised so
//! stray `-->` sequences in field values never corrupt the outline.

use cam_core::{fingerprint, DiagramInstruction, DiagramRecipe};
use serde_json::Value;

/// Rough characters-per-token ratio used to size chunk boundaries.
const CHARS_PER_TOKEN: usize = 4;
/// Token budget per rendered chunk.
const TOKEN_BUDGET: usize = 1500;

/// Render every recipe against one artifact's `data`, in recipe order.
#[must_use]
pub fn render_diagrams(kind: &str, recipes: &[DiagramRecipe], data: &Value) -> Vec<DiagramInstruction> {
    let data_fp = fingerprint(data).unwrap_or_default();
    recipes
        .iter()
        .flat_map(|recipe| render_recipe(kind, recipe, data, &data_fp))
        .collect()
}

fn render_recipe(kind: &str, recipe: &DiagramRecipe, data: &Value, data_fp: &str) -> Vec<DiagramInstruction> {
    let header = directive_header(kind, &recipe.id, data_fp);
    let body = render_body(recipe, data);
    let chunks = chunk_body(&header, &body);
    let multi = chunks.len() > 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, text)| DiagramInstruction {
            id: if multi { format!("{}-part-{}", recipe.id, i + 1) } else { recipe.id.clone() },
            view: recipe.view.clone(),
            language: recipe.language.clone(),
            instructions: text,
        })
        .collect()
}

fn directive_header(kind: &str, recipe_id: &str, data_fp: &str) -> String {
    format!("%% kind={kind} recipe={recipe_id} fingerprint={data_fp}")
}

fn render_body(recipe: &DiagramRecipe, data: &Value) -> String {
    if recipe.view == "mindmap" {
        render_mindmap(data)
    } else {
        render_graph(recipe, data)
    }
}

// ---------------------------------------------------------------------------
// graph / flowchart rendering
// ---------------------------------------------------------------------------

fn render_graph(recipe: &DiagramRecipe, data: &Value) -> String {
    let direction = recipe
        .renderer_hints
        .as_ref()
        .and_then(|h| h.get("direction"))
        .and_then(Value::as_str)
        .unwrap_or("TD");
    let keyword = if recipe.view == "flow" { "flowchart" } else { "graph" };
    let mut lines = vec![format!("{keyword} {direction}")];
    let mut counter = 0usize;
    let root = next_node_id(&mut counter);
    lines.push(format!("  {root}[\"{}\"]", mermaid_escape(&recipe.view)));
    walk_graph(data, &root, &mut counter, &mut lines);
    lines.join("\n")
}

fn next_node_id(counter: &mut usize) -> String {
    let id = format!("n{counter}");
    *counter += 1;
    id
}

fn walk_graph(value: &Value, parent_id: &str, counter: &mut usize, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let node_id = next_node_id(counter);
                lines.push(format!("  {node_id}[\"{}\"]", mermaid_escape(key)));
                lines.push(format!("  {parent_id} --> {node_id}"));
                walk_graph(child, &node_id, counter, lines);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let node_id = next_node_id(counter);
                lines.push(format!("  {node_id}[\"[{i}]\"]"));
                lines.push(format!("  {parent_id} --> {node_id}"));
                walk_graph(item, &node_id, counter, lines);
            }
        }
        leaf => {
            let node_id = next_node_id(counter);
            lines.push(format!("  {node_id}[\"{}\"]", mermaid_escape(&leaf_str(leaf))));
            lines.push(format!("  {parent_id} --> {node_id}"));
        }
    }
}

// ---------------------------------------------------------------------------
// mindmap rendering
// ---------------------------------------------------------------------------

fn render_mindmap(data: &Value) -> String {
    let mut lines = vec!["mindmap".to_string(), "  root".to_string()];
    walk_mindmap(data, 2, &mut lines);
    lines.join("\n")
}

fn walk_mindmap(value: &Value, depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                lines.push(format!("{indent}{}", sanitize_mindmap_label(key)));
                walk_mindmap(child, depth + 1, lines);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                lines.push(format!("{indent}[{i}]"));
                walk_mindmap(item, depth + 1, lines);
            }
        }
        leaf => {
            lines.push(format!("{indent}{}", sanitize_mindmap_label(&leaf_str(leaf))));
        }
    }
}

/// Strips arrow sequences and newlines so a field's own content can never be
/// mistaken for mindmap structure.
fn sanitize_mindmap_label(label: &str) -> String {
    label.replace("-->", "-").replace(['\n', '\r'], " ")
}

// ---------------------------------------------------------------------------
// shared helpers
// ---------------------------------------------------------------------------

fn mermaid_escape(s: &str) -> String {
    s.replace('"', "'").replace(['\n', '\r'], " ")
}

fn leaf_str(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Splits `body` into chunks no larger than the token budget, re-emitting
/// `header` at the top of every chunk so each remains a standalone, valid
/// Mermaid document.
fn chunk_body(header: &str, body: &str) -> Vec<String> {
    let budget_chars = TOKEN_BUDGET * CHARS_PER_TOKEN;
    if header.len() + body.len() + 1 <= budget_chars {
        return vec![format!("{header}\n{body}")];
    }

    let mut chunks = Vec::new();
    let mut current = header.to_string();
    for line in body.lines() {
        if current.len() + line.len() + 1 > budget_chars && current != header {
            chunks.push(current);
            current = header.to_string();
        }
        current.push('\n');
        current.push_str(line);
    }
    if current != header {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recipe(id: &str, view: &str) -> DiagramRecipe {
        DiagramRecipe { id: id.to_string(), view: view.to_string(), language: "mermaid".to_string(), renderer_hints: None }
    }

    #[test]
    fn rendering_is_deterministic() {
        let data = json!({"program_id": "PAYROLL01", "paragraphs": ["MAIN", "CALC"]});
        let a = render_diagrams("cam.cobol.program", &[recipe("flow", "flow")], &data);
        let b = render_diagrams("cam.cobol.program", &[recipe("flow", "flow")], &data);
        assert_eq!(a, b);
    }

    #[test]
    fn graph_view_emits_flowchart_header_and_edges() {
        let data = json!({"program_id": "PAYROLL01"});
        let out = render_diagrams("cam.cobol.program", &[recipe("flow", "flow")], &data);
        assert_eq!(out.len(), 1);
        assert!(out[0].instructions.contains("flowchart TD"));
        assert!(out[0].instructions.contains("-->"));
    }

    #[test]
    fn mindmap_view_never_contains_arrows() {
        let data = json!({"note": "a --> b", "items": ["x --> y"]});
        let out = render_diagrams("cam.cobol.program", &[recipe("structure", "mindmap")], &data);
        assert_eq!(out.len(), 1);
        assert!(!out[0].instructions.contains("-->"));
        assert!(out[0].instructions.starts_with("%% kind=cam.cobol.program"));
    }

    #[test]
    fn large_bodies_are_chunked_with_shared_header() {
        let mut paragraphs = Vec::new();
        for i in 0..2000 {
            paragraphs.push(json!({ "name": format!("PARA-{i:04}"), "lines": i }));
        }
        let data = json!({ "paragraphs": paragraphs });
        let out = render_diagrams("cam.cobol.program", &[recipe("flow", "flow")], &data);
        assert!(out.len() > 1);
        assert!(out.iter().all(|d| d.instructions.starts_with("%% kind=")));
        assert!(out[0].id.ends_with("-part-1"));
    }

    #[test]
    fn empty_recipe_list_produces_nothing() {
        let data = json!({"program_id": "PAYROLL01"});
        assert!(render_diagrams("cam.cobol.program", &[], &data).is_empty());
    }
}
