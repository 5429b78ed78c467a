use crate::config::ServerConfig;
use crate::document::DocumentStore;
use crate::position::path_at_line;
use crate::schema::navigator::{branch_list, follow_ref, SchemaNode};
use crate::schema::{CompiledSchema, SchemaStore};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, CompletionParams, CompletionResponse, Documentation,
    InsertTextFormat, MarkupContent, MarkupKind, Position,
};
use tracing::debug;

pub async fn handle_completion(
    documents: &Arc<DocumentStore>,
    schemas: &Arc<SchemaStore>,
    config: &ServerConfig,
    params: CompletionParams,
) -> Option<CompletionResponse> {
    let uri = &params.text_document_position.text_document.uri;
    let pos = params.text_document_position.position;

    let text = documents.get_text(uri)?;
    let source = config.schema_source()?;
    let schema = schemas.get_or_load(&source).await.ok()?;

    let items = completions_at(&text, pos, &schema);
    if items.is_empty() {
        return None;
    }
    Some(CompletionResponse::Array(items))
}

/// Suggestions for the cursor position. At root indentation every root
/// property is offered; deeper in, the raw schema is walked to the node at
/// the indentation-derived path, failing closed (empty list) when any
/// segment cannot be resolved.
pub fn completions_at(text: &str, position: Position, schema: &CompiledSchema) -> Vec<CompletionItem> {
    let line_text = text
        .lines()
        .nth(position.line as usize)
        .unwrap_or("")
        .trim_end_matches('\r');
    let indent = line_text.len() - line_text.trim_start_matches(' ').len();

    let root = SchemaNode::new(&schema.raw, &schema.raw);
    let node = if indent == 0 {
        Some(root)
    } else {
        let level = indent / 2;
        let mut path = path_at_line(text, position.line);
        path.truncate(level);
        debug!("Completion path {path:?} at level {level}");
        root.navigate(&path)
    };

    match node {
        Some(node) => collect_suggestions(&node),
        None => Vec::new(),
    }
}

/// Sort-text band per suggestion source: defaults first, then enum values,
/// examples, properties, and pattern-property examples. The index suffix
/// keeps declaration order within each band.
fn sort_key(band: u8, index: usize) -> String {
    format!("{band}_{index:03}")
}

fn collect_suggestions(node: &SchemaNode) -> Vec<CompletionItem> {
    let resolved = node.resolved();
    let root = node.root;

    // The node itself plus each of its union branches contribute.
    let mut targets: Vec<&Value> = vec![resolved];
    for branch in branch_list(resolved, "oneOf") {
        targets.push(follow_ref(branch, root, &mut HashSet::new()).unwrap_or(branch));
    }

    let mut items = Vec::new();
    let mut seen: HashSet<(String, bool)> = HashSet::new();

    for target in targets {
        if let Some(default) = target.get("default") {
            push_value_item(&mut items, &mut seen, default, sort_key(0, 0));
        }

        if let Some(values) = target.get("enum").and_then(Value::as_array) {
            for (i, value) in values.iter().enumerate() {
                push_value_item(&mut items, &mut seen, value, sort_key(1, i));
            }
        }

        if let Some(examples) = target.get("examples").and_then(Value::as_array) {
            for (i, example) in examples.iter().enumerate() {
                push_value_item(&mut items, &mut seen, example, sort_key(2, i));
            }
        }

        if let Some(properties) = target.get("properties").and_then(Value::as_object) {
            for (i, (key, sub)) in properties.iter().enumerate() {
                let sub = follow_ref(sub, root, &mut HashSet::new()).unwrap_or(sub);
                push_key_item(&mut items, &mut seen, key, sub, sort_key(3, i));
            }
        }

        // Pattern-property examples double as suggested key names.
        if let Some(patterns) = target.get("patternProperties").and_then(Value::as_object) {
            for sub in patterns.values() {
                let resolved_sub = follow_ref(sub, root, &mut HashSet::new()).unwrap_or(sub);
                // Example key names may sit on the `$ref` wrapper or on the
                // referent itself.
                let examples = sub
                    .get("examples")
                    .or_else(|| resolved_sub.get("examples"))
                    .and_then(Value::as_array);
                let Some(examples) = examples else {
                    continue;
                };
                for (i, example) in examples.iter().enumerate() {
                    if let Some(name) = example.as_str() {
                        push_key_item(&mut items, &mut seen, name, resolved_sub, sort_key(4, i));
                    }
                }
            }
        }
    }

    items
}

fn push_value_item(
    items: &mut Vec<CompletionItem>,
    seen: &mut HashSet<(String, bool)>,
    value: &Value,
    sort_text: String,
) {
    let label = scalar_label(value);
    if !seen.insert((label.clone(), false)) {
        return;
    }
    items.push(CompletionItem {
        label: label.clone(),
        kind: Some(CompletionItemKind::VALUE),
        insert_text: Some(label),
        insert_text_format: Some(InsertTextFormat::PLAIN_TEXT),
        sort_text: Some(sort_text),
        ..Default::default()
    });
}

fn push_key_item(
    items: &mut Vec<CompletionItem>,
    seen: &mut HashSet<(String, bool)>,
    key: &str,
    schema: &Value,
    sort_text: String,
) {
    if !seen.insert((key.to_string(), true)) {
        return;
    }

    let detail = schema
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let documentation = schema
        .get("description")
        .and_then(Value::as_str)
        .map(|d| {
            Documentation::MarkupContent(MarkupContent {
                kind: MarkupKind::Markdown,
                value: d.to_owned(),
            })
        });

    items.push(CompletionItem {
        label: key.to_string(),
        kind: Some(CompletionItemKind::FIELD),
        detail,
        documentation,
        insert_text: Some(create_insert_text(key, schema)),
        insert_text_format: Some(InsertTextFormat::SNIPPET),
        sort_text: Some(sort_text),
        ..Default::default()
    });
}

/// Snippet text inserted for a suggested key. Object-typed properties get
/// `key:` with the cursor indented on the next line (no space after the
/// colon); scalars get `key: ` with a placeholder pre-filled from the first
/// example, else the first enum value, else the default.
pub fn create_insert_text(key: &str, schema: &Value) -> String {
    let is_object = schema.get("type").and_then(Value::as_str) == Some("object")
        || schema.get("properties").is_some()
        || schema.get("patternProperties").is_some();

    if is_object {
        return format!("{key}:\n  $1");
    }

    let seed = schema
        .get("examples")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .or_else(|| schema.get("enum").and_then(Value::as_array).and_then(|a| a.first()))
        .or_else(|| schema.get("default"));

    match seed {
        Some(value) => format!("{key}: ${{1:{}}}", scalar_label(value)),
        None => format!("{key}: $1"),
    }
}

fn scalar_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> CompiledSchema {
        CompiledSchema::compile(json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "The app name.", "examples": ["myapp"] },
                "recipe": { "type": "string", "enum": ["lamp", "lemp"], "default": "lamp" },
                "services": {
                    "type": "object",
                    "patternProperties": {
                        "^[\\w.-]+$": {
                            "type": "object",
                            "examples": ["appserver"],
                            "properties": {
                                "type": { "type": "string", "examples": ["apache"] },
                                "ssl": { "type": "boolean" },
                                "overrides": { "type": "object" }
                            }
                        }
                    }
                }
            }
        }))
    }

    fn labels(items: &[CompletionItem]) -> Vec<&str> {
        items.iter().map(|i| i.label.as_str()).collect()
    }

    #[test]
    fn test_root_completion_offers_all_root_properties() {
        let schema = schema();
        let items = completions_at("", Position { line: 0, character: 0 }, &schema);
        let labels = labels(&items);
        assert!(labels.contains(&"name"));
        assert!(labels.contains(&"recipe"));
        assert!(labels.contains(&"services"));
    }

    #[test]
    fn test_property_band_preserves_declaration_order() {
        let schema = schema();
        let items = completions_at("", Position { line: 0, character: 0 }, &schema);
        let name = items.iter().find(|i| i.label == "name").unwrap();
        let recipe = items.iter().find(|i| i.label == "recipe").unwrap();
        assert!(name.sort_text < recipe.sort_text);
    }

    #[test]
    fn test_nested_completion_through_pattern_properties() {
        let schema = schema();
        let text = "services:\n  node:\n    \n";
        let items = completions_at(text, Position { line: 2, character: 4 }, &schema);
        let labels = labels(&items);
        assert!(labels.contains(&"type"), "got: {labels:?}");
        assert!(labels.contains(&"ssl"));
        assert!(labels.contains(&"overrides"));
    }

    #[test]
    fn test_enum_and_default_suggested_under_key() {
        let schema = schema();
        let text = "recipe:\n  \n";
        let items = completions_at(text, Position { line: 1, character: 2 }, &schema);
        let lamp = items.iter().find(|i| i.label == "lamp").unwrap();
        // The default band sorts ahead of the enum band.
        assert!(lamp.sort_text.as_deref().unwrap().starts_with('0'));
        assert!(labels(&items).contains(&"lemp"));
    }

    #[test]
    fn test_pattern_property_examples_suggest_service_names() {
        let schema = schema();
        let text = "services:\n  \n";
        let items = completions_at(text, Position { line: 1, character: 2 }, &schema);
        let appserver = items.iter().find(|i| i.label == "appserver").unwrap();
        assert!(appserver.sort_text.as_deref().unwrap().starts_with('4'));
        // An object-typed key inserts with the cursor on the next line.
        assert!(appserver
            .insert_text
            .as_deref()
            .unwrap()
            .starts_with("appserver:\n"));
    }

    #[test]
    fn test_unresolvable_path_fails_closed() {
        let schema = schema();
        let text = "unknown:\n  child:\n    \n";
        let items = completions_at(text, Position { line: 2, character: 4 }, &schema);
        assert!(items.is_empty());
    }

    #[test]
    fn test_insert_text_for_object_property() {
        let insert = create_insert_text("tooling", &json!({ "type": "object" }));
        assert!(insert.starts_with("tooling:\n"), "no space after colon, newline first: {insert}");
        assert_eq!(insert, "tooling:\n  $1");
    }

    #[test]
    fn test_insert_text_for_scalar_with_examples() {
        let insert = create_insert_text(
            "type",
            &json!({ "type": "string", "examples": ["a", "b"] }),
        );
        assert_eq!(insert, "type: ${1:a}");
    }

    #[test]
    fn test_insert_text_seed_fallback_order() {
        let from_enum = create_insert_text("recipe", &json!({ "enum": ["lamp"] }));
        assert_eq!(from_enum, "recipe: ${1:lamp}");

        let from_default = create_insert_text("ssl", &json!({ "type": "boolean", "default": false }));
        assert_eq!(from_default, "ssl: ${1:false}");

        let bare = create_insert_text("name", &json!({ "type": "string" }));
        assert_eq!(bare, "name: $1");
    }

    #[test]
    fn test_duplicate_labels_keep_first_occurrence() {
        let schema = CompiledSchema::compile(json!({
            "type": "object",
            "properties": {
                "mode": {
                    "default": "fast",
                    "enum": ["fast", "safe"]
                }
            }
        }));
        let text = "mode:\n  \n";
        let items = completions_at(text, Position { line: 1, character: 2 }, &schema);
        let fast: Vec<_> = items.iter().filter(|i| i.label == "fast").collect();
        assert_eq!(fast.len(), 1);
        // First occurrence wins: the default band, not the enum band.
        assert!(fast[0].sort_text.as_deref().unwrap().starts_with('0'));
    }
}
