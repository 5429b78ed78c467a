use crate::config::ServerConfig;
use crate::document::DocumentStore;
use crate::position::{parse_key_line, path_at_line};
use crate::schema::{CompiledSchema, Deprecation, Descriptor, SchemaStore, VariantNote};
use serde_json::Value;
use std::sync::Arc;
use tower_lsp::lsp_types::{
    Hover, HoverContents, HoverParams, MarkupContent, MarkupKind, Position, Range,
};
use tracing::debug;

pub async fn handle_hover(
    documents: &Arc<DocumentStore>,
    schemas: &Arc<SchemaStore>,
    config: &ServerConfig,
    params: HoverParams,
) -> Option<Hover> {
    let uri = &params.text_document_position_params.text_document.uri;
    let pos = params.text_document_position_params.position;

    let text = documents.get_text(uri)?;
    let source = config.schema_source()?;
    let schema = schemas.get_or_load(&source).await.ok()?;

    hover_at(&text, pos, &schema)
}

/// Resolve hover documentation for the key on the cursor's line. Absent when
/// the line holds no `key:` pattern or no descriptor exists at any candidate
/// path.
pub fn hover_at(text: &str, position: Position, schema: &CompiledSchema) -> Option<Hover> {
    let line_text = text.lines().nth(position.line as usize)?;
    let key_line = parse_key_line(line_text)?;

    let path = path_at_line(text, position.line);
    let descriptor = schema.map.resolve(&path)?;
    debug!("Hover descriptor found for path {path:?}");

    let value = parse_scalar(key_line.value);
    let blocks = content_blocks(descriptor, value.as_ref());
    if blocks.is_empty() {
        return None;
    }

    let start = key_line.indent as u32;
    Some(Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value: blocks.join("\n\n"),
        }),
        range: Some(Range {
            start: Position {
                line: position.line,
                character: start,
            },
            end: Position {
                line: position.line,
                character: start + key_line.key.len() as u32,
            },
        }),
    })
}

/// Best-effort parse of the literal value text after `key: `.
fn parse_scalar(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    serde_yaml::from_str(raw).ok()
}

/// Assemble the hover content blocks in their fixed order: deprecation
/// notice, base description, matching variant description, type, pattern,
/// enum list, default, examples, union option summaries.
fn content_blocks(descriptor: &Descriptor, value: Option<&Value>) -> Vec<String> {
    let mut blocks = Vec::new();

    if let Some(dep) = &descriptor.deprecated {
        blocks.push(match dep {
            Deprecation::Flag => "**Deprecated.**".to_string(),
            Deprecation::Message(m) => format!("**Deprecated.** {m}"),
        });
    }

    let base = descriptor
        .base_description
        .as_ref()
        .or(descriptor.description.as_ref());
    if let Some(description) = base {
        blocks.push(description.clone());
    }

    if let Some(value) = value {
        if let Some(variant) = matching_variant(&descriptor.variants, value) {
            if let Some(description) = &variant.description {
                if Some(description) != base {
                    blocks.push(description.clone());
                }
            }
        }
    }

    if let Some(ty) = &descriptor.schema_type {
        blocks.push(format!("**Type:** `{ty}`"));
    }

    if let Some(pattern) = &descriptor.pattern {
        blocks.push(format!("**Pattern:** `{pattern}`"));
    }

    if !descriptor.enum_values.is_empty() {
        let values = descriptor
            .enum_values
            .iter()
            .map(|v| format!("`{}`", scalar_label(v)))
            .collect::<Vec<_>>()
            .join(", ");
        blocks.push(format!("**Allowed values:** {values}"));
    }

    if let Some(default) = &descriptor.default {
        blocks.push(format!("**Default:**\n```yaml\n{}\n```", yaml_snippet(default)));
    }

    if !descriptor.examples.is_empty() {
        let mut block = String::from("**Examples:**");
        for example in &descriptor.examples {
            block.push_str(&format!("\n```yaml\n{}\n```", yaml_snippet(example)));
        }
        blocks.push(block);
    }

    if !descriptor.one_of.is_empty() {
        blocks.push(one_of_summary(&descriptor.one_of));
    }

    blocks
}

/// Select the first variant whose discriminant (`const` or `pattern`)
/// accepts the literal value on the hovered line.
fn matching_variant<'a>(variants: &'a [VariantNote], value: &Value) -> Option<&'a VariantNote> {
    variants.iter().find(|note| {
        if let Some(expected) = &note.const_value {
            return value == expected;
        }
        if let Some(pattern) = &note.pattern {
            return value
                .as_str()
                .map(|s| crate::schema::navigator::pattern_matches(pattern, s))
                .unwrap_or(false);
        }
        false
    })
}

fn one_of_summary(branches: &[Value]) -> String {
    let mut lines = vec!["**One of:**".to_string()];
    for branch in branches {
        let label = branch_label(branch);
        match branch.get("description").and_then(Value::as_str) {
            Some(description) => lines.push(format!("- `{label}`: {description}")),
            None => lines.push(format!("- `{label}`")),
        }
    }
    lines.join("\n")
}

fn branch_label(branch: &Value) -> String {
    if let Some(constant) = branch.get("const") {
        return scalar_label(constant);
    }
    if let Some(ty) = branch.get("type").and_then(Value::as_str) {
        return ty.to_string();
    }
    if let Some(pattern) = branch.get("pattern").and_then(Value::as_str) {
        return pattern.to_string();
    }
    "any".to_string()
}

fn scalar_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn yaml_snippet(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| value.to_string())
}
