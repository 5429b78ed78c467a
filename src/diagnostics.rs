//! Structural validation of Landofile text.
//!
//! The text is parsed to a value tree and handed to the JSON Schema
//! evaluator; every reported error is then re-projected onto a source
//! location by scanning the raw text, because the parse tree keeps no
//! positions. A second, independent walk over the tree surfaces deprecated
//! properties and values.

use crate::config::ServerConfig;
use crate::document::DocumentStore;
use crate::position::{locate_path, parse_key_line, path_at_line, Location, PathSegment};
use crate::schema::navigator::{child_schema, follow_ref, SchemaNode};
use crate::schema::{CompiledSchema, Deprecation, SchemaStore};
use anyhow::Result;
use jsonschema::error::ValidationErrorKind;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticSeverity, DiagnosticTag, NumberOrString, Position, Range, Url,
};
use tracing::{debug, warn};

pub const SOURCE_SCHEMA: &str = "schema(landofile)";
pub const SOURCE_YAML: &str = "validation(YAML)";

/// Validate the document at `uri` against the configured Landofile schema.
/// Returns an empty list if no schema is configured or it cannot be loaded.
pub async fn validate_document(
    uri: &Url,
    documents: &Arc<DocumentStore>,
    schemas: &Arc<SchemaStore>,
    config: &ServerConfig,
) -> Result<Vec<Diagnostic>> {
    let Some(text) = documents.get_text(uri) else {
        return Ok(vec![]);
    };

    let Some(source) = config.schema_source() else {
        debug!("No schema configured; skipping validation for {uri}");
        return Ok(vec![]);
    };

    let schema = match schemas.get_or_load(&source).await {
        Ok(s) => s,
        Err(e) => {
            warn!("Could not load schema {source}: {e}");
            return Ok(vec![]);
        }
    };

    Ok(validate_text(&text, &schema))
}

/// Validate `text` against a compiled schema. Pure and synchronous; every
/// failure mode is expressed as a diagnostic, never an error.
pub fn validate_text(text: &str, schema: &CompiledSchema) -> Vec<Diagnostic> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut instance: Value = match serde_yaml::from_str(text) {
        Ok(v) => v,
        Err(e) => return vec![parse_error_diagnostic(&e)],
    };
    coerce_empty_mappings(text, &mut instance);

    let mut diagnostics = Vec::new();

    match &schema.validator {
        Some(validator) => {
            // Only the first structural error per (line, column) survives.
            let mut seen: HashSet<(u32, u32)> = HashSet::new();

            for error in validator.iter_errors(&instance) {
                let base = pointer_segments(&error.instance_path().to_string());

                if let ValidationErrorKind::AdditionalProperties { unexpected } = error.kind() {
                    // Point at each offending extra key itself, not at the
                    // parent mapping.
                    for name in unexpected {
                        let mut path = base.clone();
                        path.push(PathSegment::Key(name.clone()));
                        let loc = locate_path(text, &path);
                        if !seen.insert((loc.line, loc.column)) {
                            continue;
                        }
                        diagnostics.push(schema_error(
                            loc,
                            format!("Unexpected property `{name}`."),
                        ));
                    }
                } else {
                    let loc = locate_path(text, &base);
                    if !seen.insert((loc.line, loc.column)) {
                        continue;
                    }
                    let message = match base.last() {
                        Some(segment) => format!("`{segment}`: {error}"),
                        None => error.to_string(),
                    };
                    diagnostics.push(schema_error(loc, message));
                }
            }
        }
        None => diagnostics.push(schema_compile_warning()),
    }

    // Deprecations are collected separately and never deduplicated against
    // structural errors; both can land on the same line.
    let mut path = Vec::new();
    walk_deprecations(
        text,
        &instance,
        &schema.raw,
        &schema.raw,
        &mut path,
        &mut diagnostics,
    );

    diagnostics
}

/// Convert a JSON Pointer (`/services/node/0`) into structural segments.
/// All-digit segments are treated as sequence indices.
fn pointer_segments(pointer: &str) -> Vec<PathSegment> {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer
        .split('/')
        .skip(1)
        .map(|raw| {
            let segment = raw.replace("~1", "/").replace("~0", "~");
            match segment.parse::<usize>() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(segment),
            }
        })
        .collect()
}

/// A bare `key:` parses as null; the schema expects an object there, so
/// coerce the node to an empty mapping before evaluation to avoid spurious
/// type errors on declared-but-empty sections.
fn coerce_empty_mappings(text: &str, instance: &mut Value) {
    for (idx, raw) in text.lines().enumerate() {
        let Some(key_line) = parse_key_line(raw) else {
            continue;
        };
        if !key_line.value.is_empty() {
            continue;
        }
        let path = path_at_line(text, idx as u32);
        if let Some(slot) = lookup_path_mut(instance, &path) {
            if slot.is_null() {
                *slot = Value::Object(Map::new());
            }
        }
    }
}

fn lookup_path_mut<'a>(value: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut current = value;
    for key in path {
        current = current.as_object_mut()?.get_mut(key)?;
    }
    Some(current)
}

/// Walk the value tree alongside the raw schema, descending through
/// whichever union branch matches each value, and emit a warning for every
/// deprecated key and every value matching a deprecated union branch.
fn walk_deprecations(
    text: &str,
    value: &Value,
    schema: &Value,
    root: &Value,
    path: &mut Vec<PathSegment>,
    out: &mut Vec<Diagnostic>,
) {
    let Some(schema) = follow_ref(schema, root, &mut HashSet::new()) else {
        return;
    };
    let node = SchemaNode::new(schema, root);
    let effective = node.matching_branch(value).map_or(schema, |b| b.schema);

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_node =
                    child_schema(effective, key).or_else(|| child_schema(schema, key));
                let Some(child_node) = child_node else {
                    continue;
                };
                let resolved = follow_ref(child_node, root, &mut HashSet::new())
                    .unwrap_or(child_node);

                path.push(PathSegment::Key(key.clone()));
                let loc = locate_path(text, path);

                if let Some(dep) = deprecation_of(resolved) {
                    out.push(deprecation_diagnostic(
                        loc.line,
                        loc.column,
                        loc.length,
                        dep.message_for(key),
                    ));
                }

                if let Some(branch) = SchemaNode::new(resolved, root).matching_branch(child) {
                    if let Some(dep) = deprecation_of(branch.schema) {
                        let rendered = scalar_text(child);
                        let column = loc.column + loc.length + 2;
                        out.push(deprecation_diagnostic(
                            loc.line,
                            column,
                            rendered.len().max(1) as u32,
                            dep.message_for(&rendered),
                        ));
                    }
                }

                walk_deprecations(text, child, resolved, root, path, out);
                path.pop();
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = effective.get("items").or_else(|| schema.get("items")) {
                for (index, item) in items.iter().enumerate() {
                    path.push(PathSegment::Index(index));
                    walk_deprecations(text, item, item_schema, root, path, out);
                    path.pop();
                }
            }
        }
        _ => {}
    }
}

fn deprecation_of(schema: &Value) -> Option<Deprecation> {
    schema.get("deprecated").and_then(Deprecation::from_value)
}

/// Render a value the way it appears in YAML source: strings unquoted,
/// everything else in JSON form.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn schema_error(loc: Location, message: String) -> Diagnostic {
    Diagnostic {
        range: token_range(loc.line, loc.column, loc.length),
        severity: Some(DiagnosticSeverity::ERROR),
        code: Some(NumberOrString::String("schema-validation".into())),
        source: Some(SOURCE_SCHEMA.into()),
        message,
        ..Default::default()
    }
}

fn deprecation_diagnostic(line: u32, column: u32, length: u32, message: String) -> Diagnostic {
    Diagnostic {
        range: token_range(line, column, length),
        severity: Some(DiagnosticSeverity::WARNING),
        code: Some(NumberOrString::String("deprecated".into())),
        source: Some(SOURCE_SCHEMA.into()),
        message,
        tags: Some(vec![DiagnosticTag::DEPRECATED]),
        ..Default::default()
    }
}

fn schema_compile_warning() -> Diagnostic {
    Diagnostic {
        range: token_range(0, 0, 1),
        severity: Some(DiagnosticSeverity::WARNING),
        code: Some(NumberOrString::String("schema-compile".into())),
        source: Some(SOURCE_SCHEMA.into()),
        message: "The Landofile schema is invalid; structural validation is disabled.".into(),
        ..Default::default()
    }
}

fn parse_error_diagnostic(error: &serde_yaml::Error) -> Diagnostic {
    let (line, column) = error
        .location()
        .map(|loc| {
            (
                loc.line().saturating_sub(1) as u32,
                loc.column().saturating_sub(1) as u32,
            )
        })
        .unwrap_or((0, 0));

    Diagnostic {
        range: token_range(line, column, 1),
        severity: Some(DiagnosticSeverity::ERROR),
        code: Some(NumberOrString::String("yaml-syntax".into())),
        source: Some(SOURCE_YAML.into()),
        message: error.to_string(),
        ..Default::default()
    }
}

fn token_range(line: u32, column: u32, length: u32) -> Range {
    Range {
        start: Position {
            line,
            character: column,
        },
        end: Position {
            line,
            character: column + length,
        },
    }
}
