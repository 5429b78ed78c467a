//! Walks the raw (non-flattened) schema tree by key path.
//!
//! Completion and the deprecation walker need live schema subtrees rather
//! than flattened descriptors: each path segment is resolved through
//! `properties`, then `patternProperties` by regex match, then `$ref`
//! against the root, failing closed when a segment cannot be resolved.

use crate::schema::flatten::resolve_pointer;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

/// A reference into a JSON Schema document that supports navigation.
#[derive(Clone, Copy)]
pub struct SchemaNode<'a> {
    /// The current schema sub-object.
    pub schema: &'a Value,
    /// The document root (for resolving `$ref`).
    pub root: &'a Value,
}

impl<'a> SchemaNode<'a> {
    pub fn new(schema: &'a Value, root: &'a Value) -> Self {
        Self { schema, root }
    }

    /// The node with any `$ref` chain followed; falls back to the literal
    /// node when resolution fails.
    pub fn resolved(&self) -> &'a Value {
        follow_ref(self.schema, self.root, &mut HashSet::new()).unwrap_or(self.schema)
    }

    /// Navigate to the schema node at the given key path. Returns `None` if
    /// any segment is unresolvable.
    pub fn navigate(&self, path: &[String]) -> Option<SchemaNode<'a>> {
        let mut visited: HashSet<usize> = HashSet::new();
        navigate_inner(self.schema, self.root, path, &mut visited)
            .map(|schema| SchemaNode { schema, root: self.root })
    }

    /// Pick the first union branch (oneOf, then anyOf) that the given value
    /// matches, resolving branch `$ref`s before testing.
    pub fn matching_branch(&self, value: &Value) -> Option<SchemaNode<'a>> {
        let schema = self.resolved();
        for keyword in ["oneOf", "anyOf"] {
            for branch in branch_list(schema, keyword) {
                let resolved =
                    follow_ref(branch, self.root, &mut HashSet::new()).unwrap_or(branch);
                if value_matches(value, resolved) {
                    return Some(SchemaNode {
                        schema: resolved,
                        root: self.root,
                    });
                }
            }
        }
        None
    }
}

/// Test whether `value` satisfies a union branch, applying an explicit
/// ordered rule list: `const` equality, then `pattern` (strings only), then
/// `type`, then `enum` membership. A branch with none of these constraints
/// matches anything.
pub fn value_matches(value: &Value, branch: &Value) -> bool {
    if let Some(expected) = branch.get("const") {
        return value == expected;
    }
    if let Some(pattern) = branch.get("pattern").and_then(Value::as_str) {
        return match value.as_str() {
            Some(s) => pattern_matches(pattern, s),
            None => false,
        };
    }
    if let Some(kind) = branch.get("type").and_then(Value::as_str) {
        return type_matches(kind, value);
    }
    if let Some(allowed) = branch.get("enum").and_then(Value::as_array) {
        return allowed.contains(value);
    }
    true
}

fn type_matches(kind: &str, value: &Value) -> bool {
    match kind {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type names match vacuously.
        _ => true,
    }
}

pub(crate) fn pattern_matches(pattern: &str, value: &str) -> bool {
    Regex::new(pattern)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

pub(crate) fn branch_list<'a>(schema: &'a Value, keyword: &str) -> &'a [Value] {
    schema
        .get(keyword)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Resolve the sub-schema for `key` on an already-resolved parent node:
/// `properties` first, then the first matching `patternProperties` rule.
pub(crate) fn child_schema<'a>(schema: &'a Value, key: &str) -> Option<&'a Value> {
    if let Some(property) = schema.get("properties").and_then(|p| p.get(key)) {
        return Some(property);
    }
    if let Some(patterns) = schema.get("patternProperties").and_then(Value::as_object) {
        for (pattern, sub) in patterns {
            if pattern_matches(pattern, key) {
                return Some(sub);
            }
        }
    }
    None
}

/// Follow a `$ref` chain with an identity-keyed cycle guard. `None` means
/// the chain could not be fully resolved.
pub(crate) fn follow_ref<'a>(
    schema: &'a Value,
    root: &'a Value,
    visited: &mut HashSet<usize>,
) -> Option<&'a Value> {
    let mut current = schema;
    loop {
        if !visited.insert(current as *const Value as usize) {
            return None;
        }
        match current.get("$ref").and_then(Value::as_str) {
            Some(reference) => current = resolve_pointer(root, reference)?,
            None => return Some(current),
        }
    }
}

fn navigate_inner<'a>(
    schema: &'a Value,
    root: &'a Value,
    path: &[String],
    visited: &mut HashSet<usize>,
) -> Option<&'a Value> {
    // follow_ref doubles as the cycle guard: every node touched on this
    // descent lands in `visited`, so revisits fail closed.
    let schema = follow_ref(schema, root, visited)?;

    let Some((segment, rest)) = path.split_first() else {
        return Some(schema);
    };

    if let Some(sub) = child_schema(schema, segment) {
        if let Some(hit) = navigate_inner(sub, root, rest, visited) {
            return Some(hit);
        }
    }

    // Union branches may each declare their own properties for this segment.
    for keyword in ["oneOf", "anyOf"] {
        for branch in branch_list(schema, keyword) {
            if let Some(hit) = navigate_inner(branch, root, path, visited) {
                return Some(hit);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn make_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "The app name." },
                "services": {
                    "type": "object",
                    "patternProperties": {
                        "^[\\w.-]+$": { "$ref": "#/$defs/service" }
                    }
                }
            },
            "$defs": {
                "service": {
                    "type": "object",
                    "properties": {
                        "type": {
                            "oneOf": [
                                { "const": "apache", "description": "Apache httpd." },
                                { "pattern": "^php", "description": "PHP appserver." },
                                { "type": "boolean", "description": "Toggle." }
                            ]
                        },
                        "ssl": { "type": "boolean" }
                    }
                }
            }
        })
    }

    #[test]
    fn test_navigate_through_properties() {
        let schema = make_schema();
        let node = SchemaNode::new(&schema, &schema);
        let hit = node.navigate(&keys(&["name"])).unwrap();
        assert_eq!(
            hit.resolved().get("type").and_then(Value::as_str),
            Some("string")
        );
    }

    #[test]
    fn test_navigate_through_pattern_properties_and_ref() {
        let schema = make_schema();
        let node = SchemaNode::new(&schema, &schema);
        let hit = node.navigate(&keys(&["services", "node", "ssl"])).unwrap();
        assert_eq!(
            hit.resolved().get("type").and_then(Value::as_str),
            Some("boolean")
        );
    }

    #[test]
    fn test_navigate_fails_closed() {
        let schema = make_schema();
        let node = SchemaNode::new(&schema, &schema);
        assert!(node.navigate(&keys(&["bogus", "child"])).is_none());
    }

    #[test]
    fn test_navigate_survives_self_reference() {
        let schema = json!({
            "type": "object",
            "properties": { "child": { "$ref": "#" } }
        });
        let node = SchemaNode::new(&schema, &schema);
        // Must terminate; whether it resolves is secondary.
        let _ = node.navigate(&keys(&["child", "child", "missing"]));
    }

    #[test]
    fn test_matcher_precedence_const_over_pattern() {
        let branch = json!({ "const": "apache", "pattern": "^ngin" });
        assert!(value_matches(&json!("apache"), &branch));
        assert!(!value_matches(&json!("nginx"), &branch));
    }

    #[test]
    fn test_matcher_pattern_only_applies_to_strings() {
        let branch = json!({ "pattern": "^php" });
        assert!(value_matches(&json!("php:8.2"), &branch));
        assert!(!value_matches(&json!(82), &branch));
    }

    #[test]
    fn test_matcher_type_and_enum() {
        assert!(value_matches(&json!(true), &json!({ "type": "boolean" })));
        assert!(!value_matches(&json!("yes"), &json!({ "type": "boolean" })));
        assert!(value_matches(&json!("a"), &json!({ "enum": ["a", "b"] })));
        assert!(!value_matches(&json!("c"), &json!({ "enum": ["a", "b"] })));
    }

    #[test]
    fn test_matcher_unconstrained_branch_matches() {
        assert!(value_matches(&json!({"x": 1}), &json!({ "description": "anything" })));
    }

    #[test]
    fn test_matching_branch_selects_by_value() {
        let schema = make_schema();
        let root = SchemaNode::new(&schema, &schema);
        let ty = root.navigate(&keys(&["services", "web", "type"])).unwrap();

        let apache = ty.matching_branch(&json!("apache")).unwrap();
        assert_eq!(
            apache.schema.get("description").and_then(Value::as_str),
            Some("Apache httpd.")
        );

        let php = ty.matching_branch(&json!("php:8.2")).unwrap();
        assert_eq!(
            php.schema.get("description").and_then(Value::as_str),
            Some("PHP appserver.")
        );
    }
}
