//! Flattens a JSON Schema into a path-indexed descriptor map.
//!
//! `$ref`s are resolved inline, `patternProperties` become `*` segments,
//! and `oneOf` branches get `#<index>` suffixes, so hover and deprecation
//! lookups become a handful of exact-match probes instead of a schema walk.
//! Flattening is best-effort: an unresolvable `$ref` abandons that subtree's
//! merge and the rest of the map is still produced.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// A `deprecated` marker: either the bare boolean flag or a replacement hint.
#[derive(Debug, Clone, PartialEq)]
pub enum Deprecation {
    Flag,
    Message(String),
}

impl Deprecation {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(true) => Some(Self::Flag),
            Value::String(s) => Some(Self::Message(s.clone())),
            _ => None,
        }
    }

    /// The diagnostic message for a deprecated `subject` (a key or a value).
    pub fn message_for(&self, subject: &str) -> String {
        match self {
            Self::Flag => format!("`{subject}` is deprecated."),
            Self::Message(m) => m.clone(),
        }
    }
}

/// Per-branch notes recorded when a union's variants carry their own
/// semantics for the same path, so a hover or deprecation check on a value
/// can select the branch the value actually matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantNote {
    pub description: Option<String>,
    pub deprecated: Option<Deprecation>,
    pub const_value: Option<Value>,
    pub pattern: Option<String>,
}

/// Summarized schema metadata for one normalized path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Descriptor {
    pub description: Option<String>,
    pub schema_type: Option<String>,
    pub enum_values: Vec<Value>,
    pub examples: Vec<Value>,
    pub default: Option<Value>,
    pub one_of: Vec<Value>,
    pub any_of: Vec<Value>,
    pub additional_properties: Option<Value>,
    pub deprecated: Option<Deprecation>,
    pub pattern: Option<String>,
    pub base_description: Option<String>,
    pub variants: Vec<VariantNote>,
}

impl Descriptor {
    /// Merge `other` into `self`, filling only fields that are still empty.
    /// Descriptions and deprecations already recorded are never dropped.
    fn absorb(&mut self, other: Descriptor) {
        macro_rules! fill_option {
            ($field:ident) => {
                if self.$field.is_none() {
                    self.$field = other.$field;
                }
            };
        }
        macro_rules! fill_vec {
            ($field:ident) => {
                if self.$field.is_empty() {
                    self.$field = other.$field;
                }
            };
        }
        fill_option!(description);
        fill_option!(schema_type);
        fill_option!(default);
        fill_option!(additional_properties);
        fill_option!(deprecated);
        fill_option!(pattern);
        fill_option!(base_description);
        fill_vec!(enum_values);
        fill_vec!(examples);
        fill_vec!(one_of);
        fill_vec!(any_of);
        fill_vec!(variants);
    }
}

/// The flattened schema: normalized path to descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathMap {
    entries: HashMap<String, Descriptor>,
}

impl PathMap {
    pub fn get(&self, path: &str) -> Option<&Descriptor> {
        self.entries.get(path)
    }

    /// Look up a concrete key path, trying each candidate in priority order.
    /// The first candidate present in the map wins; candidates are never
    /// merged.
    pub fn resolve(&self, segments: &[String]) -> Option<&Descriptor> {
        candidate_paths(segments)
            .into_iter()
            .find_map(|candidate| self.entries.get(&candidate))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    fn insert_merged(&mut self, path: String, descriptor: Descriptor) {
        match self.entries.get_mut(&path) {
            Some(existing) => existing.absorb(descriptor),
            None => {
                self.entries.insert(path, descriptor);
            }
        }
    }
}

/// Candidate lookup keys for a concrete path, in priority order: the exact
/// path, each non-root segment wildcarded one at a time, the first segment
/// with a wildcard tail, and the bare root wildcard.
pub fn candidate_paths(segments: &[String]) -> Vec<String> {
    let mut out = vec![segments.join("/")];

    if segments.len() > 1 {
        for i in 1..segments.len() {
            let mut wild: Vec<&str> = segments.iter().map(String::as_str).collect();
            wild[i] = "*";
            out.push(wild.join("/"));
        }
        out.push(format!("{}/*", segments[0]));
    }

    out.push("*".to_string());
    out.dedup();
    out
}

/// Flatten `schema` into a [`PathMap`]. Never fails; malformed corners of
/// the schema are skipped with a warning and the partial map is returned.
pub fn flatten(schema: &Value) -> PathMap {
    let mut map = PathMap::default();
    let mut visiting = HashSet::new();
    flatten_node(schema, schema, "", &mut map, &mut visiting);
    map
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}/{segment}")
    }
}

/// Resolve a fragment-only `$ref` (`#/...`) against the schema root.
pub(crate) fn resolve_pointer<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    if pointer.is_empty() {
        return Some(root);
    }
    root.pointer(pointer)
}

/// Overlay `node`'s own fields (minus `$ref`) on top of the referent, so a
/// local `description` wins over the referenced one.
fn merge_ref(node: &Value, target: &Value) -> Value {
    let mut merged = match target.as_object() {
        Some(obj) => obj.clone(),
        None => return target.clone(),
    };
    if let Some(own) = node.as_object() {
        for (key, value) in own {
            if key != "$ref" {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(merged)
}

fn flatten_node(
    node: &Value,
    root: &Value,
    prefix: &str,
    map: &mut PathMap,
    visiting: &mut HashSet<usize>,
) {
    // Identity-keyed guard over the current descent: bail out on nodes
    // already on the stack so cyclic $ref graphs terminate, while a shared
    // definition can still be flattened under every path that refers to it.
    let node_id = node as *const Value as usize;
    if !visiting.insert(node_id) {
        return;
    }

    let mut referent_id = None;
    let storage;
    let node: &Value = match node.get("$ref").and_then(Value::as_str) {
        Some(reference) => match resolve_pointer(root, reference) {
            Some(target) => {
                let target_id = target as *const Value as usize;
                if !visiting.insert(target_id) {
                    visiting.remove(&node_id);
                    return;
                }
                referent_id = Some(target_id);
                storage = merge_ref(node, target);
                &storage
            }
            None => {
                warn!("unresolved $ref {reference:?} under {prefix:?}; skipping merge");
                node
            }
        },
        None => node,
    };

    let has_pattern_props = node.get("patternProperties").is_some();
    let has_properties = node.get("properties").is_some();
    let one_of = node.get("oneOf").and_then(Value::as_array);

    if let Some(patterns) = node.get("patternProperties").and_then(Value::as_object) {
        let wild = join(prefix, "*");
        for pattern_schema in patterns.values() {
            map.insert_merged(wild.clone(), summarize_resolved(pattern_schema, root));
            flatten_node(pattern_schema, root, &wild, map, visiting);
        }
    }

    if let Some(branches) = one_of {
        for (index, branch) in branches.iter().enumerate() {
            flatten_node(branch, root, &format!("{prefix}#{index}"), map, visiting);
        }
    }

    if let Some(properties) = node.get("properties").and_then(Value::as_object) {
        for (key, property) in properties {
            let child = join(prefix, key);
            map.insert_merged(child.clone(), summarize_resolved(property, root));
            flatten_node(property, root, &child, map, visiting);
        }
    }

    // A leaf schema describes the value at this path directly.
    if !has_properties && !has_pattern_props && one_of.is_none() && !prefix.is_empty() {
        map.insert_merged(prefix.to_string(), summarize(node));
    }

    // Union branch notes live on the descriptor of this path itself, keyed
    // off whichever value the document ends up holding.
    let variants = collect_variant_notes(node, root);
    if !variants.is_empty() && !prefix.is_empty() {
        let mut descriptor = summarize(node);
        descriptor.base_description = descriptor.description.clone();
        descriptor.variants = variants;
        map.insert_merged(prefix.to_string(), descriptor);
    }

    if let Some(defs) = node.get("$defs").and_then(Value::as_object) {
        let defs_prefix = join(prefix, "$defs");
        for (name, definition) in defs {
            flatten_node(definition, root, &join(&defs_prefix, name), map, visiting);
        }
    }

    if let Some(target_id) = referent_id {
        visiting.remove(&target_id);
    }
    visiting.remove(&node_id);
}

fn collect_variant_notes(node: &Value, root: &Value) -> Vec<VariantNote> {
    let mut notes = Vec::new();
    for keyword in ["oneOf", "anyOf"] {
        let Some(branches) = node.get(keyword).and_then(Value::as_array) else {
            continue;
        };
        for branch in branches {
            let resolved;
            let branch = match branch.get("$ref").and_then(Value::as_str) {
                Some(reference) => match resolve_pointer(root, reference) {
                    Some(target) => {
                        resolved = merge_ref(branch, target);
                        &resolved
                    }
                    None => branch,
                },
                None => branch,
            };
            notes.push(VariantNote {
                description: string_field(branch, "description"),
                deprecated: branch.get("deprecated").and_then(Deprecation::from_value),
                const_value: branch.get("const").cloned(),
                pattern: string_field(branch, "pattern"),
            });
        }
    }
    notes
}

/// Summarize with a one-level `$ref` resolution so a `{"$ref": ..,
/// "description": ..}` property still yields type and enum information.
fn summarize_resolved(node: &Value, root: &Value) -> Descriptor {
    match node.get("$ref").and_then(Value::as_str) {
        Some(reference) => match resolve_pointer(root, reference) {
            Some(target) => summarize(&merge_ref(node, target)),
            None => summarize(node),
        },
        None => summarize(node),
    }
}

fn summarize(node: &Value) -> Descriptor {
    Descriptor {
        description: string_field(node, "description"),
        schema_type: type_field(node),
        enum_values: array_field(node, "enum"),
        examples: array_field(node, "examples"),
        default: node.get("default").cloned(),
        one_of: array_field(node, "oneOf"),
        any_of: array_field(node, "anyOf"),
        additional_properties: node.get("additionalProperties").cloned(),
        deprecated: node.get("deprecated").and_then(Deprecation::from_value),
        pattern: string_field(node, "pattern"),
        base_description: None,
        variants: Vec::new(),
    }
}

fn string_field(node: &Value, key: &str) -> Option<String> {
    node.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn array_field(node: &Value, key: &str) -> Vec<Value> {
    node.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn type_field(node: &Value) -> Option<String> {
    match node.get("type") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(arr)) => {
            let types: Vec<&str> = arr.iter().filter_map(Value::as_str).collect();
            if types.is_empty() {
                None
            } else {
                Some(types.join(" | "))
            }
        }
        _ => None,
    }
}
