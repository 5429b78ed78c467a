//! Maps between structural paths and text positions by re-scanning the raw
//! YAML line by line. The parsed value tree does not retain positions, so
//! every diagnostic, hover target, and completion context goes through here.
//!
//! The scan assumes strictly line-oriented, 2-space-indented YAML: one
//! nesting level per two leading spaces. Flow-style collections, tabs, and
//! irregular indentation are not supported.

use once_cell::sync::Lazy;
use regex::Regex;

/// A segment in a structural path: a mapping key or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Key(k) => f.write_str(k),
            PathSegment::Index(i) => write!(f, "{i}"),
        }
    }
}

/// A resolved text location: 0-based line and column plus token length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: u32,
    pub column: u32,
    pub length: u32,
}

impl Location {
    /// Fallback when a path cannot be found in the text.
    pub fn fallback() -> Self {
        Self {
            line: 0,
            column: 0,
            length: 1,
        }
    }
}

/// A `key:` line split into indentation, key, and the raw value text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLine<'a> {
    pub indent: usize,
    pub key: &'a str,
    pub value: &'a str,
}

impl KeyLine<'_> {
    /// Nesting level under 2-space indentation.
    pub fn level(&self) -> usize {
        self.indent / 2
    }
}

static KEY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^( *)([\w$.-]+): *(.*?) *$").expect("key pattern compiles"));

static ITEM_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^( *)- *(.*?) *$").expect("item pattern compiles"));

/// Match a `key:` or `key: value` line.
pub fn parse_key_line(line: &str) -> Option<KeyLine<'_>> {
    let caps = KEY_LINE.captures(line.trim_end_matches('\r'))?;
    Some(KeyLine {
        indent: caps.get(1).map_or(0, |m| m.as_str().len()),
        key: caps.get(2).map_or("", |m| m.as_str()),
        value: caps.get(3).map_or("", |m| m.as_str()),
    })
}

/// Reconstruct the key path in effect at `line` (0-based) by scanning every
/// line up to and including it. Each `key:` line truncates the path to its
/// indentation level and writes its key there, so the result is the last key
/// seen at or above each level. Sequence items are not tracked here.
pub fn path_at_line(text: &str, line: u32) -> Vec<String> {
    let mut path: Vec<String> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        if idx as u32 > line {
            break;
        }
        if let Some(key_line) = parse_key_line(raw) {
            let level = key_line.level();
            path.truncate(level);
            // Irregular indentation can skip a level; pad so the key still
            // lands at its own index.
            if path.len() < level {
                path.resize(level, String::new());
            }
            path.push(key_line.key.to_string());
        }
    }

    path
}

/// Find the first line whose accumulated path equals `target`, scanning
/// forward and tracking both mapping keys and sequence items. Sequence items
/// keep a per-level counter that resets whenever the indentation level
/// changes and increments for each sibling at the same level.
///
/// Returns [`Location::fallback`] when the path does not occur in the text.
pub fn locate_path(text: &str, target: &[PathSegment]) -> Location {
    if target.is_empty() {
        return Location::fallback();
    }

    let mut path: Vec<PathSegment> = Vec::new();
    let mut item_counter = 0usize;
    let mut item_level: Option<usize> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');

        if let Some(key_line) = parse_key_line(line) {
            let level = key_line.level();
            path.truncate(level);
            if path.len() < level {
                path.resize(level, PathSegment::Key(String::new()));
            }
            path.push(PathSegment::Key(key_line.key.to_string()));
            item_level = None;

            if path_matches(&path, target) {
                return Location {
                    line: idx as u32,
                    column: key_line.indent as u32,
                    length: key_line.key.len().max(1) as u32,
                };
            }
        } else if let Some(caps) = ITEM_LINE.captures(line) {
            let indent = caps.get(1).map_or(0, |m| m.as_str().len());
            let level = indent / 2;
            item_counter = match item_level {
                Some(prev) if prev == level => item_counter + 1,
                _ => 0,
            };
            item_level = Some(level);

            path.truncate(level);
            path.push(PathSegment::Index(item_counter));

            if path_matches(&path, target) {
                let item = caps.get(2).map_or("", |m| m.as_str());
                return Location {
                    line: idx as u32,
                    column: indent as u32 + 2,
                    length: item.len().max(1) as u32,
                };
            }
        }
    }

    Location::fallback()
}

fn path_matches(current: &[PathSegment], target: &[PathSegment]) -> bool {
    current.len() == target.len() && current.iter().zip(target).all(|(a, b)| a == b)
}

/// Convert a key path into owned segments for [`locate_path`].
pub fn key_segments(keys: &[String]) -> Vec<PathSegment> {
    keys.iter().map(|k| PathSegment::Key(k.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\
name: myapp
recipe: lamp
services:
  node:
    type: apache
    overrides:
      - first
      - second
  database:
    type: mysql
";

    fn keys(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_path_at_top_level_line() {
        assert_eq!(path_at_line(DOC, 1), keys(&["recipe"]));
    }

    #[test]
    fn test_path_at_nested_line() {
        assert_eq!(path_at_line(DOC, 4), keys(&["services", "node", "type"]));
    }

    #[test]
    fn test_path_resets_after_dedent() {
        // Line 8 dedents back to level 1 under services.
        assert_eq!(path_at_line(DOC, 8), keys(&["services", "database"]));
        assert_eq!(path_at_line(DOC, 9), keys(&["services", "database", "type"]));
    }

    #[test]
    fn test_locate_nested_key() {
        let target = key_segments(&keys(&["services", "node", "type"]));
        let loc = locate_path(DOC, &target);
        assert_eq!(loc.line, 4);
        assert_eq!(loc.column, 4);
        assert_eq!(loc.length, 4);
    }

    #[test]
    fn test_locate_second_sibling_key() {
        let target = key_segments(&keys(&["services", "database"]));
        let loc = locate_path(DOC, &target);
        assert_eq!(loc.line, 8);
        assert_eq!(loc.column, 2);
    }

    #[test]
    fn test_locate_sequence_item() {
        let mut target = key_segments(&keys(&["services", "node", "overrides"]));
        target.push(PathSegment::Index(1));
        let loc = locate_path(DOC, &target);
        assert_eq!(loc.line, 7);
        assert_eq!(loc.column, 8);
        assert_eq!(loc.length, "second".len() as u32);
    }

    #[test]
    fn test_locate_missing_path_falls_back() {
        let target = key_segments(&keys(&["nonexistent"]));
        assert_eq!(locate_path(DOC, &target), Location::fallback());
    }

    #[test]
    fn test_round_trip_key_lines() {
        // For every line carrying a key, locating the path recovered from
        // that line must land back on the same line.
        for (idx, raw) in DOC.lines().enumerate() {
            if parse_key_line(raw).is_none() {
                continue;
            }
            let path = path_at_line(DOC, idx as u32);
            let loc = locate_path(DOC, &key_segments(&path));
            assert_eq!(loc.line as usize, idx, "line {idx} did not round-trip");
        }
    }

    #[test]
    fn test_parse_key_line_shapes() {
        let kl = parse_key_line("  app-server.v2: nginx  ").unwrap();
        assert_eq!(kl.indent, 2);
        assert_eq!(kl.key, "app-server.v2");
        assert_eq!(kl.value, "nginx");

        let empty = parse_key_line("tooling:").unwrap();
        assert_eq!(empty.value, "");

        assert!(parse_key_line("  - item").is_none());
        assert!(parse_key_line("# comment").is_none());
    }
}
