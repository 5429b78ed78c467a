use anyhow::{anyhow, Result};
use dashmap::DashMap;
use ropey::Rope;
use tower_lsp::lsp_types::{TextDocumentContentChangeEvent, Url};

pub struct DocumentState {
    pub rope: Rope,
    pub version: i32,
    pub text: String,
}

/// All open Landofiles, keyed by URI.
pub struct DocumentStore {
    inner: DashMap<Url, DocumentState>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    pub fn open(&self, uri: Url, version: i32, text: String) {
        let rope = Rope::from_str(&text);
        self.inner.insert(
            uri,
            DocumentState {
                rope,
                version,
                text,
            },
        );
    }

    /// Apply incremental or full text changes from a `did_change` notification.
    pub fn update(
        &self,
        uri: &Url,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    ) -> Result<()> {
        let mut state = self
            .inner
            .get_mut(uri)
            .ok_or_else(|| anyhow!("Document not found: {uri}"))?;

        for change in changes {
            match change.range {
                None => {
                    // Full replacement
                    state.rope = Rope::from_str(&change.text);
                    state.text = change.text;
                }
                Some(range) => {
                    // Incremental update — convert LSP range to rope char indices
                    let start = lsp_pos_to_char_idx(&state.rope, range.start)?;
                    let end = lsp_pos_to_char_idx(&state.rope, range.end)?;
                    state.rope.remove(start..end);
                    state.rope.insert(start, &change.text);
                    // Rebuild text from rope for the line-oriented scanners
                    state.text = state.rope.to_string();
                }
            }
        }

        state.version = version;
        Ok(())
    }

    pub fn close(&self, uri: &Url) {
        self.inner.remove(uri);
    }

    pub fn get_text(&self, uri: &Url) -> Option<String> {
        self.inner.get(uri).map(|s| s.text.clone())
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert an LSP `Position` (0-based line + UTF-16 character) to a ropey char index.
pub fn lsp_pos_to_char_idx(rope: &Rope, pos: tower_lsp::lsp_types::Position) -> Result<usize> {
    let line = pos.line as usize;
    if line >= rope.len_lines() {
        return Err(anyhow!(
            "Line {line} out of range (doc has {} lines)",
            rope.len_lines()
        ));
    }

    let line_char_start = rope.line_to_char(line);
    let line_slice = rope.line(line);

    // Count UTF-16 code units to find the correct char offset within the line
    let col_utf16 = pos.character as usize;
    let mut utf16_remaining = col_utf16;
    let mut char_offset = 0;

    for ch in line_slice.chars() {
        if utf16_remaining == 0 {
            break;
        }
        let utf16_len = ch.len_utf16();
        if utf16_remaining < utf16_len {
            // Cursor is in the middle of a surrogate pair — snap to start
            break;
        }
        utf16_remaining -= utf16_len;
        char_offset += 1;
    }

    Ok(line_char_start + char_offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri() -> Url {
        Url::parse("file:///tmp/.lando.yml").unwrap()
    }

    #[test]
    fn test_open_and_get_text() {
        let store = DocumentStore::new();
        store.open(uri(), 1, "name: myapp\n".into());
        assert_eq!(store.get_text(&uri()).as_deref(), Some("name: myapp\n"));
    }

    #[test]
    fn test_incremental_update() {
        let store = DocumentStore::new();
        store.open(uri(), 1, "name: myapp\n".into());

        let change = TextDocumentContentChangeEvent {
            range: Some(tower_lsp::lsp_types::Range {
                start: tower_lsp::lsp_types::Position {
                    line: 0,
                    character: 6,
                },
                end: tower_lsp::lsp_types::Position {
                    line: 0,
                    character: 11,
                },
            }),
            range_length: None,
            text: "othername".into(),
        };
        store.update(&uri(), 2, vec![change]).unwrap();
        assert_eq!(
            store.get_text(&uri()).as_deref(),
            Some("name: othername\n")
        );
    }

    #[test]
    fn test_update_unknown_document_fails() {
        let store = DocumentStore::new();
        assert!(store.update(&uri(), 1, vec![]).is_err());
    }

    #[test]
    fn test_lsp_pos_to_char_ascii() {
        let rope = Rope::from_str("name: app\nrecipe: lamp\n");
        let pos = tower_lsp::lsp_types::Position {
            line: 1,
            character: 3,
        };
        let idx = lsp_pos_to_char_idx(&rope, pos).unwrap();
        // line 1 starts at char 10 ("name: app\n"), offset 3 → char 13
        assert_eq!(idx, 13);
    }

    #[test]
    fn test_lsp_pos_to_char_emoji() {
        // Emoji "😀" is 2 UTF-16 code units but 1 char
        let rope = Rope::from_str("a😀b\n");
        let pos = tower_lsp::lsp_types::Position {
            line: 0,
            character: 3,
        }; // after emoji
        let idx = lsp_pos_to_char_idx(&rope, pos).unwrap();
        assert_eq!(idx, 2); // 'a' + '😀' = 2 chars
    }
}
