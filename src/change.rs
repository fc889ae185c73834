//! `Change`: a single-path modification inside a commit (spec.md §3, §4.1).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::patch::JsonPatchOperation;

/// A tagged modification of one path. The change-set of a commit is an
/// ordered list of these, normalized and applied in order (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeContent {
    /// Add a new JSON file, or replace an existing one, with `value`.
    UpsertJson(Value),
    /// Add a new text file, or replace an existing one, with `text`
    /// (sanitized on apply: `\r` stripped, exactly one trailing `\n`).
    UpsertText(String),
    /// Remove an existing file or directory (recursive for directories).
    Remove,
    /// Rename the entry at this path to the given destination path.
    Rename(String),
    /// Apply RFC-6902-style JSON patch operations to an existing JSON file.
    JsonPatch(Vec<JsonPatchOperation>),
    /// Apply a unified-diff text patch to an existing text file.
    TextPatch(String),
}

/// A change targeting one path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    #[serde(flatten)]
    pub content: ChangeContent,
}

impl Change {
    pub fn upsert_json(path: impl Into<String>, value: Value) -> Self {
        Change {
            path: path.into(),
            content: ChangeContent::UpsertJson(value),
        }
    }

    pub fn upsert_text(path: impl Into<String>, text: impl Into<String>) -> Self {
        Change {
            path: path.into(),
            content: ChangeContent::UpsertText(text.into()),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Change {
            path: path.into(),
            content: ChangeContent::Remove,
        }
    }

    pub fn rename(path: impl Into<String>, to: impl Into<String>) -> Self {
        Change {
            path: path.into(),
            content: ChangeContent::Rename(to.into()),
        }
    }
}

/// Strip every `\r` byte and ensure the text ends with exactly one `\n`
/// (spec.md §3, round-trip law in §8). `\r` never appears as a UTF-8
/// continuation byte, so operating on raw bytes is safe.
pub fn sanitize_text(input: &str) -> String {
    let bytes = input.as_bytes();
    let cleaned: Vec<u8> = if memchr::memchr(b'\r', bytes).is_none() {
        bytes.to_vec()
    } else {
        bytes.iter().copied().filter(|&b| b != b'\r').collect()
    };

    let mut end = cleaned.len();
    while end > 0 && cleaned[end - 1] == b'\n' {
        end -= 1;
    }
    let mut out = cleaned[..end].to_vec();
    out.push(b'\n');
    // Safe: input was valid UTF-8 and we only removed/added ASCII bytes.
    String::from_utf8(out).expect("sanitize_text: input must be valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_cr_and_normalizes_trailing_newline() {
        assert_eq!(sanitize_text("a\r\nb\r\n"), "a\nb\n");
        assert_eq!(sanitize_text("a\nb"), "a\nb\n");
        assert_eq!(sanitize_text("a\nb\n\n\n"), "a\nb\n");
        assert_eq!(sanitize_text(""), "\n");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_text("hello\r\nworld");
        let twice = sanitize_text(&once);
        assert_eq!(once, twice);
    }
}
