//! `Entry`: a file or directory at a specific revision (spec.md §3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checksum::canonicalize_json;

/// The kind of content an [`Entry`] holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Json,
    Text,
    Directory,
}

/// The content of an [`Entry`]. JSON content is always stored in its
/// canonical (key-sorted) form; text content is always sanitized (see
/// [`crate::change::sanitize_text`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "content", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryContent {
    Json(Value),
    Text(String),
    Directory,
}

impl EntryContent {
    pub fn entry_type(&self) -> EntryType {
        match self {
            EntryContent::Json(_) => EntryType::Json,
            EntryContent::Text(_) => EntryType::Text,
            EntryContent::Directory => EntryType::Directory,
        }
    }

    /// Wrap and canonicalize a JSON value so two structurally-equal trees
    /// always compare and serialize identically.
    pub fn json(mut value: Value) -> Self {
        canonicalize_json(&mut value);
        EntryContent::Json(value)
    }
}

/// A file or directory at a specific revision: `(revision, path, type,
/// content)` per spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub revision: i32,
    pub path: String,
    #[serde(flatten)]
    pub content: EntryContent,
}

impl Entry {
    pub fn directory(revision: i32, path: String) -> Self {
        Entry {
            revision,
            path,
            content: EntryContent::Directory,
        }
    }

    pub fn entry_type(&self) -> EntryType {
        self.content.entry_type()
    }

    pub fn metadata(&self) -> EntryMetadata {
        EntryMetadata {
            revision: self.revision,
            path: self.path.clone(),
            entry_type: self.entry_type(),
        }
    }
}

/// `(revision, path, type)` without content — what `listFiles` returns,
/// as opposed to `getFiles`'s full [`Entry`] (spec.md SPEC_FULL.md §B).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryMetadata {
    pub revision: i32,
    pub path: String,
    pub entry_type: EntryType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_content_canonicalizes_key_order() {
        let a = EntryContent::json(json!({"b": 1, "a": 2}));
        let b = EntryContent::json(json!({"a": 2, "b": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn entry_type_matches_content_kind() {
        let e = Entry {
            revision: 3,
            path: "/a.json".to_string(),
            content: EntryContent::json(json!({"a": 1})),
        };
        assert_eq!(e.entry_type(), EntryType::Json);
    }
}
