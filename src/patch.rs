//! RFC-6902 JSON Patch application and unified-diff text patch application
//! (spec.md §3 `Change::JsonPatch`/`Change::TextPatch`, §4.1).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{CoreError, CoreResult};

/// One RFC-6902 operation. `path` is a JSON Pointer (RFC 6901); the empty
/// pointer `""` addresses the whole document, which is how a
/// previous-value assertion followed by a whole-document replace (the
/// `JsonPatch(path, expect, to)` shorthand used in spec examples) is
/// expressed here: `[Test { path: "", value: expect }, Replace { path: "",
/// value: to }]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum JsonPatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

impl JsonPatchOperation {
    /// Convenience constructor for the common "assert previous value, then
    /// replace the whole document" shape.
    pub fn replace_whole(expect: Value, to: Value) -> Vec<Self> {
        vec![
            JsonPatchOperation::Test {
                path: String::new(),
                value: expect,
            },
            JsonPatchOperation::Replace {
                path: String::new(),
                value: to,
            },
        ]
    }
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn tokens(pointer: &str) -> Vec<String> {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer.split('/').skip(1).map(unescape_token).collect()
}

fn conflict(path: &str, reason: impl Into<String>) -> CoreError {
    CoreError::JsonPatchConflict {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn get<'a>(doc: &'a Value, pointer: &str) -> Option<&'a Value> {
    let toks = tokens(pointer);
    let mut cur = doc;
    for tok in toks {
        cur = match cur {
            Value::Object(map) => map.get(&tok)?,
            Value::Array(items) => {
                let idx: usize = tok.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(cur)
}

fn get_mut_parent<'a>(doc: &'a mut Value, pointer: &str) -> CoreResult<(&'a mut Value, String)> {
    let mut toks = tokens(pointer);
    if toks.is_empty() {
        return Err(conflict(pointer, "pointer has no parent container"));
    }
    let last = toks.pop().unwrap();
    let mut cur = doc;
    for tok in toks {
        cur = match cur {
            Value::Object(map) => map
                .get_mut(&tok)
                .ok_or_else(|| conflict(pointer, format!("no such member: {tok}")))?,
            Value::Array(items) => {
                let idx: usize = tok
                    .parse()
                    .map_err(|_| conflict(pointer, format!("not an array index: {tok}")))?;
                items
                    .get_mut(idx)
                    .ok_or_else(|| conflict(pointer, format!("array index out of range: {idx}")))?
            }
            _ => return Err(conflict(pointer, "path traverses a scalar value")),
        };
    }
    Ok((cur, last))
}

fn insert_at(parent: &mut Value, key: &str, value: Value, path: &str) -> CoreResult<()> {
    match parent {
        Value::Object(map) => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            if key == "-" {
                items.push(value);
                return Ok(());
            }
            let idx: usize = key
                .parse()
                .map_err(|_| conflict(path, format!("not an array index: {key}")))?;
            if idx > items.len() {
                return Err(conflict(path, format!("array index out of range: {idx}")));
            }
            items.insert(idx, value);
            Ok(())
        }
        _ => Err(conflict(path, "parent is not an object or array")),
    }
}

fn remove_at(parent: &mut Value, key: &str, path: &str) -> CoreResult<Value> {
    match parent {
        Value::Object(map) => map
            .remove(key)
            .ok_or_else(|| conflict(path, format!("no such member: {key}"))),
        Value::Array(items) => {
            let idx: usize = key
                .parse()
                .map_err(|_| conflict(path, format!("not an array index: {key}")))?;
            if idx >= items.len() {
                return Err(conflict(path, format!("array index out of range: {idx}")));
            }
            Ok(items.remove(idx))
        }
        _ => Err(conflict(path, "parent is not an object or array")),
    }
}

fn replace_at(parent: &mut Value, key: &str, value: Value, path: &str) -> CoreResult<()> {
    match parent {
        Value::Object(map) => {
            if !map.contains_key(key) {
                return Err(conflict(path, format!("no such member: {key}")));
            }
            map.insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let idx: usize = key
                .parse()
                .map_err(|_| conflict(path, format!("not an array index: {key}")))?;
            let slot = items
                .get_mut(idx)
                .ok_or_else(|| conflict(path, format!("array index out of range: {idx}")))?;
            *slot = value;
            Ok(())
        }
        _ => Err(conflict(path, "parent is not an object or array")),
    }
}

/// Apply a sequence of JSON Patch operations to `doc`, returning the
/// resulting document. Operations apply in order against the
/// accumulating result; a `test` mismatch or an unresolvable pointer
/// fails the whole patch with [`CoreError::JsonPatchConflict`] and `doc`
/// is left untouched by the caller (this function never mutates its
/// input in place).
pub fn apply_json_patch(doc: &Value, ops: &[JsonPatchOperation]) -> CoreResult<Value> {
    let mut result = doc.clone();
    for op in ops {
        apply_one(&mut result, op)?;
    }
    Ok(result)
}

fn apply_one(doc: &mut Value, op: &JsonPatchOperation) -> CoreResult<()> {
    match op {
        JsonPatchOperation::Test { path, value } => {
            let actual = get(doc, path).ok_or_else(|| conflict(path, "path does not exist"))?;
            if !crate::checksum::json_structurally_equal(actual, value) {
                return Err(conflict(path, "value does not match expected value"));
            }
            Ok(())
        }
        JsonPatchOperation::Add { path, value } => {
            if path.is_empty() {
                *doc = value.clone();
                return Ok(());
            }
            let (parent, key) = get_mut_parent(doc, path)?;
            insert_at(parent, &key, value.clone(), path)
        }
        JsonPatchOperation::Replace { path, value } => {
            if path.is_empty() {
                *doc = value.clone();
                return Ok(());
            }
            let (parent, key) = get_mut_parent(doc, path)?;
            replace_at(parent, &key, value.clone(), path)
        }
        JsonPatchOperation::Remove { path } => {
            if path.is_empty() {
                return Err(conflict(path, "cannot remove the whole document"));
            }
            let (parent, key) = get_mut_parent(doc, path)?;
            remove_at(parent, &key, path).map(|_| ())
        }
        JsonPatchOperation::Move { from, path } => {
            let value = if from.is_empty() {
                doc.clone()
            } else {
                let (parent, key) = get_mut_parent(doc, from)?;
                remove_at(parent, &key, from)?
            };
            apply_one(doc, &JsonPatchOperation::Add {
                path: path.clone(),
                value,
            })
        }
        JsonPatchOperation::Copy { from, path } => {
            let value = get(doc, from)
                .cloned()
                .ok_or_else(|| conflict(from, "path does not exist"))?;
            apply_one(doc, &JsonPatchOperation::Add {
                path: path.clone(),
                value,
            })
        }
    }
}

/// A single parsed unified-diff hunk line.
enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

/// Apply a unified-diff text patch to `original`, verifying that every
/// context and removed line matches `original` at the position the hunk
/// header claims. A mismatch fails with [`CoreError::TextPatchConflict`]
/// (the "three-way-like" check in spec.md §4.1).
pub fn apply_text_patch(original: &str, unified_diff: &str) -> CoreResult<String> {
    let original_lines: Vec<&str> = original.split('\n').collect();
    let mut output: Vec<String> = Vec::with_capacity(original_lines.len());
    let mut cursor = 0usize; // next unconsumed index into original_lines
    let mut applied_any_hunk = false;

    let mut lines = unified_diff.lines().peekable();
    while let Some(line) = lines.next() {
        if line.starts_with("--- ") || line.starts_with("+++ ") {
            continue;
        }
        let Some(header) = line.strip_prefix("@@ ") else {
            continue;
        };
        let old_start = parse_hunk_old_start(header)
            .ok_or_else(|| text_conflict("malformed hunk header"))?;
        // Unified diff line numbers are 1-based; old_start == 0 means an
        // empty original file.
        let hunk_start = old_start.saturating_sub(1);
        if hunk_start < cursor || hunk_start > original_lines.len() {
            return Err(text_conflict("hunk does not align with document"));
        }
        output.extend(original_lines[cursor..hunk_start].iter().map(|s| s.to_string()));
        cursor = hunk_start;

        let mut body = Vec::new();
        while let Some(next) = lines.peek() {
            if next.starts_with("@@ ") {
                break;
            }
            let next = lines.next().unwrap();
            if let Some(rest) = next.strip_prefix(' ') {
                body.push(HunkLine::Context(rest.to_string()));
            } else if let Some(rest) = next.strip_prefix('-') {
                body.push(HunkLine::Remove(rest.to_string()));
            } else if let Some(rest) = next.strip_prefix('+') {
                body.push(HunkLine::Add(rest.to_string()));
            } else if next.is_empty() {
                body.push(HunkLine::Context(String::new()));
            }
        }

        for hunk_line in body {
            match hunk_line {
                HunkLine::Context(expected) => {
                    let actual = original_lines
                        .get(cursor)
                        .ok_or_else(|| text_conflict("context line past end of document"))?;
                    if *actual != expected {
                        return Err(text_conflict(format!(
                            "context mismatch at line {}: expected {:?}, found {:?}",
                            cursor + 1,
                            expected,
                            actual
                        )));
                    }
                    output.push(expected);
                    cursor += 1;
                }
                HunkLine::Remove(expected) => {
                    let actual = original_lines
                        .get(cursor)
                        .ok_or_else(|| text_conflict("removed line past end of document"))?;
                    if *actual != expected {
                        return Err(text_conflict(format!(
                            "removed-line mismatch at line {}: expected {:?}, found {:?}",
                            cursor + 1,
                            expected,
                            actual
                        )));
                    }
                    cursor += 1;
                }
                HunkLine::Add(added) => {
                    output.push(added);
                }
            }
        }
        applied_any_hunk = true;
    }

    if !applied_any_hunk {
        return Err(text_conflict("patch contains no hunks"));
    }
    output.extend(original_lines[cursor..].iter().map(|s| s.to_string()));
    Ok(crate::change::sanitize_text(&output.join("\n")))
}

fn text_conflict(reason: impl Into<String>) -> CoreError {
    CoreError::TextPatchConflict {
        path: String::new(),
        reason: reason.into(),
    }
}

/// Parse the old-file start line out of a `@@ -l,s +l,s @@` header.
fn parse_hunk_old_start(header: &str) -> Option<usize> {
    let old_part = header.split(' ').next()?; // "-l,s"
    let digits = old_part.strip_prefix('-')?;
    let line_part = digits.split(',').next()?;
    line_part.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_whole_document_succeeds_when_expectation_matches() {
        let doc = json!({"a": 1});
        let ops = JsonPatchOperation::replace_whole(json!({"a": 1}), json!({"a": 2}));
        let result = apply_json_patch(&doc, &ops).unwrap();
        assert_eq!(result, json!({"a": 2}));
    }

    #[test]
    fn replace_whole_document_fails_when_expectation_stale() {
        let doc = json!({"a": 1});
        let ops = JsonPatchOperation::replace_whole(json!({"a": 99}), json!({"a": 2}));
        let err = apply_json_patch(&doc, &ops).unwrap_err();
        assert!(matches!(err, CoreError::JsonPatchConflict { .. }));
    }

    #[test]
    fn add_and_remove_nested_member() {
        let doc = json!({"a": {"b": 1}});
        let ops = vec![JsonPatchOperation::Add {
            path: "/a/c".to_string(),
            value: json!(2),
        }];
        let result = apply_json_patch(&doc, &ops).unwrap();
        assert_eq!(result, json!({"a": {"b": 1, "c": 2}}));

        let ops = vec![JsonPatchOperation::Remove {
            path: "/a/b".to_string(),
        }];
        let result = apply_json_patch(&result, &ops).unwrap();
        assert_eq!(result, json!({"a": {"c": 2}}));
    }

    #[test]
    fn array_index_insert_shifts_elements() {
        let doc = json!({"xs": [1, 3]});
        let ops = vec![JsonPatchOperation::Add {
            path: "/xs/1".to_string(),
            value: json!(2),
        }];
        let result = apply_json_patch(&doc, &ops).unwrap();
        assert_eq!(result, json!({"xs": [1, 2, 3]}));
    }

    #[test]
    fn text_patch_applies_matching_hunk() {
        let original = "line1\nline2\nline3\n";
        let diff = "--- a\n+++ b\n@@ -1,3 +1,3 @@\n line1\n-line2\n+line2 changed\n line3\n";
        let patched = apply_text_patch(original, diff).unwrap();
        assert_eq!(patched, "line1\nline2 changed\nline3\n");
    }

    #[test]
    fn text_patch_conflicts_on_context_mismatch() {
        let original = "line1\nline2\nline3\n";
        let diff = "--- a\n+++ b\n@@ -1,3 +1,3 @@\n line1\n-nope\n+line2 changed\n line3\n";
        let err = apply_text_patch(original, diff).unwrap_err();
        assert!(matches!(err, CoreError::TextPatchConflict { .. }));
    }
}
