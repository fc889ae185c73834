//! `ContentTree`: the in-memory materialization of a repository at one
//! revision, and the mechanics of applying a change-set to it
//! (spec.md §3 `Repository`, §4.1 steps 3-4).

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde_json::Value;
use similar::TextDiff;

use crate::change::{sanitize_text, Change, ChangeContent};
use crate::checksum::json_structurally_equal;
use crate::entry::{Entry, EntryContent};
use crate::errors::{CoreError, CoreResult};
use crate::patch::{apply_json_patch, apply_text_patch};
use crate::path::{ancestor_directories, is_directory_path, PathPattern};

/// The full content of a repository at one revision: file paths to
/// content. Directories are never stored; they are synthesized on read
/// from the file paths present.
#[derive(Debug, Clone, Default)]
pub struct ContentTree {
    files: BTreeMap<String, EntryContent>,
}

impl ContentTree {
    pub fn new() -> Self {
        ContentTree::default()
    }

    pub fn get(&self, path: &str) -> Option<&EntryContent> {
        self.files.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Export every file as `(path, content)` pairs, in path order, for
    /// snapshot persistence (`repository::store::CommitLogStore`).
    pub fn entries_for_snapshot(&self) -> Vec<(String, EntryContent)> {
        self.files.iter().map(|(p, c)| (p.clone(), c.clone())).collect()
    }

    /// Rebuild a tree from a previously exported snapshot.
    pub fn from_snapshot(entries: Vec<(String, EntryContent)>) -> Self {
        ContentTree {
            files: entries.into_iter().collect(),
        }
    }

    /// Apply one change, mutating the tree in place. Returns `Ok(false)`
    /// without mutating anything if the change is redundant (a JSON
    /// upsert that is structurally equal to the existing content,
    /// spec.md §4.1 step 4); returns `Ok(true)` otherwise.
    pub fn apply_change(&mut self, change: &Change) -> CoreResult<bool> {
        crate::path::validate_path(&change.path)?;
        match &change.content {
            ChangeContent::UpsertJson(value) => {
                let mut canonical = value.clone();
                crate::checksum::canonicalize_json(&mut canonical);
                if let Some(EntryContent::Json(existing)) = self.files.get(&change.path) {
                    if json_structurally_equal(existing, &canonical) {
                        return Ok(false);
                    }
                }
                self.files
                    .insert(change.path.clone(), EntryContent::Json(canonical));
                Ok(true)
            }
            ChangeContent::UpsertText(text) => {
                let sanitized = sanitize_text(text);
                if let Some(EntryContent::Text(existing)) = self.files.get(&change.path) {
                    if existing == &sanitized {
                        return Ok(false);
                    }
                }
                self.files
                    .insert(change.path.clone(), EntryContent::Text(sanitized));
                Ok(true)
            }
            ChangeContent::Remove => {
                // spec.md §8: "remove(non-existent) => ChangeConflict" —
                // an illegal remove is a change conflict, not a read-path
                // entry-not-found.
                if is_directory_path(&change.path) {
                    let removed = self.remove_prefix(&change.path);
                    if removed == 0 {
                        return Err(CoreError::ChangeConflict(format!(
                            "cannot remove nonexistent directory {}",
                            change.path
                        )));
                    }
                    Ok(true)
                } else {
                    self.files.remove(&change.path).ok_or_else(|| {
                        CoreError::ChangeConflict(format!(
                            "cannot remove nonexistent entry {}",
                            change.path
                        ))
                    })?;
                    Ok(true)
                }
            }
            ChangeContent::Rename(to) => {
                crate::path::validate_path(to)?;
                self.rename(&change.path, to)?;
                Ok(true)
            }
            ChangeContent::JsonPatch(ops) => {
                let existing = match self.files.get(&change.path) {
                    Some(EntryContent::Json(v)) => v.clone(),
                    Some(_) => {
                        return Err(CoreError::ChangeConflict(format!(
                            "{} is not a JSON file",
                            change.path
                        )))
                    }
                    None => {
                        return Err(CoreError::EntryNotFound {
                            path: change.path.clone(),
                            revision: 0,
                        })
                    }
                };
                let patched = apply_json_patch(&existing, ops)?;
                if json_structurally_equal(&existing, &patched) {
                    return Ok(false);
                }
                self.files
                    .insert(change.path.clone(), EntryContent::json(patched));
                Ok(true)
            }
            ChangeContent::TextPatch(diff) => {
                let existing = match self.files.get(&change.path) {
                    Some(EntryContent::Text(t)) => t.clone(),
                    Some(_) => {
                        return Err(CoreError::ChangeConflict(format!(
                            "{} is not a text file",
                            change.path
                        )))
                    }
                    None => {
                        return Err(CoreError::EntryNotFound {
                            path: change.path.clone(),
                            revision: 0,
                        })
                    }
                };
                let patched = apply_text_patch(&existing, diff)?;
                if patched == existing {
                    return Ok(false);
                }
                self.files.insert(change.path.clone(), EntryContent::Text(patched));
                Ok(true)
            }
        }
    }

    fn remove_prefix(&mut self, dir: &str) -> usize {
        let before = self.files.len();
        self.files.retain(|path, _| !path.starts_with(dir));
        before - self.files.len()
    }

    fn rename(&mut self, from: &str, to: &str) -> CoreResult<()> {
        if is_directory_path(from) {
            if !is_directory_path(to) {
                return Err(CoreError::ChangeConflict(
                    "cannot rename a directory to a file path".to_string(),
                ));
            }
            let matching: Vec<String> = self
                .files
                .keys()
                .filter(|p| p.starts_with(from))
                .cloned()
                .collect();
            if matching.is_empty() {
                // spec.md §8: a rename whose source does not exist is a
                // change conflict, not a read-path entry-not-found.
                return Err(CoreError::ChangeConflict(format!(
                    "rename source does not exist: {from}"
                )));
            }
            for path in matching {
                let suffix = &path[from.len()..];
                let dest = format!("{to}{suffix}");
                if self.files.contains_key(&dest) {
                    return Err(CoreError::ChangeConflict(format!(
                        "rename destination already exists: {dest}"
                    )));
                }
                let content = self.files.remove(&path).expect("key present in matching list");
                self.files.insert(dest, content);
            }
            Ok(())
        } else {
            if self.files.contains_key(to) {
                return Err(CoreError::ChangeConflict(format!(
                    "rename destination already exists: {to}"
                )));
            }
            let content = self.files.remove(from).ok_or_else(|| {
                CoreError::ChangeConflict(format!("rename source does not exist: {from}"))
            })?;
            self.files.insert(to.to_string(), content);
            Ok(())
        }
    }

    /// All entries (files and synthesized directories) matching
    /// `pattern`, stamped with `revision`. Pattern matching runs over the
    /// file list in parallel: a query's pattern can be an arbitrary glob
    /// with comma-separated alternatives, and a large tree makes this the
    /// hot loop of every `find`/`list_files` call (spec.md §4.3).
    pub fn find(&self, revision: i32, pattern: &PathPattern) -> Vec<Entry> {
        let matched: Vec<Entry> = self
            .files
            .par_iter()
            .filter(|(path, _)| pattern.matches(path))
            .map(|(path, content)| Entry {
                revision,
                path: path.clone(),
                content: content.clone(),
            })
            .collect();

        let directories: std::collections::BTreeSet<String> = self
            .files
            .par_iter()
            .flat_map(|(path, _)| ancestor_directories(path))
            .collect();

        let mut out = matched;
        for dir in directories {
            if pattern.matches(&dir) {
                out.push(Entry::directory(revision, dir));
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    /// Like [`Self::find`], but never clones entry content — `listFiles`
    /// only needs `(path, type)`, so skip the bulk of the bytes `getFiles`
    /// pays for (spec.md SPEC_FULL.md §B).
    pub fn find_metadata(&self, revision: i32, pattern: &PathPattern) -> Vec<crate::entry::EntryMetadata> {
        let matched: Vec<crate::entry::EntryMetadata> = self
            .files
            .par_iter()
            .filter(|(path, _)| pattern.matches(path))
            .map(|(path, content)| crate::entry::EntryMetadata {
                revision,
                path: path.clone(),
                entry_type: content.entry_type(),
            })
            .collect();

        let directories: std::collections::BTreeSet<String> = self
            .files
            .par_iter()
            .flat_map(|(path, _)| ancestor_directories(path))
            .collect();

        let mut out = matched;
        for dir in directories {
            if pattern.matches(&dir) {
                out.push(crate::entry::EntryMetadata {
                    revision,
                    path: dir,
                    entry_type: crate::entry::EntryType::Directory,
                });
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }
}

/// Whether [`diff`] expresses changed content as a blind overwrite or as
/// a conflict-detecting patch (spec.md §4.3 `diff`/`previewDiff`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
    Upsert,
    Patch,
}

/// The change-set that would transform `old` into `new`, restricted to
/// paths matching `pattern`.
pub fn diff(old: &ContentTree, new: &ContentTree, pattern: &PathPattern, mode: DiffMode) -> Vec<Change> {
    let mut paths: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
    paths.extend(old.files.keys().map(String::as_str));
    paths.extend(new.files.keys().map(String::as_str));

    let mut changes = Vec::new();
    for path in paths {
        if !pattern.matches(path) {
            continue;
        }
        match (old.files.get(path), new.files.get(path)) {
            (Some(_), None) => changes.push(Change::remove(path)),
            (None, Some(content)) => changes.push(upsert_for(path, content)),
            (Some(before), Some(after)) => {
                if before == after {
                    continue;
                }
                changes.push(changed_entry(path, before, after, mode));
            }
            (None, None) => unreachable!("path drawn from the union of both trees"),
        }
    }
    changes
}

fn upsert_for(path: &str, content: &EntryContent) -> Change {
    match content {
        EntryContent::Json(v) => Change::upsert_json(path, v.clone()),
        EntryContent::Text(t) => Change::upsert_text(path, t.clone()),
        EntryContent::Directory => Change::remove(path),
    }
}

fn changed_entry(path: &str, before: &EntryContent, after: &EntryContent, mode: DiffMode) -> Change {
    match (mode, before, after) {
        (DiffMode::Patch, EntryContent::Json(old_v), EntryContent::Json(new_v)) => Change {
            path: path.to_string(),
            content: ChangeContent::JsonPatch(crate::patch::JsonPatchOperation::replace_whole(
                old_v.clone(),
                new_v.clone(),
            )),
        },
        (DiffMode::Patch, EntryContent::Text(old_t), EntryContent::Text(new_t)) => Change {
            path: path.to_string(),
            content: ChangeContent::TextPatch(unified_text_diff(old_t, new_t)),
        },
        _ => upsert_for(path, after),
    }
}

fn unified_text_diff(old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header("a", "b")
        .to_string()
}

/// Canonicalize a raw JSON value the way a fresh `UpsertJson` change
/// would before storing it, used by callers constructing entries outside
/// of [`ContentTree::apply_change`] (e.g. the permanent `meta` project
/// bootstrap content).
pub fn canonical_json(value: Value) -> EntryContent {
    EntryContent::json(value)
}
