//! `Commit`: the immutable record a successful push produces (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::Change;

/// The identity that authored a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Author {
            name: name.into(),
            email: email.into(),
        }
    }

    /// The synthetic author recorded on the permanent, empty revision-1
    /// commit every repository is created with.
    pub fn system() -> Self {
        Author {
            name: "System".to_string(),
            email: "system@localhost".to_string(),
        }
    }
}

/// How [`CommitDetail::detail`] should be rendered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Markup {
    PlainText,
    Markdown,
}

impl Default for Markup {
    fn default() -> Self {
        Markup::PlainText
    }
}

/// The human-authored message attached to a commit: a one-line summary
/// plus an optional longer-form detail rendered per `markup`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitDetail {
    pub summary: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub markup: Markup,
}

impl CommitDetail {
    pub fn summary_only(summary: impl Into<String>) -> Self {
        CommitDetail {
            summary: summary.into(),
            detail: String::new(),
            markup: Markup::PlainText,
        }
    }
}

/// An immutable, fully-materialized commit: the revision it produced,
/// who authored it, when, the message, and the change-set that produced
/// it (§4.1's "commit chain" is this sequence, indexed by revision).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub revision: i32,
    pub author: Author,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub detail: CommitDetail,
    pub changes: Vec<Change>,
}

impl Commit {
    /// The permanent, empty revision-1 commit every repository starts
    /// with (spec.md §3, "Repository").
    pub fn initial(timestamp: DateTime<Utc>) -> Self {
        Commit {
            revision: crate::revision::Revision::INIT.0,
            author: Author::system(),
            timestamp,
            detail: CommitDetail::summary_only("Create a new repository"),
            changes: Vec::new(),
        }
    }
}

/// The outcome of a successful push: the new head revision and the
/// server timestamp recorded on the resulting commit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PushResult {
    pub revision: i32,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_commit_is_revision_one_and_empty() {
        let c = Commit::initial(Utc::now());
        assert_eq!(c.revision, 1);
        assert!(c.changes.is_empty());
        assert_eq!(c.author, Author::system());
    }

    #[test]
    fn markup_defaults_to_plain_text() {
        let detail = CommitDetail::summary_only("hello");
        assert_eq!(detail.markup, Markup::PlainText);
    }
}
