//! Revision numbers and head-relative normalization (spec.md §3, §4.1, §9).
//!
//! A revision is a signed 32-bit integer. Values `>= 1` are absolute and
//! name a specific commit directly; revision `1` is the repository's
//! permanent empty initial commit. Values `<= 0` are relative to the
//! current head: `-1` is head, `-2` is one commit before head, and so on.
//! `0` is treated the same as `-1` (head) — the open question in spec.md
//! §9 is resolved that way here.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};

/// A (possibly relative) revision number as supplied by a caller.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(pub i32);

impl Revision {
    /// The most recent commit in a repository.
    pub const HEAD: Revision = Revision(-1);
    /// The repository's permanent, always-present initial commit.
    pub const INIT: Revision = Revision(1);

    pub fn new(v: i32) -> Self {
        Revision(v)
    }

    pub fn is_relative(&self) -> bool {
        self.0 <= 0
    }

    /// Resolve this revision against `head` (the current head revision,
    /// itself always absolute and `>= 1`). `(from, to)` pairs that must be
    /// normalized against the same snapshot should both call this with the
    /// same `head` value, atomically sampled by the caller (§4.1).
    pub fn normalize(self, head: i32) -> CoreResult<AbsoluteRevision> {
        let absolute = if self.0 > 0 {
            self.0
        } else if self.0 == 0 {
            // §9 open question: 0 behaves like -1 (head).
            head
        } else {
            head + self.0 + 1
        };

        if absolute < 1 || absolute > head {
            return Err(CoreError::RevisionNotFound(absolute as i64));
        }
        Ok(AbsoluteRevision(absolute))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for Revision {
    fn from(v: i32) -> Self {
        Revision(v)
    }
}

/// A revision that has already been resolved against a head snapshot.
/// Always `>= 1` and `<= head-at-resolution-time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AbsoluteRevision(pub i32);

impl AbsoluteRevision {
    pub fn get(self) -> i32 {
        self.0
    }

    pub fn as_revision(self) -> Revision {
        Revision(self.0)
    }
}

impl fmt::Display for AbsoluteRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq<i32> for AbsoluteRevision {
    fn eq(&self, other: &i32) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_and_init_constants() {
        assert_eq!(Revision::HEAD.0, -1);
        assert_eq!(Revision::INIT.0, 1);
    }

    #[test]
    fn relative_revisions_resolve_against_head() {
        let head = 5;
        assert_eq!(Revision(-1).normalize(head).unwrap().0, 5);
        assert_eq!(Revision(-2).normalize(head).unwrap().0, 4);
        assert_eq!(Revision(0).normalize(head).unwrap().0, 5);
        assert_eq!(Revision(3).normalize(head).unwrap().0, 3);
    }

    #[test]
    fn out_of_range_revisions_are_not_found() {
        let head = 5;
        assert!(Revision(6).normalize(head).is_err());
        assert!(Revision(-6).normalize(head).is_err());
    }

    #[test]
    fn normalize_is_idempotent() {
        let head = 10;
        let once = Revision(-3).normalize(head).unwrap();
        let twice = once.as_revision().normalize(head).unwrap();
        assert_eq!(once, twice);
    }
}
