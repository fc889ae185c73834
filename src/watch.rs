//! C3 Commit Watchers: long-poll notification when a commit touches a
//! path matching a caller's pattern (spec.md §4.3).
//!
//! Waiters are kept in a `DashMap` keyed by `(project, repo)`, mirroring
//! the pack decoder's offset/hash waitlist (`internal/pack/waitlist.rs`)
//! in shape: a concurrent map from key to a list of pending waiters,
//! drained opportunistically. Each waiter additionally carries its own
//! [`PathPattern`] so one repository-wide map can serve every
//! outstanding pattern without a map entry per pattern string.

use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::path::PathPattern;

struct Waiter {
    id: Uuid,
    pattern: PathPattern,
    sender: oneshot::Sender<i32>,
}

/// Registry of outstanding commit watches for every repository.
#[derive(Default)]
pub struct CommitWatchers {
    waiters: DashMap<(String, String), Vec<Waiter>>,
}

/// A handle returned by [`CommitWatchers::subscribe`]: await `receiver`
/// (with a caller-imposed timeout) for the revision of the next commit
/// matching the subscribed pattern, and pass `id` to [`CommitWatchers::cancel`]
/// if you give up waiting before it fires.
pub struct Subscription {
    pub id: Uuid,
    pub receiver: oneshot::Receiver<i32>,
}

impl CommitWatchers {
    pub fn new() -> Self {
        CommitWatchers::default()
    }

    pub fn subscribe(&self, project: &str, repo: &str, pattern: PathPattern) -> Subscription {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        self.waiters
            .entry((project.to_string(), repo.to_string()))
            .or_default()
            .push(Waiter {
                id,
                pattern,
                sender: tx,
            });
        Subscription { id, receiver: rx }
    }

    /// Deregister a waiter that gave up (timed out or the caller
    /// disconnected) before it was notified. A no-op if it already fired.
    pub fn cancel(&self, project: &str, repo: &str, id: Uuid) {
        if let Some(mut entry) = self.waiters.get_mut(&(project.to_string(), repo.to_string())) {
            entry.retain(|w| w.id != id);
        }
    }

    /// Notify every waiter whose pattern matches at least one of
    /// `changed_paths`, exactly once each, then drop them from the
    /// registry (at-most-once delivery per spec.md §4.3).
    pub fn notify(&self, project: &str, repo: &str, changed_paths: &[String], new_revision: i32) {
        let key = (project.to_string(), repo.to_string());
        let Some(mut entry) = self.waiters.get_mut(&key) else {
            return;
        };
        let waiters = std::mem::take(entry.value_mut());
        let mut still_waiting = Vec::with_capacity(waiters.len());
        for waiter in waiters {
            if changed_paths.iter().any(|p| waiter.pattern.matches(p)) {
                let _ = waiter.sender.send(new_revision);
            } else {
                still_waiting.push(waiter);
            }
        }
        *entry.value_mut() = still_waiting;
    }

    pub fn pending_count(&self, project: &str, repo: &str) -> usize {
        self.waiters
            .get(&(project.to_string(), repo.to_string()))
            .map(|e| e.len())
            .unwrap_or(0)
    }

    /// Wake every pending waiter for a repository with a terminal signal
    /// and clear its map entry, called when the repository is removed or
    /// purged (spec.md §4.3 "Shutdown"). Dropping each waiter's sender
    /// without sending fails its receiver, so callers already treat a
    /// dropped subscription the same way they treat a timeout.
    pub fn close(&self, project: &str, repo: &str) {
        if let Some((_, waiters)) = self.waiters.remove(&(project.to_string(), repo.to_string())) {
            drop(waiters);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_wakes_only_matching_pattern() {
        let watchers = CommitWatchers::new();
        let a = watchers.subscribe("p", "r", PathPattern::parse("/a.json"));
        let b = watchers.subscribe("p", "r", PathPattern::parse("/b.json"));

        watchers.notify("p", "r", &["/a.json".to_string()], 5);

        assert_eq!(a.receiver.await.unwrap(), 5);
        assert_eq!(watchers.pending_count("p", "r"), 1);
        drop(b);
    }

    #[tokio::test]
    async fn cancel_removes_an_unfired_waiter() {
        let watchers = CommitWatchers::new();
        let sub = watchers.subscribe("p", "r", PathPattern::parse("/a.json"));
        assert_eq!(watchers.pending_count("p", "r"), 1);
        watchers.cancel("p", "r", sub.id);
        assert_eq!(watchers.pending_count("p", "r"), 0);
    }

    #[tokio::test]
    async fn notification_is_delivered_at_most_once() {
        let watchers = CommitWatchers::new();
        let sub = watchers.subscribe("p", "r", PathPattern::parse("/a.json"));
        watchers.notify("p", "r", &["/a.json".to_string()], 2);
        watchers.notify("p", "r", &["/a.json".to_string()], 3);
        assert_eq!(sub.receiver.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn close_wakes_pending_waiters_with_a_terminal_failure() {
        let watchers = CommitWatchers::new();
        let sub = watchers.subscribe("p", "r", PathPattern::parse("/a.json"));
        watchers.close("p", "r");
        assert!(sub.receiver.await.is_err());
        assert_eq!(watchers.pending_count("p", "r"), 0);
    }
}
