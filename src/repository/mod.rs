//! C1 Repository Store: a single repository's commit chain and content
//! tree, and the read/write operations spec.md §4.1 defines over it.

pub mod cache;
pub mod store;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use self::store::CommitLogStore;

use crate::change::{Change, ChangeContent};
use crate::commit::{Author, Commit, CommitDetail, PushResult};
use crate::errors::{CoreError, CoreResult};
use crate::entry::Entry;
use crate::path::PathPattern;
use crate::revision::{AbsoluteRevision, Revision};
use crate::tree::{self, ContentTree, DiffMode};

use self::cache::SnapshotCache;
use crate::worker::RepositoryWorkerPool;

/// Snapshot the materialized tree to disk every this-many commits, so a
/// restart's replay starts from the nearest snapshot instead of revision
/// 1 (spec.md SPEC_FULL.md §B, `repository/store.rs`'s `write_snapshot`).
const SNAPSHOT_INTERVAL_REVISIONS: i32 = 64;

/// Lifecycle state of a repository (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryLifecycle {
    Live,
    Tombstoned { removed_at: DateTime<Utc> },
}

/// What [`Repository::commit`] returns: the push result plus the paths
/// it touched, so the caller can wake matching [`crate::watch::CommitWatchers`].
pub struct CommitOutcome {
    pub push_result: PushResult,
    pub changed_paths: Vec<String>,
}

struct Inner {
    commits: Vec<Commit>,
    head_tree: ContentTree,
}

/// One repository's commit chain and materialized content, guarded by a
/// single async mutex so every mutation is atomic with respect to the
/// head it read (spec.md §4.1, §5 "per-repository lock").
pub struct Repository {
    pub project: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub lifecycle: std::sync::RwLock<RepositoryLifecycle>,
    inner: Mutex<Inner>,
    snapshots: SnapshotCache,
    closed: AtomicBool,
    store: Option<CommitLogStore>,
    workers: RepositoryWorkerPool,
}

impl Repository {
    /// An in-memory-only repository (used by tests and by a registry with
    /// no configured `dataDir`). Nothing survives a process restart.
    pub fn new(project: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>, cache_capacity: usize) -> Self {
        Repository::with_workers(project, name, now, cache_capacity, RepositoryWorkerPool::new(1))
    }

    /// Like [`Self::new`], but sharing the caller's repository worker pool
    /// (spec.md §5: "all [C1 storage-touching] operations are dispatched
    /// to this pool") rather than spinning up a private one-thread pool.
    pub fn with_workers(
        project: impl Into<String>,
        name: impl Into<String>,
        now: DateTime<Utc>,
        cache_capacity: usize,
        workers: RepositoryWorkerPool,
    ) -> Self {
        Repository {
            project: project.into(),
            name: name.into(),
            created_at: now,
            lifecycle: std::sync::RwLock::new(RepositoryLifecycle::Live),
            inner: Mutex::new(Inner {
                commits: vec![Commit::initial(now)],
                head_tree: ContentTree::new(),
            }),
            snapshots: SnapshotCache::new(cache_capacity),
            closed: AtomicBool::new(false),
            store: None,
            workers,
        }
    }

    /// Open a repository backed by a durable commit log under `dir`
    /// (spec.md §4.1 "State at rest"). Recovers prior history if `dir`
    /// already holds one (a snapshot, if present, short-circuits replay
    /// of everything at or before it); otherwise starts fresh with just
    /// the permanent revision-1 commit, which is durably appended before
    /// this call returns.
    pub async fn open_persistent(
        project: impl Into<String>,
        name: impl Into<String>,
        dir: PathBuf,
        now: DateTime<Utc>,
        cache_capacity: usize,
        workers: RepositoryWorkerPool,
    ) -> CoreResult<Self> {
        let project = project.into();
        let name = name.into();
        let store = CommitLogStore::open(&dir).await?;

        let mut commits = CommitLogStore::load(&dir).await?;
        let (base_revision, mut head_tree) = match CommitLogStore::load_snapshot(&dir).await? {
            Some((revision, tree)) => (revision, tree),
            None => (0, ContentTree::new()),
        };

        if commits.is_empty() {
            let initial = Commit::initial(now);
            store.append_blocking(&initial)?;
            commits.push(initial);
        }

        for commit in commits.iter().filter(|c| c.revision > base_revision) {
            for change in &commit.changes {
                let _ = head_tree.apply_change(change);
            }
        }

        Ok(Repository {
            project,
            name,
            created_at: now,
            lifecycle: std::sync::RwLock::new(RepositoryLifecycle::Live),
            inner: Mutex::new(Inner { commits, head_tree }),
            snapshots: SnapshotCache::new(cache_capacity),
            closed: AtomicBool::new(false),
            store: Some(store),
            workers,
        })
    }

    pub fn is_live(&self) -> bool {
        matches!(*self.lifecycle.read().expect("lifecycle lock poisoned"), RepositoryLifecycle::Live)
    }

    pub fn mark_removed(&self, now: DateTime<Utc>) {
        *self.lifecycle.write().expect("lifecycle lock poisoned") = RepositoryLifecycle::Tombstoned { removed_at: now };
    }

    pub fn unremove(&self) {
        *self.lifecycle.write().expect("lifecycle lock poisoned") = RepositoryLifecycle::Live;
    }

    pub fn removed_at(&self) -> Option<DateTime<Utc>> {
        match *self.lifecycle.read().expect("lifecycle lock poisoned") {
            RepositoryLifecycle::Tombstoned { removed_at } => Some(removed_at),
            RepositoryLifecycle::Live => None,
        }
    }

    fn check_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::StorageFault {
                project: self.project.clone(),
                repo: self.name.clone(),
                reason: "repository is closed".to_string(),
            });
        }
        Ok(())
    }

    /// Mark the repository permanently unusable (spec.md §7: a fatal
    /// storage fault closes the repository and degrades it to
    /// read-only-failing). There is no reopening; a new `Repository` is
    /// created in its place after the project is restored from a
    /// durable replica.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        warn!(project = %self.project, repo = %self.name, "repository closed after fatal storage fault");
    }

    pub async fn head_revision(&self) -> i32 {
        let guard = self.inner.lock().await;
        guard.commits.len() as i32
    }

    pub fn normalize(&self, revision: Revision, head: i32) -> CoreResult<AbsoluteRevision> {
        revision.normalize(head)
    }

    async fn tree_at(&self, revision: AbsoluteRevision, guard: &Inner) -> Arc<ContentTree> {
        let head = guard.commits.len() as i32;
        if revision.get() == head {
            return Arc::new(guard.head_tree.clone());
        }
        if let Some(cached) = self.snapshots.get(revision.get()) {
            return cached;
        }
        let mut replay = ContentTree::new();
        for commit in &guard.commits[1..revision.get() as usize] {
            for change in &commit.changes {
                // Replaying previously-committed, already-normalized
                // changes never conflicts or is redundant.
                let _ = replay.apply_change(change);
            }
        }
        let snapshot = Arc::new(replay);
        self.snapshots.insert(revision.get(), snapshot.clone());
        snapshot
    }

    pub async fn get_entry(&self, revision: Revision, path: &str) -> CoreResult<Option<Entry>> {
        self.check_open()?;
        crate::path::validate_path(path)?;
        let guard = self.inner.lock().await;
        let head = guard.commits.len() as i32;
        let abs = revision.normalize(head)?;
        let tree = self.tree_at(abs, &guard).await;
        Ok(tree.get(path).map(|content| Entry {
            revision: abs.get(),
            path: path.to_string(),
            content: content.clone(),
        }))
    }

    pub async fn find(&self, revision: Revision, pattern: &PathPattern) -> CoreResult<Vec<Entry>> {
        self.check_open()?;
        let guard = self.inner.lock().await;
        let head = guard.commits.len() as i32;
        let abs = revision.normalize(head)?;
        let tree = self.tree_at(abs, &guard).await;
        Ok(tree.find(abs.get(), pattern))
    }

    /// `listFiles`: path and type only, no content (spec.md SPEC_FULL.md
    /// §B) — cheaper than [`Self::find`] for callers that only need to
    /// enumerate a tree's shape.
    pub async fn find_metadata(&self, revision: Revision, pattern: &PathPattern) -> CoreResult<Vec<crate::entry::EntryMetadata>> {
        self.check_open()?;
        let guard = self.inner.lock().await;
        let head = guard.commits.len() as i32;
        let abs = revision.normalize(head)?;
        let tree = self.tree_at(abs, &guard).await;
        Ok(tree.find_metadata(abs.get(), pattern))
    }

    /// The change-set between two revisions, restricted to `pattern`.
    pub async fn diff(
        &self,
        from: Revision,
        to: Revision,
        pattern: &PathPattern,
        mode: DiffMode,
    ) -> CoreResult<Vec<Change>> {
        self.check_open()?;
        let guard = self.inner.lock().await;
        let head = guard.commits.len() as i32;
        let from_abs = from.normalize(head)?;
        let to_abs = to.normalize(head)?;
        let old = self.tree_at(from_abs, &guard).await;
        let new = self.tree_at(to_abs, &guard).await;
        Ok(tree::diff(&old, &new, pattern, mode))
    }

    /// What [`Repository::diff`] would report between `base` and `base`
    /// with `changes` hypothetically applied, without committing them.
    pub async fn preview_diff(
        &self,
        base: Revision,
        changes: &[Change],
        pattern: &PathPattern,
        mode: DiffMode,
    ) -> CoreResult<Vec<Change>> {
        self.check_open()?;
        let guard = self.inner.lock().await;
        let head = guard.commits.len() as i32;
        let base_abs = base.normalize(head)?;
        let old = self.tree_at(base_abs, &guard).await;
        let mut hypothetical = (*old).clone();
        for change in changes {
            hypothetical.apply_change(change)?;
        }
        Ok(tree::diff(&old, &hypothetical, pattern, mode))
    }

    /// Commits matching `pattern` between `from` and `to` (inclusive),
    /// newest first. Revision 1's permanent empty commit is included
    /// only when `pattern` is match-all (spec.md §4.1).
    pub async fn history(&self, from: Revision, to: Revision, pattern: &PathPattern) -> CoreResult<Vec<Commit>> {
        self.check_open()?;
        let guard = self.inner.lock().await;
        let head = guard.commits.len() as i32;
        let from_abs = from.normalize(head)?.get();
        let to_abs = to.normalize(head)?.get();
        let (lo, hi) = if from_abs <= to_abs { (from_abs, to_abs) } else { (to_abs, from_abs) };

        let mut matched: Vec<Commit> = guard.commits[(lo - 1) as usize..hi as usize]
            .iter()
            .filter(|c| {
                if c.revision == 1 {
                    return pattern.is_match_all();
                }
                c.changes.iter().any(|ch| pattern.matches(&ch.path))
            })
            .cloned()
            .collect();

        if from_abs > to_abs {
            matched.reverse();
        }
        Ok(matched)
    }

    /// Append a new commit atop `base_revision`. Fails with
    /// [`CoreError::ChangeConflict`] if `base_revision` is not the
    /// current head (the command executor is responsible for retrying
    /// with `NormalizingPush` semantics, §5), and with
    /// [`CoreError::RedundantChange`] if every change in `changes`
    /// turns out to be a no-op once normalized against current content.
    pub async fn commit(
        &self,
        base_revision: i32,
        changes: Vec<Change>,
        author: Author,
        detail: CommitDetail,
        now: DateTime<Utc>,
    ) -> CoreResult<CommitOutcome> {
        self.check_open()?;
        let mut guard = self.inner.lock().await;
        let head = guard.commits.len() as i32;
        if base_revision != head {
            return Err(CoreError::ChangeConflict(format!(
                "base revision {base_revision} is not head ({head})"
            )));
        }

        let mut candidate = guard.head_tree.clone();
        let mut applied_changes = Vec::with_capacity(changes.len());
        let mut changed_paths = Vec::with_capacity(changes.len());
        for change in changes {
            if candidate.apply_change(&change)? {
                changed_paths.push(change.path.clone());
                // A rename touches its destination path too; a watcher on
                // the new path must wake just as one on the old path does
                // (spec.md §4.4).
                if let ChangeContent::Rename(to) = &change.content {
                    changed_paths.push(to.clone());
                }
                applied_changes.push(change);
            }
        }
        if applied_changes.is_empty() {
            return Err(CoreError::RedundantChange);
        }

        let revision = head + 1;
        let record = Commit {
            revision,
            author,
            timestamp: now,
            detail,
            changes: applied_changes,
        };

        // Persist before mutating in-memory state: if this fails, the
        // repository must look as if the commit never happened, and a
        // `StorageFault` here is fatal per spec.md §7. The append runs on
        // the repository worker pool so it never stalls the caller's
        // async task (spec.md §5: all C1 storage-touching operations are
        // dispatched to this pool).
        if let Some(store) = self.store.clone() {
            let to_persist = record.clone();
            let persisted = self.workers.spawn(move || store.append_blocking(&to_persist)).await;
            if let Err(e) = persisted {
                self.close();
                return Err(e);
            }
        }

        guard.head_tree = candidate;
        guard.commits.push(record);
        info!(project = %self.project, repo = %self.name, revision, "committed");

        if revision % SNAPSHOT_INTERVAL_REVISIONS == 0 {
            if let Some(store) = self.store.as_ref() {
                if let Err(e) = store.write_snapshot(revision, &guard.head_tree).await {
                    warn!(project = %self.project, repo = %self.name, revision, error = %e, "failed to write periodic snapshot");
                }
            }
        }

        Ok(CommitOutcome {
            push_result: PushResult { revision, timestamp: now },
            changed_paths,
        })
    }
}
