//! C4 Query/Watch Facade: the read-side surface callers actually use —
//! `getFile`, `watchFile`, `watchRepository` (spec.md §4.3, §4.4).

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::entry::Entry;
use crate::errors::CoreResult;
use crate::path::PathPattern;
use crate::query::{self, Query, QueryResult};
use crate::registry::RepositoryRegistry;
use crate::revision::Revision;
use crate::watch::CommitWatchers;

pub struct QueryWatchFacade {
    registry: Arc<RepositoryRegistry>,
    watchers: Arc<CommitWatchers>,
}

/// What a successful watch reports: the revision the matching commit
/// landed at, and (for [`QueryWatchFacade::watch_file`]) the file's new
/// queried content.
pub struct WatchResult {
    pub revision: i32,
    pub content: Option<QueryResult>,
}

impl QueryWatchFacade {
    pub fn new(registry: Arc<RepositoryRegistry>, watchers: Arc<CommitWatchers>) -> Self {
        QueryWatchFacade { registry, watchers }
    }

    /// Fetch and project a single file at `revision`.
    pub async fn get_file(&self, project: &str, repo: &str, query: &Query, revision: Revision) -> CoreResult<Option<QueryResult>> {
        let repository = self.registry.get(project, repo)?;
        let entry = repository.get_entry(revision, &query.path).await?;
        match entry {
            Some(entry) => query::execute(&query.query_type, &entry.content).map(Some),
            None => Ok(None),
        }
    }

    /// `getFiles`: full entries (path, type, and content) matching `pattern`.
    pub async fn get_files(&self, project: &str, repo: &str, revision: Revision, pattern: &PathPattern) -> CoreResult<Vec<Entry>> {
        let repository = self.registry.get(project, repo)?;
        repository.find(revision, pattern).await
    }

    /// `listFiles`: path and type only, no content — cheaper than
    /// [`Self::get_files`] for callers enumerating a tree's shape
    /// (spec.md SPEC_FULL.md §B).
    pub async fn list_files(&self, project: &str, repo: &str, revision: Revision, pattern: &PathPattern) -> CoreResult<Vec<crate::entry::EntryMetadata>> {
        let repository = self.registry.get(project, repo)?;
        repository.find_metadata(revision, pattern).await
    }

    /// Block until `query.path`'s queried content changes from what it
    /// was at `last_known_revision`, or `timeout` elapses. A commit that
    /// only bumps the revision without changing this file's queried
    /// result (e.g. it touched a different file, or a JSON upsert
    /// re-serialized to the same canonical value) does not wake the
    /// caller — the facade re-subscribes and keeps waiting instead.
    pub async fn watch_file(
        &self,
        project: &str,
        repo: &str,
        query: &Query,
        last_known_revision: Revision,
        timeout: Duration,
        error_on_entry_not_found: bool,
    ) -> CoreResult<Option<WatchResult>> {
        let repository = match (self.registry.get(project, repo), error_on_entry_not_found) {
            (Ok(repository), _) => repository,
            (Err(_), false) => return Ok(None),
            (Err(e), true) => return Err(e),
        };
        let deadline = Instant::now() + timeout;

        let mut baseline_revision = last_known_revision;
        let baseline = self.get_file(project, repo, query, baseline_revision).await?;

        loop {
            let head = repository.head_revision().await;
            let baseline_abs = repository.normalize(baseline_revision, head)?;
            if head > baseline_abs.get() {
                let current = self.get_file(project, repo, query, Revision::HEAD).await?;
                if !query_results_equal(&baseline, &current) {
                    return Ok(Some(WatchResult {
                        revision: head,
                        content: current,
                    }));
                }
                baseline_revision = Revision::new(head);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let subscription = self.watchers.subscribe(project, repo, PathPattern::parse(&query.path));
            match tokio::time::timeout(remaining, subscription.receiver).await {
                Ok(Ok(_revision)) => continue,
                Ok(Err(_)) => return Ok(None),
                Err(_) => {
                    self.watchers.cancel(project, repo, subscription.id);
                    return Ok(None);
                }
            }
        }
    }

    /// Block until a commit touches a path matching `pattern`, or
    /// `timeout` elapses.
    pub async fn watch_repository(
        &self,
        project: &str,
        repo: &str,
        pattern: &PathPattern,
        last_known_revision: Revision,
        timeout: Duration,
        error_on_entry_not_found: bool,
    ) -> CoreResult<Option<i32>> {
        let repository = match (self.registry.get(project, repo), error_on_entry_not_found) {
            (Ok(repository), _) => repository,
            (Err(_), false) => return Ok(None),
            (Err(e), true) => return Err(e),
        };
        let head = repository.head_revision().await;
        let last_abs = repository.normalize(last_known_revision, head)?;
        if head > last_abs.get() {
            let touched = repository
                .history(Revision::new(last_abs.get() + 1), Revision::new(head), pattern)
                .await?;
            if !touched.is_empty() {
                return Ok(Some(head));
            }
        }

        let subscription = self.watchers.subscribe(project, repo, pattern.clone());
        match tokio::time::timeout(timeout, subscription.receiver).await {
            Ok(Ok(revision)) => Ok(Some(revision)),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                self.watchers.cancel(project, repo, subscription.id);
                Ok(None)
            }
        }
    }
}

fn query_results_equal(a: &Option<QueryResult>, b: &Option<QueryResult>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(QueryResult::Json(x)), Some(QueryResult::Json(y))) => {
            crate::checksum::json_structurally_equal(x, y)
        }
        (Some(QueryResult::Text(x)), Some(QueryResult::Text(y))) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;
    use crate::commit::{Author, CommitDetail};
    use serde_json::json;
    use std::time::Duration as StdDuration;

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::UNIX_EPOCH
    }

    async fn make_repo() -> (Arc<RepositoryRegistry>, Arc<CommitWatchers>, QueryWatchFacade) {
        let registry = Arc::new(RepositoryRegistry::new(16));
        registry.create("p", "r", now()).await.unwrap();
        let watchers = Arc::new(CommitWatchers::new());
        let facade = QueryWatchFacade::new(registry.clone(), watchers.clone());
        (registry, watchers, facade)
    }

    #[tokio::test]
    async fn list_files_omits_content_get_files_includes_it() {
        let (registry, _watchers, facade) = make_repo().await;
        let repo = registry.get("p", "r").unwrap();
        repo.commit(
            1,
            vec![Change::upsert_json("/a.json", json!({"v": 1}))],
            Author::new("a", "a@x.com"),
            CommitDetail::summary_only("seed"),
            now(),
        )
        .await
        .unwrap();

        let metas = facade.list_files("p", "r", Revision::HEAD, &PathPattern::parse("/a.json")).await.unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].path, "/a.json");

        let full = facade.get_files("p", "r", Revision::HEAD, &PathPattern::parse("/a.json")).await.unwrap();
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].content, crate::entry::EntryContent::json(json!({"v": 1})));
    }

    #[tokio::test]
    async fn watch_file_wakes_on_matching_commit() {
        let (registry, watchers, facade) = make_repo().await;
        let repo = registry.get("p", "r").unwrap();

        let facade_task = tokio::spawn(async move {
            facade
                .watch_file(
                    "p",
                    "r",
                    &Query::identity("/a.json"),
                    Revision::HEAD,
                    StdDuration::from_secs(5),
                    false,
                )
                .await
                .unwrap()
        });

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        let outcome = repo
            .commit(
                1,
                vec![Change::upsert_json("/a.json", json!({"v": 1}))],
                Author::new("a", "a@x.com"),
                CommitDetail::summary_only("update"),
                now(),
            )
            .await
            .unwrap();
        watchers.notify("p", "r", &outcome.changed_paths, outcome.push_result.revision);

        let result = facade_task.await.unwrap();
        assert!(result.is_some());
        assert_eq!(result.unwrap().revision, 2);
    }

    #[tokio::test]
    async fn watch_file_times_out_without_a_matching_commit() {
        let (_, _, facade) = make_repo().await;
        let result = facade
            .watch_file(
                "p",
                "r",
                &Query::identity("/a.json"),
                Revision::HEAD,
                StdDuration::from_millis(30),
                false,
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn watch_file_on_missing_repository_honors_error_on_entry_not_found() {
        let (_, _, facade) = make_repo().await;

        let sentinel = facade
            .watch_file(
                "p",
                "missing",
                &Query::identity("/a.json"),
                Revision::HEAD,
                StdDuration::from_millis(10),
                false,
            )
            .await
            .unwrap();
        assert!(sentinel.is_none());

        let err = facade
            .watch_file(
                "p",
                "missing",
                &Query::identity("/a.json"),
                Revision::HEAD,
                StdDuration::from_millis(10),
                true,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, crate::errors::CoreError::RepositoryNotFound { .. }));
    }
}
