//! End-to-end scenarios exercising the public surface together:
//! registry, command executor, facade, and watchers wired the way
//! `server::Engine` wires them (spec.md §8).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dogma_core::change::Change;
use dogma_core::command::{CommandExecutor, PushCommand, PushKind};
use dogma_core::commit::{Author, CommitDetail};
use dogma_core::facade::QueryWatchFacade;
use dogma_core::path::PathPattern;
use dogma_core::project::ProjectManager;
use dogma_core::query::{Query, QueryResult};
use dogma_core::quota::QuotaGate;
use dogma_core::registry::RepositoryRegistry;
use dogma_core::replication::InMemoryReplicationLog;
use dogma_core::revision::Revision;
use dogma_core::watch::CommitWatchers;
use serde_json::json;

struct Harness {
    registry: Arc<RepositoryRegistry>,
    executor: CommandExecutor,
    facade: QueryWatchFacade,
}

async fn harness() -> Harness {
    let registry = Arc::new(RepositoryRegistry::new(16));
    registry.create("demo", "main", Utc::now()).await.unwrap();
    let projects = Arc::new(ProjectManager::new());
    let watchers = Arc::new(CommitWatchers::new());
    let quota = Arc::new(QuotaGate::new(None));
    let log = Arc::new(InMemoryReplicationLog::new());
    let executor = CommandExecutor::new(projects, registry.clone(), watchers.clone(), quota, log, Duration::from_secs(10));
    let facade = QueryWatchFacade::new(registry.clone(), watchers);
    Harness { registry, executor, facade }
}

async fn push(executor: &CommandExecutor, path: &str, value: serde_json::Value, summary: &str) -> i32 {
    executor
        .push(
            PushCommand {
                project: "demo".to_string(),
                repo: "main".to_string(),
                base_revision: Revision::HEAD,
                changes: vec![Change::upsert_json(path, value)],
                author: Author::new("tester", "tester@example.com"),
                detail: CommitDetail::summary_only(summary),
                kind: PushKind::NormalizingPush,
            },
            Utc::now(),
        )
        .await
        .unwrap()
        .revision
}

#[tokio::test]
async fn basic_push_and_get_round_trips_content() {
    let h = harness().await;
    let revision = push(&h.executor, "/x.json", json!({"a": 1}), "create x").await;
    assert_eq!(revision, 2);

    let result = h
        .facade
        .get_file("demo", "main", &Query::identity("/x.json"), Revision::HEAD)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, QueryResult::Json(json!({"a": 1})));
}

#[tokio::test]
async fn diff_between_revisions_reports_net_change() {
    let h = harness().await;
    push(&h.executor, "/x.json", json!({"a": 1}), "create x").await;
    push(&h.executor, "/x.json", json!({"a": 2}), "bump x").await;

    let repo = h.registry.get("demo", "main").unwrap();
    let changes = repo
        .diff(
            Revision::new(2),
            Revision::new(3),
            &PathPattern::match_all(),
            dogma_core::tree::DiffMode::Upsert,
        )
        .await
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].path, "/x.json");
}

#[tokio::test]
async fn watch_wakes_only_on_matching_path() {
    let h = harness().await;
    push(&h.executor, "/other.json", json!({"a": 1}), "unrelated").await;

    let facade = h.facade;
    let watch_task = tokio::spawn(async move {
        facade
            .watch_file("demo", "main", &Query::identity("/target.json"), Revision::HEAD, Duration::from_secs(5), false)
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    // An unrelated commit, through the same executor/watchers, must not wake the watcher.
    push(&h.executor, "/also-unrelated.json", json!({"a": 1}), "still unrelated").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!watch_task.is_finished());
    watch_task.abort();
}

#[tokio::test]
async fn watch_times_out_when_nothing_matches() {
    let h = harness().await;
    let result = h
        .facade
        .watch_file("demo", "main", &Query::identity("/never.json"), Revision::HEAD, Duration::from_millis(50), false)
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn rename_with_content_change_lands_at_new_path() {
    let h = harness().await;
    push(&h.executor, "/a.json", json!({"v": 1}), "create a").await;

    h.executor
        .push(
            PushCommand {
                project: "demo".to_string(),
                repo: "main".to_string(),
                base_revision: Revision::HEAD,
                changes: vec![
                    Change::rename("/a.json", "/b.json"),
                    Change::upsert_json("/b.json", json!({"v": 2})),
                ],
                author: Author::new("tester", "tester@example.com"),
                detail: CommitDetail::summary_only("rename and bump"),
                kind: PushKind::NormalizingPush,
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let old = h
        .facade
        .get_file("demo", "main", &Query::identity("/a.json"), Revision::HEAD)
        .await
        .unwrap();
    assert!(old.is_none());

    let renamed = h
        .facade
        .get_file("demo", "main", &Query::identity("/b.json"), Revision::HEAD)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renamed, QueryResult::Json(json!({"v": 2})));
}

#[tokio::test]
async fn redundant_commit_is_rejected_across_differently_ordered_keys() {
    let h = harness().await;
    push(&h.executor, "/x.json", json!({"foo": 0, "bar": 1}), "create x").await;

    let err = h
        .executor
        .push(
            PushCommand {
                project: "demo".to_string(),
                repo: "main".to_string(),
                base_revision: Revision::HEAD,
                changes: vec![Change::upsert_json("/x.json", json!({"bar": 1, "foo": 0}))],
                author: Author::new("tester", "tester@example.com"),
                detail: CommitDetail::summary_only("no-op reorder"),
                kind: PushKind::NormalizingPush,
            },
            Utc::now(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, dogma_core::errors::CoreError::RedundantChange));
}
