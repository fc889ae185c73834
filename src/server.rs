//! Top-level wiring: constructs every component, bootstraps the
//! reserved project, and drives the start -> serve -> stop lifecycle
//! (spec.md §5, SPEC_FULL.md §B "Server status persistence").

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::change::Change;
use crate::command::CommandExecutor;
use crate::commit::{Author, CommitDetail};
use crate::config::Config;
use crate::errors::CoreResult;
use crate::facade::QueryWatchFacade;
use crate::project::{ProjectManager, RESERVED_PROJECT};
use crate::purge::PurgeScheduler;
use crate::quota::QuotaGate;
use crate::registry::RepositoryRegistry;
use crate::replication::{InMemoryReplicationLog, ReplicationLog, StandaloneReplication};
use crate::watch::CommitWatchers;
use crate::worker::RepositoryWorkerPool;

const STATUS_FILE_NAME: &str = "_server_status.json";

/// The reserved repository that holds every project/repository's own
/// metadata as ordinary JSON files, so it is queryable and watchable
/// through the same surface as user content (SPEC_FULL.md §B).
pub const META_REPOSITORY: &str = "meta";
/// The reserved repository that records this server's own replica
/// identity and replication log checkpoints.
pub const DOGMA_REPOSITORY: &str = "dogma";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusFile {
    status: ServerStatus,
    replica_id: Option<String>,
    updated_at: chrono::DateTime<Utc>,
}

/// Every long-lived component a running server needs, assembled once
/// at startup and shared behind `Arc`s.
pub struct Engine {
    pub config: Config,
    pub projects: Arc<ProjectManager>,
    pub repositories: Arc<RepositoryRegistry>,
    pub watchers: Arc<CommitWatchers>,
    pub quota: Arc<QuotaGate>,
    pub replication_log: Arc<dyn ReplicationLog>,
    pub executor: Arc<CommandExecutor>,
    pub facade: QueryWatchFacade,
    pub workers: RepositoryWorkerPool,
    purge_scheduler: Arc<PurgeScheduler>,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    /// Build every component and provision the reserved project, but do
    /// not yet spawn background tasks (call [`Self::serve`] for that).
    pub async fn start(config: Config) -> CoreResult<Arc<Self>> {
        let now = Utc::now();
        write_status_file(&config.data_dir, ServerStatus::Starting, config.replication.server_id.clone()).await;

        let projects = Arc::new(ProjectManager::new());
        projects.bootstrap_reserved(now);

        let cache_capacity = parse_cache_capacity(&config.repository_cache_spec.maximum_weight);
        let workers = RepositoryWorkerPool::new(config.num_repository_workers);
        let repositories = Arc::new(RepositoryRegistry::with_data_dir_and_workers(
            cache_capacity,
            config.data_dir.clone(),
            workers.clone(),
        ));
        discover_existing_state(&config.data_dir, &projects, &repositories, now).await;

        if !repositories.exists(RESERVED_PROJECT, META_REPOSITORY) {
            let handle = repositories.create(RESERVED_PROJECT, META_REPOSITORY, now).await?;
            handle
                .commit(
                    1,
                    crate::command::meta_repository_seed_files(),
                    Author::system(),
                    CommitDetail::summary_only("Initialize meta repository"),
                    now,
                )
                .await
                .ok();
        }
        if !repositories.exists(RESERVED_PROJECT, DOGMA_REPOSITORY) {
            let handle = repositories.create(RESERVED_PROJECT, DOGMA_REPOSITORY, now).await?;
            handle
                .commit(
                    1,
                    vec![Change::upsert_json(
                        "/bootstrap.json",
                        serde_json::json!({ "createdAt": now }),
                    )],
                    Author::system(),
                    CommitDetail::summary_only("Bootstrap reserved repository"),
                    now,
                )
                .await
                .ok();
        }

        let watchers = Arc::new(CommitWatchers::new());
        let quota = Arc::new(QuotaGate::new(config.write_quota_per_repository));
        let replication_log: Arc<dyn ReplicationLog> = Arc::new(InMemoryReplicationLog::new());
        let executor = Arc::new(CommandExecutor::new(
            projects.clone(),
            repositories.clone(),
            watchers.clone(),
            quota.clone(),
            replication_log.clone(),
            config.replication.timeout,
        ));
        let facade = QueryWatchFacade::new(repositories.clone(), watchers.clone());

        let leadership = Arc::new(StandaloneReplication);
        let purge_scheduler = Arc::new(PurgeScheduler::new(
            projects.clone(),
            repositories.clone(),
            watchers.clone(),
            leadership,
            config.max_removed_repository_age.as_secs() as i64,
            std::time::Duration::from_secs(60),
        ));

        let (shutdown_tx, _) = watch::channel(false);

        write_status_file(&config.data_dir, ServerStatus::Running, config.replication.server_id.clone()).await;
        info!(data_dir = %config.data_dir.display(), "server started");

        Ok(Arc::new(Engine {
            config,
            projects,
            repositories,
            watchers,
            quota,
            replication_log,
            executor,
            facade,
            workers,
            purge_scheduler,
            shutdown_tx,
        }))
    }

    /// Spawn background tasks (currently just the purge scheduler) and
    /// block until [`Self::stop`] is called.
    pub async fn serve(self: &Arc<Self>) {
        let scheduler = self.purge_scheduler.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(scheduler.run(shutdown_rx));
        let _ = handle.await;
    }

    /// Begin graceful shutdown: stop accepting new leadership duties,
    /// wait out the configured quiet period, then mark the server
    /// stopped (spec.md §6 `gracefulShutdownTimeout`).
    pub async fn stop(&self) {
        write_status_file(&self.config.data_dir, ServerStatus::Stopping, self.config.replication.server_id.clone()).await;
        self.executor.set_writable(false);
        tokio::time::sleep(self.config.graceful_shutdown_timeout.quiet_period).await;
        let _ = self.shutdown_tx.send(true);
        write_status_file(&self.config.data_dir, ServerStatus::Stopped, self.config.replication.server_id.clone()).await;
        info!("server stopped");
    }
}

/// Rediscover every `<project>/<repo>` directory already on disk under
/// `data_dir` and reattach it via `projects`/`registry`, so a restart
/// does not strand any repository outside the two reserved ones
/// (spec.md §6 "Persisted state layout", "used on restart"). Best
/// effort: a directory that fails to read or reopen is skipped with a
/// warning rather than failing startup.
async fn discover_existing_state(
    data_dir: &PathBuf,
    projects: &ProjectManager,
    registry: &RepositoryRegistry,
    now: chrono::DateTime<Utc>,
) {
    let Ok(mut project_dirs) = tokio::fs::read_dir(data_dir).await else {
        return;
    };
    while let Ok(Some(project_entry)) = project_dirs.next_entry().await {
        if !matches!(project_entry.file_type().await, Ok(t) if t.is_dir()) {
            continue;
        }
        let Ok(project_name) = project_entry.file_name().into_string() else {
            continue;
        };
        if crate::project::validate_name(&project_name).is_err() {
            continue;
        }
        if project_name != RESERVED_PROJECT && !projects.exists(&project_name) {
            projects.create(&project_name, now).ok();
        }

        let Ok(mut repo_dirs) = tokio::fs::read_dir(project_entry.path()).await else {
            continue;
        };
        while let Ok(Some(repo_entry)) = repo_dirs.next_entry().await {
            if !matches!(repo_entry.file_type().await, Ok(t) if t.is_dir()) {
                continue;
            }
            let Ok(repo_name) = repo_entry.file_name().into_string() else {
                continue;
            };
            if let Err(e) = registry.reopen(&project_name, &repo_name, now).await {
                warn!(project = %project_name, repo = %repo_name, error = %e, "failed to reopen repository on startup");
            }
        }
    }
}

/// Write `_server_status.json` via write-temp-then-rename, the same
/// pattern `repository::store::CommitLogStore::write_snapshot` uses, so
/// a crash mid-write leaves the previous status file (or none) intact
/// rather than a truncated one.
async fn write_status_file(data_dir: &PathBuf, status: ServerStatus, replica_id: Option<String>) {
    let Ok(()) = tokio::fs::create_dir_all(data_dir).await else {
        return;
    };
    let file = StatusFile {
        status,
        replica_id,
        updated_at: Utc::now(),
    };
    let Ok(json) = serde_json::to_vec_pretty(&file) else {
        return;
    };
    let tmp_path = data_dir.join(format!("{STATUS_FILE_NAME}.tmp"));
    if tokio::fs::write(&tmp_path, &json).await.is_err() {
        return;
    }
    let _ = tokio::fs::rename(&tmp_path, data_dir.join(STATUS_FILE_NAME)).await;
}

/// Parse a byte-size spec like `"256MiB"` into an entry-count budget for
/// the snapshot cache. The cache stores whole trees rather than raw
/// bytes, so this is a coarse heuristic: one cache slot per 4MiB of
/// configured weight, floored at 8 slots.
fn parse_cache_capacity(spec: &str) -> usize {
    let bytes = parse_byte_size(spec).unwrap_or(256 * 1024 * 1024);
    (bytes / (4 * 1024 * 1024)).max(8) as u64 as usize
}

fn parse_byte_size(spec: &str) -> Option<u64> {
    let spec = spec.trim();
    let (digits, suffix) = spec.split_at(spec.find(|c: char| !c.is_ascii_digit()).unwrap_or(spec.len()));
    let value: u64 = digits.parse().ok()?;
    let multiplier = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KIB" => 1024,
        "M" | "MIB" => 1024 * 1024,
        "G" | "GIB" => 1024 * 1024 * 1024,
        _ => return None,
    };
    Some(value * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_parsing_handles_common_suffixes() {
        assert_eq!(parse_byte_size("256MiB"), Some(256 * 1024 * 1024));
        assert_eq!(parse_byte_size("1GiB"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_byte_size("1048576"), Some(1_048_576));
        assert_eq!(parse_byte_size("nonsense"), None);
    }

    #[tokio::test]
    async fn restart_rediscovers_non_reserved_projects_and_repositories() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::start(Config::new(dir.path())).await.unwrap();
        engine.repositories.create("custom", "main", Utc::now()).await.unwrap();
        drop(engine);

        let restarted = Engine::start(Config::new(dir.path())).await.unwrap();
        assert!(restarted.projects.exists("custom"));
        assert!(restarted.repositories.exists("custom", "main"));
    }

    #[tokio::test]
    async fn start_bootstraps_reserved_project_and_repositories() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        let engine = Engine::start(config).await.unwrap();
        assert!(engine.projects.get(RESERVED_PROJECT).is_ok());
        assert!(engine.repositories.exists(RESERVED_PROJECT, META_REPOSITORY));
        assert!(engine.repositories.exists(RESERVED_PROJECT, DOGMA_REPOSITORY));
        assert!(dir.path().join(STATUS_FILE_NAME).exists());
    }
}
