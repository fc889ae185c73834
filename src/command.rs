//! C5 Command Executor: the single entry point every mutation goes
//! through, serialized per-repository and gated by writability and
//! quota (spec.md §4.5, §5).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_stream::StreamExt;
use tracing::{info, instrument, warn};

use crate::change::Change;
use crate::commit::{Author, CommitDetail, PushResult};
use crate::config::WriteQuotaConfig;
use crate::errors::{CoreError, CoreResult};
use crate::project::ProjectManager;
use crate::quota::QuotaGate;
use crate::registry::RepositoryRegistry;
use crate::replication::{replay_stream, LogEntry, ReplicatedCommand, ReplicationLog};
use crate::revision::Revision;
use crate::watch::CommitWatchers;

/// How a push resolves its base revision against a possibly-moved head
/// (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    /// Always commit atop the current head, retrying automatically if
    /// another command lands first. Used by callers who only care that
    /// their changes apply, not which revision they land on.
    NormalizingPush,
    /// Commit only if `base_revision` is exactly the current head;
    /// fail with `ChangeConflict` otherwise. Used by callers that
    /// already resolved a conflict and must not silently rebase again.
    PushAsIs,
}

pub struct PushCommand {
    pub project: String,
    pub repo: String,
    pub base_revision: Revision,
    pub changes: Vec<Change>,
    pub author: Author,
    pub detail: CommitDetail,
    pub kind: PushKind,
}

/// The opaque payload `CreateSession`/`RemoveSession` carry. The core
/// does not interpret it — it only serializes these commands into the
/// replication log so every replica observes the same session
/// lifecycle in the same order; the actual session store is an
/// external collaborator (SPEC_FULL.md §B).
#[derive(Debug, Clone)]
pub struct SessionPayload {
    pub session_id: String,
    pub user: String,
    pub expires_at: DateTime<Utc>,
}

/// Every mutating command the executor accepts (spec.md §4.5 "Command
/// taxonomy"). `Push` carries what was previously the executor's sole
/// entry point; the rest round out project/repository lifecycle,
/// session forwarding, and quota administration.
pub enum Command {
    CreateProject { name: String, author: Author },
    RemoveProject { name: String, author: Author },
    UnremoveProject { name: String, author: Author },
    PurgeProject { name: String },
    CreateRepository { project: String, repo: String, author: Author },
    RemoveRepository { project: String, repo: String, author: Author },
    UnremoveRepository { project: String, repo: String, author: Author },
    PurgeRepository { project: String, repo: String },
    Push(PushCommand),
    CreateSession(SessionPayload),
    RemoveSession { session_id: String },
    SetWriteQuota { project: String, repo: String, quota: Option<WriteQuotaConfig> },
}

/// What applying a [`Command`] produces (spec.md §4.5 "Outputs").
#[derive(Debug, Clone)]
pub enum CommandOutput {
    Void,
    Revision(i32),
    Push(PushResult),
}

const MAX_NORMALIZING_RETRIES: u32 = 16;

/// The well-known, empty-shaped files every `meta` repository starts
/// with (spec.md SPEC_FULL.md §B): credential descriptors, mirror
/// configuration, and the role-to-access-level permission map. The core
/// only stores and validates their shape; interpreting them is an
/// external collaborator's job.
pub(crate) fn meta_repository_seed_files() -> Vec<Change> {
    vec![
        Change::upsert_json("/credentials.json", serde_json::json!([])),
        Change::upsert_json("/mirrors.json", serde_json::json!([])),
        Change::upsert_json("/permissions.json", serde_json::json!({})),
    ]
}

fn command_kind(command: &Command) -> &'static str {
    match command {
        Command::CreateProject { .. } => "CreateProject",
        Command::RemoveProject { .. } => "RemoveProject",
        Command::UnremoveProject { .. } => "UnremoveProject",
        Command::PurgeProject { .. } => "PurgeProject",
        Command::CreateRepository { .. } => "CreateRepository",
        Command::RemoveRepository { .. } => "RemoveRepository",
        Command::UnremoveRepository { .. } => "UnremoveRepository",
        Command::PurgeRepository { .. } => "PurgeRepository",
        Command::Push(_) => "Push",
        Command::CreateSession(_) => "CreateSession",
        Command::RemoveSession { .. } => "RemoveSession",
        Command::SetWriteQuota { .. } => "SetWriteQuota",
    }
}

/// Serializes every mutating command. Per-repository ordering comes
/// from `Repository`'s own internal lock (spec.md §C1); this layer adds
/// the cross-cutting concerns that apply before a command reaches it:
/// writability, quota, and a bounded wait for the lock.
pub struct CommandExecutor {
    projects: Arc<ProjectManager>,
    registry: Arc<RepositoryRegistry>,
    watchers: Arc<CommitWatchers>,
    quota: Arc<QuotaGate>,
    replication_log: Arc<dyn ReplicationLog>,
    log_index: AtomicU64,
    lock_timeout: Duration,
    writable: AtomicBool,
}

impl CommandExecutor {
    pub fn new(
        projects: Arc<ProjectManager>,
        registry: Arc<RepositoryRegistry>,
        watchers: Arc<CommitWatchers>,
        quota: Arc<QuotaGate>,
        replication_log: Arc<dyn ReplicationLog>,
        lock_timeout: Duration,
    ) -> Self {
        CommandExecutor {
            projects,
            registry,
            watchers,
            quota,
            replication_log,
            log_index: AtomicU64::new(0),
            lock_timeout,
            writable: AtomicBool::new(true),
        }
    }

    /// Record one accepted command into the replication log (spec.md
    /// §4.6). `CreateSession`/`RemoveSession` are the only commands that
    /// append with an empty `(project, repo)` — they do not target a
    /// repository, so every replica still sees them in the same order
    /// without acquiring any repository lock. `command` carries what was
    /// actually applied, so [`Self::apply_replicated`] can reconstruct
    /// and replay this exact entry on a follower.
    fn record(&self, project: &str, repo: &str, revision: i32, now: DateTime<Utc>, command: ReplicatedCommand) {
        let index = self.log_index.fetch_add(1, Ordering::SeqCst) + 1;
        self.replication_log.append(LogEntry {
            index,
            project: project.to_string(),
            repo: repo.to_string(),
            revision,
            recorded_at: now,
            command,
        });
    }

    /// Apply one previously-replicated [`LogEntry`] on a follower,
    /// reconstructing the command from its `ReplicatedCommand` payload
    /// and running it against local storage without re-appending it to
    /// the replication log (it is already in the log this entry came
    /// from). Used by [`Self::catch_up`].
    async fn apply_replicated(&self, entry: &LogEntry) -> CoreResult<CommandOutput> {
        let now = entry.recorded_at;
        match &entry.command {
            ReplicatedCommand::Push { changes, author, detail } => {
                let repository = self.registry.get(&entry.project, &entry.repo)?;
                let base_revision = entry.revision - 1;
                let outcome = repository
                    .commit(base_revision, changes.clone(), author.clone(), detail.clone(), now)
                    .await?;
                self.watchers.notify(&entry.project, &entry.repo, &outcome.changed_paths, outcome.push_result.revision);
                Ok(CommandOutput::Push(outcome.push_result))
            }
            ReplicatedCommand::CreateProject { author } => {
                self.projects.create(&entry.project, now)?;
                let meta = self.registry.create(&entry.project, crate::server::META_REPOSITORY, now).await?;
                meta.commit(
                    1,
                    meta_repository_seed_files(),
                    author.clone(),
                    CommitDetail::summary_only("Initialize meta repository"),
                    now,
                )
                .await?;
                Ok(CommandOutput::Void)
            }
            ReplicatedCommand::RemoveProject => {
                self.projects.remove(&entry.project, now)?;
                Ok(CommandOutput::Void)
            }
            ReplicatedCommand::UnremoveProject => {
                self.projects.unremove(&entry.project)?;
                Ok(CommandOutput::Void)
            }
            ReplicatedCommand::PurgeProject => {
                self.projects.purge_now(&entry.project)?;
                Ok(CommandOutput::Void)
            }
            ReplicatedCommand::CreateRepository { .. } => {
                self.registry.create(&entry.project, &entry.repo, now).await?;
                Ok(CommandOutput::Void)
            }
            ReplicatedCommand::RemoveRepository => {
                self.registry.remove(&entry.project, &entry.repo, now)?;
                self.watchers.close(&entry.project, &entry.repo);
                Ok(CommandOutput::Void)
            }
            ReplicatedCommand::UnremoveRepository => {
                self.registry.unremove(&entry.project, &entry.repo)?;
                Ok(CommandOutput::Void)
            }
            ReplicatedCommand::PurgeRepository => {
                self.registry.purge_now(&entry.project, &entry.repo)?;
                self.watchers.close(&entry.project, &entry.repo);
                Ok(CommandOutput::Void)
            }
            ReplicatedCommand::CreateSession(payload) => {
                info!(session_id = %payload.session_id, "replaying CreateSession");
                Ok(CommandOutput::Void)
            }
            ReplicatedCommand::RemoveSession { session_id } => {
                info!(session_id = %session_id, "replaying RemoveSession");
                Ok(CommandOutput::Void)
            }
            ReplicatedCommand::SetWriteQuota { quota } => {
                self.quota.set_quota(&entry.project, &entry.repo, quota.clone());
                Ok(CommandOutput::Void)
            }
        }
    }

    /// Drive a follower's catch-up: replay every entry `log` holds past
    /// `from_index` and apply it locally (spec.md §4.6 "Watch(fromIndex)
    /// -> stream of (index, command)"). Returns the index of the last
    /// entry applied (or `from_index` if there were none), so the
    /// caller can checkpoint where to resume from. A single entry that
    /// fails to apply is logged and skipped rather than aborting the
    /// whole catch-up, so one bad entry does not wedge a follower behind
    /// forever.
    pub async fn catch_up(&self, log: &dyn ReplicationLog, from_index: u64) -> u64 {
        let mut stream = Box::pin(replay_stream(log, from_index));
        let mut last_index = from_index;
        while let Some(entry) = stream.next().await {
            last_index = entry.index;
            if let Err(e) = self.apply_replicated(&entry).await {
                warn!(index = entry.index, project = %entry.project, repo = %entry.repo, error = %e, "failed to apply replicated log entry");
            }
        }
        last_index
    }

    /// Apply any non-`Push` command: project/repository lifecycle,
    /// session forwarding, and quota administration. `Push`/`PushAsIs`
    /// keep going through [`Self::push`], which already implements the
    /// retry-on-conflict and repository-lock timeout machinery this
    /// method delegates to for that one variant.
    #[instrument(skip(self, command), fields(kind = command_kind(&command)))]
    pub async fn apply(&self, command: Command, now: DateTime<Utc>) -> CoreResult<CommandOutput> {
        if !self.is_writable() {
            return Err(CoreError::NotLeader);
        }
        match command {
            Command::Push(cmd) => {
                let project = cmd.project.clone();
                let repo = cmd.repo.clone();
                let changes = cmd.changes.clone();
                let author = cmd.author.clone();
                let detail = cmd.detail.clone();
                let result = self.push(cmd, now).await?;
                self.record(&project, &repo, result.revision, now, ReplicatedCommand::Push { changes, author, detail });
                Ok(CommandOutput::Push(result))
            }
            Command::CreateProject { name, author } => {
                self.projects.create(&name, now)?;
                // Every project carries its own `meta` repository from
                // birth (spec.md §3, SPEC_FULL.md §B) so credentials,
                // mirror configs, and permissions always have somewhere
                // to live without a separate provisioning step.
                let meta = self.registry.create(&name, crate::server::META_REPOSITORY, now).await?;
                meta.commit(
                    1,
                    meta_repository_seed_files(),
                    author.clone(),
                    CommitDetail::summary_only("Initialize meta repository"),
                    now,
                )
                .await?;
                self.record(&name, "", 0, now, ReplicatedCommand::CreateProject { author });
                Ok(CommandOutput::Void)
            }
            Command::RemoveProject { name, .. } => {
                self.projects.remove(&name, now)?;
                self.record(&name, "", 0, now, ReplicatedCommand::RemoveProject);
                Ok(CommandOutput::Void)
            }
            Command::UnremoveProject { name, .. } => {
                self.projects.unremove(&name)?;
                self.record(&name, "", 0, now, ReplicatedCommand::UnremoveProject);
                Ok(CommandOutput::Void)
            }
            Command::PurgeProject { name } => {
                // spec.md §3: "a project with live repositories cannot be
                // purged" — including the project's own `meta` repository,
                // which must be removed (and typically purged) first like
                // any other.
                if !self.registry.list_for_project(&name).is_empty() {
                    return Err(CoreError::ChangeConflict(format!(
                        "project {name} still has live repositories"
                    )));
                }
                self.projects.purge_now(&name)?;
                self.record(&name, "", 0, now, ReplicatedCommand::PurgeProject);
                Ok(CommandOutput::Void)
            }
            Command::CreateRepository { project, repo, author } => {
                self.registry.create(&project, &repo, now).await?;
                self.record(&project, &repo, 1, now, ReplicatedCommand::CreateRepository { author });
                Ok(CommandOutput::Void)
            }
            Command::RemoveRepository { project, repo, .. } => {
                self.registry.remove(&project, &repo, now)?;
                self.watchers.close(&project, &repo);
                self.record(&project, &repo, 0, now, ReplicatedCommand::RemoveRepository);
                Ok(CommandOutput::Void)
            }
            Command::UnremoveRepository { project, repo, .. } => {
                self.registry.unremove(&project, &repo)?;
                self.record(&project, &repo, 0, now, ReplicatedCommand::UnremoveRepository);
                Ok(CommandOutput::Void)
            }
            Command::PurgeRepository { project, repo } => {
                self.registry.purge_now(&project, &repo)?;
                self.watchers.close(&project, &repo);
                self.record(&project, &repo, 0, now, ReplicatedCommand::PurgeRepository);
                Ok(CommandOutput::Void)
            }
            Command::CreateSession(payload) => {
                info!(session_id = %payload.session_id, "forwarding CreateSession");
                self.record("", "", 0, now, ReplicatedCommand::CreateSession(payload));
                Ok(CommandOutput::Void)
            }
            Command::RemoveSession { session_id } => {
                info!(session_id = %session_id, "forwarding RemoveSession");
                self.record("", "", 0, now, ReplicatedCommand::RemoveSession { session_id });
                Ok(CommandOutput::Void)
            }
            Command::SetWriteQuota { project, repo, quota } => {
                self.quota.set_quota(&project, &repo, quota.clone());
                self.record(&project, &repo, 0, now, ReplicatedCommand::SetWriteQuota { quota });
                Ok(CommandOutput::Void)
            }
        }
    }

    /// Flip writability, called by the replication layer's leader
    /// election whenever this replica gains or loses leadership
    /// (spec.md §4.6). A non-replicated server (`ReplicationMethod::None`)
    /// is always writable.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::Release);
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    #[instrument(skip(self, cmd), fields(project = %cmd.project, repo = %cmd.repo))]
    pub async fn push(&self, cmd: PushCommand, now: DateTime<Utc>) -> CoreResult<PushResult> {
        if !self.is_writable() {
            return Err(CoreError::NotLeader);
        }
        self.quota.try_acquire(&cmd.project, &cmd.repo)?;
        let repository = self.registry.get(&cmd.project, &cmd.repo)?;

        let mut attempts = 0;
        loop {
            let head = repository.head_revision().await;
            let base_abs = match cmd.kind {
                PushKind::PushAsIs => cmd.base_revision.normalize(head)?,
                PushKind::NormalizingPush => crate::revision::AbsoluteRevision(head),
            };

            let commit_fut = repository.commit(
                base_abs.get(),
                cmd.changes.clone(),
                cmd.author.clone(),
                cmd.detail.clone(),
                now,
            );
            let outcome = match tokio::time::timeout(self.lock_timeout, commit_fut).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(CoreError::CommandTimeout {
                        project: cmd.project.clone(),
                        repo: cmd.repo.clone(),
                    })
                }
            };

            match outcome {
                Ok(outcome) => {
                    self.watchers.notify(
                        &cmd.project,
                        &cmd.repo,
                        &outcome.changed_paths,
                        outcome.push_result.revision,
                    );
                    return Ok(outcome.push_result);
                }
                Err(CoreError::ChangeConflict(_)) if cmd.kind == PushKind::NormalizingPush => {
                    attempts += 1;
                    if attempts >= MAX_NORMALIZING_RETRIES {
                        return Err(CoreError::ChangeConflict(format!(
                            "{}/{} did not stabilize after {attempts} normalizing retries",
                            cmd.project, cmd.repo
                        )));
                    }
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::UNIX_EPOCH
    }

    async fn executor() -> (Arc<RepositoryRegistry>, CommandExecutor) {
        let registry = Arc::new(RepositoryRegistry::new(16));
        registry.create("p", "r", now()).await.unwrap();
        let projects = Arc::new(ProjectManager::new());
        let watchers = Arc::new(CommitWatchers::new());
        let quota = Arc::new(QuotaGate::new(None));
        let log = Arc::new(crate::replication::InMemoryReplicationLog::new());
        let executor = CommandExecutor::new(projects, registry.clone(), watchers, quota, log, Duration::from_secs(10));
        (registry, executor)
    }

    #[tokio::test]
    async fn normalizing_push_always_lands_atop_current_head() {
        let (_, executor) = executor().await;
        let result = executor
            .push(
                PushCommand {
                    project: "p".to_string(),
                    repo: "r".to_string(),
                    base_revision: Revision::new(1),
                    changes: vec![Change::upsert_json("/a.json", json!({"v": 1}))],
                    author: Author::new("a", "a@x.com"),
                    detail: CommitDetail::summary_only("first"),
                    kind: PushKind::NormalizingPush,
                },
                now(),
            )
            .await
            .unwrap();
        assert_eq!(result.revision, 2);
    }

    #[tokio::test]
    async fn push_as_is_rejects_a_stale_base() {
        let (registry, executor) = executor().await;
        let repo = registry.get("p", "r").unwrap();
        repo.commit(
            1,
            vec![Change::upsert_json("/a.json", json!({"v": 1}))],
            Author::new("a", "a@x.com"),
            CommitDetail::summary_only("first"),
            now(),
        )
        .await
        .unwrap();

        let err = executor
            .push(
                PushCommand {
                    project: "p".to_string(),
                    repo: "r".to_string(),
                    base_revision: Revision::new(1),
                    changes: vec![Change::upsert_json("/b.json", json!({"v": 1}))],
                    author: Author::new("a", "a@x.com"),
                    detail: CommitDetail::summary_only("second"),
                    kind: PushKind::PushAsIs,
                },
                now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ChangeConflict(_)));
    }

    #[tokio::test]
    async fn non_writable_replica_refuses_pushes() {
        let (_, executor) = executor().await;
        executor.set_writable(false);
        let err = executor
            .push(
                PushCommand {
                    project: "p".to_string(),
                    repo: "r".to_string(),
                    base_revision: Revision::new(1),
                    changes: vec![Change::upsert_json("/a.json", json!({"v": 1}))],
                    author: Author::new("a", "a@x.com"),
                    detail: CommitDetail::summary_only("first"),
                    kind: PushKind::NormalizingPush,
                },
                now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotLeader));
    }

    async fn full_executor() -> (Arc<ProjectManager>, Arc<RepositoryRegistry>, CommandExecutor) {
        let projects = Arc::new(ProjectManager::new());
        let registry = Arc::new(RepositoryRegistry::new(16));
        let watchers = Arc::new(CommitWatchers::new());
        let quota = Arc::new(QuotaGate::new(None));
        let log = Arc::new(crate::replication::InMemoryReplicationLog::new());
        let executor = CommandExecutor::new(projects.clone(), registry.clone(), watchers, quota, log, Duration::from_secs(10));
        (projects, registry, executor)
    }

    #[tokio::test]
    async fn create_project_then_repository_lifecycle_round_trips() {
        let (projects, registry, executor) = full_executor().await;
        let author = Author::new("a", "a@x.com");

        executor
            .apply(Command::CreateProject { name: "demo".to_string(), author: author.clone() }, now())
            .await
            .unwrap();
        assert!(projects.exists("demo"));

        executor
            .apply(
                Command::CreateRepository { project: "demo".to_string(), repo: "main".to_string(), author: author.clone() },
                now(),
            )
            .await
            .unwrap();
        assert!(registry.exists("demo", "main"));

        executor
            .apply(
                Command::RemoveRepository { project: "demo".to_string(), repo: "main".to_string(), author: author.clone() },
                now(),
            )
            .await
            .unwrap();
        assert!(!registry.exists("demo", "main"));

        executor
            .apply(Command::PurgeRepository { project: "demo".to_string(), repo: "main".to_string() }, now())
            .await
            .unwrap();
        assert!(registry.get("demo", "main").is_err());

        // The project's own `meta` repository (auto-created alongside it)
        // must itself be removed and purged before the project can be,
        // per spec.md §3's "a project with live repositories cannot be
        // purged" invariant.
        let premature = executor
            .apply(Command::PurgeProject { name: "demo".to_string() }, now())
            .await;
        assert!(premature.is_err());

        executor
            .apply(
                Command::RemoveRepository { project: "demo".to_string(), repo: "meta".to_string(), author: author.clone() },
                now(),
            )
            .await
            .unwrap();
        executor
            .apply(Command::PurgeRepository { project: "demo".to_string(), repo: "meta".to_string() }, now())
            .await
            .unwrap();

        executor
            .apply(Command::RemoveProject { name: "demo".to_string(), author: author.clone() }, now())
            .await
            .unwrap();
        assert!(!projects.exists("demo"));

        executor
            .apply(Command::PurgeProject { name: "demo".to_string() }, now())
            .await
            .unwrap();
        assert!(projects.get("demo").is_err());
    }

    #[tokio::test]
    async fn create_project_seeds_its_meta_repository() {
        let (_, registry, executor) = full_executor().await;
        let author = Author::new("a", "a@x.com");

        executor
            .apply(Command::CreateProject { name: "demo".to_string(), author }, now())
            .await
            .unwrap();

        let meta = registry.get("demo", "meta").unwrap();
        for path in ["/credentials.json", "/mirrors.json", "/permissions.json"] {
            assert!(meta.get_entry(Revision::HEAD, path).await.unwrap().is_some(), "missing {path}");
        }
    }

    #[tokio::test]
    async fn set_write_quota_installs_a_per_repository_override() {
        let (_, registry, executor) = full_executor().await;
        registry.create("p", "r", now()).await.unwrap();

        executor
            .apply(
                Command::SetWriteQuota {
                    project: "p".to_string(),
                    repo: "r".to_string(),
                    quota: Some(WriteQuotaConfig { request_quota: 1, time_window_seconds: 3600 }),
                },
                now(),
            )
            .await
            .unwrap();

        executor
            .apply(
                Command::Push(PushCommand {
                    project: "p".to_string(),
                    repo: "r".to_string(),
                    base_revision: Revision::HEAD,
                    changes: vec![Change::upsert_json("/a.json", json!({"v": 1}))],
                    author: Author::new("a", "a@x.com"),
                    detail: CommitDetail::summary_only("first"),
                    kind: PushKind::NormalizingPush,
                }),
                now(),
            )
            .await
            .unwrap();

        let err = executor
            .apply(
                Command::Push(PushCommand {
                    project: "p".to_string(),
                    repo: "r".to_string(),
                    base_revision: Revision::HEAD,
                    changes: vec![Change::upsert_json("/b.json", json!({"v": 1}))],
                    author: Author::new("a", "a@x.com"),
                    detail: CommitDetail::summary_only("second"),
                    kind: PushKind::NormalizingPush,
                }),
                now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::TooManyRequests { .. }));
    }

    #[tokio::test]
    async fn catch_up_replays_a_push_onto_a_follower_registry() {
        use crate::replication::InMemoryReplicationLog;

        let log: Arc<dyn ReplicationLog> = Arc::new(InMemoryReplicationLog::new());

        let leader_registry = Arc::new(RepositoryRegistry::new(16));
        leader_registry.create("p", "r", now()).await.unwrap();
        let leader = CommandExecutor::new(
            Arc::new(ProjectManager::new()),
            leader_registry,
            Arc::new(CommitWatchers::new()),
            Arc::new(QuotaGate::new(None)),
            log.clone(),
            Duration::from_secs(10),
        );
        leader
            .apply(
                Command::Push(PushCommand {
                    project: "p".to_string(),
                    repo: "r".to_string(),
                    base_revision: Revision::HEAD,
                    changes: vec![Change::upsert_json("/a.json", json!({"v": 1}))],
                    author: Author::new("a", "a@x.com"),
                    detail: CommitDetail::summary_only("first"),
                    kind: PushKind::NormalizingPush,
                }),
                now(),
            )
            .await
            .unwrap();

        // A follower that already has the repository (e.g. from an
        // earlier replicated `CreateRepository`) replays the log and
        // ends up with the same content, without ever receiving a
        // direct `Push` of its own.
        let follower_registry = Arc::new(RepositoryRegistry::new(16));
        follower_registry.create("p", "r", now()).await.unwrap();
        let follower = CommandExecutor::new(
            Arc::new(ProjectManager::new()),
            follower_registry.clone(),
            Arc::new(CommitWatchers::new()),
            Arc::new(QuotaGate::new(None)),
            Arc::new(InMemoryReplicationLog::new()),
            Duration::from_secs(10),
        );

        let last_index = follower.catch_up(log.as_ref(), 0).await;
        assert_eq!(last_index, 1);

        let replayed = follower_registry.get("p", "r").unwrap();
        let entry = replayed.get_entry(Revision::HEAD, "/a.json").await.unwrap().unwrap();
        assert_eq!(entry.content, crate::entry::EntryContent::json(json!({"v": 1})));
    }

    #[tokio::test]
    async fn session_commands_append_to_the_log_without_a_repository() {
        let (_, _, executor) = full_executor().await;
        executor
            .apply(
                Command::CreateSession(SessionPayload {
                    session_id: "sess-1".to_string(),
                    user: "alice".to_string(),
                    expires_at: now(),
                }),
                now(),
            )
            .await
            .unwrap();
        executor
            .apply(Command::RemoveSession { session_id: "sess-1".to_string() }, now())
            .await
            .unwrap();
    }
}
