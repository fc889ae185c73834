//! C8 Purge Scheduler: a leader-only periodic sweep that physically
//! deletes projects and repositories tombstoned longer than the
//! configured retention window (spec.md §4.8).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::project::ProjectManager;
use crate::registry::RepositoryRegistry;
use crate::replication::LeaderElection;
use crate::watch::CommitWatchers;

pub struct PurgeScheduler {
    projects: Arc<ProjectManager>,
    repositories: Arc<RepositoryRegistry>,
    watchers: Arc<CommitWatchers>,
    leadership: Arc<dyn LeaderElection>,
    min_age_secs: i64,
    tick_interval: Duration,
}

impl PurgeScheduler {
    pub fn new(
        projects: Arc<ProjectManager>,
        repositories: Arc<RepositoryRegistry>,
        watchers: Arc<CommitWatchers>,
        leadership: Arc<dyn LeaderElection>,
        min_age_secs: i64,
        tick_interval: Duration,
    ) -> Self {
        PurgeScheduler {
            projects,
            repositories,
            watchers,
            leadership,
            min_age_secs,
            tick_interval,
        }
    }

    /// Run one sweep. A no-op on a non-leader replica: only the leader
    /// may physically delete tombstoned state, so every replica agrees
    /// on what was purged via the replication log rather than each
    /// independently racing to delete.
    pub async fn tick(&self) {
        if !self.leadership.is_leader().await {
            return;
        }
        let now = Utc::now();
        let purged_projects = self.projects.purge_marked(now, self.min_age_secs);
        for project in &purged_projects {
            for repo in self.repositories.list_for_project(project) {
                let _ = self.repositories.remove(project, &repo, now);
                self.watchers.close(project, &repo);
            }
            for repo in self.repositories.list_removed_for_project(project) {
                let _ = self.repositories.remove(project, &repo, now);
                self.watchers.close(project, &repo);
            }
        }
        let purged_repos = self.repositories.purge_marked(now, self.min_age_secs);
        for (project, repo) in &purged_repos {
            self.watchers.close(project, repo);
        }
        if !purged_projects.is_empty() || !purged_repos.is_empty() {
            info!(
                purged_projects = purged_projects.len(),
                purged_repos = purged_repos.len(),
                "purge tick completed"
            );
        }
    }

    /// Drive `tick` forever at `tick_interval`, until `shutdown` fires.
    /// Spawned once at server startup (spec.md §5, "purge worker").
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::StandaloneReplication;

    #[tokio::test]
    async fn tick_purges_projects_past_retention() {
        let projects = Arc::new(ProjectManager::new());
        let repositories = Arc::new(RepositoryRegistry::new(16));
        let t0 = chrono::DateTime::UNIX_EPOCH;
        projects.create("alpha", t0).unwrap();
        projects.remove("alpha", t0).unwrap();

        let scheduler = PurgeScheduler::new(
            projects.clone(),
            repositories,
            Arc::new(CommitWatchers::new()),
            Arc::new(StandaloneReplication),
            0,
            Duration::from_secs(60),
        );
        scheduler.tick().await;
        assert!(projects.get("alpha").is_err());
    }
}
