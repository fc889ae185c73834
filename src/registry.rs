//! Process-wide lookup table of live repositories, shared by the query
//! facade, command executor, and purge scheduler.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::errors::{CoreError, CoreResult};
use crate::repository::Repository;
use crate::worker::RepositoryWorkerPool;

pub struct RepositoryRegistry {
    repos: DashMap<(String, String), Arc<Repository>, ahash::RandomState>,
    cache_capacity: usize,
    /// When set, every repository created through this registry persists
    /// its commits under `<data_dir>/<project>/<repo>/` (spec.md §6
    /// "Persisted state layout"). `None` keeps everything in-memory, used
    /// by unit/integration tests that do not exercise durability.
    data_dir: Option<PathBuf>,
    /// Shared repository worker pool (spec.md §5), handed to every
    /// repository this registry creates or reopens so commit-log I/O is
    /// dispatched to one bounded pool rather than one per repository.
    workers: RepositoryWorkerPool,
}

impl Default for RepositoryRegistry {
    fn default() -> Self {
        RepositoryRegistry::new(16)
    }
}

impl RepositoryRegistry {
    /// An in-memory-only registry: nothing created through it survives a
    /// restart. Used by tests and by any caller that has not configured
    /// a `dataDir`.
    pub fn new(cache_capacity: usize) -> Self {
        RepositoryRegistry {
            repos: DashMap::default(),
            cache_capacity,
            data_dir: None,
            workers: RepositoryWorkerPool::new(4),
        }
    }

    /// A registry whose repositories persist under `data_dir` (spec.md
    /// §4.1 "State at rest"). Used by `server::Engine`.
    pub fn with_data_dir(cache_capacity: usize, data_dir: PathBuf) -> Self {
        Self::with_data_dir_and_workers(cache_capacity, data_dir, RepositoryWorkerPool::new(16))
    }

    /// Like [`Self::with_data_dir`], but with an explicitly sized worker
    /// pool (`num_repository_workers`, spec.md §6), used by `server::Engine`.
    pub fn with_data_dir_and_workers(cache_capacity: usize, data_dir: PathBuf, workers: RepositoryWorkerPool) -> Self {
        RepositoryRegistry {
            repos: DashMap::default(),
            cache_capacity,
            data_dir: Some(data_dir),
            workers,
        }
    }

    fn repo_dir(&self, project: &str, repo: &str) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|base| base.join(project).join(repo))
    }

    pub async fn create(&self, project: &str, repo: &str, now: DateTime<Utc>) -> CoreResult<Arc<Repository>> {
        crate::project::validate_name(repo)?;
        let key = (project.to_string(), repo.to_string());
        if self.repos.contains_key(&key) {
            return Err(CoreError::RepositoryExists {
                project: project.to_string(),
                repo: repo.to_string(),
            });
        }
        let created = match self.repo_dir(project, repo) {
            Some(dir) => Arc::new(
                Repository::open_persistent(project, repo, dir, now, self.cache_capacity, self.workers.clone()).await?,
            ),
            None => Arc::new(Repository::with_workers(project, repo, now, self.cache_capacity, self.workers.clone())),
        };
        self.repos.insert(key, created.clone());
        Ok(created)
    }

    /// Reattach a repository that already has durable state on disk but
    /// is not yet present in this registry (used when a server restarts
    /// and rediscovers the project/repository directories already on
    /// disk under `dataDir`, per spec.md §6).
    pub async fn reopen(&self, project: &str, repo: &str, now: DateTime<Utc>) -> CoreResult<Arc<Repository>> {
        let key = (project.to_string(), repo.to_string());
        if let Some(existing) = self.repos.get(&key) {
            return Ok(existing.clone());
        }
        let dir = self.repo_dir(project, repo).ok_or_else(|| CoreError::RepositoryNotFound {
            project: project.to_string(),
            repo: repo.to_string(),
        })?;
        let reopened = Arc::new(
            Repository::open_persistent(project, repo, dir, now, self.cache_capacity, self.workers.clone()).await?,
        );
        self.repos.insert(key, reopened.clone());
        Ok(reopened)
    }

    pub fn get(&self, project: &str, repo: &str) -> CoreResult<Arc<Repository>> {
        self.repos
            .get(&(project.to_string(), repo.to_string()))
            .map(|e| e.clone())
            .ok_or_else(|| CoreError::RepositoryNotFound {
                project: project.to_string(),
                repo: repo.to_string(),
            })
    }

    pub fn exists(&self, project: &str, repo: &str) -> bool {
        self.repos
            .get(&(project.to_string(), repo.to_string()))
            .map(|e| e.is_live())
            .unwrap_or(false)
    }

    /// Tombstone the repository. It stays in the registry (so
    /// `list_removed`/`unremove` still see it) until [`Self::purge_marked`]
    /// physically drops it.
    pub fn remove(&self, project: &str, repo: &str, now: DateTime<Utc>) -> CoreResult<()> {
        let entry = self
            .repos
            .get(&(project.to_string(), repo.to_string()))
            .ok_or_else(|| CoreError::RepositoryNotFound {
                project: project.to_string(),
                repo: repo.to_string(),
            })?;
        entry.mark_removed(now);
        Ok(())
    }

    pub fn unremove(&self, project: &str, repo: &str) -> CoreResult<()> {
        let entry = self
            .repos
            .get(&(project.to_string(), repo.to_string()))
            .ok_or_else(|| CoreError::RepositoryNotFound {
                project: project.to_string(),
                repo: repo.to_string(),
            })?;
        entry.unremove();
        Ok(())
    }

    /// Physically drop one named repository immediately, regardless of
    /// its tombstone age. Used by an explicit `PurgeRepository` command
    /// (spec.md §4.5), as opposed to [`Self::purge_marked`]'s time-based
    /// sweep. The repository must already be tombstoned.
    pub fn purge_now(&self, project: &str, repo: &str) -> CoreResult<()> {
        let key = (project.to_string(), repo.to_string());
        let is_tombstoned = self
            .repos
            .get(&key)
            .map(|e| e.removed_at().is_some())
            .ok_or_else(|| CoreError::RepositoryNotFound {
                project: project.to_string(),
                repo: repo.to_string(),
            })?;
        if !is_tombstoned {
            return Err(CoreError::ChangeConflict(format!(
                "repository {project}/{repo} must be removed before it can be purged"
            )));
        }
        if let Some((_, entry)) = self.repos.remove(&key) {
            entry.close();
        }
        Ok(())
    }

    /// Physically drop tombstoned repositories older than
    /// `min_age_secs`, closing each first. Used by the purge scheduler
    /// (spec.md §4.8).
    pub fn purge_marked(&self, now: DateTime<Utc>, min_age_secs: i64) -> Vec<(String, String)> {
        let mut purged = Vec::new();
        self.repos.retain(|key, repo| {
            if let Some(removed_at) = repo.removed_at() {
                if (now - removed_at).num_seconds() >= min_age_secs {
                    repo.close();
                    purged.push(key.clone());
                    return false;
                }
            }
            true
        });
        purged
    }

    pub fn list_for_project(&self, project: &str) -> Vec<String> {
        self.repos
            .iter()
            .filter(|e| e.key().0 == project && e.value().is_live())
            .map(|e| e.key().1.clone())
            .collect()
    }

    pub fn list_removed_for_project(&self, project: &str) -> Vec<String> {
        self.repos
            .iter()
            .filter(|e| e.key().0 == project && !e.value().is_live())
            .map(|e| e.key().1.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::UNIX_EPOCH
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let registry = RepositoryRegistry::new(16);
        registry.create("p", "r", now()).await.unwrap();
        assert!(registry.exists("p", "r"));
        assert_eq!(registry.get("p", "r").unwrap().head_revision().await, 1);
    }

    #[tokio::test]
    async fn create_rejects_a_duplicate_name() {
        let registry = RepositoryRegistry::new(16);
        registry.create("p", "r", now()).await.unwrap();
        let err = registry.create("p", "r", now()).await.unwrap_err();
        assert!(matches!(err, CoreError::RepositoryExists { .. }));
    }

    #[tokio::test]
    async fn purge_now_requires_removal_first() {
        let registry = RepositoryRegistry::new(16);
        registry.create("p", "r", now()).await.unwrap();
        assert!(registry.purge_now("p", "r").is_err());

        registry.remove("p", "r", now()).unwrap();
        registry.purge_now("p", "r").unwrap();
        assert!(registry.get("p", "r").is_err());
    }

    #[tokio::test]
    async fn persistent_registry_rediscovers_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RepositoryRegistry::with_data_dir(16, dir.path().to_path_buf());
        registry.create("p", "r", now()).await.unwrap();

        let reopened = RepositoryRegistry::with_data_dir(16, dir.path().to_path_buf());
        let repo = reopened.reopen("p", "r", now()).await.unwrap();
        assert_eq!(repo.head_revision().await, 1);
    }
}
