//! C2 Project Manager: project lifecycle (create/remove/unremove/purge),
//! name validation, and the reserved `dogma` project (spec.md §4.2).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

use crate::errors::{CoreError, CoreResult};

/// The name of the reserved project every server provisions at startup
/// and refuses to let callers create, remove, or purge directly. It
/// hosts the `meta` and `dogma` repositories that track cluster-wide
/// bookkeeping (SPEC_FULL.md §B).
pub const RESERVED_PROJECT: &str = "dogma";

/// Lifecycle state of a project, mirroring a repository's (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectState {
    Live,
    Tombstoned { removed_at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct ProjectMetadata {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub state: ProjectState,
}

impl ProjectMetadata {
    fn new(name: String, now: DateTime<Utc>) -> Self {
        ProjectMetadata {
            name,
            created_at: now,
            state: ProjectState::Live,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, ProjectState::Live)
    }
}

/// Validate a project or repository name against `[a-zA-Z0-9_-]+`
/// (spec.md §4.2).
pub fn validate_name(name: &str) -> CoreResult<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Tracks every project's lifecycle state. Reads never lock globally:
/// `DashMap` gives per-shard locking the way the repository store's
/// content cache does (§C1).
#[derive(Debug, Default)]
pub struct ProjectManager {
    projects: DashMap<String, ProjectMetadata, ahash::RandomState>,
}

impl ProjectManager {
    pub fn new() -> Self {
        ProjectManager::default()
    }

    /// Provision the reserved project. Called once at server startup;
    /// idempotent so a restarted server does not fail to come up.
    pub fn bootstrap_reserved(&self, now: DateTime<Utc>) {
        self.projects
            .entry(RESERVED_PROJECT.to_string())
            .or_insert_with(|| ProjectMetadata::new(RESERVED_PROJECT.to_string(), now));
    }

    pub fn create(&self, name: &str, now: DateTime<Utc>) -> CoreResult<()> {
        validate_name(name)?;
        if self.projects.contains_key(name) {
            return Err(CoreError::ProjectExists(name.to_string()));
        }
        self.projects
            .insert(name.to_string(), ProjectMetadata::new(name.to_string(), now));
        info!(project = name, "created project");
        Ok(())
    }

    pub fn get(&self, name: &str) -> CoreResult<ProjectMetadata> {
        self.projects
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| CoreError::ProjectNotFound(name.to_string()))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.projects.get(name).map(|p| p.is_live()).unwrap_or(false)
    }

    /// Mark a project tombstoned. It remains visible via `list_removed`
    /// until [`purge_marked`] physically deletes it.
    pub fn remove(&self, name: &str, now: DateTime<Utc>) -> CoreResult<()> {
        if name == RESERVED_PROJECT {
            return Err(CoreError::ChangeConflict(format!(
                "the reserved project {RESERVED_PROJECT} cannot be removed"
            )));
        }
        let mut entry = self
            .projects
            .get_mut(name)
            .ok_or_else(|| CoreError::ProjectNotFound(name.to_string()))?;
        if !entry.is_live() {
            return Err(CoreError::ProjectNotFound(name.to_string()));
        }
        entry.state = ProjectState::Tombstoned { removed_at: now };
        info!(project = name, "removed project");
        Ok(())
    }

    pub fn unremove(&self, name: &str) -> CoreResult<()> {
        let mut entry = self
            .projects
            .get_mut(name)
            .ok_or_else(|| CoreError::ProjectNotFound(name.to_string()))?;
        match entry.state {
            ProjectState::Tombstoned { .. } => {
                entry.state = ProjectState::Live;
                info!(project = name, "unremoved project");
                Ok(())
            }
            ProjectState::Live => Err(CoreError::ProjectNotFound(name.to_string())),
        }
    }

    /// Physically delete one named project immediately, regardless of
    /// its tombstone age. Used by an explicit `PurgeProject` command
    /// (spec.md §4.5), as opposed to [`Self::purge_marked`]'s
    /// time-based sweep. The project must already be tombstoned.
    pub fn purge_now(&self, name: &str) -> CoreResult<()> {
        let is_tombstoned = self
            .projects
            .get(name)
            .map(|e| !e.is_live())
            .ok_or_else(|| CoreError::ProjectNotFound(name.to_string()))?;
        if !is_tombstoned {
            return Err(CoreError::ChangeConflict(format!(
                "project {name} must be removed before it can be purged"
            )));
        }
        self.projects.remove(name);
        info!(project = name, "purged project");
        Ok(())
    }

    /// Physically delete every tombstoned project older than
    /// `min_age_secs` seconds. Returns the purged names (used by [`crate::purge::PurgeScheduler`]).
    pub fn purge_marked(&self, now: DateTime<Utc>, min_age_secs: i64) -> Vec<String> {
        let mut purged = Vec::new();
        self.projects.retain(|name, meta| {
            if let ProjectState::Tombstoned { removed_at } = meta.state {
                if (now - removed_at).num_seconds() >= min_age_secs {
                    purged.push(name.clone());
                    return false;
                }
            }
            true
        });
        if !purged.is_empty() {
            info!(count = purged.len(), "purged tombstoned projects");
        }
        purged
    }

    pub fn list(&self) -> Vec<ProjectMetadata> {
        self.projects
            .iter()
            .filter(|e| e.is_live())
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn list_removed(&self) -> Vec<ProjectMetadata> {
        self.projects
            .iter()
            .filter(|e| !e.is_live())
            .map(|e| e.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation_rejects_illegal_characters() {
        assert!(validate_name("my-project_1").is_ok());
        assert!(validate_name("bad name").is_err());
        assert!(validate_name("").is_err());
    }

    #[test]
    fn reserved_project_cannot_be_removed() {
        let mgr = ProjectManager::new();
        let now = DateTime::UNIX_EPOCH;
        mgr.bootstrap_reserved(now);
        assert!(mgr.remove(RESERVED_PROJECT, now).is_err());
    }

    #[test]
    fn remove_then_unremove_restores_visibility() {
        let mgr = ProjectManager::new();
        let now = DateTime::UNIX_EPOCH;
        mgr.create("alpha", now).unwrap();
        mgr.remove("alpha", now).unwrap();
        assert!(!mgr.exists("alpha"));
        mgr.unremove("alpha").unwrap();
        assert!(mgr.exists("alpha"));
    }

    #[test]
    fn purge_now_requires_removal_first() {
        let mgr = ProjectManager::new();
        let t0 = DateTime::UNIX_EPOCH;
        mgr.create("alpha", t0).unwrap();
        assert!(mgr.purge_now("alpha").is_err());

        mgr.remove("alpha", t0).unwrap();
        mgr.purge_now("alpha").unwrap();
        assert!(mgr.get("alpha").is_err());
    }

    #[test]
    fn purge_marked_deletes_after_min_age() {
        let mgr = ProjectManager::new();
        let t0 = DateTime::UNIX_EPOCH;
        mgr.create("alpha", t0).unwrap();
        mgr.remove("alpha", t0).unwrap();

        let too_soon = t0 + chrono::Duration::seconds(5);
        assert!(mgr.purge_marked(too_soon, 3600).is_empty());

        let later = t0 + chrono::Duration::seconds(3601);
        let purged = mgr.purge_marked(later, 3600);
        assert_eq!(purged, vec!["alpha".to_string()]);
        assert!(mgr.get("alpha").is_err());
    }
}
