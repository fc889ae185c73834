//! Error types for the core configuration store.
//!
//! This module defines a unified error enumeration used across the repository
//! store, project manager, command executor, and replication log. It
//! integrates with `thiserror` to provide rich `Display` implementations and
//! error source chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details (project/repo/path/revision)
//!   so callers can match on the variant instead of parsing messages.
//! - No raw `std::io::Error` escapes the repository store boundary: storage
//!   failures are always caught at C1 and re-wrapped as `StorageFault`.

use thiserror::Error;

/// Unified error enumeration for the core engine.
///
/// - Used across the repository store, project manager, watchers, command
///   executor, replication log, and quota gate.
/// - Implements `std::error::Error` via `thiserror`.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Project lookup failed.
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Project creation collided with an existing name.
    #[error("Project already exists: {0}")]
    ProjectExists(String),

    /// Repository lookup failed.
    #[error("Repository not found: {project}/{repo}")]
    RepositoryNotFound { project: String, repo: String },

    /// Repository creation collided with an existing name.
    #[error("Repository already exists: {project}/{repo}")]
    RepositoryExists { project: String, repo: String },

    /// Revision is out of range ( > head or < 1) after normalization.
    #[error("Revision not found: {0}")]
    RevisionNotFound(i64),

    /// No entry exists at the given path and revision.
    #[error("Entry not found: {path} at revision {revision}")]
    EntryNotFound { path: String, revision: i64 },

    /// Commit base was not head, or an illegal rename/remove was requested.
    #[error("Change conflict: {0}")]
    ChangeConflict(String),

    /// A `JsonPatch` change's expected-previous-value assertion failed.
    #[error("JSON patch conflict on {path}: {reason}")]
    JsonPatchConflict { path: String, reason: String },

    /// A `TextPatch` change's expected-previous-text assertion failed.
    #[error("Text patch conflict on {path}: {reason}")]
    TextPatchConflict { path: String, reason: String },

    /// The change-set, after normalization, had no effect.
    #[error("Redundant change: commit would have no effect")]
    RedundantChange,

    /// The repository's write quota was exceeded.
    #[error("Too many requests for {project}/{repo}: quota exceeded")]
    TooManyRequests { project: String, repo: String },

    /// A command waited longer than the configured acquire timeout for
    /// its repository's serialization lock.
    #[error("Timed out waiting for the command lock on {project}/{repo}")]
    CommandTimeout { project: String, repo: String },

    /// Replication-layer failure: lock timeout, quorum loss, append failure.
    #[error("Replication error: {0}")]
    ReplicationError(String),

    /// The server (or this repository) is shutting down.
    #[error("Shutting down")]
    ShuttingDown,

    /// This replica is not the current leader and cannot accept writes
    /// while replication is coordinated.
    #[error("This replica is not writable: not the current leader")]
    NotLeader,

    /// Underlying storage is corrupted or unreachable; the repository that
    /// raised this must be closed and fail all subsequent operations.
    #[error("Storage fault in {project}/{repo}: {reason}")]
    StorageFault {
        project: String,
        repo: String,
        reason: String,
    },

    /// JSON-path evaluation failed against a stored JSON tree.
    #[error("Query execution error: {0}")]
    QueryExecution(String),

    /// Project or repository name failed the `[a-zA-Z0-9_-]+` validation.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Invalid path: must be absolute, slash-separated, and not contain `..`.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl CoreError {
    /// True for errors the client-edge retry wrapper of §7 should retry
    /// (after re-normalizing HEAD). Only `RevisionNotFound` qualifies.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::RevisionNotFound(_) | CoreError::CommandTimeout { .. })
    }

    /// True for the one error kind that is fatal to the repository that
    /// raised it (§7: "fatal: close repository, degrade to read-only").
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::StorageFault { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
