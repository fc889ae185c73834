//! Durable commit-log persistence for one repository (spec.md §4.1 "State
//! at rest").
//!
//! The contract spec.md asks for is minimal: after a successful `commit`,
//! a crash and restart must yield either the pre-commit or the
//! post-commit state, never a partial tree. This module keeps that
//! contract with the simplest structure that satisfies it — an
//! append-only, newline-delimited JSON log of every [`Commit`] (mirroring
//! `server::write_status_file`'s write-whole-file-then-rename style, just
//! append-only instead of whole-file) plus a small periodic snapshot of
//! the materialized head tree so a long history does not have to be
//! replayed in full on every restart.
//!
//! Layout under a repository's directory (`<dataDir>/<project>/<repo>/`):
//! - `commits.jsonl` — one JSON object per line, one per commit, in
//!   revision order, starting with revision 1.
//! - `snapshot.json` — optional: `{ revision, tree }` for the most
//!   recently snapshotted revision, used to skip replay of everything at
//!   or before it.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::commit::Commit;
use crate::errors::{CoreError, CoreResult};
use crate::tree::ContentTree;

const COMMIT_LOG_FILE: &str = "commits.jsonl";
const SNAPSHOT_FILE: &str = "snapshot.json";

/// An on-disk, append-only commit log for one repository, plus an
/// optional snapshot of a materialized tree at some revision. Cheap to
/// clone (just the directory path) so a blocking append can be moved
/// onto a blocking-task thread without borrowing the owning `Repository`.
#[derive(Clone)]
pub struct CommitLogStore {
    dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    revision: i32,
    entries: Vec<(String, crate::entry::EntryContent)>,
}

impl CommitLogStore {
    /// Open (creating if absent) the persistence directory for one
    /// repository. Does not read anything yet; call [`Self::load`] to
    /// recover state.
    pub async fn open(dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| storage_fault(&dir, e))?;
        Ok(CommitLogStore { dir })
    }

    fn commit_log_path(&self) -> PathBuf {
        self.dir.join(COMMIT_LOG_FILE)
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Append one commit to the durable log. Each call opens in append
    /// mode, writes one line, and calls `sync_data` before returning, so
    /// a successful return guarantees the commit survives a crash
    /// immediately after. Blocking I/O is used deliberately (see
    /// module docs): callers invoke this from the repository worker
    /// pool, never from an async reactor thread.
    pub fn append_blocking(&self, commit: &Commit) -> CoreResult<()> {
        let line = serde_json::to_string(commit)
            .map_err(|e| storage_fault(&self.dir, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.commit_log_path())
            .map_err(|e| storage_fault(&self.dir, e))?;
        writeln!(file, "{line}").map_err(|e| storage_fault(&self.dir, e))?;
        file.sync_data().map_err(|e| storage_fault(&self.dir, e))?;
        Ok(())
    }

    /// Load every commit previously durably appended, in revision
    /// order. A malformed trailing line (a crash mid-write) is dropped
    /// with a warning rather than failing the whole load, so the
    /// recovered state is the pre-commit state for that one write —
    /// exactly the guarantee spec.md §4.1 asks for.
    pub async fn load(dir: impl AsRef<Path>) -> CoreResult<Vec<Commit>> {
        let dir = dir.as_ref();
        let path = dir.join(COMMIT_LOG_FILE);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_fault(dir, e)),
        };

        let mut commits = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Commit>(line) {
                Ok(commit) => commits.push(commit),
                Err(e) => {
                    if lineno + 1 == raw.lines().count() {
                        warn!(path = %path.display(), error = %e, "dropping truncated trailing commit-log line");
                        break;
                    }
                    return Err(CoreError::StorageFault {
                        project: String::new(),
                        repo: String::new(),
                        reason: format!("corrupt commit log at {}:{}: {e}", path.display(), lineno + 1),
                    });
                }
            }
        }
        Ok(commits)
    }

    /// Persist a snapshot of the materialized tree at `revision`, so a
    /// future `load`+replay can start from it instead of revision 1.
    /// Written via the same write-whole-file-then-rename pattern
    /// `server::write_status_file` uses, so a crash mid-write leaves the
    /// previous snapshot (or none) intact rather than a half-written one.
    /// The JSON body is zlib-compressed before it hits disk: a snapshot
    /// holds the whole materialized tree, and repeated path prefixes and
    /// JSON punctuation compress well.
    pub async fn write_snapshot(&self, revision: i32, tree: &ContentTree) -> CoreResult<()> {
        let entries: Vec<(String, crate::entry::EntryContent)> = tree.entries_for_snapshot();
        let file = SnapshotFile { revision, entries };
        let json = serde_json::to_vec(&file)
            .map_err(|e| storage_fault(&self.dir, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json).map_err(|e| storage_fault(&self.dir, e))?;
        let bytes = encoder.finish().map_err(|e| storage_fault(&self.dir, e))?;

        let tmp_path = self.dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        let mut tmp = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| storage_fault(&self.dir, e))?;
        tmp.write_all(&bytes).await.map_err(|e| storage_fault(&self.dir, e))?;
        tmp.sync_all().await.map_err(|e| storage_fault(&self.dir, e))?;
        tokio::fs::rename(&tmp_path, self.snapshot_path())
            .await
            .map_err(|e| storage_fault(&self.dir, e))?;
        Ok(())
    }

    /// Load the most recent snapshot, if one exists.
    pub async fn load_snapshot(dir: impl AsRef<Path>) -> CoreResult<Option<(i32, ContentTree)>> {
        let dir = dir.as_ref();
        let path = dir.join(SNAPSHOT_FILE);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_fault(dir, e)),
        };
        let mut decoder = ZlibDecoder::new(&raw[..]);
        let mut json = Vec::new();
        if decoder.read_to_end(&mut json).is_err() {
            warn!(path = %path.display(), "ignoring undecodable snapshot, falling back to full replay");
            return Ok(None);
        }
        let file: SnapshotFile = match serde_json::from_slice(&json) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable snapshot, falling back to full replay");
                return Ok(None);
            }
        };
        Ok(Some((file.revision, ContentTree::from_snapshot(file.entries))))
    }
}

fn storage_fault(dir: &Path, err: io::Error) -> CoreError {
    CoreError::StorageFault {
        project: String::new(),
        repo: String::new(),
        reason: format!("{}: {err}", dir.display()),
    }
}
