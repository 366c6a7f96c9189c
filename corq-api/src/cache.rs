//! Content-addressed file cache of query results
//!
//! A cache entry is keyed by the SHA-256 of the operation's wire form, so
//! identical queries hit the same file regardless of which endpoint issued
//! them. The file holds the result type tag on the first line and the JSON
//! payload after it; a tag that does not match the expected result shape of
//! the operation invalidates the entry.
//!
//! Lookup and store are not atomic with respect to concurrent requests for
//! the same key. Both may compute and both write the same content; the
//! cache trades that duplicate work for lock-free reads.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use corq_common::error::Result;
use corq_common::proto::{Operation, QueryResult, WorkerReply};

/// Synthetic worker ID carried by replies served from the cache
pub const CACHED_WORKER_ID: &str = "cache";

pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: &Path) -> Self {
        FileCache {
            dir: dir.to_path_buf(),
        }
    }

    fn entry_path(&self, op: &Operation) -> Result<PathBuf> {
        let canonical = serde_json::to_vec(op)?;
        let digest = Sha256::digest(&canonical);
        Ok(self.dir.join(format!("{}{:x}", op.tag(), digest)))
    }

    /// Cached reply for an operation, or `None` on miss. An unreadable or
    /// shape-mismatched entry counts as a miss.
    pub fn get(&self, op: &Operation) -> Result<Option<WorkerReply>> {
        let path = self.entry_path(op)?;
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Ok(None),
        };
        let Some((tag, payload)) = raw.split_once('\n') else {
            warn!(path = %path.display(), "malformed cache entry, ignoring");
            return Ok(None);
        };
        if tag != op.result_tag() {
            warn!(
                path = %path.display(),
                found = tag,
                expected = op.result_tag(),
                "cache entry result type mismatch, ignoring"
            );
            return Ok(None);
        }
        let result: QueryResult = match serde_json::from_str(payload) {
            Ok(result) => result,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "undecodable cache entry, ignoring");
                return Ok(None);
            }
        };
        debug!(func = op.tag(), "serving query result from cache");
        let now = Utc::now();
        Ok(Some(WorkerReply {
            worker_id: CACHED_WORKER_ID.to_string(),
            proc_begin: now,
            proc_end: now,
            has_user_error: false,
            result,
        }))
    }

    /// Store a successful result; failed computations are never cached
    pub fn put(&self, op: &Operation, result: &QueryResult) -> Result<()> {
        if result.err().is_some() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)?;
        let payload = serde_json::to_string(result)?;
        let content = format!("{}\n{}", result.type_tag(), payload);
        std::fs::write(self.entry_path(op)?, content)?;
        Ok(())
    }
}
