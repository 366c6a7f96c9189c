//! Corpus partition discovery
//!
//! A partitioned corpus keeps its chunks as `<partitions_dir>/<corpus>/*.part`
//! files. Discovery happens per request; adding a partition file takes effect
//! on the next query without any restart.

use std::path::{Path, PathBuf};

use tracing::debug;

use corq_common::error::Result;

pub struct PartitionSet {
    root: PathBuf,
}

impl PartitionSet {
    pub fn new(partitions_dir: &Path) -> Self {
        PartitionSet {
            root: partitions_dir.to_path_buf(),
        }
    }

    /// Partition file paths of a corpus in stable sorted order. A corpus
    /// without a partition directory is simply unpartitioned.
    pub fn list(&self, corpus_id: &str) -> Result<Vec<String>> {
        let dir = self.root.join(corpus_id);
        if !dir.is_dir() {
            debug!(corpus = corpus_id, "no partition directory, treating corpus as whole");
            return Ok(Vec::new());
        }
        let mut parts = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map(|e| e == "part").unwrap_or(false) {
                parts.push(path.to_string_lossy().to_string());
            }
        }
        parts.sort();
        Ok(parts)
    }
}
