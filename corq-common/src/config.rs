//! Configuration loading for the CORQ processes
//!
//! Both binaries read the same TOML file; each uses the sections relevant
//! to it. Missing optional sections disable the respective feature (e.g.
//! no `[cache]` section means no file cache).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};
use crate::proto::{
    DEFAULT_QUERY_CHANNEL, DEFAULT_QUEUE_KEY, DEFAULT_REPLY_TIMEOUT_SECS,
    DEFAULT_RESULT_CHANNEL_PREFIX, DEFAULT_RESULT_TTL_SECS,
};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// API process listen address, e.g. `127.0.0.1:8787`
    #[serde(default)]
    pub listen: Option<String>,

    pub bus: BusConfig,

    pub corpora: CorporaConfig,

    #[serde(default)]
    pub cache: Option<CacheConfig>,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub sketch: SketchConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let conf: Config = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        conf.validate()?;
        Ok(conf)
    }

    fn validate(&self) -> Result<()> {
        if self.bus.backend == BusBackend::Redis && self.bus.url.is_none() {
            return Err(Error::Config(
                "bus.url is required for the redis backend".to_string(),
            ));
        }
        if self.corpora.partitions_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "corpora.partitions_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub backend: BusBackend,

    /// Redis URL, e.g. `redis://localhost:6379/0`
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub queue_key: Option<String>,

    #[serde(default)]
    pub result_channel_prefix: Option<String>,

    #[serde(default)]
    pub query_channel: Option<String>,

    #[serde(default)]
    pub reply_timeout_secs: Option<u64>,

    #[serde(default)]
    pub result_ttl_secs: Option<u64>,
}

impl BusConfig {
    pub fn queue_key(&self) -> String {
        self.queue_key
            .clone()
            .unwrap_or_else(|| DEFAULT_QUEUE_KEY.to_string())
    }

    pub fn result_channel_prefix(&self) -> String {
        self.result_channel_prefix.clone().unwrap_or_else(|| {
            warn!(
                channel = DEFAULT_RESULT_CHANNEL_PREFIX,
                "bus channel for results not specified, using default"
            );
            DEFAULT_RESULT_CHANNEL_PREFIX.to_string()
        })
    }

    pub fn query_channel(&self) -> String {
        self.query_channel.clone().unwrap_or_else(|| {
            warn!(
                channel = DEFAULT_QUERY_CHANNEL,
                "bus channel for queries not specified, using default"
            );
            DEFAULT_QUERY_CHANNEL.to_string()
        })
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs.unwrap_or_else(|| {
            warn!(
                value = DEFAULT_REPLY_TIMEOUT_SECS,
                "replyTimeoutSecs not specified for the bus, using default"
            );
            DEFAULT_REPLY_TIMEOUT_SECS
        }))
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs.unwrap_or(DEFAULT_RESULT_TTL_SECS))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorporaConfig {
    /// Registry of corpus data files consumed by the computation backend
    pub registry_dir: PathBuf,

    /// Per-corpus partition files (`<partitions_dir>/<corpus>/*.part`)
    pub partitions_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Content-addressed file cache directory
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// SQLite database memoizing collocation sub-query counts
    #[serde(default)]
    pub coll_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WorkerConfig {
    /// Directory for per-worker JSONL job logs; disabled when unset
    #[serde(default)]
    pub performance_log_dir: Option<PathBuf>,

    #[serde(default)]
    pub tick_secs: Option<u64>,
}

impl WorkerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.unwrap_or(2))
    }
}

/// Attribute names and values of the grammatical relation used for
/// collocation sketches, plus re-ranking sizes
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SketchConfig {
    pub lemma_attr: String,
    pub pos_attr: String,
    pub parent_lemma_attr: String,
    pub parent_pos_attr: String,
    pub func_attr: String,
    pub noun_subject_value: String,
    pub verb_value: String,

    /// Size of the preliminary candidate selection kept for re-ranking
    pub prelim_sel_size: usize,

    /// Size of the final ranked result
    pub result_size: usize,

    /// Number of parallel chunks per sub-query round
    pub parallelism: usize,
}

impl Default for SketchConfig {
    fn default() -> Self {
        SketchConfig {
            lemma_attr: "lemma".to_string(),
            pos_attr: "upos".to_string(),
            parent_lemma_attr: "p_lemma".to_string(),
            parent_pos_attr: "p_upos".to_string(),
            func_attr: "deprel".to_string(),
            noun_subject_value: "nsubj".to_string(),
            verb_value: "VERB".to_string(),
            prelim_sel_size: 20,
            result_size: 10,
            parallelism: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_config() {
        let raw = r#"
            [bus]
            backend = "memory"

            [corpora]
            registry_dir = "/var/opt/corq/registry"
            partitions_dir = "/var/opt/corq/partitions"
        "#;
        let conf: Config = toml::from_str(raw).unwrap();
        assert_eq!(conf.bus.backend, BusBackend::Memory);
        assert_eq!(conf.bus.queue_key(), "corqQueue");
        assert_eq!(conf.bus.reply_timeout(), Duration::from_secs(60));
        assert_eq!(conf.sketch.prelim_sel_size, 20);
        assert!(conf.cache.is_none());
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let raw = r#"
            [bus]
            backend = "redis"

            [corpora]
            registry_dir = "/r"
            partitions_dir = "/p"
        "#;
        let conf: Config = toml::from_str(raw).unwrap();
        assert!(conf.validate().is_err());
    }
}
