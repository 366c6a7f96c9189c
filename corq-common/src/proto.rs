//! Job/reply protocol types for the CORQ message bus
//!
//! A `Job` is one unit of work submitted to the shared queue. Its `channel`
//! is a globally unique, single-use reply channel generated at publish time;
//! the worker stores its single reply under that channel key and notifies
//! the waiting dispatcher via pub/sub.
//!
//! Operations form a closed enum with one typed argument struct per variant,
//! so the worker dispatch is exhaustive and compiler-checked. An unknown
//! function tag on the wire deserializes into `Operation::Unsupported`
//! instead of failing the whole job decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::results::{CollFreqData, ConcSize, ErrorResult, FreqDistrib, TextTypeNorms};

/// Payload of the "new job available" notification
pub const MSG_NEW_QUERY: &str = "newQuery";

/// Default key of the shared FIFO work queue
pub const DEFAULT_QUEUE_KEY: &str = "corqQueue";

/// Default namespace prefix for per-job reply channels
pub const DEFAULT_RESULT_CHANNEL_PREFIX: &str = "corqResults";

/// Default topic workers subscribe to for new-job notifications
pub const DEFAULT_QUERY_CHANNEL: &str = "corqQueries";

/// Default expiry of a stored reply (an abandoned reply must not leak forever)
pub const DEFAULT_RESULT_TTL_SECS: u64 = 600;

/// Default deadline for awaiting a worker reply
pub const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 60;

/// A named computation with typed arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "func", content = "args")]
pub enum Operation {
    /// Frequency distribution of query matches grouped by a criterion
    #[serde(rename = "freqDistrib")]
    FreqDistrib(FreqDistribArgs),

    /// Number of query matches (concordance size)
    #[serde(rename = "concSize")]
    ConcSize(ConcSizeArgs),

    /// Precalculation of collocation support data for a corpus
    #[serde(rename = "collFreqData")]
    CollFreqData(CollFreqDataArgs),

    /// Sizes of text-type categories for a structural attribute
    #[serde(rename = "textTypeNorms")]
    TextTypeNorms(TextTypeNormsArgs),

    /// Any function tag this build does not know
    #[serde(other)]
    Unsupported,
}

impl Operation {
    /// Function tag as it appears on the wire; also used as cache key prefix
    pub fn tag(&self) -> &'static str {
        match self {
            Operation::FreqDistrib(_) => "freqDistrib",
            Operation::ConcSize(_) => "concSize",
            Operation::CollFreqData(_) => "collFreqData",
            Operation::TextTypeNorms(_) => "textTypeNorms",
            Operation::Unsupported => "unsupported",
        }
    }

    /// Wire tag of the result shape this operation produces
    pub fn result_tag(&self) -> &'static str {
        match self {
            Operation::FreqDistrib(_) => "freqs",
            Operation::ConcSize(_) => "termFrequency",
            Operation::CollFreqData(_) => "collFreqData",
            Operation::TextTypeNorms(_) => "textTypeNorms",
            Operation::Unsupported => "error",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreqDistribArgs {
    pub corpus_path: String,

    /// Partition the query is scoped to; empty means the whole corpus
    #[serde(default)]
    pub partition_path: Option<String>,

    pub query: String,

    /// Grouping expression, e.g. `lemma 0`
    pub crit: String,

    #[serde(default)]
    pub freq_limit: i64,

    #[serde(default)]
    pub max_items: usize,

    /// Normalize rates against text-type norms instead of corpus size
    #[serde(default)]
    pub is_text_types: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcSizeArgs {
    pub corpus_path: String,

    #[serde(default)]
    pub partition_path: Option<String>,

    pub query: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollFreqDataArgs {
    pub corpus_path: String,

    #[serde(default)]
    pub partition_path: Option<String>,

    pub attrs: Vec<String>,

    /// Structures involved in text-type distributions; intermediate
    /// data must be prepared for each of them
    #[serde(default)]
    pub structs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextTypeNormsArgs {
    pub corpus_path: String,
    pub struct_attr: String,
}

/// One unit of work submitted to the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Single-use reply channel, generated at publish time, never reused
    pub channel: String,

    #[serde(flatten)]
    pub op: Operation,

    /// Expected result tag, threaded through so heterogeneous caches
    /// can validate the reply shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_hint: Option<String>,
}

impl Job {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Job> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Typed result of one executed operation; errors travel embedded in the
/// concrete shapes (a failed backend call is still a normally delivered reply)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "resultType", content = "value")]
pub enum QueryResult {
    #[serde(rename = "freqs")]
    FreqDistrib(FreqDistrib),

    #[serde(rename = "termFrequency")]
    ConcSize(ConcSize),

    #[serde(rename = "collFreqData")]
    CollFreqData(CollFreqData),

    #[serde(rename = "textTypeNorms")]
    TextTypeNorms(TextTypeNorms),

    #[serde(rename = "error")]
    Error(ErrorResult),
}

impl QueryResult {
    pub fn type_tag(&self) -> &'static str {
        match self {
            QueryResult::FreqDistrib(_) => "freqs",
            QueryResult::ConcSize(_) => "termFrequency",
            QueryResult::CollFreqData(_) => "collFreqData",
            QueryResult::TextTypeNorms(_) => "textTypeNorms",
            QueryResult::Error(_) => "error",
        }
    }

    /// Embedded error message, if the producing computation failed
    pub fn err(&self) -> Option<&str> {
        match self {
            QueryResult::FreqDistrib(v) => v.error.as_deref(),
            QueryResult::ConcSize(v) => v.error.as_deref(),
            QueryResult::CollFreqData(v) => v.error.as_deref(),
            QueryResult::TextTypeNorms(v) => v.error.as_deref(),
            QueryResult::Error(v) => Some(&v.error),
        }
    }

    pub fn into_freqs(self) -> Result<FreqDistrib> {
        if let Some(msg) = self.err() {
            return Err(Error::Backend(msg.to_string()));
        }
        match self {
            QueryResult::FreqDistrib(v) => Ok(v),
            other => Err(Error::MissingResult(format!(
                "expected freqs result, got {}",
                other.type_tag()
            ))),
        }
    }

    pub fn into_conc_size(self) -> Result<ConcSize> {
        if let Some(msg) = self.err() {
            return Err(Error::Backend(msg.to_string()));
        }
        match self {
            QueryResult::ConcSize(v) => Ok(v),
            other => Err(Error::MissingResult(format!(
                "expected termFrequency result, got {}",
                other.type_tag()
            ))),
        }
    }
}

/// The single message a worker produces for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReply {
    pub worker_id: String,
    pub proc_begin: DateTime<Utc>,
    pub proc_end: DateTime<Utc>,

    /// The failure was caused by the user's input, not by the system
    #[serde(default)]
    pub has_user_error: bool,

    #[serde(flatten)]
    pub result: QueryResult,
}

impl WorkerReply {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<WorkerReply> {
        Ok(serde_json::from_slice(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_round_trip() {
        let job = Job {
            channel: "corqResults:abc".to_string(),
            op: Operation::FreqDistrib(FreqDistribArgs {
                corpus_path: "/corpora/syn2020".to_string(),
                partition_path: Some("/corpora/parts/syn2020/01.part".to_string()),
                query: "[lemma=\"team\"]".to_string(),
                crit: "lemma 0".to_string(),
                freq_limit: 1,
                max_items: 100,
                is_text_types: false,
            }),
            result_hint: None,
        };
        let raw = job.to_bytes().unwrap();
        let back = Job::from_bytes(&raw).unwrap();
        assert_eq!(back.channel, "corqResults:abc");
        match back.op {
            Operation::FreqDistrib(args) => {
                assert_eq!(args.crit, "lemma 0");
                assert_eq!(args.max_items, 100);
            }
            _ => panic!("wrong operation decoded"),
        }
    }

    #[test]
    fn test_unknown_func_tag_decodes_as_unsupported() {
        let raw = br#"{"channel":"corqResults:x","func":"conjugationTables","args":{"whatever":1}}"#;
        let job = Job::from_bytes(raw).unwrap();
        assert!(matches!(job.op, Operation::Unsupported));
        assert_eq!(job.op.tag(), "unsupported");
    }

    #[test]
    fn test_reply_embedded_error() {
        let result = QueryResult::FreqDistrib(FreqDistrib {
            error: Some("corpus data missing".to_string()),
            ..Default::default()
        });
        assert_eq!(result.err(), Some("corpus data missing"));
        assert!(matches!(result.into_freqs(), Err(Error::Backend(_))));
    }

    #[test]
    fn test_result_shape_mismatch() {
        let result = QueryResult::ConcSize(ConcSize::default());
        assert!(matches!(
            result.into_freqs(),
            Err(Error::MissingResult(_))
        ));
    }
}
