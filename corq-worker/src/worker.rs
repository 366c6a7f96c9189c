//! The job-dispatch loop
//!
//! A worker is a two-state machine: idle (parked on its timer and on the
//! new-job notification topic) and processing (exactly one job in flight).
//! The dual wake source exists so a worker that missed a notification while
//! mid-job still makes progress via polling, while an idle worker reacts to
//! new work with low latency.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use corq_common::bus::Broker;
use corq_common::error::{Error, Result};
use corq_common::proto::{FreqDistribArgs, Job, Operation, QueryResult, WorkerReply, MSG_NEW_QUERY};
use corq_common::results::{CollFreqData, ConcSize, ErrorResult, FreqDistrib, JobLog, TextTypeNorms};

use crate::backend::{crit_attr, Backend};
use crate::norms::NormsCache;

const DEQUEUE_JITTER_MS: u64 = 40;

/// Failures caused by the request rather than by the system; reported to
/// clients as their error, not ours
fn is_user_error(err: &Error) -> bool {
    matches!(err, Error::InvalidInput(_))
}

pub struct Worker {
    id: String,
    bus: Arc<dyn Broker>,
    backend: Arc<dyn Backend>,
    norms: NormsCache,
    query_channel: String,
    tick: Duration,
    result_ttl: Duration,
    performance_log_dir: Option<PathBuf>,
}

impl Worker {
    pub fn new(
        id: String,
        bus: Arc<dyn Broker>,
        backend: Arc<dyn Backend>,
        query_channel: String,
        tick: Duration,
        result_ttl: Duration,
        performance_log_dir: Option<PathBuf>,
    ) -> Self {
        Worker {
            id,
            bus,
            backend,
            norms: NormsCache::new(),
            query_channel,
            tick,
            result_ttl,
            performance_log_dir,
        }
    }

    /// Run until the shutdown channel yields (or closes)
    pub async fn listen(&mut self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let mut sub = self.bus.subscribe(&self.query_channel).await?;
        let mut ticker = tokio::time::interval(self.tick);
        info!(worker_id = %self.id, "worker listening");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.try_next_job().await {
                        error!(worker_id = %self.id, error = %err, "failed to process job");
                    }
                }
                msg = sub.recv() => match msg {
                    Some(payload) if payload == MSG_NEW_QUERY => {
                        if let Err(err) = self.try_next_job().await {
                            error!(worker_id = %self.id, error = %err, "failed to process job");
                        }
                    }
                    Some(_) => {}
                    None => {
                        warn!(worker_id = %self.id, "query topic closed, exiting");
                        return Ok(());
                    }
                },
                _ = shutdown.recv() => {
                    info!(worker_id = %self.id, "worker exiting");
                    return Ok(());
                }
            }
        }
    }

    /// Attempt to dequeue and fully process one job. An empty queue is not
    /// an error; a job whose caller is gone is dropped without a reply.
    pub async fn try_next_job(&mut self) -> Result<()> {
        // small random delay spreads concurrent workers racing for the head
        let jitter = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..DEQUEUE_JITTER_MS)
        };
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let raw = match self.bus.dequeue().await? {
            Some(raw) => raw,
            None => return Ok(()),
        };
        let job = Job::from_bytes(&raw)?;
        debug!(
            worker_id = %self.id,
            channel = %job.channel,
            func = job.op.tag(),
            "received job"
        );

        // best-effort only: the caller may still disconnect between this
        // check and the publish below
        if !self.has_listener(&job.channel).await? {
            warn!(
                worker_id = %self.id,
                channel = %job.channel,
                func = job.op.tag(),
                "worker found an inactive job"
            );
            return Ok(());
        }

        let mut job_log = JobLog {
            worker_id: self.id.clone(),
            func: job.op.tag().to_string(),
            begin: Utc::now(),
            end: None,
            err: None,
        };
        let (result, has_user_error) = self.execute(&job.op).await;
        job_log.end = Some(Utc::now());
        job_log.err = result.err().map(str::to_string);

        self.publish_reply(&job.channel, result, has_user_error, &job_log)
            .await?;
        self.log_performance(&job_log);
        Ok(())
    }

    async fn has_listener(&self, channel: &str) -> Result<bool> {
        Ok(self.bus.num_subscribers(channel).await? > 0)
    }

    /// Dispatch one operation to the backend; backend failures become
    /// embedded errors in a normally delivered result, flagged as the
    /// user's fault when the error variant says so
    async fn execute(&mut self, op: &Operation) -> (QueryResult, bool) {
        match op {
            Operation::FreqDistrib(args) => {
                let norms = if args.is_text_types {
                    match self.text_type_norms_for(args).await {
                        Ok(norms) => Some(norms),
                        Err(err) => {
                            return (
                                QueryResult::FreqDistrib(FreqDistrib {
                                    error: Some(err.to_string()),
                                    ..Default::default()
                                }),
                                is_user_error(&err),
                            )
                        }
                    }
                } else {
                    None
                };
                match self.backend.freq_distrib(args, norms.as_ref()).await {
                    Ok(ans) => (QueryResult::FreqDistrib(ans), false),
                    Err(err) => (
                        QueryResult::FreqDistrib(FreqDistrib {
                            error: Some(err.to_string()),
                            ..Default::default()
                        }),
                        is_user_error(&err),
                    ),
                }
            }
            Operation::ConcSize(args) => match self.backend.conc_size(args).await {
                Ok(ans) => (QueryResult::ConcSize(ans), false),
                Err(err) => (
                    QueryResult::ConcSize(ConcSize {
                        error: Some(err.to_string()),
                        ..Default::default()
                    }),
                    is_user_error(&err),
                ),
            },
            Operation::CollFreqData(args) => match self.backend.coll_freq_data(args).await {
                Ok(ans) => (QueryResult::CollFreqData(ans), false),
                Err(err) => (
                    QueryResult::CollFreqData(CollFreqData {
                        error: Some(err.to_string()),
                    }),
                    is_user_error(&err),
                ),
            },
            Operation::TextTypeNorms(args) => match self.backend.text_type_norms(args).await {
                Ok(norms) => (
                    QueryResult::TextTypeNorms(TextTypeNorms {
                        corpus_path: args.corpus_path.clone(),
                        struct_attr: args.struct_attr.clone(),
                        norms,
                        error: None,
                    }),
                    false,
                ),
                Err(err) => (
                    QueryResult::TextTypeNorms(TextTypeNorms {
                        corpus_path: args.corpus_path.clone(),
                        struct_attr: args.struct_attr.clone(),
                        norms: HashMap::new(),
                        error: Some(err.to_string()),
                    }),
                    is_user_error(&err),
                ),
            },
            Operation::Unsupported => (
                QueryResult::Error(ErrorResult {
                    func: "unsupported".to_string(),
                    error: "unknown query function".to_string(),
                }),
                false,
            ),
        }
    }

    /// Fetch norms for a text-type criterion, populating the cache on miss
    async fn text_type_norms_for(
        &mut self,
        args: &FreqDistribArgs,
    ) -> Result<HashMap<String, i64>> {
        let attr = crit_attr(&args.crit).to_string();
        if let Some(hit) = self.norms.get(&args.corpus_path, &attr) {
            return Ok(hit.clone());
        }
        let norms = self
            .backend
            .text_type_norms(&corq_common::proto::TextTypeNormsArgs {
                corpus_path: args.corpus_path.clone(),
                struct_attr: attr.clone(),
            })
            .await?;
        self.norms.set(&args.corpus_path, &attr, norms.clone());
        Ok(norms)
    }

    /// Store the reply under the job channel with a bounded expiry and
    /// notify the waiting dispatcher. The payload of the notification is
    /// the storage key. At most one reply is ever produced per job.
    async fn publish_reply(
        &self,
        channel: &str,
        result: QueryResult,
        has_user_error: bool,
        job_log: &JobLog,
    ) -> Result<()> {
        let reply = WorkerReply {
            worker_id: self.id.clone(),
            proc_begin: job_log.begin,
            proc_end: job_log.end.unwrap_or_else(Utc::now),
            has_user_error,
            result,
        };
        debug!(
            worker_id = %self.id,
            channel = %channel,
            result_type = reply.result.type_tag(),
            "publishing result"
        );
        self.bus
            .put_with_expiry(channel, reply.to_bytes()?, self.result_ttl)
            .await?;
        self.bus.publish(channel, channel).await
    }

    fn log_performance(&self, job_log: &JobLog) {
        let Some(dir) = &self.performance_log_dir else {
            return;
        };
        let path = dir.join(format!("{}-job-logs.jsonl", self.id));
        let line = match job_log.to_json() {
            Ok(line) => line,
            Err(err) => {
                error!(error = %err, "failed to serialize job log");
                return;
            }
        };
        let appended = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(err) = appended {
            error!(error = %err, path = %path.display(), "failed to save worker performance");
        }
    }
}
