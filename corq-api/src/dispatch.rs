//! Query dispatcher
//!
//! Sends one operation to the worker pool and awaits its single reply.
//! The reply channel is subscribed *before* the job is enqueued, so a
//! worker answering instantly cannot slip its notification past us.
//! Every wait carries a deadline; a vanished worker surfaces as a timeout
//! error instead of a hung request.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use uuid::Uuid;

use corq_common::bus::{Broker, Subscription};
use corq_common::error::{Error, Result};
use corq_common::proto::{Job, Operation, WorkerReply};
use corq_common::results::JobLog;

/// Sink for per-job status records produced when a reply arrives
pub trait StatusWriter: Send + Sync {
    fn write(&self, log: &JobLog);
}

/// Default status writer reporting through the tracing pipeline
pub struct TracingStatusWriter;

impl StatusWriter for TracingStatusWriter {
    fn write(&self, log: &JobLog) {
        match &log.err {
            Some(err) => error!(
                worker_id = %log.worker_id,
                func = %log.func,
                error = %err,
                "job finished with error"
            ),
            None => info!(
                worker_id = %log.worker_id,
                func = %log.func,
                "job finished"
            ),
        }
    }
}

pub struct Dispatcher {
    bus: Arc<dyn Broker>,
    result_prefix: String,
    reply_timeout: Duration,
    status: Arc<dyn StatusWriter>,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn Broker>, result_prefix: String, reply_timeout: Duration) -> Self {
        Self::with_status_writer(bus, result_prefix, reply_timeout, Arc::new(TracingStatusWriter))
    }

    pub fn with_status_writer(
        bus: Arc<dyn Broker>,
        result_prefix: String,
        reply_timeout: Duration,
        status: Arc<dyn StatusWriter>,
    ) -> Self {
        Dispatcher {
            bus,
            result_prefix,
            reply_timeout,
            status,
        }
    }

    /// Enqueue one operation under a fresh single-use reply channel
    pub async fn submit(&self, op: Operation) -> Result<ResultHandle> {
        let channel = format!("{}:{}", self.result_prefix, Uuid::new_v4());
        // subscribe first; enqueueing before the subscription exists could
        // lose the reply notification of a fast worker
        let sub = self.bus.subscribe(&channel).await?;
        let func = op.tag().to_string();
        let job = Job {
            channel: channel.clone(),
            result_hint: Some(op.result_tag().to_string()),
            op,
        };
        self.bus.enqueue(job.to_bytes()?).await?;
        Ok(ResultHandle {
            bus: Arc::clone(&self.bus),
            status: Arc::clone(&self.status),
            channel,
            func,
            sub,
            timeout: self.reply_timeout,
        })
    }

    pub async fn submit_and_wait(&self, op: Operation) -> Result<WorkerReply> {
        self.submit(op).await?.wait().await
    }

    /// Whether anyone still awaits a reply on the given channel. Racy by
    /// nature; only usable as an optimization to skip doomed work.
    pub async fn has_active_listener(&self, channel: &str) -> Result<bool> {
        Ok(self.bus.num_subscribers(channel).await? > 0)
    }
}

/// Pending reply of one submitted job
pub struct ResultHandle {
    bus: Arc<dyn Broker>,
    status: Arc<dyn StatusWriter>,
    channel: String,
    func: String,
    sub: Subscription,
    timeout: Duration,
}

impl ResultHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Await the worker's reply. Consumes the handle; dropping the handle
    /// (and with it the subscription) is how a caller abandons a job.
    pub async fn wait(mut self) -> Result<WorkerReply> {
        let secs = self.timeout.as_secs();
        let key = tokio::time::timeout(self.timeout, self.sub.recv())
            .await
            .map_err(|_| Error::Timeout(secs))?
            .ok_or_else(|| Error::Bus(format!("reply channel {} closed", self.channel)))?;
        let raw = self
            .bus
            .get(&key)
            .await?
            .ok_or_else(|| Error::MissingResult(format!("no stored reply under {}", key)))?;
        let reply = WorkerReply::from_bytes(&raw)?;
        self.status.write(&JobLog {
            worker_id: reply.worker_id.clone(),
            func: self.func.clone(),
            begin: reply.proc_begin,
            end: Some(reply.proc_end),
            err: reply.result.err().map(str::to_string),
        });
        Ok(reply)
    }
}
