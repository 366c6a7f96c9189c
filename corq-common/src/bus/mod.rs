//! Message bus abstraction
//!
//! Any broker offering three primitives satisfies the CORQ protocol:
//! a durable FIFO work queue, topic publish/subscribe, and short-lived
//! key/value storage with expiry. `MemoryBus` serves tests and single-node
//! deployments; `RedisBus` is the production adapter.
//!
//! Ordering is guaranteed within the shared work queue only — never across
//! reply channels.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::info;

use crate::config::{BusBackend, BusConfig};
use crate::error::{Error, Result};

pub use self::memory::MemoryBus;
pub use self::redis::RedisBus;

/// How long a starting process waits for the broker to come up
const SERVER_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the broker selected by configuration. For Redis this also waits
/// for the server, so processes may start in any order.
pub async fn open(conf: &BusConfig) -> Result<Arc<dyn Broker>> {
    match conf.backend {
        BusBackend::Memory => {
            info!("using in-process message bus");
            Ok(Arc::new(MemoryBus::with_query_channel(
                &conf.query_channel(),
            )))
        }
        BusBackend::Redis => {
            let url = conf
                .url
                .as_deref()
                .ok_or_else(|| Error::Config("bus.url is required for redis".to_string()))?;
            let bus = RedisBus::connect(url, &conf.queue_key(), &conf.query_channel()).await?;
            bus.wait_for_server(SERVER_WAIT_TIMEOUT).await?;
            Ok(Arc::new(bus))
        }
    }
}

/// Broker contract consumed by the dispatcher and the worker loop
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a job to the tail of the shared work queue and publish a
    /// "new job available" notification on the query topic
    async fn enqueue(&self, payload: Vec<u8>) -> Result<()>;

    /// Pop from the queue head; `None` when the queue is empty
    async fn dequeue(&self) -> Result<Option<Vec<u8>>>;

    /// Subscribe to a topic; the subscription is released by dropping it
    async fn subscribe(&self, topic: &str) -> Result<Subscription>;

    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    async fn put_with_expiry(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Number of current subscribers of a topic. Inherently racy — a
    /// listener may disconnect right after the check — so callers must
    /// treat it as a best-effort optimization, never a correctness
    /// guarantee.
    async fn num_subscribers(&self, topic: &str) -> Result<usize>;
}

/// A live subscription to one topic; dropping it tears the channel down
pub struct Subscription {
    kind: SubscriptionKind,
    // dropped together with the subscription, stopping a forwarding task
    _cancel: Option<oneshot::Sender<()>>,
}

enum SubscriptionKind {
    Broadcast(broadcast::Receiver<String>),
    Forwarded(mpsc::Receiver<String>),
}

impl Subscription {
    pub(crate) fn from_broadcast(rx: broadcast::Receiver<String>) -> Self {
        Subscription {
            kind: SubscriptionKind::Broadcast(rx),
            _cancel: None,
        }
    }

    pub(crate) fn from_forwarded(rx: mpsc::Receiver<String>, cancel: oneshot::Sender<()>) -> Self {
        Subscription {
            kind: SubscriptionKind::Forwarded(rx),
            _cancel: Some(cancel),
        }
    }

    /// Receive the next notification; `None` when the topic is gone
    pub async fn recv(&mut self) -> Option<String> {
        match &mut self.kind {
            SubscriptionKind::Broadcast(rx) => loop {
                match rx.recv().await {
                    Ok(v) => return Some(v),
                    // a worker mid-job may miss notifications; the polling
                    // tick covers the gap, so lagging is not fatal
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            SubscriptionKind::Forwarded(rx) => rx.recv().await,
        }
    }
}
