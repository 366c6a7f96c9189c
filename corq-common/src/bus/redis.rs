//! Redis-backed message bus
//!
//! Maps the broker contract onto plain Redis primitives: LPUSH/RPOP for the
//! work queue, PUBLISH/SUBSCRIBE for notifications, SET with EX for stored
//! replies and PUBSUB NUMSUB for the listener probe. No broker-specific
//! features beyond these are used, so any Redis-compatible store works.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{Broker, Subscription};
use crate::error::{Error, Result};
use crate::proto::MSG_NEW_QUERY;

const FORWARD_CAPACITY: usize = 16;

pub struct RedisBus {
    client: redis::Client,
    conn: MultiplexedConnection,
    queue_key: String,
    query_channel: String,
}

impl RedisBus {
    pub async fn connect(url: &str, queue_key: &str, query_channel: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(RedisBus {
            client,
            conn,
            queue_key: queue_key.to_string(),
            query_channel: query_channel.to_string(),
        })
    }

    /// Ping the server until it responds or the timeout elapses; used at
    /// process startup so workers can come up before the broker does
    pub async fn wait_for_server(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut tick = tokio::time::interval(Duration::from_secs(2));
        tick.tick().await;
        loop {
            tick.tick().await;
            info!("waiting for Redis server...");
            let mut conn = self.conn.clone();
            match redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
            {
                Ok(_) => {
                    info!("successfully connected to Redis server");
                    return Ok(());
                }
                Err(err) => {
                    warn!(error = %err, "...failed to get response from Redis server");
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::Bus(format!(
                    "failed to connect to the Redis server within {:?}",
                    timeout
                )));
            }
        }
    }
}

#[async_trait]
impl Broker for RedisBus {
    async fn enqueue(&self, payload: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(&self.queue_key, payload).await?;
        self.publish(&self.query_channel, MSG_NEW_QUERY).await
    }

    async fn dequeue(&self) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.rpop(&self.queue_key, None).await?;
        Ok(value)
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        let (tx, rx) = mpsc::channel(FORWARD_CAPACITY);
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let topic = topic.to_string();

        // the forwarding task owns the pub/sub connection; dropping the
        // subscription resolves the cancel future, which unsubscribes and
        // thereby makes the listener count drop promptly
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    msg = stream.next() => match msg {
                        Some(msg) => {
                            let payload: String = msg.get_payload().unwrap_or_default();
                            if tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
            drop(stream);
            if let Err(err) = pubsub.unsubscribe(&topic).await {
                debug!(topic = %topic, error = %err, "failed to unsubscribe");
            }
        });

        Ok(Subscription::from_forwarded(rx, cancel_tx))
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(topic, payload).await?;
        Ok(())
    }

    async fn put_with_expiry(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn num_subscribers(&self, topic: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let counts: std::collections::HashMap<String, usize> = redis::cmd("PUBSUB")
            .arg("NUMSUB")
            .arg(topic)
            .query_async(&mut conn)
            .await?;
        Ok(counts.get(topic).copied().unwrap_or(0))
    }
}
