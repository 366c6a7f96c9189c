//! In-process message bus
//!
//! Backs the broker contract with tokio primitives: a mutex-guarded FIFO
//! queue, per-topic broadcast channels and a key/value map with expiry
//! deadlines purged lazily on access. Used by tests and by single-node
//! deployments where API and workers share one process tree.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Broker, Subscription};
use crate::error::Result;
use crate::proto::{DEFAULT_QUERY_CHANNEL, MSG_NEW_QUERY};

const TOPIC_CAPACITY: usize = 64;

pub struct MemoryBus {
    queue: Mutex<VecDeque<Vec<u8>>>,
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
    store: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    query_channel: String,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_query_channel(DEFAULT_QUERY_CHANNEL)
    }

    pub fn with_query_channel(query_channel: &str) -> Self {
        MemoryBus {
            queue: Mutex::new(VecDeque::new()),
            topics: Mutex::new(HashMap::new()),
            store: Mutex::new(HashMap::new()),
            query_channel: query_channel.to_string(),
        }
    }

    /// Lock the topic map, reclaiming channels nobody listens to anymore.
    /// Reply channels are single-use, so without this sweep the map would
    /// grow by one dead entry per processed job.
    fn topics_locked(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<String>>> {
        let mut topics = self.topics.lock().expect("bus topics lock poisoned");
        topics.retain(|_, sender| sender.receiver_count() > 0);
        topics
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBus {
    async fn enqueue(&self, payload: Vec<u8>) -> Result<()> {
        {
            let mut queue = self.queue.lock().expect("bus queue lock poisoned");
            queue.push_back(payload);
        }
        self.publish(&self.query_channel, MSG_NEW_QUERY).await
    }

    async fn dequeue(&self) -> Result<Option<Vec<u8>>> {
        let mut queue = self.queue.lock().expect("bus queue lock poisoned");
        Ok(queue.pop_front())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        // the receiver is created under the lock so a concurrent sweep
        // cannot replace the channel between insertion and subscription
        let mut topics = self.topics_locked();
        let rx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();
        Ok(Subscription::from_broadcast(rx))
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        // a topic without subscribers has no channel; publishing to it is
        // a no-op rather than a reason to allocate one
        let topics = self.topics_locked();
        if let Some(sender) = topics.get(topic) {
            let _ = sender.send(payload.to_string());
        }
        Ok(())
    }

    async fn put_with_expiry(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut store = self.store.lock().expect("bus store lock poisoned");
        // an abandoned reply is never read back, so each write also sweeps
        // whatever has expired in the meantime
        let now = Instant::now();
        store.retain(|_, (_, deadline)| *deadline > now);
        store.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut store = self.store.lock().expect("bus store lock poisoned");
        match store.get(key) {
            Some((_, deadline)) if *deadline <= Instant::now() => {
                store.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn num_subscribers(&self, topic: &str) -> Result<usize> {
        let topics = self.topics_locked();
        Ok(topics.get(topic).map_or(0, |s| s.receiver_count()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dequeue_respects_fifo_order() {
        let bus = MemoryBus::new();
        bus.enqueue(b"j1".to_vec()).await.unwrap();
        bus.enqueue(b"j2".to_vec()).await.unwrap();
        bus.enqueue(b"j3".to_vec()).await.unwrap();

        assert_eq!(bus.dequeue().await.unwrap(), Some(b"j1".to_vec()));
        assert_eq!(bus.dequeue().await.unwrap(), Some(b"j2".to_vec()));
        assert_eq!(bus.dequeue().await.unwrap(), Some(b"j3".to_vec()));
        assert_eq!(bus.dequeue().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_enqueue_notifies_query_topic() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe(DEFAULT_QUERY_CHANNEL).await.unwrap();
        bus.enqueue(b"j1".to_vec()).await.unwrap();
        assert_eq!(sub.recv().await.as_deref(), Some(MSG_NEW_QUERY));
    }

    #[tokio::test]
    async fn test_kv_expiry() {
        let bus = MemoryBus::new();
        bus.put_with_expiry("k", b"v".to_vec(), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(bus.get("k").await.unwrap(), Some(b"v".to_vec()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(bus.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_num_subscribers_drops_with_subscription() {
        let bus = MemoryBus::new();
        assert_eq!(bus.num_subscribers("t").await.unwrap(), 0);
        let sub = bus.subscribe("t").await.unwrap();
        assert_eq!(bus.num_subscribers("t").await.unwrap(), 1);
        drop(sub);
        assert_eq!(bus.num_subscribers("t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dead_reply_topics_are_reclaimed() {
        let bus = MemoryBus::new();
        let sub = bus.subscribe("corqResults:abandoned").await.unwrap();
        drop(sub);
        // the next topic access sweeps channels without receivers
        let _live = bus.subscribe("corqQueries").await.unwrap();
        let topics = bus.topics.lock().unwrap();
        assert!(!topics.contains_key("corqResults:abandoned"));
        assert!(topics.contains_key("corqQueries"));
    }

    #[tokio::test]
    async fn test_expired_unread_replies_are_swept_on_write() {
        let bus = MemoryBus::new();
        bus.put_with_expiry("corqResults:unread", b"v".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        // the abandoned value goes away without anyone ever reading it
        bus.put_with_expiry("corqResults:fresh", b"v".to_vec(), Duration::from_secs(600))
            .await
            .unwrap();
        let store = bus.store.lock().unwrap();
        assert!(!store.contains_key("corqResults:unread"));
        assert!(store.contains_key("corqResults:fresh"));
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = MemoryBus::new();
        let mut s1 = bus.subscribe("t").await.unwrap();
        let mut s2 = bus.subscribe("t").await.unwrap();
        bus.publish("t", "hello").await.unwrap();
        assert_eq!(s1.recv().await.as_deref(), Some("hello"));
        assert_eq!(s2.recv().await.as_deref(), Some("hello"));
    }
}
