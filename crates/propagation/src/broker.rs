//! Broker abstraction and an in-process broker.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::BrokerError;

/// A consumed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

/// Where a published message landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes one message; messages sharing a key keep their relative order.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<Delivery, BrokerError>;
}

/// A consumer-group member with manual acknowledgment.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Waits up to `timeout` for the next message.
    async fn poll(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError>;

    /// Acknowledges `message` and everything before it on its partition.
    async fn commit(&self, message: &BrokerMessage) -> Result<(), BrokerError>;

    /// Rewinds to `message` so the next poll delivers it again.
    async fn reject(&self, message: &BrokerMessage) -> Result<(), BrokerError>;
}

#[async_trait]
impl<T: MessagePublisher + ?Sized> MessagePublisher for Arc<T> {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<Delivery, BrokerError> {
        (**self).publish(topic, key, payload).await
    }
}

#[async_trait]
impl<T: MessageConsumer + ?Sized> MessageConsumer for Box<T> {
    async fn poll(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        (**self).poll(timeout).await
    }

    async fn commit(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        (**self).commit(message).await
    }

    async fn reject(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        (**self).reject(message).await
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    key: Option<String>,
    payload: Vec<u8>,
}

#[derive(Default)]
struct BrokerState {
    topics: RwLock<HashMap<String, Vec<StoredMessage>>>,
    /// Committed next-offset per (group, topic).
    committed: Mutex<HashMap<(String, String), i64>>,
    unavailable: AtomicBool,
    published: Notify,
}

/// In-process broker with one partition per topic.
///
/// Consumers in the same group share committed offsets, so a consumer created
/// after a crash resumes from the last commit and sees uncommitted messages
/// again.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: publishes and polls fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn is_unavailable(&self) -> bool {
        self.state.unavailable.load(Ordering::SeqCst)
    }

    /// Subscribes a consumer to `topics`, starting at the group's committed offsets.
    pub async fn consumer(&self, group: &str, topics: &[&str]) -> InMemoryConsumer {
        let committed = self.state.committed.lock().await;
        let positions = topics
            .iter()
            .map(|topic| {
                let start = committed
                    .get(&(group.to_string(), topic.to_string()))
                    .copied()
                    .unwrap_or(0);
                (topic.to_string(), start)
            })
            .collect();

        InMemoryConsumer {
            broker: self.clone(),
            group: group.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            positions: Mutex::new(positions),
        }
    }

    /// Every message ever published to `topic`, in offset order.
    pub async fn messages(&self, topic: &str) -> Vec<BrokerMessage> {
        let topics = self.state.topics.read().await;
        topics
            .get(topic)
            .map(|log| {
                log.iter()
                    .enumerate()
                    .map(|(offset, m)| to_message(topic, offset as i64, m))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Appends a message without a key; used to feed captured rows.
    pub async fn append(&self, topic: &str, payload: Vec<u8>) -> Result<Delivery, BrokerError> {
        self.append_message(topic, None, payload).await
    }

    async fn append_message(
        &self,
        topic: &str,
        key: Option<String>,
        payload: Vec<u8>,
    ) -> Result<Delivery, BrokerError> {
        if self.is_unavailable() {
            return Err(BrokerError::Unavailable("in-memory broker is down".to_string()));
        }

        let mut topics = self.state.topics.write().await;
        let log = topics.entry(topic.to_string()).or_default();
        log.push(StoredMessage { key, payload });
        let offset = (log.len() - 1) as i64;
        drop(topics);

        self.state.published.notify_waiters();
        Ok(Delivery {
            partition: 0,
            offset,
        })
    }
}

fn to_message(topic: &str, offset: i64, stored: &StoredMessage) -> BrokerMessage {
    BrokerMessage {
        topic: topic.to_string(),
        key: stored.key.clone(),
        payload: stored.payload.clone(),
        partition: 0,
        offset,
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<Delivery, BrokerError> {
        self.append_message(topic, Some(key.to_string()), payload.to_vec())
            .await
    }
}

/// A consumer of an [`InMemoryBroker`].
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    group: String,
    topics: Vec<String>,
    /// Next offset to deliver per topic.
    positions: Mutex<HashMap<String, i64>>,
}

impl InMemoryConsumer {
    async fn next_message(&self) -> Option<BrokerMessage> {
        let topics = self.broker.state.topics.read().await;
        let mut positions = self.positions.lock().await;

        for topic in &self.topics {
            let position = positions.entry(topic.clone()).or_insert(0);
            if let Some(stored) = topics
                .get(topic)
                .and_then(|log| log.get(*position as usize))
            {
                let message = to_message(topic, *position, stored);
                *position += 1;
                return Some(message);
            }
        }
        None
    }

    fn check_subscribed(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        if self.topics.contains(&message.topic) {
            Ok(())
        } else {
            Err(BrokerError::UnknownTopic(message.topic.clone()))
        }
    }
}

#[async_trait]
impl MessageConsumer for InMemoryConsumer {
    async fn poll(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        if self.broker.is_unavailable() {
            return Err(BrokerError::Unavailable("in-memory broker is down".to_string()));
        }

        let published = self.broker.state.published.notified();
        tokio::pin!(published);
        published.as_mut().enable();

        if let Some(message) = self.next_message().await {
            return Ok(Some(message));
        }

        if tokio::time::timeout(timeout, published).await.is_err() {
            return Ok(None);
        }
        Ok(self.next_message().await)
    }

    async fn commit(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        self.check_subscribed(message)?;
        let mut committed = self.broker.state.committed.lock().await;
        committed.insert(
            (self.group.clone(), message.topic.clone()),
            message.offset + 1,
        );
        Ok(())
    }

    async fn reject(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        self.check_subscribed(message)?;
        let mut positions = self.positions.lock().await;
        positions.insert(message.topic.clone(), message.offset);
        Ok(())
    }
}
