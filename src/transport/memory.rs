//! In-memory transport for testing and single-process use
//!
//! One tokio broadcast channel per topic. The same handle serves both sides
//! of the conversation: the controller and a scripted agent can each publish
//! and subscribe. Messages published to a topic with no subscribers are
//! dropped, matching the fire-and-forget semantics of real agent channels.

use super::{AgentMessage, AgentTransport, Subscription};
use crate::error::{Result, WalletError};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

/// Configuration for the in-memory transport
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Per-topic channel capacity before slow subscribers lag
    pub capacity: usize,

    /// Maximum number of published messages kept for `history()`
    pub max_history: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_history: 10_000,
        }
    }
}

#[derive(Default)]
struct Topics {
    senders: HashMap<String, broadcast::Sender<AgentMessage>>,
    history: Vec<AgentMessage>,
    closed: bool,
}

/// In-memory transport, cheap to clone
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<RwLock<Topics>>,
    config: MemoryConfig,
}

impl MemoryTransport {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Topics::default())),
            config,
        }
    }

    /// Messages published so far, optionally filtered by topic (oldest first)
    pub fn history(&self, topic: Option<&str>) -> Vec<AgentMessage> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .history
            .iter()
            .filter(|m| topic.map_or(true, |t| m.topic == t))
            .cloned()
            .collect()
    }

    /// Drop every channel; open subscriptions end with `None`
    pub fn close(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.senders.clear();
        inner.closed = true;
    }

    fn sender(&self, topic: &str) -> Result<broadcast::Sender<AgentMessage>> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return Err(WalletError::Closed("memory transport closed".to_string()));
        }
        let capacity = self.config.capacity;
        Ok(inner
            .senders
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .clone())
    }
}

#[async_trait]
impl AgentTransport for MemoryTransport {
    async fn publish(&self, topic: &str, detail: Value) -> Result<()> {
        let message = AgentMessage::new(topic, detail);
        let sender = self.sender(topic).map_err(|e| WalletError::Publish {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.history.push(message.clone());
            if self.config.max_history > 0 && inner.history.len() > self.config.max_history {
                let drain_count = inner.history.len() - self.config.max_history;
                inner.history.drain(..drain_count);
            }
        }

        // No receivers is not an error: nobody was listening
        let receivers = sender.send(message).unwrap_or(0);
        tracing::debug!(topic = %topic, receivers, "Message published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        let sender = self.sender(topic).map_err(|e| WalletError::Subscribe {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(MemorySubscription {
            topic: topic.to_string(),
            stream: BroadcastStream::new(sender.subscribe()),
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Subscription on one in-memory topic
pub struct MemorySubscription {
    topic: String,
    stream: BroadcastStream<AgentMessage>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<AgentMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(message)) => return Ok(Some(message)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(topic = %self.topic, skipped, "Subscriber lagged, messages dropped");
                }
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let transport = MemoryTransport::default();
        let mut sub = transport.subscribe("lamdenWalletInfo").await.unwrap();

        transport
            .publish("lamdenWalletInfo", json!({"locked": false}))
            .await
            .unwrap();

        let message = sub.next().await.unwrap().unwrap();
        assert_eq!(message.topic, "lamdenWalletInfo");
        assert_eq!(message.detail["locked"], false);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let transport = MemoryTransport::default();
        let mut info = transport.subscribe("info").await.unwrap();

        transport.publish("tx", json!(1)).await.unwrap();
        transport.publish("info", json!(2)).await.unwrap();

        assert_eq!(info.next().await.unwrap().unwrap().detail, json!(2));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let transport = MemoryTransport::default();
        transport.publish("nobody", Value::Null).await.unwrap();
        assert_eq!(transport.history(Some("nobody")).len(), 1);
    }

    #[tokio::test]
    async fn test_history_filter_and_cap() {
        let transport = MemoryTransport::new(MemoryConfig {
            capacity: 16,
            max_history: 3,
        });
        for i in 0..5 {
            transport.publish("a", json!(i)).await.unwrap();
        }
        transport.publish("b", json!("x")).await.unwrap();

        let all = transport.history(None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].detail, json!(3));
        assert_eq!(transport.history(Some("b")).len(), 1);
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let transport = MemoryTransport::default();
        let mut sub = transport.subscribe("info").await.unwrap();
        transport.close();

        assert!(sub.next().await.unwrap().is_none());
        assert!(transport.publish("info", Value::Null).await.is_err());
        assert!(transport.subscribe("info").await.is_err());
    }
}
