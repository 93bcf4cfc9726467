//! Agent transport trait: the pub/sub channel to the wallet agent
//!
//! The transport is an external collaborator: a host page's custom-event
//! bus, a native messaging port, or the in-memory implementation used in
//! tests. Delivery is at-most-once with no ordering guarantee across
//! distinct topics.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod memory;

/// A message on a named topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Topic (event name) the message was published on
    pub topic: String,

    /// Message body; `null` for bare signals such as get-status
    #[serde(default)]
    pub detail: Value,
}

impl AgentMessage {
    pub fn new(topic: impl Into<String>, detail: Value) -> Self {
        Self {
            topic: topic.into(),
            detail,
        }
    }
}

/// Core trait for agent transports
///
/// Implementations only move messages; correlation and state live in the
/// controller.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Fire-and-forget publish
    async fn publish(&self, topic: &str, detail: Value) -> Result<()>;

    /// Subscribe to every future message on a topic
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>>;

    /// Transport name (e.g., "memory", "dom-events")
    fn name(&self) -> &str;
}

/// Async subscription handle for receiving messages
#[async_trait]
pub trait Subscription: Send {
    /// Receive the next message; `None` once the transport is closed
    async fn next(&mut self) -> Result<Option<AgentMessage>>;
}
