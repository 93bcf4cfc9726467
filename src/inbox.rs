//! "Await the next inbound message matching P" primitive
//!
//! The dispatch loop hands every processed inbound message to the `Inbox`.
//! A caller that needs a reply takes an `InboxWatch` *before* publishing its
//! request, then awaits the first message matching a predicate, optionally
//! bounded by a timeout. Dropping the watch unregisters it.

use crate::error::{Result, WalletError};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// An inbound agent message, after state reconciliation
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Status(Value),
    TxStatus(Value),
    AuthResponse(Value),
}

impl Inbound {
    /// Raw message body
    pub fn detail(&self) -> &Value {
        match self {
            Inbound::Status(v) | Inbound::TxStatus(v) | Inbound::AuthResponse(v) => v,
        }
    }

    pub fn into_detail(self) -> Value {
        match self {
            Inbound::Status(v) | Inbound::TxStatus(v) | Inbound::AuthResponse(v) => v,
        }
    }

    pub fn is_status(&self) -> bool {
        matches!(self, Inbound::Status(_))
    }
}

/// Fan-out point for processed inbound messages
pub struct Inbox {
    tx: broadcast::Sender<Inbound>,
}

impl Inbox {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Start watching; only messages delivered after this call are seen
    pub fn watch(&self) -> InboxWatch {
        InboxWatch {
            rx: self.tx.subscribe(),
        }
    }

    /// Hand a message to every active watch; returns how many saw it
    pub fn deliver(&self, message: Inbound) -> usize {
        self.tx.send(message).unwrap_or(0)
    }

    /// Number of active watches
    pub fn watchers(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A registered interest in future inbound messages
pub struct InboxWatch {
    rx: broadcast::Receiver<Inbound>,
}

impl InboxWatch {
    /// Wait for the first message satisfying `predicate`
    ///
    /// Non-matching messages are skipped. With a timeout, returns
    /// `WalletError::Timeout` if nothing matches in time.
    pub async fn next_matching<F>(&mut self, mut predicate: F, timeout: Option<Duration>) -> Result<Inbound>
    where
        F: FnMut(&Inbound) -> bool,
    {
        let rx = &mut self.rx;
        let wait = async move {
            loop {
                match rx.recv().await {
                    Ok(message) if predicate(&message) => return Ok(message),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Inbox watch lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => {
                        return Err(WalletError::Closed("inbox closed".to_string()));
                    }
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                WalletError::Timeout(format!("no matching message within {}ms", limit.as_millis()))
            })?,
            None => wait.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_skips_non_matching() {
        let inbox = Inbox::new(16);
        let mut watch = inbox.watch();

        inbox.deliver(Inbound::TxStatus(json!({"uid": "a"})));
        inbox.deliver(Inbound::Status(json!({"locked": true})));

        let message = watch.next_matching(Inbound::is_status, None).await.unwrap();
        assert_eq!(message.detail()["locked"], true);
    }

    #[tokio::test]
    async fn test_only_sees_messages_after_watch() {
        let inbox = Inbox::new(16);
        inbox.deliver(Inbound::Status(json!({"n": 1})));

        let mut watch = inbox.watch();
        inbox.deliver(Inbound::Status(json!({"n": 2})));

        let message = watch.next_matching(|_| true, None).await.unwrap();
        assert_eq!(message.into_detail()["n"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let inbox = Inbox::new(16);
        let mut watch = inbox.watch();

        let err = watch
            .next_matching(|_| true, Some(Duration::from_millis(250)))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let inbox = Inbox::new(16);
        let watch = inbox.watch();
        assert_eq!(inbox.watchers(), 1);
        drop(watch);
        assert_eq!(inbox.watchers(), 0);
        assert_eq!(inbox.deliver(Inbound::Status(Value::Null)), 0);
    }
}
