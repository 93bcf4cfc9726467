//! Local named-topic event emitter
//!
//! Fans out state changes to consumers of the controller. Delivery is
//! synchronous, in registration order, on the caller's thread. A listener
//! that panics is logged and skipped; the remaining listeners still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Topics emitted by [`WalletController`](crate::WalletController)
pub mod topics {
    /// Agent status changed (raw status message)
    pub const INFO: &str = "newInfo";
    /// Transaction status received (raw transaction-status message)
    pub const TX_STATUS: &str = "txStatus";
    /// Authentication finished (response or `{"errors": [...]}`)
    pub const AUTH_RESULT: &str = "authResult";
    /// Discovery found the agent
    pub const INSTALLED: &str = "installed";
}

/// Handle returned by [`EventEmitter::on`], used to unregister
pub type ListenerId = u64;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Named-topic publish/subscribe for in-process listeners
pub struct EventEmitter<T = serde_json::Value> {
    listeners: RwLock<HashMap<String, Vec<(ListenerId, Listener<T>)>>>,
    next_id: AtomicU64,
}

impl<T> EventEmitter<T> {
    /// Create an emitter with no listeners
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener for a topic
    pub fn on(&self, topic: &str, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener; returns false if it was not registered
    pub fn off(&self, topic: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = listeners.get_mut(topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(topic);
        }
        removed
    }

    /// Invoke every listener of `topic` with `payload`
    ///
    /// Returns how many listeners completed without panicking. Listeners
    /// added or removed during the emit take effect on the next one.
    pub fn emit(&self, topic: &str, payload: &T) -> usize {
        let snapshot: Vec<Listener<T>> = {
            let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            match listeners.get(topic) {
                Some(entries) => entries.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    tracing::warn!(
                        topic = %topic,
                        panic = %panic_message(panic.as_ref()),
                        "Event listener panicked"
                    );
                }
            }
        }
        delivered
    }

    /// Number of listeners registered for a topic
    pub fn listener_count(&self, topic: &str) -> usize {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        listeners.get(topic).map_or(0, Vec::len)
    }
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
