//! Correlation registry: pending transaction handlers keyed by uid
//!
//! A handler is removed from the registry *before* it runs, so a uid can
//! never fire twice: a duplicate delivery finds nothing to call, and a
//! handler that panics leaves no stale entry behind.

use crate::events::panic_message;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

/// Completion handler for one outstanding request
pub type TxCallback = Box<dyn FnOnce(Value) + Send + 'static>;

/// Outcome of routing a response to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler was found, removed, and ran to completion
    Delivered,
    /// A handler was found and removed but panicked
    HandlerPanicked,
    /// No handler is registered under the uid
    Miss,
}

/// Map of uid → pending completion handler
#[derive(Default)]
pub struct PendingRequests {
    handlers: Mutex<HashMap<String, TxCallback>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; a previous handler under the same uid is replaced
    pub fn register(&self, uid: impl Into<String>, handler: TxCallback) {
        let uid = uid.into();
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        if handlers.insert(uid.clone(), handler).is_some() {
            tracing::warn!(uid = %uid, "Replaced pending handler for duplicate uid");
        }
    }

    /// Remove and return the handler for a uid
    pub fn take(&self, uid: &str) -> Option<TxCallback> {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.remove(uid)
    }

    /// Route a response to its handler, invoking it at most once
    pub fn resolve(&self, uid: &str, message: Value) -> Dispatch {
        let Some(handler) = self.take(uid) else {
            tracing::debug!(uid = %uid, "No pending handler for response");
            return Dispatch::Miss;
        };

        match catch_unwind(AssertUnwindSafe(move || handler(message))) {
            Ok(()) => {
                tracing::debug!(uid = %uid, "Pending handler resolved");
                Dispatch::Delivered
            }
            Err(panic) => {
                tracing::warn!(
                    uid = %uid,
                    panic = %panic_message(panic.as_ref()),
                    "Pending handler panicked"
                );
                Dispatch::HandlerPanicked
            }
        }
    }

    pub fn contains(&self, uid: &str) -> bool {
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.contains_key(uid)
    }

    /// Number of requests still awaiting a response
    pub fn len(&self) -> usize {
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
