//! Popup relay: reach the agent through a separately opened wallet window
//!
//! Outbound requests either open the wallet page or are posted to an
//! already-open popup. Inbound cross-window messages are only accepted when
//! they come from the configured wallet origin, carry the expected uid (when
//! they declare one) and, for requests with a body, name the same
//! contract/function as the request. Each registered listener fires at most
//! once and then unregisters.
//!
//! Window lifecycle and URL construction belong to the host (`WindowHost`).
//! A closed or unreachable popup is a silent non-delivery.

use crate::events::panic_message;
use crate::types::TransactionRequest;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Version marker attached to every message posted to the popup
pub const POPUP_PROTOCOL_VERSION: &str = "2.0";

/// Callback fired with the `data` of an accepted popup message
pub type PopupCallback = Box<dyn FnOnce(Value) + Send + 'static>;

/// A message received from another window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowMessage {
    /// Declared origin of the sending window
    pub origin: String,

    /// Message body
    #[serde(default)]
    pub data: Value,
}

impl WindowMessage {
    pub fn new(origin: impl Into<String>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }
}

/// Handle to an opened popup window
pub trait PopupWindow: Send + Sync {
    /// Whether the user closed the window
    fn is_closed(&self) -> bool;

    /// Post a message; returns false when it could not be delivered
    fn post_message(&self, message: &Value, target_origin: &str) -> bool;
}

/// Host environment that owns windows and URLs
pub trait WindowHost: Send + Sync {
    /// Open (or navigate) a named window; `None` when blocked
    fn open(&self, url: &str, window_name: &str) -> Option<Arc<dyn PopupWindow>>;

    /// Build the wallet page URL for the given query parameters
    fn wallet_url(&self, base: &str, params: &Map<String, Value>) -> String;

    /// Location of the dApp page, passed to the wallet as `origin`
    fn page_location(&self) -> String;
}

/// What `open_popup` did with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupDelivery {
    /// A new popup was opened at the URL
    Opened,
    /// The request was posted to the existing popup
    Posted,
    /// The window could not be opened or reached
    Undelivered,
}

/// Outcome of [`PopupRelay::open_popup`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupTicket {
    /// Listener id, for [`PopupRelay::cancel`]
    pub id: u64,
    pub delivery: PopupDelivery,
}

/// Cancels a pending popup listener on drop
pub struct ListenerGuard<'a> {
    relay: &'a PopupRelay,
    id: u64,
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        if self.relay.cancel(self.id) {
            tracing::debug!(listener = self.id, "Popup listener released unanswered");
        }
    }
}

struct PopupListener {
    id: u64,
    uid: String,
    request: Option<Map<String, Value>>,
    callback: PopupCallback,
}

impl PopupListener {
    fn accepts(&self, data: &Value) -> bool {
        match data.get("uid") {
            None | Some(Value::Null) => {}
            Some(Value::String(uid)) if uid.is_empty() || *uid == self.uid => {}
            Some(_) => return false,
        }

        if let (Some(request), Some(payload)) = (&self.request, data.get("payload")) {
            if request.get("contractName") != payload.get("contract")
                || request.get("methodName") != payload.get("function")
            {
                return false;
            }
        }
        true
    }
}

/// Relay between the controller and a popup-hosted wallet
pub struct PopupRelay {
    host: Arc<dyn WindowHost>,
    origin: String,
    window_name: String,
    popup: Mutex<Option<Arc<dyn PopupWindow>>>,
    listeners: Mutex<Vec<PopupListener>>,
    next_id: AtomicU64,
}

impl PopupRelay {
    pub fn new(host: Arc<dyn WindowHost>, origin: impl Into<String>, window_name: impl Into<String>) -> Self {
        Self {
            host,
            origin: origin.into(),
            window_name: window_name.into(),
            popup: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Wallet origin every inbound message must match
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn host(&self) -> &Arc<dyn WindowHost> {
        &self.host
    }

    /// Send a request through the popup and register a one-shot reply listener
    ///
    /// A new popup is opened when none is reachable, the request has no
    /// body (pure navigation), or the existing popup refuses the post;
    /// otherwise the body is posted to the existing popup as
    /// `{protocolVersion, uid, ...message}`. An undelivered request leaves
    /// no listener behind.
    pub fn open_popup(
        &self,
        url: &str,
        message: Option<Map<String, Value>>,
        uid: &str,
        callback: PopupCallback,
    ) -> PopupTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = message.as_ref().map(|body| {
            let mut envelope = Map::new();
            envelope.insert(
                "protocolVersion".to_string(),
                Value::String(POPUP_PROTOCOL_VERSION.to_string()),
            );
            envelope.insert("uid".to_string(), Value::String(uid.to_string()));
            for (key, value) in body {
                envelope.entry(key.clone()).or_insert_with(|| value.clone());
            }
            Value::Object(envelope)
        });

        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PopupListener {
                id,
                uid: uid.to_string(),
                request: message,
                callback,
            });

        let delivery = {
            let mut popup = self.popup.lock().unwrap_or_else(|e| e.into_inner());
            let reachable = popup.as_ref().filter(|w| !w.is_closed()).cloned();

            let posted = match (reachable, &envelope) {
                (Some(window), Some(envelope)) => {
                    let posted = window.post_message(envelope, &self.origin);
                    if !posted {
                        tracing::debug!(uid = %uid, "Popup refused the post, reopening");
                    }
                    posted
                }
                _ => false,
            };

            if posted {
                tracing::debug!(uid = %uid, listener = id, "Request posted to popup");
                PopupDelivery::Posted
            } else {
                match self.host.open(url, &self.window_name) {
                    Some(window) => {
                        *popup = Some(window);
                        tracing::debug!(uid = %uid, listener = id, "Popup opened");
                        PopupDelivery::Opened
                    }
                    None => {
                        tracing::debug!(uid = %uid, "Popup could not be opened");
                        PopupDelivery::Undelivered
                    }
                }
            }
        };

        if delivery == PopupDelivery::Undelivered {
            self.cancel(id);
        }
        PopupTicket { id, delivery }
    }

    /// Remove a listener that is still waiting; false if it already fired
    pub fn cancel(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        before != listeners.len()
    }

    /// Guard that cancels listener `id` when dropped
    pub fn cancel_on_drop(&self, id: u64) -> ListenerGuard<'_> {
        ListenerGuard { relay: self, id }
    }

    /// Route a cross-window message to matching listeners
    ///
    /// Returns how many listeners accepted it.
    pub fn deliver(&self, message: &WindowMessage) -> usize {
        if message.origin != self.origin {
            tracing::debug!(origin = %message.origin, "Discarding popup message from foreign origin");
            return 0;
        }

        let accepted: Vec<PopupListener> = {
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            let (accepted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *listeners)
                .into_iter()
                .partition(|l| l.accepts(&message.data));
            *listeners = kept;
            accepted
        };

        let count = accepted.len();
        for listener in accepted {
            let PopupListener { id, uid, callback, .. } = listener;
            let data = message.data.clone();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(move || callback(data))) {
                tracing::warn!(
                    uid = %uid,
                    listener = id,
                    panic = %panic_message(panic.as_ref()),
                    "Popup callback panicked"
                );
            }
        }
        count
    }

    /// Listeners still waiting for a reply
    pub fn pending(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Query parameters for a popup sign request
pub fn sign_params(tx: &TransactionRequest, page_location: &str) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("contractName".to_string(), Value::String(tx.contract_name.clone()));
    params.insert("methodName".to_string(), Value::String(tx.method_name.clone()));
    params.insert("stampLimit".to_string(), Value::String(tx.stamp_limit.to_string()));
    params.insert(
        "kwargs".to_string(),
        Value::String(Value::Object(tx.kwargs.clone()).to_string()),
    );
    params.insert("origin".to_string(), Value::String(page_location.to_string()));
    params.insert("type".to_string(), Value::String("sign".to_string()));
    params
}

/// Query parameters for a popup login
pub fn login_params(page_location: &str) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("origin".to_string(), Value::String(page_location.to_string()));
    params.insert("type".to_string(), Value::String("login".to_string()));
    params
}
