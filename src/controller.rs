//! Wallet controller: discovery, connection, transactions and authentication
//!
//! `WalletController` owns the transport subscriptions (between `start()`
//! and `stop()`), the reconciled `AgentState`, the correlation registry for
//! transaction callbacks, and the local event emitter. Inbound messages are
//! processed by a single dispatch task; request/response flows wait on the
//! shared `Inbox`.

use crate::auth::{answers_challenge, check_response, validate_challenge};
use crate::config::{AgentMode, WalletConfig};
use crate::error::{Result, WalletError};
use crate::events::{panic_message, topics, EventEmitter};
use crate::inbox::{Inbound, Inbox};
use crate::popup::{
    login_params, sign_params, ListenerGuard, PopupDelivery, PopupRelay, PopupTicket, WindowHost,
    WindowMessage,
};
use crate::registry::{Dispatch, PendingRequests, TxCallback};
use crate::state::AgentState;
use crate::transport::{AgentTransport, Subscription};
use crate::types::{AuthRequest, ConnectionRequest, StatusMessage, TaggedTransaction, TransactionRequest, TxStatusData};
use crate::uid::{TimestampUid, UidGenerator};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// Callback for [`WalletController::auth`]
pub type AuthCallback = Box<dyn FnOnce(std::result::Result<&Value, &WalletError>) + Send + 'static>;

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Inner {
    transport: Box<dyn AgentTransport>,
    config: WalletConfig,
    state: RwLock<AgentState>,
    request: RwLock<Option<ConnectionRequest>>,
    pending: PendingRequests,
    events: EventEmitter<Value>,
    inbox: Inbox,
    uids: Box<dyn UidGenerator>,
    popup: Option<PopupRelay>,
    running: AtomicBool,
    lifecycle: Mutex<Option<Running>>,
}

impl Inner {
    async fn publish(&self, topic: &str, detail: Value) -> Result<()> {
        if let Err(e) = self.transport.publish(topic, detail).await {
            tracing::warn!(topic = %topic, error = %e, "Publish to agent failed");
            return Err(e);
        }
        tracing::debug!(topic = %topic, transport = %self.transport.name(), "Published to agent");
        Ok(())
    }

    async fn publish_connection(&self, request: &ConnectionRequest) -> Result<()> {
        let payload = request.to_wire_json()?;
        self.publish(&self.config.topics.connect, Value::String(payload))
            .await?;
        tracing::info!(
            app = %request.app_name(),
            contract = %request.contract_name(),
            network = %request.network_name(),
            "Connection request sent"
        );
        Ok(())
    }

    /// Fold a status message into state, then notify listeners and waiters
    fn handle_status(&self, detail: Value) {
        let status: StatusMessage = serde_json::from_value(detail.clone()).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Status message has unexpected shape");
            StatusMessage::default()
        });

        {
            let request = self.request.read().unwrap_or_else(|e| e.into_inner());
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.apply_status(&status, request.as_ref());
            tracing::debug!(
                installed = ?state.installed(),
                locked = ?state.locked(),
                approved = state.approved(),
                "Agent state updated"
            );
        }

        self.events.emit(topics::INFO, &detail);
        self.inbox.deliver(Inbound::Status(detail));
    }

    /// Route a transaction status to its pending handler, then broadcast it
    fn handle_tx_status(&self, detail: Value) {
        let uid = detail
            .get("data")
            .and_then(|data| serde_json::from_value::<TxStatusData>(data.clone()).ok())
            .and_then(|data| data.correlation_uid());

        if let Some(uid) = uid {
            if self.pending.resolve(&uid, detail.clone()) == Dispatch::Miss {
                tracing::debug!(uid = %uid, "Transaction status matched no pending request");
            }
        }

        self.events.emit(topics::TX_STATUS, &detail);
        self.inbox.deliver(Inbound::TxStatus(detail));
    }

    fn handle_auth_response(&self, detail: Value) {
        self.inbox.deliver(Inbound::AuthResponse(detail));
    }

    fn relay(&self) -> Result<&PopupRelay> {
        self.popup
            .as_ref()
            .ok_or_else(|| WalletError::Config("Popup mode requires a window host".to_string()))
    }
}

#[derive(Clone, Copy)]
enum InboundKind {
    Status,
    TxStatus,
    AuthResponse,
}

async fn dispatch_loop(
    inner: Weak<Inner>,
    mut info: Box<dyn Subscription>,
    mut tx_status: Box<dyn Subscription>,
    mut auth: Box<dyn Subscription>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let (kind, next) = tokio::select! {
            _ = &mut shutdown => break,
            next = info.next() => (InboundKind::Status, next),
            next = tx_status.next() => (InboundKind::TxStatus, next),
            next = auth.next() => (InboundKind::AuthResponse, next),
        };

        let message = match next {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::info!("Agent transport closed, dispatch loop exiting");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Agent subscription failed, dispatch loop exiting");
                break;
            }
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        match kind {
            InboundKind::Status => inner.handle_status(message.detail),
            InboundKind::TxStatus => inner.handle_tx_status(message.detail),
            InboundKind::AuthResponse => inner.handle_auth_response(message.detail),
        }
    }
}

/// Builder for [`WalletController`]
pub struct WalletControllerBuilder {
    transport: Box<dyn AgentTransport>,
    config: WalletConfig,
    uids: Option<Box<dyn UidGenerator>>,
    popup_host: Option<Arc<dyn WindowHost>>,
    request: Option<ConnectionRequest>,
}

impl WalletControllerBuilder {
    pub fn config(mut self, config: WalletConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default timestamp+sequence uid generator
    pub fn uid_generator(mut self, uids: impl UidGenerator + 'static) -> Self {
        self.uids = Some(Box::new(uids));
        self
    }

    /// Window host for the popup wallet (required in popup mode)
    pub fn popup_host(mut self, host: Arc<dyn WindowHost>) -> Self {
        self.popup_host = Some(host);
        self
    }

    /// Connection request to store up front
    pub fn connection_request(mut self, request: ConnectionRequest) -> Self {
        self.request = Some(request);
        self
    }

    pub fn build(self) -> Result<WalletController> {
        if self.config.mode == AgentMode::Popup && self.popup_host.is_none() {
            return Err(WalletError::Config(
                "Popup mode requires a window host".to_string(),
            ));
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> WalletController {
        let popup = self.popup_host.map(|host| {
            PopupRelay::new(host, &self.config.popup_origin, &self.config.popup_window)
        });

        WalletController {
            inner: Arc::new(Inner {
                transport: self.transport,
                inbox: Inbox::new(self.config.inbox_capacity),
                config: self.config,
                state: RwLock::new(AgentState::new()),
                request: RwLock::new(self.request),
                pending: PendingRequests::new(),
                events: EventEmitter::new(),
                uids: self.uids.unwrap_or_else(|| Box::new(TimestampUid::default())),
                popup,
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(None),
            }),
        }
    }
}

/// Client-side controller for an external wallet agent
///
/// Cheap to clone; clones share state and subscriptions.
#[derive(Clone)]
pub struct WalletController {
    inner: Arc<Inner>,
}

impl WalletController {
    /// Controller for an extension agent with default configuration
    pub fn new(transport: impl AgentTransport + 'static) -> Self {
        Self::builder(transport).assemble()
    }

    pub fn builder(transport: impl AgentTransport + 'static) -> WalletControllerBuilder {
        WalletControllerBuilder {
            transport: Box::new(transport),
            config: WalletConfig::default(),
            uids: None,
            popup_host: None,
            request: None,
        }
    }

    /// Subscribe to the agent's inbound topics and start dispatching
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(WalletError::Config("Controller already started".to_string()));
        }

        let topics = &self.inner.config.topics;
        let info = self.inner.transport.subscribe(&topics.info).await?;
        let tx_status = self.inner.transport.subscribe(&topics.tx_status).await?;
        let auth = self.inner.transport.subscribe(&topics.auth_response).await?;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(dispatch_loop(
            Arc::downgrade(&self.inner),
            info,
            tx_status,
            auth,
            shutdown_rx,
        ));

        *lifecycle = Some(Running { shutdown, task });
        self.inner.running.store(true, Ordering::SeqCst);

        tracing::info!(
            transport = %self.inner.transport.name(),
            mode = ?self.inner.config.mode,
            "Wallet controller started"
        );
        Ok(())
    }

    /// Drop the transport subscriptions; pending callbacks stay registered
    pub async fn stop(&self) -> Result<()> {
        let running = self.inner.lifecycle.lock().await.take();
        self.inner.running.store(false, Ordering::SeqCst);

        if let Some(Running { shutdown, task }) = running {
            let _ = shutdown.send(());
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Dispatch task ended abnormally");
            }
            tracing::info!("Wallet controller stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn ensure_started(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(WalletError::Config(
                "Controller not started; call start() first".to_string(),
            ))
        }
    }

    /// Ask the agent for its status without waiting for the reply
    pub async fn get_info(&self) -> Result<()> {
        self.inner
            .publish(&self.inner.config.topics.get_info, Value::Null)
            .await
    }

    /// Discover whether an agent is present
    ///
    /// Extension mode races a status reply against the discovery timeout;
    /// no reply is a normal `false`. A reply that arrives later is still
    /// applied to the state. Popup mode runs the login flow instead.
    pub async fn check_installed(&self) -> Result<bool> {
        let (timeout, mut watch, _login) = match self.inner.config.mode {
            AgentMode::Extension => {
                self.ensure_started()?;
                let watch = self.inner.inbox.watch();
                self.get_info().await?;
                (Some(self.inner.config.discovery_timeout()), watch, None)
            }
            AgentMode::Popup => {
                let watch = self.inner.inbox.watch();
                let Some(login) = self.guarded_login()? else {
                    return Ok(false);
                };
                (self.inner.config.popup_timeout(), watch, Some(login))
            }
        };

        match watch.next_matching(Inbound::is_status, timeout).await {
            Ok(_) => {}
            Err(WalletError::Timeout(_)) => {
                tracing::debug!("No wallet agent answered discovery");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
        drop(watch);

        self.inner
            .state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .mark_installed();

        if self.inner.config.mode == AgentMode::Extension {
            tracing::info!("Wallet agent installed");
            self.inner.events.emit(topics::INSTALLED, &Value::Bool(true));

            let stored = self.connection_request();
            if let (true, Some(request)) = (self.inner.config.auto_connect, stored) {
                if let Err(e) = self.inner.publish_connection(&request).await {
                    tracing::warn!(error = %e, "Auto-connect after discovery failed");
                }
            }
        }
        Ok(true)
    }

    /// Store a connection request without sending it
    pub fn store_connection_request(&self, request: ConnectionRequest) {
        let mut stored = self.inner.request.write().unwrap_or_else(|e| e.into_inner());
        let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
        state.recompute(Some(&request));
        *stored = Some(request);
    }

    /// Send the connection request and resolve with the agent's next status
    ///
    /// At most one connect may be in flight: the reply is not correlated, so
    /// concurrent calls resolve with whichever status arrives first.
    pub async fn send_connection(&self, request: Option<ConnectionRequest>) -> Result<Value> {
        if let Some(request) = request {
            self.store_connection_request(request);
        }
        let request = self
            .connection_request()
            .ok_or_else(|| WalletError::Config("No connection request information".to_string()))?;

        let (timeout, mut watch, _login) = match self.inner.config.mode {
            AgentMode::Extension => {
                self.ensure_started()?;
                let watch = self.inner.inbox.watch();
                self.inner.publish_connection(&request).await?;
                (None, watch, None)
            }
            AgentMode::Popup => {
                let watch = self.inner.inbox.watch();
                let login = self.guarded_login()?.ok_or_else(|| {
                    WalletError::Closed("wallet popup could not be opened".to_string())
                })?;
                (self.inner.config.popup_timeout(), watch, Some(login))
            }
        };

        let reply = watch.next_matching(Inbound::is_status, timeout).await?;
        Ok(reply.into_detail())
    }

    /// Ask the agent to sign and submit a transaction
    ///
    /// The callback, if any, is registered under a fresh uid before the
    /// request goes out and fires at most once when the matching status
    /// arrives. Returns the uid.
    pub async fn send_transaction(&self, tx: TransactionRequest, callback: Option<TxCallback>) -> Result<String> {
        let uid = self.inner.uids.next_uid();

        match self.inner.config.mode {
            AgentMode::Extension => {
                self.ensure_started()?;
                let payload = serde_json::to_string(&TaggedTransaction { tx: &tx, uid: &uid })?;
                if let Some(callback) = callback {
                    self.inner.pending.register(uid.clone(), callback);
                }
                if let Err(e) = self
                    .inner
                    .publish(&self.inner.config.topics.send_tx, Value::String(payload))
                    .await
                {
                    self.inner.pending.take(&uid);
                    return Err(e);
                }
            }
            AgentMode::Popup => {
                if let Some(callback) = callback {
                    self.inner.pending.register(uid.clone(), callback);
                }
                self.relay_transaction(&tx, &uid)?;
            }
        }

        tracing::debug!(
            uid = %uid,
            contract = %tx.contract_name,
            method = %tx.method_name,
            "Transaction request sent"
        );
        Ok(uid)
    }

    fn relay_transaction(&self, tx: &TransactionRequest, uid: &str) -> Result<()> {
        let relay = self.inner.relay()?;
        let params = sign_params(tx, &relay.host().page_location());
        let url = relay.host().wallet_url(relay.origin(), &params);

        let weak = Arc::downgrade(&self.inner);
        let reply_uid = uid.to_string();
        let ticket = relay.open_popup(
            &url,
            Some(params),
            uid,
            Box::new(move |data: Value| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let message = serde_json::json!({ "data": data });
                inner.pending.resolve(&reply_uid, message.clone());
                inner.events.emit(topics::TX_STATUS, &message);
            }),
        );
        if ticket.delivery == PopupDelivery::Undelivered {
            self.inner.pending.take(uid);
            tracing::debug!(uid = %uid, "Transaction not delivered to popup");
        }
        Ok(())
    }

    /// Open the popup wallet's login page
    ///
    /// A `{type: "vk", vk}` reply is folded in as a status message carrying
    /// that wallet address. The reply listener stays armed until answered.
    pub fn login_popup(&self) -> Result<PopupDelivery> {
        Ok(self.open_login()?.delivery)
    }

    /// Login whose listener is released when the guard drops; `None` if
    /// the popup could not be reached
    fn guarded_login(&self) -> Result<Option<ListenerGuard<'_>>> {
        let relay = self.inner.relay()?;
        let ticket = self.open_login()?;
        if ticket.delivery == PopupDelivery::Undelivered {
            tracing::debug!("Wallet login popup could not be opened");
            return Ok(None);
        }
        Ok(Some(relay.cancel_on_drop(ticket.id)))
    }

    fn open_login(&self) -> Result<PopupTicket> {
        let relay = self.inner.relay()?;
        let params = login_params(&relay.host().page_location());
        let url = relay.host().wallet_url(relay.origin(), &params);
        let uid = self.inner.uids.next_uid();

        let weak = Arc::downgrade(&self.inner);
        Ok(relay.open_popup(
            &url,
            None,
            &uid,
            Box::new(move |data: Value| {
                if data.get("type").and_then(Value::as_str) != Some("vk") {
                    return;
                }
                if let (Some(inner), Some(vk)) = (weak.upgrade(), data.get("vk")) {
                    inner.handle_status(serde_json::json!({ "wallets": [vk] }));
                }
            }),
        ))
    }

    /// Feed a cross-window message from the host into the popup relay
    ///
    /// Returns how many pending popup requests accepted it.
    pub fn handle_window_message(&self, message: &WindowMessage) -> usize {
        match &self.inner.popup {
            Some(relay) => relay.deliver(message),
            None => 0,
        }
    }

    /// Authenticate with a challenge/response round-trip
    ///
    /// Emits the outcome on `authResult` and hands it to the callback. The
    /// reply listener is released on every path.
    pub async fn auth(&self, challenge: &str, callback: Option<AuthCallback>) -> Result<Value> {
        validate_challenge(challenge)?;
        self.ensure_started()?;

        let mut watch = self.inner.inbox.watch();
        let outcome = async {
            let request = serde_json::to_string(&AuthRequest {
                dapp_challenge: challenge.to_string(),
            })?;
            self.inner
                .publish(&self.inner.config.topics.auth, Value::String(request))
                .await?;

            let reply = watch
                .next_matching(
                    |m| matches!(m, Inbound::AuthResponse(detail) if answers_challenge(detail, challenge)),
                    None,
                )
                .await?;
            let detail = reply.into_detail();
            check_response(&detail)?;
            Ok::<Value, WalletError>(detail)
        }
        .await;
        drop(watch);

        match outcome {
            Ok(detail) => {
                self.inner.events.emit(topics::AUTH_RESULT, &detail);
                if let Some(callback) = callback {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(Ok(&detail)))) {
                        let err = WalletError::Callback(panic_message(panic.as_ref()));
                        tracing::warn!(error = %err, "Auth callback panicked");
                        self.inner.events.emit(topics::AUTH_RESULT, &err.to_event_payload());
                        return Err(err);
                    }
                }
                tracing::debug!("Authentication completed");
                Ok(detail)
            }
            Err(err) => {
                tracing::debug!(error = %err, "Authentication failed");
                self.inner.events.emit(topics::AUTH_RESULT, &err.to_event_payload());
                if let Some(callback) = callback {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(Err(&err)))) {
                        tracing::warn!(panic = %panic_message(panic.as_ref()), "Auth callback panicked");
                    }
                }
                Err(err)
            }
        }
    }

    /// Snapshot of the reconciled agent state
    pub fn state(&self) -> AgentState {
        self.inner.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Active connection request, if one is stored
    pub fn connection_request(&self) -> Option<ConnectionRequest> {
        self.inner
            .request
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Local emitter for `newInfo`, `txStatus`, `authResult`, and `installed`
    pub fn events(&self) -> &EventEmitter<Value> {
        &self.inner.events
    }

    /// Transaction callbacks still awaiting a status
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn config(&self) -> &WalletConfig {
        &self.inner.config
    }
}
