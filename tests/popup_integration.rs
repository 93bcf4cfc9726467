//! Popup mode integration tests
//!
//! Drives a popup-mode `WalletController` against a scripted window host:
//! login and discovery through the popup, transaction relay, reply
//! filtering, and the one-shot reply listeners.

use a3s_wallet::{
    topics, ConnectionRequest, CounterUid, MemoryTransport, NetworkType, PopupWindow,
    TransactionRequest, WalletConfig, WalletController, WalletError, WindowHost, WindowMessage,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ORIGIN: &str = "https://lamdenwallet.com";

#[derive(Default)]
struct ScriptedWindow {
    closed: AtomicBool,
    posted: Mutex<Vec<(Value, String)>>,
}

impl PopupWindow for ScriptedWindow {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn post_message(&self, message: &Value, target_origin: &str) -> bool {
        self.posted
            .lock()
            .unwrap()
            .push((message.clone(), target_origin.to_string()));
        true
    }
}

#[derive(Default)]
struct ScriptedHost {
    blocked: AtomicBool,
    opened: Mutex<Vec<String>>,
    windows: Mutex<Vec<Arc<ScriptedWindow>>>,
}

impl ScriptedHost {
    fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    fn last_window(&self) -> Arc<ScriptedWindow> {
        self.windows.lock().unwrap().last().cloned().unwrap()
    }

    async fn wait_for_open(&self, count: usize) {
        while self.opened.lock().unwrap().len() < count {
            tokio::task::yield_now().await;
        }
    }
}

impl WindowHost for ScriptedHost {
    fn open(&self, url: &str, _window_name: &str) -> Option<Arc<dyn PopupWindow>> {
        if self.blocked.load(Ordering::SeqCst) {
            return None;
        }
        self.opened.lock().unwrap().push(url.to_string());
        let window = Arc::new(ScriptedWindow::default());
        self.windows.lock().unwrap().push(window.clone());
        Some(window)
    }

    fn wallet_url(&self, base: &str, params: &Map<String, Value>) -> String {
        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();
        let query: Vec<String> = keys
            .into_iter()
            .map(|k| format!("{}={}", k, params[k].as_str().unwrap_or_default()))
            .collect();
        format!("{}/?{}", base, query.join("&"))
    }

    fn page_location(&self) -> String {
        "https://dapp.example/".to_string()
    }
}

fn popup_controller(config: WalletConfig) -> (Arc<ScriptedHost>, WalletController) {
    let host = Arc::new(ScriptedHost::default());
    let controller = WalletController::builder(MemoryTransport::default())
        .config(config)
        .popup_host(host.clone())
        .uid_generator(CounterUid::new("T"))
        .build()
        .unwrap();
    (host, controller)
}

fn buy() -> TransactionRequest {
    TransactionRequest::new("con_swap", "buy", 50, NetworkType::Main).with_kwarg("amount", json!(3))
}

// ─── Login & Discovery ───────────────────────────────────────────

#[tokio::test]
async fn test_check_installed_via_login() {
    let (host, controller) = popup_controller(WalletConfig::popup());

    let check = tokio::spawn({
        let controller = controller.clone();
        async move { controller.check_installed().await }
    });
    host.wait_for_open(1).await;
    assert!(host.opened()[0].contains("type=login"));
    assert!(host.opened()[0].contains("origin=https://dapp.example/"));

    let accepted = controller.handle_window_message(&WindowMessage::new(
        ORIGIN,
        json!({"type": "vk", "vk": "wallet_vk"}),
    ));
    assert_eq!(accepted, 1);

    assert!(check.await.unwrap().unwrap());
    let state = controller.state();
    assert_eq!(state.installed(), Some(true));
    assert_eq!(state.wallet_address(), "wallet_vk");
}

#[tokio::test(start_paused = true)]
async fn test_check_installed_popup_timeout() {
    let config = WalletConfig::popup().with_popup_timeout(Duration::from_secs(30));
    let (host, controller) = popup_controller(config);

    assert!(!controller.check_installed().await.unwrap());
    assert_eq!(host.opened().len(), 1);
    assert_eq!(controller.state().installed(), None);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_logins_release_their_listeners() {
    let config = WalletConfig::popup().with_popup_timeout(Duration::from_millis(100));
    let (host, controller) = popup_controller(config);
    let infos = Arc::new(Mutex::new(0));

    let counter = infos.clone();
    controller.events().on(topics::INFO, move |_| *counter.lock().unwrap() += 1);

    for _ in 0..3 {
        assert!(!controller.check_installed().await.unwrap());
    }
    let request = ConnectionRequest::new("Swap Pad", "con_swap", NetworkType::Main).unwrap();
    let err = controller.send_connection(Some(request)).await.unwrap_err();
    assert!(matches!(err, WalletError::Timeout(_)));
    assert_eq!(host.opened().len(), 4);

    let vk = WindowMessage::new(ORIGIN, json!({"type": "vk", "vk": "wallet_vk"}));
    assert_eq!(controller.handle_window_message(&vk), 0);
    assert_eq!(*infos.lock().unwrap(), 0);

    // A fresh login is answered exactly once
    controller.login_popup().unwrap();
    assert_eq!(controller.handle_window_message(&vk), 1);
    assert_eq!(controller.handle_window_message(&vk), 0);
    assert_eq!(*infos.lock().unwrap(), 1);
    assert_eq!(controller.state().wallet_address(), "wallet_vk");
}

#[tokio::test]
async fn test_blocked_popup_fails_fast() {
    let (host, controller) = popup_controller(WalletConfig::popup());
    host.blocked.store(true, Ordering::SeqCst);

    // No popup timeout is configured, so these would wait forever on a
    // login that never opened
    assert!(!controller.check_installed().await.unwrap());
    let request = ConnectionRequest::new("Swap Pad", "con_swap", NetworkType::Main).unwrap();
    let err = controller.send_connection(Some(request)).await.unwrap_err();
    assert!(matches!(err, WalletError::Closed(_)));

    controller
        .send_transaction(buy(), Some(Box::new(|_: Value| {})))
        .await
        .unwrap();
    assert_eq!(controller.pending_count(), 0);
    assert!(host.opened().is_empty());

    let vk = WindowMessage::new(ORIGIN, json!({"type": "vk", "vk": "wallet_vk"}));
    assert_eq!(controller.handle_window_message(&vk), 0);
}

#[tokio::test]
async fn test_send_connection_resolves_with_vk_status() {
    let (host, controller) = popup_controller(WalletConfig::popup());
    let request = ConnectionRequest::new("Swap Pad", "con_swap", NetworkType::Main).unwrap();

    let connect = tokio::spawn({
        let controller = controller.clone();
        async move { controller.send_connection(Some(request)).await }
    });
    host.wait_for_open(1).await;

    controller.handle_window_message(&WindowMessage::new(ORIGIN, json!({"type": "vk", "vk": "abc"})));

    let status = connect.await.unwrap().unwrap();
    assert_eq!(status, json!({"wallets": ["abc"]}));
    assert_eq!(controller.state().wallet_address(), "abc");
}

#[tokio::test]
async fn test_login_ignores_non_vk_reply() {
    let (_host, controller) = popup_controller(WalletConfig::popup());
    controller.login_popup().unwrap();

    let accepted = controller.handle_window_message(&WindowMessage::new(ORIGIN, json!({"type": "closed"})));
    assert_eq!(accepted, 1);
    assert_eq!(controller.state().wallet_address(), "");
}

// ─── Transactions ────────────────────────────────────────────────

#[tokio::test]
async fn test_transaction_opens_popup_and_routes_reply() {
    let (host, controller) = popup_controller(WalletConfig::popup());
    let results = Arc::new(Mutex::new(Vec::new()));
    let broadcast = Arc::new(Mutex::new(Vec::new()));

    let sink = broadcast.clone();
    controller.events().on(topics::TX_STATUS, move |status| {
        sink.lock().unwrap().push(status.clone());
    });

    let sink = results.clone();
    let uid = controller
        .send_transaction(
            buy(),
            Some(Box::new(move |status: Value| sink.lock().unwrap().push(status))),
        )
        .await
        .unwrap();
    assert_eq!(uid, "T-1");

    let url = &host.opened()[0];
    assert!(url.contains("type=sign"));
    assert!(url.contains("contractName=con_swap"));
    assert!(url.contains("methodName=buy"));
    assert!(url.contains("stampLimit=50"));

    let reply = json!({
        "uid": "T-1",
        "status": "success",
        "payload": {"contract": "con_swap", "function": "buy"}
    });
    assert_eq!(controller.handle_window_message(&WindowMessage::new(ORIGIN, reply.clone())), 1);

    assert_eq!(*results.lock().unwrap(), vec![json!({"data": reply.clone()})]);
    assert_eq!(*broadcast.lock().unwrap(), vec![json!({"data": reply})]);
    assert_eq!(controller.pending_count(), 0);
}

#[tokio::test]
async fn test_second_transaction_posts_to_open_popup() {
    let (host, controller) = popup_controller(WalletConfig::popup());

    controller.send_transaction(buy(), None).await.unwrap();
    controller.send_transaction(buy(), None).await.unwrap();

    assert_eq!(host.opened().len(), 1);
    let posted = host.last_window().posted.lock().unwrap().clone();
    assert_eq!(posted.len(), 1);

    let (message, target) = &posted[0];
    assert_eq!(target, ORIGIN);
    assert_eq!(message["protocolVersion"], "2.0");
    assert_eq!(message["uid"], "T-2");
    assert_eq!(message["contractName"], "con_swap");
    assert_eq!(message["type"], "sign");
}

#[tokio::test]
async fn test_closed_popup_is_reopened() {
    let (host, controller) = popup_controller(WalletConfig::popup());

    controller.send_transaction(buy(), None).await.unwrap();
    host.last_window().closed.store(true, Ordering::SeqCst);
    controller.send_transaction(buy(), None).await.unwrap();

    assert_eq!(host.opened().len(), 2);
}

#[tokio::test]
async fn test_mismatched_replies_are_discarded() {
    let (_host, controller) = popup_controller(WalletConfig::popup());
    let calls = Arc::new(Mutex::new(0));

    let counter = calls.clone();
    controller
        .send_transaction(
            buy(),
            Some(Box::new(move |_: Value| *counter.lock().unwrap() += 1)),
        )
        .await
        .unwrap();

    let payload = json!({"contract": "con_swap", "function": "buy"});
    let rejected = [
        WindowMessage::new("https://evil.example", json!({"uid": "T-1", "payload": payload})),
        WindowMessage::new(ORIGIN, json!({"uid": "T-9", "payload": payload})),
        WindowMessage::new(
            ORIGIN,
            json!({"uid": "T-1", "payload": {"contract": "con_swap", "function": "sell"}}),
        ),
    ];
    for message in &rejected {
        assert_eq!(controller.handle_window_message(message), 0);
    }
    assert_eq!(*calls.lock().unwrap(), 0);

    // The listener is still armed for the right reply, and fires once
    let reply = WindowMessage::new(ORIGIN, json!({"uid": "T-1", "payload": payload}));
    assert_eq!(controller.handle_window_message(&reply), 1);
    assert_eq!(controller.handle_window_message(&reply), 0);
    assert_eq!(*calls.lock().unwrap(), 1);
}
