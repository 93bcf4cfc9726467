//! Controller configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Origin of the web-hosted fallback wallet
pub const DEFAULT_POPUP_ORIGIN: &str = "https://lamdenwallet.com";

/// Window name used when opening the wallet popup
pub const DEFAULT_POPUP_WINDOW: &str = "LamdenWallet";

/// How the agent is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentMode {
    /// In-page messaging with a browser extension
    #[default]
    Extension,
    /// A separately opened wallet window
    Popup,
}

/// Topic (event) names used on the agent transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Topics {
    /// Outbound: ask the agent for its status
    pub get_info: String,
    /// Outbound: connection approval request
    pub connect: String,
    /// Outbound: transaction request
    pub send_tx: String,
    /// Outbound: authentication challenge
    pub auth: String,
    /// Inbound: status messages
    pub info: String,
    /// Inbound: transaction status messages
    pub tx_status: String,
    /// Inbound: authentication responses
    pub auth_response: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            get_info: "lamdenWalletGetInfo".to_string(),
            connect: "lamdenWalletConnect".to_string(),
            send_tx: "lamdenWalletSendTx".to_string(),
            auth: "lamdenWalletAuth".to_string(),
            info: "lamdenWalletInfo".to_string(),
            tx_status: "lamdenWalletTxStatus".to_string(),
            auth_response: "lamdenWalletAuthResponse".to_string(),
        }
    }
}

/// Wallet controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletConfig {
    /// Extension (in-page) or popup agent
    pub mode: AgentMode,

    /// How long discovery waits for a status reply (milliseconds)
    pub discovery_timeout_ms: u64,

    /// Bound on popup-mode login waits; `None` waits until the user acts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popup_timeout_ms: Option<u64>,

    /// Publish the stored connection request once discovery succeeds
    pub auto_connect: bool,

    /// Origin every popup message must come from
    pub popup_origin: String,

    /// Name of the popup window
    pub popup_window: String,

    /// Capacity of the internal inbound fan-out channel
    pub inbox_capacity: usize,

    pub topics: Topics,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            mode: AgentMode::Extension,
            discovery_timeout_ms: 1000,
            popup_timeout_ms: None,
            auto_connect: true,
            popup_origin: DEFAULT_POPUP_ORIGIN.to_string(),
            popup_window: DEFAULT_POPUP_WINDOW.to_string(),
            inbox_capacity: 64,
            topics: Topics::default(),
        }
    }
}

impl WalletConfig {
    /// Configuration for the web-hosted popup wallet
    pub fn popup() -> Self {
        Self {
            mode: AgentMode::Popup,
            ..Self::default()
        }
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_popup_timeout(mut self, timeout: Duration) -> Self {
        self.popup_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_popup_origin(mut self, origin: impl Into<String>) -> Self {
        self.popup_origin = origin.into();
        self
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn with_topics(mut self, topics: Topics) -> Self {
        self.topics = topics;
        self
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn popup_timeout(&self) -> Option<Duration> {
        self.popup_timeout_ms.map(Duration::from_millis)
    }
}
