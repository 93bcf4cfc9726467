//! Core wire types for the a3s-wallet protocol
//!
//! All types use camelCase JSON serialization for wire compatibility with
//! the wallet agent.

use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Network name that selects the flat (pre-namespacing) approvals layout
pub const LEGACY_NETWORK_NAME: &str = "legacy";

/// Status the agent reports when the user rejects a transaction
pub const TX_CANCELLED_STATUS: &str = "Transaction Cancelled";

/// Error string the agent reports while the wallet is locked
pub const WALLET_LOCKED_ERROR: &str = "Wallet is Locked";

fn default_network_name() -> String {
    LEGACY_NETWORK_NAME.to_string()
}

/// Which network an approval or transaction targets
///
/// Serialized as `mainnet` / `testnet`; the short forms `main` / `test`
/// are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkType {
    #[serde(rename = "mainnet", alias = "main")]
    Main,
    #[serde(rename = "testnet", alias = "test")]
    Test,
}

impl NetworkType {
    /// Canonical wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Main => "mainnet",
            NetworkType::Test => "testnet",
        }
    }

    /// Keys an agent may use for this network inside an approvals map
    pub fn approval_keys(&self) -> [&'static str; 2] {
        match self {
            NetworkType::Main => ["mainnet", "main"],
            NetworkType::Test => ["testnet", "test"],
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display-only descriptor pulled from contract state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Charm {
    /// Charm name shown in the wallet
    pub name: String,

    /// Contract variable to read the value from
    pub variable_name: String,

    /// Key associated with the value to look up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Display format of the value (e.g. "number")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_as: Option<String>,

    /// Icon shown next to the charm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,
}

/// Stamps the dApp asks the user to pre-approve on connect
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreApproval {
    pub stamps_to_pre_approve: u64,

    #[serde(default)]
    pub message: String,
}

/// Caller input accepted by [`ConnectionRequest::from_value`]
///
/// Only these fields are read; anything else in the input is ignored.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionRequestInput {
    app_name: String,
    #[serde(default)]
    version: String,
    contract_name: String,
    network_type: NetworkType,
    #[serde(default = "default_network_name")]
    network_name: String,
    #[serde(default)]
    logo: String,
    #[serde(default)]
    background: Option<String>,
    #[serde(default)]
    charms: Vec<Charm>,
    #[serde(default)]
    pre_approval: Option<PreApproval>,
    #[serde(default)]
    reapprove: bool,
    #[serde(default)]
    new_keypair: bool,
}

/// A validated dApp connection descriptor
///
/// Immutable once built: a later connect replaces it instead of mutating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    app_name: String,
    version: String,
    contract_name: String,
    network_type: NetworkType,
    network_name: String,
    logo: String,
    background: Option<String>,
    charms: Vec<Charm>,
    pre_approval: Option<PreApproval>,
    reapprove: bool,
    new_keypair: bool,
}

impl ConnectionRequest {
    /// Create a request with the required fields and legacy defaults
    pub fn new(
        app_name: impl Into<String>,
        contract_name: impl Into<String>,
        network_type: NetworkType,
    ) -> Result<Self> {
        let request = Self {
            app_name: app_name.into(),
            version: String::new(),
            contract_name: contract_name.into(),
            network_type,
            network_name: default_network_name(),
            logo: String::new(),
            background: None,
            charms: Vec::new(),
            pre_approval: None,
            reapprove: false,
            new_keypair: false,
        };
        request.validate()?;
        Ok(request)
    }

    /// Build a request from loosely-typed caller input
    ///
    /// Unknown keys are ignored. Known keys must have the declared type and
    /// the required ones (`appName`, `contractName`, `networkType`) must be
    /// present.
    pub fn from_value(input: Value) -> Result<Self> {
        let raw: ConnectionRequestInput = serde_json::from_value(input)
            .map_err(|e| WalletError::Validation(format!("Invalid connection request: {}", e)))?;

        let request = Self {
            app_name: raw.app_name,
            version: raw.version,
            contract_name: raw.contract_name,
            network_type: raw.network_type,
            network_name: if raw.network_name.is_empty() {
                default_network_name()
            } else {
                raw.network_name
            },
            logo: raw.logo,
            background: raw.background.filter(|b| !b.is_empty()),
            charms: raw.charms,
            pre_approval: raw.pre_approval,
            reapprove: raw.reapprove,
            new_keypair: raw.new_keypair,
        };
        request.validate()?;
        Ok(request)
    }

    /// Parse a request from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| WalletError::Validation(format!("Invalid connection request: {}", e)))?;
        Self::from_value(value)
    }

    fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(WalletError::Validation("appName cannot be empty".to_string()));
        }
        if self.contract_name.trim().is_empty() {
            return Err(WalletError::Validation(
                "contractName cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Target a named network, switching approvals to the namespaced layout
    pub fn with_network_name(mut self, network_name: impl Into<String>) -> Self {
        let name = network_name.into();
        self.network_name = if name.is_empty() {
            default_network_name()
        } else {
            name
        };
        self
    }

    pub fn with_logo(mut self, logo: impl Into<String>) -> Self {
        self.logo = logo.into();
        self
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        let background = background.into();
        self.background = (!background.is_empty()).then_some(background);
        self
    }

    pub fn with_charm(mut self, charm: Charm) -> Self {
        self.charms.push(charm);
        self
    }

    pub fn with_pre_approval(mut self, stamps: u64, message: impl Into<String>) -> Self {
        self.pre_approval = Some(PreApproval {
            stamps_to_pre_approve: stamps,
            message: message.into(),
        });
        self
    }

    /// Ask the agent to re-approve an existing connection
    pub fn with_reapprove(mut self, new_keypair: bool) -> Self {
        self.reapprove = true;
        self.new_keypair = new_keypair;
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn contract_name(&self) -> &str {
        &self.contract_name
    }

    pub fn network_type(&self) -> NetworkType {
        self.network_type
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    pub fn logo(&self) -> &str {
        &self.logo
    }

    pub fn background(&self) -> Option<&str> {
        self.background.as_deref()
    }

    pub fn charms(&self) -> &[Charm] {
        &self.charms
    }

    pub fn pre_approval(&self) -> Option<&PreApproval> {
        self.pre_approval.as_ref()
    }

    pub fn reapprove(&self) -> bool {
        self.reapprove
    }

    pub fn new_keypair(&self) -> bool {
        self.new_keypair
    }

    /// Serialize to the JSON string carried by the connect message
    pub fn to_wire_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Minimal wire form: optional fields only appear when non-default
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireConnectionRequest<'a> {
    app_name: &'a str,
    version: &'a str,
    contract_name: &'a str,
    network_type: NetworkType,
    network_name: &'a str,
    logo: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    background: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    charms: Option<&'a [Charm]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pre_approval: Option<&'a PreApproval>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reapprove: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_keypair: Option<bool>,
}

impl Serialize for ConnectionRequest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        WireConnectionRequest {
            app_name: &self.app_name,
            version: &self.version,
            contract_name: &self.contract_name,
            network_type: self.network_type,
            network_name: &self.network_name,
            logo: &self.logo,
            background: self.background.as_deref(),
            charms: (!self.charms.is_empty()).then_some(self.charms.as_slice()),
            pre_approval: self
                .pre_approval
                .as_ref()
                .filter(|p| p.stamps_to_pre_approve > 0),
            reapprove: self.reapprove.then_some(true),
            new_keypair: (self.reapprove && self.new_keypair).then_some(true),
        }
        .serialize(serializer)
    }
}

impl TryFrom<Value> for ConnectionRequest {
    type Error = WalletError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

/// A transaction the dApp asks the agent to sign and submit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub contract_name: String,
    pub method_name: String,
    pub stamp_limit: u64,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    pub network_type: NetworkType,
    #[serde(default = "default_network_name")]
    pub network_name: String,
}

impl TransactionRequest {
    pub fn new(
        contract_name: impl Into<String>,
        method_name: impl Into<String>,
        stamp_limit: u64,
        network_type: NetworkType,
    ) -> Self {
        Self {
            contract_name: contract_name.into(),
            method_name: method_name.into(),
            stamp_limit,
            kwargs: Map::new(),
            network_type,
            network_name: default_network_name(),
        }
    }

    /// Add a keyword argument for the contract method
    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn with_network_name(mut self, network_name: impl Into<String>) -> Self {
        self.network_name = network_name.into();
        self
    }
}

/// Transaction plus the correlation uid, as published to the agent
#[derive(Serialize)]
pub(crate) struct TaggedTransaction<'a> {
    #[serde(flatten)]
    pub tx: &'a TransactionRequest,
    pub uid: &'a str,
}

/// Status message pushed by the agent
///
/// Every field is optional: agents send partial updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallets: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approvals: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Value>>,
}

impl StatusMessage {
    /// Error list as strings, if the agent sent one
    pub fn error_messages(&self) -> Option<Vec<String>> {
        self.errors
            .as_ref()
            .map(|errors| errors.iter().map(value_to_message).collect())
    }
}

/// Original-request echo inside a transaction status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// The `data` block of a transaction-status message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxStatusData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// JSON string of the rejected request (cancellation path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_data: Option<TxData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_block_result: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl TxStatusData {
    /// Resolve the uid of the request this status answers
    ///
    /// Error path: `txData.uid`, replaced by the uid inside `rejected` when the
    /// user cancelled. Success path: the top-level `uid`, only when a
    /// non-empty block result is present.
    pub fn correlation_uid(&self) -> Option<String> {
        match self.errors.as_deref() {
            Some([]) => None,
            Some(_) => {
                let uid = self.tx_data.as_ref().and_then(|d| d.uid.clone());
                match (&self.status, &self.rejected) {
                    (Some(status), Some(rejected)) if status == TX_CANCELLED_STATUS => {
                        match serde_json::from_str::<TxData>(rejected) {
                            Ok(data) => data.uid,
                            Err(e) => {
                                tracing::warn!(error = %e, "Unparseable rejected transaction payload");
                                None
                            }
                        }
                    }
                    _ => uid,
                }
            }
            None => match &self.tx_block_result {
                Some(result) if !result.is_empty() => self.uid.clone(),
                _ => None,
            },
        }
    }
}

/// Challenge sent by the dApp for wallet authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub dapp_challenge: String,
}

pub(crate) fn value_to_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
