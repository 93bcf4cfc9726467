//! Reconciled snapshot of the remote wallet agent
//!
//! `AgentState` is filled in piecemeal as status messages arrive. The
//! `approved` / `auto_transactions` flags are derived: they are recomputed
//! whenever the approvals map or the active connection request changes.

use crate::types::{ConnectionRequest, NetworkType, StatusMessage, LEGACY_NETWORK_NAME, WALLET_LOCKED_ERROR};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How the agent encodes its approvals map
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalLayout {
    /// `approvals[networkType]`
    Legacy,
    /// `approvals[networkName][networkType]`
    Namespaced { network_name: String },
}

impl ApprovalLayout {
    /// Pick the layout from the active request's network name
    pub fn for_request(request: &ConnectionRequest) -> Self {
        if request.network_name() == LEGACY_NETWORK_NAME {
            ApprovalLayout::Legacy
        } else {
            ApprovalLayout::Namespaced {
                network_name: request.network_name().to_string(),
            }
        }
    }

    /// Look up the raw approval entry for a network, if any
    pub fn find<'a>(&self, approvals: &'a Map<String, Value>, network_type: NetworkType) -> Option<&'a Value> {
        let scope = match self {
            ApprovalLayout::Legacy => approvals,
            ApprovalLayout::Namespaced { network_name } => approvals.get(network_name)?.as_object()?,
        };
        network_type
            .approval_keys()
            .iter()
            .find_map(|key| scope.get(*key))
    }
}

/// Agent-held approval of a contract for this dApp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub contract_name: String,

    #[serde(default)]
    pub trusted_app: bool,
}

/// Local view of the wallet agent
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    installed: Option<bool>,
    locked: Option<bool>,
    wallet_address: String,
    approvals: Map<String, Value>,
    approved: bool,
    auto_transactions: bool,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until discovery or a status message says otherwise
    pub fn installed(&self) -> Option<bool> {
        self.installed
    }

    pub fn locked(&self) -> Option<bool> {
        self.locked
    }

    /// Primary wallet address; empty when none is known
    pub fn wallet_address(&self) -> &str {
        &self.wallet_address
    }

    pub fn approvals(&self) -> &Map<String, Value> {
        &self.approvals
    }

    pub fn approved(&self) -> bool {
        self.approved
    }

    pub fn auto_transactions(&self) -> bool {
        self.auto_transactions
    }

    pub(crate) fn mark_installed(&mut self) {
        self.installed = Some(true);
    }

    /// Fold a status message into the snapshot
    ///
    /// Any status message proves the agent is present unless it says
    /// `installed: false`. When the message carries an error list only the
    /// locked flag is inferred from it.
    pub fn apply_status(&mut self, status: &StatusMessage, request: Option<&ConnectionRequest>) {
        self.installed = Some(status.installed.unwrap_or(true));

        if let Some(errors) = status.error_messages() {
            if errors.iter().any(|e| e == WALLET_LOCKED_ERROR) {
                self.locked = Some(true);
            }
            return;
        }

        if let Some(locked) = status.locked {
            self.locked = Some(locked);
        }
        if let Some(address) = status.wallets.as_ref().and_then(|w| w.first()) {
            self.wallet_address = address.clone();
        }
        if let Some(approvals) = &status.approvals {
            self.approvals = approvals.clone();
            self.recompute(request);
        }
    }

    /// Approval record matching the request's network, if present and well-formed
    pub fn approval_for(&self, request: &ConnectionRequest) -> Option<ApprovalRecord> {
        let raw = ApprovalLayout::for_request(request).find(&self.approvals, request.network_type())?;
        match serde_json::from_value::<ApprovalRecord>(raw.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed approval record");
                None
            }
        }
    }

    /// Re-derive `approved` / `auto_transactions` for the active request
    pub fn recompute(&mut self, request: Option<&ConnectionRequest>) {
        let record = request.and_then(|r| {
            self.approval_for(r)
                .filter(|record| record.contract_name == r.contract_name())
        });
        self.approved = record.is_some();
        self.auto_transactions = record.is_some_and(|r| r.trusted_app);
    }
}
