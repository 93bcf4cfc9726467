//! Error types for a3s-wallet

use thiserror::Error;

/// Errors that can occur while talking to a wallet agent
#[derive(Debug, Error)]
pub enum WalletError {
    /// Malformed connection request or challenge input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation invoked without the state it requires
    #[error("Configuration error: {0}")]
    Config(String),

    /// The agent itself reported one or more errors
    #[error("Wallet agent reported errors: {}", errors.join(", "))]
    Agent {
        errors: Vec<String>,
    },

    /// Waiting for an agent message timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Publish failure on the agent transport
    #[error("Failed to publish to topic '{topic}': {reason}")]
    Publish {
        topic: String,
        reason: String,
    },

    /// Subscribe failure on the agent transport
    #[error("Failed to subscribe to topic '{topic}': {reason}")]
    Subscribe {
        topic: String,
        reason: String,
    },

    /// The inbound message stream closed before a response arrived
    #[error("Channel closed: {0}")]
    Closed(String),

    /// A caller-supplied callback panicked while handling a response
    #[error("Callback failed: {0}")]
    Callback(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WalletError {
    /// Normalized error object delivered to event listeners
    ///
    /// Always shaped like the agent's own error replies: `{"errors": [...]}`.
    pub fn to_event_payload(&self) -> serde_json::Value {
        let errors = match self {
            WalletError::Agent { errors } => errors.clone(),
            other => vec![other.to_string()],
        };
        serde_json::json!({ "errors": errors })
    }
}

/// Result type alias for wallet operations
pub type Result<T> = std::result::Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_display_joins_messages() {
        let err = WalletError::Agent {
            errors: vec!["Wallet is Locked".to_string(), "try again".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Wallet agent reported errors: Wallet is Locked, try again"
        );
    }

    #[test]
    fn test_event_payload_keeps_agent_errors_verbatim() {
        let err = WalletError::Agent {
            errors: vec!["User rejected".to_string()],
        };
        assert_eq!(
            err.to_event_payload(),
            serde_json::json!({"errors": ["User rejected"]})
        );
    }

    #[test]
    fn test_event_payload_wraps_other_errors() {
        let err = WalletError::Validation("challenge must not be empty".to_string());
        let payload = err.to_event_payload();
        assert_eq!(payload["errors"].as_array().unwrap().len(), 1);
        assert!(payload["errors"][0]
            .as_str()
            .unwrap()
            .contains("challenge must not be empty"));
    }
}
