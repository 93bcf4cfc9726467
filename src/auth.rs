//! Challenge/response authentication helpers

use crate::error::{Result, WalletError};
use crate::types::value_to_message;
use serde::Deserialize;
use serde_json::Value;

/// Longest dApp challenge accepted
pub const MAX_CHALLENGE_LEN: usize = 1024;

/// Text the agent signs: both challenges in a fixed template
///
/// Pure function; the agent builds the same string before signing, so the
/// layout must not change.
pub fn build_challenge_message(dapp_challenge: &str, agent_challenge: &str) -> String {
    format!(
        "[DAPP CHALLENGE]\n{}\n[WALLET CHALLENGE]\n{}",
        dapp_challenge, agent_challenge
    )
}

/// Reject empty, oversized, or multi-line challenges
pub fn validate_challenge(challenge: &str) -> Result<()> {
    if challenge.trim().is_empty() {
        return Err(WalletError::Validation("challenge cannot be empty".to_string()));
    }
    if challenge.len() > MAX_CHALLENGE_LEN {
        return Err(WalletError::Validation(format!(
            "challenge exceeds {} bytes",
            MAX_CHALLENGE_LEN
        )));
    }
    // Newlines would collide with the template's section markers
    if challenge.chars().any(char::is_control) {
        return Err(WalletError::Validation(
            "challenge cannot contain control characters".to_string(),
        ));
    }
    Ok(())
}

#[derive(Deserialize, Default)]
struct AuthResponseView {
    #[serde(default)]
    dapp_challenge: Option<String>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

fn view(detail: &Value) -> AuthResponseView {
    serde_json::from_value(detail.clone()).unwrap_or_default()
}

/// Whether an auth response answers `challenge`
///
/// Responses that do not echo a challenge are accepted.
pub(crate) fn answers_challenge(detail: &Value, challenge: &str) -> bool {
    view(detail)
        .dapp_challenge
        .map_or(true, |echoed| echoed == challenge)
}

/// Turn an auth response into success or an agent error
pub(crate) fn check_response(detail: &Value) -> Result<()> {
    match view(detail).errors {
        Some(errors) if !errors.is_empty() => Err(WalletError::Agent {
            errors: errors.iter().map(value_to_message).collect(),
        }),
        _ => Ok(()),
    }
}
