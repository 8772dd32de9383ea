//! Persisted local state
//!
//! Everything the relay remembers between requests lives in one
//! [`LocalState`] document owned by a [`StateStore`]. Field names on disk are
//! camelCase and match the keys companion UIs read.

pub mod store;

pub use store::StateStore;

use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;

/// Last captured bearer token, overwritten in place on every genuine change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTokenRecord {
    pub token: String,
    /// Wall-clock milliseconds of the write
    pub updated_at: i64,
    pub source_url: Option<String>,
    pub exp_seconds: Option<i64>,
    pub expires_at_ms: Option<i64>,
}

/// Outcome of an operation, kept for inspection by UIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpStatus {
    pub ok: bool,
    pub message: String,
}

impl OpStatus {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Snapshot of the last inspected target request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDiagnostic {
    pub url: String,
    pub method: String,
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    pub time: i64,
    pub has_authorization_header: bool,
    pub header_names: Vec<String>,
}

/// Last network-level failure reported for a target request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestErrorRecord {
    pub error: String,
    pub url: String,
    pub time: i64,
}

/// Signed-in account; gates the aggregation path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedInUser {
    pub uid: String,
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Capture indicator shown by companion UIs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureBadge {
    #[default]
    Idle,
    Ok,
    Warning,
    Error,
}

/// The whole persisted state document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalState {
    #[serde(rename = "immutableAuthToken")]
    pub auth_token: Option<StoredTokenRecord>,
    /// Last submitted idempotency key
    pub last_log_id: Option<String>,
    pub last_firebase_status: Option<OpStatus>,
    pub last_auto_send_status: Option<OpStatus>,
    #[serde(rename = "immutableAuthLastSeen")]
    pub last_seen: Option<RequestDiagnostic>,
    #[serde(rename = "immutableAuthLastError")]
    pub last_error: Option<RequestErrorRecord>,
    pub last_processing_error: Option<String>,
    pub last_attempt_without_auth_at: Option<i64>,
    pub last_public_ip: Option<String>,
    pub firebase_user: Option<SignedInUser>,
    pub firebase_config: Option<BackendConfig>,
    pub webhook_url: Option<String>,
    pub auto_send: bool,
    pub access_granted: bool,
    pub badge: CaptureBadge,
}

impl LocalState {
    /// Current token value, if any
    pub fn token(&self) -> Option<&str> {
        self.auth_token.as_ref().map(|r| r.token.as_str())
    }

    /// Signed-in user with a non-empty uid
    pub fn signed_in_user(&self) -> Option<&SignedInUser> {
        self.firebase_user.as_ref().filter(|u| !u.uid.is_empty())
    }
}

/// Mask a secret for logs and status output
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_keys_on_disk() {
        let state = LocalState {
            auth_token: Some(StoredTokenRecord {
                token: "abc".into(),
                updated_at: 1,
                source_url: None,
                exp_seconds: None,
                expires_at_ms: None,
            }),
            last_log_id: Some("k".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["immutableAuthToken"]["token"], "abc");
        assert_eq!(json["lastLogId"], "k");
        assert_eq!(json["badge"], "idle");
    }

    #[test]
    fn test_partial_document_loads() {
        let state: LocalState = serde_json::from_str(r#"{"autoSend": true}"#).unwrap();
        assert!(state.auto_send);
        assert!(state.auth_token.is_none());
    }

    #[test]
    fn test_signed_in_user_requires_uid() {
        let mut state = LocalState::default();
        state.firebase_user = Some(SignedInUser {
            uid: String::new(),
            email: None,
            id_token: None,
            refresh_token: None,
        });
        assert!(state.signed_in_user().is_none());
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("short"), "*****");
        assert_eq!(mask_token("abcdefghijklmnop"), "abcd…mnop");
    }
}
