//! Credential issuer client and account handling
//!
//! Sign-in and sign-up against the identity toolkit REST API
//! (`accounts:signInWithPassword` / `accounts:signUp`). Inputs are validated
//! before any call, and calls are spaced at least two seconds apart to keep
//! clear of the issuer's quota.

pub mod access;
pub mod accounts;
pub mod admin;

pub use access::{AccessError, AccessGate};
pub use accounts::Accounts;
pub use admin::is_admin;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Minimum spacing between issuer calls
pub const MIN_CALL_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum password length accepted by the issuer
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IdentityError {
    #[error("Email and password are required")]
    MissingCredentials,

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Password must be at least 6 characters")]
    WeakPassword,

    #[error("Please wait a moment before trying again")]
    RateLimited,

    #[error("Missing Firebase API key")]
    MissingApiKey,

    #[error("{message}")]
    Rejected { status: u16, code: String, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected issuer response: {0}")]
    InvalidResponse(String),
}

/// Issued credentials for a user
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub token: String,
    pub uid: String,
    pub email: String,
    pub refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuerResponse {
    id_token: String,
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

pub struct IdentityClient {
    http: Client,
    base: String,
    api_key: Option<String>,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl IdentityClient {
    pub fn new(base: &str, api_key: Option<String>, timeout: Duration, user_agent: &str) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            min_interval: MIN_CALL_INTERVAL,
            last_call: Mutex::new(None),
        }
    }

    /// Override the call spacing
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, IdentityError> {
        self.call("accounts:signInWithPassword", email, password).await
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession, IdentityError> {
        self.call("accounts:signUp", email, password).await
    }

    async fn call(&self, method: &str, email: &str, password: &str) -> Result<AuthSession, IdentityError> {
        validate_credentials(email, password)?;
        let api_key = self.api_key.as_deref().ok_or(IdentityError::MissingApiKey)?;
        if !self.check_rate_limit(Instant::now()) {
            return Err(IdentityError::RateLimited);
        }

        let url = format!("{}/{}", self.base, method);
        let response = self
            .http
            .post(&url)
            .query(&[("key", api_key)])
            .json(&json!({
                "email": email.trim(),
                "password": password,
                "returnSecureToken": true,
            }))
            .send()
            .await
            .map_err(|e| IdentityError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let code = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            warn!(method, status = status.as_u16(), code = %code, "Issuer rejected request");
            return Err(rejected(status.as_u16(), code));
        }

        let body: IssuerResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;

        info!(method, uid = %body.local_id, "Issuer accepted credentials");
        Ok(AuthSession {
            token: body.id_token,
            uid: body.local_id,
            email: body.email.unwrap_or_else(|| email.trim().to_string()),
            refresh_token: body.refresh_token,
        })
    }

    /// Take the call slot at `now`; false if the previous call is too recent
    fn check_rate_limit(&self, now: Instant) -> bool {
        let mut last = self.last_call.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = *last {
            if now.saturating_duration_since(at) < self.min_interval {
                return false;
            }
        }
        *last = Some(now);
        true
    }
}

/// Input checks done before contacting the issuer
pub fn validate_credentials(email: &str, password: &str) -> Result<(), IdentityError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(IdentityError::MissingCredentials);
    }
    if !is_valid_email(email.trim()) {
        return Err(IdentityError::InvalidEmail);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(IdentityError::WeakPassword);
    }
    Ok(())
}

/// `local@domain.tld` with no whitespace and a single `@`
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

fn rejected(status: u16, code: String) -> IdentityError {
    let message = match code.split(':').next().map(str::trim).unwrap_or_default() {
        "EMAIL_EXISTS" => "An account with this email already exists. Please sign in instead.",
        "EMAIL_NOT_FOUND" => "No account found with this email. Please register first.",
        "INVALID_PASSWORD" => "Invalid password. Please check your password and try again.",
        "INVALID_LOGIN_CREDENTIALS" => "Invalid login credentials. Please check your email and password.",
        "USER_DISABLED" => "This account has been disabled. Please contact support.",
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "Too many failed attempts. Please wait before trying again.",
        "INVALID_EMAIL" => "Please enter a valid email address.",
        "WEAK_PASSWORD" => "Password is too weak. Please choose a stronger password.",
        "OPERATION_NOT_ALLOWED" => "Email/password accounts are not enabled. Please contact support.",
        _ => "",
    };

    let message = if !message.is_empty() {
        message.to_string()
    } else if !code.is_empty() {
        format!("Authentication failed: {}", code)
    } else {
        format!("Authentication failed: HTTP {}", status)
    };

    IdentityError::Rejected {
        status,
        code,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last@sub.example.org"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a@@b.co"));
        assert!(!is_valid_email("a b@c.co"));
        assert!(!is_valid_email("a@.co"));
    }

    #[test]
    fn test_validate_credentials() {
        assert_eq!(validate_credentials("", "secret1"), Err(IdentityError::MissingCredentials));
        assert_eq!(validate_credentials("nope", "secret1"), Err(IdentityError::InvalidEmail));
        assert_eq!(validate_credentials("a@b.co", "12345"), Err(IdentityError::WeakPassword));
        assert!(validate_credentials(" a@b.co ", "123456").is_ok());
    }

    #[test]
    fn test_rate_limit_spacing() {
        let client = IdentityClient::new("http://localhost", Some("k".into()), Duration::from_secs(1), "t");
        let t0 = Instant::now();
        assert!(client.check_rate_limit(t0));
        assert!(!client.check_rate_limit(t0 + Duration::from_millis(1500)));
        assert!(client.check_rate_limit(t0 + Duration::from_millis(2000)));
    }

    #[test]
    fn test_rejection_messages() {
        match rejected(400, "EMAIL_EXISTS".into()) {
            IdentityError::Rejected { message, .. } => assert!(message.contains("already exists")),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(
            rejected(400, "WEAK_PASSWORD : Password should be at least 6 characters".into()).to_string(),
            "Password is too weak. Please choose a stronger password."
        );
        assert_eq!(rejected(503, String::new()).to_string(), "Authentication failed: HTTP 503");
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = IdentityClient::new("http://localhost", Some("  ".into()), Duration::from_secs(1), "t");
        assert_eq!(
            client.sign_in("a@b.co", "secret1").await,
            Err(IdentityError::MissingApiKey)
        );
    }
}
