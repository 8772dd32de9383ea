//! Tagged messages from page observers and UIs
//!
//! ```json
//! {"type": "TOKEN_CAPTURED", "token": "Bearer eyJ...", "sourceUrl": "https://..."}
//! {"type": "DASHBOARD_LOG", "token": "eyJ...", "combined": {...}, "logId": "..."}
//! {"type": "FETCH_STATS", "token": "eyJ..."}
//! {"type": "FIREBASE_SIGN_IN", "email": "...", "password": "..."}
//! {"type": "FIREBASE_SIGN_UP", "email": "...", "password": "...", "accessCode": "..."}
//! {"type": "FIREBASE_SIGN_OUT"}
//! ```
//!
//! `DASHBOARD_LOG` and `FETCH_STATS` fall back to the stored token when the
//! message carries none. Account messages answer `{success, data | error}`
//! and change the signed-in user of this running relay.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{error_response, json_response, read_json};
use crate::relay::{DashboardStats, Observation};
use crate::server::AppState;
use crate::state::SignedInUser;
use crate::types::RelayError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayMessage {
    #[serde(rename_all = "camelCase")]
    TokenCaptured {
        token: String,
        #[serde(default)]
        source_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DashboardLog {
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        combined: Value,
        #[serde(default)]
        log_id: Option<String>,
    },
    FetchStats {
        #[serde(default)]
        token: Option<String>,
    },
    FirebaseSignIn {
        email: String,
        password: String,
    },
    #[serde(rename_all = "camelCase")]
    FirebaseSignUp {
        email: String,
        password: String,
        #[serde(default)]
        access_code: Option<String>,
    },
    FirebaseSignOut,
}

/// Reply to an account message
#[derive(Debug, Serialize)]
struct AccountReply {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl AccountReply {
    fn from_result(result: Result<Option<SignedInUser>, RelayError>) -> (StatusCode, Self) {
        match result {
            Ok(user) => (
                StatusCode::OK,
                Self {
                    success: true,
                    data: user.map(|u| json!({ "uid": u.uid, "email": u.email })),
                    error: None,
                },
            ),
            Err(e) => {
                warn!("Account request failed: {}", e);
                (
                    e.status_code(),
                    Self {
                        success: false,
                        data: None,
                        error: Some(e.to_string()),
                    },
                )
            }
        }
    }
}

#[derive(Serialize)]
struct FetchStatsReply {
    ok: bool,
    #[serde(flatten)]
    stats: DashboardStats,
}

/// `POST /messages`
pub async fn handle_message(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let message: RelayMessage = match read_json(req).await {
        Ok(m) => m,
        Err(e) => return error_response(e),
    };

    match message {
        RelayMessage::TokenCaptured { token, source_url } => {
            let observation = state.relay.submit_candidate(&token, source_url);
            debug!(?observation, "Token pushed by page observer");
            json_response(
                StatusCode::ACCEPTED,
                &json!({
                    "ok": observation == Observation::Queued,
                    "observation": observation,
                }),
            )
        }

        RelayMessage::DashboardLog {
            token,
            combined,
            log_id,
        } => {
            let Some(token) = resolve_token(&state, token) else {
                return error_response(RelayError::BadRequest("No token available".into()));
            };
            let status = state
                .relay
                .pipeline()
                .dashboard_log(&token, &combined, log_id.as_deref().unwrap_or_default())
                .await;
            info!(ok = status.ok, message = %status.message, "Dashboard log");
            json_response(StatusCode::OK, &status)
        }

        RelayMessage::FetchStats { token } => {
            let Some(token) = resolve_token(&state, token) else {
                return error_response(RelayError::BadRequest("No token available".into()));
            };
            match state.relay.pipeline().fetch_for_dashboard(&token).await {
                Ok(stats) => json_response(StatusCode::OK, &FetchStatsReply { ok: true, stats }),
                Err(error) => json_response(StatusCode::OK, &json!({ "ok": false, "error": error })),
            }
        }

        RelayMessage::FirebaseSignIn { email, password } => {
            let result = state.accounts.sign_in(&email, &password).await.map(Some);
            let (status, reply) = AccountReply::from_result(result);
            json_response(status, &reply)
        }

        RelayMessage::FirebaseSignUp {
            email,
            password,
            access_code,
        } => {
            let result = state
                .accounts
                .sign_up(&email, &password, access_code.as_deref())
                .await
                .map(Some);
            let (status, reply) = AccountReply::from_result(result);
            json_response(status, &reply)
        }

        RelayMessage::FirebaseSignOut => {
            let result = state.accounts.sign_out().await.map(|_| None);
            let (status, reply) = AccountReply::from_result(result);
            json_response(status, &reply)
        }
    }
}

fn resolve_token(state: &AppState, token: Option<String>) -> Option<String> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| state.relay.state().read(|s| s.token().map(str::to_string)))
}
