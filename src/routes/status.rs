//! Relay status for companion UIs

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::server::AppState;
use crate::state::{
    mask_token, CaptureBadge, LocalState, OpStatus, RequestDiagnostic, RequestErrorRecord,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    /// Masked token
    pub token: String,
    pub updated_at: i64,
    pub source_url: Option<String>,
    pub exp_seconds: Option<i64>,
    pub expires_at_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub depth: usize,
    pub capacity: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub badge: CaptureBadge,
    pub token: Option<TokenStatus>,
    pub last_log_id: Option<String>,
    pub last_firebase_status: Option<OpStatus>,
    pub last_auto_send_status: Option<OpStatus>,
    pub last_seen: Option<RequestDiagnostic>,
    pub last_error: Option<RequestErrorRecord>,
    pub last_processing_error: Option<String>,
    pub last_attempt_without_auth_at: Option<i64>,
    pub signed_in_as: Option<String>,
    pub queue: QueueStatus,
    pub observers: usize,
}

impl StatusResponse {
    fn build(snapshot: LocalState, queue: QueueStatus, observers: usize) -> Self {
        let signed_in_as = snapshot
            .signed_in_user()
            .map(|u| u.email.clone().unwrap_or_else(|| u.uid.clone()));
        Self {
            badge: snapshot.badge,
            token: snapshot.auth_token.map(|r| TokenStatus {
                token: mask_token(&r.token),
                updated_at: r.updated_at,
                source_url: r.source_url,
                exp_seconds: r.exp_seconds,
                expires_at_ms: r.expires_at_ms,
            }),
            last_log_id: snapshot.last_log_id,
            last_firebase_status: snapshot.last_firebase_status,
            last_auto_send_status: snapshot.last_auto_send_status,
            last_seen: snapshot.last_seen,
            last_error: snapshot.last_error,
            last_processing_error: snapshot.last_processing_error,
            last_attempt_without_auth_at: snapshot.last_attempt_without_auth_at,
            signed_in_as,
            queue,
            observers,
        }
    }
}

/// `GET /status`
pub fn status_check(state: &AppState) -> Response<Full<Bytes>> {
    let relay = &state.relay;
    let queue = QueueStatus {
        depth: relay.queue().depth(),
        capacity: relay.queue().capacity(),
    };
    let response = StatusResponse::build(relay.state().snapshot(), queue, relay.feed().observers());
    json_response(StatusCode::OK, &response)
}
