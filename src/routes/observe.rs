//! Request observation endpoints
//!
//! The in-browser shim posts every outgoing request here. Handlers answer
//! as soon as the capture job is queued; nothing downstream is awaited.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{error_response, json_response, read_json};
use crate::capture::ObservedRequest;
use crate::relay::Observation;
use crate::server::AppState;

#[derive(Debug, Serialize)]
struct ObserveReply {
    observation: Observation,
    queued: bool,
}

/// Failure notification for an observed request
#[derive(Debug, Deserialize)]
pub struct RequestFailure {
    pub url: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// `POST /observe`
pub async fn handle_observe(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let request: ObservedRequest = match read_json(req).await {
        Ok(r) => r,
        Err(e) => {
            state.relay.record_processing_error(&e.to_string());
            return error_response(e);
        }
    };

    let observation = state.relay.observe(&request);
    debug!(url = %request.url, ?observation, "Observed request");

    json_response(
        StatusCode::ACCEPTED,
        &ObserveReply {
            observation,
            queued: observation == Observation::Queued,
        },
    )
}

/// `POST /observe/error`
pub async fn handle_observe_error(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let failure: RequestFailure = match read_json(req).await {
        Ok(f) => f,
        Err(e) => return error_response(e),
    };

    let recorded = state
        .relay
        .record_request_error(&failure.url, failure.error.as_deref());
    json_response(StatusCode::ACCEPTED, &serde_json::json!({ "recorded": recorded }))
}
