//! HTTP routes for the relay

pub mod health;
pub mod messages;
pub mod observe;
pub mod status;
pub mod token_feed;

pub use health::health_check;
pub use messages::{handle_message, RelayMessage};
pub use observe::{handle_observe, handle_observe_error};
pub use status::status_check;
pub use token_feed::{handle_token_feed_ws, is_allowed_origin};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::RelayError;

/// Largest request body accepted by the JSON routes
pub const MAX_BODY_BYTES: usize = 256 * 1024;

/// Read and parse a JSON request body
pub(crate) async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, RelayError> {
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| RelayError::BadRequest(format!("Failed to read request body: {}", e)))?
        .to_bytes();
    Ok(serde_json::from_slice(&body)?)
}

/// JSON response with permissive CORS
pub(crate) fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

pub(crate) fn error_response(err: RelayError) -> Response<Full<Bytes>> {
    let (status, body) = err.into_status_code_and_body();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
