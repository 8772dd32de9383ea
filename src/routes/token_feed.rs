//! Token push feed for companion page observers
//!
//! ## Protocol
//!
//! Connect: `ws://127.0.0.1:8787/ws/tokens`
//!
//! Messages (server → client):
//! - `{"type": "PUSH_TOKEN", "token": "eyJ..."}` on connect when a token is
//!   stored, then after every stored token change
//!
//! Clients only need to listen. Upgrades are refused unless the `Origin`
//! header names a local page.

use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capture::FeedMessage;
use crate::server::AppState;

/// WebSocket type after upgrade
type HyperWebSocket = hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// Origin prefixes of pages allowed to observe tokens
const ALLOWED_ORIGINS: &[&str] = &["http://localhost", "http://127.0.0.1"];

/// Local and file pages only; `null` is what browsers send for `file://`
pub fn is_allowed_origin(origin: Option<&str>) -> bool {
    let Some(origin) = origin.map(str::trim) else {
        return false;
    };
    if origin == "null" || origin.starts_with("file://") {
        return true;
    }
    ALLOWED_ORIGINS.iter().any(|prefix| {
        origin
            .strip_prefix(prefix)
            .map(|rest| rest.is_empty() || rest.starts_with(':') || rest.starts_with('/'))
            .unwrap_or(false)
    })
}

/// Handle WebSocket upgrade for the token feed
pub async fn handle_token_feed_ws(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let origin = req
        .headers()
        .get("origin")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    if !is_allowed_origin(origin.as_deref()) {
        warn!(origin = origin.as_deref().unwrap_or("-"), "Token feed origin refused");
        return Response::builder()
            .status(StatusCode::FORBIDDEN)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(r#"{"error": "Origin not allowed"}"#)))
            .unwrap();
    }

    if !hyper_tungstenite::is_upgrade_request(&req) {
        return Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(
                r#"{"error": "WebSocket upgrade required"}"#,
            )))
            .unwrap();
    }

    let (response, websocket) = match hyper_tungstenite::upgrade(req, None) {
        Ok((resp, ws)) => (resp, ws),
        Err(e) => {
            error!("WebSocket upgrade failed: {}", e);
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from("WebSocket upgrade failed")))
                .unwrap();
        }
    };

    // Subscribe before answering so no push after the handshake is missed
    let rx = state.relay.feed().subscribe();
    let current = state.relay.state().read(|s| s.token().map(str::to_string));
    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => {
                let ws: HyperWebSocket = ws;
                if let Err(e) = handle_feed_connection(ws, rx, current).await {
                    warn!("Token feed WebSocket error: {}", e);
                }
            }
            Err(e) => {
                error!("WebSocket connection failed: {}", e);
            }
        }
    });

    let (parts, _body) = response.into_parts();
    Response::from_parts(parts, Full::new(Bytes::new()))
}

async fn handle_feed_connection(
    ws: HyperWebSocket,
    mut rx: broadcast::Receiver<FeedMessage>,
    current: Option<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = ws.split();

    info!(%conn_id, "Token feed observer connected");

    if let Some(token) = current {
        let json = serde_json::to_string(&FeedMessage::PushToken { token })?;
        sender.send(WsMessage::Text(json)).await?;
    }

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(feed_msg) => {
                        let json = serde_json::to_string(&feed_msg)?;
                        if sender.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(%conn_id, skipped, "Token feed observer lagging");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) => break,
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sender.send(WsMessage::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!(%conn_id, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
        }
    }

    info!(%conn_id, "Token feed observer disconnected");
    Ok(())
}
