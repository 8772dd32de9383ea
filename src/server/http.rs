//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo, one task per connection, upgrades enabled
//! for the token feed WebSocket.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::Args;
use crate::identity::Accounts;
use crate::relay::Relay;
use crate::routes;
use crate::types::RelayError;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub relay: Relay,
    /// Sign-in state shared with the relay's state store
    pub accounts: Accounts,
    /// Process start, for the uptime reported by `/health`
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, relay: Relay, accounts: Accounts) -> Self {
        Self {
            args,
            relay,
            accounts,
            started_at: Instant::now(),
        }
    }
}

/// Start the HTTP server on the configured address
pub async fn run(state: Arc<AppState>) -> Result<(), RelayError> {
    let listener = TcpListener::bind(state.args.listen).await?;
    serve(listener, state).await
}

/// Accept connections on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), RelayError> {
    info!("Relay listening on {}", listener.local_addr()?);
    info!(
        "Instrumented host: {} (cooldown {}s)",
        state.args.api.api_host, state.args.cooldown_secs
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health_check(&state))
        }

        // Capture badge, stored token and last outcomes
        (Method::GET, "/status") => to_boxed(routes::status_check(&state)),

        // Observed request from the in-browser shim
        (Method::POST, "/observe") => to_boxed(routes::handle_observe(Arc::clone(&state), req).await),

        // Request-level failure from the in-browser shim
        (Method::POST, "/observe/error") => {
            to_boxed(routes::handle_observe_error(Arc::clone(&state), req).await)
        }

        // Tagged messages from page observers and UIs
        (Method::POST, "/messages") => to_boxed(routes::handle_message(Arc::clone(&state), req).await),

        // Token push feed for companion page observers
        (Method::GET, "/ws/tokens") => {
            to_boxed(routes::handle_token_feed_ws(Arc::clone(&state), req).await)
        }

        // CORS preflight
        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        _ => to_boxed(not_found_response(&path)),
    };

    Ok(response)
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Max-Age", "86400")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
