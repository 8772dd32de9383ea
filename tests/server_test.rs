//! Ingestion server integration tests
//!
//! Runs the real HTTP server on an ephemeral port. No user is signed in, so
//! captured tokens are stored and pushed but never reported upstream.

use clap::Parser;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rewards_relay::config::Args;
use rewards_relay::identity::{Accounts, IdentityClient};
use rewards_relay::relay::Relay;
use rewards_relay::server::{self, AppState};
use rewards_relay::state::StateStore;
use rewards_relay::stats::ApiClient;
use rewards_relay::store::MemoryConnector;

const API_HOST: &str = "https://api.immutable.com";
const TARGET: &str = "https://api.immutable.com/v1/rewards/redemption/eligibility";

async fn start() -> (SocketAddr, Arc<AppState>) {
    start_with_issuer("http://127.0.0.1:9").await
}

async fn start_with_issuer(issuer: &str) -> (SocketAddr, Arc<AppState>) {
    let args = Args::try_parse_from([
        "rewards-relay",
        "--api-host",
        API_HOST,
        "--firebase-api-key",
        "test-key",
    ])
    .unwrap();
    let state = Arc::new(StateStore::in_memory());
    let source = Arc::new(ApiClient::new(&args.api, args.request_timeout(), &args.user_agent));
    let connector = Arc::new(MemoryConnector::default());
    let (relay, _worker) = Relay::start(&args, Arc::clone(&state), source, connector.clone());

    let identity = IdentityClient::new(issuer, Some("test-key".into()), Duration::from_secs(5), "rewards-relay-test")
        .with_min_interval(Duration::ZERO);
    let accounts = Accounts::new(state, identity, args.backend_defaults(), connector);

    let app = Arc::new(AppState::new(args, relay, accounts));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, Arc::clone(&app)));
    (addr, app)
}

fn observed(url: &str, method: &str, auth: Option<&str>) -> Value {
    let headers: Vec<Value> = auth
        .map(|v| vec![json!({"name": "Authorization", "value": v})])
        .unwrap_or_default();
    json!({
        "url": url,
        "method": method,
        "type": "xmlhttprequest",
        "initiator": "https://play.immutable.com",
        "requestHeaders": headers,
        "phase": "beforeSendHeaders"
    })
}

async fn post(addr: SocketAddr, path: &str, body: &Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("http://{}{}", addr, path))
        .json(body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap_or(Value::Null))
}

async fn get(addr: SocketAddr, path: &str) -> Value {
    reqwest::get(format!("http://{}{}", addr, path))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Poll `/status` until `f` holds
async fn wait_for_status(addr: SocketAddr, f: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..250 {
        let status = get(addr, "/status").await;
        if f(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("status condition not reached");
}

#[tokio::test]
async fn test_health() {
    let (addr, _app) = start().await;
    let health = get(addr, "/health").await;
    assert_eq!(health["healthy"], true);
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_observe_captures_bearer_token() {
    let (addr, app) = start().await;

    let (status, reply) = post(addr, "/observe", &observed(TARGET, "GET", Some("Bearer abc.def.ghi"))).await;
    assert_eq!(status, 202);
    assert_eq!(reply["observation"], "queued");
    assert_eq!(reply["queued"], true);

    let snapshot = wait_for_status(addr, |s| !s["token"].is_null()).await;
    assert_eq!(snapshot["badge"], "ok");
    assert_eq!(snapshot["lastSeen"]["hasAuthorizationHeader"], true);
    assert_eq!(
        app.relay.state().read(|s| s.token().map(str::to_string)).as_deref(),
        Some("abc.def.ghi")
    );
}

#[tokio::test]
async fn test_observe_ignores_other_requests() {
    let (addr, _app) = start().await;

    let (_, reply) = post(
        addr,
        "/observe",
        &observed("https://api.immutable.com/v1/other", "GET", Some("Bearer t")),
    )
    .await;
    assert_eq!(reply["observation"], "ignored");

    let (_, reply) = post(addr, "/observe", &observed(TARGET, "OPTIONS", Some("Bearer t"))).await;
    assert_eq!(reply["observation"], "ignored");

    let (_, reply) = post(addr, "/observe", &observed(TARGET, "GET", None)).await;
    assert_eq!(reply["observation"], "no_credential");

    let status = get(addr, "/status").await;
    assert_eq!(status["badge"], "warning");
    assert!(status["token"].is_null());
    assert!(!status["lastAttemptWithoutAuthAt"].is_null());
}

#[tokio::test]
async fn test_malformed_observation() {
    let (addr, app) = start().await;
    let (status, _) = post(addr, "/observe", &json!({"method": "GET"})).await;
    assert_eq!(status, 400);
    assert!(app.relay.state().read(|s| s.last_processing_error.is_some()));
}

#[tokio::test]
async fn test_request_error_recorded_for_target() {
    let (addr, _app) = start().await;

    let (_, reply) = post(addr, "/observe/error", &json!({"url": "https://example.com/", "error": "x"})).await;
    assert_eq!(reply["recorded"], false);

    let (status, reply) = post(
        addr,
        "/observe/error",
        &json!({"url": TARGET, "error": "net::ERR_CONNECTION_RESET"}),
    )
    .await;
    assert_eq!(status, 202);
    assert_eq!(reply["recorded"], true);

    let snapshot = get(addr, "/status").await;
    assert_eq!(snapshot["badge"], "error");
    assert_eq!(snapshot["lastError"]["error"], "net::ERR_CONNECTION_RESET");
}

#[tokio::test]
async fn test_token_captured_message() {
    let (addr, app) = start().await;

    let (status, reply) = post(
        addr,
        "/messages",
        &json!({"type": "TOKEN_CAPTURED", "token": "bearer page.token.value", "sourceUrl": "https://play.immutable.com/"}),
    )
    .await;
    assert_eq!(status, 202);
    assert_eq!(reply["ok"], true);

    let snapshot = wait_for_status(addr, |s| !s["token"].is_null()).await;
    assert_eq!(snapshot["badge"], "ok");
    let record = app.relay.state().read(|s| s.auth_token.clone()).unwrap();
    assert_eq!(record.token, "page.token.value");
    assert_eq!(record.source_url.as_deref(), Some("https://play.immutable.com/"));
}

#[tokio::test]
async fn test_fetch_stats_without_token() {
    let (addr, _app) = start().await;
    let (status, reply) = post(addr, "/messages", &json!({"type": "FETCH_STATS"})).await;
    assert_eq!(status, 400);
    assert!(reply["error"].as_str().unwrap().contains("No token"));
}

#[tokio::test]
async fn test_fetch_stats_not_signed_in() {
    let (addr, _app) = start().await;
    let (status, reply) = post(addr, "/messages", &json!({"type": "FETCH_STATS", "token": "t"})).await;
    assert_eq!(status, 200);
    assert_eq!(reply, json!({"ok": false, "error": "not signed in"}));
}

#[tokio::test]
async fn test_sign_in_message_updates_running_relay() {
    let issuer = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts:signInWithPassword"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "idToken": "issued-id-token",
            "localId": "uid-42",
            "email": "player@example.com"
        })))
        .expect(1)
        .mount(&issuer)
        .await;
    let (addr, app) = start_with_issuer(&issuer.uri()).await;

    let (status, reply) = post(
        addr,
        "/messages",
        &json!({"type": "FIREBASE_SIGN_IN", "email": "player@example.com", "password": "secret1"}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"]["uid"], "uid-42");

    // The relay's own state now carries the user the aggregator checks
    assert!(app.relay.state().read(|s| s.signed_in_user().is_some()));
    let snapshot = get(addr, "/status").await;
    assert_eq!(snapshot["signedInAs"], "player@example.com");

    let (_, reply) = post(addr, "/messages", &json!({"type": "FIREBASE_SIGN_OUT"})).await;
    assert_eq!(reply["success"], true);
    assert!(app.relay.state().read(|s| s.signed_in_user().is_none()));
}

#[tokio::test]
async fn test_sign_up_message_without_code() {
    let (addr, _app) = start().await;
    let (status, reply) = post(
        addr,
        "/messages",
        &json!({"type": "FIREBASE_SIGN_UP", "email": "player@example.com", "password": "secret1"}),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(reply["success"], false);
}

#[tokio::test]
async fn test_preflight_and_unknown_route() {
    let (addr, _app) = start().await;
    let client = reqwest::Client::new();

    let preflight = client
        .request(reqwest::Method::OPTIONS, format!("http://{}/messages", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status().as_u16(), 204);
    assert_eq!(preflight.headers()["access-control-allow-origin"], "*");

    let missing = client.get(format!("http://{}/nope", addr)).send().await.unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}

#[tokio::test]
async fn test_token_feed_refuses_foreign_origin() {
    let (addr, _app) = start().await;
    let mut request = format!("ws://{}/ws/tokens", addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://evil.example.com".parse().unwrap());
    assert!(tokio_tungstenite::connect_async(request).await.is_err());
}

#[tokio::test]
async fn test_token_feed_pushes_new_token() {
    let (addr, _app) = start().await;
    let mut request = format!("ws://{}/ws/tokens", addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "http://localhost:4200".parse().unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    post(addr, "/messages", &json!({"type": "TOKEN_CAPTURED", "token": "pushed.token.value"})).await;

    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("push within timeout")
        .unwrap()
        .unwrap();
    match msg {
        Message::Text(text) => {
            let parsed: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed, json!({"type": "PUSH_TOKEN", "token": "pushed.token.value"}));
        }
        other => panic!("unexpected frame: {:?}", other),
    }
}
