//! End-to-end capture pipeline tests against mocked upstreams
//!
//! The rewards API, IP lookup and document store are served by one wiremock
//! server; state lives in a temporary file.

use clap::Parser;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rewards_relay::config::Args;
use rewards_relay::logging::{build_key, MISSING_CONFIG};
use rewards_relay::relay::{Observation, Relay};
use rewards_relay::state::{LocalState, OpStatus, SignedInUser, StateStore};
use rewards_relay::stats::ApiClient;
use rewards_relay::store::FirestoreConnector;

const STATS_PATH: &str = "/v3/rewards/sweepstakes/user-stats/predicted";
const ELIGIBILITY_PATH: &str = "/v1/rewards/redemption/eligibility";
const EXP: i64 = 2_000_000_000;

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: i64,
}

fn token() -> String {
    encode(
        &Header::default(),
        &Claims {
            sub: "player-1".into(),
            exp: EXP,
        },
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

fn args(server: &MockServer, extra: &[&str]) -> Args {
    let uri = server.uri();
    let ip_url = format!("{}/ip", uri);
    let mut argv = vec![
        "rewards-relay",
        "--api-host",
        uri.as_str(),
        "--ip-lookup-url",
        ip_url.as_str(),
        "--firestore-base",
        uri.as_str(),
        "--cooldown-secs",
        "120",
    ];
    argv.extend_from_slice(extra);
    Args::try_parse_from(argv).unwrap()
}

fn signed_in() -> LocalState {
    LocalState {
        firebase_user: Some(SignedInUser {
            uid: "u1".into(),
            email: Some("player@example.com".into()),
            id_token: Some("id-token".into()),
            refresh_token: None,
        }),
        ..Default::default()
    }
}

async fn open_state(dir: &TempDir, seed: LocalState) -> Arc<StateStore> {
    let path = dir.path().join("state.json");
    std::fs::write(&path, serde_json::to_vec(&seed).unwrap()).unwrap();
    Arc::new(StateStore::open(&path).await.unwrap())
}

fn start(args: &Args, state: Arc<StateStore>) -> Relay {
    let source = Arc::new(ApiClient::new(&args.api, args.request_timeout(), &args.user_agent));
    let connector = Arc::new(FirestoreConnector::new(
        &args.backend.firestore_base,
        args.request_timeout(),
        &args.user_agent,
    ));
    let (relay, _worker) = Relay::start(args, state, source, connector);
    relay
}

async fn mount_upstream(server: &MockServer, token: &str, stats_status: u16) {
    Mock::given(method("GET"))
        .and(path(STATS_PATH))
        .and(header("authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(stats_status).set_body_json(json!({
            "percentageToNextTier": 42.5,
            "predictedRarity": "Epic",
            "weeklyPoints": 120,
            "games": [
                {"quests": [
                    {"name": "Daily login", "timesCompleted": 3},
                    {"name": "Win a match", "lastCompletedAt": null, "timesCompleted": 0}
                ]}
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(ELIGIBILITY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rules": {"is_kyc_exempt": true, "have_verified_phone": false}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ip": "198.51.100.4"})))
        .mount(server)
        .await;
}

async fn mount_store(server: &MockServer, status: u16, expected: u64) {
    Mock::given(method("POST"))
        .and(path_regex(r"/documents/StatsHistory$"))
        .and(query_param("key", "test-key"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({})))
        .expect(expected)
        .mount(server)
        .await;
}

/// Poll `f` until it yields a value
async fn wait_for<T>(state: &StateStore, f: impl Fn(&LocalState) -> Option<T>) -> T {
    for _ in 0..250 {
        if let Some(v) = state.read(&f) {
            return v;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

fn read_state_file(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_captured_token_logged_once() {
    let server = MockServer::start().await;
    let token = token();
    mount_upstream(&server, &token, 200).await;
    mount_store(&server, 200, 1).await;

    let dir = TempDir::new().unwrap();
    let state = open_state(&dir, signed_in()).await;
    let relay = start(&args(&server, &["--firebase-api-key", "test-key"]), Arc::clone(&state));

    let bearer = format!("Bearer {}", token);
    assert_eq!(relay.submit_candidate(&bearer, None), Observation::Queued);
    assert_eq!(relay.submit_candidate(&bearer, None), Observation::Queued);

    let status = wait_for(&state, |s| s.last_firebase_status.clone()).await;
    assert_eq!(status, OpStatus::ok("logged"));

    let key = build_key(&token, 42.5, "Epic");
    assert_eq!(state.read(|s| s.last_log_id.clone()), Some(key.clone()));
    assert_eq!(state.read(|s| s.last_public_ip.clone()).as_deref(), Some("198.51.100.4"));

    // Token record persisted with its decoded expiry
    let on_disk = read_state_file(state.path().unwrap());
    assert_eq!(on_disk["immutableAuthToken"]["token"], token.as_str());
    assert_eq!(on_disk["immutableAuthToken"]["expSeconds"], EXP);

    // Entry written under the key, without the raw token
    let requests = server.received_requests().await.unwrap();
    let create = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .expect("create request");
    assert!(create
        .url
        .query_pairs()
        .any(|(k, v)| k == "documentId" && v == key.as_str()));
    let body: Value = serde_json::from_slice(&create.body).unwrap();
    let fields = &body["fields"];
    assert_eq!(fields["logId"]["stringValue"], key.as_str());
    assert_eq!(fields["tier"]["stringValue"], "Epic");
    assert_eq!(fields["progressPercentage"]["doubleValue"], 42.5);
    assert_eq!(fields["userId"]["stringValue"], "u1");
    assert!(!body.to_string().contains(&token));
}

#[tokio::test]
async fn test_existing_document_counts_as_logged() {
    let server = MockServer::start().await;
    let token = token();
    mount_upstream(&server, &token, 200).await;
    mount_store(&server, 409, 1).await;

    let dir = TempDir::new().unwrap();
    let state = open_state(&dir, signed_in()).await;
    let relay = start(&args(&server, &["--firebase-api-key", "test-key"]), Arc::clone(&state));

    relay.submit_candidate(&token, None);
    let status = wait_for(&state, |s| s.last_firebase_status.clone()).await;
    assert_eq!(status, OpStatus::ok("logged"));
}

#[tokio::test]
async fn test_missing_api_key_fails_fast() {
    let server = MockServer::start().await;
    let token = token();
    mount_upstream(&server, &token, 200).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let state = open_state(&dir, signed_in()).await;
    let relay = start(&args(&server, &[]), Arc::clone(&state));

    relay.submit_candidate(&token, None);
    let status = wait_for(&state, |s| s.last_firebase_status.clone()).await;
    assert_eq!(status, OpStatus::failed(MISSING_CONFIG));
}

#[tokio::test]
async fn test_not_signed_in_skips_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let state = open_state(&dir, LocalState::default()).await;
    let relay = start(&args(&server, &["--firebase-api-key", "test-key"]), Arc::clone(&state));

    let token = token();
    relay.submit_candidate(&token, None);
    let status = wait_for(&state, |s| s.last_auto_send_status.clone()).await;
    assert_eq!(status, OpStatus::failed("not signed in"));

    // The token itself is still stored
    assert_eq!(state.read(|s| s.token().map(str::to_string)), Some(token));
    assert!(state.read(|s| s.last_firebase_status.is_none()));
}

#[tokio::test]
async fn test_upstream_error_not_logged() {
    let server = MockServer::start().await;
    let token = token();
    mount_upstream(&server, &token, 500).await;
    mount_store(&server, 200, 0).await;

    let dir = TempDir::new().unwrap();
    let state = open_state(&dir, signed_in()).await;
    let relay = start(&args(&server, &["--firebase-api-key", "test-key"]), Arc::clone(&state));

    relay.submit_candidate(&token, None);
    let status = wait_for(&state, |s| s.last_auto_send_status.clone()).await;
    assert_eq!(status, OpStatus::failed("stats:500 elig:200"));
    assert!(state.read(|s| s.last_log_id.is_none()));
}

#[tokio::test]
async fn test_webhook_auto_send() {
    let server = MockServer::start().await;
    let token = token();
    mount_upstream(&server, &token, 200).await;
    mount_store(&server, 200, 1).await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut seed = signed_in();
    seed.auto_send = true;
    seed.webhook_url = Some(format!("{}/hook", server.uri()));
    let dir = TempDir::new().unwrap();
    let state = open_state(&dir, seed).await;
    let relay = start(&args(&server, &["--firebase-api-key", "test-key"]), Arc::clone(&state));

    relay.submit_candidate(&token, None);
    let status = wait_for(&state, |s| s.last_auto_send_status.clone()).await;
    assert_eq!(status, OpStatus::ok("sent"));
    wait_for(&state, |s| s.last_firebase_status.clone()).await;

    let requests = server.received_requests().await.unwrap();
    let hook = requests.iter().find(|r| r.url.path() == "/hook").unwrap();
    let body: Value = serde_json::from_slice(&hook.body).unwrap();
    assert_eq!(body["token"], token.as_str());
    assert_eq!(body["stats"]["predictedRarity"], "Epic");
    assert_eq!(body["eligibility"]["rules"]["is_kyc_exempt"], true);
}

#[tokio::test]
async fn test_dashboard_fetch_times_out() {
    let server = MockServer::start().await;
    let token = token();
    Mock::given(method("GET"))
        .and(path(STATS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ELIGIBILITY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let state = Arc::new(StateStore::in_memory_with(signed_in()));
    let relay = start(&args(&server, &["--dashboard-timeout-ms", "200"]), state);

    let result = relay.pipeline().fetch_for_dashboard(&token).await;
    assert_eq!(result, Err("timeout".to_string()));
}
