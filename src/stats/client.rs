//! Instrumented API client
//!
//! Fetches the statistics and eligibility resources with a captured bearer
//! token, and resolves the caller's public IP on the side.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::AggregateError;
use crate::config::ApiArgs;

/// Fallback when the public IP cannot be resolved
pub const UNKNOWN_IP: &str = "Unknown IP";

const ACCEPT: &str = "application/json, text/plain, */*";
const IP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Both upstream payloads, as received
#[derive(Debug, Clone, PartialEq)]
pub struct RawStats {
    pub stats: Value,
    pub eligibility: Value,
}

/// Source of upstream statistics
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Fetch both resources; fails unless both answer 2xx with JSON
    async fn fetch(&self, token: &str) -> Result<RawStats, AggregateError>;

    /// Best-effort public IP lookup; never fails
    async fn public_ip(&self) -> String;
}

pub struct ApiClient {
    http: Client,
    stats_url: String,
    eligibility_url: String,
    ip_lookup_url: String,
}

impl ApiClient {
    pub fn new(api: &ApiArgs, timeout: Duration, user_agent: &str) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();

        let host = api.api_host.trim_end_matches('/');
        Self {
            http,
            stats_url: format!("{}{}", host, api.stats_path),
            eligibility_url: format!("{}{}", host, api.eligibility_path),
            ip_lookup_url: api.ip_lookup_url.clone(),
        }
    }

    async fn get(&self, url: &str, token: &str) -> reqwest::Result<Response> {
        self.http
            .get(url)
            .bearer_auth(token)
            .header("Accept", ACCEPT)
            .send()
            .await
    }
}

fn status_of(result: &reqwest::Result<Response>) -> Option<u16> {
    result.as_ref().ok().map(|r| r.status().as_u16())
}

#[async_trait]
impl StatsSource for ApiClient {
    async fn fetch(&self, token: &str) -> Result<RawStats, AggregateError> {
        let (stats, eligibility) = tokio::join!(
            self.get(&self.stats_url, token),
            self.get(&self.eligibility_url, token)
        );

        let stats_status = status_of(&stats);
        let eligibility_status = status_of(&eligibility);

        let (stats, eligibility) = match (stats, eligibility) {
            (Ok(s), Ok(e)) if s.status().is_success() && e.status().is_success() => (s, e),
            (Err(err), _) | (_, Err(err)) => {
                return Err(AggregateError::NetworkOrHttp {
                    stats_status,
                    eligibility_status,
                    message: err.to_string(),
                })
            }
            _ => return Err(AggregateError::http(stats_status, eligibility_status)),
        };

        let (stats, eligibility) = tokio::join!(stats.json::<Value>(), eligibility.json::<Value>());
        match (stats, eligibility) {
            (Ok(stats), Ok(eligibility)) => Ok(RawStats { stats, eligibility }),
            (Err(err), _) | (_, Err(err)) => Err(AggregateError::NetworkOrHttp {
                stats_status,
                eligibility_status,
                message: format!("invalid payload: {}", err),
            }),
        }
    }

    async fn public_ip(&self) -> String {
        let request = self.http.get(&self.ip_lookup_url).timeout(IP_LOOKUP_TIMEOUT);
        let response = match request.send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(status = r.status().as_u16(), "IP lookup rejected");
                return UNKNOWN_IP.to_string();
            }
            Err(e) => {
                warn!("IP lookup failed: {}", e);
                return UNKNOWN_IP.to_string();
            }
        };

        response
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v.get("ip").and_then(Value::as_str).map(str::to_string))
            .filter(|ip| !ip.is_empty())
            .unwrap_or_else(|| UNKNOWN_IP.to_string())
    }
}
