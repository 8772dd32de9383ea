//! Webhook auto-send

use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::state::OpStatus;
use crate::stats::RawStats;

/// Posts raw stats to a user-configured webhook
pub struct WebhookClient {
    http: Client,
}

impl WebhookClient {
    pub fn new(timeout: Duration, user_agent: &str) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// POST `{token, stats, eligibility, time}` to `url`
    pub async fn send(&self, url: &str, token: &str, raw: &RawStats) -> OpStatus {
        let body = json!({
            "token": token,
            "stats": raw.stats,
            "eligibility": raw.eligibility,
            "time": chrono::Utc::now().timestamp_millis(),
        });

        match self.http.post(url).json(&body).send().await {
            Ok(r) if r.status().is_success() => {
                debug!(url, "Webhook accepted stats");
                OpStatus::ok("sent")
            }
            Ok(r) => {
                let status = r.status().as_u16();
                warn!(url, status, "Webhook rejected stats");
                OpStatus::failed(format!("http {}", status))
            }
            Err(e) => {
                warn!(url, "Webhook send failed: {}", e);
                OpStatus::failed(e.to_string())
            }
        }
    }
}
