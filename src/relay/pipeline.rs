//! Aggregate, key and dispatch
//!
//! The downstream half of the relay. A token that passed the sink and the
//! cooldown gate is aggregated, optionally forwarded to the webhook, keyed
//! and written to the log collection. UI-initiated runs (`DASHBOARD_LOG`,
//! `FETCH_STATS`) share the same pieces.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::webhook::WebhookClient;
use crate::capture::TokenProcessor;
use crate::logging::{build_key, LogDispatcher, LogEntry};
use crate::state::{mask_token, OpStatus, StateStore};
use crate::stats::{normalize, AggregateError, Aggregator, EligibilityRules, StatsSummary, UNKNOWN_IP};

/// Shown to UIs when the fresh key equals the last submitted one
pub const NO_CHANGES: &str = "There are no new changes";

/// Outcome of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineReport {
    NotSignedIn,
    FetchFailed(String),
    Dispatched {
        key: String,
        /// Key differs from the last submitted one
        fresh: bool,
        status: OpStatus,
    },
}

/// Answer to a UI stats request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub summary: StatsSummary,
    pub eligibility: EligibilityRules,
    pub log_id: String,
    pub no_changes: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct Pipeline {
    state: Arc<StateStore>,
    aggregator: Aggregator,
    dispatcher: LogDispatcher,
    webhook: WebhookClient,
    user_agent: String,
    device_type: String,
    dashboard_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        state: Arc<StateStore>,
        aggregator: Aggregator,
        dispatcher: LogDispatcher,
        webhook: WebhookClient,
    ) -> Self {
        Self {
            state,
            aggregator,
            dispatcher,
            webhook,
            user_agent: concat!("rewards-relay/", env!("CARGO_PKG_VERSION")).to_string(),
            device_type: "Desktop".to_string(),
            dashboard_timeout: Duration::from_secs(15),
        }
    }

    /// Set the agent and device reported in log entries
    pub fn with_agent(mut self, user_agent: &str, device_type: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self.device_type = device_type.to_string();
        self
    }

    /// Set the bound for UI-facing fetches
    pub fn with_dashboard_timeout(mut self, timeout: Duration) -> Self {
        self.dashboard_timeout = timeout;
        self
    }

    /// Full run for a freshly captured token
    pub async fn run(&self, token: &str) -> PipelineReport {
        let ip_lookup = self.aggregator.spawn_ip_lookup();
        let aggregation = match self.aggregator.aggregate(token).await {
            Ok(a) => a,
            Err(e) => {
                if let Some(lookup) = &ip_lookup {
                    lookup.abort();
                }
                return match e {
                    AggregateError::NotSignedIn => PipelineReport::NotSignedIn,
                    e => PipelineReport::FetchFailed(e.to_string()),
                };
            }
        };

        self.auto_send(token, &aggregation.raw).await;

        let key = build_key(
            token,
            aggregation.summary.progress_percentage,
            &aggregation.summary.tier_name,
        );
        let fresh = self.mark_submitted(&key);
        if !fresh {
            debug!(log_id = %key, "{}", NO_CHANGES);
        }

        let ip = match ip_lookup {
            Some(lookup) => lookup.await.unwrap_or_else(|_| UNKNOWN_IP.to_string()),
            None => UNKNOWN_IP.to_string(),
        };
        let entry = self.entry(&key, aggregation.summary, aggregation.eligibility, ip);
        let status = self.dispatcher.dispatch(&key, &entry).await;
        PipelineReport::Dispatched { key, fresh, status }
    }

    /// Dispatch precomputed stats sent by a UI; not gated by the cooldown.
    ///
    /// The key is recomputed from the payload; a differing `log_id` from the
    /// caller is only logged.
    pub async fn dashboard_log(&self, token: &str, combined: &Value, log_id: &str) -> OpStatus {
        let normalized = normalize(combined);
        let key = build_key(
            token,
            normalized.summary.progress_percentage,
            &normalized.summary.tier_name,
        );
        if !log_id.is_empty() && log_id != key {
            debug!(supplied = log_id, computed = %key, "Caller log id differs");
        }
        self.mark_submitted(&key);

        let ip = self.aggregator.lookup_ip().await;

        let entry = self.entry(&key, normalized.summary, normalized.eligibility, ip);
        self.dispatcher.dispatch(&key, &entry).await
    }

    /// Aggregate for a UI within the bounded wait; nothing is dispatched
    pub async fn fetch_for_dashboard(&self, token: &str) -> Result<DashboardStats, String> {
        let aggregation =
            match tokio::time::timeout(self.dashboard_timeout, self.aggregator.aggregate(token)).await {
                Err(_) => {
                    warn!(token = %mask_token(token), "Stats fetch timed out");
                    return Err("timeout".to_string());
                }
                Ok(Err(e)) => return Err(e.to_string()),
                Ok(Ok(a)) => a,
            };

        let key = build_key(
            token,
            aggregation.summary.progress_percentage,
            &aggregation.summary.tier_name,
        );
        let no_changes = self.state.read(|s| s.last_log_id.as_deref() == Some(key.as_str()));

        Ok(DashboardStats {
            summary: aggregation.summary,
            eligibility: aggregation.eligibility,
            log_id: key,
            no_changes,
            message: no_changes.then(|| NO_CHANGES.to_string()),
        })
    }

    /// Record `key` as the last submitted one; true if it changed
    fn mark_submitted(&self, key: &str) -> bool {
        self.state.update_if(|s| {
            if s.last_log_id.as_deref() == Some(key) {
                return false;
            }
            s.last_log_id = Some(key.to_string());
            true
        })
    }

    fn entry(
        &self,
        key: &str,
        summary: StatsSummary,
        eligibility: EligibilityRules,
        ip: String,
    ) -> LogEntry {
        let (user_id, user_email) = self.state.read(|s| {
            s.signed_in_user()
                .map(|u| (Some(u.uid.clone()), u.email.clone()))
                .unwrap_or((None, None))
        });
        LogEntry::new(key.to_string(), summary, eligibility)
            .with_ip(ip)
            .with_agent(self.user_agent.as_str(), self.device_type.as_str())
            .with_user(user_id, user_email)
    }

    async fn auto_send(&self, token: &str, raw: &crate::stats::RawStats) {
        let target = self.state.read(|s| {
            s.webhook_url
                .clone()
                .filter(|url| s.auto_send && !url.trim().is_empty())
        });
        let Some(url) = target else {
            return;
        };

        let status = self.webhook.send(&url, token, raw).await;
        self.state
            .update(|s| s.last_auto_send_status = Some(status));
    }
}

#[async_trait]
impl TokenProcessor for Pipeline {
    async fn process(&self, token: String) {
        match self.run(&token).await {
            PipelineReport::NotSignedIn => {
                info!(token = %mask_token(&token), "Captured token, not signed in");
            }
            PipelineReport::FetchFailed(message) => {
                warn!(token = %mask_token(&token), "Pipeline stopped: {}", message);
            }
            PipelineReport::Dispatched { key, fresh, status } => {
                info!(
                    token = %mask_token(&token),
                    log_id = %key,
                    fresh,
                    ok = status.ok,
                    message = %status.message,
                    "Pipeline finished"
                );
            }
        }
    }
}
