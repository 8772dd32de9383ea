//! Stats aggregation
//!
//! Fetches the two upstream resources for a token and folds them into a
//! [`StatsSummary`]. Requires a signed-in user; failures are recorded as the
//! last auto-send status for UIs. The public IP lookup runs on its own task
//! so it never holds up the summary.

pub mod client;
pub mod summary;

pub use client::{ApiClient, RawStats, StatsSource, UNKNOWN_IP};
pub use summary::{normalize, EligibilityRules, Normalized, StatsSummary};

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::state::{mask_token, OpStatus, StateStore};

/// Why an aggregation produced no summary
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregateError {
    #[error("not signed in")]
    NotSignedIn,

    #[error("{message}")]
    NetworkOrHttp {
        stats_status: Option<u16>,
        eligibility_status: Option<u16>,
        message: String,
    },
}

impl AggregateError {
    /// Non-2xx answer from one or both resources
    pub fn http(stats_status: Option<u16>, eligibility_status: Option<u16>) -> Self {
        let label = |s: Option<u16>| s.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        Self::NetworkOrHttp {
            stats_status,
            eligibility_status,
            message: format!("stats:{} elig:{}", label(stats_status), label(eligibility_status)),
        }
    }
}

/// Successful aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub raw: RawStats,
    pub summary: StatsSummary,
    pub eligibility: EligibilityRules,
}

pub struct Aggregator {
    state: Arc<StateStore>,
    source: Arc<dyn StatsSource>,
}

impl Aggregator {
    pub fn new(state: Arc<StateStore>, source: Arc<dyn StatsSource>) -> Self {
        Self { state, source }
    }

    /// Public IP lookup, recorded as the last known address
    pub async fn lookup_ip(&self) -> String {
        let ip = self.source.public_ip().await;
        self.state.update(|s| s.last_public_ip = Some(ip.clone()));
        ip
    }

    /// Start the IP lookup on its own task; `None` when nobody is signed in
    pub fn spawn_ip_lookup(&self) -> Option<JoinHandle<String>> {
        if self.state.read(|s| s.signed_in_user().is_none()) {
            return None;
        }
        let state = Arc::clone(&self.state);
        let source = Arc::clone(&self.source);
        Some(tokio::spawn(async move {
            Aggregator { state, source }.lookup_ip().await
        }))
    }

    /// Fetch and normalise the stats behind `token`
    pub async fn aggregate(&self, token: &str) -> Result<Aggregation, AggregateError> {
        if self.state.read(|s| s.signed_in_user().is_none()) {
            self.state
                .update(|s| s.last_auto_send_status = Some(OpStatus::failed("not signed in")));
            info!("Skipping aggregation: not signed in");
            return Err(AggregateError::NotSignedIn);
        }

        let raw = match self.source.fetch(token).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(token = %mask_token(token), "Stats fetch failed: {}", e);
                self.state
                    .update(|s| s.last_auto_send_status = Some(OpStatus::failed(e.to_string())));
                return Err(e);
            }
        };

        let summary = StatsSummary::from_stats(&raw.stats);
        let eligibility = EligibilityRules::from_payload(&raw.eligibility);
        info!(
            progress = summary.progress_percentage,
            tier = %summary.tier_name,
            completed = summary.total_completed_quests,
            "Aggregated stats"
        );

        Ok(Aggregation {
            raw,
            summary,
            eligibility,
        })
    }
}
