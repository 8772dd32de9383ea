//! Deduplicating token sink
//!
//! Stores a candidate token only when it differs from the stored one, then
//! pushes it to observers and, if the cooldown gate is open, hands it to the
//! downstream processor on its own task.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::cooldown::CooldownGate;
use super::expiry::decode_expiry;
use super::feed::TokenFeed;
use crate::state::{mask_token, StateStore, StoredTokenRecord};

/// Downstream work triggered by a newly stored token
#[async_trait]
pub trait TokenProcessor: Send + Sync {
    async fn process(&self, token: String);
}

/// Result of a submission
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Candidate equals the stored token; nothing was written
    Unchanged,
    /// Record replaced; `run` is the downstream task if the gate was open
    Stored { run: Option<JoinHandle<()>> },
    /// Disk write failed; the previous record was restored
    PersistFailed(String),
}

impl SubmitOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

pub struct TokenSink {
    state: Arc<StateStore>,
    gate: CooldownGate,
    feed: Arc<TokenFeed>,
    processor: Arc<dyn TokenProcessor>,
}

impl TokenSink {
    pub fn new(
        state: Arc<StateStore>,
        gate: CooldownGate,
        feed: Arc<TokenFeed>,
        processor: Arc<dyn TokenProcessor>,
    ) -> Self {
        Self {
            state,
            gate,
            feed,
            processor,
        }
    }

    pub fn gate(&self) -> &CooldownGate {
        &self.gate
    }

    /// Submit a candidate token seen at `source_url`
    pub async fn submit(&self, candidate: &str, source_url: Option<&str>) -> SubmitOutcome {
        let record = StoredTokenRecord {
            token: candidate.to_string(),
            updated_at: chrono::Utc::now().timestamp_millis(),
            source_url: source_url.map(str::to_string),
            exp_seconds: None,
            expires_at_ms: None,
        };

        let mut previous = None;
        let changed = self.state.update_if(|s| {
            if s.token() == Some(candidate) {
                return false;
            }
            let expiry = decode_expiry(candidate);
            previous = s.auth_token.replace(StoredTokenRecord {
                exp_seconds: expiry.map(|e| e.exp_seconds),
                expires_at_ms: expiry.map(|e| e.expires_at_ms),
                ..record
            });
            true
        });

        if !changed {
            debug!(token = %mask_token(candidate), "Token unchanged, skipping write");
            return SubmitOutcome::Unchanged;
        }

        if let Err(e) = self.state.persist().await {
            error!(token = %mask_token(candidate), "Failed to persist token: {}", e);
            // Roll back so the same token counts as new on the next submission
            self.state.update_if(|s| {
                if s.token() != Some(candidate) {
                    return false;
                }
                s.auth_token = previous;
                true
            });
            return SubmitOutcome::PersistFailed(e.to_string());
        }

        info!(
            token = %mask_token(candidate),
            source = source_url.unwrap_or("-"),
            "Stored new token"
        );

        let observers = self.feed.push_token(candidate);
        debug!(observers, "Pushed token to observers");

        let run = if self.gate.should_process(candidate) {
            let processor = Arc::clone(&self.processor);
            let token = candidate.to_string();
            Some(tokio::spawn(async move { processor.process(token).await }))
        } else {
            debug!(token = %mask_token(candidate), "Cooldown active, not processing");
            None
        };

        SubmitOutcome::Stored { run }
    }
}
