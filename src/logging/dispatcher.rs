//! Log sink dispatcher
//!
//! Writes a log entry under its idempotency key. A create that collides with
//! an existing document is the expected outcome of resending unchanged data
//! and counts as success.

use std::sync::Arc;
use tracing::{info, warn};

use super::entry::LogEntry;
use crate::config::BackendConfig;
use crate::state::{OpStatus, StateStore};
use crate::store::{StoreConnector, WriteOutcome};

/// Status message when the backend configuration is incomplete
pub const MISSING_CONFIG: &str = "Missing Firebase config";

pub struct LogDispatcher {
    state: Arc<StateStore>,
    defaults: BackendConfig,
    connector: Arc<dyn StoreConnector>,
}

impl LogDispatcher {
    pub fn new(state: Arc<StateStore>, defaults: BackendConfig, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            state,
            defaults,
            connector,
        }
    }

    /// Write `entry` with id `key` and record the outcome
    pub async fn dispatch(&self, key: &str, entry: &LogEntry) -> OpStatus {
        let overrides = self.state.read(|s| s.firebase_config.clone());

        let status = match BackendConfig::resolve(&self.defaults, overrides.as_ref()) {
            None => {
                warn!("Backend configuration incomplete, not logging");
                OpStatus::failed(MISSING_CONFIG)
            }
            Some(backend) => {
                let store = self.connector.connect(&backend, None);
                let outcome = store.create(&backend.collection, key, entry.to_fields()).await;
                info!(
                    collection = %backend.collection,
                    log_id = key,
                    user_id = entry.user_id.as_deref().unwrap_or("-"),
                    progress = entry.summary.progress_percentage,
                    tier = %entry.summary.tier_name,
                    ?outcome,
                    "Dispatched log entry"
                );
                match outcome {
                    WriteOutcome::Created | WriteOutcome::AlreadyExists => OpStatus::ok("logged"),
                    WriteOutcome::Failed { message, .. } => OpStatus::failed(message),
                }
            }
        };

        self.state
            .update(|s| s.last_firebase_status = Some(status.clone()));
        if let Err(e) = self.state.persist().await {
            warn!("Failed to persist dispatch status: {}", e);
        }
        status
    }
}
