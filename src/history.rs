//! Stats history
//!
//! Read side of the log collection. Entries are decoded back from stored
//! documents; anything that is not a log entry is skipped.

use std::sync::Arc;
use tracing::debug;

use crate::logging::LogEntry;
use crate::store::DocumentStore;

pub struct StatsHistory {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl StatsHistory {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    /// Every entry in the collection, newest first
    pub async fn all(&self) -> Vec<LogEntry> {
        let docs = self.store.query(&self.collection).await;
        let total = docs.len();
        let mut entries: Vec<LogEntry> = docs.iter().filter_map(LogEntry::from_document).collect();
        debug!(collection = %self.collection, total, decoded = entries.len(), "Loaded stats history");
        entries.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        entries
    }

    /// Entries logged for `uid`, newest first
    pub async fn for_user(&self, uid: &str) -> Vec<LogEntry> {
        let mut entries = self.all().await;
        entries.retain(|e| e.user_id.as_deref() == Some(uid));
        entries
    }

    /// Latest entry per user, ordered by email
    pub async fn overview(&self) -> Vec<LogEntry> {
        let mut latest: Vec<LogEntry> = Vec::new();
        for entry in self.all().await {
            let Some(uid) = entry.user_id.as_deref() else {
                continue;
            };
            if latest.iter().any(|e| e.user_id.as_deref() == Some(uid)) {
                continue;
            }
            latest.push(entry);
        }
        latest.sort_by(|a, b| {
            let key = |e: &LogEntry| e.user_email.clone().unwrap_or_default().to_lowercase();
            key(a).cmp(&key(b))
        });
        latest
    }
}
