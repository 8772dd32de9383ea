//! Access codes
//!
//! Sign-up requires an access code, bound one-to-one to an email in
//! `AccessCodes/{code}`. Unknown codes are created already bound.

use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};

use crate::store::{DocumentStore, Fields, FsValue, WriteOutcome};

const COLLECTION: &str = "AccessCodes";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("Access code is required")]
    Missing,

    #[error("Access code is disabled")]
    Disabled,

    #[error("Access code is already in use")]
    UsedByOther,

    #[error("Access code could not be checked, try again")]
    Unreadable,

    #[error("Failed to bind access code")]
    WriteFailed,

    #[error("Access code binding could not be verified")]
    NotVerified,
}

/// Binds access codes to accounts
pub struct AccessGate<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> AccessGate<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    /// Bind `code` to `email`, creating the code if it does not exist.
    ///
    /// Unknown codes are created with create-with-id, so an existing code is
    /// only ever rebound after it has been read and checked.
    pub async fn bind(&self, code: &str, email: &str) -> Result<(), AccessError> {
        let code = code.trim();
        if code.is_empty() || code.contains('/') {
            return Err(AccessError::Missing);
        }
        let path = format!("{}/{}", COLLECTION, code);
        let now = FsValue::Timestamp(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));

        let mut fields = Fields::new();
        fields.insert("usedByEmail".into(), email.into());
        fields.insert("usedAt".into(), now.clone());
        fields.insert("boundAt".into(), now.clone());

        let mut created = fields.clone();
        created.insert("code".into(), code.into());
        created.insert("enabled".into(), true.into());
        created.insert("createdAt".into(), now);

        match self.store.create(COLLECTION, code, created).await {
            WriteOutcome::Created => {
                info!(code, "Created access code bound to new account");
                return Ok(());
            }
            WriteOutcome::AlreadyExists => {}
            WriteOutcome::Failed { message, .. } => {
                warn!(code, "Failed to create access code: {}", message);
                return Err(AccessError::WriteFailed);
            }
        }

        let Some(doc) = self.store.get(&path).await else {
            warn!(code, "Existing access code could not be read");
            return Err(AccessError::Unreadable);
        };
        if doc.get("enabled").and_then(FsValue::as_bool) == Some(false) {
            warn!(code, "Rejected disabled access code");
            return Err(AccessError::Disabled);
        }
        let used_by = doc.get_str("usedByEmail").map(str::trim).unwrap_or_default();
        if !used_by.is_empty() && used_by != email {
            warn!(code, "Rejected access code bound to another account");
            return Err(AccessError::UsedByOther);
        }
        if !self.store.set(&path, fields).await {
            return Err(AccessError::WriteFailed);
        }

        let verified = self
            .store
            .get(&path)
            .await
            .map(|doc| doc.get_str("usedByEmail") == Some(email))
            .unwrap_or(false);
        if !verified {
            return Err(AccessError::NotVerified);
        }

        info!(code, "Bound access code");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocumentStore;

    async fn seed(store: &MemoryDocumentStore, code: &str, pairs: &[(&str, FsValue)]) {
        let fields: Fields = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        store.set(&format!("AccessCodes/{}", code), fields).await;
    }

    #[tokio::test]
    async fn test_unknown_code_created_and_bound() {
        let store = MemoryDocumentStore::new();
        AccessGate::new(&store).bind("NEW1", "a@b.co").await.unwrap();

        let doc = store.get("AccessCodes/NEW1").await.unwrap();
        assert_eq!(doc.get_str("usedByEmail"), Some("a@b.co"));
        assert_eq!(doc.get("enabled"), Some(&FsValue::Boolean(true)));
        assert_eq!(doc.get_str("code"), Some("NEW1"));
    }

    #[tokio::test]
    async fn test_free_code_bound() {
        let store = MemoryDocumentStore::new();
        seed(&store, "FREE", &[("enabled", true.into()), ("usedByEmail", "".into())]).await;
        AccessGate::new(&store).bind("FREE", "a@b.co").await.unwrap();
        let doc = store.get("AccessCodes/FREE").await.unwrap();
        assert_eq!(doc.get_str("usedByEmail"), Some("a@b.co"));
        // Existing fields survive the bind
        assert_eq!(doc.get("enabled"), Some(&FsValue::Boolean(true)));
    }

    #[tokio::test]
    async fn test_disabled_code_rejected() {
        let store = MemoryDocumentStore::new();
        seed(&store, "OFF", &[("enabled", false.into())]).await;
        assert_eq!(
            AccessGate::new(&store).bind("OFF", "a@b.co").await,
            Err(AccessError::Disabled)
        );
    }

    #[tokio::test]
    async fn test_code_used_by_other_rejected() {
        let store = MemoryDocumentStore::new();
        seed(&store, "TAKEN", &[("usedByEmail", "x@y.co".into())]).await;
        let gate = AccessGate::new(&store);
        assert_eq!(gate.bind("TAKEN", "a@b.co").await, Err(AccessError::UsedByOther));
        // The same account may rebind
        assert!(gate.bind("TAKEN", "x@y.co").await.is_ok());
    }

    /// Reads always fail; writes reach the inner store
    struct UnreadableStore(MemoryDocumentStore);

    #[async_trait::async_trait]
    impl DocumentStore for UnreadableStore {
        async fn get(&self, _path: &str) -> Option<crate::store::Document> {
            None
        }

        async fn set(&self, path: &str, fields: Fields) -> bool {
            self.0.set(path, fields).await
        }

        async fn create(&self, collection: &str, id: &str, fields: Fields) -> WriteOutcome {
            self.0.create(collection, id, fields).await
        }

        async fn query(&self, collection: &str) -> Vec<crate::store::Document> {
            self.0.query(collection).await
        }
    }

    #[tokio::test]
    async fn test_failed_read_keeps_disabled_code() {
        let inner = MemoryDocumentStore::new();
        seed(&inner, "OFF", &[("enabled", false.into()), ("usedByEmail", "x@y.co".into())]).await;
        let store = UnreadableStore(inner);

        assert_eq!(
            AccessGate::new(&store).bind("OFF", "a@b.co").await,
            Err(AccessError::Unreadable)
        );
        let doc = store.0.get("AccessCodes/OFF").await.unwrap();
        assert_eq!(doc.get("enabled"), Some(&FsValue::Boolean(false)));
        assert_eq!(doc.get_str("usedByEmail"), Some("x@y.co"));
    }

    #[tokio::test]
    async fn test_blank_code_rejected() {
        let store = MemoryDocumentStore::new();
        assert_eq!(
            AccessGate::new(&store).bind("  ", "a@b.co").await,
            Err(AccessError::Missing)
        );
        assert!(store.is_empty().await);
    }
}
