//! In-memory document store

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::value::Fields;
use super::{Document, DocumentStore, StoreConnector, WriteOutcome};
use crate::config::ResolvedBackend;

/// Documents keyed by full path, with create-with-id conflict semantics
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<BTreeMap<String, Document>>,
    create_calls: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of create attempts, including conflicting ones
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    fn normalize(path: &str) -> String {
        path.split('/')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &str) -> Option<Document> {
        self.docs.read().await.get(&Self::normalize(path)).cloned()
    }

    async fn set(&self, path: &str, fields: Fields) -> bool {
        let path = Self::normalize(path);
        let now = Self::now();
        let mut docs = self.docs.write().await;
        let doc = docs.entry(path.clone()).or_insert_with(|| Document {
            name: path,
            fields: Fields::new(),
            create_time: Some(now.clone()),
            update_time: None,
        });
        doc.fields.extend(fields);
        doc.update_time = Some(now);
        true
    }

    async fn create(&self, collection: &str, id: &str, fields: Fields) -> WriteOutcome {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if id.is_empty() || id.contains('/') {
            return WriteOutcome::Failed {
                status: Some(400),
                message: "http 400".to_string(),
            };
        }

        let path = format!("{}/{}", Self::normalize(collection), id);
        let mut docs = self.docs.write().await;
        if docs.contains_key(&path) {
            return WriteOutcome::AlreadyExists;
        }
        let now = Self::now();
        docs.insert(
            path.clone(),
            Document {
                name: path,
                fields,
                create_time: Some(now.clone()),
                update_time: Some(now),
            },
        );
        WriteOutcome::Created
    }

    async fn query(&self, collection: &str) -> Vec<Document> {
        let prefix = format!("{}/", Self::normalize(collection));
        self.docs
            .read()
            .await
            .iter()
            .filter(|(path, _)| {
                path.strip_prefix(&prefix)
                    .map(|rest| !rest.contains('/'))
                    .unwrap_or(false)
            })
            .map(|(_, doc)| doc.clone())
            .collect()
    }
}

/// Hands out one shared [`MemoryDocumentStore`] regardless of configuration
#[derive(Default)]
pub struct MemoryConnector {
    store: Arc<MemoryDocumentStore>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryDocumentStore>) -> Self {
        Self {
            store,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &Arc<MemoryDocumentStore> {
        &self.store
    }

    /// How many times a store was requested
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl StoreConnector for MemoryConnector {
    fn connect(&self, _backend: &ResolvedBackend, _id_token: Option<&str>) -> Arc<dyn DocumentStore> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.store.clone()
    }
}
