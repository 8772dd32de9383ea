//! Document store access
//!
//! The logging backend is an opaque key/value document store addressed by
//! slash-separated paths. [`DocumentStore`] is the seam; [`FirestoreClient`]
//! speaks the REST protocol and [`MemoryDocumentStore`] backs tests and
//! offline runs.

pub mod firestore;
pub mod memory;
pub mod value;

pub use firestore::{FirestoreClient, FirestoreConnector};
pub use memory::{MemoryConnector, MemoryDocumentStore};
pub use value::{fields_from_wire, fields_to_wire, Fields, FsValue};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::ResolvedBackend;

/// A stored document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Full resource name; the last segment is the document id
    pub name: String,
    pub fields: Fields,
    pub create_time: Option<String>,
    pub update_time: Option<String>,
}

impl Document {
    /// Parse a REST document resource
    pub fn from_wire(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?.to_string();
        Some(Self {
            name,
            fields: fields_from_wire(value.get("fields")),
            create_time: value
                .get("createTime")
                .and_then(Value::as_str)
                .map(str::to_string),
            update_time: value
                .get("updateTime")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Document id (last path segment)
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    pub fn get(&self, field: &str) -> Option<&FsValue> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FsValue::as_str)
    }
}

/// Outcome of a create-with-id write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Created,
    /// A document with this id exists already
    AlreadyExists,
    Failed {
        status: Option<u16>,
        message: String,
    },
}

impl WriteOutcome {
    /// `Created` and `AlreadyExists` both leave the document in place
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Created | Self::AlreadyExists)
    }
}

/// Path-addressed document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document; `None` when missing or unreadable
    async fn get(&self, path: &str) -> Option<Document>;

    /// Write the given fields into a document, creating it if needed.
    /// Fields not named are left as they are.
    async fn set(&self, path: &str, fields: Fields) -> bool;

    /// Create a document with an explicit id
    async fn create(&self, collection: &str, id: &str, fields: Fields) -> WriteOutcome;

    /// All documents of a collection
    async fn query(&self, collection: &str) -> Vec<Document>;
}

/// Opens a store for a resolved backend configuration
pub trait StoreConnector: Send + Sync {
    fn connect(&self, backend: &ResolvedBackend, id_token: Option<&str>) -> Arc<dyn DocumentStore>;
}
