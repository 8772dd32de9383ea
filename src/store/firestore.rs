//! Firestore REST client
//!
//! Documents live under
//! `{base}/projects/{project}/databases/(default)/documents/{path}`; every call
//! carries the API key as `key` and, when signed in, the user's id token as a
//! bearer header.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::value::{fields_to_wire, Fields};
use super::{Document, DocumentStore, StoreConnector, WriteOutcome};
use crate::config::ResolvedBackend;

const PAGE_SIZE: &str = "300";

pub struct FirestoreClient {
    http: Client,
    base: String,
    project_id: String,
    api_key: String,
    id_token: Option<String>,
}

impl FirestoreClient {
    pub fn new(http: Client, base: &str, backend: &ResolvedBackend, id_token: Option<&str>) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            project_id: backend.project_id.clone(),
            api_key: backend.api_key.clone(),
            id_token: id_token.filter(|t| !t.is_empty()).map(str::to_string),
        }
    }

    /// URL of a document or collection path
    pub fn document_url(&self, path: &str) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!(
            "{}/projects/{}/databases/(default)/documents/{}",
            self.base,
            urlencoding::encode(&self.project_id),
            encoded.join("/")
        )
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.query(&[("key", self.api_key.as_str())]);
        match &self.id_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn get(&self, path: &str) -> Option<Document> {
        let url = self.document_url(path);
        let response = match self.authorize(self.http.get(&url)).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(path, "Document read failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(path, status = response.status().as_u16(), "Document not readable");
            return None;
        }

        let body: Value = response.json().await.ok()?;
        Document::from_wire(&body)
    }

    async fn set(&self, path: &str, fields: Fields) -> bool {
        let url = self.document_url(path);
        let mask: Vec<(&str, &str)> = fields
            .keys()
            .map(|k| ("updateMask.fieldPaths", k.as_str()))
            .collect();
        let body = json!({ "fields": fields_to_wire(&fields) });

        let request = self.authorize(self.http.patch(&url)).query(&mask).json(&body);
        match request.send().await {
            Ok(r) if r.status().is_success() => true,
            Ok(r) => {
                warn!(path, status = r.status().as_u16(), "Document update rejected");
                false
            }
            Err(e) => {
                warn!(path, "Document update failed: {}", e);
                false
            }
        }
    }

    async fn create(&self, collection: &str, id: &str, fields: Fields) -> WriteOutcome {
        let url = self.document_url(collection);
        let body = json!({ "fields": fields_to_wire(&fields) });

        let request = self
            .authorize(self.http.post(&url))
            .query(&[("documentId", id)])
            .json(&body);

        match request.send().await {
            Ok(r) if r.status().is_success() => WriteOutcome::Created,
            Ok(r) if r.status() == StatusCode::CONFLICT => WriteOutcome::AlreadyExists,
            Ok(r) => {
                let status = r.status().as_u16();
                WriteOutcome::Failed {
                    status: Some(status),
                    message: format!("http {}", status),
                }
            }
            Err(e) => WriteOutcome::Failed {
                status: None,
                message: e.to_string(),
            },
        }
    }

    async fn query(&self, collection: &str) -> Vec<Document> {
        let url = self.document_url(collection);
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .authorize(self.http.get(&url))
                .query(&[("pageSize", PAGE_SIZE)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let body: Value = match request.send().await {
                Ok(r) if r.status().is_success() => match r.json().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(collection, "Unreadable listing: {}", e);
                        break;
                    }
                },
                Ok(r) => {
                    warn!(collection, status = r.status().as_u16(), "Listing rejected");
                    break;
                }
                Err(e) => {
                    warn!(collection, "Listing failed: {}", e);
                    break;
                }
            };

            if let Some(items) = body.get("documents").and_then(Value::as_array) {
                documents.extend(items.iter().filter_map(Document::from_wire));
            }

            page_token = body
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        documents
    }
}

/// Opens [`FirestoreClient`]s sharing one HTTP client
pub struct FirestoreConnector {
    http: Client,
    base: String,
}

impl FirestoreConnector {
    pub fn new(base: &str, timeout: Duration, user_agent: &str) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base: base.to_string(),
        }
    }
}

impl StoreConnector for FirestoreConnector {
    fn connect(&self, backend: &ResolvedBackend, id_token: Option<&str>) -> Arc<dyn DocumentStore> {
        Arc::new(FirestoreClient::new(
            self.http.clone(),
            &self.base,
            backend,
            id_token,
        ))
    }
}
