//! Credential extraction from observed requests
//!
//! The extractor runs on the interception path: it must return immediately,
//! never mutate the observed request, and never fail the caller. Everything
//! it learns beyond the credential goes into the diagnostic record.

use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::state::{CaptureBadge, RequestDiagnostic, StateStore};

/// Resource types that count as programmatic traffic
const PROGRAMMATIC_TYPES: &[&str] = &["xmlhttprequest", "fetch"];

/// Eligibility endpoint family, including the historical misspelling
const ELIGIBILITY_PATHS: &[&str] = &[
    "/rewards/redemption/eligibility",
    "/rewards/redemtion/eligibility",
];

/// A single outgoing header
#[derive(Debug, Clone, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Interception point the request was seen at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestPhase {
    /// About to send; headers still final
    #[default]
    BeforeSendHeaders,
    /// Headers handed to the network
    SendHeaders,
}

/// Read-only view of an outgoing request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedRequest {
    pub url: String,
    pub method: String,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub initiator: Option<String>,
    #[serde(default)]
    pub document_url: Option<String>,
    #[serde(default)]
    pub request_headers: Vec<HttpHeader>,
    #[serde(default)]
    pub phase: RequestPhase,
}

/// Decides which requests are instrumented
#[derive(Debug, Clone)]
pub struct TargetMatcher {
    origin: String,
    extension_origin: String,
}

impl TargetMatcher {
    /// `api_host` is the instrumented origin, `extension_origin` the initiator
    /// prefix of the relay's own calls
    pub fn new(api_host: &str, extension_origin: &str) -> Self {
        let origin = Url::parse(api_host)
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_else(|_| api_host.trim_end_matches('/').to_ascii_lowercase());
        Self {
            origin,
            extension_origin: extension_origin.to_string(),
        }
    }

    /// Origin matches exactly and the path is in the eligibility family
    pub fn is_target_url(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if parsed.origin().ascii_serialization() != self.origin {
            return false;
        }
        is_eligibility_path(&parsed.path().to_ascii_lowercase())
    }

    /// Request was issued by the relay's own extension
    pub fn is_self_initiated(&self, request: &ObservedRequest) -> bool {
        if self.extension_origin.is_empty() {
            return false;
        }
        request
            .initiator
            .as_deref()
            .or(request.document_url.as_deref())
            .map(|i| i.starts_with(&self.extension_origin))
            .unwrap_or(false)
    }

    /// All filters of the interception path
    pub fn accepts(&self, request: &ObservedRequest) -> bool {
        if request.method.eq_ignore_ascii_case("OPTIONS") {
            return false;
        }
        if let Some(kind) = request.resource_type.as_deref() {
            if !PROGRAMMATIC_TYPES
                .iter()
                .any(|t| t.eq_ignore_ascii_case(kind))
            {
                return false;
            }
        }
        if self.is_self_initiated(request) {
            return false;
        }
        self.is_target_url(&request.url)
    }
}

fn is_eligibility_path(path: &str) -> bool {
    ELIGIBILITY_PATHS.iter().any(|needle| {
        path.match_indices(needle).any(|(at, m)| {
            // Word boundary after "eligibility"
            match path[at + m.len()..].chars().next() {
                None => true,
                Some(c) => !(c.is_ascii_alphanumeric() || c == '_'),
            }
        })
    })
}

/// Value of the first `Authorization` header, matched case-insensitively
pub fn authorization_header(headers: &[HttpHeader]) -> Option<&str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("authorization"))
        .and_then(|h| h.value.as_deref())
}

/// Strip a case-insensitive `Bearer ` prefix; `None` if absent or empty
pub fn bearer_credential(value: &str) -> Option<String> {
    let prefix = value.get(..7)?;
    if !prefix.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    let token = value[7..].trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Normalise a token pushed by a page observer: the prefix is optional there
pub fn normalize_candidate(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let token = match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => trimmed[7..].trim(),
        _ => trimmed,
    };
    (!token.is_empty()).then(|| token.to_string())
}

/// Extracts bearer credentials from observed requests
pub struct CredentialExtractor {
    matcher: TargetMatcher,
    state: Arc<StateStore>,
}

impl CredentialExtractor {
    pub fn new(matcher: TargetMatcher, state: Arc<StateStore>) -> Self {
        Self { matcher, state }
    }

    pub fn matcher(&self) -> &TargetMatcher {
        &self.matcher
    }

    /// Extract the credential of an instrumented request.
    ///
    /// Non-target requests return `None` with no side effect. Target requests
    /// always leave a diagnostic snapshot behind.
    pub fn extract(&self, request: &ObservedRequest) -> Option<String> {
        if !self.matcher.accepts(request) {
            return None;
        }

        let auth = authorization_header(&request.request_headers);
        self.record_diagnostic(request, auth.is_some());

        match auth.and_then(bearer_credential) {
            Some(token) => {
                self.state.update(|s| s.badge = CaptureBadge::Ok);
                Some(token)
            }
            None => {
                if request.phase == RequestPhase::BeforeSendHeaders {
                    let now = chrono::Utc::now().timestamp_millis();
                    self.state.update(|s| {
                        s.last_attempt_without_auth_at = Some(now);
                        s.badge = CaptureBadge::Warning;
                    });
                }
                None
            }
        }
    }

    fn record_diagnostic(&self, request: &ObservedRequest, has_auth: bool) {
        let info = RequestDiagnostic {
            url: request.url.clone(),
            method: request.method.clone(),
            resource_type: request.resource_type.clone(),
            time: chrono::Utc::now().timestamp_millis(),
            has_authorization_header: has_auth,
            header_names: request
                .request_headers
                .iter()
                .map(|h| h.name.clone())
                .filter(|n| !n.is_empty())
                .collect(),
        };
        debug!(url = %info.url, has_auth, headers = info.header_names.len(), "lastSeen");
        self.state.update(|s| s.last_seen = Some(info));
    }
}
