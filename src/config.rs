//! Configuration for the relay
//!
//! CLI arguments and environment variable handling using clap.
//! Backend settings given here are defaults; a `firebaseConfig` override in
//! the persisted state wins field by field (see [`BackendConfig::resolve`]).

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Rewards relay - captures bearer tokens for the rewards API and relays
/// deduplicated stats to the logging backend
#[derive(Parser, Debug, Clone)]
#[command(name = "rewards-relay")]
#[command(about = "Bearer-token capture and deduplicated stats relay")]
pub struct Args {
    /// Address the ingestion server listens on
    #[arg(long, env = "LISTEN", default_value = "127.0.0.1:8787")]
    pub listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// JSON file holding the persisted local state
    #[arg(long, env = "STATE_FILE", default_value = "relay-state.json")]
    pub state_file: PathBuf,

    /// Instrumented API configuration
    #[command(flatten)]
    pub api: ApiArgs,

    /// Logging backend configuration
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Window during which the same token is not processed twice
    #[arg(long, env = "COOLDOWN_SECS", default_value = "120")]
    pub cooldown_secs: u64,

    /// Maximum number of capture jobs waiting for the worker
    #[arg(long, env = "QUEUE_SIZE", default_value = "256")]
    pub queue_size: usize,

    /// Transport timeout for outbound requests in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Bounded wait for UI-facing stats fetches in milliseconds
    #[arg(long, env = "DASHBOARD_TIMEOUT_MS", default_value = "15000")]
    pub dashboard_timeout_ms: u64,

    /// User agent reported in log entries and outbound requests
    #[arg(long, env = "USER_AGENT", default_value = concat!("rewards-relay/", env!("CARGO_PKG_VERSION")))]
    pub user_agent: String,

    /// Device class reported in log entries
    #[arg(long, env = "DEVICE_TYPE", default_value = "Desktop")]
    pub device_type: String,

    /// Initiator prefix identifying requests made by the relay's own extension
    #[arg(long, env = "EXTENSION_ORIGIN", default_value = "chrome-extension://")]
    pub extension_origin: String,

    /// Webhook receiving the raw stats after each aggregation (optional)
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Forward aggregated stats to the webhook
    #[arg(long, env = "AUTO_SEND", default_value = "false")]
    pub auto_send: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Instrumented API endpoints
#[derive(Parser, Debug, Clone)]
pub struct ApiArgs {
    /// Origin of the instrumented API
    #[arg(long, env = "API_HOST", default_value = "https://api.immutable.com")]
    pub api_host: String,

    /// Tier/progress statistics resource
    #[arg(long, env = "STATS_PATH", default_value = "/v3/rewards/sweepstakes/user-stats/predicted")]
    pub stats_path: String,

    /// Eligibility rules resource
    #[arg(long, env = "ELIGIBILITY_PATH", default_value = "/v1/rewards/redemption/eligibility")]
    pub eligibility_path: String,

    /// Public IP lookup service
    #[arg(long, env = "IP_LOOKUP_URL", default_value = "https://api.ipify.org?format=json")]
    pub ip_lookup_url: String,
}

/// Credential issuer and document store endpoints
#[derive(Parser, Debug, Clone)]
pub struct BackendArgs {
    /// Identity toolkit base URL (credential issuer)
    #[arg(long, env = "IDENTITY_BASE", default_value = "https://identitytoolkit.googleapis.com/v1")]
    pub identity_base: String,

    /// Document store base URL
    #[arg(long, env = "FIRESTORE_BASE", default_value = "https://firestore.googleapis.com/v1")]
    pub firestore_base: String,

    /// Backend API key
    #[arg(long, env = "FIREBASE_API_KEY")]
    pub firebase_api_key: Option<String>,

    /// Backend project identifier
    #[arg(long, env = "FIREBASE_PROJECT_ID", default_value = "immutable-api")]
    pub firebase_project_id: String,

    /// Collection receiving log entries
    #[arg(long, env = "FIREBASE_COLLECTION", default_value = "StatsHistory")]
    pub firebase_collection: String,
}

/// Relay sub-commands
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the ingestion server (default)
    Serve,

    /// Sign in with the credential issuer and remember the user.
    ///
    /// For use while the server is stopped; a running server takes
    /// `FIREBASE_SIGN_IN` on `/messages` instead.
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long, env = "RELAY_PASSWORD")]
        password: String,
    },

    /// Create an account, bind an access code and remember the user (server stopped)
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long, env = "RELAY_PASSWORD")]
        password: String,
        /// Access code to bind to the new account
        #[arg(long)]
        access_code: Option<String>,
    },

    /// Forget the signed-in user (server stopped)
    SignOut,

    /// List stored stats history (admins only)
    History {
        /// Only show entries for this user id
        #[arg(long)]
        user_id: Option<String>,
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        count: usize,
    },
}

impl Args {
    /// Get the cooldown window
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Get the outbound request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get the UI-facing fetch timeout
    pub fn dashboard_timeout(&self) -> Duration {
        Duration::from_millis(self.dashboard_timeout_ms)
    }

    /// Backend defaults taken from the command line
    pub fn backend_defaults(&self) -> BackendConfig {
        BackendConfig {
            api_key: self.backend.firebase_api_key.clone(),
            project_id: Some(self.backend.firebase_project_id.clone()),
            collection: Some(self.backend.firebase_collection.clone()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.cooldown_secs == 0 {
            return Err("COOLDOWN_SECS must be greater than zero".to_string());
        }

        if self.queue_size == 0 {
            return Err("QUEUE_SIZE must be greater than zero".to_string());
        }

        let host = self.api.api_host.to_ascii_lowercase();
        if !host.starts_with("https://") && !host.starts_with("http://") {
            return Err("API_HOST must be an http(s) origin".to_string());
        }

        Ok(())
    }
}

/// Backend configuration as persisted (`firebaseConfig`) or defaulted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

/// Fully resolved backend configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBackend {
    pub api_key: String,
    pub project_id: String,
    pub collection: String,
}

impl BackendConfig {
    /// Merge a persisted override over the defaults.
    ///
    /// Returns `None` when the API key or project id is still missing.
    /// Blank strings count as missing.
    pub fn resolve(defaults: &BackendConfig, overrides: Option<&BackendConfig>) -> Option<ResolvedBackend> {
        let pick = |o: Option<&Option<String>>, d: &Option<String>| -> Option<String> {
            o.and_then(|v| v.clone())
                .filter(|v| !v.trim().is_empty())
                .or_else(|| d.clone().filter(|v| !v.trim().is_empty()))
        };

        let api_key = pick(overrides.map(|o| &o.api_key), &defaults.api_key)?;
        let project_id = pick(overrides.map(|o| &o.project_id), &defaults.project_id)?;
        let collection = pick(overrides.map(|o| &o.collection), &defaults.collection)
            .unwrap_or_else(|| "StatsHistory".to_string());

        Some(ResolvedBackend {
            api_key,
            project_id,
            collection,
        })
    }
}
