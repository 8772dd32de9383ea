//! Rewards relay - bearer-token capture and deduplicated stats reporting
//!
//! The relay watches outgoing requests to the rewards API (posted by a thin
//! in-browser shim), captures the bearer credential, and reports usage
//! statistics to a document store at most once per distinct observation.
//!
//! ## Pipeline
//!
//! - **Capture**: credential extraction, expiry decoding, the deduplicating
//!   token sink and the per-token cooldown gate
//! - **Stats**: concurrent fetch of the stats and eligibility resources
//! - **Logging**: content-derived idempotency keys and create-once dispatch
//! - **Identity**: sign-in/sign-up, access codes and the admin policy

pub mod capture;
pub mod config;
pub mod history;
pub mod identity;
pub mod logging;
pub mod relay;
pub mod routes;
pub mod server;
pub mod state;
pub mod stats;
pub mod store;
pub mod types;

pub use config::Args;
pub use relay::Relay;
pub use server::{run, AppState};
pub use types::{RelayError, Result};
