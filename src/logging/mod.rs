//! Stats logging to the document store
//!
//! Builds idempotent log entries and dispatches them to the configured
//! collection.

pub mod dispatcher;
pub mod entry;
pub mod key;

pub use dispatcher::{LogDispatcher, MISSING_CONFIG};
pub use entry::LogEntry;
pub use key::build_key;
