//! Token capture
//!
//! The interception side of the relay: credential extraction from observed
//! requests, expiry decoding, the deduplicating sink, the cooldown gate and
//! the push feed for companion observers.

pub mod cooldown;
pub mod expiry;
pub mod feed;
pub mod request;
pub mod sink;

pub use cooldown::{CooldownGate, DEFAULT_COOLDOWN};
pub use expiry::{decode_expiry, TokenExpiry};
pub use feed::{FeedMessage, TokenFeed};
pub use request::{
    normalize_candidate, CredentialExtractor, HttpHeader, ObservedRequest, RequestPhase,
    TargetMatcher,
};
pub use sink::{SubmitOutcome, TokenProcessor, TokenSink};

#[cfg(test)]
pub(crate) mod tests_support {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    /// Unsigned JWT-shaped token with the given `exp` claim
    pub fn token_with_exp(exp: i64) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, exp))
        )
    }
}
