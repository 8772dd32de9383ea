//! Idempotency keys for log entries

use sha2::{Digest, Sha256};

/// Hex SHA-256 of `token|progress|tier`.
///
/// The key is the log entry's document id, so resubmitting unchanged data
/// hits the same document. Progress renders without a trailing `.0` for
/// whole numbers (`42`, not `42.0`).
pub fn build_key(token: &str, progress: f64, tier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{}", token, progress, tier).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_stable() {
        let a = build_key("tok", 42.0, "Epic");
        let b = build_key("tok", 42.0, "Epic");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_each_field_changes_key() {
        let base = build_key("tok", 42.0, "Epic");
        assert_ne!(base, build_key("tok", 43.0, "Epic"));
        assert_ne!(base, build_key("tok2", 42.0, "Epic"));
        assert_ne!(base, build_key("tok", 42.0, "Rare"));
    }

    #[test]
    fn test_known_digest() {
        // sha256("tok|42|Epic")
        let mut hasher = Sha256::new();
        hasher.update(b"tok|42|Epic");
        assert_eq!(build_key("tok", 42.0, "Epic"), hex::encode(hasher.finalize()));
        assert_ne!(build_key("tok", 42.5, "Epic"), build_key("tok", 42.0, "Epic"));
    }
}
