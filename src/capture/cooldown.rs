//! Cooldown gate
//!
//! The same physical request is observed at more than one lifecycle point.
//! The gate lets a given token value through once per window; the state is
//! process memory only and resets on restart.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default suppression window for a repeated token
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(120);

pub struct CooldownGate {
    window: Duration,
    last: Mutex<Option<(String, Instant)>>,
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether `token` should be processed now
    pub fn should_process(&self, token: &str) -> bool {
        self.should_process_at(token, Instant::now())
    }

    /// Decide whether `token` should be processed at `now`.
    ///
    /// The slot is updated before returning `true`, so a second caller racing
    /// on the same token sees the fresh timestamp.
    pub fn should_process_at(&self, token: &str, now: Instant) -> bool {
        if token.is_empty() {
            return false;
        }

        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((value, at)) = last.as_ref() {
            if value == token && now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }

        *last = Some((token.to_string(), now));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_passes() {
        let gate = CooldownGate::default();
        assert!(gate.should_process("tok"));
    }

    #[test]
    fn test_repeat_within_window_suppressed() {
        let gate = CooldownGate::default();
        let t0 = Instant::now();
        assert!(gate.should_process_at("T", t0));
        assert!(!gate.should_process_at("T", t0 + Duration::from_secs(60)));
        assert!(gate.should_process_at("T", t0 + Duration::from_secs(121)));
    }

    #[test]
    fn test_suppression_does_not_extend_window() {
        let gate = CooldownGate::default();
        let t0 = Instant::now();
        assert!(gate.should_process_at("T", t0));
        assert!(!gate.should_process_at("T", t0 + Duration::from_secs(100)));
        // Suppressed calls leave the slot untouched
        assert!(gate.should_process_at("T", t0 + Duration::from_secs(120)));
    }

    #[test]
    fn test_different_token_passes_and_takes_slot() {
        let gate = CooldownGate::default();
        let t0 = Instant::now();
        assert!(gate.should_process_at("A", t0));
        assert!(gate.should_process_at("B", t0 + Duration::from_secs(1)));
        // A lost the slot to B
        assert!(gate.should_process_at("A", t0 + Duration::from_secs(2)));
    }

    #[test]
    fn test_empty_token_rejected() {
        let gate = CooldownGate::default();
        assert!(!gate.should_process(""));
    }
}
