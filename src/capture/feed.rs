//! Broadcast of freshly stored tokens to companion page observers

use serde::Serialize;
use tokio::sync::broadcast;

/// Message pushed to connected observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedMessage {
    PushToken { token: String },
}

/// Hub for pushing captured tokens to connected observers
pub struct TokenFeed {
    sender: broadcast::Sender<FeedMessage>,
}

impl Default for TokenFeed {
    fn default() -> Self {
        Self::new(64)
    }
}

impl TokenFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedMessage> {
        self.sender.subscribe()
    }

    /// Number of connected observers
    pub fn observers(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Push a token; returns how many observers received it
    pub fn push_token(&self, token: &str) -> usize {
        // No subscribers is not an error
        self.sender
            .send(FeedMessage::PushToken {
                token: token.to_string(),
            })
            .unwrap_or(0)
    }
}
