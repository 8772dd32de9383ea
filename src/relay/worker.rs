//! Capture queue
//!
//! The interception boundary hands candidate tokens over with a non-blocking
//! `try_send`; a single worker drains the queue into the sink, so sink
//! submissions never overlap.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::{SubmitOutcome, TokenSink};
use crate::state::mask_token;

/// Unit of work queued by the interception boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureJob {
    pub token: String,
    pub source_url: Option<String>,
}

/// Sending half of the capture queue
#[derive(Clone)]
pub struct CaptureQueue {
    tx: mpsc::Sender<CaptureJob>,
    capacity: usize,
}

impl CaptureQueue {
    /// Create the queue and start its worker
    pub fn start(sink: Arc<TokenSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let worker = tokio::spawn(capture_worker(rx, sink));
        info!("Capture queue started (capacity {})", capacity);
        (Self { tx, capacity }, worker)
    }

    /// Queue a job without waiting; false when the queue is full or closed
    pub fn enqueue(&self, job: CaptureJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(token = %mask_token(&job.token), "Capture queue full, dropping token");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Capture queue closed");
                false
            }
        }
    }

    /// Jobs waiting for the worker
    pub fn depth(&self) -> usize {
        self.capacity.saturating_sub(self.tx.capacity())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

async fn capture_worker(mut rx: mpsc::Receiver<CaptureJob>, sink: Arc<TokenSink>) {
    while let Some(job) = rx.recv().await {
        match sink.submit(&job.token, job.source_url.as_deref()).await {
            SubmitOutcome::Unchanged => {}
            SubmitOutcome::Stored { run } => {
                debug!(processing = run.is_some(), "Capture job stored");
            }
            SubmitOutcome::PersistFailed(e) => {
                warn!("Capture job not stored: {}", e);
            }
        }
    }
    info!("Capture queue worker shutting down (channel closed)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CooldownGate, TokenFeed, TokenProcessor};
    use crate::state::StateStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl TokenProcessor for Counting {
        async fn process(&self, _token: String) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn job(token: &str) -> CaptureJob {
        CaptureJob {
            token: token.into(),
            source_url: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_observations_collapse() {
        let state = Arc::new(StateStore::in_memory());
        let counter = Arc::new(Counting::default());
        let sink = Arc::new(TokenSink::new(
            Arc::clone(&state),
            CooldownGate::default(),
            Arc::new(TokenFeed::default()),
            counter.clone(),
        ));
        let (queue, worker) = CaptureQueue::start(sink, 8);

        // Before-send and send observations of one request
        assert!(queue.enqueue(job("abc.def.ghi")));
        assert!(queue.enqueue(job("abc.def.ghi")));
        drop(queue);
        worker.await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(state.read(|s| s.token().map(str::to_string)).as_deref(), Some("abc.def.ghi"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let queue = CaptureQueue { tx, capacity: 1 };
        assert!(queue.enqueue(job("a")));
        assert_eq!(queue.depth(), 1);
        assert!(!queue.enqueue(job("b")));
    }
}
