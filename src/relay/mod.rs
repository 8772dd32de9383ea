//! Relay assembly
//!
//! Wires the capture side (extractor, queue, sink, gate, feed) to the
//! downstream pipeline (aggregator, key builder, dispatcher). [`Relay`] is
//! the single long-lived instance owning all of it.

pub mod pipeline;
pub mod webhook;
pub mod worker;

pub use pipeline::{DashboardStats, Pipeline, PipelineReport, NO_CHANGES};
pub use webhook::WebhookClient;
pub use worker::{CaptureJob, CaptureQueue};

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::capture::{
    normalize_candidate, CooldownGate, CredentialExtractor, ObservedRequest, TargetMatcher,
    TokenFeed, TokenSink,
};
use crate::config::Args;
use crate::logging::LogDispatcher;
use crate::state::{CaptureBadge, RequestErrorRecord, StateStore};
use crate::stats::{Aggregator, StatsSource};
use crate::store::StoreConnector;

/// What the interception boundary did with an observed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Observation {
    /// Not an instrumented request
    Ignored,
    /// Instrumented, but no bearer credential
    NoCredential,
    /// Credential handed to the capture queue
    Queued,
    /// Credential found but the queue refused it
    Dropped,
}

pub struct Relay {
    state: Arc<StateStore>,
    extractor: CredentialExtractor,
    queue: CaptureQueue,
    pipeline: Arc<Pipeline>,
    feed: Arc<TokenFeed>,
}

impl Relay {
    /// Build the relay and start its capture worker
    pub fn start(
        args: &Args,
        state: Arc<StateStore>,
        source: Arc<dyn StatsSource>,
        connector: Arc<dyn StoreConnector>,
    ) -> (Self, JoinHandle<()>) {
        let pipeline = Arc::new(
            Pipeline::new(
                Arc::clone(&state),
                Aggregator::new(Arc::clone(&state), source),
                LogDispatcher::new(Arc::clone(&state), args.backend_defaults(), connector),
                WebhookClient::new(args.request_timeout(), &args.user_agent),
            )
            .with_agent(&args.user_agent, &args.device_type)
            .with_dashboard_timeout(args.dashboard_timeout()),
        );

        let feed = Arc::new(TokenFeed::default());
        let sink = Arc::new(TokenSink::new(
            Arc::clone(&state),
            CooldownGate::new(args.cooldown()),
            Arc::clone(&feed),
            pipeline.clone(),
        ));
        let (queue, worker) = CaptureQueue::start(sink, args.queue_size);

        let extractor = CredentialExtractor::new(
            TargetMatcher::new(&args.api.api_host, &args.extension_origin),
            Arc::clone(&state),
        );

        let relay = Self {
            state,
            extractor,
            queue,
            pipeline,
            feed,
        };
        (relay, worker)
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn feed(&self) -> &Arc<TokenFeed> {
        &self.feed
    }

    pub fn queue(&self) -> &CaptureQueue {
        &self.queue
    }

    /// Interception boundary. Never awaits.
    pub fn observe(&self, request: &ObservedRequest) -> Observation {
        if !self.extractor.matcher().accepts(request) {
            return Observation::Ignored;
        }
        match self.extractor.extract(request) {
            Some(token) => self.enqueue(token, Some(request.url.clone())),
            None => Observation::NoCredential,
        }
    }

    /// Token pushed by a page observer; the bearer prefix is optional
    pub fn submit_candidate(&self, raw: &str, source_url: Option<String>) -> Observation {
        let Some(token) = normalize_candidate(raw) else {
            return Observation::NoCredential;
        };
        let observation = self.enqueue(token, source_url);
        if observation == Observation::Queued {
            self.state.update(|s| s.badge = CaptureBadge::Ok);
        }
        observation
    }

    /// Network failure of an instrumented request; false if not instrumented
    pub fn record_request_error(&self, url: &str, error: Option<&str>) -> bool {
        if !self.extractor.matcher().is_target_url(url) {
            return false;
        }
        let record = RequestErrorRecord {
            error: error
                .filter(|e| !e.is_empty())
                .unwrap_or("unknown_error")
                .to_string(),
            url: url.to_string(),
            time: chrono::Utc::now().timestamp_millis(),
        };
        warn!(url, error = %record.error, "Instrumented request failed");
        self.state.update(|s| {
            s.last_error = Some(record);
            s.badge = CaptureBadge::Error;
        });
        true
    }

    /// Failure while inspecting an observed request
    pub fn record_processing_error(&self, message: &str) {
        debug!("Processing error: {}", message);
        self.state.update(|s| {
            s.last_processing_error = Some(message.to_string());
            s.badge = CaptureBadge::Error;
        });
    }

    fn enqueue(&self, token: String, source_url: Option<String>) -> Observation {
        if self.queue.enqueue(CaptureJob { token, source_url }) {
            Observation::Queued
        } else {
            Observation::Dropped
        }
    }
}
