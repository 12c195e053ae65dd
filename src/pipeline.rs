//! Dispatch pass orchestration.
//!
//! One [`Pipeline::process`] call handles one ingested buffer:
//!
//! ```text
//! raw bytes
//!     │ decode           DecodeError      -> logged, buffer dropped
//!     ▼
//! Event ── persist ───── StoreError       -> logged, event dropped
//!     │    index (opt)   SearchError      -> logged, ignored
//!     ▼
//! for notifier in registry snapshot where class == routing key:
//!     rules met?         RuleError        -> logged, rule unmet
//!     render template    RenderError      -> logged, notifier skipped
//!     dispatch           DispatchError    -> logged, notifier skipped
//! ```
//!
//! A failure for one notifier never stops the others, and no error here
//! stops the caller from processing the next buffer.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::channels::{ChannelDispatcher, DispatchError, SendReceipt};
use crate::event::{DecodeError, Event};
use crate::notifier::NotifierRegistry;
use crate::search::{event_document, SearchIndex};
use crate::store::{EventStore, RecordId, StoreError};
use crate::template::{self, RenderError};

/// Errors that end a pass before notifiers are evaluated.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// Why a single matching notifier did not deliver.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug)]
pub struct NotifierFailure {
    pub notifier_id: u64,
    pub error: NotifierError,
}

/// Outcome of one dispatch pass.
#[derive(Debug)]
pub struct PassReport {
    pub routing_key: String,

    /// Id assigned by the event store
    pub record_id: RecordId,

    /// Notifiers whose class matched the routing key
    pub notifiers_evaluated: usize,

    /// Ids of notifiers whose rules were all met
    pub matched: Vec<u64>,

    /// Receipts from successful sends
    pub receipts: Vec<SendReceipt>,

    /// Render or dispatch failures
    pub failures: Vec<NotifierFailure>,
}

impl PassReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// Process-wide counters.
pub struct Metrics {
    received: AtomicU64,
    decode_failures: AtomicU64,
    persistence_failures: AtomicU64,
    notifiers_matched: AtomicU64,
    dispatched: AtomicU64,
    /// Channel or unknown-channel failures only
    dispatch_failures: AtomicU64,
    render_failures: AtomicU64,
    datagrams_dropped: AtomicU64,
    start_time: Instant,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub decode_failures: u64,
    pub persistence_failures: u64,
    pub notifiers_matched: u64,
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub render_failures: u64,
    pub datagrams_dropped: u64,
    pub uptime_seconds: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            notifiers_matched: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            render_failures: AtomicU64::new(0),
            datagrams_dropped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Count a datagram the listener could not enqueue.
    pub fn record_dropped(&self) {
        self.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            notifiers_matched: self.notifiers_matched.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            render_failures: self.render_failures.load(Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Ordering::Relaxed),
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Wires decode → persist → evaluate → render → dispatch.
pub struct Pipeline {
    store: Arc<dyn EventStore>,
    search: Option<(Arc<dyn SearchIndex>, String)>,
    registry: Arc<NotifierRegistry>,
    dispatcher: Arc<ChannelDispatcher>,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<NotifierRegistry>,
        dispatcher: Arc<ChannelDispatcher>,
    ) -> Self {
        Self {
            store,
            search: None,
            registry,
            dispatcher,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Also index every persisted event under `index_name`.
    pub fn with_search_index(
        mut self,
        index: Arc<dyn SearchIndex>,
        index_name: impl Into<String>,
    ) -> Self {
        self.search = Some((index, index_name.into()));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run a full pass for one raw ingested buffer.
    pub async fn process(&self, raw: &[u8]) -> Result<PassReport, PipelineError> {
        self.metrics.received.fetch_add(1, Ordering::Relaxed);

        let event = Event::decode(raw).map_err(|e| {
            self.metrics.decode_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                error = %e,
                bytes = raw.len(),
                "Discarding undecodable buffer"
            );
            e
        })?;

        self.process_event(event).await
    }

    /// Run a pass for an already decoded event.
    pub async fn process_event(&self, event: Event) -> Result<PassReport, PipelineError> {
        let record_id = self.store.store(&event).await.map_err(|e| {
            self.metrics
                .persistence_failures
                .fetch_add(1, Ordering::Relaxed);
            error!(
                routing_key = %event.routing_key,
                error = %e,
                "Failed to persist event, dropping it"
            );
            e
        })?;

        debug!(
            routing_key = %event.routing_key,
            record_id = %record_id,
            "Event persisted"
        );

        if let Some((index, name)) = &self.search {
            if let Err(e) = index.index(name, &event_document(&event)).await {
                warn!(index = %name, error = %e, "Failed to index event");
            }
        }

        let mut report = PassReport {
            routing_key: event.routing_key.clone(),
            record_id,
            notifiers_evaluated: 0,
            matched: Vec::new(),
            receipts: Vec::new(),
            failures: Vec::new(),
        };

        // Snapshot once; the lock is released before any await below.
        let notifiers = self.registry.snapshot();

        for notifier in notifiers.iter().filter(|n| n.applies_to(&event)) {
            report.notifiers_evaluated += 1;

            if !notifier.matches(&event) {
                debug!(
                    notifier_id = notifier.id(),
                    routing_key = %event.routing_key,
                    "Rules not met"
                );
                continue;
            }

            report.matched.push(notifier.id());
            self.metrics.notifiers_matched.fetch_add(1, Ordering::Relaxed);

            let body = match template::render(notifier.template(), &event.payload) {
                Ok(body) => body,
                Err(e) => {
                    warn!(
                        notifier_id = notifier.id(),
                        error = %e,
                        "Template render failed, skipping notifier"
                    );
                    self.metrics.render_failures.fetch_add(1, Ordering::Relaxed);
                    report.failures.push(NotifierFailure {
                        notifier_id: notifier.id(),
                        error: e.into(),
                    });
                    continue;
                }
            };

            match self.dispatcher.dispatch(notifier, &event, &body).await {
                Ok(receipt) => {
                    self.metrics.dispatched.fetch_add(1, Ordering::Relaxed);
                    report.receipts.push(receipt);
                }
                Err(e) => {
                    self.metrics.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                    report.failures.push(NotifierFailure {
                        notifier_id: notifier.id(),
                        error: e.into(),
                    });
                }
            }
        }

        if report.is_success() {
            info!(
                routing_key = %report.routing_key,
                evaluated = report.notifiers_evaluated,
                dispatched = report.receipts.len(),
                "Event processed"
            );
        } else {
            warn!(
                routing_key = %report.routing_key,
                evaluated = report.notifiers_evaluated,
                dispatched = report.receipts.len(),
                failures = report.failure_count(),
                "Event processed with failures"
            );
        }

        Ok(report)
    }
}
