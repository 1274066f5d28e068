// SPDX-License-Identifier: MIT OR Apache-2.0
//! Drains the queue in size-bounded batches and ships them to the ingestion
//! endpoint, retrying retryable failures and carrying over whatever didn't
//! fit or didn't ship.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use lf_core::{Event, EventBus};
use lf_error::LangfuseError;
use lf_http::Transport;
use lf_queue::EventQueue;
use lf_retry::RetryPolicy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The default number of events drained from the queue per flush cycle
/// (the caller's `flushAt`; see §4.3 step 3 — "candidate batch").
pub const DEFAULT_FLUSH_AT: usize = 15;

/// A single event whose serialized size exceeds this is dropped permanently
/// (§4.3 step 4, first bullet) — it will never fit in any batch.
pub const MAX_MSG_SIZE: usize = 1_000_000;

/// The running total of serialized bytes a single send batch may reach
/// before the remainder is carried over to the next cycle (§4.3 step 4,
/// second bullet).
pub const BATCH_SIZE_LIMIT: usize = 2_500_000;

/// The SDK identification attached to every ingestion batch's `metadata`
/// block (§6).
#[derive(Debug, Clone)]
pub struct BatchMetadata {
    /// The caller's integration tag (default `"DEFAULT"`).
    pub sdk_integration: String,
    /// The project's public key, echoed back in the envelope.
    pub public_key: String,
}

impl Default for BatchMetadata {
    fn default() -> Self {
        Self { sdk_integration: "DEFAULT".to_string(), public_key: String::new() }
    }
}

/// Batches queued events and ships them, retrying and carrying over as
/// needed. Safe to share across tasks: every public method takes `&self`.
pub struct Flusher {
    queue: EventQueue,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    retry_policy: RetryPolicy,
    flush_at: usize,
    batch_size_limit: usize,
    metadata: BatchMetadata,
    flush_notify: Arc<Notify>,
    in_flight: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    shutting_down: AtomicBool,
    /// When set, batches are recorded here instead of being sent over the
    /// wire — used by admin/test tooling to inspect what would have shipped.
    captured: Option<Mutex<Vec<Vec<Event>>>>,
}

impl Flusher {
    pub fn new(queue: EventQueue, transport: Arc<dyn Transport>, bus: EventBus, flush_notify: Arc<Notify>) -> Self {
        Self {
            queue,
            transport,
            bus,
            retry_policy: RetryPolicy::new(3, std::time::Duration::from_millis(500)),
            flush_at: DEFAULT_FLUSH_AT,
            batch_size_limit: BATCH_SIZE_LIMIT,
            metadata: BatchMetadata::default(),
            flush_notify,
            in_flight: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            captured: None,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// How many events to drain from the queue per flush cycle before size
    /// policy is applied (the candidate batch; `flushAt` in §4.3 step 3).
    #[must_use]
    pub fn with_flush_at(mut self, limit: usize) -> Self {
        self.flush_at = limit;
        self
    }

    /// Override [`BATCH_SIZE_LIMIT`] (mainly for tests).
    #[must_use]
    pub fn with_batch_size_limit(mut self, limit: usize) -> Self {
        self.batch_size_limit = limit;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: BatchMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Admin mode: batches are captured rather than sent.
    #[must_use]
    pub fn with_capture(mut self) -> Self {
        self.captured = Some(Mutex::new(Vec::new()));
        self
    }

    pub async fn captured_batches(&self) -> Vec<Vec<Event>> {
        match &self.captured {
            Some(m) => m.lock().await.clone(),
            None => Vec::new(),
        }
    }

    /// Drain and ship every batch the queue currently holds, waiting for
    /// each to finish (including retries). Used for an explicit caller
    /// `flush()` call and as the last step of [`Flusher::shutdown_async`].
    pub async fn flush_async(&self) -> Result<(), LangfuseError> {
        loop {
            let batch = self.next_batch().await?;
            if batch.is_empty() {
                return Ok(());
            }
            self.ship(batch).await;
        }
    }

    /// Run one flush cycle in the background, tracked so
    /// [`Flusher::shutdown_async`] can wait for it. Intended to be called
    /// from the single flush timer the processing pipeline drives — callers
    /// are responsible for not spawning more than one concurrent loop.
    pub async fn flush_in_background(self: &Arc<Self>) {
        let batch = match self.next_batch().await {
            Ok(batch) => batch,
            Err(err) => {
                self.bus.error(format!("failed to read queue for flush: {err}"));
                return;
            }
        };
        if batch.is_empty() {
            return;
        }
        let id = Uuid::new_v4();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.ship(batch).await;
            this.in_flight.lock().await.remove(&id);
        });
        self.in_flight.lock().await.insert(id, handle);
    }

    /// Flush everything outstanding and wait for every in-flight batch
    /// upload to finish. Idempotent: calling this more than once is a no-op
    /// after the first call.
    pub async fn shutdown_async(&self) -> Result<(), LangfuseError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.flush_async().await?;
        let handles: Vec<JoinHandle<()>> = self.in_flight.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Read the candidate batch off the queue and apply §4.3 step 4's size
    /// policy: permanently drop any item over [`MAX_MSG_SIZE`], then
    /// accumulate the rest in order until the running total would reach
    /// [`Self::batch_size_limit`], carrying the remainder back onto the
    /// head of the queue for the next cycle.
    async fn next_batch(&self) -> Result<Vec<Event>, LangfuseError> {
        let candidate = self.queue.drain_up_to(self.flush_at).await?;

        let mut accepted = Vec::with_capacity(candidate.len());
        for event in candidate {
            match event_byte_size(&event) {
                size if size > MAX_MSG_SIZE => {
                    self.bus.warning(format!(
                        "dropping event {}: serialized size {size} exceeds MAX_MSG_SIZE ({MAX_MSG_SIZE})",
                        event.id
                    ));
                }
                size => accepted.push((event, size)),
            }
        }

        let mut send_batch = Vec::with_capacity(accepted.len());
        let mut carryover = Vec::new();
        let mut running_total = 0usize;
        let mut splitting = false;
        for (event, size) in accepted {
            if splitting || running_total + size >= self.batch_size_limit {
                splitting = true;
                carryover.push(event);
            } else {
                running_total += size;
                send_batch.push(event);
            }
        }

        if !carryover.is_empty() {
            self.queue.prepend(carryover).await?;
        }
        Ok(send_batch)
    }

    async fn ship(&self, batch: Vec<Event>) {
        if let Some(captured) = &self.captured {
            captured.lock().await.push(batch);
            return;
        }
        let payload = serde_json::json!({
            "batch": batch,
            "metadata": {
                "batch_size": batch.len(),
                "sdk_integration": self.metadata.sdk_integration,
                "sdk_version": lf_http::SDK_VERSION,
                "sdk_variant": lf_http::SDK_VARIANT,
                "public_key": self.metadata.public_key,
                "sdk_name": lf_http::SDK_NAME,
            },
        });
        let result = lf_retry::retry(&self.retry_policy, is_flush_retryable, || async {
            let response = self.transport.post_json("/api/public/ingestion", &payload).await?;
            partial_failure_as_error(response)
        })
        .await;
        match result {
            Ok(_) => self.bus.flush(batch),
            Err(err) => {
                self.bus.error(format!("batch upload failed: {err}"));
                // §4.3 step 7: the send batch is NOT re-enqueued on terminal
                // failure, retryable or not — best-effort at-most-once.
                let _ = batch;
            }
        }
    }
}

/// HTTP 207 with a non-empty `errors` array is a failure worth retrying
/// (§4.3 step 6c), even though the transport layer treats 207 as a 2xx
/// success; turn it into a [`LangfuseError`] here so the retry combinator
/// sees it.
fn partial_failure_as_error(response: lf_http::TransportResponse) -> Result<lf_http::TransportResponse, LangfuseError> {
    if response.status == 207 {
        let has_errors = response
            .body
            .get("errors")
            .and_then(Value::as_array)
            .is_some_and(|errors| !errors.is_empty());
        if has_errors {
            return Err(LangfuseError::fetch_http(207, response.body.to_string()));
        }
    }
    Ok(response)
}

/// §4.3 step 6: retryable on network/timeout, non-2xx status, or a 207 with
/// a non-empty `errors` array (the latter already converted to a
/// `FetchHttp{status: 207}` error by [`partial_failure_as_error`]).
fn is_flush_retryable(err: &LangfuseError) -> bool {
    lf_http::is_retryable(err) || err.context.get("status").and_then(Value::as_u64) == Some(207)
}

fn event_byte_size(event: &Event) -> usize {
    serde_json::to_vec(event).map(|b| b.len()).unwrap_or(usize::MAX)
}
