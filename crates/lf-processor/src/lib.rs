// SPDX-License-Identifier: MIT OR Apache-2.0
//! The pipeline every recorded event passes through before it reaches the
//! queue: mask, upload inline media, truncate oversized fields, confirm the
//! result actually serializes, then enqueue and maybe wake the flusher.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use lf_core::{Event, EventBody, EventBus, EventKind};
use lf_error::LangfuseError;
use lf_http::Transport;
use lf_queue::EventQueue;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::Notify;

/// Which field a [`MaskFn`] is being asked to transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskField {
    Input,
    Output,
    Metadata,
}

/// A caller-supplied redaction callback, applied to `input`, `output`, and
/// `metadata` before anything leaves the process.
pub type MaskFn = Arc<dyn Fn(MaskField, &Value) -> Value + Send + Sync>;

/// The default ceiling on one event's serialized size. Fields are truncated,
/// largest first, until the event fits.
pub const DEFAULT_MAX_EVENT_BYTES: usize = 1_000_000;

const TRUNCATED_MARKER: &str = "<truncated due to size exceeding limit>";
const MASK_FAILURE_MARKER: &str = "<fully masked due to failed mask function>";

/// The pipeline itself.
pub struct Processor {
    queue: EventQueue,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    mask: Option<MaskFn>,
    flush_at: usize,
    flush_notify: Arc<Notify>,
    max_event_bytes: usize,
}

impl Processor {
    pub fn new(
        queue: EventQueue,
        transport: Arc<dyn Transport>,
        bus: EventBus,
        flush_at: usize,
        flush_notify: Arc<Notify>,
    ) -> Self {
        Self {
            queue,
            transport,
            bus,
            mask: None,
            flush_at,
            flush_notify,
            max_event_bytes: DEFAULT_MAX_EVENT_BYTES,
        }
    }

    #[must_use]
    pub fn with_mask(mut self, mask: MaskFn) -> Self {
        self.mask = Some(mask);
        self
    }

    #[must_use]
    pub fn with_max_event_bytes(mut self, max_event_bytes: usize) -> Self {
        self.max_event_bytes = max_event_bytes;
        self
    }

    /// Run one body through the full pipeline. Never returns an error to the
    /// caller; failures at any step are reported on the [`EventBus`] and the
    /// pipeline does its best to still enqueue something.
    pub async fn process(&self, mut body: EventBody) {
        self.apply_mask(&mut body);
        self.upload_media(&mut body).await;
        self.truncate_oversized_fields(&mut body);

        if let Err(err) = serde_json::to_value(&body) {
            self.bus.error(format!("event body failed to serialize, dropping: {err}"));
            return;
        }

        let event = Event::new(body);
        if let Err(err) = self.queue.append(vec![event]).await {
            self.bus.error(format!("failed to enqueue event: {err}"));
            return;
        }

        if let Ok(len) = self.queue.len().await {
            if len >= self.flush_at {
                self.flush_notify.notify_one();
            }
        }
    }

    /// Masks `input` and `output` only; `metadata` is never masked.
    fn apply_mask(&self, body: &mut EventBody) {
        let Some(mask) = self.mask.clone() else { return };
        mask_field(body.input_mut(), MaskField::Input, &mask, &self.bus);
        mask_field(body.output_mut(), MaskField::Output, &mask, &self.bus);
    }

    async fn upload_media(&self, body: &mut EventBody) {
        let Some(trace_id) = body.media_trace_id().map(str::to_string) else {
            self.bus.warning("skipping media extraction: no traceId available for this event".to_string());
            return;
        };
        let observation_id = body.observation_id().map(str::to_string);
        self.upload_media_in_field(body.input_mut(), "input", &trace_id, observation_id.as_deref()).await;
        self.upload_media_in_field(body.output_mut(), "output", &trace_id, observation_id.as_deref()).await;
        self.upload_media_in_field(body.metadata_mut(), "metadata", &trace_id, observation_id.as_deref()).await;
    }

    async fn upload_media_in_field(
        &self,
        field: Option<&mut Value>,
        field_name: &str,
        trace_id: &str,
        observation_id: Option<&str>,
    ) {
        let Some(value) = field else { return };
        let discovered = lf_media::discover(value, lf_media::MAX_DISCOVERY_DEPTH);
        for media in discovered {
            match lf_media::upload(&*self.transport, trace_id, observation_id, field_name, &media).await {
                Ok(outcome) => {
                    if let Some(slot) = lf_media::replace_at_path(value, &media.path) {
                        *slot = Value::String(outcome.reference.to_string());
                    }
                }
                Err(err) => {
                    self.bus.warning(format!("media upload failed, leaving field as-is: {err}"));
                }
            }
        }
    }

    fn truncate_oversized_fields(&self, body: &mut EventBody) {
        loop {
            let total = lf_core::size::json_byte_size(&serde_json::to_value(&*body).unwrap_or(Value::Null));
            if total <= self.max_event_bytes {
                return;
            }
            let mut candidates: Vec<(MaskField, usize)> = Vec::new();
            if let Some(v) = body.input() {
                candidates.push((MaskField::Input, lf_core::size::json_byte_size(v)));
            }
            if let Some(v) = body.output() {
                candidates.push((MaskField::Output, lf_core::size::json_byte_size(v)));
            }
            if let Some(v) = body.metadata() {
                candidates.push((MaskField::Metadata, lf_core::size::json_byte_size(v)));
            }
            candidates.retain(|(_, size)| *size > 0);
            // `max_by_key` breaks ties toward the *last* equal element; the
            // spec requires a stable tie-break toward the *earlier* field in
            // `input, output, metadata` order, so fold manually instead.
            let largest = candidates.into_iter().fold(None, |acc, (field, size)| match acc {
                Some((_, best_size)) if best_size >= size => acc,
                _ => Some((field, size)),
            });
            let Some((largest, _)) = largest else {
                return;
            };
            let slot = match largest {
                MaskField::Input => body.input_mut(),
                MaskField::Output => body.output_mut(),
                MaskField::Metadata => body.metadata_mut(),
            };
            if let Some(slot) = slot {
                *slot = Value::String(TRUNCATED_MARKER.to_string());
                self.bus.warning(format!("{largest:?} truncated: event exceeded {} bytes", self.max_event_bytes));
            } else {
                return;
            }
        }
    }
}

fn mask_field(slot: Option<&mut Value>, field: MaskField, mask: &MaskFn, bus: &EventBus) {
    let Some(slot) = slot else { return };
    let original = slot.clone();
    let result = catch_unwind(AssertUnwindSafe(|| mask(field, &original)));
    match result {
        Ok(masked) => *slot = masked,
        Err(_) => {
            bus.error(format!("mask callback panicked on {field:?}; redacting field"));
            *slot = Value::String(MASK_FAILURE_MARKER.to_string());
        }
    }
}
