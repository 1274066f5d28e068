// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client-side telemetry SDK for [Langfuse](https://langfuse.com): records
//! hierarchical traces/spans/generations/events, attaches scores, ships them
//! to the ingestion endpoint in batches, and provides a cached prompt
//! registry client and an out-of-band media upload pipeline.
//!
//! This crate is a thin aggregator over the workspace's `lf-*` crates,
//! re-exporting the [`Langfuse`] façade as the single public entry point.
//! Most applications only need this crate; the `lf-*` crates are public so
//! advanced callers can compose the pipeline directly (a custom
//! [`pipeline::Store`], an alternate [`pipeline::Transport`], or a
//! standalone [`pipeline::PromptCache`]).

#![deny(unsafe_code)]

pub use lf_client::{
    GenerationParams, Langfuse, LangfuseBuilder, NewPromptRequest, ObservationParams, ReadQuery,
    ScoreParams, TraceParams,
};
pub use lf_config::{ConfigWarning, LangfuseConfig};
pub use lf_core::{
    ChatItem, EmittedEvent, Event, EventBody, EventBus, EventKind, MediaReference, ObservationLevel,
    Prompt, PromptBody, ScoreValue, Usage,
};
pub use lf_error::{ErrorKind, LangfuseError};

/// Re-exports of the lower-level pipeline crates for callers assembling a
/// custom pipeline instead of using the [`Langfuse`] façade directly.
pub mod pipeline {
    pub use lf_flusher::Flusher;
    pub use lf_http::Transport;
    pub use lf_media::{discover, resolve_references, upload, DiscoveredMedia};
    pub use lf_processor::Processor;
    pub use lf_prompt_cache::PromptCache;
    pub use lf_queue::{EventQueue, MemoryStore, Store};
}
