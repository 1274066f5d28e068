// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared data model for the Langfuse Rust SDK.
//!
//! Everything else in this workspace — the queue, the flusher, the media
//! pipeline, the prompt cache, and the client façade — is built on the types
//! defined here: the [`event`] envelope and its per-kind bodies, the
//! [`prompt`] object and its mustache-style [`template`] substitution, and
//! the [`media_ref`] grammar used to reference uploaded media from inside an
//! event body.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod emitter;
pub mod event;
pub mod media_ref;
pub mod prompt;
pub mod size;
pub mod template;

pub use clock::{Clock, ManualClock, SystemClock};
pub use emitter::{EmittedEvent, EventBus};
pub use event::{
    Event, EventBody, EventKind, GenerationBody, ObservationBody, ObservationLevel, ScoreBody,
    ScoreValue, TraceBody, Usage,
};
pub use media_ref::MediaReference;
pub use prompt::{ChatItem, CompiledPrompt, Prompt, PromptBody};
