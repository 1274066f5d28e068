// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `Langfuse` client façade: the single entry point through which
//! callers create traces/spans/generations/events/scores, read and create
//! prompts, and reach the thin dataset/read REST wrappers.
//!
//! Every crate below this one implements one piece of the pipeline
//! ([`lf_queue`], [`lf_processor`], [`lf_flusher`], [`lf_media`],
//! [`lf_prompt_cache`]); this crate wires them together behind the shape
//! callers actually reach for, and owns the one behavior none of those
//! crates could own by themselves: auto-creating a trace id when a caller
//! builds an observation without one (invariant E1).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod observation;
mod prompt;
mod read;

pub use builder::LangfuseBuilder;
pub use observation::{GenerationParams, ObservationParams, ScoreParams, TraceParams};
pub use lf_prompt_cache::GetPromptOptions;
pub use prompt::NewPromptRequest;
pub use read::ReadQuery;

use lf_core::EventBus;
use lf_error::LangfuseError;
use lf_http::Transport;
use lf_processor::Processor;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// The SDK's single public entry point.
///
/// Cloning is cheap: every field is either an `Arc` or already internally
/// reference-counted, so a `Langfuse` can be shared across tasks the same
/// way callers would share a connection pool.
#[derive(Clone)]
pub struct Langfuse {
    config: lf_config::LangfuseConfig,
    bus: EventBus,
    processor: Arc<Processor>,
    flusher: Arc<lf_flusher::Flusher>,
    prompt_cache: Arc<lf_prompt_cache::PromptCache>,
    transport: Arc<dyn Transport>,
    drain_task: Option<Arc<JoinHandle<()>>>,
}

impl Langfuse {
    /// Start building a client from explicit configuration, environment
    /// variables, and defaults (see `lf_config::LangfuseConfigBuilder`).
    pub fn builder() -> LangfuseBuilder {
        LangfuseBuilder::new()
    }

    /// The resolved configuration this client was built with.
    pub fn config(&self) -> &lf_config::LangfuseConfig {
        &self.config
    }

    /// Subscribe to the `"error"`/`"warning"`/`"flush"` side channel that
    /// every telemetry call reports to instead of returning a `Result`
    /// (§7 propagation policy).
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Arc<lf_core::EmittedEvent>> {
        self.bus.subscribe()
    }

    /// Drain and ship everything currently queued, waiting for it to land.
    /// Never fails the caller's flow in the propagation-policy sense — a
    /// failed delivery is still reported as `Err` here because this is an
    /// explicit, caller-invoked operation rather than a telemetry call.
    pub async fn flush(&self) -> Result<(), LangfuseError> {
        self.flusher.flush_async().await
    }

    /// Flush everything outstanding, wait for in-flight uploads to finish,
    /// and stop the background flush-interval timer. Idempotent.
    pub async fn shutdown(&self) -> Result<(), LangfuseError> {
        if let Some(task) = &self.drain_task {
            task.abort();
        }
        self.flusher.shutdown_async().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lf_core::EmittedEvent;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_over(server: &MockServer) -> Langfuse {
        let (client, _warnings) = Langfuse::builder()
            .public_key("pk")
            .secret_key("sk")
            .base_url(server.uri())
            .flush_at(100)
            .flush_interval(std::time::Duration::from_secs(3600))
            .build()
            .unwrap();
        client
    }

    #[tokio::test]
    async fn builder_without_public_key_disables_transmission() {
        let server = MockServer::start().await;
        let (client, warnings) = Langfuse::builder().base_url(server.uri()).build().unwrap();
        assert!(!client.config().enabled);
        assert!(warnings.contains(&lf_config::ConfigWarning::MissingPublicKey));
    }

    #[tokio::test]
    async fn trace_then_flush_ships_one_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/public/ingestion"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;
        let client = client_over(&server).await;
        client.trace(TraceParams { name: Some("t1".into()), ..Default::default() }).await;
        client.flush().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/public/ingestion"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let client = client_over(&server).await;
        client.trace(TraceParams::default()).await;
        client.shutdown().await.unwrap();
        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn oversized_field_emits_exactly_one_warning() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/public/ingestion"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let client = client_over(&server).await;
        let mut rx = client.subscribe();
        client
            .event(ObservationParams {
                trace_id: Some("t1".into()),
                input: Some(json!("x".repeat(2_000_000))),
                metadata: Some(json!("y".repeat(100_000))),
                ..Default::default()
            })
            .await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(&*event, EmittedEvent::Warning { message } if message.contains("Input")));
    }
}
