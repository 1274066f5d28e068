// SPDX-License-Identifier: MIT OR Apache-2.0
//! Assembles a [`Langfuse`] client: layers the configuration builder, wires
//! the shared transport into the processor/flusher/prompt cache, and starts
//! the background flush-interval drainer.

use crate::Langfuse;
use lf_config::{ConfigWarning, LangfuseConfigBuilder};
use lf_core::{Clock, EventBus, SystemClock};
use lf_error::LangfuseError;
use lf_flusher::{BatchMetadata, Flusher};
use lf_http::{ReqwestTransport, Transport};
use lf_processor::{MaskFn, Processor};
use lf_prompt_cache::PromptCache;
use lf_queue::EventQueue;
use lf_retry::RetryPolicy;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Builds a [`Langfuse`] client the same way [`LangfuseConfigBuilder`]
/// builds a config: explicit calls, then environment variables, then
/// defaults.
#[derive(Default)]
pub struct LangfuseBuilder {
    config: LangfuseConfigBuilder,
    queue_path: Option<PathBuf>,
    mask: Option<MaskFn>,
    clock: Option<Arc<dyn Clock>>,
}

impl LangfuseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn public_key(mut self, v: impl Into<String>) -> Self {
        self.config = self.config.public_key(v);
        self
    }

    #[must_use]
    pub fn secret_key(mut self, v: impl Into<String>) -> Self {
        self.config = self.config.secret_key(v);
        self
    }

    #[must_use]
    pub fn base_url(mut self, v: impl Into<String>) -> Self {
        self.config = self.config.base_url(v);
        self
    }

    #[must_use]
    pub fn release(mut self, v: impl Into<String>) -> Self {
        self.config = self.config.release(v);
        self
    }

    #[must_use]
    pub fn enabled(mut self, v: bool) -> Self {
        self.config = self.config.enabled(v);
        self
    }

    #[must_use]
    pub fn flush_at(mut self, v: usize) -> Self {
        self.config = self.config.flush_at(v);
        self
    }

    #[must_use]
    pub fn flush_interval(mut self, v: Duration) -> Self {
        self.config = self.config.flush_interval(v);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, v: u32) -> Self {
        self.config = self.config.max_retries(v);
        self
    }

    #[must_use]
    pub fn fetch_retry_delay(mut self, v: Duration) -> Self {
        self.config = self.config.fetch_retry_delay(v);
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, v: Duration) -> Self {
        self.config = self.config.request_timeout(v);
        self
    }

    #[must_use]
    pub fn cache_ttl_seconds(mut self, v: u64) -> Self {
        self.config = self.config.cache_ttl_seconds(v);
        self
    }

    #[must_use]
    pub fn prompt_cache_refresh_retries(mut self, v: u32) -> Self {
        self.config = self.config.prompt_cache_refresh_retries(v);
        self
    }

    #[must_use]
    pub fn sdk_integration(mut self, v: impl Into<String>) -> Self {
        self.config = self.config.sdk_integration(v);
        self
    }

    /// Persist the queue to a newline-delimited JSON file instead of the
    /// default in-memory store.
    #[must_use]
    pub fn queue_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.queue_path = Some(path.into());
        self
    }

    /// Install a redaction callback run over `input`/`output` before
    /// anything leaves the process (§4.2 step 1).
    #[must_use]
    pub fn mask(mut self, mask: MaskFn) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Override the clock the prompt cache uses to judge TTL expiry
    /// (tests only; production clients use [`SystemClock`]).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Resolve configuration, wire every component together, and start the
    /// background flush-interval drainer. Configuration-time programmer
    /// errors (e.g. structurally invalid values) are the one case this
    /// constructor may return `Err` for; credential absence is not one of
    /// them (§7) — it is reported as a [`ConfigWarning`] instead.
    pub fn build(self) -> Result<(Langfuse, Vec<ConfigWarning>), LangfuseError> {
        let (config, warnings) = self.config.build()?;
        for warning in &warnings {
            tracing::warn!(%warning, "langfuse configuration warning");
        }

        let bus = EventBus::new();
        let transport: Arc<dyn Transport> = Arc::new(
            ReqwestTransport::new(
                config.base_url.clone(),
                config.public_key.clone(),
                config.secret_key.clone().unwrap_or_default(),
            )
            .with_sdk_integration(config.sdk_integration.clone()),
        );

        let queue = match &self.queue_path {
            Some(path) => EventQueue::file(path),
            None => EventQueue::memory(),
        };

        let flush_notify = Arc::new(Notify::new());
        let mut processor = Processor::new(
            queue.clone(),
            Arc::clone(&transport),
            bus.clone(),
            config.flush_at,
            Arc::clone(&flush_notify),
        );
        if let Some(mask) = self.mask {
            processor = processor.with_mask(mask);
        }

        let retry_policy = RetryPolicy::new(config.max_retries + 1, config.fetch_retry_delay)
            .with_attempt_timeout(config.request_timeout);

        let flusher = Arc::new(
            Flusher::new(queue, Arc::clone(&transport), bus.clone(), Arc::clone(&flush_notify))
                .with_retry_policy(retry_policy)
                .with_flush_at(config.flush_at)
                .with_metadata(BatchMetadata {
                    sdk_integration: config.sdk_integration.clone(),
                    public_key: config.public_key.clone(),
                }),
        );

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let prompt_cache = Arc::new(PromptCache::new(
            Arc::clone(&transport),
            clock,
            config.cache_ttl_seconds,
            config.prompt_cache_refresh_retries,
        ));

        let drain_task = config.enabled.then(|| {
            Arc::new(tokio::spawn(drain_loop(
                Arc::clone(&flusher),
                Arc::clone(&flush_notify),
                config.flush_interval,
            )))
        });

        Ok((
            Langfuse {
                config,
                bus,
                processor: Arc::new(processor),
                flusher,
                prompt_cache,
                transport,
                drain_task,
            },
            warnings,
        ))
    }
}

/// The threaded-runtime drainer described in §9's design note: `flush_at`
/// wakes this loop early via `notify`, `flush_interval` is its idle
/// timeout. `flush_interval == 0` disables the timeout side entirely —
/// the loop then only drains on an explicit notify.
async fn drain_loop(flusher: Arc<Flusher>, notify: Arc<Notify>, flush_interval: Duration) {
    loop {
        if flush_interval.is_zero() {
            notify.notified().await;
        } else {
            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(flush_interval) => {}
            }
        }
        flusher.flush_in_background().await;
    }
}
