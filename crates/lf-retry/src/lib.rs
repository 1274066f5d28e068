// SPDX-License-Identifier: MIT OR Apache-2.0
//! A small async retry combinator: constant backoff, a caller-supplied
//! retryability predicate, and an optional per-attempt timeout.
//!
//! Used by the flusher's batch upload loop and the prompt cache's
//! single-flight refresh, both of which need "retry this a few times with a
//! fixed delay, but only for errors worth retrying" rather than anything
//! exponential or jittered.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::future::Future;
use std::time::Duration;
use tokio::time::error::Elapsed;

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` means no retries.
    pub max_attempts: u32,
    /// Fixed delay between a failed attempt and the next.
    pub backoff: Duration,
    /// Per-attempt timeout. `None` disables the timeout wrapper entirely.
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff, attempt_timeout: None }
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

/// Run `make_attempt` up to `policy.max_attempts` times, waiting
/// `policy.backoff` between failures that `is_retryable` judges worth
/// retrying. The first non-retryable failure, or the last failure once
/// attempts are exhausted, is returned to the caller.
pub async fn retry<T, E, Fut>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut make_attempt: impl FnMut() -> Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: From<Elapsed>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = match policy.attempt_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, make_attempt()).await {
                Ok(r) => r,
                Err(elapsed) => Err(E::from(elapsed)),
            },
            None => make_attempt().await,
        };
        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts || !is_retryable(&err) {
                    return Err(err);
                }
                tracing::debug!(attempt, max_attempts = policy.max_attempts, "retrying after failure");
                tokio::time::sleep(policy.backoff).await;
            }
        }
    }
}
