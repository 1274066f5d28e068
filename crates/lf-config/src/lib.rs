// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client configuration: explicit overrides layered over environment
//! variables layered over defaults, with validation that turns obviously
//! broken settings into either a hard error or a recorded warning.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use lf_error::LangfuseError;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://cloud.langfuse.com";
const DEFAULT_FLUSH_AT: usize = 15;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_FETCH_RETRY_DELAY: Duration = Duration::from_millis(3000);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CACHE_TTL_SECONDS: u64 = 60;
const MIN_FLUSH_AT: usize = 1;
const MAX_CACHE_TTL_RETRIES: u32 = 4;
const DEFAULT_CACHE_REFRESH_RETRIES: u32 = 2;
const DEFAULT_SDK_INTEGRATION: &str = "DEFAULT";

/// A non-fatal condition noticed while building a [`LangfuseConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `flush_at` was requested below the floor and was clamped up to it.
    FlushAtBelowMinimum { requested: usize, applied: usize },
    /// `prompt_cache_refresh_retries` was outside `[0, 4]` and was clamped.
    CacheRefreshRetriesOutOfRange { requested: u32, applied: u32 },
    /// Telemetry is disabled; every recording call becomes a no-op.
    Disabled,
    /// `public_key` was not supplied anywhere; transmission is disabled
    /// rather than treated as a hard error (§7: configuration errors warn
    /// and disable transmission, they do not throw).
    MissingPublicKey,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FlushAtBelowMinimum { requested, applied } => write!(
                f,
                "flush_at {requested} is below the minimum of {MIN_FLUSH_AT}; using {applied}"
            ),
            Self::CacheRefreshRetriesOutOfRange { requested, applied } => write!(
                f,
                "prompt_cache_refresh_retries {requested} is outside [0, {MAX_CACHE_TTL_RETRIES}]; using {applied}"
            ),
            Self::Disabled => write!(f, "Langfuse telemetry is disabled"),
            Self::MissingPublicKey => {
                write!(f, "no public_key configured; telemetry transmission is disabled")
            }
        }
    }
}

/// Resolved, validated client configuration.
#[derive(Debug, Clone)]
pub struct LangfuseConfig {
    pub public_key: String,
    /// Absent means the client authenticates with `Authorization: Bearer
    /// <public_key>` instead of HTTP basic auth (§6).
    pub secret_key: Option<String>,
    pub base_url: String,
    pub release: Option<String>,
    pub enabled: bool,
    pub flush_at: usize,
    pub flush_interval: Duration,
    pub max_retries: u32,
    /// Fixed delay between a failed ingestion/prompt-fetch attempt and the
    /// next retry.
    pub fetch_retry_delay: Duration,
    pub request_timeout: Duration,
    pub cache_ttl_seconds: u64,
    pub prompt_cache_refresh_retries: u32,
    /// The name an embedding framework identifies itself by in ingestion
    /// batch metadata, e.g. `"LANGCHAIN"`. Defaults to `"DEFAULT"`.
    pub sdk_integration: String,
}

/// Builds a [`LangfuseConfig`] from explicit values, environment variables,
/// and defaults, in that order of precedence.
#[derive(Debug, Default)]
pub struct LangfuseConfigBuilder {
    public_key: Option<String>,
    secret_key: Option<String>,
    base_url: Option<String>,
    release: Option<String>,
    enabled: Option<bool>,
    flush_at: Option<usize>,
    flush_interval: Option<Duration>,
    max_retries: Option<u32>,
    fetch_retry_delay: Option<Duration>,
    request_timeout: Option<Duration>,
    cache_ttl_seconds: Option<u64>,
    prompt_cache_refresh_retries: Option<u32>,
    sdk_integration: Option<String>,
}

impl LangfuseConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn public_key(mut self, v: impl Into<String>) -> Self {
        self.public_key = Some(v.into());
        self
    }

    #[must_use]
    pub fn secret_key(mut self, v: impl Into<String>) -> Self {
        self.secret_key = Some(v.into());
        self
    }

    #[must_use]
    pub fn base_url(mut self, v: impl Into<String>) -> Self {
        self.base_url = Some(v.into());
        self
    }

    #[must_use]
    pub fn release(mut self, v: impl Into<String>) -> Self {
        self.release = Some(v.into());
        self
    }

    #[must_use]
    pub fn enabled(mut self, v: bool) -> Self {
        self.enabled = Some(v);
        self
    }

    #[must_use]
    pub fn flush_at(mut self, v: usize) -> Self {
        self.flush_at = Some(v);
        self
    }

    #[must_use]
    pub fn flush_interval(mut self, v: Duration) -> Self {
        self.flush_interval = Some(v);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, v: u32) -> Self {
        self.max_retries = Some(v);
        self
    }

    #[must_use]
    pub fn fetch_retry_delay(mut self, v: Duration) -> Self {
        self.fetch_retry_delay = Some(v);
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, v: Duration) -> Self {
        self.request_timeout = Some(v);
        self
    }

    #[must_use]
    pub fn cache_ttl_seconds(mut self, v: u64) -> Self {
        self.cache_ttl_seconds = Some(v);
        self
    }

    #[must_use]
    pub fn prompt_cache_refresh_retries(mut self, v: u32) -> Self {
        self.prompt_cache_refresh_retries = Some(v);
        self
    }

    #[must_use]
    pub fn sdk_integration(mut self, v: impl Into<String>) -> Self {
        self.sdk_integration = Some(v.into());
        self
    }

    /// Merge explicit values over the environment over defaults, validate,
    /// and return the resolved config plus any non-fatal warnings.
    pub fn build(self) -> Result<(LangfuseConfig, Vec<ConfigWarning>), LangfuseError> {
        let mut warnings = Vec::new();

        let public_key = self.public_key.or_else(|| env_var("LANGFUSE_PUBLIC_KEY"));
        // Absence of a secret key is not an error: the client falls back to
        // bearer auth with just the public key (§6).
        let secret_key = self.secret_key.or_else(|| env_var("LANGFUSE_SECRET_KEY"));
        let base_url = self
            .base_url
            .or_else(|| env_var("LANGFUSE_BASE_URL"))
            .or_else(|| env_var("LANGFUSE_HOST"))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let release = self.release.or_else(lf_http::detect_release);
        let mut enabled = self
            .enabled
            .or_else(|| env_var("LANGFUSE_ENABLED").map(|v| v != "false" && v != "0"))
            .unwrap_or(true);

        // Absence of public_key disables transmission with a warning rather
        // than failing configuration outright (§7 error taxonomy).
        let public_key = public_key.unwrap_or_else(|| {
            warnings.push(ConfigWarning::MissingPublicKey);
            enabled = false;
            String::new()
        });

        if !enabled {
            warnings.push(ConfigWarning::Disabled);
        }

        let requested_flush_at = self
            .flush_at
            .or_else(|| env_var("LANGFUSE_FLUSH_AT").and_then(|v| v.parse().ok()))
            .unwrap_or(DEFAULT_FLUSH_AT);
        let flush_at = if requested_flush_at < MIN_FLUSH_AT {
            warnings.push(ConfigWarning::FlushAtBelowMinimum {
                requested: requested_flush_at,
                applied: MIN_FLUSH_AT,
            });
            MIN_FLUSH_AT
        } else {
            requested_flush_at
        };

        let flush_interval = self
            .flush_interval
            .or_else(|| {
                env_var("LANGFUSE_FLUSH_INTERVAL_MS")
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
            })
            .unwrap_or(DEFAULT_FLUSH_INTERVAL);

        let max_retries = self
            .max_retries
            .or_else(|| env_var("LANGFUSE_MAX_RETRIES").and_then(|v| v.parse().ok()))
            .unwrap_or(DEFAULT_MAX_RETRIES);

        let fetch_retry_delay = self
            .fetch_retry_delay
            .or_else(|| {
                env_var("LANGFUSE_FETCH_RETRY_DELAY_MS")
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
            })
            .unwrap_or(DEFAULT_FETCH_RETRY_DELAY);

        let request_timeout = self
            .request_timeout
            .or_else(|| {
                env_var("LANGFUSE_TIMEOUT_MS")
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
            })
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let cache_ttl_seconds = self
            .cache_ttl_seconds
            .or_else(|| env_var("LANGFUSE_PROMPT_CACHE_TTL_SECONDS").and_then(|v| v.parse().ok()))
            .unwrap_or(DEFAULT_CACHE_TTL_SECONDS);

        let requested_retries = self
            .prompt_cache_refresh_retries
            .unwrap_or(DEFAULT_CACHE_REFRESH_RETRIES);
        let prompt_cache_refresh_retries = if requested_retries > MAX_CACHE_TTL_RETRIES {
            warnings.push(ConfigWarning::CacheRefreshRetriesOutOfRange {
                requested: requested_retries,
                applied: MAX_CACHE_TTL_RETRIES,
            });
            MAX_CACHE_TTL_RETRIES
        } else {
            requested_retries
        };

        let sdk_integration = self
            .sdk_integration
            .or_else(|| env_var("LANGFUSE_SDK_INTEGRATION"))
            .unwrap_or_else(|| DEFAULT_SDK_INTEGRATION.to_string());

        Ok((
            LangfuseConfig {
                public_key,
                secret_key,
                base_url,
                release,
                enabled,
                flush_at,
                flush_interval,
                max_retries,
                fetch_retry_delay,
                request_timeout,
                cache_ttl_seconds,
                prompt_cache_refresh_retries,
                sdk_integration,
            },
            warnings,
        ))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
