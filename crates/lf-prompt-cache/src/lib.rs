// SPDX-License-Identifier: MIT OR Apache-2.0
//! A TTL cache in front of the prompt-fetch endpoint, serving stale entries
//! while a single background task refreshes them (stale-while-revalidate),
//! and bypassing the cache entirely when the TTL is configured to zero.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use lf_core::{Clock, Prompt};
use lf_error::LangfuseError;
use lf_http::Transport;
use lf_retry::RetryPolicy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const MAX_REFRESH_RETRIES: u32 = 4;
const DEFAULT_REFRESH_RETRIES: u32 = 2;

/// Where a lookup landed relative to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    Fresh,
    Stale,
}

/// Per-call overrides accepted by [`PromptCache::get`], mirroring the
/// `{cacheTtlSeconds?, maxRetries?, fetchTimeoutMs?}` options of §4.5's
/// contract. `None` for any field falls back to the cache's construction-time
/// default.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetPromptOptions {
    /// Overrides the cache's default TTL for this call only; `Some(0)`
    /// bypasses the cache entirely for this call without changing the
    /// TTL any other caller of the same key sees.
    pub cache_ttl_seconds: Option<u64>,
    /// Overrides the refresh retry budget for this call only, clamped to
    /// `[0, 4]` the same way the construction-time default is.
    pub max_retries: Option<u32>,
    /// Overrides the per-attempt request timeout for this call's fetch.
    pub fetch_timeout_ms: Option<u64>,
}

struct CacheEntry {
    prompt: Prompt,
    fetched_at: Instant,
}

/// A TTL-bounded, single-flight-refreshing prompt cache.
pub struct PromptCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    retry_policy: RetryPolicy,
}

impl PromptCache {
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>, ttl_seconds: u64, max_retries: u32) -> Self {
        let retries = max_retries.clamp(0, MAX_REFRESH_RETRIES);
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            ttl: Duration::from_secs(ttl_seconds),
            clock,
            transport,
            retry_policy: RetryPolicy::new(retries + 1, RETRY_BACKOFF),
        }
    }

    pub fn with_default_retries(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>, ttl_seconds: u64) -> Self {
        Self::new(transport, clock, ttl_seconds, DEFAULT_REFRESH_RETRIES)
    }

    /// Fetch a prompt, serving a cached copy when one is fresh, a stale
    /// cached copy (while kicking off a background refresh) when one is
    /// stale, or fetching synchronously when the cache has nothing or the
    /// TTL is configured to zero (full bypass).
    pub async fn get(&self, name: &str, version: Option<u32>, label: Option<&str>) -> Result<Prompt, LangfuseError> {
        self.get_with_options(name, version, label, GetPromptOptions::default()).await
    }

    /// [`PromptCache::get`] with per-call overrides for TTL, retry budget,
    /// and fetch timeout (§4.5's `{cacheTtlSeconds?, maxRetries?,
    /// fetchTimeoutMs?}`).
    pub async fn get_with_options(
        &self,
        name: &str,
        version: Option<u32>,
        label: Option<&str>,
        options: GetPromptOptions,
    ) -> Result<Prompt, LangfuseError> {
        if version.is_some() && label.is_some() {
            return Err(LangfuseError::config("prompt lookup: `version` and `label` are mutually exclusive"));
        }
        let key = Prompt::cache_key(name, version, label);
        let ttl = options.cache_ttl_seconds.map_or(self.ttl, Duration::from_secs);
        let retry_policy = self.effective_retry_policy(&options);

        if ttl.is_zero() {
            return self.fetch_and_store_uncached(name, version, label, &retry_policy).await;
        }

        match self.state_of_with_ttl(&key, ttl).await {
            (CacheState::Fresh, Some(prompt)) => Ok(prompt),
            (CacheState::Stale, Some(prompt)) => {
                self.spawn_background_refresh(key, name.to_string(), version, label.map(str::to_string), retry_policy);
                Ok(prompt)
            }
            _ => self.fetch_and_store(&key, name, version, label, &retry_policy).await,
        }
    }

    /// Resolve this call's effective retry policy: `max_retries` clamped to
    /// `[0, 4]` as at construction time, plus an optional per-attempt
    /// timeout override.
    fn effective_retry_policy(&self, options: &GetPromptOptions) -> RetryPolicy {
        let mut policy = match options.max_retries {
            Some(retries) => RetryPolicy::new(retries.clamp(0, MAX_REFRESH_RETRIES) + 1, RETRY_BACKOFF),
            None => self.retry_policy,
        };
        if let Some(ms) = options.fetch_timeout_ms {
            policy = policy.with_attempt_timeout(Duration::from_millis(ms));
        }
        policy
    }

    /// Drop every cached entry whose key starts with `prefix`.
    pub async fn invalidate_by_prefix(&self, prefix: &str) {
        let mut entries = self.entries.lock().await;
        entries.retain(|key, _| !key.starts_with(prefix));
    }

    async fn state_of_with_ttl(&self, key: &str, ttl: Duration) -> (CacheState, Option<Prompt>) {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            None => (CacheState::Absent, None),
            Some(entry) => {
                let age = self.clock.now().saturating_duration_since(entry.fetched_at);
                let state = if age < ttl { CacheState::Fresh } else { CacheState::Stale };
                (state, Some(entry.prompt.clone()))
            }
        }
    }

    /// Test-only convenience: the cache's construction-time TTL.
    #[cfg(test)]
    async fn state_of(&self, key: &str) -> (CacheState, Option<Prompt>) {
        self.state_of_with_ttl(key, self.ttl).await
    }

    fn spawn_background_refresh(
        &self,
        key: String,
        name: String,
        version: Option<u32>,
        label: Option<String>,
        retry_policy: RetryPolicy,
    ) {
        let in_flight = Arc::clone(&self.in_flight);
        let transport = Arc::clone(&self.transport);
        let clock = Arc::clone(&self.clock);
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            let guard = match SingleFlightGuard::try_acquire(&in_flight, key.clone()).await {
                Some(guard) => guard,
                None => return,
            };
            let result = lf_retry::retry(&retry_policy, lf_http::is_retryable, || {
                fetch_prompt(&transport, &name, version, label.as_deref())
            })
            .await;
            if let Ok(prompt) = result {
                let mut entries = entries.lock().await;
                entries.insert(guard.key().to_string(), CacheEntry { prompt, fetched_at: clock.now() });
            }
            // On failure the stale entry is left untouched (§4.5 "Refresh
            // fetch": a non-success response does not update the cache).
        });
    }

    async fn fetch_and_store(
        &self,
        key: &str,
        name: &str,
        version: Option<u32>,
        label: Option<&str>,
        retry_policy: &RetryPolicy,
    ) -> Result<Prompt, LangfuseError> {
        let prompt = lf_retry::retry(retry_policy, lf_http::is_retryable, || {
            fetch_prompt(&self.transport, name, version, label)
        })
        .await?;
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), CacheEntry { prompt: prompt.clone(), fetched_at: self.clock.now() });
        Ok(prompt)
    }

    /// §4.5 "Cache bypass": a zero effective TTL never reads from or writes
    /// to the cache, regardless of what the construction-time TTL is.
    async fn fetch_and_store_uncached(
        &self,
        name: &str,
        version: Option<u32>,
        label: Option<&str>,
        retry_policy: &RetryPolicy,
    ) -> Result<Prompt, LangfuseError> {
        lf_retry::retry(retry_policy, lf_http::is_retryable, || {
            fetch_prompt(&self.transport, name, version, label)
        })
        .await
    }
}

/// RAII single-flight membership: removes its key from the in-flight set on
/// drop, so a panicking refresh doesn't wedge future refreshes for that key.
struct SingleFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl SingleFlightGuard {
    async fn try_acquire(in_flight: &Arc<Mutex<HashSet<String>>>, key: String) -> Option<Self> {
        let mut guard = in_flight.lock().await;
        if !guard.insert(key.clone()) {
            return None;
        }
        Some(Self { in_flight: Arc::clone(in_flight), key })
    }

    fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for SingleFlightGuard {
    fn drop(&mut self) {
        let in_flight = Arc::clone(&self.in_flight);
        let key = self.key.clone();
        tokio::spawn(async move {
            in_flight.lock().await.remove(&key);
        });
    }
}

async fn fetch_prompt(
    transport: &Arc<dyn Transport>,
    name: &str,
    version: Option<u32>,
    label: Option<&str>,
) -> Result<Prompt, LangfuseError> {
    let mut query = Vec::new();
    if let Some(v) = version {
        query.push(("version".to_string(), v.to_string()));
    }
    if let Some(l) = label {
        query.push(("label".to_string(), l.to_string()));
    }
    let path = format!("/api/public/v2/prompts/{name}");
    let response = transport.get(&path, &query).await?;
    serde_json::from_value(response.body)
        .map_err(|e| LangfuseError::serialization("malformed prompt response").with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lf_core::{ManualClock, PromptBody};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_prompt_server(name: &str, version: u32) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/api/public/v2/prompts/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": name,
                "version": version,
                "config": {},
                "labels": ["production"],
                "tags": [],
                "type": "text",
                "prompt": "hello {{name}}",
            })))
            .mount(&server)
            .await;
        server
    }

    fn transport(server: &MockServer) -> Arc<dyn Transport> {
        Arc::new(lf_http::ReqwestTransport::new(server.uri(), "pk", "sk"))
    }

    // ── cache miss fetches synchronously ────────────────────────────────

    #[tokio::test]
    async fn miss_fetches_and_populates_cache() {
        let server = mock_prompt_server("greeting", 1).await;
        let clock = Arc::new(ManualClock::new());
        let cache = PromptCache::with_default_retries(transport(&server), clock, 60);
        let prompt = cache.get("greeting", None, None).await.unwrap();
        assert_eq!(prompt.name, "greeting");
        assert!(matches!(prompt.body, PromptBody::Text { .. }));
    }

    // ── fresh entries are served without hitting the network again ─────

    #[tokio::test]
    async fn fresh_entry_is_served_from_cache() {
        let server = mock_prompt_server("greeting", 1).await;
        let clock = Arc::new(ManualClock::new());
        let cache = PromptCache::with_default_retries(transport(&server), clock.clone(), 60);
        cache.get("greeting", None, None).await.unwrap();
        clock.advance(Duration::from_secs(1));
        let (state, _) = cache.state_of(&Prompt::cache_key("greeting", None, None)).await;
        assert_eq!(state, CacheState::Fresh);
    }

    // ── TTL expiry flips fresh to stale ─────────────────────────────────

    #[tokio::test]
    async fn entry_becomes_stale_after_ttl_elapses() {
        let server = mock_prompt_server("greeting", 1).await;
        let clock = Arc::new(ManualClock::new());
        let cache = PromptCache::with_default_retries(transport(&server), clock.clone(), 60);
        cache.get("greeting", None, None).await.unwrap();
        clock.advance(Duration::from_millis(60_001));
        let (state, prompt) = cache.state_of(&Prompt::cache_key("greeting", None, None)).await;
        assert_eq!(state, CacheState::Stale);
        assert!(prompt.is_some());
    }

    // ── zero TTL bypasses the cache entirely ────────────────────────────

    #[tokio::test]
    async fn zero_ttl_bypasses_cache() {
        let server = mock_prompt_server("greeting", 1).await;
        let clock = Arc::new(ManualClock::new());
        let cache = PromptCache::with_default_retries(transport(&server), clock, 0);
        cache.get("greeting", None, None).await.unwrap();
        let (state, _) = cache.state_of(&Prompt::cache_key("greeting", None, None)).await;
        assert_eq!(state, CacheState::Absent);
    }

    // ── invalidate by prefix ─────────────────────────────────────────────

    #[tokio::test]
    async fn invalidate_by_prefix_clears_matching_keys() {
        let server = mock_prompt_server("greeting", 1).await;
        let clock = Arc::new(ManualClock::new());
        let cache = PromptCache::with_default_retries(transport(&server), clock, 60);
        cache.get("greeting", None, None).await.unwrap();
        cache.invalidate_by_prefix("greeting@").await;
        let (state, _) = cache.state_of(&Prompt::cache_key("greeting", None, None)).await;
        assert_eq!(state, CacheState::Absent);
    }

    // ── retry bound clamps to [0, 4] ─────────────────────────────────────

    #[tokio::test]
    async fn max_retries_clamps_to_four() {
        let server = mock_prompt_server("greeting", 1).await;
        let clock = Arc::new(ManualClock::new());
        let cache = PromptCache::new(transport(&server), clock, 60, 99);
        assert_eq!(cache.retry_policy.max_attempts, 5);
    }

    // ── per-call `cacheTtlSeconds` override ──────────────────────────────

    #[tokio::test]
    async fn per_call_zero_ttl_bypasses_a_non_zero_construction_ttl() {
        let server = mock_prompt_server("greeting", 1).await;
        let clock = Arc::new(ManualClock::new());
        let cache = PromptCache::with_default_retries(transport(&server), clock, 60);
        let options = GetPromptOptions { cache_ttl_seconds: Some(0), ..Default::default() };
        cache.get_with_options("greeting", None, None, options).await.unwrap();
        let (state, _) = cache.state_of(&Prompt::cache_key("greeting", None, None)).await;
        assert_eq!(state, CacheState::Absent);
    }

    // ── per-call `maxRetries` override ───────────────────────────────────

    #[tokio::test]
    async fn per_call_max_retries_overrides_the_construction_time_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/public/v2/prompts/greeting"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let clock = Arc::new(ManualClock::new());
        // Construction-time retries are 0 (one attempt total); the per-call
        // override below asks for one retry, so the fetch is attempted
        // twice. Both fail and the final error still propagates.
        let cache = PromptCache::new(transport(&server), clock, 60, 0);
        let options = GetPromptOptions {
            max_retries: Some(1),
            fetch_timeout_ms: Some(50),
            ..Default::default()
        };
        let result = cache.get_with_options("greeting", None, None, options).await;
        assert!(result.is_err());
    }

    // ── per-call `fetchTimeoutMs` override ───────────────────────────────

    #[tokio::test]
    async fn per_call_fetch_timeout_elapses_against_a_slow_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/public/v2/prompts/greeting"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "name": "greeting",
                        "version": 1,
                        "config": {},
                        "labels": [],
                        "tags": [],
                        "type": "text",
                        "prompt": "hello {{name}}",
                    }))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        let clock = Arc::new(ManualClock::new());
        let cache = PromptCache::new(transport(&server), clock, 60, 0);
        let options = GetPromptOptions { fetch_timeout_ms: Some(10), ..Default::default() };
        let result = cache.get_with_options("greeting", None, None, options).await;
        assert!(result.is_err());
    }
}
