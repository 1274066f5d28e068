// SPDX-License-Identifier: MIT OR Apache-2.0
//! The HTTP transport shared by the flusher, the media pipeline, and the
//! prompt/read endpoints: basic auth, SDK identification headers, release
//! detection, and a thin [`Transport`] seam so callers can stub the wire in
//! tests instead of standing up a real server.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use lf_error::{ErrorKind, LangfuseError};
use serde_json::Value;

/// Identifies this SDK to the backend; part of the wire contract, not a
/// branding choice — the backend keys per-SDK rollout behavior off of it.
pub const SDK_NAME: &str = "langfuse-rust";

/// The crate version, forwarded as `x-langfuse-sdk-version`.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Forwarded as `x-langfuse-sdk-variant` and in the ingestion batch metadata.
pub const SDK_VARIANT: &str = "rust";

/// Environment variables consulted, in order, to infer a release identifier
/// when the caller didn't configure one explicitly. Mirrors the fallback
/// chain CI/hosting providers commonly set.
pub const RELEASE_ENV_VARS: &[&str] = &[
    "LANGFUSE_RELEASE",
    "VERCEL_GIT_COMMIT_SHA",
    "NEXT_PUBLIC_VERCEL_GIT_COMMIT_SHA",
    "RENDER_GIT_COMMIT",
    "HEROKU_SLUG_COMMIT",
    "GITHUB_SHA",
    "CIRCLE_SHA1",
    "NETLIFY_COMMIT_REF",
];

/// Detect a release identifier from the environment, trying each of
/// [`RELEASE_ENV_VARS`] in order and returning the first that is set and
/// non-empty.
pub fn detect_release() -> Option<String> {
    RELEASE_ENV_VARS.iter().find_map(|var| {
        std::env::var(var).ok().filter(|v| !v.is_empty())
    })
}

/// The outcome of a transport call: status code plus parsed JSON body (an
/// empty body parses as [`Value::Null`]).
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The wire seam every backend call goes through.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, path: &str, body: &Value) -> Result<TransportResponse, LangfuseError>;

    async fn post_bytes(
        &self,
        url: &str,
        content_type: &str,
        bytes: Vec<u8>,
        extra_headers: &[(String, String)],
    ) -> Result<TransportResponse, LangfuseError>;

    async fn put_bytes(
        &self,
        url: &str,
        content_type: &str,
        bytes: Vec<u8>,
        extra_headers: &[(String, String)],
    ) -> Result<TransportResponse, LangfuseError>;

    async fn patch_json(&self, path: &str, body: &Value) -> Result<TransportResponse, LangfuseError>;

    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<TransportResponse, LangfuseError>;

    /// Fetch raw bytes from an absolute URL (a presigned download URL, not a
    /// `base_url`-relative API path). Used to pull media content back down
    /// during reference-to-bytes resolution; unlike [`Self::get`] this does
    /// not attach SDK auth headers, matching the teacher's treatment of
    /// presigned URLs as pre-authorized.
    async fn get_bytes(&self, url: &str) -> Result<(Option<String>, Vec<u8>), LangfuseError>;
}

/// A [`Transport`] backed by [`reqwest`], authenticating every request to
/// `base_url` with HTTP basic auth and the SDK identification headers.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    public_key: String,
    secret_key: String,
    sdk_integration: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, public_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            public_key: public_key.into(),
            secret_key: secret_key.into(),
            sdk_integration: "DEFAULT".to_string(),
        }
    }

    /// Override the `X-Langfuse-Sdk-Integration` tag sent on every request
    /// (default `"DEFAULT"`; see `sdkIntegration` in the configuration).
    #[must_use]
    pub fn with_sdk_integration(mut self, v: impl Into<String>) -> Self {
        self.sdk_integration = v.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// `Authorization` is `Bearer <publicKey>` when no secret key is
    /// configured, else HTTP basic auth with both keys (§6).
    fn decorate(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = if self.secret_key.is_empty() {
            builder.bearer_auth(&self.public_key)
        } else {
            builder.basic_auth(&self.public_key, Some(&self.secret_key))
        };
        builder
            .header("x-langfuse-sdk-name", SDK_NAME)
            .header("x-langfuse-sdk-version", SDK_VERSION)
            .header("x-langfuse-sdk-variant", SDK_VARIANT)
            .header("x-langfuse-sdk-integration", &self.sdk_integration)
            .header("x-langfuse-public-key", &self.public_key)
    }

    async fn into_response(response: reqwest::Response) -> Result<TransportResponse, LangfuseError> {
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| LangfuseError::fetch_network("failed to read response body").with_source(e))?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        // HTTP 207 (multi-status) is handed back as `Ok` even though it
        // falls outside the 2xx range: whether it counts as success depends
        // on the response body's `errors` array, which only the caller (the
        // flusher, for the ingestion endpoint) knows how to interpret.
        if !(200..300).contains(&status) && status != 207 {
            let text = serde_json::to_string(&body).unwrap_or_default();
            return Err(LangfuseError::fetch_http(status, text));
        }
        Ok(TransportResponse { status, body })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_json(&self, path: &str, body: &Value) -> Result<TransportResponse, LangfuseError> {
        let response = self
            .decorate(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await
            .map_err(|e| LangfuseError::fetch_network("POST request failed").with_source(e))?;
        Self::into_response(response).await
    }

    async fn post_bytes(
        &self,
        url: &str,
        content_type: &str,
        bytes: Vec<u8>,
        extra_headers: &[(String, String)],
    ) -> Result<TransportResponse, LangfuseError> {
        let mut builder = self
            .decorate(self.client.post(url))
            .header("content-type", content_type)
            .body(bytes);
        for (k, v) in extra_headers {
            builder = builder.header(k, v);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| LangfuseError::fetch_network("POST request failed").with_source(e))?;
        Self::into_response(response).await
    }

    async fn put_bytes(
        &self,
        url: &str,
        content_type: &str,
        bytes: Vec<u8>,
        extra_headers: &[(String, String)],
    ) -> Result<TransportResponse, LangfuseError> {
        let mut builder = self.client.put(url).header("content-type", content_type).body(bytes);
        for (k, v) in extra_headers {
            builder = builder.header(k, v);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| LangfuseError::fetch_network("PUT request failed").with_source(e))?;
        Self::into_response(response).await
    }

    async fn patch_json(&self, path: &str, body: &Value) -> Result<TransportResponse, LangfuseError> {
        let response = self
            .decorate(self.client.patch(self.url(path)))
            .json(body)
            .send()
            .await
            .map_err(|e| LangfuseError::fetch_network("PATCH request failed").with_source(e))?;
        Self::into_response(response).await
    }

    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<TransportResponse, LangfuseError> {
        let response = self
            .decorate(self.client.get(self.url(path)))
            .query(query)
            .send()
            .await
            .map_err(|e| LangfuseError::fetch_network("GET request failed").with_source(e))?;
        Self::into_response(response).await
    }

    async fn get_bytes(&self, url: &str) -> Result<(Option<String>, Vec<u8>), LangfuseError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LangfuseError::fetch_network("GET request failed").with_source(e))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| LangfuseError::fetch_network("failed to read response body").with_source(e))?;
        if !(200..300).contains(&status) {
            return Err(LangfuseError::fetch_http(status, String::new()));
        }
        Ok((content_type, bytes.to_vec()))
    }
}

/// Whether a [`LangfuseError`] produced by this crate is worth retrying:
/// network failures and 5xx/429 responses are, 4xx other than 429 are not.
pub fn is_retryable(err: &LangfuseError) -> bool {
    if err.kind == ErrorKind::FetchNetwork {
        return true;
    }
    if err.kind == ErrorKind::FetchHttp {
        if let Some(status) = err.context.get("status").and_then(Value::as_u64) {
            return status == 429 || status >= 500;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // ── release detection ───────────────────────────────────────────────

    #[test]
    fn release_env_vars_are_checked_in_priority_order() {
        assert_eq!(RELEASE_ENV_VARS[0], "LANGFUSE_RELEASE");
        assert_eq!(RELEASE_ENV_VARS.last(), Some(&"NETLIFY_COMMIT_REF"));
    }

    // ── retryability classification ─────────────────────────────────────

    #[test]
    fn network_errors_are_retryable() {
        assert!(is_retryable(&LangfuseError::fetch_network("boom")));
    }

    #[test]
    fn server_and_rate_limit_errors_are_retryable() {
        assert!(is_retryable(&LangfuseError::fetch_http(500, "")));
        assert!(is_retryable(&LangfuseError::fetch_http(429, "")));
    }

    #[test]
    fn client_errors_other_than_429_are_not_retryable() {
        assert!(!is_retryable(&LangfuseError::fetch_http(400, "")));
        assert!(!is_retryable(&LangfuseError::fetch_http(401, "")));
    }

    #[test]
    fn config_errors_are_not_retryable() {
        assert!(!is_retryable(&LangfuseError::config("missing key")));
    }

    // ── transport against a stubbed server ──────────────────────────────

    #[tokio::test]
    async fn post_json_success_parses_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/public/ingestion"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;
        let transport = ReqwestTransport::new(server.uri(), "pk", "sk");
        let response = transport
            .post_json("/api/public/ingestion", &json!({"batch": []}))
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn post_json_error_status_becomes_fetch_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/public/ingestion"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let transport = ReqwestTransport::new(server.uri(), "pk", "sk");
        let err = transport
            .post_json("/api/public/ingestion", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::FetchHttp);
        assert!(is_retryable(&err));
    }

    #[tokio::test]
    async fn get_sends_basic_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/public/v2/traces"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;
        let transport = ReqwestTransport::new(server.uri(), "pk", "sk");
        let response = transport.get("/api/public/v2/traces", &[]).await.unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn empty_secret_key_uses_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/public/v2/traces"))
            .and(wiremock::matchers::header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;
        let transport = ReqwestTransport::new(server.uri(), "pk", "");
        let response = transport.get("/api/public/v2/traces", &[]).await.unwrap();
        assert!(response.is_success());
    }
}
