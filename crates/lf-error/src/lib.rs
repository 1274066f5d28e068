// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy for the Langfuse Rust SDK.
//!
//! Every error surfaced anywhere in this workspace carries an [`ErrorKind`]
//! (a stable, machine-readable tag), a human-readable message, an optional
//! cause chain, and arbitrary key-value context. Construct one with
//! [`LangfuseError::new`] and the fluent builder methods.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// The broad family an error belongs to, per §7 of the SDK specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The HTTP response carried a non-retryable or exhausted-retry status.
    FetchHttp,
    /// A network-level failure (connection refused, timeout, DNS, …).
    FetchNetwork,
    /// The event body could not be serialized to JSON.
    Serialization,
    /// A configured `mask` callable failed or panicked.
    Mask,
    /// Media discovery or upload failed for one leaf value.
    Media,
    /// A configuration value was missing, invalid, or mutually exclusive.
    Config,
    /// The backend returned a decoded API error payload.
    Api,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FetchHttp => "fetch_http",
            Self::FetchNetwork => "fetch_network",
            Self::Serialization => "serialization",
            Self::Mask => "mask",
            Self::Media => "media",
            Self::Config => "config",
            Self::Api => "api",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl ErrorKind {
    /// Whether an error of this kind is, by its nature, worth retrying.
    ///
    /// This is a default used by callers that don't have a more specific
    /// retry predicate; [`lf-retry`](https://docs.rs/lf-retry)'s combinator
    /// takes an explicit predicate and does not consult this method
    /// directly, but it documents the same classification.
    #[must_use]
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(self, Self::FetchHttp | Self::FetchNetwork)
    }
}

// ---------------------------------------------------------------------------
// LangfuseError
// ---------------------------------------------------------------------------

/// The unified error type returned from fallible operations in this SDK.
///
/// Most telemetry calls (`trace`, `span`, `generation`, `event`, `score`)
/// never return this type — failures there are routed to the
/// `EmittedEvent::Error` channel instead (see §7 of the spec). This type is
/// reserved for the narrow set of calls that are allowed to surface errors:
/// prompt reads without a fallback, explicit read endpoints, and
/// configuration-time programmer errors.
#[derive(Debug, thiserror::Error)]
#[error("{}", self.display_message())]
pub struct LangfuseError {
    /// Stable, machine-readable error kind.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl LangfuseError {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialization
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Whether this error, by its kind, is worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable_by_default()
    }

    fn display_message(&self) -> String {
        if self.context.is_empty() {
            format!("[{}] {}", self.kind, self.message)
        } else {
            let ctx = serde_json::to_string(&self.context).unwrap_or_default();
            format!("[{}] {} {ctx}", self.kind, self.message)
        }
    }
}

/// Convenience constructors mirroring the taxonomy in §7.
impl LangfuseError {
    /// A non-retryable or retry-exhausted HTTP response.
    pub fn fetch_http(status: u16, body: impl Into<String>) -> Self {
        Self::new(ErrorKind::FetchHttp, body.into()).with_context("status", status)
    }

    /// A network-level failure.
    pub fn fetch_network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FetchNetwork, message.into())
    }

    /// A JSON serialization failure.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message.into())
    }

    /// A configuration error (missing/invalid/mutually-exclusive values).
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message.into())
    }

    /// A decoded API error payload from the backend.
    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Api, message.into())
    }
}

impl From<tokio::time::error::Elapsed> for LangfuseError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::fetch_network("request timed out")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn basic_construction() {
        let err = LangfuseError::new(ErrorKind::Internal, "boom");
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = LangfuseError::new(ErrorKind::FetchHttp, "bad status");
        assert_eq!(err.to_string(), "[fetch_http] bad status");
    }

    #[test]
    fn display_with_context() {
        let err = LangfuseError::fetch_http(400, "bad request");
        let s = err.to_string();
        assert!(s.starts_with("[fetch_http] bad request"));
        assert!(s.contains("400"));
    }

    #[test]
    fn with_source_preserved_in_std_error_chain() {
        let inner = io::Error::new(io::ErrorKind::TimedOut, "timed out");
        let err = LangfuseError::fetch_network("request failed").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "timed out");
    }

    #[test]
    fn is_retryable_http_and_network() {
        assert!(LangfuseError::fetch_http(500, "x").is_retryable());
        assert!(LangfuseError::fetch_network("x").is_retryable());
        assert!(!LangfuseError::config("x").is_retryable());
        assert!(!LangfuseError::serialization("x").is_retryable());
    }

    #[test]
    fn error_kind_serde_roundtrip() {
        let kind = ErrorKind::FetchHttp;
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, r#""FETCH_HTTP""#);
        let back: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn context_builder_multiple_keys() {
        let err = LangfuseError::new(ErrorKind::Media, "upload failed")
            .with_context("trace_id", "t1")
            .with_context("field", "input");
        assert_eq!(err.context.len(), 2);
        assert_eq!(err.context["trace_id"], serde_json::json!("t1"));
        assert_eq!(err.context["field"], serde_json::json!("input"));
    }

    #[test]
    fn api_constructor() {
        let err = LangfuseError::api("not found");
        assert_eq!(err.kind, ErrorKind::Api);
        assert!(!err.is_retryable());
    }
}
