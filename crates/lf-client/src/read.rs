// SPDX-License-Identifier: MIT OR Apache-2.0
//! Thin `GET`/`POST` wrappers over the trace, observation, session, and
//! dataset read endpoints. These are explicit read operations, not
//! telemetry calls, so unlike `trace`/`span`/... they return a `Result`
//! (§7) instead of routing failures to the event bus.

use crate::Langfuse;
use chrono::{DateTime, Utc};
use lf_error::LangfuseError;
use serde_json::Value;

/// Query parameters shared by the list endpoints. `DateTime<Utc>` values are
/// encoded as ISO-8601 UTC strings, matching what the backend expects.
#[derive(Debug, Clone, Default)]
pub struct ReadQuery {
    params: Vec<(String, String)>,
}

impl ReadQuery {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.params.push(("page".to_string(), page.to_string()));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.params.push(("limit".to_string(), limit.to_string()));
        self
    }

    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.params.push(("userId".to_string(), user_id.into()));
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.params.push(("name".to_string(), name.into()));
        self
    }

    #[must_use]
    pub fn from_timestamp(mut self, from: DateTime<Utc>) -> Self {
        self.params.push(("fromTimestamp".to_string(), from.to_rfc3339()));
        self
    }

    #[must_use]
    pub fn to_timestamp(mut self, to: DateTime<Utc>) -> Self {
        self.params.push(("toTimestamp".to_string(), to.to_rfc3339()));
        self
    }

    fn into_pairs(self) -> Vec<(String, String)> {
        self.params
    }
}

impl Langfuse {
    /// `GET /api/public/traces/<id>`.
    pub async fn fetch_trace(&self, id: &str) -> Result<Value, LangfuseError> {
        self.get(&format!("/api/public/traces/{id}"), ReadQuery::new()).await
    }

    /// `GET /api/public/traces`.
    pub async fn fetch_traces(&self, query: ReadQuery) -> Result<Value, LangfuseError> {
        self.get("/api/public/traces", query).await
    }

    /// `GET /api/public/observations/<id>`.
    pub async fn fetch_observation(&self, id: &str) -> Result<Value, LangfuseError> {
        self.get(&format!("/api/public/observations/{id}"), ReadQuery::new()).await
    }

    /// `GET /api/public/observations`.
    pub async fn fetch_observations(&self, query: ReadQuery) -> Result<Value, LangfuseError> {
        self.get("/api/public/observations", query).await
    }

    /// `GET /api/public/sessions/<id>`.
    pub async fn fetch_session(&self, id: &str) -> Result<Value, LangfuseError> {
        self.get(&format!("/api/public/sessions/{id}"), ReadQuery::new()).await
    }

    /// `GET /api/public/sessions`.
    pub async fn fetch_sessions(&self, query: ReadQuery) -> Result<Value, LangfuseError> {
        self.get("/api/public/sessions", query).await
    }

    /// `GET /api/public/datasets/<name>`.
    pub async fn fetch_dataset(&self, name: &str) -> Result<Value, LangfuseError> {
        self.get(&format!("/api/public/datasets/{name}"), ReadQuery::new()).await
    }

    /// `GET /api/public/datasets`.
    pub async fn fetch_datasets(&self, query: ReadQuery) -> Result<Value, LangfuseError> {
        self.get("/api/public/datasets", query).await
    }

    /// `POST /api/public/datasets`.
    pub async fn create_dataset(&self, body: Value) -> Result<Value, LangfuseError> {
        let response = self.transport.post_json("/api/public/datasets", &body).await?;
        Ok(response.body)
    }

    /// `GET /api/public/dataset-items`.
    pub async fn fetch_dataset_items(&self, query: ReadQuery) -> Result<Value, LangfuseError> {
        self.get("/api/public/dataset-items", query).await
    }

    /// `POST /api/public/dataset-items`.
    pub async fn create_dataset_item(&self, body: Value) -> Result<Value, LangfuseError> {
        let response = self.transport.post_json("/api/public/dataset-items", &body).await?;
        Ok(response.body)
    }

    /// `GET /api/public/dataset-runs/<dataset_name>/<run_name>`.
    pub async fn fetch_dataset_run(&self, dataset_name: &str, run_name: &str) -> Result<Value, LangfuseError> {
        self.get(&format!("/api/public/dataset-runs/{dataset_name}/{run_name}"), ReadQuery::new()).await
    }

    /// `GET /api/public/dataset-runs/<dataset_name>`.
    pub async fn fetch_dataset_runs(&self, dataset_name: &str, query: ReadQuery) -> Result<Value, LangfuseError> {
        self.get(&format!("/api/public/dataset-runs/{dataset_name}"), query).await
    }

    async fn get(&self, path: &str, query: ReadQuery) -> Result<Value, LangfuseError> {
        let response = self.transport.get(path, &query.into_pairs()).await?;
        Ok(response.body)
    }

    /// Resolve every `@@@langfuseMedia:...@@@` reference found in `value`
    /// back into an inline base64 data URI, mutating it in place. Intended
    /// for callers inspecting a trace/observation fetched via the read
    /// endpoints above, whose `input`/`output`/`metadata` may still carry
    /// the compact reference form produced during ingestion (§4.4).
    pub async fn resolve_media_references(&self, value: &mut Value) {
        lf_media::resolve_references(self.transport.as_ref(), &self.bus, value).await;
    }
}
