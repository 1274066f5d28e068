// SPDX-License-Identifier: MIT OR Apache-2.0
//! `get_prompt`/`create_prompt`: the one telemetry-adjacent pair of calls
//! that *is* allowed to return a `Result` (§7) — except `get_prompt` itself
//! swallows the error and synthesizes a fallback when the caller supplied
//! one.

use crate::Langfuse;
use lf_core::{ChatItem, Prompt, PromptBody};
use lf_error::LangfuseError;
use lf_prompt_cache::GetPromptOptions;
use serde_json::Value;

/// A prompt to create or update via [`Langfuse::create_prompt`].
#[derive(Debug, Clone)]
pub struct NewPromptRequest {
    pub name: String,
    pub body: PromptBody,
    pub labels: Vec<String>,
    pub tags: Vec<String>,
    pub config: Value,
    pub commit_message: Option<String>,
}

impl NewPromptRequest {
    /// A single-string text prompt.
    pub fn text(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: PromptBody::Text { prompt: prompt.into() },
            labels: Vec::new(),
            tags: Vec::new(),
            config: Value::Object(Default::default()),
            commit_message: None,
        }
    }

    /// A chat prompt: a sequence of messages and/or named placeholders.
    pub fn chat(name: impl Into<String>, chat_prompt: Vec<ChatItem>) -> Self {
        Self {
            name: name.into(),
            body: PromptBody::Chat { prompt: chat_prompt },
            labels: Vec::new(),
            tags: Vec::new(),
            config: Value::Object(Default::default()),
            commit_message: None,
        }
    }

    #[must_use]
    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn commit_message(mut self, message: impl Into<String>) -> Self {
        self.commit_message = Some(message.into());
        self
    }
}

impl Langfuse {
    /// Fetch a prompt by name, optionally pinned to a `version` or a
    /// `label` (mutually exclusive — passing both is a configuration-time
    /// error). Serves the prompt cache's stale-while-revalidate TTL.
    ///
    /// When `fallback` is supplied, any fetch error (including the
    /// version/label conflict) is swallowed and a fallback [`Prompt`] is
    /// returned instead, with `is_fallback` set so generations compiled
    /// from it never carry a prompt linkage (invariant E2). Without a
    /// fallback, the error propagates.
    ///
    /// `options` carries the per-call cache overrides from §4.5's contract
    /// (`cacheTtlSeconds`, `maxRetries`, `fetchTimeoutMs`); pass
    /// `GetPromptOptions::default()` to use the client-wide defaults.
    pub async fn get_prompt(
        &self,
        name: &str,
        version: Option<u32>,
        label: Option<&str>,
        fallback: Option<PromptBody>,
        options: GetPromptOptions,
    ) -> Result<Prompt, LangfuseError> {
        match self.prompt_cache.get_with_options(name, version, label, options).await {
            Ok(prompt) => Ok(prompt),
            Err(err) => match fallback {
                Some(body) => Ok(Prompt {
                    name: name.to_string(),
                    version: version.unwrap_or_default(),
                    config: Value::Object(Default::default()),
                    labels: Vec::new(),
                    tags: Vec::new(),
                    is_fallback: true,
                    commit_message: None,
                    body,
                }),
                None => Err(err),
            },
        }
    }

    /// Create (or add a new version of) a prompt.
    pub async fn create_prompt(&self, request: NewPromptRequest) -> Result<Prompt, LangfuseError> {
        let mut payload = serde_json::json!({
            "name": request.name,
            "labels": request.labels,
            "tags": request.tags,
            "config": request.config,
        });
        merge_body(&mut payload, &request.body)?;
        if let Some(message) = &request.commit_message {
            payload["commitMessage"] = Value::String(message.clone());
        }

        let response = self.transport.post_json("/api/public/v2/prompts", &payload).await?;
        serde_json::from_value(response.body)
            .map_err(|e| LangfuseError::serialization("malformed prompt response").with_source(e))
    }
}

fn merge_body(payload: &mut Value, body: &PromptBody) -> Result<(), LangfuseError> {
    let encoded = serde_json::to_value(body)
        .map_err(|e| LangfuseError::serialization("failed to encode prompt body").with_source(e))?;
    let Value::Object(fields) = encoded else {
        return Err(LangfuseError::serialization("prompt body did not encode as an object"));
    };
    let Value::Object(target) = payload else {
        unreachable!("payload is always constructed as an object");
    };
    target.extend(fields);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Langfuse;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_over(server: &MockServer) -> Langfuse {
        let (client, _) = Langfuse::builder()
            .public_key("pk")
            .secret_key("sk")
            .base_url(server.uri())
            .build()
            .unwrap();
        client
    }

    #[tokio::test]
    async fn missing_prompt_without_fallback_propagates_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/public/v2/prompts/greeting"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let client = client_over(&server).await;
        let result = client.get_prompt("greeting", None, None, None, GetPromptOptions::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_prompt_with_fallback_synthesizes_is_fallback_true() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/public/v2/prompts/greeting"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let client = client_over(&server).await;
        let fallback = PromptBody::Text { prompt: "hi {{name}}".into() };
        let prompt = client
            .get_prompt("greeting", None, None, Some(fallback), GetPromptOptions::default())
            .await
            .expect("fallback should be returned instead of erroring");
        assert!(prompt.is_fallback);
        assert_eq!(prompt.name, "greeting");
    }

    #[tokio::test]
    async fn create_prompt_round_trips_through_the_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/public/v2/prompts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "greeting",
                "version": 1,
                "config": {},
                "labels": [],
                "tags": [],
                "type": "text",
                "prompt": "hi {{name}}",
            })))
            .mount(&server)
            .await;
        let client = client_over(&server).await;
        let prompt = client
            .create_prompt(NewPromptRequest::text("greeting", "hi {{name}}"))
            .await
            .unwrap();
        assert_eq!(prompt.name, "greeting");
        assert!(!prompt.is_fallback);
    }
}
