// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trace/span/generation/event/score creation: the telemetry calls that,
//! per §7's propagation policy, never return a `Result` — failures route to
//! the [`EventBus`](lf_core::EventBus) instead.

use crate::Langfuse;
use chrono::{DateTime, Utc};
use lf_core::{
    EventBody, GenerationBody, ObservationBody, ObservationLevel, Prompt, ScoreBody, ScoreValue,
    TraceBody, Usage,
};
use serde_json::Value;
use uuid::Uuid;

fn next_id() -> String {
    Uuid::new_v4().to_string()
}

/// Arguments for [`Langfuse::trace`].
#[derive(Debug, Clone, Default)]
pub struct TraceParams {
    /// Caller-supplied id; a fresh UUID is generated when absent.
    pub id: Option<String>,
    pub name: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub version: Option<String>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub metadata: Option<Value>,
    pub tags: Option<Vec<String>>,
    pub public: Option<bool>,
}

/// Arguments shared by [`Langfuse::event`], [`Langfuse::span`],
/// [`Langfuse::span_update`], and the common fields of
/// [`GenerationParams`].
#[derive(Debug, Clone, Default)]
pub struct ObservationParams {
    /// Caller-supplied id; a fresh UUID is generated when absent. For an
    /// update call this should be the id of the observation being updated.
    pub id: Option<String>,
    /// The trace this observation belongs to. Absent means the façade
    /// auto-creates one (invariant E1).
    pub trace_id: Option<String>,
    pub parent_observation_id: Option<String>,
    pub name: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub level: Option<ObservationLevel>,
    pub status_message: Option<String>,
    pub version: Option<String>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub metadata: Option<Value>,
}

/// Arguments for [`Langfuse::generation`] and [`Langfuse::generation_update`].
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    pub common: ObservationParams,
    pub completion_start_time: Option<DateTime<Utc>>,
    pub model: Option<String>,
    pub model_parameters: Option<Value>,
    pub usage: Option<Usage>,
    /// The prompt this generation was produced from, if any. A fallback
    /// prompt (`is_fallback == true`) never produces a prompt linkage
    /// (invariant E2); a looked-up prompt does.
    pub prompt: Option<Prompt>,
}

/// Arguments for [`Langfuse::score`].
#[derive(Debug, Clone)]
pub struct ScoreParams {
    pub id: Option<String>,
    pub trace_id: Option<String>,
    pub observation_id: Option<String>,
    pub name: String,
    pub value: ScoreValue,
    pub comment: Option<String>,
}

impl Langfuse {
    /// Create a trace. Returns the trace's id (the caller's, if supplied).
    pub async fn trace(&self, params: TraceParams) -> String {
        let id = params.id.unwrap_or_else(next_id);
        if !self.config.enabled {
            return id;
        }
        let body = EventBody::TraceCreate(TraceBody {
            id: id.clone(),
            name: params.name,
            user_id: params.user_id,
            session_id: params.session_id,
            release: self.config.release.clone(),
            version: params.version,
            input: params.input,
            output: params.output,
            metadata: params.metadata,
            tags: params.tags,
            public: params.public,
            timestamp: None,
        });
        self.processor.process(body).await;
        id
    }

    /// Record a standalone event under a trace. Returns the event's id.
    pub async fn event(&self, params: ObservationParams) -> String {
        let (id, body) = self.build_observation(params);
        if !self.config.enabled {
            return id;
        }
        self.processor.process(EventBody::EventCreate(body)).await;
        id
    }

    /// Start a span. Returns the span's id.
    pub async fn span(&self, params: ObservationParams) -> String {
        let (id, body) = self.build_observation(params);
        if !self.config.enabled {
            return id;
        }
        self.processor.process(EventBody::SpanCreate(body)).await;
        id
    }

    /// Update a previously created span; `params.id` should name the span
    /// being updated.
    pub async fn span_update(&self, params: ObservationParams) {
        let (_, body) = self.build_observation(params);
        if !self.config.enabled {
            return;
        }
        self.processor.process(EventBody::SpanUpdate(body)).await;
    }

    /// Start a generation. Returns the generation's id.
    pub async fn generation(&self, params: GenerationParams) -> String {
        let (id, common) = self.build_observation(params.common.clone());
        if !self.config.enabled {
            return id;
        }
        let body = build_generation_body(common, params);
        self.processor.process(EventBody::GenerationCreate(body)).await;
        id
    }

    /// Update a previously created generation; `params.common.id` should
    /// name the generation being updated.
    pub async fn generation_update(&self, params: GenerationParams) {
        let (_, common) = self.build_observation(params.common.clone());
        if !self.config.enabled {
            return;
        }
        let body = build_generation_body(common, params);
        self.processor.process(EventBody::GenerationUpdate(body)).await;
    }

    /// Attach a score to a trace and/or observation. Returns the score's id.
    pub async fn score(&self, params: ScoreParams) -> String {
        let id = params.id.unwrap_or_else(next_id);
        if !self.config.enabled {
            return id;
        }
        let trace_id = Some(params.trace_id.unwrap_or_else(next_id));
        let body = EventBody::ScoreCreate(ScoreBody {
            id: id.clone(),
            trace_id,
            observation_id: params.observation_id,
            name: params.name,
            value: params.value,
            comment: params.comment,
        });
        self.processor.process(body).await;
        id
    }

    fn build_observation(&self, params: ObservationParams) -> (String, ObservationBody) {
        let id = params.id.unwrap_or_else(next_id);
        let trace_id = params.trace_id.unwrap_or_else(next_id);
        let body = ObservationBody {
            id: id.clone(),
            trace_id: Some(trace_id),
            parent_observation_id: params.parent_observation_id,
            name: params.name,
            start_time: params.start_time,
            end_time: params.end_time,
            level: params.level,
            status_message: params.status_message,
            version: params.version,
            input: params.input,
            output: params.output,
            metadata: params.metadata,
        };
        (id, body)
    }
}

/// Fold the generation-specific fields onto an already-built
/// [`ObservationBody`], applying invariant E2 to the prompt linkage.
fn build_generation_body(common: ObservationBody, params: GenerationParams) -> GenerationBody {
    let (prompt_name, prompt_version) = match &params.prompt {
        Some(prompt) if !prompt.is_fallback => (Some(prompt.name.clone()), Some(prompt.version)),
        _ => (None, None),
    };
    GenerationBody {
        common,
        completion_start_time: params.completion_start_time,
        model: params.model,
        model_parameters: params.model_parameters,
        usage: params.usage,
        prompt_name,
        prompt_version,
    }
}
