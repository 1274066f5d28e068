//! The event envelope and per-kind event bodies that flow through the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The discriminant carried on the wire as `"type"`.
///
/// Variants serialize in kebab-case to match the ingestion endpoint's
/// vocabulary (`"trace-create"`, `"generation-update"`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    TraceCreate,
    EventCreate,
    SpanCreate,
    SpanUpdate,
    GenerationCreate,
    GenerationUpdate,
    ScoreCreate,
}

/// Severity recorded against an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObservationLevel {
    Debug,
    Default,
    Warning,
    Error,
}

/// Token/cost accounting attached to a generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Body of a `trace-create` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceBody {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Fields common to `event-create`, `span-create` and `span-update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationBody {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_observation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<ObservationLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Body of `generation-create` and `generation-update`: an [`ObservationBody`]
/// plus the model/usage/prompt-linkage fields unique to generations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationBody {
    #[serde(flatten)]
    pub common: ObservationBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Set only when the generation was created against a non-fallback
    /// prompt (invariant E2: fallback prompts never produce a linkage).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_version: Option<u32>,
}

/// The value carried by a score; exactly one shape per `data_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreValue {
    Numeric(f64),
    Categorical(String),
    Boolean(bool),
}

/// Body of a `score-create` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBody {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_id: Option<String>,
    pub name: String,
    pub value: ScoreValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// The per-kind payload of an [`Event`].
///
/// Serializes untagged: the envelope's `"type"` field is the only
/// discriminant on the wire, so each variant serializes as its inner
/// struct's own fields with nothing wrapped around them.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventBody {
    TraceCreate(TraceBody),
    EventCreate(ObservationBody),
    SpanCreate(ObservationBody),
    SpanUpdate(ObservationBody),
    GenerationCreate(GenerationBody),
    GenerationUpdate(GenerationBody),
    ScoreCreate(ScoreBody),
}

impl EventBody {
    /// The kind this body pairs with when enqueued.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TraceCreate(_) => EventKind::TraceCreate,
            Self::EventCreate(_) => EventKind::EventCreate,
            Self::SpanCreate(_) => EventKind::SpanCreate,
            Self::SpanUpdate(_) => EventKind::SpanUpdate,
            Self::GenerationCreate(_) => EventKind::GenerationCreate,
            Self::GenerationUpdate(_) => EventKind::GenerationUpdate,
            Self::ScoreCreate(_) => EventKind::ScoreCreate,
        }
    }

    /// The id of the entity this event creates or updates (invariant E1:
    /// every body carries exactly one target id).
    pub fn target_id(&self) -> &str {
        match self {
            Self::TraceCreate(b) => &b.id,
            Self::EventCreate(b) | Self::SpanCreate(b) | Self::SpanUpdate(b) => &b.id,
            Self::GenerationCreate(b) | Self::GenerationUpdate(b) => &b.common.id,
            Self::ScoreCreate(b) => &b.id,
        }
    }

    /// The trace this event belongs to, if any (traces have no parent trace).
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::TraceCreate(_) => None,
            Self::EventCreate(b) | Self::SpanCreate(b) | Self::SpanUpdate(b) => {
                b.trace_id.as_deref()
            }
            Self::GenerationCreate(b) | Self::GenerationUpdate(b) => {
                b.common.trace_id.as_deref()
            }
            Self::ScoreCreate(b) => b.trace_id.as_deref(),
        }
    }

    /// The trace id to attribute a media upload to: `traceId` when present,
    /// else this body's own id when the event kind names a trace (§4.2 step
    /// 2). `None` means media extraction should be skipped entirely.
    pub fn media_trace_id(&self) -> Option<&str> {
        match self {
            Self::TraceCreate(b) => Some(&b.id),
            other => other.trace_id(),
        }
    }

    /// The observation this event targets, for the media-registration
    /// request's optional `observationId` field (§4.4 step 1). `None` for a
    /// trace, since a trace is not an observation.
    pub fn observation_id(&self) -> Option<&str> {
        match self {
            Self::TraceCreate(_) => None,
            other => Some(other.target_id()),
        }
    }

    /// Backfill the trace id, e.g. when an observation was created under an
    /// implicit trace whose id is only known once the trace itself is built.
    pub fn set_trace_id(&mut self, trace_id: String) {
        match self {
            Self::TraceCreate(_) => {}
            Self::EventCreate(b) | Self::SpanCreate(b) | Self::SpanUpdate(b) => {
                b.trace_id = Some(trace_id);
            }
            Self::GenerationCreate(b) | Self::GenerationUpdate(b) => {
                b.common.trace_id = Some(trace_id);
            }
            Self::ScoreCreate(b) => b.trace_id = Some(trace_id),
        }
    }

    /// Immutable access to the `input` field, for the kinds that carry one.
    pub fn input(&self) -> Option<&Value> {
        match self {
            Self::TraceCreate(b) => b.input.as_ref(),
            Self::EventCreate(b) | Self::SpanCreate(b) | Self::SpanUpdate(b) => b.input.as_ref(),
            Self::GenerationCreate(b) | Self::GenerationUpdate(b) => b.common.input.as_ref(),
            Self::ScoreCreate(_) => None,
        }
    }

    /// Mutable access to the `input` field, used by masking and truncation.
    pub fn input_mut(&mut self) -> Option<&mut Value> {
        match self {
            Self::TraceCreate(b) => b.input.as_mut(),
            Self::EventCreate(b) | Self::SpanCreate(b) | Self::SpanUpdate(b) => b.input.as_mut(),
            Self::GenerationCreate(b) | Self::GenerationUpdate(b) => b.common.input.as_mut(),
            Self::ScoreCreate(_) => None,
        }
    }

    /// Immutable access to the `output` field, for the kinds that carry one.
    pub fn output(&self) -> Option<&Value> {
        match self {
            Self::TraceCreate(b) => b.output.as_ref(),
            Self::EventCreate(b) | Self::SpanCreate(b) | Self::SpanUpdate(b) => b.output.as_ref(),
            Self::GenerationCreate(b) | Self::GenerationUpdate(b) => b.common.output.as_ref(),
            Self::ScoreCreate(_) => None,
        }
    }

    /// Mutable access to the `output` field, used by masking and truncation.
    pub fn output_mut(&mut self) -> Option<&mut Value> {
        match self {
            Self::TraceCreate(b) => b.output.as_mut(),
            Self::EventCreate(b) | Self::SpanCreate(b) | Self::SpanUpdate(b) => b.output.as_mut(),
            Self::GenerationCreate(b) | Self::GenerationUpdate(b) => b.common.output.as_mut(),
            Self::ScoreCreate(_) => None,
        }
    }

    /// Immutable access to the `metadata` field, for the kinds that carry one.
    pub fn metadata(&self) -> Option<&Value> {
        match self {
            Self::TraceCreate(b) => b.metadata.as_ref(),
            Self::EventCreate(b) | Self::SpanCreate(b) | Self::SpanUpdate(b) => b.metadata.as_ref(),
            Self::GenerationCreate(b) | Self::GenerationUpdate(b) => b.common.metadata.as_ref(),
            Self::ScoreCreate(_) => None,
        }
    }

    /// Mutable access to the `metadata` field, used by masking and truncation.
    pub fn metadata_mut(&mut self) -> Option<&mut Value> {
        match self {
            Self::TraceCreate(b) => b.metadata.as_mut(),
            Self::EventCreate(b) | Self::SpanCreate(b) | Self::SpanUpdate(b) => {
                b.metadata.as_mut()
            }
            Self::GenerationCreate(b) | Self::GenerationUpdate(b) => b.common.metadata.as_mut(),
            Self::ScoreCreate(_) => None,
        }
    }
}

/// The envelope every event takes on its way into the queue and onto the wire.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub body: EventBody,
}

impl Event {
    /// Wrap a body, stamping a fresh id and the current time.
    pub fn new(body: EventBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            body,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }
}

impl Serialize for Event {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("type", &self.kind())?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.serialize_entry("body", &self.body)?;
        map.end()
    }
}

/// Wire shape used only to deserialize an [`Event`] back out of persisted
/// storage. `body` stays a raw [`Value`] until `type` tells us which typed
/// body struct to parse it into.
#[derive(Deserialize)]
struct RawEvent {
    id: Uuid,
    #[serde(rename = "type")]
    kind: EventKind,
    timestamp: DateTime<Utc>,
    body: Value,
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawEvent::deserialize(deserializer)?;
        let body = match raw.kind {
            EventKind::TraceCreate => EventBody::TraceCreate(
                serde_json::from_value(raw.body).map_err(serde::de::Error::custom)?,
            ),
            EventKind::EventCreate => EventBody::EventCreate(
                serde_json::from_value(raw.body).map_err(serde::de::Error::custom)?,
            ),
            EventKind::SpanCreate => EventBody::SpanCreate(
                serde_json::from_value(raw.body).map_err(serde::de::Error::custom)?,
            ),
            EventKind::SpanUpdate => EventBody::SpanUpdate(
                serde_json::from_value(raw.body).map_err(serde::de::Error::custom)?,
            ),
            EventKind::GenerationCreate => EventBody::GenerationCreate(
                serde_json::from_value(raw.body).map_err(serde::de::Error::custom)?,
            ),
            EventKind::GenerationUpdate => EventBody::GenerationUpdate(
                serde_json::from_value(raw.body).map_err(serde::de::Error::custom)?,
            ),
            EventKind::ScoreCreate => EventBody::ScoreCreate(
                serde_json::from_value(raw.body).map_err(serde::de::Error::custom)?,
            ),
        };
        Ok(Event { id: raw.id, timestamp: raw.timestamp, body })
    }
}
