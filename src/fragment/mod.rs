//! Raw trace fragments and their classification
//!
//! A fragment is one record from the agent runtime's trace stream. It may
//! arrive bare (`{"orchestrationTrace": {...}}`) or wrapped in the runtime's
//! event envelope, which adds agent identity, session, timing, and the caller
//! chain used to place sub-agent fragments in the tree.
//!
//! # Key Types
//!
//! - [`RawFragment`] - a record as received, envelope plus trace body
//! - [`EventType`] / [`ChunkType`] - the two-level classification
//! - [`ClassifiedFragment`] - the output of [`classify`]

mod classify;

pub use classify::classify;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::utils::json::{non_empty_str, str_field};
use crate::utils::time::TimeValue;
use crate::{Result, TraceError};

/// Phase of the agent run a fragment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    PreProcessing,
    Orchestration,
    PostProcessing,
    Failure,
    Guardrail,
    RoutingClassifier,
    Unknown,
}

impl EventType {
    /// Known event types, in the priority order used to resolve a fragment
    pub const PRIORITY: [EventType; 6] = [
        EventType::PreProcessing,
        EventType::Orchestration,
        EventType::PostProcessing,
        EventType::Failure,
        EventType::Guardrail,
        EventType::RoutingClassifier,
    ];

    /// Key of this event type on the wire
    pub fn key(&self) -> &'static str {
        match self {
            EventType::PreProcessing => "preProcessingTrace",
            EventType::Orchestration => "orchestrationTrace",
            EventType::PostProcessing => "postProcessingTrace",
            EventType::Failure => "failureTrace",
            EventType::Guardrail => "guardrailTrace",
            EventType::RoutingClassifier => "routingClassifierTrace",
            EventType::Unknown => "unknownTrace",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Sub-event carried inside an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    InvocationInput,
    ModelInvocationInput,
    ModelInvocationOutput,
    AgentCollaboratorInvocationInput,
    AgentCollaboratorInvocationOutput,
    Rationale,
    Observation,
    /// Failure and guardrail events carry their data directly on the event
    EventBody,
    Unknown,
}

impl ChunkType {
    /// Known chunk types, in the priority order used to resolve a fragment
    pub const PRIORITY: [ChunkType; 7] = [
        ChunkType::InvocationInput,
        ChunkType::ModelInvocationInput,
        ChunkType::ModelInvocationOutput,
        ChunkType::AgentCollaboratorInvocationInput,
        ChunkType::AgentCollaboratorInvocationOutput,
        ChunkType::Rationale,
        ChunkType::Observation,
    ];

    /// Key of this chunk type on the wire
    pub fn key(&self) -> &'static str {
        match self {
            ChunkType::InvocationInput => "invocationInput",
            ChunkType::ModelInvocationInput => "modelInvocationInput",
            ChunkType::ModelInvocationOutput => "modelInvocationOutput",
            ChunkType::AgentCollaboratorInvocationInput => "agentCollaboratorInvocationInput",
            ChunkType::AgentCollaboratorInvocationOutput => "agentCollaboratorInvocationOutput",
            ChunkType::Rationale => "rationale",
            ChunkType::Observation => "observation",
            ChunkType::EventBody => "eventBody",
            ChunkType::Unknown => "unknownChunk",
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Runtime event envelope around a trace body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub agent_id: Option<String>,
    pub agent_alias_id: Option<String>,
    pub agent_version: Option<String>,
    pub session_id: Option<String>,
    pub event_time: Option<TimeValue>,
    /// Agents from the supervisor down to the one that produced the fragment
    pub caller_chain: Vec<String>,
    pub collaborator_name: Option<String>,
}

impl Envelope {
    fn from_object(object: &Value) -> Self {
        let caller_chain = object
            .get("callerChain")
            .and_then(Value::as_array)
            .map(|chain| chain.iter().filter_map(caller_label).collect())
            .unwrap_or_default();

        Self {
            agent_id: non_empty_str(object, "agentId").map(str::to_string),
            agent_alias_id: non_empty_str(object, "agentAliasId").map(str::to_string),
            agent_version: non_empty_str(object, "agentVersion").map(str::to_string),
            session_id: non_empty_str(object, "sessionId").map(str::to_string),
            event_time: object.get("eventTime").and_then(TimeValue::from_json),
            caller_chain,
            collaborator_name: non_empty_str(object, "collaboratorName").map(str::to_string),
        }
    }

    /// Delegation depth below the supervisor agent
    pub fn collaborator_depth(&self) -> usize {
        self.caller_chain.len().saturating_sub(1)
    }

    /// Envelope identity fields as a JSON object for the root span metadata
    pub fn identity(&self) -> Map<String, Value> {
        let mut identity = Map::new();
        let fields = [
            ("agent_id", &self.agent_id),
            ("agent_alias_id", &self.agent_alias_id),
            ("agent_version", &self.agent_version),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                identity.insert(key.to_string(), Value::String(value.clone()));
            }
        }
        identity
    }
}

/// Entries of `callerChain` are `{"agentAliasArn": "..."}` objects or plain strings
fn caller_label(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => str_field(entry, "agentAliasArn")
            .or_else(|| str_field(entry, "agentId"))
            .map(str::to_string)
            .or_else(|| Some(entry.to_string())),
        _ => None,
    }
}

/// One record from the trace stream, as received
#[derive(Debug, Clone, PartialEq)]
pub struct RawFragment {
    pub envelope: Envelope,
    /// The event-keyed trace body
    pub trace: Value,
}

impl RawFragment {
    /// Wrap a bare trace body
    pub fn new(trace: Value) -> Self {
        Self {
            envelope: Envelope::default(),
            trace,
        }
    }

    /// Interpret a decoded JSON record, detecting the event envelope.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(TraceError::invalid_fragment(format!(
                "expected a JSON object, got {}",
                json_type_name(&value)
            )));
        }

        match value.get("trace") {
            Some(trace) if trace.is_object() => Ok(Self {
                envelope: Envelope::from_object(&value),
                trace: trace.clone(),
            }),
            _ => Ok(Self::new(value)),
        }
    }

    /// Decode a JSON object or an array of objects
    pub fn from_json_str(text: &str) -> Result<Vec<Self>> {
        match serde_json::from_str::<Value>(text)? {
            Value::Array(items) => items.into_iter().map(Self::from_value).collect(),
            other => Ok(vec![Self::from_value(other)?]),
        }
    }

    /// Decode newline-delimited JSON, skipping blank lines
    pub fn from_json_lines(text: &str) -> Result<Vec<Self>> {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Self::from_value(serde_json::from_str(line)?))
            .collect()
    }

    /// Attach the time the fragment was received
    pub fn with_event_time(mut self, time: DateTime<Utc>) -> Self {
        self.envelope.event_time = Some(TimeValue::DateTime(time));
        self
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A fragment after event and chunk resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedFragment {
    pub event: EventType,
    pub chunk: ChunkType,
    /// The chunk body, or the event body for [`ChunkType::EventBody`]
    pub payload: Value,
    /// `traceId` of the step this fragment belongs to
    pub correlation_id: Option<String>,
    pub envelope: Envelope,
}

impl ClassifiedFragment {
    /// Correlation id without the trailing `-N` sub-step counter
    pub fn step_key(&self) -> Option<&str> {
        self.correlation_id.as_deref().map(strip_step_suffix)
    }

    pub fn collaborator_depth(&self) -> usize {
        self.envelope.collaborator_depth()
    }

    /// Whether classification fell through at either level
    pub fn is_unknown(&self) -> bool {
        self.event == EventType::Unknown || self.chunk == ChunkType::Unknown
    }
}

/// A bare UUID keeps every group, even when its last one is all digits.
fn strip_step_suffix(id: &str) -> &str {
    if Uuid::try_parse(id).is_ok() {
        return id;
    }
    match id.rsplit_once('-') {
        Some((head, tail))
            if !head.is_empty() && !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) =>
        {
            head
        }
        _ => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_detection() {
        let raw = RawFragment::from_value(json!({
            "agentId": "AGENT1",
            "agentAliasId": "ALIAS1",
            "sessionId": "s-1",
            "eventTime": "2024-01-01T00:00:00Z",
            "callerChain": [{"agentAliasArn": "arn:sup"}, {"agentAliasArn": "arn:sub"}],
            "collaboratorName": "flights",
            "trace": {"orchestrationTrace": {}}
        }))
        .unwrap();

        assert_eq!(raw.envelope.agent_id.as_deref(), Some("AGENT1"));
        assert_eq!(raw.envelope.session_id.as_deref(), Some("s-1"));
        assert_eq!(raw.envelope.caller_chain, vec!["arn:sup", "arn:sub"]);
        assert_eq!(raw.envelope.collaborator_depth(), 1);
        assert_eq!(raw.envelope.collaborator_name.as_deref(), Some("flights"));
        assert!(raw.trace.get("orchestrationTrace").is_some());
    }

    #[test]
    fn test_bare_trace_body() {
        let raw = RawFragment::from_value(json!({"failureTrace": {"failureCode": "500"}})).unwrap();
        assert_eq!(raw.envelope, Envelope::default());
        assert_eq!(raw.envelope.collaborator_depth(), 0);
        assert!(raw.trace.get("failureTrace").is_some());
    }

    #[test]
    fn test_non_object_rejected() {
        let err = RawFragment::from_value(json!([1, 2])).unwrap_err();
        assert!(matches!(err, TraceError::InvalidFragment { .. }));
    }

    #[test]
    fn test_json_lines() {
        let text = "{\"orchestrationTrace\": {}}\n\n  \n{\"guardrailTrace\": {}}\n";
        let fragments = RawFragment::from_json_lines(text).unwrap();
        assert_eq!(fragments.len(), 2);

        assert!(RawFragment::from_json_lines("{not json").is_err());
    }

    #[test]
    fn test_json_str_array_or_object() {
        assert_eq!(RawFragment::from_json_str("[{}, {}]").unwrap().len(), 2);
        assert_eq!(RawFragment::from_json_str("{}").unwrap().len(), 1);
    }

    #[test]
    fn test_step_suffix() {
        assert_eq!(strip_step_suffix("abc-123-0"), "abc-123");
        assert_eq!(strip_step_suffix("abc-def"), "abc-def");
        assert_eq!(strip_step_suffix("abc"), "abc");
        assert_eq!(strip_step_suffix("-1"), "-1");
    }

    #[test]
    fn test_bare_uuid_is_not_a_step_suffix() {
        let bare = "123e4567-e89b-12d3-a456-426614174000";
        assert_eq!(strip_step_suffix(bare), bare);
        assert_eq!(strip_step_suffix("123e4567-e89b-12d3-a456-426614174000-3"), bare);
        assert_eq!(
            strip_step_suffix("123e4567-e89b-12d3-a456-426614174000-0-1"),
            "123e4567-e89b-12d3-a456-426614174000-0"
        );
    }
}
