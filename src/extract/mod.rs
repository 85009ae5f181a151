//! Attribute extraction
//!
//! Pure functions mapping one classified fragment to span attributes plus a
//! separate metadata map. Extraction never fails: fields that are missing or
//! malformed are simply not set.
//!
//! Request attributes (`input.*`, `llm.input_messages.*`, `tool.*`) and output
//! attributes (`output.*`, token counts, documents) are kept apart so the
//! emitter can set the former when a span starts and the latter before it ends.
//!
//! # Key Types
//!
//! - [`Extraction`] - the result for one fragment
//! - [`AttributeSet`] - extractions merged across a node's fragments

mod collaborator;
mod failure;
mod guardrail;
mod invocation;
mod model;
mod observation;
mod rationale;

pub use collaborator::{collaborator_name, collaborator_span_name};
pub use failure::{failure_message, FAILURE_SPAN_NAME};
pub use guardrail::GUARDRAIL_SPAN_NAME;

use serde_json::{Map, Value};

use crate::fragment::{ChunkType, ClassifiedFragment, EventType};
use crate::telemetry::semconv::{attrs, mime};
use crate::telemetry::{AttributeValue, Attributes, SpanKind};
use crate::utils::json::{parse_structured, text_of};

/// Metadata keys consulted for timing
pub mod timing {
    pub const START_TIME: &str = "start_time";
    pub const END_TIME: &str = "end_time";
    pub const TOTAL_TIME_MS: &str = "total_time_ms";
    pub const EVENT_TIME: &str = "event_time";
    pub const CLIENT_REQUEST_ID: &str = "client_request_id";
}

/// Metadata keys for guardrail assessments
pub const INTERVENING_GUARDRAILS: &str = "intervening_guardrails";
pub const NON_INTERVENING_GUARDRAILS: &str = "non_intervening_guardrails";

/// Attributes and metadata extracted from a single fragment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub span_kind: Option<SpanKind>,
    pub name: Option<String>,
    /// Attributes known from the request side
    pub request: Attributes,
    /// Attributes known from the response side
    pub output: Attributes,
    /// Bookkeeping kept out of span attributes
    pub metadata: Map<String, Value>,
    /// Human-facing input used when bubbling to containers
    pub display_input: Option<String>,
    /// Human-facing output used when bubbling to containers
    pub display_output: Option<String>,
}

impl Extraction {
    pub fn new(kind: SpanKind, name: impl Into<String>) -> Self {
        Self {
            span_kind: Some(kind),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn set_request(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.request.insert(key.into(), value.into());
    }

    pub fn set_output(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.output.insert(key.into(), value.into());
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Set `input.value` and its MIME type
    pub fn set_input_value(&mut self, text: &str) {
        self.set_request(attrs::INPUT_VALUE, text);
        self.set_request(attrs::INPUT_MIME_TYPE, mime_type_of(text));
    }

    /// Set `output.value` and its MIME type
    pub fn set_output_value(&mut self, text: &str) {
        self.set_output(attrs::OUTPUT_VALUE, text);
        self.set_output(attrs::OUTPUT_MIME_TYPE, mime_type_of(text));
    }

    /// Whether nothing at all was extracted
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn mime_type_of(text: &str) -> &'static str {
    if parse_structured(text).is_some() {
        mime::JSON
    } else {
        mime::TEXT
    }
}

/// Extractions merged across the fragments of one node
///
/// Attributes and metadata are last-write-wins in arrival order, except for
/// the guardrail assessment lists, which accumulate. The span kind and name
/// come from the first fragment that determines them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    pub span_kind: Option<SpanKind>,
    pub name: Option<String>,
    pub request: Attributes,
    pub output: Attributes,
    pub metadata: Map<String, Value>,
    pub display_input: Option<String>,
    pub display_output: Option<String>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, extraction: Extraction) {
        if self.span_kind.is_none() {
            self.span_kind = extraction.span_kind;
        }
        if self.name.is_none() {
            self.name = extraction.name;
        }
        self.request.extend(extraction.request);
        self.output.extend(extraction.output);

        for (key, value) in extraction.metadata {
            if key == INTERVENING_GUARDRAILS || key == NON_INTERVENING_GUARDRAILS {
                if let (Some(Value::Array(existing)), Value::Array(more)) =
                    (self.metadata.get_mut(&key), &value)
                {
                    existing.extend(more.iter().cloned());
                    continue;
                }
            }
            self.metadata.insert(key, value);
        }

        if extraction.display_input.is_some() {
            self.display_input = extraction.display_input;
        }
        if extraction.display_output.is_some() {
            self.display_output = extraction.display_output;
        }
    }

    pub fn input_value(&self) -> Option<&str> {
        self.request.get(attrs::INPUT_VALUE).and_then(|v| v.as_str())
    }

    pub fn output_value(&self) -> Option<&str> {
        self.output.get(attrs::OUTPUT_VALUE).and_then(|v| v.as_str())
    }

    /// Whether any fragment reported an intervening guardrail
    pub fn has_intervention(&self) -> bool {
        matches!(
            self.metadata.get(INTERVENING_GUARDRAILS),
            Some(Value::Array(items)) if !items.is_empty()
        )
    }
}

/// Extract attributes from one classified fragment.
///
/// Unknown event or chunk types yield an empty extraction.
pub fn extract(fragment: &ClassifiedFragment) -> Extraction {
    if fragment.is_unknown() {
        return Extraction::default();
    }

    let payload = &fragment.payload;
    let mut extraction = match (fragment.event, fragment.chunk) {
        (EventType::Failure, _) => failure::extract(payload),
        (EventType::Guardrail, _) => guardrail::extract(payload),
        (_, ChunkType::ModelInvocationInput) => model::extract_input(payload),
        (event, ChunkType::ModelInvocationOutput) => model::extract_output(payload, event),
        (_, ChunkType::InvocationInput) => invocation::extract(payload),
        (_, ChunkType::Observation) => observation::extract(payload),
        (_, ChunkType::Rationale) => rationale::extract(payload),
        (_, ChunkType::AgentCollaboratorInvocationInput) => collaborator::extract_input(payload),
        (_, ChunkType::AgentCollaboratorInvocationOutput) => collaborator::extract_output(payload),
        (_, ChunkType::EventBody | ChunkType::Unknown) => Extraction::default(),
    };

    collect_timing(payload, &mut extraction.metadata);
    if let Some(event_time) = &fragment.envelope.event_time {
        extraction
            .metadata
            .insert(timing::EVENT_TIME.to_string(), event_time.to_json());
    }
    extraction
}

/// Copy timing fields from `payload.metadata` and the `metadata` of each
/// direct sub-object. The first occurrence of a field wins.
fn collect_timing(payload: &Value, metadata: &mut Map<String, Value>) {
    let Some(object) = payload.as_object() else {
        return;
    };

    let sources = std::iter::once(payload.get("metadata"))
        .chain(object.values().map(|child| child.get("metadata")))
        .flatten();

    for source in sources {
        for (wire_key, key) in [
            ("startTime", timing::START_TIME),
            ("endTime", timing::END_TIME),
            ("totalTimeMs", timing::TOTAL_TIME_MS),
            ("clientRequestId", timing::CLIENT_REQUEST_ID),
        ] {
            if metadata.contains_key(key) {
                continue;
            }
            if let Some(value) = source.get(wire_key).filter(|v| !v.is_null()) {
                metadata.insert(key.to_string(), value.clone());
            }
        }
    }
}

/// Text of a `{"text": ...}` style object, or of a bare string
pub(crate) fn text_field(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.clone(),
        object @ Value::Object(_) => object.get("text").map(text_of)?,
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
