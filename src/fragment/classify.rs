use serde_json::Value;

use super::{ChunkType, ClassifiedFragment, EventType, RawFragment};
use crate::utils::json::non_empty_str;

/// Resolve the event and chunk type of a raw fragment.
///
/// Resolution is a first-match lookup over [`EventType::PRIORITY`] and
/// [`ChunkType::PRIORITY`]. Unrecognized shapes are tagged
/// [`EventType::Unknown`] / [`ChunkType::Unknown`] and never rejected.
pub fn classify(raw: &RawFragment) -> ClassifiedFragment {
    let Some((event, body)) = resolve_event(&raw.trace) else {
        tracing::debug!("Unrecognized trace event, passing fragment through");
        return ClassifiedFragment {
            event: EventType::Unknown,
            chunk: ChunkType::Unknown,
            payload: raw.trace.clone(),
            correlation_id: None,
            envelope: raw.envelope.clone(),
        };
    };

    let (chunk, payload) = match resolve_chunk(body) {
        Some((chunk, payload)) => (refine_chunk(chunk, payload), payload),
        None if matches!(event, EventType::Failure | EventType::Guardrail) => {
            (ChunkType::EventBody, body)
        }
        None => {
            tracing::debug!("Unrecognized chunk in {}, passing fragment through", event);
            (ChunkType::Unknown, body)
        }
    };

    let correlation_id = non_empty_str(payload, "traceId")
        .or_else(|| non_empty_str(body, "traceId"))
        .map(str::to_string);

    ClassifiedFragment {
        event,
        chunk,
        payload: payload.clone(),
        correlation_id,
        envelope: raw.envelope.clone(),
    }
}

fn resolve_event(trace: &Value) -> Option<(EventType, &Value)> {
    EventType::PRIORITY
        .into_iter()
        .find_map(|event| trace.get(event.key()).map(|body| (event, body)))
}

fn resolve_chunk(body: &Value) -> Option<(ChunkType, &Value)> {
    ChunkType::PRIORITY
        .into_iter()
        .find_map(|chunk| body.get(chunk.key()).map(|payload| (chunk, payload)))
}

/// Delegation also arrives nested inside a generic invocation input or observation
fn refine_chunk(chunk: ChunkType, payload: &Value) -> ChunkType {
    match chunk {
        ChunkType::InvocationInput
            if payload
                .get(ChunkType::AgentCollaboratorInvocationInput.key())
                .is_some() =>
        {
            ChunkType::AgentCollaboratorInvocationInput
        }
        ChunkType::Observation
            if payload
                .get(ChunkType::AgentCollaboratorInvocationOutput.key())
                .is_some() =>
        {
            ChunkType::AgentCollaboratorInvocationOutput
        }
        other => other,
    }
}
