//! Sub-agent delegation input and output

use serde_json::Value;

use super::{text_field, Extraction};
use crate::fragment::ChunkType;
use crate::telemetry::semconv::attrs;
use crate::telemetry::SpanKind;
use crate::utils::json::non_empty_str;

/// Span name for a delegation to the named collaborator
pub fn collaborator_span_name(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("agent_collaborator[{}]", name),
        None => "agent_collaborator".to_string(),
    }
}

/// The collaborator object, whether it arrived top-level or nested
fn body<'a>(payload: &'a Value, chunk: ChunkType) -> &'a Value {
    payload.get(chunk.key()).unwrap_or(payload)
}

/// Name of the collaborator a delegation fragment refers to
pub fn collaborator_name(payload: &Value) -> Option<&str> {
    [
        ChunkType::AgentCollaboratorInvocationInput,
        ChunkType::AgentCollaboratorInvocationOutput,
    ]
    .into_iter()
    .find_map(|chunk| non_empty_str(body(payload, chunk), "agentCollaboratorName"))
}

fn with_identity(body: &Value) -> Extraction {
    let name = non_empty_str(body, "agentCollaboratorName");
    let mut extraction = Extraction::new(SpanKind::Agent, collaborator_span_name(name));
    if let Some(name) = name {
        extraction.set_request(attrs::AGENT_NAME, name);
        extraction.set_metadata("collaborator_name", name);
    }
    if let Some(arn) = non_empty_str(body, "agentCollaboratorAliasArn") {
        extraction.set_metadata("agent_alias_arn", arn);
    }
    extraction
}

pub(super) fn extract_input(payload: &Value) -> Extraction {
    let body = body(payload, ChunkType::AgentCollaboratorInvocationInput);
    let mut extraction = with_identity(body);

    let input = body.get("input");
    if let Some(text) = text_field(input) {
        extraction.set_input_value(&text);
        extraction.display_input = Some(text);
    }
    if let Some(kind) = input.and_then(|i| non_empty_str(i, "type")) {
        extraction.set_metadata("input_type", kind);
    }
    extraction
}

pub(super) fn extract_output(payload: &Value) -> Extraction {
    let body = body(payload, ChunkType::AgentCollaboratorInvocationOutput);
    let mut extraction = with_identity(body);

    let output = body.get("output");
    if let Some(text) = text_field(output) {
        extraction.set_output_value(&text);
        extraction.display_output = Some(text);
    }
    if let Some(kind) = output.and_then(|o| non_empty_str(o, "type")) {
        extraction.set_metadata("output_type", kind);
    }
    extraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_input() {
        let payload = json!({
            "invocationType": "AGENT_COLLABORATOR",
            "agentCollaboratorInvocationInput": {
                "agentCollaboratorName": "flights",
                "agentCollaboratorAliasArn": "arn:aws:bedrock:us-east-1:1:agent-alias/A/B",
                "input": {"text": "Find a flight to Paris", "type": "TEXT"}
            }
        });
        let extraction = extract_input(&payload);

        assert_eq!(extraction.span_kind, Some(SpanKind::Agent));
        assert_eq!(extraction.name.as_deref(), Some("agent_collaborator[flights]"));
        assert_eq!(
            extraction.request[attrs::INPUT_VALUE].as_str(),
            Some("Find a flight to Paris")
        );
        assert_eq!(extraction.display_input.as_deref(), Some("Find a flight to Paris"));
        assert_eq!(extraction.metadata["input_type"], json!("TEXT"));
        assert_eq!(collaborator_name(&payload), Some("flights"));
    }

    #[test]
    fn test_top_level_output() {
        let payload = json!({
            "agentCollaboratorName": "flights",
            "output": {"text": "Flight AF123 booked", "type": "TEXT"}
        });
        let extraction = extract_output(&payload);
        assert_eq!(
            extraction.output[attrs::OUTPUT_VALUE].as_str(),
            Some("Flight AF123 booked")
        );
        assert_eq!(extraction.display_output.as_deref(), Some("Flight AF123 booked"));
        assert_eq!(collaborator_name(&payload), Some("flights"));
    }

    #[test]
    fn test_unnamed_collaborator() {
        let extraction = extract_output(&json!({"output": {"text": "done"}}));
        assert_eq!(extraction.name.as_deref(), Some("agent_collaborator"));
        assert_eq!(collaborator_name(&json!({})), None);
    }
}
