//! Observations: the result of an invocation, or the agent's final answer

use serde_json::{Map, Value};

use super::invocation::{CODE_INTERPRETER, KNOWLEDGE_BASE_LOOKUP};
use super::{collaborator, text_field, Extraction};
use crate::telemetry::semconv::{attrs, document_key};
use crate::telemetry::SpanKind;
use crate::utils::json::{non_empty_str, str_field, text_of};

pub(super) fn extract(payload: &Value) -> Extraction {
    let mut extraction = if let Some(output) = payload.get("actionGroupInvocationOutput") {
        action_group(output)
    } else if let Some(output) = payload.get("codeInterpreterInvocationOutput") {
        code_interpreter(output)
    } else if let Some(output) = payload.get("knowledgeBaseLookupOutput") {
        knowledge_base(output)
    } else if payload.get("agentCollaboratorInvocationOutput").is_some() {
        collaborator::extract_output(payload)
    } else if let Some(text) = text_field(payload.get("finalResponse")) {
        final_response(text)
    } else if let Some(reprompt) = payload.get("repromptResponse") {
        reprompt_response(reprompt)
    } else {
        Extraction::default()
    };

    if let Some(observation_type) = non_empty_str(payload, "type") {
        extraction.set_metadata("observation_type", observation_type);
    }
    extraction
}

fn action_group(output: &Value) -> Extraction {
    let mut extraction = Extraction {
        span_kind: Some(SpanKind::Tool),
        ..Default::default()
    };
    if let Some(text) = text_field(Some(output)) {
        extraction.set_output_value(&text);
    }
    extraction
}

/// Output, error, timeout and produced files are mutually exclusive,
/// checked in that order.
fn code_interpreter(output: &Value) -> Extraction {
    let mut extraction = Extraction::new(SpanKind::Tool, CODE_INTERPRETER);

    let text = if let Some(text) = non_empty_str(output, "executionOutput") {
        Some(text.to_string())
    } else if let Some(error) = non_empty_str(output, "executionError") {
        extraction.set_metadata("execution_error", error);
        Some(format!("Error: {}", error))
    } else if output.get("executionTimeout").and_then(Value::as_bool) == Some(true) {
        extraction.set_metadata("execution_timeout", true);
        Some("Execution timed out".to_string())
    } else {
        match output.get("files") {
            Some(Value::Array(files)) if !files.is_empty() => {
                let names: Vec<String> = files.iter().map(text_of).collect();
                Some(format!("Files generated: {}", names.join(", ")))
            }
            _ => None,
        }
    };

    if let Some(text) = text {
        extraction.set_output_value(&text);
    }
    extraction
}

fn knowledge_base(output: &Value) -> Extraction {
    let mut extraction = Extraction::new(SpanKind::Retriever, KNOWLEDGE_BASE_LOOKUP);

    let references = output
        .get("retrievedReferences")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for (index, reference) in references.iter().enumerate() {
        let metadata = reference.get("metadata").and_then(Value::as_object);

        let id = metadata
            .and_then(|m| m.get("x-amz-bedrock-kb-chunk-id"))
            .and_then(Value::as_str)
            .or_else(|| location_uri(reference));
        if let Some(id) = id {
            extraction.set_output(document_key(index, attrs::DOCUMENT_ID), id);
        }

        if let Some(content) = text_field(reference.get("content")) {
            extraction.set_output(document_key(index, attrs::DOCUMENT_CONTENT), content);
        }

        if let Some(score) = reference
            .get("score")
            .or_else(|| metadata.and_then(|m| m.get("score")))
            .and_then(Value::as_f64)
        {
            extraction.set_output(document_key(index, attrs::DOCUMENT_SCORE), score);
        }

        let mut document_metadata = metadata.cloned().unwrap_or_else(Map::new);
        if let Some(location) = reference.get("location").filter(|l| !l.is_null()) {
            document_metadata.insert("location".to_string(), location.clone());
        }
        if !document_metadata.is_empty() {
            extraction.set_output(
                document_key(index, attrs::DOCUMENT_METADATA),
                Value::Object(document_metadata).to_string(),
            );
        }
    }

    extraction.set_metadata("document_count", references.len() as u64);
    extraction
}

/// `location.<type>Location.uri`, e.g. `location.s3Location.uri`
fn location_uri(reference: &Value) -> Option<&str> {
    reference
        .get("location")?
        .as_object()?
        .values()
        .find_map(|location| str_field(location, "uri").or_else(|| str_field(location, "url")))
}

fn final_response(text: String) -> Extraction {
    let mut extraction = Extraction::default();
    extraction.set_output_value(&text);
    extraction.display_output = Some(text);
    extraction
}

fn reprompt_response(reprompt: &Value) -> Extraction {
    let mut extraction = Extraction::default();
    if let Some(text) = text_field(Some(reprompt)) {
        extraction.set_output_value(&text);
    }
    if let Some(source) = non_empty_str(reprompt, "source") {
        extraction.set_metadata("reprompt_source", source);
    }
    extraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output_str<'a>(extraction: &'a Extraction, key: &str) -> Option<&'a str> {
        extraction.output.get(key).and_then(|v| v.as_str())
    }

    #[test]
    fn test_action_group_output() {
        let extraction = extract(&json!({
            "type": "ACTION_GROUP",
            "actionGroupInvocationOutput": {"text": "{\"booking\": \"B1\"}"}
        }));
        assert_eq!(extraction.span_kind, Some(SpanKind::Tool));
        assert_eq!(
            output_str(&extraction, attrs::OUTPUT_VALUE),
            Some("{\"booking\": \"B1\"}")
        );
        assert_eq!(extraction.metadata["observation_type"], json!("ACTION_GROUP"));
        assert_eq!(extraction.display_output, None);
    }

    #[test]
    fn test_code_interpreter_priority() {
        let extraction = extract(&json!({"codeInterpreterInvocationOutput": {
            "executionOutput": "42",
            "executionError": "ignored"
        }}));
        assert_eq!(output_str(&extraction, attrs::OUTPUT_VALUE), Some("42"));

        let extraction = extract(&json!({"codeInterpreterInvocationOutput": {
            "executionError": "NameError"
        }}));
        assert_eq!(output_str(&extraction, attrs::OUTPUT_VALUE), Some("Error: NameError"));

        let extraction = extract(&json!({"codeInterpreterInvocationOutput": {
            "executionTimeout": true
        }}));
        assert_eq!(
            output_str(&extraction, attrs::OUTPUT_VALUE),
            Some("Execution timed out")
        );

        let extraction = extract(&json!({"codeInterpreterInvocationOutput": {
            "files": ["chart.png"]
        }}));
        assert_eq!(
            output_str(&extraction, attrs::OUTPUT_VALUE),
            Some("Files generated: chart.png")
        );
    }

    #[test]
    fn test_knowledge_base_documents() {
        let extraction = extract(&json!({
            "type": "KNOWLEDGE_BASE",
            "knowledgeBaseLookupOutput": {"retrievedReferences": [
                {
                    "content": {"text": "Refunds within 30 days"},
                    "location": {"type": "S3", "s3Location": {"uri": "s3://docs/refunds.pdf"}},
                    "metadata": {"x-amz-bedrock-kb-chunk-id": "chunk-1"}
                },
                {
                    "content": {"text": "No refunds on sale items"},
                    "location": {"type": "S3", "s3Location": {"uri": "s3://docs/sales.pdf"}},
                    "score": 0.5
                }
            ]}
        }));

        assert_eq!(extraction.span_kind, Some(SpanKind::Retriever));
        assert_eq!(
            output_str(&extraction, "retrieval.documents.0.document.id"),
            Some("chunk-1")
        );
        assert_eq!(
            output_str(&extraction, "retrieval.documents.1.document.id"),
            Some("s3://docs/sales.pdf")
        );
        assert_eq!(
            output_str(&extraction, "retrieval.documents.1.document.content"),
            Some("No refunds on sale items")
        );
        assert_eq!(
            extraction.output.get("retrieval.documents.1.document.score"),
            Some(&crate::telemetry::AttributeValue::Float(0.5))
        );
        let metadata: Value = serde_json::from_str(
            output_str(&extraction, "retrieval.documents.0.document.metadata").unwrap(),
        )
        .unwrap();
        assert_eq!(metadata["location"]["s3Location"]["uri"], json!("s3://docs/refunds.pdf"));
        assert_eq!(extraction.metadata["document_count"], json!(2));
    }

    #[test]
    fn test_final_response() {
        let extraction = extract(&json!({
            "type": "FINISH",
            "finalResponse": {"text": "Your flight is booked."}
        }));
        assert_eq!(extraction.span_kind, None);
        assert_eq!(
            extraction.display_output.as_deref(),
            Some("Your flight is booked.")
        );
    }

    #[test]
    fn test_reprompt_response() {
        let extraction = extract(&json!({
            "type": "REPROMPT",
            "repromptResponse": {"text": "Please clarify", "source": "PARSER"}
        }));
        assert_eq!(output_str(&extraction, attrs::OUTPUT_VALUE), Some("Please clarify"));
        assert_eq!(extraction.metadata["reprompt_source"], json!("PARSER"));
    }
}
