//! Invocation input: action group, code interpreter, knowledge base, or
//! sub-agent delegation

use serde_json::{Map, Value};

use super::{collaborator, Extraction};
use crate::telemetry::semconv::attrs;
use crate::telemetry::SpanKind;
use crate::utils::json::{non_empty_str, parse_or_text, str_field};

pub(super) const CODE_INTERPRETER: &str = "code_interpreter";
pub(super) const KNOWLEDGE_BASE_LOOKUP: &str = "knowledge_base_lookup";

pub(super) fn extract(payload: &Value) -> Extraction {
    let mut extraction = if let Some(input) = payload.get("actionGroupInvocationInput") {
        action_group(input)
    } else if let Some(input) = payload.get("codeInterpreterInvocationInput") {
        code_interpreter(input)
    } else if let Some(input) = payload.get("knowledgeBaseLookupInput") {
        knowledge_base(input)
    } else if payload.get("agentCollaboratorInvocationInput").is_some() {
        collaborator::extract_input(payload)
    } else {
        Extraction::default()
    };

    if let Some(invocation_type) = non_empty_str(payload, "invocationType") {
        extraction.set_metadata("invocation_type", invocation_type);
    }
    extraction
}

fn action_group(input: &Value) -> Extraction {
    let tool_name = ["function", "apiPath", "actionGroupName"]
        .into_iter()
        .find_map(|key| non_empty_str(input, key))
        .unwrap_or("action_group");

    let mut extraction = Extraction::new(SpanKind::Tool, tool_name);
    extraction.set_request(attrs::TOOL_NAME, tool_name);
    extraction.set_request(attrs::TOOL_CALL_FUNCTION_NAME, tool_name);
    if let Some(description) = non_empty_str(input, "description") {
        extraction.set_request(attrs::TOOL_DESCRIPTION, description);
    }

    let arguments = Value::Object(action_group_arguments(input)).to_string();
    extraction.set_request(attrs::TOOL_PARAMETERS, arguments.as_str());
    extraction.set_request(attrs::TOOL_CALL_FUNCTION_ARGUMENTS, arguments.as_str());
    extraction.set_input_value(&arguments);
    extraction.display_input = Some(arguments);

    for (wire_key, key) in [
        ("actionGroupName", "action_group_name"),
        ("verb", "verb"),
        ("apiPath", "api_path"),
        ("executionType", "execution_type"),
        ("invocationId", "invocation_id"),
    ] {
        if let Some(value) = non_empty_str(input, wire_key) {
            extraction.set_metadata(key, value);
        }
    }
    extraction
}

/// Flatten `parameters` and the request body's `properties` into one object
///
/// Both arrive as lists of `{name, type, value}` entries. Values are loosely
/// parsed so numbers and nested structures survive.
fn action_group_arguments(input: &Value) -> Map<String, Value> {
    let mut arguments = Map::new();

    let request_properties = input
        .get("requestBody")
        .and_then(|body| body.get("content"))
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|content| content.values())
        .filter_map(|media| media.get("properties").and_then(Value::as_array))
        .flatten();

    let parameters = input
        .get("parameters")
        .and_then(Value::as_array)
        .into_iter()
        .flatten();

    for entry in parameters.chain(request_properties) {
        let Some(name) = str_field(entry, "name") else {
            continue;
        };
        let value = match entry.get("value") {
            Some(Value::String(s)) => parse_or_text(s),
            Some(other) => other.clone(),
            None => Value::Null,
        };
        arguments.insert(name.to_string(), value);
    }
    arguments
}

fn code_interpreter(input: &Value) -> Extraction {
    let mut extraction = Extraction::new(SpanKind::Tool, CODE_INTERPRETER);
    extraction.set_request(attrs::TOOL_NAME, CODE_INTERPRETER);

    let mut parameters = Map::new();
    if let Some(code) = str_field(input, "code") {
        extraction.set_input_value(code);
        extraction.display_input = Some(code.to_string());
        parameters.insert("code".to_string(), Value::String(code.to_string()));
    }
    if let Some(files) = input.get("files").filter(|f| !f.is_null()) {
        parameters.insert("files".to_string(), files.clone());
    }
    extraction.set_request(attrs::TOOL_PARAMETERS, Value::Object(parameters).to_string());
    extraction
}

fn knowledge_base(input: &Value) -> Extraction {
    let mut extraction = Extraction::new(SpanKind::Retriever, KNOWLEDGE_BASE_LOOKUP);
    if let Some(text) = non_empty_str(input, "text") {
        extraction.set_input_value(text);
        extraction.display_input = Some(text.to_string());
    }
    if let Some(id) = non_empty_str(input, "knowledgeBaseId") {
        extraction.set_metadata("knowledge_base_id", id);
    }
    extraction
}
