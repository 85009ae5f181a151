//! Model invocation input and output

use serde_json::Value;

use super::Extraction;
use crate::fragment::EventType;
use crate::telemetry::semconv::{attrs, message_key};
use crate::telemetry::SpanKind;
use crate::utils::json::{
    int_field, non_empty_str, object_field, parse_loose, parse_structured, str_field, text_of,
};

const LLM_SPAN_NAME: &str = "LLM";
const PROVIDER: &str = "aws";

pub(super) fn extract_input(payload: &Value) -> Extraction {
    let mut extraction = Extraction::new(SpanKind::Llm, LLM_SPAN_NAME);
    extraction.set_request(attrs::LLM_PROVIDER, PROVIDER);

    let text = str_field(payload, "text");
    let parsed_text = text.and_then(parse_structured);

    if let Some(model) = resolve_model_name(payload, parsed_text.as_ref()) {
        if let Some(system) = model_system(&model) {
            extraction.set_request(attrs::LLM_SYSTEM, system);
        }
        extraction.set_request(attrs::LLM_MODEL_NAME, model);
    }

    if let Some(config) = payload.get("inferenceConfiguration").filter(|v| v.is_object()) {
        extraction.set_request(attrs::LLM_INVOCATION_PARAMETERS, config.to_string());
    }

    if let Some(text) = text {
        extraction.set_input_value(text);

        let messages = parsed_text
            .as_ref()
            .map(prompt_messages)
            .filter(|messages| !messages.is_empty())
            .unwrap_or_else(|| vec![("user".to_string(), text.to_string())]);

        for (index, (role, content)) in messages.iter().enumerate() {
            extraction.set_request(
                message_key(attrs::LLM_INPUT_MESSAGES, index, attrs::MESSAGE_ROLE),
                role.as_str(),
            );
            extraction.set_request(
                message_key(attrs::LLM_INPUT_MESSAGES, index, attrs::MESSAGE_CONTENT),
                content.as_str(),
            );
        }
        extraction.display_input = messages
            .into_iter()
            .find(|(role, content)| role == "user" && !content.is_empty())
            .map(|(_, content)| content);
    }

    for (wire_key, key) in [
        ("type", "prompt_type"),
        ("promptCreationMode", "prompt_creation_mode"),
        ("parserMode", "parser_mode"),
        ("overrideLambda", "override_lambda"),
    ] {
        if let Some(value) = non_empty_str(payload, wire_key) {
            extraction.set_metadata(key, value);
        }
    }

    extraction
}

pub(super) fn extract_output(payload: &Value, event: EventType) -> Extraction {
    let mut extraction = Extraction::new(SpanKind::Llm, LLM_SPAN_NAME);

    let usage = payload
        .get("metadata")
        .and_then(|m| m.get("usage"))
        .or_else(|| payload.get("usage"));
    if let Some(usage) = usage {
        let prompt = int_field(usage, "inputTokens");
        let completion = int_field(usage, "outputTokens");
        if let Some(prompt) = prompt {
            extraction.set_output(attrs::LLM_TOKEN_COUNT_PROMPT, prompt);
        }
        if let Some(completion) = completion {
            extraction.set_output(attrs::LLM_TOKEN_COUNT_COMPLETION, completion);
        }
        if let Some(total) = prompt.zip(completion).and_then(|(p, c)| p.checked_add(c)) {
            extraction.set_output(attrs::LLM_TOKEN_COUNT_TOTAL, total);
        }
    }

    let mut output_text = None;
    if let Some(content) = payload.get("rawResponse").and_then(|r| r.get("content")) {
        let raw = text_of(content);
        let parsed = match content {
            Value::String(s) => parse_structured(s),
            other if other.is_object() || other.is_array() => Some(other.clone()),
            _ => None,
        };

        if let Some(model) = parsed.as_ref().and_then(|p| non_empty_str(p, "model")) {
            extraction.set_output(attrs::LLM_MODEL_NAME, model);
        }
        if let Some(stop_reason) = parsed.as_ref().and_then(|p| non_empty_str(p, "stop_reason")) {
            extraction.set_metadata("stop_reason", stop_reason);
        }

        output_text = parsed
            .as_ref()
            .and_then(response_text)
            .or_else(|| (!raw.is_empty()).then_some(raw));
    }

    if let Some(parsed) = payload.get("parsedResponse") {
        if let Some(text) = non_empty_str(parsed, "text") {
            output_text = Some(text.to_string());
        }
        if let Some(rationale) = non_empty_str(parsed, "rationale") {
            extraction.set_metadata("rationale", rationale);
        }
        if event == EventType::PreProcessing {
            if let Some(is_valid) = parsed.get("isValid").and_then(Value::as_bool) {
                extraction.set_metadata("is_valid", is_valid);
            }
        }
    }

    if let Some(text) = output_text {
        extraction.set_output(
            message_key(attrs::LLM_OUTPUT_MESSAGES, 0, attrs::MESSAGE_ROLE),
            "assistant",
        );
        extraction.set_output(
            message_key(attrs::LLM_OUTPUT_MESSAGES, 0, attrs::MESSAGE_CONTENT),
            text.as_str(),
        );
        extraction.set_output_value(&text);
        extraction.display_output = Some(text);
    }

    extraction
}

/// Model name from the explicit field, else from embedded JSON.
///
/// Parse failures leave the name unset.
fn resolve_model_name(payload: &Value, parsed_text: Option<&Value>) -> Option<String> {
    if let Some(model) = non_empty_str(payload, "foundationModel") {
        return Some(model.to_string());
    }
    if let Some(model) = parsed_text.and_then(|p| non_empty_str(p, "model")) {
        return Some(model.to_string());
    }
    payload
        .get("rawResponse")
        .and_then(|r| str_field(r, "content"))
        .and_then(parse_loose)
        .and_then(|p| non_empty_str(&p, "model").map(str::to_string))
}

/// Vendor behind a Bedrock model id, e.g. `anthropic` for
/// `us.anthropic.claude-3-5-sonnet-20240620-v1:0`
fn model_system(model: &str) -> Option<&'static str> {
    const VENDORS: [&str; 7] = ["anthropic", "amazon", "meta", "mistral", "cohere", "ai21", "deepseek"];
    model
        .split(['.', '/', ':'])
        .find_map(|part| VENDORS.into_iter().find(|vendor| part == *vendor))
}

/// `(role, content)` pairs from a parsed prompt: the system prompt, then messages
fn prompt_messages(parsed: &Value) -> Vec<(String, String)> {
    let mut messages = Vec::new();

    if let Some(system) = parsed.get("system").map(content_text).filter(|s| !s.is_empty()) {
        messages.push(("system".to_string(), system));
    }

    if let Some(items) = parsed.get("messages").and_then(Value::as_array) {
        for item in items {
            let role = str_field(item, "role").unwrap_or("user");
            let content = item.get("content").map(content_text).unwrap_or_default();
            messages.push((role.to_string(), content));
        }
    }

    messages
}

/// Flatten message content: a string (possibly itself a loose JSON list of
/// parts), a list of `{type, text}` parts, or anything else as JSON text
fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => match parse_structured(s) {
            Some(parsed @ Value::Array(_)) => parts_text(&parsed).unwrap_or_else(|| s.clone()),
            _ => s.clone(),
        },
        Value::Array(_) => parts_text(content).unwrap_or_else(|| content.to_string()),
        Value::Object(_) => str_field(content, "text")
            .map(str::to_string)
            .unwrap_or_else(|| content.to_string()),
        other => text_of(other),
    }
}

fn parts_text(parts: &Value) -> Option<String> {
    let texts: Vec<&str> = parts
        .as_array()?
        .iter()
        .filter_map(|part| str_field(part, "text"))
        .collect();
    (!texts.is_empty()).then(|| texts.join("\n"))
}

/// Text of a model response body (`{"content": [{"type": "text", "text": ...}]}`)
fn response_text(parsed: &Value) -> Option<String> {
    match parsed.get("content") {
        Some(content @ Value::Array(_)) => parts_text(content),
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => object_field(parsed, "output")
            .and_then(|output| output.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(parts_text),
    }
}
