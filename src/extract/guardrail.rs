//! Guardrail evaluations

use serde_json::Value;

use super::{Extraction, INTERVENING_GUARDRAILS, NON_INTERVENING_GUARDRAILS};
use crate::telemetry::SpanKind;
use crate::utils::json::str_field;

pub const GUARDRAIL_SPAN_NAME: &str = "Guardrails";

const INTERVENED: &str = "INTERVENED";

/// Route the assessment into the intervening or non-intervening list.
///
/// Both lists are metadata; only the status of the guardrail span reflects
/// them.
pub(super) fn extract(payload: &Value) -> Extraction {
    let mut extraction = Extraction::new(SpanKind::Guardrail, GUARDRAIL_SPAN_NAME);

    let mut content = payload.as_object().cloned().unwrap_or_default();
    content.remove("metadata");
    content.remove("traceId");

    let list = if str_field(payload, "action") == Some(INTERVENED) {
        INTERVENING_GUARDRAILS
    } else {
        NON_INTERVENING_GUARDRAILS
    };
    extraction.set_metadata(list, Value::Array(vec![Value::Object(content)]));
    extraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intervened_assessment() {
        let extraction = extract(&json!({
            "action": "INTERVENED",
            "traceId": "g-1",
            "inputAssessments": [{"topicPolicy": {"topics": [{"name": "crypto", "action": "BLOCKED"}]}}],
            "metadata": {"startTime": "2024-01-01T00:00:00Z"}
        }));
        assert_eq!(extraction.span_kind, Some(SpanKind::Guardrail));
        let items = extraction.metadata[INTERVENING_GUARDRAILS].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["action"], json!("INTERVENED"));
        assert!(items[0].get("metadata").is_none());
        assert!(!extraction.metadata.contains_key(NON_INTERVENING_GUARDRAILS));
    }

    #[test]
    fn test_non_intervening_assessment() {
        for action in ["NONE", "", "intervened"] {
            let extraction = extract(&json!({"action": action}));
            assert!(extraction.metadata.contains_key(NON_INTERVENING_GUARDRAILS));
            assert!(!extraction.metadata.contains_key(INTERVENING_GUARDRAILS));
        }
        let extraction = extract(&json!({}));
        assert!(extraction.metadata.contains_key(NON_INTERVENING_GUARDRAILS));
    }
}
