use serde_json::Value;

use super::{text_field, Extraction};

/// The model's reasoning for the next step, recorded as the step's output
pub(super) fn extract(payload: &Value) -> Extraction {
    let mut extraction = Extraction::default();
    if let Some(text) = text_field(Some(payload)) {
        extraction.set_output_value(&text);
        extraction.set_metadata("rationale", text);
    }
    extraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::semconv::attrs;
    use serde_json::json;

    #[test]
    fn test_rationale_text() {
        let extraction = extract(&json!({"text": "I should call the flights agent", "traceId": "t-0"}));
        assert_eq!(
            extraction.output[attrs::OUTPUT_VALUE].as_str(),
            Some("I should call the flights agent")
        );
        assert_eq!(extraction.span_kind, None);
        assert!(extract(&json!({"text": ""})).output.is_empty());
    }
}
