//! Runtime failures

use serde_json::Value;

use super::Extraction;
use crate::telemetry::SpanKind;
use crate::utils::json::opt_text_of;

pub const FAILURE_SPAN_NAME: &str = "Failure";

/// Readable failure text from whichever of code and reason are present
pub fn failure_message(payload: &Value) -> Option<String> {
    let code = opt_text_of(payload.get("failureCode")).filter(|s| !s.is_empty());
    let reason = opt_text_of(payload.get("failureReason")).filter(|s| !s.is_empty());

    let lines: Vec<String> = [
        code.map(|c| format!("Failure Code: {}", c)),
        reason.map(|r| format!("Failure Reason: {}", r)),
    ]
    .into_iter()
    .flatten()
    .collect();

    (!lines.is_empty()).then(|| lines.join("\n"))
}

pub(super) fn extract(payload: &Value) -> Extraction {
    let mut extraction = Extraction::new(SpanKind::Chain, FAILURE_SPAN_NAME);
    if let Some(message) = failure_message(payload) {
        extraction.set_output_value(&message);
    }
    extraction
}
