//! In-memory span sink
//!
//! `RecordingSink` keeps every finished span in memory in the order it ended.
//! It backs the test suite and is handy for inspecting a reconstructed trace
//! without an exporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::semconv::SpanKind;
use super::sink::{AttributeValue, Attributes, SpanHandle, SpanSink, SpanStart, SpanStatus};
use crate::utils::time::now_nanos;

/// A span as the recording sink saw it
#[derive(Debug, Clone)]
pub struct RecordedSpan {
    /// Unique span ID
    pub span_id: String,
    /// Parent span ID (if this is a child span)
    pub parent_span_id: Option<String>,
    /// Span name
    pub name: String,
    /// OpenInference span kind
    pub kind: SpanKind,
    /// Start time the emitter asked for, if any
    pub requested_start: Option<u64>,
    /// End time the emitter asked for, if any
    pub requested_end: Option<u64>,
    /// Effective start time in nanoseconds since Unix epoch
    pub start_time_unix_nano: u64,
    /// Effective end time in nanoseconds since Unix epoch
    pub end_time_unix_nano: u64,
    /// Span attributes
    pub attributes: Attributes,
    /// Span status
    pub status: SpanStatus,
    /// Order in which the span was started
    pub start_order: u64,
}

impl RecordedSpan {
    /// Look up an attribute
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Look up a string attribute
    pub fn str_attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(AttributeValue::as_str)
    }
}

/// Span sink that records finished spans in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    finished: Arc<Mutex<Vec<RecordedSpan>>>,
    span_counter: Arc<AtomicU64>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All finished spans, in the order they ended
    pub fn spans(&self) -> Vec<RecordedSpan> {
        self.finished
            .lock()
            .map(|spans| spans.clone())
            .unwrap_or_default()
    }

    /// All finished spans, in the order they were started
    pub fn spans_in_start_order(&self) -> Vec<RecordedSpan> {
        let mut spans = self.spans();
        spans.sort_by_key(|s| s.start_order);
        spans
    }

    /// First finished span with the given name, in start order
    pub fn find(&self, name: &str) -> Option<RecordedSpan> {
        self.spans_in_start_order()
            .into_iter()
            .find(|s| s.name == name)
    }

    /// Spans without a parent
    pub fn roots(&self) -> Vec<RecordedSpan> {
        self.spans_in_start_order()
            .into_iter()
            .filter(|s| s.parent_span_id.is_none())
            .collect()
    }

    /// Direct children of a span, in start order
    pub fn children_of(&self, span_id: &str) -> Vec<RecordedSpan> {
        self.spans_in_start_order()
            .into_iter()
            .filter(|s| s.parent_span_id.as_deref() == Some(span_id))
            .collect()
    }

    /// Drop all recorded spans
    pub fn clear(&self) {
        if let Ok(mut spans) = self.finished.lock() {
            spans.clear();
        }
    }
}

impl SpanSink for RecordingSink {
    type Handle = RecordingSpan;

    fn start_span(
        &self,
        name: &str,
        start: SpanStart,
        parent: Option<&Self::Handle>,
    ) -> Self::Handle {
        let start_order = self.span_counter.fetch_add(1, Ordering::Relaxed);
        RecordingSpan {
            data: RecordedSpan {
                span_id: Uuid::new_v4().simple().to_string(),
                parent_span_id: parent.map(|p| p.data.span_id.clone()),
                name: name.to_string(),
                kind: start.kind,
                requested_start: start.start_time_unix_nano,
                requested_end: None,
                start_time_unix_nano: start.start_time_unix_nano.unwrap_or_else(now_nanos),
                end_time_unix_nano: 0,
                attributes: start.attributes,
                status: SpanStatus::Unset,
                start_order,
            },
            finished: Arc::clone(&self.finished),
        }
    }
}

/// Open span handed out by [`RecordingSink`]
#[derive(Debug)]
pub struct RecordingSpan {
    data: RecordedSpan,
    finished: Arc<Mutex<Vec<RecordedSpan>>>,
}

impl RecordingSpan {
    /// Get the span ID
    pub fn span_id(&self) -> &str {
        &self.data.span_id
    }
}

impl SpanHandle for RecordingSpan {
    fn set_attributes(&mut self, attributes: Attributes) {
        self.data.attributes.extend(attributes);
    }

    fn set_status(&mut self, status: SpanStatus) {
        self.data.status = status;
    }

    fn end(mut self, end_time_unix_nano: Option<u64>) {
        self.data.requested_end = end_time_unix_nano;
        self.data.end_time_unix_nano = end_time_unix_nano
            .unwrap_or_else(now_nanos)
            .max(self.data.start_time_unix_nano);
        match self.finished.lock() {
            Ok(mut spans) => spans.push(self.data),
            Err(e) => tracing::warn!("Recording sink lock poisoned, dropping span: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_linkage_and_order() {
        let sink = RecordingSink::new();
        let root = sink.start_span("root", SpanStart::default(), None);
        let child = sink.start_span("child", SpanStart::default(), Some(&root));
        let child_id = child.span_id().to_string();
        child.end(None);
        root.end(None);

        let spans = sink.spans();
        assert_eq!(spans[0].span_id, child_id);
        assert_eq!(spans[1].name, "root");
        assert_eq!(spans[0].parent_span_id.as_deref(), Some(spans[1].span_id.as_str()));
        assert_eq!(sink.roots().len(), 1);
        assert_eq!(sink.children_of(&spans[1].span_id).len(), 1);
    }

    #[test]
    fn test_explicit_times_are_kept() {
        let sink = RecordingSink::new();
        let start = SpanStart {
            start_time_unix_nano: Some(1_000),
            ..SpanStart::default()
        };
        let mut span = sink.start_span("timed", start, None);
        span.set_attributes(Attributes::from([("k".to_string(), AttributeValue::from("v"))]));
        span.end(Some(2_000));

        let recorded = sink.find("timed").unwrap();
        assert_eq!(recorded.requested_start, Some(1_000));
        assert_eq!(recorded.requested_end, Some(2_000));
        assert_eq!(recorded.end_time_unix_nano, 2_000);
        assert_eq!(recorded.str_attribute("k"), Some("v"));
    }

    #[test]
    fn test_sink_clock_applies_when_no_time_given() {
        let sink = RecordingSink::new();
        let before = now_nanos();
        let span = sink.start_span("untimed", SpanStart::default(), None);
        span.end(None);

        let recorded = sink.find("untimed").unwrap();
        assert!(recorded.requested_start.is_none());
        assert!(recorded.start_time_unix_nano >= before);
        assert!(recorded.end_time_unix_nano >= recorded.start_time_unix_nano);
        assert!(recorded.end_time_unix_nano <= now_nanos());
    }
}
