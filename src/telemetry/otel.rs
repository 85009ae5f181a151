//! OpenTelemetry span sink
//!
//! Adapts any OpenTelemetry [`Tracer`] to the [`SpanSink`] contract. The
//! OpenInference span kind travels as the `openinference.span.kind` attribute;
//! the OpenTelemetry span kind is always `Internal`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{SpanKind as OtelSpanKind, Status, TraceContextExt, Tracer},
    Context, KeyValue, Value,
};

use super::semconv::attrs;
use super::sink::{AttributeValue, Attributes, SpanHandle, SpanSink, SpanStart, SpanStatus};

impl From<AttributeValue> for Value {
    fn from(value: AttributeValue) -> Self {
        match value {
            AttributeValue::String(s) => Value::String(s.into()),
            AttributeValue::Bool(b) => Value::Bool(b),
            AttributeValue::Int(i) => Value::I64(i),
            AttributeValue::Float(f) => Value::F64(f),
        }
    }
}

fn to_key_values(attributes: Attributes) -> Vec<KeyValue> {
    attributes
        .into_iter()
        .map(|(key, value)| KeyValue::new(key, Value::from(value)))
        .collect()
}

fn to_system_time(nanos: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(nanos)
}

/// Span sink backed by an OpenTelemetry tracer
#[derive(Debug)]
pub struct OtelSink<T = BoxedTracer> {
    tracer: T,
}

impl OtelSink<BoxedTracer> {
    /// Use the globally installed tracer provider
    pub fn global(tracer_name: impl Into<std::borrow::Cow<'static, str>>) -> Self {
        Self {
            tracer: global::tracer(tracer_name),
        }
    }
}

impl<T> OtelSink<T>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    pub fn new(tracer: T) -> Self {
        Self { tracer }
    }
}

impl<T> SpanSink for OtelSink<T>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    type Handle = OtelSpanHandle;

    fn start_span(
        &self,
        name: &str,
        start: SpanStart,
        parent: Option<&Self::Handle>,
    ) -> Self::Handle {
        let parent_cx = parent
            .map(|p| p.cx.clone())
            .unwrap_or_else(Context::current);

        let mut attributes = to_key_values(start.attributes);
        attributes.push(KeyValue::new(attrs::SPAN_KIND, start.kind.as_str()));

        let mut builder = self
            .tracer
            .span_builder(name.to_string())
            .with_kind(OtelSpanKind::Internal)
            .with_attributes(attributes);
        if let Some(nanos) = start.start_time_unix_nano {
            builder = builder.with_start_time(to_system_time(nanos));
        }

        let span = self.tracer.build_with_context(builder, &parent_cx);
        OtelSpanHandle {
            cx: parent_cx.with_span(span),
        }
    }
}

/// Open span handed out by [`OtelSink`]
///
/// Holds the span inside its [`Context`] so children can be parented to it.
#[derive(Debug)]
pub struct OtelSpanHandle {
    cx: Context,
}

impl SpanHandle for OtelSpanHandle {
    fn set_attributes(&mut self, attributes: Attributes) {
        let span = self.cx.span();
        for kv in to_key_values(attributes) {
            span.set_attribute(kv);
        }
    }

    fn set_status(&mut self, status: SpanStatus) {
        let status = match status {
            SpanStatus::Unset => Status::Unset,
            SpanStatus::Ok => Status::Ok,
            SpanStatus::Error { message } => Status::error(message),
        };
        self.cx.span().set_status(status);
    }

    fn end(self, end_time_unix_nano: Option<u64>) {
        let span = self.cx.span();
        match end_time_unix_nano {
            Some(nanos) => span.end_with_timestamp(to_system_time(nanos)),
            None => span.end(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_value_to_otel_value() {
        assert_eq!(
            Value::from(AttributeValue::String("a".into())),
            Value::String("a".into())
        );
        assert_eq!(Value::from(AttributeValue::Int(3)), Value::I64(3));
        assert_eq!(Value::from(AttributeValue::Bool(true)), Value::Bool(true));
    }

    #[test]
    fn test_to_system_time() {
        let t = to_system_time(1_500_000_000);
        assert_eq!(
            t.duration_since(UNIX_EPOCH).unwrap(),
            Duration::from_millis(1_500)
        );
    }
}
