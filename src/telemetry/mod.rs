//! Span sinks, OpenInference conventions, and logging.
//!
//! The emitter never talks to an exporter directly. It writes through the
//! [`SpanSink`] contract, which has two implementations here:
//!
//! - [`OtelSink`] - forwards spans to any OpenTelemetry tracer
//! - [`RecordingSink`] - keeps finished spans in memory for inspection and tests
//!
//! # Key Types
//!
//! - [`SpanSink`] / [`SpanHandle`] - the start / set attributes / set status / end contract
//! - [`AttributeValue`] - typed attribute values
//! - [`SpanKind`] - OpenInference span kinds
//! - [`semconv::attrs`] - attribute key registry

pub mod logging;
pub mod otel;
pub mod recording;
pub mod semconv;
pub mod sink;

pub use logging::{init_logging, LogLevel, LoggingConfig};
pub use otel::{OtelSink, OtelSpanHandle};
pub use recording::{RecordedSpan, RecordingSink, RecordingSpan};
pub use semconv::SpanKind;
pub use sink::{AttributeValue, Attributes, SpanHandle, SpanSink, SpanStart, SpanStatus};
