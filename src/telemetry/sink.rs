//! Span sink traits and shared span value types
//!
//! This module defines the `SpanSink` / `SpanHandle` contract the emitter talks
//! to. The sink owns span creation, storage, and export; the emitter only ever
//! starts spans, sets attributes and status, and ends them. It never reads a
//! span back.

use std::collections::BTreeMap;

use super::semconv::SpanKind;

/// Ordered attribute map
///
/// A `BTreeMap` keeps iteration order stable so repeated extraction of the
/// same payload yields byte-identical output.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Status of a span
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SpanStatus {
    /// Unset status
    #[default]
    Unset,
    /// Operation completed successfully
    Ok,
    /// Operation failed with an error
    Error { message: String },
}

impl SpanStatus {
    /// Create an error status
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Check whether this status is an error
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Value of a span attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// String value
    String(String),
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
}

impl AttributeValue {
    /// Borrow the value as a string, if it is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer, if it is one
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::String(s) => write!(f, "{}", s),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Int(i)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Float(f)
    }
}

/// Everything the sink needs to open a span
#[derive(Debug, Clone, Default)]
pub struct SpanStart {
    /// OpenInference span kind
    pub kind: SpanKind,
    /// Attributes known when the span opens
    pub attributes: Attributes,
    /// Explicit start time in nanoseconds since Unix epoch; `None` lets the
    /// sink apply its own clock
    pub start_time_unix_nano: Option<u64>,
}

/// Trait for the tracer the emitter writes spans into
///
/// Implementations handle span creation, parent linkage, and export. The
/// emitter calls a sink sequentially from one thread and always ends child
/// spans before their parent.
///
/// # Example
///
/// ```
/// use bedrock_agent_trace::telemetry::{RecordingSink, SpanHandle, SpanSink, SpanStart, SpanStatus};
///
/// let sink = RecordingSink::new();
/// let mut root = sink.start_span("root", SpanStart::default(), None);
/// let child = sink.start_span("child", SpanStart::default(), Some(&root));
/// child.end(None);
/// root.set_status(SpanStatus::Ok);
/// root.end(None);
///
/// assert_eq!(sink.spans().len(), 2);
/// ```
pub trait SpanSink {
    /// Handle for an open span
    type Handle: SpanHandle;

    /// Open a span, optionally as a child of `parent`
    fn start_span(&self, name: &str, start: SpanStart, parent: Option<&Self::Handle>)
        -> Self::Handle;
}

/// An open span
pub trait SpanHandle {
    /// Add or overwrite attributes on the span
    fn set_attributes(&mut self, attributes: Attributes);

    /// Set the span status
    fn set_status(&mut self, status: SpanStatus);

    /// End the span, at `end_time_unix_nano` if given
    fn end(self, end_time_unix_nano: Option<u64>)
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_value_conversions() {
        assert_eq!(AttributeValue::from("x"), AttributeValue::String("x".into()));
        assert_eq!(AttributeValue::from(5_i64).as_int(), Some(5));
        assert_eq!(AttributeValue::from(true).as_str(), None);
        assert_eq!(AttributeValue::Float(1.5).to_string(), "1.5");
    }

    #[test]
    fn test_status_helpers() {
        assert!(SpanStatus::error("boom").is_error());
        assert!(!SpanStatus::Ok.is_error());
        assert_eq!(SpanStatus::default(), SpanStatus::Unset);
    }
}
