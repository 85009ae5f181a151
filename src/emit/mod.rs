//! Span emission
//!
//! Turns a [`TraceTree`] into span-sink calls in two passes:
//!
//! 1. **Resolve** (bottom-up) - name and kind, merged attributes, input/output
//!    bubbling into containers, timing reconciliation, status.
//! 2. **Emit** (depth-first) - each span is started before its children and
//!    ended after all of them, so nesting is correct at any depth.
//!
//! Request-side attributes are passed when a span starts; output attributes
//! and the serialized `metadata` attribute are set just before it ends.

use serde_json::{Map, Value};

use crate::config::TraceConfig;
use crate::extract::{
    collaborator_span_name, extract, failure_message, timing, AttributeSet, Extraction,
    FAILURE_SPAN_NAME, GUARDRAIL_SPAN_NAME,
};
use crate::fragment::{Envelope, EventType};
use crate::telemetry::semconv::{attrs, mime};
use crate::telemetry::{
    AttributeValue, Attributes, SpanHandle, SpanKind, SpanSink, SpanStart, SpanStatus,
};
use crate::tree::{Container, NodeType, TraceNode, TraceTree};
use crate::utils::json::{as_integer, parse_structured, serialize_bounded};
use crate::utils::time::to_unix_nanos;

const GUARDRAIL_INTERVENED: &str = "Guardrail intervened";

/// A span as handed to the sink, with its emitted children
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedSpan {
    pub name: String,
    pub kind: SpanKind,
    /// Every attribute set on the span, including `metadata`
    pub attributes: Attributes,
    /// The serialized `metadata` attribute
    pub metadata: Option<String>,
    pub start_time_unix_nano: Option<u64>,
    pub end_time_unix_nano: Option<u64>,
    pub status: SpanStatus,
    pub children: Vec<EmittedSpan>,
}

impl EmittedSpan {
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn str_attribute(&self, key: &str) -> Option<&str> {
        self.attribute(key).and_then(|v| v.as_str())
    }

    /// First span with this name in pre-order, this one included
    pub fn find(&self, name: &str) -> Option<&EmittedSpan> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// Number of spans in this subtree
    pub fn span_count(&self) -> usize {
        1 + self.children.iter().map(EmittedSpan::span_count).sum::<usize>()
    }
}

/// Earliest start and latest end seen in a subtree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Timing {
    start: Option<u64>,
    end: Option<u64>,
}

impl Timing {
    fn observe_start(&mut self, nanos: u64) {
        self.start = Some(self.start.map_or(nanos, |s| s.min(nanos)));
    }

    fn observe_end(&mut self, nanos: u64) {
        self.end = Some(self.end.map_or(nanos, |e| e.max(nanos)));
    }

    fn absorb(&mut self, other: Timing) {
        if let Some(start) = other.start {
            self.observe_start(start);
        }
        if let Some(end) = other.end {
            self.observe_end(end);
        }
    }

    /// Candidates from one fragment's metadata
    fn from_metadata(metadata: &Map<String, Value>) -> Self {
        let read = |key: &str| metadata.get(key).and_then(to_unix_nanos);
        let start = read(timing::START_TIME);
        let end = read(timing::END_TIME);
        let event = read(timing::EVENT_TIME);
        let total_nanos = metadata
            .get(timing::TOTAL_TIME_MS)
            .and_then(as_integer)
            .and_then(|ms| u64::try_from(ms).ok())
            .map(|ms| ms.saturating_mul(1_000_000));

        let mut result = Timing::default();
        for candidate in [start, event, end.zip(total_nanos).map(|(e, t)| e.saturating_sub(t))]
            .into_iter()
            .flatten()
        {
            result.observe_start(candidate);
        }
        for candidate in [end, event, start.zip(total_nanos).map(|(s, t)| s.saturating_add(t))]
            .into_iter()
            .flatten()
        {
            result.observe_end(candidate);
        }
        result
    }

    /// End never precedes start
    fn clamped(self) -> Self {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end < start => Timing {
                start: Some(start),
                end: Some(start),
            },
            _ => self,
        }
    }
}

/// A node after the resolve pass
#[derive(Debug)]
struct Resolved {
    name: String,
    kind: SpanKind,
    request: Attributes,
    output: Attributes,
    metadata: Map<String, Value>,
    display_input: Option<String>,
    display_output: Option<String>,
    timing: Timing,
    status: SpanStatus,
    children: Vec<Resolved>,
}

fn insert_value(attributes: &mut Attributes, value_key: &str, mime_key: &str, text: &str) {
    let mime_type = if parse_structured(text).is_some() {
        mime::JSON
    } else {
        mime::TEXT
    };
    attributes.insert(value_key.to_string(), text.into());
    attributes.insert(mime_key.to_string(), mime_type.into());
}

/// Emits reconstructed trace trees as spans
#[derive(Debug, Clone, Copy)]
pub struct SpanEmitter<'a> {
    config: &'a TraceConfig,
}

impl<'a> SpanEmitter<'a> {
    pub fn new(config: &'a TraceConfig) -> Self {
        Self { config }
    }

    /// Emit a whole tree through `sink`, returning what was emitted
    pub fn emit<S: SpanSink>(&self, tree: &TraceTree, sink: &S) -> EmittedSpan {
        let resolved = self.resolve(&tree.root, tree.envelope.as_ref());
        self.emit_resolved(resolved, sink, None)
    }

    /// Resolve a tree without emitting it
    pub fn render(&self, tree: &TraceTree) -> EmittedSpan {
        self.finalize(self.resolve(&tree.root, tree.envelope.as_ref()))
    }

    fn resolve(&self, node: &TraceNode, root_envelope: Option<&Envelope>) -> Resolved {
        let children: Vec<Resolved> = node
            .children()
            .iter()
            .map(|child| self.resolve(child, None))
            .collect();

        let extractions: Vec<Extraction> = node.fragments().iter().map(extract).collect();
        let mut timing = Timing::default();
        let mut set = AttributeSet::new();
        for extraction in extractions {
            timing.absorb(Timing::from_metadata(&extraction.metadata));
            set.merge(extraction);
        }
        for child in &children {
            timing.absorb(child.timing);
        }

        let (name, kind) = self.name_and_kind(node, &set);
        let status = status_of(node, &set);
        let has_input = set.input_value().is_some();
        let has_output = set.output_value().is_some();

        let AttributeSet {
            mut request,
            mut output,
            mut metadata,
            display_input,
            display_output,
            ..
        } = set;

        let display_input =
            display_input.or_else(|| children.iter().find_map(|c| c.display_input.clone()));
        let display_output = display_output
            .or_else(|| children.iter().rev().find_map(|c| c.display_output.clone()));

        if let TraceNode::Container(container) = node {
            if !has_input {
                if let Some(text) = &display_input {
                    insert_value(&mut request, attrs::INPUT_VALUE, attrs::INPUT_MIME_TYPE, text);
                }
            }
            if !has_output {
                if let Some(text) = &display_output {
                    insert_value(&mut output, attrs::OUTPUT_VALUE, attrs::OUTPUT_MIME_TYPE, text);
                }
            }
            if container.truncated {
                metadata.insert("truncated".to_string(), Value::Bool(true));
            }
        }

        if let Some(envelope) = root_envelope {
            if let Some(session_id) = &envelope.session_id {
                request.insert(attrs::SESSION_ID.to_string(), session_id.as_str().into());
            }
            for (key, value) in envelope.identity() {
                metadata.entry(key).or_insert(value);
            }
        }

        Resolved {
            name,
            kind,
            request,
            output,
            metadata,
            display_input,
            display_output,
            timing: timing.clamped(),
            status,
            children,
        }
    }

    fn name_and_kind(&self, node: &TraceNode, set: &AttributeSet) -> (String, SpanKind) {
        let container = match node {
            TraceNode::Leaf(chunk) => {
                let name = set.name.clone().unwrap_or_else(|| {
                    chunk
                        .fragments
                        .first()
                        .map(|f| match f.event {
                            EventType::Unknown => f.event.key().to_string(),
                            _ => f.chunk.key().to_string(),
                        })
                        .unwrap_or_else(|| "unknown".to_string())
                });
                return (name, set.span_kind.unwrap_or_default());
            }
            TraceNode::Container(container) => container,
        };

        match container.node_type {
            NodeType::Root => (self.config.root_span_name.clone(), SpanKind::Agent),
            NodeType::AgentCollaborator => (
                collaborator_span_name(container.label.as_deref()),
                SpanKind::Agent,
            ),
            NodeType::Guardrail => (GUARDRAIL_SPAN_NAME.to_string(), SpanKind::Guardrail),
            NodeType::RoutingClassifier => {
                let kind = if container.wraps_collaborator() {
                    SpanKind::Agent
                } else {
                    SpanKind::Llm
                };
                (step_name(container), kind)
            }
            NodeType::PlainStep => (step_name(container), set.span_kind.unwrap_or_default()),
        }
    }

    /// Apply masking and serialize metadata
    fn finalize(&self, resolved: Resolved) -> EmittedSpan {
        let Resolved {
            name,
            kind,
            request,
            output,
            metadata,
            timing,
            status,
            children,
            ..
        } = resolved;
        let (request, output) = self.finish_attributes(request, output, metadata);

        let mut attributes = request;
        attributes.extend(output);
        let metadata = attributes
            .get(attrs::METADATA)
            .and_then(|v| v.as_str())
            .map(str::to_string);

        EmittedSpan {
            name,
            kind,
            attributes,
            metadata,
            start_time_unix_nano: timing.start,
            end_time_unix_nano: timing.end,
            status,
            children: children
                .into_iter()
                .map(|child| self.finalize(child))
                .collect(),
        }
    }

    fn finish_attributes(
        &self,
        mut request: Attributes,
        mut output: Attributes,
        metadata: Map<String, Value>,
    ) -> (Attributes, Attributes) {
        self.config.mask(&mut request);
        self.config.mask(&mut output);
        if !metadata.is_empty() {
            match serialize_bounded(metadata, self.config.max_metadata_bytes) {
                Some(bounded) => {
                    output.insert(attrs::METADATA.to_string(), bounded.into());
                }
                None => tracing::debug!(
                    "Metadata does not fit in {} bytes, omitting it",
                    self.config.max_metadata_bytes
                ),
            }
        }
        (request, output)
    }

    fn emit_resolved<S: SpanSink>(
        &self,
        resolved: Resolved,
        sink: &S,
        parent: Option<&S::Handle>,
    ) -> EmittedSpan {
        let Resolved {
            name,
            kind,
            request,
            output,
            metadata,
            timing,
            status,
            children,
            ..
        } = resolved;
        let (request, output) = self.finish_attributes(request, output, metadata);

        tracing::trace!("Starting span {} ({})", name, kind);
        let mut handle = sink.start_span(
            &name,
            SpanStart {
                kind,
                attributes: request.clone(),
                start_time_unix_nano: timing.start,
            },
            parent,
        );

        let children: Vec<EmittedSpan> = children
            .into_iter()
            .map(|child| self.emit_resolved(child, sink, Some(&handle)))
            .collect();

        if !output.is_empty() {
            handle.set_attributes(output.clone());
        }
        handle.set_status(status.clone());
        handle.end(timing.end);

        let mut attributes = request;
        attributes.extend(output);
        let metadata = attributes
            .get(attrs::METADATA)
            .and_then(|v| v.as_str())
            .map(str::to_string);

        EmittedSpan {
            name,
            kind,
            attributes,
            metadata,
            start_time_unix_nano: timing.start,
            end_time_unix_nano: timing.end,
            status,
            children,
        }
    }
}

fn step_name(container: &Container) -> String {
    container
        .label
        .clone()
        .unwrap_or_else(|| container.node_type.to_string())
}

fn status_of(node: &TraceNode, set: &AttributeSet) -> SpanStatus {
    match node {
        TraceNode::Leaf(chunk) if chunk.is_failure() => {
            let message = chunk
                .fragments
                .iter()
                .find(|f| f.event == EventType::Failure)
                .and_then(|f| failure_message(&f.payload))
                .unwrap_or_else(|| FAILURE_SPAN_NAME.to_string());
            SpanStatus::error(message)
        }
        TraceNode::Container(container)
            if container.node_type == NodeType::Guardrail && set.has_intervention() =>
        {
            SpanStatus::error(GUARDRAIL_INTERVENED)
        }
        _ => SpanStatus::Ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{classify, RawFragment};
    use crate::telemetry::RecordingSink;
    use crate::tree::build;
    use serde_json::json;

    fn tree_of(traces: Vec<Value>) -> TraceTree {
        build(traces.iter().map(|t| classify(&RawFragment::new(t.clone()))))
    }

    fn render(traces: Vec<Value>) -> EmittedSpan {
        SpanEmitter::new(&TraceConfig::default()).render(&tree_of(traces))
    }

    #[test]
    fn test_scenario_token_counts() {
        let root = render(vec![
            json!({"orchestrationTrace": {"modelInvocationInput": {"traceId": "t-0", "text": "hi"}}}),
            json!({"orchestrationTrace": {"modelInvocationOutput": {
                "traceId": "t-0",
                "metadata": {"usage": {"inputTokens": 10, "outputTokens": 5}}
            }}}),
        ]);
        let llm = root.find("LLM").unwrap();
        assert_eq!(llm.kind, SpanKind::Llm);
        assert_eq!(
            llm.attribute(attrs::LLM_TOKEN_COUNT_PROMPT),
            Some(&AttributeValue::Int(10))
        );
        assert_eq!(
            llm.attribute(attrs::LLM_TOKEN_COUNT_TOTAL),
            Some(&AttributeValue::Int(15))
        );
        assert_eq!(root.span_count(), 3);
    }

    #[test]
    fn test_guardrail_status() {
        let root = render(vec![json!({"guardrailTrace": {"action": "INTERVENED"}})]);
        let guardrail = root.find("Guardrails").unwrap();
        assert_eq!(guardrail.kind, SpanKind::Guardrail);
        assert_eq!(guardrail.status, SpanStatus::error("Guardrail intervened"));

        let root = render(vec![json!({"guardrailTrace": {"action": "NONE"}})]);
        assert_eq!(root.find("Guardrails").unwrap().status, SpanStatus::Ok);
    }

    #[test]
    fn test_failure_span() {
        let root = render(vec![json!({"failureTrace": {
            "failureCode": "500",
            "failureReason": "timeout"
        }})]);
        let failure = root.find("Failure").unwrap();
        assert_eq!(failure.kind, SpanKind::Chain);
        assert_eq!(
            failure.str_attribute(attrs::OUTPUT_VALUE),
            Some("Failure Code: 500\nFailure Reason: timeout")
        );
        assert!(failure.status.is_error());
        assert_eq!(root.status, SpanStatus::Ok);
    }

    #[test]
    fn test_input_bubbles_into_pure_container() {
        let mut container = Container::new(NodeType::AgentCollaborator, "c", None, None);
        container.children.push(TraceNode::Leaf(crate::tree::ChunkSpan::new(classify(
            &RawFragment::new(json!({"orchestrationTrace": {"modelInvocationInput": {
                "text": "{\"messages\": [{\"role\": \"user\", \"content\": \"hi\"}]}"
            }}})),
        ))));
        let tree = TraceTree {
            root: TraceNode::Container(container),
            envelope: None,
            diagnostics: vec![],
        };
        let span = SpanEmitter::new(&TraceConfig::default()).render(&tree);
        assert_eq!(span.kind, SpanKind::Agent);
        assert_eq!(span.str_attribute(attrs::INPUT_VALUE), Some("hi"));
    }

    #[test]
    fn test_output_bubbles_from_last_child() {
        let root = render(vec![
            json!({"orchestrationTrace": {"modelInvocationOutput": {
                "traceId": "a-0", "rawResponse": {"content": "first"}
            }}}),
            json!({"orchestrationTrace": {"modelInvocationOutput": {
                "traceId": "a-1", "rawResponse": {"content": "second"}
            }}}),
        ]);
        assert_eq!(root.str_attribute(attrs::OUTPUT_VALUE), Some("second"));
        let step = &root.children[0];
        assert_eq!(step.str_attribute(attrs::OUTPUT_VALUE), Some("second"));
    }

    #[test]
    fn test_output_bubbling_skips_silent_last_child() {
        let root = render(vec![
            json!({"orchestrationTrace": {"modelInvocationOutput": {
                "traceId": "a-0", "rawResponse": {"content": "first"}
            }}}),
            json!({"orchestrationTrace": {"invocationInput": {
                "traceId": "a-1",
                "invocationType": "ACTION_GROUP",
                "actionGroupInvocationInput": {"actionGroupName": "flights", "function": "search"}
            }}}),
        ]);
        let step = &root.children[0];
        assert_eq!(step.children.len(), 2);
        assert!(step.children[1].str_attribute(attrs::OUTPUT_VALUE).is_none());
        assert_eq!(step.str_attribute(attrs::OUTPUT_VALUE), Some("first"));
        assert_eq!(root.str_attribute(attrs::OUTPUT_VALUE), Some("first"));
    }

    #[test]
    fn test_step_own_output_wins_over_children() {
        let root = render(vec![
            json!({"orchestrationTrace": {"rationale": {"traceId": "t-0", "text": "look it up"}}}),
            json!({"orchestrationTrace": {"modelInvocationOutput": {
                "traceId": "t-0", "rawResponse": {"content": "answer"}
            }}}),
        ]);
        let step = &root.children[0];
        assert_eq!(step.str_attribute(attrs::OUTPUT_VALUE), Some("look it up"));
        assert_eq!(root.str_attribute(attrs::OUTPUT_VALUE), Some("answer"));
    }

    #[test]
    fn test_input_bubbles_through_nested_containers() {
        let mut step = Container::new(NodeType::PlainStep, "s", None, Some("s".to_string()));
        step.children.push(TraceNode::Leaf(crate::tree::ChunkSpan::new(classify(
            &RawFragment::new(json!({"orchestrationTrace": {"modelInvocationInput": {
                "text": "{\"messages\": [{\"role\": \"user\", \"content\": \"deep\"}]}"
            }}})),
        ))));
        let mut collaborator = Container::new(NodeType::AgentCollaborator, "c", None, None);
        collaborator.children.push(TraceNode::Container(step));
        let mut root = Container::new(NodeType::Root, "root", None, None);
        root.children.push(TraceNode::Container(collaborator));
        let tree = TraceTree {
            root: TraceNode::Container(root),
            envelope: None,
            diagnostics: vec![],
        };

        let span = SpanEmitter::new(&TraceConfig::default()).render(&tree);
        assert_eq!(span.str_attribute(attrs::INPUT_VALUE), Some("deep"));
        assert_eq!(span.children[0].str_attribute(attrs::INPUT_VALUE), Some("deep"));
        assert_eq!(
            span.children[0].children[0].str_attribute(attrs::INPUT_VALUE),
            Some("deep")
        );
    }

    #[test]
    fn test_timing_from_subtree() {
        let root = render(vec![
            json!({"orchestrationTrace": {"modelInvocationOutput": {"traceId": "t-0", "metadata": {
                "startTime": "2024-01-01T00:00:01Z", "endTime": "2024-01-01T00:00:02Z"
            }}}}),
            json!({"orchestrationTrace": {"modelInvocationOutput": {"traceId": "t-1", "metadata": {
                "startTime": "2024-01-01T00:00:03Z", "totalTimeMs": 2000
            }}}}),
        ]);
        let base: u64 = 1_704_067_200_000_000_000;
        assert_eq!(root.start_time_unix_nano, Some(base + 1_000_000_000));
        assert_eq!(root.end_time_unix_nano, Some(base + 5_000_000_000));
        assert_eq!(root.children[0].children[1].end_time_unix_nano, Some(base + 5_000_000_000));
    }

    #[test]
    fn test_start_only_leaves_end_unset() {
        let root = render(vec![json!({"orchestrationTrace": {"modelInvocationOutput": {
            "traceId": "t-0", "metadata": {"startTime": "2024-01-01T00:00:01Z"}
        }}})]);
        let llm = &root.children[0].children[0];
        assert_eq!(llm.start_time_unix_nano, Some(1_704_067_201_000_000_000));
        assert_eq!(llm.end_time_unix_nano, None);
        assert_eq!(root.end_time_unix_nano, None);
    }

    #[test]
    fn test_end_only_leaves_start_unset() {
        let root = render(vec![json!({"orchestrationTrace": {"modelInvocationOutput": {
            "traceId": "t-0", "metadata": {"endTime": "2024-01-01T00:00:02Z"}
        }}})]);
        let llm = &root.children[0].children[0];
        assert_eq!(llm.start_time_unix_nano, None);
        assert_eq!(llm.end_time_unix_nano, Some(1_704_067_202_000_000_000));
        assert_eq!(root.start_time_unix_nano, None);
    }

    #[test]
    fn test_no_timing_leaves_times_unset() {
        let root = render(vec![json!({"orchestrationTrace": {"rationale": {"text": "x"}}})]);
        assert_eq!(root.start_time_unix_nano, None);
        assert_eq!(root.end_time_unix_nano, None);
    }

    #[test]
    fn test_unknown_fragment_has_no_kind_specific_attributes() {
        let root = render(vec![json!({"brandNewTrace": {"x": 1}})]);
        let leaf = &root.children[0];
        assert_eq!(leaf.name, "unknownTrace");
        assert_eq!(leaf.kind, SpanKind::Chain);
        assert!(leaf.attributes.is_empty());
    }

    #[test]
    fn test_metadata_bounded_stays_valid_json() {
        let config = TraceConfig {
            max_metadata_bytes: 64,
            ..Default::default()
        };
        let tree = tree_of(vec![json!({"guardrailTrace": {
            "action": "NONE",
            "extra": "x".repeat(64),
            "metadata": {"startTime": "2024-01-01T00:00:00Z"}
        }})]);
        let root = SpanEmitter::new(&config).render(&tree);
        let metadata = root.children[0].metadata.as_deref().unwrap();
        assert!(metadata.len() <= 64);

        let parsed: Value = serde_json::from_str(metadata).unwrap();
        assert_eq!(parsed["metadata_truncated"], json!(true));
        assert_eq!(parsed["start_time"], json!("2024-01-01T00:00:00Z"));
        assert!(parsed.get("non_intervening_guardrails").is_none());
    }

    #[test]
    fn test_emit_through_sink_orders_spans() {
        let sink = RecordingSink::new();
        let tree = tree_of(vec![
            json!({"orchestrationTrace": {"modelInvocationInput": {"traceId": "t-0", "text": "q"}}}),
            json!({"orchestrationTrace": {"modelInvocationOutput": {"traceId": "t-0"}}}),
        ]);
        let emitted = SpanEmitter::new(&TraceConfig::default()).emit(&tree, &sink);

        let ended: Vec<String> = sink.spans().into_iter().map(|s| s.name).collect();
        assert_eq!(ended, vec!["LLM", "orchestrationTrace", "bedrock_agent.invoke_agent"]);
        let started: Vec<String> = sink
            .spans_in_start_order()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(started, vec!["bedrock_agent.invoke_agent", "orchestrationTrace", "LLM"]);
        assert_eq!(emitted.span_count(), 3);

        let root = sink.find("bedrock_agent.invoke_agent").unwrap();
        let step = sink.find("orchestrationTrace").unwrap();
        assert_eq!(step.parent_span_id.as_deref(), Some(root.span_id.as_str()));
    }
}
