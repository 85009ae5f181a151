//! Reconstruct Amazon Bedrock agent trace fragments into OpenInference span trees.
//!
//! A Bedrock agent run streams a flat sequence of trace fragments: model
//! invocation inputs and outputs, action group calls, knowledge base lookups,
//! guardrail verdicts, sub-agent delegations, failures. This crate classifies
//! each fragment, extracts OpenInference attributes from it, rebuilds the
//! run's call hierarchy, and emits it as nested spans through any tracer.
//!
//! # Quick Start
//!
//! ```
//! use bedrock_agent_trace::telemetry::RecordingSink;
//! use bedrock_agent_trace::{AgentTraceProcessor, RawFragment, TraceConfig};
//! use serde_json::json;
//!
//! let processor = AgentTraceProcessor::new(TraceConfig::default());
//! let sink = RecordingSink::new();
//!
//! let fragments = vec![
//!     RawFragment::new(json!({"orchestrationTrace": {"modelInvocationInput": {
//!         "traceId": "abc-0",
//!         "text": "What is the capital of France?"
//!     }}})),
//!     RawFragment::new(json!({"orchestrationTrace": {"modelInvocationOutput": {
//!         "traceId": "abc-0",
//!         "metadata": {"usage": {"inputTokens": 12, "outputTokens": 3}},
//!         "rawResponse": {"content": "Paris"}
//!     }}})),
//! ];
//!
//! let root = processor.process(&sink, fragments);
//! assert_eq!(root.name, "bedrock_agent.invoke_agent");
//! assert!(sink.find("LLM").is_some());
//! ```
//!
//! # Exporting to OpenTelemetry
//!
//! [`telemetry::OtelSink`] writes spans into any `opentelemetry` tracer. The
//! OpenInference span kind is carried in the `openinference.span.kind`
//! attribute so backends such as Phoenix render LLM, tool and retrieval views.
//!
//! ```no_run
//! use bedrock_agent_trace::telemetry::OtelSink;
//! use bedrock_agent_trace::{AgentTraceProcessor, TraceConfig};
//!
//! # fn main() -> bedrock_agent_trace::Result<()> {
//! let config = TraceConfig::from_env()?;
//! let sink = OtelSink::global(config.tracer_name.clone());
//! let processor = AgentTraceProcessor::new(config);
//!
//! let lines = std::fs::read_to_string("trace.jsonl").unwrap_or_default();
//! processor.process_json_lines(&sink, &lines)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Pipeline
//!
//! - [`fragment`] - raw records, event envelopes, classification
//! - [`extract`] - per-chunk OpenInference attribute extraction
//! - [`tree`] - hierarchy reconstruction from the flat stream
//! - [`emit`] - naming, bubbling, timing, status and span lifecycle
//! - [`telemetry`] - the span sink contract, its OpenTelemetry and in-memory
//!   implementations, and logging setup
//! - [`config`] - masking, naming and logging configuration
//!
//! Unknown fragment shapes never abort a run. They are passed through as
//! generic spans and logged at `debug` level.

pub mod config;
pub mod emit;
pub mod error;
pub mod extract;
pub mod fragment;
pub mod telemetry;
pub mod tree;
pub mod utils;

pub use config::TraceConfig;
pub use emit::{EmittedSpan, SpanEmitter};
pub use error::TraceError;
pub use extract::{extract, AttributeSet, Extraction};
pub use fragment::{classify, ChunkType, ClassifiedFragment, Envelope, EventType, RawFragment};
pub use tree::{build, NodeType, TraceNode, TraceTree, TraceTreeBuilder};

use telemetry::SpanSink;

pub type Result<T> = std::result::Result<T, TraceError>;

/// Classifies, reconstructs and emits one agent run at a time
#[derive(Debug, Clone, Default)]
pub struct AgentTraceProcessor {
    config: TraceConfig,
}

impl AgentTraceProcessor {
    pub fn new(config: TraceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Classify and reconstruct a run without emitting it
    pub fn build_tree<I>(&self, fragments: I) -> TraceTree
    where
        I: IntoIterator<Item = RawFragment>,
    {
        let tree = build(fragments.into_iter().map(|raw| classify(&raw)));
        for diagnostic in &tree.diagnostics {
            tracing::warn!("Trace reconstruction: {}", diagnostic);
        }
        tracing::debug!(
            "Reconstructed trace tree with {} nodes",
            tree.root.node_count()
        );
        tree
    }

    /// Emit one run's fragments through `sink`
    pub fn process<S, I>(&self, sink: &S, fragments: I) -> EmittedSpan
    where
        S: SpanSink,
        I: IntoIterator<Item = RawFragment>,
    {
        let tree = self.build_tree(fragments);
        SpanEmitter::new(&self.config).emit(&tree, sink)
    }

    /// Emit a run recorded as one JSON record per line
    pub fn process_json_lines<S: SpanSink>(&self, sink: &S, text: &str) -> Result<EmittedSpan> {
        let fragments = RawFragment::from_json_lines(text)?;
        Ok(self.process(sink, fragments))
    }

    /// Emit a run given as a JSON array of records or a single record
    pub fn process_json<S: SpanSink>(&self, sink: &S, text: &str) -> Result<EmittedSpan> {
        let fragments = RawFragment::from_json_str(text)?;
        Ok(self.process(sink, fragments))
    }
}
