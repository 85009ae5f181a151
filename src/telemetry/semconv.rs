//! OpenInference semantic conventions
//!
//! Implements span kinds and attribute names per:
//! <https://github.com/Arize-ai/openinference/blob/main/spec/semantic_conventions.md>
//!
//! These constants ensure attribute names match exactly what OpenInference
//! compatible backends expect. Using incorrect names will cause spans to render
//! as generic spans without their LLM, tool, or retrieval views.

/// OpenInference span kinds
///
/// Maps to the `openinference.span.kind` attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpanKind {
    /// Model invocation
    Llm,
    /// Tool, action group, or code interpreter call
    Tool,
    /// Knowledge base lookup
    Retriever,
    /// Agent run or sub-agent delegation
    Agent,
    /// Generic step, the fallback when nothing more specific applies
    #[default]
    Chain,
    /// Guardrail evaluation
    Guardrail,
}

impl SpanKind {
    /// Get the OpenInference span kind value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "LLM",
            Self::Tool => "TOOL",
            Self::Retriever => "RETRIEVER",
            Self::Agent => "AGENT",
            Self::Chain => "CHAIN",
            Self::Guardrail => "GUARDRAIL",
        }
    }
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Placeholder written in place of masked values
pub const REDACTED_VALUE: &str = "__REDACTED__";

/// MIME types for `input.mime_type` / `output.mime_type`
pub mod mime {
    pub const TEXT: &str = "text/plain";
    pub const JSON: &str = "application/json";
}

/// OpenInference attribute names
pub mod attrs {
    // ========================================================================
    // Span classification
    // ========================================================================

    /// The OpenInference span kind (LLM, TOOL, RETRIEVER, AGENT, CHAIN, GUARDRAIL)
    pub const SPAN_KIND: &str = "openinference.span.kind";

    // ========================================================================
    // Input / output
    // ========================================================================

    pub const INPUT_VALUE: &str = "input.value";
    pub const INPUT_MIME_TYPE: &str = "input.mime_type";
    pub const OUTPUT_VALUE: &str = "output.value";
    pub const OUTPUT_MIME_TYPE: &str = "output.mime_type";

    // ========================================================================
    // LLM attributes
    // ========================================================================

    pub const LLM_MODEL_NAME: &str = "llm.model_name";
    pub const LLM_PROVIDER: &str = "llm.provider";
    pub const LLM_SYSTEM: &str = "llm.system";
    pub const LLM_INVOCATION_PARAMETERS: &str = "llm.invocation_parameters";

    /// Prefix for indexed input messages (`llm.input_messages.{i}.message.*`)
    pub const LLM_INPUT_MESSAGES: &str = "llm.input_messages";

    /// Prefix for indexed output messages (`llm.output_messages.{i}.message.*`)
    pub const LLM_OUTPUT_MESSAGES: &str = "llm.output_messages";

    pub const MESSAGE_ROLE: &str = "message.role";
    pub const MESSAGE_CONTENT: &str = "message.content";

    pub const LLM_TOKEN_COUNT_PROMPT: &str = "llm.token_count.prompt";
    pub const LLM_TOKEN_COUNT_COMPLETION: &str = "llm.token_count.completion";
    pub const LLM_TOKEN_COUNT_TOTAL: &str = "llm.token_count.total";

    // ========================================================================
    // Tool attributes
    // ========================================================================

    pub const TOOL_NAME: &str = "tool.name";
    pub const TOOL_DESCRIPTION: &str = "tool.description";
    pub const TOOL_PARAMETERS: &str = "tool.parameters";
    pub const TOOL_CALL_FUNCTION_NAME: &str = "tool_call.function.name";
    pub const TOOL_CALL_FUNCTION_ARGUMENTS: &str = "tool_call.function.arguments";

    // ========================================================================
    // Retrieval attributes
    // ========================================================================

    /// Prefix for indexed documents (`retrieval.documents.{i}.document.*`)
    pub const RETRIEVAL_DOCUMENTS: &str = "retrieval.documents";

    pub const DOCUMENT_ID: &str = "document.id";
    pub const DOCUMENT_CONTENT: &str = "document.content";
    pub const DOCUMENT_SCORE: &str = "document.score";
    pub const DOCUMENT_METADATA: &str = "document.metadata";

    // ========================================================================
    // Context attributes
    // ========================================================================

    pub const METADATA: &str = "metadata";
    pub const SESSION_ID: &str = "session.id";
    pub const AGENT_NAME: &str = "agent.name";
}

/// Build `llm.input_messages.{index}.message.{field}` style keys
pub fn message_key(prefix: &str, index: usize, field: &str) -> String {
    format!("{}.{}.{}", prefix, index, field)
}

/// Build `retrieval.documents.{index}.document.{field}` style keys
pub fn document_key(index: usize, field: &str) -> String {
    format!("{}.{}.{}", attrs::RETRIEVAL_DOCUMENTS, index, field)
}
