//! Trace tree reconstruction
//!
//! Groups a run's classified fragments into leaves ([`ChunkSpan`]) and
//! structural containers whose nesting mirrors the runtime call graph: the
//! run itself, its steps, sub-agent delegations, guardrail evaluations, and
//! routing decisions.
//!
//! ```text
//! root (bedrock_agent.invoke_agent)
//! ├── guardrail
//! ├── plain-step (preProcessingTrace)
//! │   └── LLM
//! ├── plain-step (orchestrationTrace)
//! │   ├── LLM
//! │   ├── agent-collaborator [flights]
//! │   │   └── plain-step (orchestrationTrace)
//! │   │       ├── LLM
//! │   │       └── TOOL
//! │   └── LLM
//! └── guardrail
//! ```

mod builder;

pub use builder::{build, TraceTreeBuilder};

use crate::fragment::{ClassifiedFragment, Envelope, EventType};
use crate::TraceError;

/// Kind of structural container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Root,
    AgentCollaborator,
    Guardrail,
    RoutingClassifier,
    PlainStep,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Root => "root",
            NodeType::AgentCollaborator => "agent-collaborator",
            NodeType::Guardrail => "guardrail",
            NodeType::RoutingClassifier => "routing-classifier",
            NodeType::PlainStep => "plain-step",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered fragments describing one atomic step (a model call, a tool call)
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub fragments: Vec<ClassifiedFragment>,
}

impl ChunkSpan {
    pub fn new(fragment: ClassifiedFragment) -> Self {
        Self {
            fragments: vec![fragment],
        }
    }

    /// Correlation id of the first fragment that has one
    pub fn correlation_id(&self) -> Option<&str> {
        self.fragments
            .iter()
            .find_map(|f| f.correlation_id.as_deref())
    }

    /// Whether this leaf reports a runtime failure
    pub fn is_failure(&self) -> bool {
        self.fragments.iter().any(|f| f.event == EventType::Failure)
    }
}

/// A structural node with its own fragments and ordered children
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub node_type: NodeType,
    pub node_id: String,
    /// Event key for steps, collaborator name for delegations
    pub label: Option<String>,
    /// Step key the container was opened for
    pub step_key: Option<String>,
    /// Fragments attached to the container itself, in arrival order
    pub fragments: Vec<ClassifiedFragment>,
    pub children: Vec<TraceNode>,
    /// Set when the stream ended or moved on before the container was closed
    pub truncated: bool,
}

impl Container {
    pub fn new(
        node_type: NodeType,
        node_id: impl Into<String>,
        label: Option<String>,
        step_key: Option<String>,
    ) -> Self {
        Self {
            node_type,
            node_id: node_id.into(),
            label,
            step_key,
            fragments: Vec::new(),
            children: Vec::new(),
            truncated: false,
        }
    }

    /// Whether any direct child is a sub-agent delegation
    pub fn wraps_collaborator(&self) -> bool {
        self.children.iter().any(|child| {
            matches!(child, TraceNode::Container(c) if c.node_type == NodeType::AgentCollaborator)
        })
    }
}

/// A node of the reconstructed hierarchy
#[derive(Debug, Clone, PartialEq)]
pub enum TraceNode {
    Leaf(ChunkSpan),
    Container(Container),
}

impl TraceNode {
    /// The node's own fragments
    pub fn fragments(&self) -> &[ClassifiedFragment] {
        match self {
            TraceNode::Leaf(chunk) => &chunk.fragments,
            TraceNode::Container(container) => &container.fragments,
        }
    }

    pub fn children(&self) -> &[TraceNode] {
        match self {
            TraceNode::Leaf(_) => &[],
            TraceNode::Container(container) => &container.children,
        }
    }

    pub fn node_type(&self) -> Option<NodeType> {
        match self {
            TraceNode::Leaf(_) => None,
            TraceNode::Container(container) => Some(container.node_type),
        }
    }

    /// Number of nodes in this subtree, including this one
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(TraceNode::node_count).sum::<usize>()
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TraceNode::Leaf(_))
    }
}

/// Result of building a tree from one run's fragments
#[derive(Debug, Clone, PartialEq)]
pub struct TraceTree {
    pub root: TraceNode,
    /// Envelope of the first top-level fragment that carried one
    pub envelope: Option<Envelope>,
    /// Structural problems found while building; the rest of the tree is intact
    pub diagnostics: Vec<TraceError>,
}
