//! Stack-based tree construction
//!
//! Open containers are kept on an explicit stack rather than the call stack,
//! so a stream that stops mid-delegation still yields a complete tree: every
//! container left open is closed by [`TraceTreeBuilder::finish`] and marked
//! truncated.

use serde_json::Value;

use super::{ChunkSpan, Container, NodeType, TraceNode, TraceTree};
use crate::extract::collaborator_name;
use crate::fragment::{ChunkType, ClassifiedFragment, Envelope, EventType};
use crate::TraceError;

/// Invocation inputs that start a tool or retriever leaf
const TOOL_INPUT_KEYS: [&str; 3] = [
    "actionGroupInvocationInput",
    "codeInterpreterInvocationInput",
    "knowledgeBaseLookupInput",
];

/// Observations that complete a tool or retriever leaf
const TOOL_OUTPUT_KEYS: [&str; 3] = [
    "actionGroupInvocationOutput",
    "codeInterpreterInvocationOutput",
    "knowledgeBaseLookupOutput",
];

/// Where a fragment goes in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    OpenCollaborator,
    CloseCollaborator,
    Guardrail,
    Failure,
    ModelInput,
    ModelOutput,
    ToolInput,
    ToolOutput,
    /// Rationale, final response, reprompt: data about the step itself
    ///
    /// These sit on the step container, so an `output.value` they carry
    /// becomes the step's own output and the step does not take one bubbled
    /// up from its children.
    StepOwn,
    UnknownChunk,
    UnknownEvent,
}

fn has_any(payload: &Value, keys: &[&str]) -> bool {
    keys.iter().any(|key| payload.get(key).is_some())
}

impl Placement {
    fn of(fragment: &ClassifiedFragment) -> Self {
        match (fragment.event, fragment.chunk) {
            (EventType::Unknown, _) => Placement::UnknownEvent,
            (EventType::Failure, _) => Placement::Failure,
            (EventType::Guardrail, _) => Placement::Guardrail,
            (_, ChunkType::AgentCollaboratorInvocationInput) => Placement::OpenCollaborator,
            (_, ChunkType::AgentCollaboratorInvocationOutput) => Placement::CloseCollaborator,
            (_, ChunkType::ModelInvocationInput) => Placement::ModelInput,
            (_, ChunkType::ModelInvocationOutput) => Placement::ModelOutput,
            (_, ChunkType::InvocationInput) if has_any(&fragment.payload, &TOOL_INPUT_KEYS) => {
                Placement::ToolInput
            }
            (_, ChunkType::Observation) if has_any(&fragment.payload, &TOOL_OUTPUT_KEYS) => {
                Placement::ToolOutput
            }
            (_, ChunkType::InvocationInput | ChunkType::Observation | ChunkType::Rationale) => {
                Placement::StepOwn
            }
            (_, ChunkType::Unknown | ChunkType::EventBody) => Placement::UnknownChunk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeafKind {
    Llm,
    Tool,
}

/// The last leaf of a frame, while it can still take fragments
#[derive(Debug, Clone, Copy)]
struct OpenLeaf {
    kind: LeafKind,
    awaiting_output: bool,
}

fn correlation_compatible(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// An open container on the builder stack
#[derive(Debug)]
struct Frame {
    container: Container,
    /// Event a step frame was opened for
    event: Option<EventType>,
    open_leaf: Option<OpenLeaf>,
    /// A delegation frame received its closing fragment
    closed: bool,
}

impl Frame {
    fn new(container: Container, event: Option<EventType>) -> Self {
        Self {
            container,
            event,
            open_leaf: None,
            closed: false,
        }
    }

    fn is_step(&self) -> bool {
        matches!(
            self.container.node_type,
            NodeType::PlainStep | NodeType::RoutingClassifier
        )
    }

    fn is_collaborator(&self) -> bool {
        self.container.node_type == NodeType::AgentCollaborator
    }

    fn push_child(&mut self, node: TraceNode) {
        self.container.children.push(node);
        self.open_leaf = None;
    }

    fn push_leaf(&mut self, fragment: ClassifiedFragment, open: Option<OpenLeaf>) {
        self.push_child(TraceNode::Leaf(ChunkSpan::new(fragment)));
        self.open_leaf = open;
    }

    /// Append to the open leaf of `kind` if it is waiting for its output.
    ///
    /// Hands the fragment back when no leaf accepts it.
    fn complete_open_leaf(
        &mut self,
        kind: LeafKind,
        fragment: ClassifiedFragment,
    ) -> Option<ClassifiedFragment> {
        let accepts = matches!(self.open_leaf, Some(open) if open.kind == kind && open.awaiting_output);
        if accepts {
            if let Some(TraceNode::Leaf(chunk)) = self.container.children.last_mut() {
                if correlation_compatible(chunk.correlation_id(), fragment.correlation_id.as_deref())
                {
                    chunk.fragments.push(fragment);
                    self.open_leaf = Some(OpenLeaf {
                        kind,
                        awaiting_output: false,
                    });
                    return None;
                }
            }
        }
        Some(fragment)
    }
}

/// Incremental tree builder over an ordered fragment stream
#[derive(Debug)]
pub struct TraceTreeBuilder {
    root: Frame,
    stack: Vec<Frame>,
    envelope: Option<Envelope>,
    diagnostics: Vec<TraceError>,
    next_id: usize,
}

impl Default for TraceTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceTreeBuilder {
    pub fn new() -> Self {
        Self {
            root: Frame::new(Container::new(NodeType::Root, "node-0", None, None), None),
            stack: Vec::new(),
            envelope: None,
            diagnostics: Vec::new(),
            next_id: 1,
        }
    }

    fn next_node_id(&mut self) -> String {
        let id = format!("node-{}", self.next_id);
        self.next_id += 1;
        id
    }

    fn top(&mut self) -> &mut Frame {
        self.stack.last_mut().unwrap_or(&mut self.root)
    }

    fn open_collaborators(&self) -> usize {
        self.stack.iter().filter(|f| f.is_collaborator()).count()
    }

    /// Close the top frame and attach it to its parent. The root never closes.
    fn pop_frame(&mut self) {
        let Some(mut frame) = self.stack.pop() else {
            return;
        };
        if frame.is_collaborator() && !frame.closed {
            tracing::warn!(
                "Closing delegation to {} without its output",
                frame.container.label.as_deref().unwrap_or("unnamed collaborator")
            );
            frame.container.truncated = true;
        }
        self.top().push_child(TraceNode::Container(frame.container));
    }

    fn close_steps(&mut self) {
        while self.stack.last().is_some_and(Frame::is_step) {
            self.pop_frame();
        }
    }

    /// Make the step for `event` / `step_key` the top frame, reusing it when open
    fn enter_step(&mut self, event: EventType, step_key: Option<&str>) {
        if let Some(top) = self.stack.last() {
            if top.is_step()
                && top.event == Some(event)
                && top.container.step_key.as_deref() == step_key
            {
                return;
            }
        }
        self.close_steps();

        let node_type = if event == EventType::RoutingClassifier {
            NodeType::RoutingClassifier
        } else {
            NodeType::PlainStep
        };
        let container = Container::new(
            node_type,
            self.next_node_id(),
            Some(event.key().to_string()),
            step_key.map(str::to_string),
        );
        self.stack.push(Frame::new(container, Some(event)));
    }

    fn push_collaborator(&mut self, name: Option<String>, step_key: Option<String>) -> &mut Frame {
        let container = Container::new(
            NodeType::AgentCollaborator,
            self.next_node_id(),
            name,
            step_key,
        );
        self.stack.push(Frame::new(container, None));
        self.top()
    }

    /// Align open delegations with the fragment's caller chain depth.
    ///
    /// Deeper delegations left open are closed as truncated. Missing ones are
    /// opened implicitly when `allow_open` is set, named after the envelope's
    /// collaborator for the innermost level.
    fn sync_depth(&mut self, target: usize, collaborator: Option<&str>, allow_open: bool) {
        while self.open_collaborators() > target {
            while self.stack.last().is_some_and(|f| !f.is_collaborator()) {
                self.pop_frame();
            }
            self.pop_frame();
        }

        if !allow_open {
            return;
        }
        while self.open_collaborators() < target {
            let innermost = self.open_collaborators() + 1 == target;
            let name = collaborator.filter(|_| innermost).map(str::to_string);
            tracing::debug!(
                "Opening implicit delegation at depth {} for {:?}",
                self.open_collaborators() + 1,
                name
            );
            self.push_collaborator(name, None);
        }
    }

    /// Place one classified fragment
    pub fn push(&mut self, fragment: ClassifiedFragment) {
        let placement = Placement::of(&fragment);

        if self.envelope.is_none()
            && fragment.collaborator_depth() == 0
            && fragment.envelope != Envelope::default()
        {
            self.envelope = Some(fragment.envelope.clone());
        }

        if !fragment.envelope.caller_chain.is_empty() {
            let depth = fragment.collaborator_depth();
            let closing = placement == Placement::CloseCollaborator;
            let target = if closing { depth + 1 } else { depth };
            let collaborator = fragment.envelope.collaborator_name.clone();
            self.sync_depth(target, collaborator.as_deref(), !closing);
        }

        let event = fragment.event;
        let step_key = fragment.step_key().map(str::to_string);

        match placement {
            Placement::UnknownEvent | Placement::Failure => {
                self.top().push_leaf(fragment, None);
            }
            Placement::UnknownChunk => {
                self.enter_step(event, step_key.as_deref());
                self.top().push_leaf(fragment, None);
            }
            Placement::Guardrail => self.place_guardrail(fragment, step_key),
            Placement::OpenCollaborator => {
                self.enter_step(event, step_key.as_deref());
                let name = collaborator_name(&fragment.payload).map(str::to_string);
                self.push_collaborator(name, step_key)
                    .container
                    .fragments
                    .push(fragment);
            }
            Placement::CloseCollaborator => self.close_collaborator(fragment),
            Placement::ModelInput => {
                self.enter_step(event, step_key.as_deref());
                self.top().push_leaf(
                    fragment,
                    Some(OpenLeaf {
                        kind: LeafKind::Llm,
                        awaiting_output: true,
                    }),
                );
            }
            Placement::ToolInput => {
                self.enter_step(event, step_key.as_deref());
                self.top().push_leaf(
                    fragment,
                    Some(OpenLeaf {
                        kind: LeafKind::Tool,
                        awaiting_output: true,
                    }),
                );
            }
            Placement::ModelOutput | Placement::ToolOutput => {
                let kind = if placement == Placement::ModelOutput {
                    LeafKind::Llm
                } else {
                    LeafKind::Tool
                };
                self.enter_step(event, step_key.as_deref());
                let top = self.top();
                if let Some(fragment) = top.complete_open_leaf(kind, fragment) {
                    top.push_leaf(
                        fragment,
                        Some(OpenLeaf {
                            kind,
                            awaiting_output: false,
                        }),
                    );
                }
            }
            Placement::StepOwn => {
                self.enter_step(event, step_key.as_deref());
                self.top().container.fragments.push(fragment);
            }
        }
    }

    /// Guardrails sit at agent level, merging into the previous guardrail
    /// node when it evaluated the same step.
    fn place_guardrail(&mut self, fragment: ClassifiedFragment, step_key: Option<String>) {
        self.close_steps();

        let top = self.top();
        if let Some(TraceNode::Container(last)) = top.container.children.last_mut() {
            if last.node_type == NodeType::Guardrail && last.step_key == step_key {
                last.fragments.push(fragment);
                return;
            }
        }

        let mut container = Container::new(NodeType::Guardrail, self.next_node_id(), None, step_key);
        container.fragments.push(fragment);
        self.top().push_child(TraceNode::Container(container));
    }

    fn close_collaborator(&mut self, fragment: ClassifiedFragment) {
        let name = collaborator_name(&fragment.payload);
        let index = self.stack.iter().rposition(|frame| {
            frame.is_collaborator()
                && match (name, frame.container.label.as_deref()) {
                    (Some(name), Some(label)) => name == label,
                    _ => true,
                }
        });

        let Some(index) = index else {
            let message = format!(
                "output of {} with no open delegation",
                name.unwrap_or("an unnamed collaborator")
            );
            tracing::warn!("Skipping fragment: {}", message);
            self.diagnostics.push(TraceError::unmatched_close(message));
            return;
        };

        while self.stack.len() > index + 1 {
            self.pop_frame();
        }
        if let Some(frame) = self.stack.last_mut() {
            frame.container.fragments.push(fragment);
            frame.closed = true;
        }
        self.pop_frame();
    }

    /// Close every open container and return the tree
    pub fn finish(mut self) -> TraceTree {
        while !self.stack.is_empty() {
            self.pop_frame();
        }
        TraceTree {
            root: TraceNode::Container(self.root.container),
            envelope: self.envelope,
            diagnostics: self.diagnostics,
        }
    }
}

/// Build a tree from one run's classified fragments, in arrival order
pub fn build<I>(fragments: I) -> TraceTree
where
    I: IntoIterator<Item = ClassifiedFragment>,
{
    let mut builder = TraceTreeBuilder::new();
    for fragment in fragments {
        builder.push(fragment);
    }
    builder.finish()
}
