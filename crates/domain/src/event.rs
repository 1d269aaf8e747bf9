//! The typed event stream every turn emits (stable schema).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// A boxed async stream, used for turn event streaming.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One step row inside a `plan` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    pub step_type: String,
    pub subdomain: String,
}

/// One tool invocation row inside a `step_complete` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallSummary {
    pub tool: String,
    pub table: String,
    pub count: usize,
}

/// One entity row inside an `active_context` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveEntity {
    #[serde(rename = "ref")]
    pub entity_ref: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub label: String,
    pub action: String,
}

/// Refs added to / removed from the rendered context since last snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextChanges {
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

/// Events emitted during a single turn.
///
/// Ordering guarantee: `done` always precedes `context_updated`, so the
/// UI shows the answer before registry persistence finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnEvent {
    /// Free-form reasoning progress, shown as a spinner line.
    #[serde(rename = "thinking")]
    Thinking { message: String },

    /// Think finished; carries the decision that routed the turn.
    #[serde(rename = "think_complete")]
    ThinkComplete { decision: String },

    /// The plan Act is about to execute.
    #[serde(rename = "plan")]
    Plan {
        goal: String,
        total_steps: usize,
        steps: Vec<PlanStep>,
    },

    /// Think decided to propose instead of executing.
    #[serde(rename = "propose")]
    Propose { message: String },

    /// The engine needs the user to clarify before continuing.
    #[serde(rename = "clarify")]
    Clarify { questions: Vec<String> },

    /// A step has started.
    #[serde(rename = "step")]
    Step {
        step: usize,
        total: usize,
        description: String,
        step_type: String,
        group: u32,
    },

    /// A step finished; carries its data and tool-call summary.
    #[serde(rename = "step_complete")]
    StepComplete {
        step: usize,
        total: usize,
        data: Value,
        tool_calls: Vec<ToolCallSummary>,
    },

    /// Heartbeat while a long node runs.
    #[serde(rename = "working")]
    Working { message: String },

    /// The entities currently rendered into prompts.
    #[serde(rename = "active_context")]
    ActiveContext {
        entities: Vec<ActiveEntity>,
        changes: ContextChanges,
        #[serde(rename = "currentTurn")]
        current_turn: u64,
    },

    /// The user-facing response. Emitted before `context_updated`.
    #[serde(rename = "done")]
    Done {
        response: String,
        conversation: Value,
        active_context: Vec<ActiveEntity>,
    },

    /// Registry persistence finished.
    #[serde(rename = "context_updated")]
    ContextUpdated,
}

/// Token usage for one LLM call (accumulated per turn).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}
