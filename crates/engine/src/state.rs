//! Per-turn pipeline state, the event writer handle, and cancellation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use alfred_domain::error::Error;
use alfred_domain::event::{ToolCallSummary, TurnEvent, Usage};
use alfred_domain::mode::ModeContext;
use alfred_domain::trace::TurnTrace;

use alfred_context::{Conversation, StepResult};
use alfred_registry::SessionIdRegistry;

use crate::outputs::{ThinkOutput, UnderstandOutput};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Turn-granular cancellation. Checked at every suspension point; a
/// turn cancelled before Summarize persists nothing.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Buffered writer handle nodes use to push turn events. The receiver
/// is drained by `run_streaming`'s caller; send failures mean the
/// consumer went away and are ignored.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<TurnEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self { tx }
    }

    pub async fn emit(&self, event: TurnEvent) {
        let _ = self.tx.send(event).await;
    }

    /// Raw sender handle, for bypass handlers that stream their own
    /// events.
    pub fn sender(&self) -> mpsc::Sender<TurnEvent> {
        self.tx.clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Batch manifest
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchItemState {
    Pending,
    Saved,
    Skipped,
}

/// One artifact a write step is expected to persist.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub entity_ref: String,
    pub label: String,
    pub state: BatchItemState,
}

/// The write-step manifest: every pending artifact visible when the
/// step started. A write step may not complete while items are pending.
#[derive(Debug, Clone, Default)]
pub struct BatchManifest {
    pub items: Vec<BatchItem>,
}

impl BatchManifest {
    pub fn has_pending(&self) -> bool {
        self.items
            .iter()
            .any(|item| item.state == BatchItemState::Pending)
    }

    pub fn mark_saved(&mut self, entity_ref: &str) {
        for item in &mut self.items {
            if item.entity_ref == entity_ref {
                item.state = BatchItemState::Saved;
            }
        }
    }

    pub fn skip_remaining(&mut self) {
        for item in &mut self.items {
            if item.state == BatchItemState::Pending {
                item.state = BatchItemState::Skipped;
            }
        }
    }

    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(|item| {
                let state = match item.state {
                    BatchItemState::Pending => "pending",
                    BatchItemState::Saved => "saved",
                    BatchItemState::Skipped => "skipped",
                };
                format!("{} ({}): {state}", item.entity_ref, item.label)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-step metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What one step actually did, for Reply's outcome lines and the
/// action-mismatch check.
#[derive(Debug, Clone, Default)]
pub struct StepMetadata {
    pub description: String,
    pub step_type: String,
    pub subdomain: String,
    pub outcome: String,
    pub tool_calls: Vec<ToolCallSummary>,
    pub blocked_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything that carries between nodes within a turn. Transient: dies
/// with the turn; cross-turn state lives in the conversation only.
pub struct PipelineState {
    pub user_message: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub mode_context: ModeContext,
    pub current_turn: u64,

    pub conversation: Conversation,
    pub registry: SessionIdRegistry,

    pub understand_output: Option<UnderstandOutput>,
    pub think_output: Option<ThinkOutput>,

    /// Discriminant of the last Act decision, for routing.
    pub pending_action: Option<String>,
    pub current_step_index: usize,
    pub step_results: BTreeMap<usize, StepResult>,
    pub step_metadata: Vec<StepMetadata>,
    pub current_step_tool_results: Vec<Value>,
    pub current_batch_manifest: Option<BatchManifest>,
    pub schema_requests: usize,
    pub prev_step_note: Option<String>,

    /// Question carried out of Act's `ask_user`.
    pub ask_user_question: Option<String>,
    /// The [`Error::BlockedStep`] carried out of Act, plus the
    /// suggested next step when one was offered.
    pub blocked: Option<(Error, Option<String>)>,
    /// Message carried out of Act's `fail`.
    pub fail_message: Option<String>,

    pub final_response: Option<String>,
    /// The error that ended the graph early, or the non-fatal
    /// [`Error::ActionMismatch`] Reply surfaced. Reply is the only
    /// consumer.
    pub error: Option<Error>,

    /// Pre-fetched domain context for builders.
    pub user_profile: String,
    pub domain_snapshot: String,

    pub usage: Usage,
    pub trace: TurnTrace,
}

impl PipelineState {
    pub fn new(
        user_message: String,
        user_id: String,
        conversation_id: Option<String>,
        mode_context: ModeContext,
        conversation: Conversation,
        registry: SessionIdRegistry,
    ) -> Self {
        let current_turn = registry.current_turn();
        Self {
            user_message,
            user_id,
            conversation_id,
            mode_context,
            current_turn,
            conversation,
            registry,
            understand_output: None,
            think_output: None,
            pending_action: None,
            current_step_index: 0,
            step_results: BTreeMap::new(),
            step_metadata: Vec::new(),
            current_step_tool_results: Vec::new(),
            current_batch_manifest: None,
            schema_requests: 0,
            prev_step_note: None,
            ask_user_question: None,
            blocked: None,
            fail_message: None,
            final_response: None,
            error: None,
            user_profile: String::new(),
            domain_snapshot: String::new(),
            usage: Usage::default(),
            trace: TurnTrace::default(),
        }
    }

    /// Reset the per-step scratch fields when a new step starts.
    pub fn begin_step(&mut self) {
        self.current_step_tool_results.clear();
        self.current_batch_manifest = None;
        self.schema_requests = 0;
    }

    /// All tool verbs executed this turn, for the mismatch check.
    pub fn executed_tools(&self) -> Vec<&str> {
        self.step_metadata
            .iter()
            .flat_map(|meta| meta.tool_calls.iter().map(|tc| tc.tool.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn manifest_tracks_pending_items() {
        let mut manifest = BatchManifest {
            items: vec![
                BatchItem {
                    entity_ref: "gen_thing_1".into(),
                    label: "Beta".into(),
                    state: BatchItemState::Pending,
                },
                BatchItem {
                    entity_ref: "gen_thing_2".into(),
                    label: "Gamma".into(),
                    state: BatchItemState::Pending,
                },
            ],
        };
        assert!(manifest.has_pending());
        manifest.mark_saved("gen_thing_1");
        assert!(manifest.has_pending());
        manifest.skip_remaining();
        assert!(!manifest.has_pending());
        let rendered = manifest.render();
        assert!(rendered.contains("gen_thing_1 (Beta): saved"));
        assert!(rendered.contains("gen_thing_2 (Gamma): skipped"));
    }
}
