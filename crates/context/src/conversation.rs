//! The persisted conversation object, the sole cross-turn state.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use alfred_domain::error::Result;
use alfred_domain::event::{ToolCallSummary, Usage};

use crate::summary::TurnExecutionSummary;

/// One user/assistant exchange kept at full text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: u64,
    pub user_message: String,
    pub assistant_response: String,
}

/// A clarification question the engine is waiting on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingClarification {
    pub question: String,
    pub turn: u64,
}

/// Full payload of one executed step, kept for the Act data section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub step_type: String,
    pub description: String,
    pub data: Value,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallSummary>,
    /// Handoff note for the next step, if the model left one.
    #[serde(default)]
    pub note: Option<String>,
}

/// Serializable conversation state.
///
/// New fields must be added with `#[serde(default)]` so older blobs
/// still load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    /// Session theme, LLM-maintained.
    #[serde(default)]
    pub engagement_summary: String,

    /// Most recent turns at full text.
    #[serde(default)]
    pub recent_turns: Vec<TurnRecord>,

    /// Compressed older turns.
    #[serde(default)]
    pub history_summary: String,

    /// Last few reasoning traces in full.
    #[serde(default)]
    pub turn_summaries: Vec<TurnExecutionSummary>,

    /// Compressed older reasoning.
    #[serde(default)]
    pub reasoning_summary: String,

    /// Full step payloads per turn, for the Act data section.
    #[serde(default)]
    pub turn_step_results: HashMap<u64, BTreeMap<usize, StepResult>>,

    /// Cross-turn generated content keyed by subdomain/type.
    #[serde(default)]
    pub content_archive: HashMap<String, Value>,

    #[serde(default)]
    pub pending_clarification: Option<PendingClarification>,

    /// Serialized registry (`SessionIdRegistry::to_dict`).
    #[serde(default)]
    pub id_registry: Value,

    /// Cumulative session token usage.
    #[serde(default)]
    pub usage: Usage,
}

impl Conversation {
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    // ── Turn history ───────────────────────────────────────────────

    /// Append a finished turn, keeping at most `full_detail_turns` at
    /// full text. Returns the overflow records the caller should fold
    /// into the history summary.
    pub fn push_turn(
        &mut self,
        record: TurnRecord,
        full_detail_turns: usize,
    ) -> Vec<TurnRecord> {
        self.recent_turns.push(record);
        if self.recent_turns.len() <= full_detail_turns {
            return Vec::new();
        }
        let overflow = self.recent_turns.len() - full_detail_turns;
        self.recent_turns.drain(..overflow).collect()
    }

    /// Fold overflow turns into the history summary using an
    /// already-computed compression (the Summarize node's LLM output).
    pub fn fold_history(&mut self, compressed: &str) {
        if compressed.is_empty() {
            return;
        }
        if !self.history_summary.is_empty() {
            self.history_summary.push('\n');
        }
        self.history_summary.push_str(compressed);
    }

    // ── Reasoning trace ────────────────────────────────────────────

    /// Append a reasoning trace, keeping the last `full_trace_turns` in
    /// full. Older traces fold into the reasoning summary as one-liners.
    pub fn push_turn_summary(
        &mut self,
        summary: TurnExecutionSummary,
        full_trace_turns: usize,
    ) {
        self.turn_summaries.push(summary);
        while self.turn_summaries.len() > full_trace_turns {
            let old = self.turn_summaries.remove(0);
            if !self.reasoning_summary.is_empty() {
                self.reasoning_summary.push('\n');
            }
            self.reasoning_summary.push_str(&old.render_compressed());
        }
    }

    // ── Step results ───────────────────────────────────────────────

    pub fn record_step_result(&mut self, turn: u64, result: StepResult) {
        self.turn_step_results
            .entry(turn)
            .or_default()
            .insert(result.step_index, result);
    }

    pub fn step_results_for(&self, turn: u64) -> Option<&BTreeMap<usize, StepResult>> {
        self.turn_step_results.get(&turn)
    }

    /// Drop step payloads older than `keep_turns` turns.
    pub fn prune_step_results(&mut self, current_turn: u64, keep_turns: u64) {
        let cutoff = current_turn.saturating_sub(keep_turns);
        self.turn_step_results.retain(|turn, _| *turn > cutoff);
    }

    // ── Archive ────────────────────────────────────────────────────

    pub fn archive_content(&mut self, key: impl Into<String>, content: Value) {
        self.content_archive.insert(key.into(), content);
    }

    pub fn archived(&self, key: &str) -> Option<&Value> {
        self.content_archive.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn turn(n: u64) -> TurnRecord {
        TurnRecord {
            turn: n,
            user_message: format!("message {n}"),
            assistant_response: format!("response {n}"),
        }
    }

    #[test]
    fn push_turn_returns_overflow() {
        let mut conv = Conversation::default();
        assert!(conv.push_turn(turn(1), 3).is_empty());
        assert!(conv.push_turn(turn(2), 3).is_empty());
        assert!(conv.push_turn(turn(3), 3).is_empty());
        let overflow = conv.push_turn(turn(4), 3);
        assert_eq!(overflow.len(), 1);
        assert_eq!(overflow[0].turn, 1);
        assert_eq!(conv.recent_turns.len(), 3);
        assert_eq!(conv.recent_turns[0].turn, 2);
    }

    #[test]
    fn fold_history_appends_lines() {
        let mut conv = Conversation::default();
        conv.fold_history("user asked about things");
        conv.fold_history("user renamed a thing");
        assert_eq!(
            conv.history_summary,
            "user asked about things\nuser renamed a thing"
        );
    }

    #[test]
    fn old_traces_fold_into_reasoning_summary() {
        let mut conv = Conversation::default();
        for n in 1..=4 {
            conv.push_turn_summary(
                TurnExecutionSummary {
                    turn_num: n,
                    think_decision: "plan_direct".into(),
                    think_goal: format!("goal {n}"),
                    steps: vec![],
                    entity_curation: Value::Null,
                    conversation_phase: Default::default(),
                    user_expressed: String::new(),
                    blocked_reason: None,
                },
                2,
            );
        }
        assert_eq!(conv.turn_summaries.len(), 2);
        assert_eq!(conv.turn_summaries[0].turn_num, 3);
        assert!(conv.reasoning_summary.contains("T1 plan_direct: goal 1"));
        assert!(conv.reasoning_summary.contains("T2 plan_direct: goal 2"));
    }

    #[test]
    fn step_results_prune_by_turn() {
        let mut conv = Conversation::default();
        for turn in 1..=4 {
            conv.record_step_result(
                turn,
                StepResult {
                    step_index: 0,
                    step_type: "read".into(),
                    description: "read".into(),
                    data: json!([]),
                    tool_calls: vec![],
                    note: None,
                },
            );
        }
        conv.prune_step_results(4, 2);
        assert!(conv.step_results_for(1).is_none());
        assert!(conv.step_results_for(2).is_none());
        assert!(conv.step_results_for(3).is_some());
        assert!(conv.step_results_for(4).is_some());
    }

    #[test]
    fn older_blob_without_new_fields_loads() {
        let blob = json!({
            "engagement_summary": "about things",
            "recent_turns": []
        });
        let conv = Conversation::from_value(blob).unwrap();
        assert_eq!(conv.engagement_summary, "about things");
        assert_eq!(conv.usage.total_tokens, 0);
        assert!(conv.pending_clarification.is_none());
    }

    #[test]
    fn round_trips_through_value() {
        let mut conv = Conversation::default();
        conv.engagement_summary = "theme".into();
        conv.archive_content("things:generated", json!({"name": "Beta"}));
        conv.pending_clarification = Some(PendingClarification {
            question: "which one?".into(),
            turn: 2,
        });
        let v = conv.to_value().unwrap();
        let back = Conversation::from_value(v).unwrap();
        assert_eq!(back.engagement_summary, "theme");
        assert_eq!(back.archived("things:generated"), Some(&json!({"name": "Beta"})));
        assert_eq!(back.pending_clarification.unwrap().turn, 2);
    }
}
