//! Reasoning-trace types produced by Summarize.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use alfred_domain::event::ToolCallSummary;

/// Where the conversation stands after a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationPhase {
    #[default]
    Exploring,
    Narrowing,
    Confirming,
    Executing,
}

/// One executed step, as remembered across turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionSummary {
    pub index: usize,
    pub description: String,
    pub step_type: String,
    pub subdomain: String,
    /// Short outcome line ("read 3 rows from things").
    pub outcome: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallSummary>,
    /// Domain-extensible blocked-reason code, when the step blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

/// The reasoning trace of one whole turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnExecutionSummary {
    pub turn_num: u64,
    pub think_decision: String,
    pub think_goal: String,
    #[serde(default)]
    pub steps: Vec<StepExecutionSummary>,
    /// What Understand did to the entity registry this turn (recorded,
    /// already applied).
    #[serde(default)]
    pub entity_curation: Value,
    #[serde(default)]
    pub conversation_phase: ConversationPhase,
    /// What the user expressed, in the model's words.
    #[serde(default)]
    pub user_expressed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

impl TurnExecutionSummary {
    /// One narrative line per turn for the turn_narrative block.
    pub fn render_narrative(&self) -> String {
        let mut line = format!(
            "Turn {}: decision={}, goal=\"{}\"",
            self.turn_num, self.think_decision, self.think_goal
        );
        if !self.steps.is_empty() {
            let steps: Vec<String> = self
                .steps
                .iter()
                .map(|s| format!("{} ({}): {}", s.index + 1, s.step_type, s.outcome))
                .collect();
            line.push_str(&format!(", steps=[{}]", steps.join("; ")));
        }
        if self.entity_curation != Value::Null {
            line.push_str(", curation applied");
        }
        if let Some(reason) = &self.blocked_reason {
            line.push_str(&format!(", blocked: {reason}"));
        }
        line
    }

    /// Compressed one-liner for folding into the reasoning summary.
    pub fn render_compressed(&self) -> String {
        format!(
            "T{} {}: {}",
            self.turn_num, self.think_decision, self.think_goal
        )
    }
}
