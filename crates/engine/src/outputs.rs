//! Structured node outputs.
//!
//! Tagged unions with a single discriminator field per the wire
//! contract: `op` for curation, `decision` for Think, `action` for Act.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use alfred_domain::filter::CrudTool;
use alfred_domain::mode::ModeSettings;
use alfred_domain::step::StepType;

use alfred_context::ConversationPhase;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Understand
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entity-curation operation. Applied to the registry immediately;
/// Summarize only records what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CurationOp {
    /// Keep an aging entity in context past the recency window.
    RetainActive {
        #[serde(rename = "ref")]
        entity_ref: String,
        reason: String,
    },
    /// Let an entity age out normally again.
    Demote {
        #[serde(rename = "ref")]
        entity_ref: String,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Forget an entity entirely.
    Drop {
        #[serde(rename = "ref")]
        entity_ref: String,
        #[serde(default)]
        reason: Option<String>,
    },
    /// The topic changed: release every retained entity.
    ClearAll {
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnderstandOutput {
    #[serde(default)]
    pub referenced_entities: Vec<String>,
    #[serde(default)]
    pub entity_curation: Vec<CurationOp>,

    /// Quick mode: single table, read only, and the answer is in the
    /// database rather than something to reason out.
    #[serde(default)]
    pub quick_mode: bool,
    #[serde(default)]
    pub quick_intent: Option<String>,
    #[serde(default)]
    pub quick_subdomain: Option<String>,

    #[serde(default)]
    pub needs_clarification: bool,
    #[serde(default)]
    pub clarification_questions: Vec<String>,

    #[serde(default)]
    pub needs_disambiguation: bool,
    #[serde(default)]
    pub disambiguation_options: Vec<String>,

    /// Constraints worth pinning for the rest of the turn.
    #[serde(default)]
    pub constraint_snapshot: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Think
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkDecision {
    PlanDirect,
    Propose,
    Clarify,
}

impl ThinkDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            ThinkDecision::PlanDirect => "plan_direct",
            ThinkDecision::Propose => "propose",
            ThinkDecision::Clarify => "clarify",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkStep {
    pub description: String,
    pub step_type: StepType,
    pub subdomain: String,
    /// Reserved for future parallelization; groups execute serially in
    /// increasing order today.
    #[serde(default)]
    pub group: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkOutput {
    pub goal: String,
    #[serde(default)]
    pub steps: Vec<ThinkStep>,
    pub decision: ThinkDecision,
    #[serde(default)]
    pub proposal_message: String,
    #[serde(default)]
    pub clarification_questions: Vec<String>,
}

impl ThinkOutput {
    /// Normalize the plan against the mode rules:
    /// - `plan_direct` with no steps but a proposal message is a propose
    /// - proposal-required modes never execute directly
    /// - steps beyond the mode budget are cut
    /// - steps are ordered by group (stable within a group)
    pub fn validate(mut self, settings: &ModeSettings) -> Self {
        if self.decision == ThinkDecision::PlanDirect
            && self.steps.is_empty()
            && !self.proposal_message.is_empty()
        {
            self.decision = ThinkDecision::Propose;
        }

        if settings.proposal_required && self.decision == ThinkDecision::PlanDirect {
            self.decision = ThinkDecision::Propose;
            if self.proposal_message.is_empty() {
                self.proposal_message = self.goal.clone();
            }
        }

        if self.steps.len() > settings.max_steps {
            tracing::warn!(
                planned = self.steps.len(),
                budget = settings.max_steps,
                "plan exceeds mode step budget; truncated"
            );
            self.steps.truncate(settings.max_steps);
        }

        self.steps.sort_by_key(|s| s.group);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Act
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A generated artifact carried inside a `step_complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    /// Entity type; when absent the domain infers it from the content.
    #[serde(default)]
    pub type_name: Option<String>,
    pub label: String,
    pub content: Value,
}

/// The eight Act actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActDecision {
    ToolCall {
        tool: CrudTool,
        params: Value,
    },
    StepComplete {
        #[serde(default)]
        result: Value,
        #[serde(default)]
        note: Option<String>,
        #[serde(default)]
        artifacts: Vec<GeneratedArtifact>,
    },
    RequestSchema {
        table: String,
    },
    RetrieveStep {
        turn: u64,
        step: usize,
    },
    RetrieveArchive {
        key: String,
    },
    AskUser {
        question: String,
    },
    Blocked {
        reason_code: String,
        details: String,
        #[serde(default)]
        suggested_next: Option<String>,
    },
    Fail {
        #[serde(default)]
        message: String,
    },
}

impl ActDecision {
    pub fn kind(&self) -> &'static str {
        match self {
            ActDecision::ToolCall { .. } => "tool_call",
            ActDecision::StepComplete { .. } => "step_complete",
            ActDecision::RequestSchema { .. } => "request_schema",
            ActDecision::RetrieveStep { .. } => "retrieve_step",
            ActDecision::RetrieveArchive { .. } => "retrieve_archive",
            ActDecision::AskUser { .. } => "ask_user",
            ActDecision::Blocked { .. } => "blocked",
            ActDecision::Fail { .. } => "fail",
        }
    }
}

/// ActQuick's single-decision model: one read, nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActQuickDecision {
    pub tool: CrudTool,
    pub params: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summarize
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizeOutput {
    /// The assistant's response in under ~100 words.
    #[serde(default)]
    pub response_summary: String,
    /// Updated session theme.
    #[serde(default)]
    pub engagement_summary: String,
    #[serde(default)]
    pub conversation_phase: ConversationPhase,
    #[serde(default)]
    pub user_expressed: String,
}
