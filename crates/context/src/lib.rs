//! Conversation memory and context assembly.
//!
//! Three logical layers (entity, conversation, reasoning) assembled
//! per consumer node with bounded recency windows and token-budgeted
//! compression. The [`Conversation`] object is the sole cross-turn
//! state; everything else here is pure formatting over it and the
//! registry.

mod budget;
mod builders;
mod conversation;
mod summary;
mod tiers;

pub use budget::{cap_chars, estimate_tokens, fit_to_budget, PromptSection};
pub use builders::{
    build_act_data_section, build_think_context, build_understand_context, capped_guidance,
    conversation_history, ContextInputs,
};
pub use conversation::{Conversation, PendingClarification, StepResult, TurnRecord};
pub use summary::{ConversationPhase, StepExecutionSummary, TurnExecutionSummary};
pub use tiers::{render_active_entities, render_entity_context, EntityTierView};
