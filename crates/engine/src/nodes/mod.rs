//! Pipeline node implementations.

pub mod act;
pub mod act_quick;
pub mod reply;
pub mod summarize;
pub mod think;
pub mod understand;

use chrono::Utc;

use alfred_context::ContextInputs;

use crate::engine::NodeCtx;
use crate::state::PipelineState;

/// The engine-wide system prompt prefix plus a node's resolved prompt.
pub(crate) fn full_system_prompt(ctx: &NodeCtx, node_prompt: &str) -> String {
    let prefix = ctx.domain.system_prompt();
    if prefix.is_empty() {
        node_prompt.to_string()
    } else {
        format!("{prefix}\n\n{node_prompt}")
    }
}

/// Builder inputs over the current state.
pub(crate) fn context_inputs<'a>(ctx: &'a NodeCtx, state: &'a PipelineState) -> ContextInputs<'a> {
    ContextInputs {
        conversation: &state.conversation,
        registry: &state.registry,
        domain: ctx.domain.as_ref(),
        config: &ctx.config.context,
        user_message: &state.user_message,
        mode: state.mode_context.selected_mode,
        today: Utc::now().date_naive(),
        user_profile: &state.user_profile,
        domain_snapshot: &state.domain_snapshot,
    }
}
